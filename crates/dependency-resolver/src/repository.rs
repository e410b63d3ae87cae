//! Maven repositories
//!
//! Remote repositories are plain HTTP trees following the Maven layout.
//! Downloaded files land in a local repository with the same layout, which
//! doubles as the cache for later builds.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

use apkforge_core::{log_line, BuildCallback};
use fs2::FileExt;
use futures::StreamExt;
use reqwest::{Client, Response, StatusCode};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::declaration::DependencyCoordinate;
use crate::ResolveError;

/// Lock file guarding the local repository against concurrent resolutions
pub const LOCK_FILE_NAME: &str = ".apkforge.lock";

/// HTTP client over an ordered list of remote repositories
pub struct RepositoryClient {
    client: Client,
    repositories: Vec<String>,
}

impl RepositoryClient {
    /// Create a new client
    pub fn new(repositories: Vec<String>, timeout_secs: u64) -> Result<Self, ResolveError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("apkforge/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            repositories,
        })
    }

    pub fn repositories(&self) -> &[String] {
        &self.repositories
    }

    fn url(&self, index: usize, path: &str) -> String {
        format!("{}/{}", self.repositories[index].trim_end_matches('/'), path)
    }

    /// Repository indices with `preferred` moved to the front
    fn order(&self, preferred: Option<usize>) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.repositories.len()).collect();
        if let Some(p) = preferred.filter(|p| *p < self.repositories.len()) {
            order.retain(|i| *i != p);
            order.insert(0, p);
        }
        order
    }

    /// `None` when the repository does not have the file
    async fn get(&self, index: usize, path: &str) -> Result<Option<Response>, reqwest::Error> {
        let url = self.url(index, path);
        debug!("GET {}", url);
        let response = self.client.get(&url).send().await?;
        if matches!(response.status(), StatusCode::NOT_FOUND | StatusCode::GONE) {
            return Ok(None);
        }
        Ok(Some(response.error_for_status()?))
    }

    /// Fetch a text file from the first repository that serves it
    pub async fn fetch_text(
        &self,
        path: &str,
        preferred: Option<usize>,
    ) -> Result<Option<(String, usize)>, ResolveError> {
        let mut last_error = None;

        for index in self.order(preferred) {
            let result = match self.get(index, path).await {
                Ok(Some(response)) => response.text().await.map(Some),
                Ok(None) => Ok(None),
                Err(e) => Err(e),
            };
            match result {
                Ok(Some(text)) => return Ok(Some((text, index))),
                Ok(None) => debug!("{} not found in {}", path, self.repositories[index]),
                Err(e) => {
                    warn!("Failed to fetch {} from {}: {}", path, self.repositories[index], e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => Err(e.into()),
            None => Ok(None),
        }
    }

    /// Download a file into `target`, trying `preferred` first.
    ///
    /// Returns the index of the repository that served the file, or `None`
    /// when no repository has it.
    pub async fn download(
        &self,
        path: &str,
        target: &Path,
        preferred: Option<usize>,
        callback: Option<&dyn BuildCallback>,
    ) -> Result<Option<usize>, ResolveError> {
        let mut last_error = None;

        for index in self.order(preferred) {
            match self.download_from(index, path, target, callback).await {
                Ok(true) => return Ok(Some(index)),
                Ok(false) => debug!("{} not found in {}", path, self.repositories[index]),
                Err(ResolveError::Network(e)) => {
                    warn!("Failed to download {} from {}: {}", path, self.repositories[index], e);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        match last_error {
            Some(e) => Err(e.into()),
            None => Ok(None),
        }
    }

    async fn download_from(
        &self,
        index: usize,
        path: &str,
        target: &Path,
        callback: Option<&dyn BuildCallback>,
    ) -> Result<bool, ResolveError> {
        let Some(response) = self.get(index, path).await? else {
            return Ok(false);
        };

        let url = self.url(index, path);
        info!("Downloading {} to {:?}", url, target);
        log_line(callback, &format!("Downloading {}", url));

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let part = part_path(target);
        let mut hasher = Sha256::new();
        let written = match write_stream(response, &part, &mut hasher).await {
            Ok(written) => written,
            Err(e) => {
                let _ = tokio::fs::remove_file(&part).await;
                return Err(e);
            }
        };

        let digest = hex::encode(hasher.finalize());
        if let Err(e) = self.verify_checksum(index, path, &digest).await {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(e);
        }

        tokio::fs::rename(&part, target).await?;
        log_line(callback, &format!("Downloaded {} ({} bytes)", path, written));
        Ok(true)
    }

    /// Compare against a published `.sha256` file when the repository has one
    async fn verify_checksum(&self, index: usize, path: &str, actual: &str) -> Result<(), ResolveError> {
        let checksum_path = format!("{}.sha256", path);
        let expected = match self.get(index, &checksum_path).await {
            Ok(Some(response)) => match response.text().await {
                Ok(text) => text,
                Err(_) => return Ok(()),
            },
            Ok(None) | Err(_) => return Ok(()),
        };

        let expected = expected.split_whitespace().next().unwrap_or_default().to_lowercase();
        if expected.is_empty() || expected == actual {
            debug!("Checksum verified for {}", path);
            Ok(())
        } else {
            warn!("Checksum mismatch for {}: expected {}, got {}", path, expected, actual);
            Err(ResolveError::ChecksumMismatch(path.to_string()))
        }
    }
}

async fn write_stream(response: Response, part: &Path, hasher: &mut Sha256) -> Result<u64, ResolveError> {
    let mut file = tokio::fs::File::create(part).await?;
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        hasher.update(&chunk);
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }

    file.flush().await?;
    Ok(written)
}

fn part_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    target.with_file_name(name)
}

/// On-disk repository in Maven layout
#[derive(Debug, Clone)]
pub struct LocalRepository {
    root: PathBuf,
}

impl LocalRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the artifact of `coordinate` lives
    pub fn artifact_path(&self, coordinate: &DependencyCoordinate) -> PathBuf {
        self.root.join(coordinate.relative_dir()).join(coordinate.file_name())
    }

    pub fn pom_path(&self, coordinate: &DependencyCoordinate) -> PathBuf {
        self.root.join(coordinate.relative_dir()).join(coordinate.pom_file_name())
    }

    /// Take the exclusive resolution lock, failing if another process holds it
    pub fn lock(&self) -> Result<RepositoryLock, ResolveError> {
        std::fs::create_dir_all(&self.root)?;
        let path = self.root.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        if file.try_lock_exclusive().is_err() {
            drop(file);
            return Err(ResolveError::Locked(self.root.clone()));
        }

        debug!("Locked local repository {:?}", self.root);
        Ok(RepositoryLock { _file: file, path })
    }
}

/// Held for the duration of a resolution; released on drop
#[derive(Debug)]
pub struct RepositoryLock {
    _file: File,
    path: PathBuf,
}

impl RepositoryLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}
