//! Transitive dependency resolution
//!
//! Walks the dependency graph breadth-first so the nearest declaration of a
//! `group:artifact` wins, downloads POMs and artifacts into the local
//! repository and publishes the resulting jars to the shared classpath.
//! Nothing is published unless the whole graph resolved.

use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

use apkforge_core::classpath::join_paths;
use apkforge_core::{log_line, BuildCallback, BuildResult, BuildStep, ResolverConfig, SharedArtifacts};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::declaration::{DependencyCoordinate, DependencyDeclarationParser, Exclusion};
use crate::metadata::{compare_versions, VersionIndex};
use crate::pom::Pom;
use crate::repository::{LocalRepository, RepositoryClient};
use crate::ResolveError;

/// Parent POM chains longer than this are cut off
const MAX_PARENT_DEPTH: usize = 8;

/// A file in the local repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedArtifact {
    pub coordinate: DependencyCoordinate,
    pub file: PathBuf,
}

impl ResolvedArtifact {
    pub fn extension(&self) -> &str {
        &self.coordinate.extension
    }

    pub fn is_jar(&self) -> bool {
        self.extension() == "jar"
    }
}

/// Outcome of a resolution, in resolution order
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub artifacts: Vec<ResolvedArtifact>,
}

impl Resolution {
    /// Jar files only
    pub fn classpath(&self) -> Vec<PathBuf> {
        self.artifacts.iter().filter(|a| a.is_jar()).map(|a| a.file.clone()).collect()
    }

    /// Every resolved file, AARs included
    pub fn files(&self) -> Vec<PathBuf> {
        self.artifacts.iter().map(|a| a.file.clone()).collect()
    }

    pub fn classpath_string(&self) -> String {
        join_paths(&self.classpath())
    }
}

struct Pending {
    coordinate: DependencyCoordinate,
    /// Exclusions inherited from every edge above this one
    exclusions: Vec<Exclusion>,
    /// Edges from the nearest declared root; indents the progress log
    depth: usize,
}

/// Resolves declared dependencies into the local repository
pub struct DependencyResolver {
    declarations: PathBuf,
    parser: DependencyDeclarationParser,
    local: LocalRepository,
    client: RepositoryClient,
    artifacts: SharedArtifacts,
}

impl DependencyResolver {
    /// Create a resolver for a declaration file
    pub fn new(
        declarations: impl Into<PathBuf>,
        config: &ResolverConfig,
        artifacts: SharedArtifacts,
    ) -> Result<Self, ResolveError> {
        Ok(Self {
            declarations: declarations.into(),
            parser: DependencyDeclarationParser::new()?,
            local: LocalRepository::new(config.local_repository_path()?),
            client: RepositoryClient::new(config.repositories.clone(), config.timeout_secs)?,
            artifacts,
        })
    }

    pub fn local_repository(&self) -> &LocalRepository {
        &self.local
    }

    pub fn declarations(&self) -> &Path {
        &self.declarations
    }

    /// Read the declaration file and resolve everything it declares
    pub async fn resolve_declarations(
        &self,
        callback: Option<&dyn BuildCallback>,
    ) -> Result<Resolution, ResolveError> {
        let roots = self.parser.read_file(&self.declarations).await?;
        info!("Found {} declared dependencies", roots.len());
        self.resolve(roots, callback).await
    }

    /// Resolve `roots` and their transitive dependencies
    pub async fn resolve(
        &self,
        roots: Vec<DependencyCoordinate>,
        callback: Option<&dyn BuildCallback>,
    ) -> Result<Resolution, ResolveError> {
        if roots.is_empty() {
            return Ok(Resolution::default());
        }

        let _lock = self.local.lock()?;
        let mut seen: HashMap<String, String> = HashMap::new();
        let mut queue = VecDeque::new();

        for root in roots {
            if seen.contains_key(&root.key()) {
                debug!("{} already declared, keeping the first version", root);
                continue;
            }
            seen.insert(root.key(), root.version.clone());
            queue.push_back(Pending {
                coordinate: root,
                exclusions: Vec::new(),
                depth: 0,
            });
        }

        let mut resolution = Resolution::default();

        while let Some(pending) = queue.pop_front() {
            let mut coordinate = pending.coordinate;
            coordinate.version = select_version(&coordinate)?;
            log_line(callback, &format!("{}Resolving {}", "  ".repeat(pending.depth), coordinate));

            let (pom, repository) = self.load_pom(&coordinate, callback).await?;

            let extension = match &pom {
                Some(pom) => pom.artifact_extension(&coordinate.extension),
                None => Some(coordinate.extension.clone()),
            };
            if let Some(extension) = extension {
                coordinate.extension = extension;
                let file = self.fetch_artifact(&coordinate, repository, callback).await?;
                resolution.artifacts.push(ResolvedArtifact {
                    coordinate: coordinate.clone(),
                    file,
                });
            }

            let Some(pom) = pom else {
                continue;
            };

            let mut inherited = pending.exclusions;
            for exclusion in &coordinate.exclusions {
                if !inherited.contains(exclusion) {
                    inherited.push(exclusion.clone());
                }
            }

            for dependency in pom.effective_dependencies() {
                if !dependency.is_followed() {
                    debug!("Skipping {}:{} ({:?})", dependency.group, dependency.artifact, dependency.scope);
                    continue;
                }
                let Some(child) = dependency.to_coordinate() else {
                    warn!(
                        "Skipping {}:{} required by {}: no version",
                        dependency.group, dependency.artifact, coordinate
                    );
                    continue;
                };
                if child.is_excluded_by(&inherited) {
                    debug!("{} excluded below {}", child, coordinate);
                    continue;
                }
                if let Some(chosen) = seen.get(&child.key()) {
                    if chosen != &child.version {
                        debug!("{} {} loses to nearer {}", child.key(), child.version, chosen);
                    }
                    continue;
                }

                seen.insert(child.key(), child.version.clone());
                queue.push_back(Pending {
                    coordinate: child,
                    exclusions: inherited.clone(),
                    depth: pending.depth + 1,
                });
            }
        }

        self.artifacts.classpath.extend(resolution.classpath());
        self.artifacts.resolved.extend(resolution.files());
        info!("Resolved {} artifacts", resolution.artifacts.len());
        Ok(resolution)
    }

    /// The newest published version if it is newer than `coordinate`'s.
    ///
    /// Metadata that cannot be fetched or parsed means no update.
    pub async fn check_for_update(&self, coordinate: &DependencyCoordinate) -> Option<String> {
        let path = format!("{}/{}/maven-metadata.xml", coordinate.group.replace('.', "/"), coordinate.artifact);
        let text = match self.client.fetch_text(&path, None).await {
            Ok(Some((text, _))) => text,
            Ok(None) => return None,
            Err(e) => {
                debug!("Update check for {} failed: {}", coordinate, e);
                return None;
            }
        };

        let index = VersionIndex::parse(&text).ok()?;
        let newest = index.newest()?;
        (compare_versions(newest, &coordinate.version) == Ordering::Greater).then(|| newest.to_string())
    }

    /// Fetch a POM and fold in its parent chain
    async fn load_pom(
        &self,
        coordinate: &DependencyCoordinate,
        callback: Option<&dyn BuildCallback>,
    ) -> Result<(Option<Pom>, Option<usize>), ResolveError> {
        let Some((text, repository)) = self.fetch_pom_text(coordinate, None, callback).await? else {
            warn!("No POM for {}, treating it as a leaf", coordinate);
            return Ok((None, None));
        };

        let mut pom = Pom::parse(&text)?;
        let mut next_parent = pom.parent.clone();
        let mut depth = 0;

        while let Some(parent) = next_parent.take() {
            if depth == MAX_PARENT_DEPTH {
                warn!("Parent chain of {} is too deep, stopping at {}", coordinate, depth);
                break;
            }
            depth += 1;

            let parent_coordinate = parent.to_coordinate();
            let Some((text, _)) = self.fetch_pom_text(&parent_coordinate, repository, callback).await? else {
                warn!("Parent POM {} of {} not found", parent_coordinate, coordinate);
                break;
            };
            let parent_pom = Pom::parse(&text)?;
            next_parent = parent_pom.parent.clone();
            pom.merge_parent(&parent_pom);
        }

        Ok((Some(pom), repository))
    }

    async fn fetch_pom_text(
        &self,
        coordinate: &DependencyCoordinate,
        preferred: Option<usize>,
        callback: Option<&dyn BuildCallback>,
    ) -> Result<Option<(String, Option<usize>)>, ResolveError> {
        let path = self.local.pom_path(coordinate);
        if path.exists() {
            return Ok(Some((tokio::fs::read_to_string(&path).await?, None)));
        }

        let url_path = coordinate.url_path(&coordinate.pom_file_name());
        match self.client.download(&url_path, &path, preferred, callback).await? {
            Some(index) => Ok(Some((tokio::fs::read_to_string(&path).await?, Some(index)))),
            None => Ok(None),
        }
    }

    async fn fetch_artifact(
        &self,
        coordinate: &DependencyCoordinate,
        preferred: Option<usize>,
        callback: Option<&dyn BuildCallback>,
    ) -> Result<PathBuf, ResolveError> {
        let path = self.local.artifact_path(coordinate);
        if path.exists() {
            debug!("Using cached {:?}", path);
            return Ok(path);
        }

        let url_path = coordinate.url_path(&coordinate.file_name());
        match self.client.download(&url_path, &path, preferred, callback).await? {
            Some(_) => Ok(path),
            None => Err(ResolveError::NotFound(coordinate.canonical())),
        }
    }
}

/// Concrete version for a coordinate; ranges use their inclusive lower bound
pub fn select_version(coordinate: &DependencyCoordinate) -> Result<String, ResolveError> {
    let version = coordinate.version.trim();
    if !version.starts_with('[') && !version.starts_with('(') {
        return Ok(version.to_string());
    }

    let unsupported = || ResolveError::VersionRange {
        coordinate: coordinate.key(),
        version: version.to_string(),
    };

    if !version.starts_with('[') {
        return Err(unsupported());
    }
    let lower = version[1..]
        .split([',', ']', ')'])
        .next()
        .map(str::trim)
        .unwrap_or_default();
    if lower.is_empty() {
        return Err(unsupported());
    }
    Ok(lower.to_string())
}

#[async_trait]
impl BuildStep for DependencyResolver {
    fn name(&self) -> &str {
        "ResolveDependencies"
    }

    async fn execute(&mut self, callback: Option<&dyn BuildCallback>) -> BuildResult {
        if !self.declarations.exists() {
            let message = "No dependencies file found. Skipping resolution.";
            log_line(callback, message);
            return BuildResult::success(message);
        }

        log_line(callback, &format!("Resolving dependencies from {}", self.declarations.display()));
        match self.resolve_declarations(callback).await {
            Ok(resolution) if resolution.artifacts.is_empty() => {
                BuildResult::success("No dependencies declared.")
            }
            Ok(resolution) => {
                let mut output = format!("Resolved {} artifacts", resolution.artifacts.len());
                for artifact in &resolution.artifacts {
                    output.push('\n');
                    output.push_str(&artifact.file.to_string_lossy());
                }
                BuildResult::success(output)
            }
            Err(e) => {
                let message = format!("Dependency resolution failed: {}", e);
                log_line(callback, &message);
                BuildResult::failure(message)
            }
        }
    }
}
