//! Late-bound path lists shared between steps
//!
//! The pipeline is assembled before anything runs, so steps that produce
//! jars (dependency resolution, AAR processing) and steps that consume them
//! (compilers, dexer, linker) share a cheap clone-able handle instead of a
//! value fixed at construction time.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

/// Ordered, de-duplicated list of paths behind a shared handle
#[derive(Debug, Clone, Default)]
pub struct PathList {
    inner: Arc<RwLock<Vec<PathBuf>>>,
}

impl PathList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a path unless it is already present
    pub fn push(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        let mut paths = self.inner.write();
        if !paths.contains(&path) {
            paths.push(path);
        }
    }

    pub fn extend<I, P>(&self, paths: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        for path in paths {
            self.push(path);
        }
    }

    /// Replace the whole list
    pub fn replace<I, P>(&self, paths: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.inner.write().clear();
        self.extend(paths);
    }

    pub fn snapshot(&self) -> Vec<PathBuf> {
        self.inner.read().clone()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.inner.read().iter().any(|p| p == path)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Join with the platform path separator
    pub fn join(&self) -> String {
        join_paths(&self.snapshot())
    }
}

/// Join paths with the platform separator (`:` on unix, `;` on windows).
///
/// Entries that themselves contain the separator cannot be represented and
/// are dropped with a warning.
pub fn join_paths(paths: &[PathBuf]) -> String {
    let joinable: Vec<&PathBuf> = paths
        .iter()
        .filter(|path| {
            let ok = std::env::join_paths([path.as_os_str()]).is_ok();
            if !ok {
                warn!("Leaving {:?} off the classpath: it contains the path separator", path);
            }
            ok
        })
        .collect();

    match std::env::join_paths(joinable) {
        Ok(joined) => joined.to_string_lossy().into_owned(),
        Err(e) => {
            warn!("Failed to join classpath: {}", e);
            String::new()
        }
    }
}

/// Handles written by producer steps and read by consumer steps
#[derive(Debug, Clone, Default)]
pub struct SharedArtifacts {
    /// Jar files for compilation and dexing
    pub classpath: PathList,
    /// Every resolved dependency file, jars and AARs alike
    pub resolved: PathList,
    /// Compiled resource archives (`.flata`) from libraries
    pub compiled_resources: PathList,
}

impl SharedArtifacts {
    pub fn new() -> Self {
        Self::default()
    }
}
