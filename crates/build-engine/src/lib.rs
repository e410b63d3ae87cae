//! Android Build Engine
//!
//! Wraps the Android toolchain (aapt2, javac, kotlinc, d8, apksigner) in
//! build steps and assembles them into the standard pipeline.

pub mod aapt2;
pub mod aar;
pub mod apk;
pub mod cache;
pub mod compile;
pub mod config;
pub mod dex;
pub mod pipeline;
pub mod process;
pub mod signing;

pub use aapt2::{Aapt2Compile, Aapt2Link};
pub use aar::ProcessAars;
pub use apk::{format_size, list_entries, ApkBuild, ApkEntry};
pub use cache::BuildCacheManager;
pub use compile::{JavaCompile, KotlinCompile};
pub use config::ProjectLayout;
pub use dex::D8Compile;
pub use pipeline::{standard, standard_with_artifacts};
pub use process::{run_streaming, ProcessOutput, ToolCommand};
pub use signing::ApkSign;

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Build errors
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("{0}")]
    Input(String),
    #[error("Failed to start {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Zip Slip vulnerability detected: {0}")]
    ZipSlip(String),
    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("Dependency resolution error: {0}")]
    Resolve(#[from] apkforge_dependency_resolver::ResolveError),
}

/// Regular files under `root` with one of `extensions`, sorted by path.
/// An empty extension list matches every file; a missing root yields nothing.
pub(crate) fn collect_files(root: &Path, extensions: &[&str]) -> Vec<PathBuf> {
    if !root.is_dir() {
        return Vec::new();
    }

    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            extensions.is_empty()
                || path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map_or(false, |e| extensions.contains(&e))
        })
        .collect();
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_collect_files_filters_and_sorts() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("b/c")).unwrap();
        std::fs::write(dir.path().join("b/c/Z.java"), "").unwrap();
        std::fs::write(dir.path().join("A.java"), "").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();

        let java = collect_files(dir.path(), &["java"]);
        assert_eq!(java, vec![dir.path().join("A.java"), dir.path().join("b/c/Z.java")]);

        assert_eq!(collect_files(dir.path(), &[]).len(), 3);
        assert!(collect_files(&dir.path().join("missing"), &[]).is_empty());
    }
}
