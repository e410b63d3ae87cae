//! Incremental build snapshots
//!
//! A step records a fingerprint of its inputs next to its outputs once it
//! succeeds. The next run skips the step when the fingerprint still matches
//! and the outputs are still there. Only file metadata is hashed, so a
//! `touch` is enough to force a rebuild.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

const SNAPSHOT_EXTENSION: &str = "snapshot";

/// Snapshot-based skip decisions for build steps
pub struct BuildCacheManager;

impl BuildCacheManager {
    /// Path of the snapshot file for `task` under `output_dir`
    pub fn snapshot_path(task: &str, output_dir: &Path) -> PathBuf {
        output_dir.join(format!("{}.{}", task, SNAPSHOT_EXTENSION))
    }

    /// Whether `task` can be skipped.
    ///
    /// Any doubt (missing output, missing snapshot, unreadable snapshot)
    /// means the task runs.
    pub fn should_skip(task: &str, inputs: &[PathBuf], output_dir: &Path, required: Option<&str>) -> bool {
        if !output_dir.is_dir() {
            debug!("{}: output directory {:?} missing", task, output_dir);
            return false;
        }

        if !has_outputs(output_dir) {
            debug!("{}: output directory {:?} is empty", task, output_dir);
            return false;
        }

        if let Some(required) = required {
            if !output_dir.join(required).exists() {
                debug!("{}: required artifact {} missing", task, required);
                return false;
            }
        }

        let stored = match std::fs::read_to_string(Self::snapshot_path(task, output_dir)) {
            Ok(stored) => stored,
            Err(_) => return false,
        };

        let skip = stored.trim() == Self::compute_digest(inputs);
        debug!("{}: snapshot {}", task, if skip { "matches" } else { "is stale" });
        skip
    }

    /// Record the fingerprint of `inputs` for `task`
    pub fn update_snapshot(task: &str, inputs: &[PathBuf], output_dir: &Path) {
        let digest = Self::compute_digest(inputs);
        let result = std::fs::create_dir_all(output_dir)
            .and_then(|_| std::fs::write(Self::snapshot_path(task, output_dir), digest));
        if let Err(e) = result {
            warn!("Failed to write {} snapshot in {:?}: {}", task, output_dir, e);
        }
    }

    /// SHA-256 over `path:mtime_millis:size` of every input, in path order
    pub fn compute_digest(inputs: &[PathBuf]) -> String {
        let mut entries: Vec<PathBuf> = inputs.iter().map(|p| absolute(p)).collect();
        entries.sort();

        let mut hasher = Sha256::new();
        for path in &entries {
            let (modified, size) = match std::fs::metadata(path) {
                Ok(meta) => {
                    let modified = meta
                        .modified()
                        .ok()
                        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                        .map_or(0, |d| d.as_millis());
                    (modified, meta.len())
                }
                Err(_) => (0, 0),
            };
            hasher.update(format!("{}:{}:{}", path.to_string_lossy(), modified, size).as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

/// Whether the directory holds anything besides snapshot markers
fn has_outputs(dir: &Path) -> bool {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries.filter_map(|e| e.ok()).any(|entry| {
            entry.path().extension().and_then(|e| e.to_str()) != Some(SNAPSHOT_EXTENSION)
        }),
        Err(_) => false,
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}
