//! Android library (AAR) processing
//!
//! Each resolved AAR is unpacked once into its own directory. Its jars go on
//! the shared classpath and its resources are compiled into a `.flata`
//! archive for the link step.

use std::fs::File;
use std::path::{Component, Path, PathBuf};

use apkforge_core::{log_line, BuildCallback, BuildResult, BuildStep, SharedArtifacts};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::process::ToolCommand;
use crate::BuildError;

/// Unpacks AARs and collects what the rest of the build needs from them
pub struct ProcessAars {
    artifacts: SharedArtifacts,
    exploded_dir: PathBuf,
    compiled_dir: PathBuf,
    aapt2: PathBuf,
    java: PathBuf,
}

impl ProcessAars {
    pub fn new(
        artifacts: SharedArtifacts,
        exploded_dir: impl Into<PathBuf>,
        compiled_dir: impl Into<PathBuf>,
        aapt2: impl Into<PathBuf>,
        java: impl Into<PathBuf>,
    ) -> Self {
        Self {
            artifacts,
            exploded_dir: exploded_dir.into(),
            compiled_dir: compiled_dir.into(),
            aapt2: aapt2.into(),
            java: java.into(),
        }
    }

    async fn process(&self, aars: &[PathBuf], callback: Option<&dyn BuildCallback>) -> Result<String, String> {
        tokio::fs::create_dir_all(&self.exploded_dir)
            .await
            .map_err(|e| format!("Failed to create {}: {}", self.exploded_dir.display(), e))?;
        tokio::fs::create_dir_all(&self.compiled_dir)
            .await
            .map_err(|e| format!("Failed to create {}: {}", self.compiled_dir.display(), e))?;

        let mut jars = Vec::new();
        let mut compiled = Vec::new();

        for aar in aars {
            let name = aar.file_name().map_or_else(String::new, |n| n.to_string_lossy().into_owned());
            let unique = unique_name(aar);
            let dest = self.exploded_dir.join(&unique);

            let fresh = !dest.exists();
            if fresh {
                log_line(callback, &format!("Extracting {}", name));
                extract_aar(aar, &dest)
                    .await
                    .map_err(|e| format!("Failed to extract {}: {}", name, e))?;
            } else {
                debug!("{} already extracted to {:?}", name, dest);
            }

            jars.extend(library_jars(&dest));

            let res = dest.join("res");
            if has_entries(&res) {
                let flata = self.compiled_dir.join(format!("{}.flata", unique));
                if fresh || !flata.exists() {
                    let output = ToolCommand::tool(&self.aapt2, &self.java)
                        .arg("compile")
                        .arg("--dir")
                        .arg(&res)
                        .arg("-o")
                        .arg(&flata)
                        .run(callback)
                        .await
                        .map_err(|e| format!("Failed to compile resources for {}: {}", name, e))?;
                    if !output.success() {
                        return Err(format!("Failed to compile resources for {}: {}", name, output.output));
                    }
                }
                compiled.push(flata);
            }
        }

        let summary = format!(
            "Processed {} AARs. Compiled {} resource packages.",
            aars.len(),
            compiled.len()
        );
        info!("{} ({} jars)", summary, jars.len());

        self.artifacts.classpath.extend(jars);
        self.artifacts.compiled_resources.extend(compiled);
        Ok(summary)
    }
}

#[async_trait]
impl BuildStep for ProcessAars {
    fn name(&self) -> &str {
        "ProcessAars"
    }

    async fn execute(&mut self, callback: Option<&dyn BuildCallback>) -> BuildResult {
        let aars: Vec<PathBuf> = self
            .artifacts
            .resolved
            .snapshot()
            .into_iter()
            .filter(|p| p.is_file() && p.extension().map_or(false, |e| e == "aar"))
            .collect();

        if aars.is_empty() {
            return BuildResult::success("No AARs found to process.");
        }

        log_line(callback, &format!("Processing {} AARs...", aars.len()));
        match self.process(&aars, callback).await {
            Ok(summary) => BuildResult::success(summary),
            Err(message) => {
                log_line(callback, &message);
                BuildResult::failure(message)
            }
        }
    }
}

/// `<stem>_<hash of the absolute path>`, stable across runs
pub fn unique_name(aar: &Path) -> String {
    let absolute = if aar.is_absolute() {
        aar.to_path_buf()
    } else {
        std::env::current_dir().map(|d| d.join(aar)).unwrap_or_else(|_| aar.to_path_buf())
    };
    let digest = Sha256::digest(absolute.to_string_lossy().as_bytes());
    let stem = aar.file_stem().map_or_else(String::new, |s| s.to_string_lossy().into_owned());
    format!("{}_{}", stem, &hex::encode(digest)[..16])
}

/// Extract `archive` into `dest`.
///
/// Entries are written to a sibling staging directory that only becomes
/// `dest` once every entry is out, so an interrupted or rejected
/// extraction never leaves a directory a later run would trust.
pub async fn extract_aar(archive: &Path, dest: &Path) -> Result<(), BuildError> {
    info!("Extracting {:?} to {:?}", archive, dest);

    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();

    tokio::task::spawn_blocking(move || -> Result<(), BuildError> {
        let staging = staging_dir(&dest);
        if staging.exists() {
            std::fs::remove_dir_all(&staging)?;
        }

        match unzip_into(&archive, &staging) {
            Ok(()) => {
                std::fs::rename(&staging, &dest)?;
                Ok(())
            }
            Err(e) => {
                if let Err(cleanup) = std::fs::remove_dir_all(&staging) {
                    if staging.exists() {
                        warn!("Failed to remove {:?}: {}", staging, cleanup);
                    }
                }
                Err(e)
            }
        }
    })
    .await?
}

fn staging_dir(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".extracting");
    dest.with_file_name(name)
}

fn unzip_into(archive: &Path, target_dir: &Path) -> Result<(), BuildError> {
    let mut zip = ZipArchive::new(File::open(archive)?)?;
    std::fs::create_dir_all(target_dir)?;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let outpath = safe_join(target_dir, entry.name())?;

        if entry.is_dir() {
            std::fs::create_dir_all(&outpath)?;
        } else {
            if let Some(parent) = outpath.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut outfile = File::create(&outpath)?;
            std::io::copy(&mut entry, &mut outfile)?;
        }
    }

    Ok(())
}

/// Resolve an entry name under `root`, refusing anything that would land
/// outside of it
pub fn safe_join(root: &Path, entry_name: &str) -> Result<PathBuf, BuildError> {
    let relative = Path::new(entry_name);
    let escapes = relative
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
    if escapes || entry_name.contains('\\') {
        return Err(BuildError::ZipSlip(entry_name.to_string()));
    }

    let joined = root.join(relative);
    if !joined.starts_with(root) {
        return Err(BuildError::ZipSlip(entry_name.to_string()));
    }
    Ok(joined)
}

/// `classes.jar` plus every jar under `libs/`
fn library_jars(exploded: &Path) -> Vec<PathBuf> {
    let mut jars = Vec::new();

    let classes = exploded.join("classes.jar");
    if classes.is_file() {
        jars.push(classes);
    }

    let pattern = format!(
        "{}/libs/**/*.jar",
        glob::Pattern::escape(&exploded.to_string_lossy())
    );
    match glob::glob(&pattern) {
        Ok(paths) => jars.extend(paths.filter_map(|p| p.ok()).filter(|p| p.is_file())),
        Err(e) => warn!("Bad library jar pattern {}: {}", pattern, e),
    }

    jars
}

fn has_entries(dir: &Path) -> bool {
    std::fs::read_dir(dir).map_or(false, |mut entries| entries.next().is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::FileOptions;
    use zip::ZipWriter;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let mut zip = ZipWriter::new(File::create(path).unwrap());
        for (name, data) in entries {
            zip.start_file(*name, FileOptions::default()).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_safe_join_rejects_escapes() {
        let root = Path::new("/build/exploded/lib");

        assert_eq!(safe_join(root, "res/values/values.xml").unwrap(), root.join("res/values/values.xml"));
        assert!(matches!(safe_join(root, "../../evil"), Err(BuildError::ZipSlip(_))));
        assert!(matches!(safe_join(root, "res/../../evil"), Err(BuildError::ZipSlip(_))));
        assert!(matches!(safe_join(root, "/etc/passwd"), Err(BuildError::ZipSlip(_))));
        assert!(matches!(safe_join(root, "..\\evil"), Err(BuildError::ZipSlip(_))));
    }

    #[test]
    fn test_unique_name_is_stable_and_path_dependent() {
        let a = unique_name(Path::new("/repo/a/lib-1.0.aar"));
        let b = unique_name(Path::new("/repo/b/lib-1.0.aar"));

        assert!(a.starts_with("lib-1.0_"));
        assert_eq!(a, unique_name(Path::new("/repo/a/lib-1.0.aar")));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_zip_slip_entry_rejected_and_nothing_written() {
        let dir = TempDir::new().unwrap();
        let aar = dir.path().join("evil.aar");
        write_zip(&aar, &[("classes.jar", b"jar"), ("../../evil", b"owned")]);

        let dest = dir.path().join("out").join("exploded").join("evil");
        let err = extract_aar(&aar, &dest).await.unwrap_err();

        assert!(matches!(err, BuildError::ZipSlip(_)));
        assert!(err.to_string().contains("Zip Slip"));
        assert!(!dest.exists());
        assert!(!staging_dir(&dest).exists());
        assert!(!dir.path().join("evil").exists());
        assert!(!dir.path().join("out").join("evil").exists());
    }

    #[tokio::test]
    async fn test_extract_and_collect_jars() {
        let dir = TempDir::new().unwrap();
        let aar = dir.path().join("lib.aar");
        write_zip(
            &aar,
            &[
                ("AndroidManifest.xml", b"<manifest/>"),
                ("classes.jar", b"jar"),
                ("libs/extra.jar", b"jar"),
                ("libs/nested/deep.jar", b"jar"),
                ("libs/readme.txt", b"text"),
            ],
        );

        let dest = dir.path().join("lib");
        extract_aar(&aar, &dest).await.unwrap();

        let jars = library_jars(&dest);
        assert_eq!(
            jars,
            vec![
                dest.join("classes.jar"),
                dest.join("libs/extra.jar"),
                dest.join("libs/nested/deep.jar"),
            ]
        );
    }

    #[tokio::test]
    async fn test_step_without_aars_succeeds() {
        let dir = TempDir::new().unwrap();
        let artifacts = SharedArtifacts::new();
        artifacts.resolved.push(dir.path().join("plain.jar"));

        let mut step = ProcessAars::new(artifacts, dir.path().join("x"), dir.path().join("y"), "aapt2", "java");
        let result = step.execute(None).await;

        assert!(result.success);
        assert_eq!(result.output, "No AARs found to process.");
    }

    #[tokio::test]
    async fn test_step_reports_zip_slip_as_failure() {
        let dir = TempDir::new().unwrap();
        let aar = dir.path().join("evil.aar");
        write_zip(&aar, &[("../evil.txt", b"owned")]);

        let artifacts = SharedArtifacts::new();
        artifacts.resolved.push(&aar);
        let mut step = ProcessAars::new(
            artifacts.clone(),
            dir.path().join("build/exploded_aars"),
            dir.path().join("build/compiled_aars"),
            "aapt2",
            "java",
        );
        let result = step.execute(None).await;

        assert!(!result.success);
        assert!(result.output.contains("Zip Slip vulnerability detected"));
        assert!(artifacts.classpath.is_empty());
        assert!(!dir.path().join("build/exploded_aars/evil.txt").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_step_collects_jars_and_compiles_resources() {
        let dir = TempDir::new().unwrap();
        let aar = dir.path().join("widgets-1.0.aar");
        write_zip(
            &aar,
            &[
                ("classes.jar", b"jar"),
                ("libs/helper.jar", b"jar"),
                ("res/values/values.xml", b"<resources/>"),
            ],
        );

        let aapt2 = dir.path().join("aapt2.sh");
        std::fs::write(
            &aapt2,
            "while [ $# -gt 0 ]; do if [ \"$1\" = \"-o\" ]; then shift; out=\"$1\"; fi; shift; done\necho compiled > \"$out\"\necho compiled resources\n",
        )
        .unwrap();

        let artifacts = SharedArtifacts::new();
        artifacts.resolved.push(&aar);
        let exploded = dir.path().join("build/exploded_aars");
        let compiled = dir.path().join("build/compiled_aars");
        let mut step = ProcessAars::new(artifacts.clone(), &exploded, &compiled, &aapt2, "java");

        let result = step.execute(None).await;
        assert!(result.success, "{}", result.output);
        assert_eq!(result.output, "Processed 1 AARs. Compiled 1 resource packages.");

        let unique = unique_name(&aar);
        assert_eq!(
            artifacts.classpath.snapshot(),
            vec![
                exploded.join(&unique).join("classes.jar"),
                exploded.join(&unique).join("libs/helper.jar"),
            ]
        );
        let flata = compiled.join(format!("{}.flata", unique));
        assert_eq!(artifacts.compiled_resources.snapshot(), vec![flata.clone()]);
        assert!(flata.exists());

        // Second run reuses the extraction and the compiled archive
        std::fs::remove_file(&aapt2).unwrap();
        let result = step.execute(None).await;
        assert!(result.success, "{}", result.output);
        assert_eq!(artifacts.classpath.len(), 2);
    }
}
