//! d8 dexing step

use std::path::PathBuf;

use apkforge_core::{log_line, BuildCallback, BuildResult, BuildStep, PathList};
use async_trait::async_trait;

use crate::cache::BuildCacheManager;
use crate::collect_files;
use crate::process::{run_tool, ToolCommand};

const D8_TASK: &str = "d8";

/// Main dex file every APK needs
pub const CLASSES_DEX: &str = "classes.dex";

/// Convert compiled classes and library jars to dex
pub struct D8Compile {
    d8: PathBuf,
    java: PathBuf,
    android_jar: PathBuf,
    classes_dir: PathBuf,
    dex_dir: PathBuf,
    classpath: PathList,
    min_api: u32,
}

impl D8Compile {
    pub fn new(
        d8: impl Into<PathBuf>,
        java: impl Into<PathBuf>,
        android_jar: impl Into<PathBuf>,
        classes_dir: impl Into<PathBuf>,
        dex_dir: impl Into<PathBuf>,
        classpath: PathList,
        min_api: u32,
    ) -> Self {
        Self {
            d8: d8.into(),
            java: java.into(),
            android_jar: android_jar.into(),
            classes_dir: classes_dir.into(),
            dex_dir: dex_dir.into(),
            classpath,
            min_api,
        }
    }
}

#[async_trait]
impl BuildStep for D8Compile {
    fn name(&self) -> &str {
        "D8Compile"
    }

    async fn execute(&mut self, callback: Option<&dyn BuildCallback>) -> BuildResult {
        let class_files = collect_files(&self.classes_dir, &["class"]);
        let jars = self.classpath.snapshot();
        if class_files.is_empty() && jars.is_empty() {
            return BuildResult::failure(format!("No class files found in {}", self.classes_dir.display()));
        }

        let mut inputs = class_files.clone();
        inputs.extend(jars.iter().cloned());
        inputs.push(self.android_jar.clone());
        if BuildCacheManager::should_skip(D8_TASK, &inputs, &self.dex_dir, Some(CLASSES_DEX)) {
            log_line(callback, "Skipping D8Compile: Up-to-date.");
            return BuildResult::success("Up-to-date");
        }

        if let Err(e) = tokio::fs::create_dir_all(&self.dex_dir).await {
            return BuildResult::failure(format!("Failed to create {}: {}", self.dex_dir.display(), e));
        }

        // Library jars are program inputs: their classes ship in the APK
        let command = ToolCommand::tool(&self.d8, &self.java)
            .arg("--min-api")
            .arg(self.min_api.to_string())
            .arg("--output")
            .arg(&self.dex_dir)
            .arg("--lib")
            .arg(&self.android_jar)
            .args(&class_files)
            .args(&jars);

        log_line(
            callback,
            &format!("Dexing {} classes and {} jars", class_files.len(), jars.len()),
        );
        let result = run_tool(command, callback, "D8 compilation successful").await;
        if result.success {
            BuildCacheManager::update_snapshot(D8_TASK, &inputs, &self.dex_dir);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    #[cfg(unix)]
    fn fake_d8(dir: &Path, writes_dex: bool) -> PathBuf {
        let script = dir.join("d8.sh");
        let body = format!(
            "echo \"$@\" >> {}\nwhile [ $# -gt 0 ]; do if [ \"$1\" = \"--output\" ]; then shift; out=\"$1\"; fi; shift; done\n{}\n",
            dir.join("d8.args").display(),
            if writes_dex { "echo dex > \"$out/classes.dex\"" } else { "true" }
        );
        std::fs::write(&script, body).unwrap();
        script
    }

    fn classes(dir: &Path) -> PathBuf {
        let classes = dir.join("classes/com/example");
        std::fs::create_dir_all(&classes).unwrap();
        std::fs::write(classes.join("Main.class"), "cafebabe").unwrap();
        dir.join("classes")
    }

    #[tokio::test]
    async fn test_nothing_to_dex_fails() {
        let dir = TempDir::new().unwrap();
        let mut step = D8Compile::new(
            "d8",
            "java",
            "android.jar",
            dir.path().join("classes"),
            dir.path().join("dex"),
            PathList::new(),
            24,
        );

        let result = step.execute(None).await;
        assert!(!result.success);
        assert!(result.output.starts_with("No class files"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_line_and_cache() {
        let dir = TempDir::new().unwrap();
        let classes = classes(dir.path());
        let jars = PathList::new();
        jars.push("/repo/okio.jar");
        let d8 = fake_d8(dir.path(), true);
        let dex = dir.path().join("dex");

        let mut step = D8Compile::new(&d8, "java", "/sdk/android.jar", &classes, &dex, jars, 26);

        let first = step.execute(None).await;
        assert!(first.success, "{}", first.output);
        assert!(dex.join(CLASSES_DEX).exists());

        let args = std::fs::read_to_string(dir.path().join("d8.args")).unwrap();
        assert!(args.starts_with(&format!("--min-api 26 --output {} --lib /sdk/android.jar ", dex.display())));
        assert!(args.contains("Main.class /repo/okio.jar"));

        assert_eq!(step.execute(None).await, BuildResult::success("Up-to-date"));

        std::fs::remove_file(dex.join(CLASSES_DEX)).unwrap();
        let third = step.execute(None).await;
        assert_eq!(third.output, "D8 compilation successful");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_dex_output_is_never_cached() {
        let dir = TempDir::new().unwrap();
        let classes = classes(dir.path());
        let d8 = fake_d8(dir.path(), false);
        let dex = dir.path().join("dex");

        let mut step = D8Compile::new(&d8, "java", "android.jar", &classes, &dex, PathList::new(), 24);

        assert!(step.execute(None).await.success);
        assert!(step.execute(None).await.success);
        let runs = std::fs::read_to_string(dir.path().join("d8.args")).unwrap();
        assert_eq!(runs.lines().count(), 2);
    }
}
