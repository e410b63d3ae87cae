//! aapt2 resource steps

use std::path::{Path, PathBuf};

use apkforge_core::{log_line, BuildCallback, BuildResult, BuildStep, PathList};
use async_trait::async_trait;
use tracing::debug;

use crate::cache::BuildCacheManager;
use crate::collect_files;
use crate::process::{run_tool, ToolCommand};

const COMPILE_TASK: &str = "aapt2-compile";

/// `aapt2 compile` over the project's `res/` tree
pub struct Aapt2Compile {
    aapt2: PathBuf,
    java: PathBuf,
    res_dir: PathBuf,
    compiled_dir: PathBuf,
}

impl Aapt2Compile {
    pub fn new(
        aapt2: impl Into<PathBuf>,
        java: impl Into<PathBuf>,
        res_dir: impl Into<PathBuf>,
        compiled_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            aapt2: aapt2.into(),
            java: java.into(),
            res_dir: res_dir.into(),
            compiled_dir: compiled_dir.into(),
        }
    }
}

#[async_trait]
impl BuildStep for Aapt2Compile {
    fn name(&self) -> &str {
        "Aapt2Compile"
    }

    async fn execute(&mut self, callback: Option<&dyn BuildCallback>) -> BuildResult {
        let inputs = collect_files(&self.res_dir, &[]);
        if inputs.is_empty() {
            if let Err(e) = remove_flat_files(&self.compiled_dir).await {
                return BuildResult::failure(format!("Failed to clean {}: {}", self.compiled_dir.display(), e));
            }
            return BuildResult::success(format!("No resources in {}", self.res_dir.display()));
        }

        if BuildCacheManager::should_skip(COMPILE_TASK, &inputs, &self.compiled_dir, None) {
            log_line(callback, "Skipping Aapt2Compile: Up-to-date.");
            return BuildResult::success("Up-to-date");
        }

        if let Err(e) = tokio::fs::create_dir_all(&self.compiled_dir).await {
            return BuildResult::failure(format!("Failed to create {}: {}", self.compiled_dir.display(), e));
        }
        // Deleted resources must not outlive their `.flat`
        if let Err(e) = remove_flat_files(&self.compiled_dir).await {
            return BuildResult::failure(format!("Failed to clean {}: {}", self.compiled_dir.display(), e));
        }

        let command = ToolCommand::tool(&self.aapt2, &self.java)
            .arg("compile")
            .arg("--dir")
            .arg(&self.res_dir)
            .arg("-o")
            .arg(&self.compiled_dir);

        let result = run_tool(command, callback, "Resources compiled").await;
        if result.success {
            BuildCacheManager::update_snapshot(COMPILE_TASK, &inputs, &self.compiled_dir);
        }
        result
    }
}

/// Delete every `.flat` under `dir`; snapshots are left alone
async fn remove_flat_files(dir: &Path) -> std::io::Result<usize> {
    let stale = collect_files(dir, &["flat"]);
    for file in &stale {
        tokio::fs::remove_file(file).await?;
    }
    if !stale.is_empty() {
        debug!("Removed {} stale .flat files from {:?}", stale.len(), dir);
    }
    Ok(stale.len())
}

/// `aapt2 link` of the app's and libraries' compiled resources
pub struct Aapt2Link {
    aapt2: PathBuf,
    java: PathBuf,
    android_jar: PathBuf,
    manifest: PathBuf,
    compiled_dir: PathBuf,
    library_resources: PathList,
    output_apk: PathBuf,
    gen_dir: PathBuf,
}

impl Aapt2Link {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        aapt2: impl Into<PathBuf>,
        java: impl Into<PathBuf>,
        android_jar: impl Into<PathBuf>,
        manifest: impl Into<PathBuf>,
        compiled_dir: impl Into<PathBuf>,
        library_resources: PathList,
        output_apk: impl Into<PathBuf>,
        gen_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            aapt2: aapt2.into(),
            java: java.into(),
            android_jar: android_jar.into(),
            manifest: manifest.into(),
            compiled_dir: compiled_dir.into(),
            library_resources,
            output_apk: output_apk.into(),
            gen_dir: gen_dir.into(),
        }
    }

    /// App `.flat`/`.flata` files followed by library archives
    fn inputs(&self) -> Vec<PathBuf> {
        let mut inputs = collect_files(&self.compiled_dir, &["flat", "flata"]);
        for archive in self.library_resources.snapshot() {
            if !inputs.contains(&archive) {
                inputs.push(archive);
            }
        }
        inputs
    }
}

#[async_trait]
impl BuildStep for Aapt2Link {
    fn name(&self) -> &str {
        "Aapt2Link"
    }

    async fn execute(&mut self, callback: Option<&dyn BuildCallback>) -> BuildResult {
        let inputs = self.inputs();
        if inputs.is_empty() {
            return BuildResult::failure(format!(
                "Aapt2Link: No .flat files found in {}",
                self.compiled_dir.display()
            ));
        }
        debug!("Linking {} compiled resource files", inputs.len());

        if let Some(parent) = self.output_apk.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return BuildResult::failure(format!("Failed to create {}: {}", parent.display(), e));
            }
        }
        if let Err(e) = tokio::fs::create_dir_all(&self.gen_dir).await {
            return BuildResult::failure(format!("Failed to create {}: {}", self.gen_dir.display(), e));
        }

        let command = ToolCommand::tool(&self.aapt2, &self.java)
            .arg("link")
            .arg("-o")
            .arg(&self.output_apk)
            .arg("-I")
            .arg(&self.android_jar)
            .arg("--manifest")
            .arg(&self.manifest)
            .arg("--java")
            .arg(&self.gen_dir)
            .arg("--auto-add-overlay")
            .args(&inputs);

        run_tool(command, callback, "Resources linked").await
    }
}
