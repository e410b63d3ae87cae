//! javac and kotlinc steps
//!
//! Both compilers write into the same classes directory. Kotlin runs first
//! and sees the Java sources; javac then sees the Kotlin classes on its
//! classpath.

use std::path::{Path, PathBuf};

use apkforge_core::{classpath::join_paths, log_line, BuildCallback, BuildResult, BuildStep, PathList};
use async_trait::async_trait;

use crate::cache::BuildCacheManager;
use crate::collect_files;
use crate::process::{run_tool, ToolCommand};

const JAVAC_TASK: &str = "javac";
const KOTLINC_TASK: &str = "kotlinc";

fn sources(roots: &[PathBuf], extension: &str) -> Vec<PathBuf> {
    roots.iter().flat_map(|root| collect_files(root, &[extension])).collect()
}

/// Cache inputs: sources, every classpath entry and the platform jar
fn fingerprint_inputs(sources: &[PathBuf], classpath: &[PathBuf], android_jar: &Path) -> Vec<PathBuf> {
    let mut inputs = sources.to_vec();
    inputs.extend(classpath.iter().cloned());
    inputs.push(android_jar.to_path_buf());
    inputs
}

/// Compile `.java` sources, including generated `R.java`
pub struct JavaCompile {
    javac: PathBuf,
    java: PathBuf,
    android_jar: PathBuf,
    source_dirs: Vec<PathBuf>,
    classes_dir: PathBuf,
    classpath: PathList,
}

impl JavaCompile {
    pub fn new(
        javac: impl Into<PathBuf>,
        java: impl Into<PathBuf>,
        android_jar: impl Into<PathBuf>,
        source_dirs: Vec<PathBuf>,
        classes_dir: impl Into<PathBuf>,
        classpath: PathList,
    ) -> Self {
        Self {
            javac: javac.into(),
            java: java.into(),
            android_jar: android_jar.into(),
            source_dirs,
            classes_dir: classes_dir.into(),
            classpath,
        }
    }
}

#[async_trait]
impl BuildStep for JavaCompile {
    fn name(&self) -> &str {
        "JavaCompile"
    }

    async fn execute(&mut self, callback: Option<&dyn BuildCallback>) -> BuildResult {
        let java_files = sources(&self.source_dirs, "java");
        if java_files.is_empty() {
            log_line(callback, "No Java files found. Skipping compilation.");
            return BuildResult::success("No sources");
        }

        let libraries = self.classpath.snapshot();
        let inputs = fingerprint_inputs(&java_files, &libraries, &self.android_jar);
        if BuildCacheManager::should_skip(JAVAC_TASK, &inputs, &self.classes_dir, None) {
            log_line(callback, "Skipping JavaCompile: Up-to-date.");
            return BuildResult::success("Up-to-date");
        }

        if let Err(e) = tokio::fs::create_dir_all(&self.classes_dir).await {
            return BuildResult::failure(format!("Failed to create {}: {}", self.classes_dir.display(), e));
        }

        let mut compile_path = vec![self.android_jar.clone()];
        compile_path.extend(libraries);
        compile_path.push(self.classes_dir.clone());

        let command = ToolCommand::tool(&self.javac, &self.java)
            .args(["-proc:none", "-source", "1.8", "-target", "1.8"])
            .arg("-d")
            .arg(&self.classes_dir)
            .arg("-classpath")
            .arg(join_paths(&compile_path))
            .args(&java_files);

        log_line(callback, &format!("Compiling {} Java files", java_files.len()));
        let result = run_tool(command, callback, "Java compilation successful").await;
        if result.success {
            BuildCacheManager::update_snapshot(JAVAC_TASK, &inputs, &self.classes_dir);
        }
        result
    }
}

/// Compile `.kt` sources with the command-line compiler
pub struct KotlinCompile {
    kotlinc: PathBuf,
    java: PathBuf,
    android_jar: PathBuf,
    source_dirs: Vec<PathBuf>,
    classes_dir: PathBuf,
    classpath: PathList,
}

impl KotlinCompile {
    pub fn new(
        kotlinc: impl Into<PathBuf>,
        java: impl Into<PathBuf>,
        android_jar: impl Into<PathBuf>,
        source_dirs: Vec<PathBuf>,
        classes_dir: impl Into<PathBuf>,
        classpath: PathList,
    ) -> Self {
        Self {
            kotlinc: kotlinc.into(),
            java: java.into(),
            android_jar: android_jar.into(),
            source_dirs,
            classes_dir: classes_dir.into(),
            classpath,
        }
    }
}

#[async_trait]
impl BuildStep for KotlinCompile {
    fn name(&self) -> &str {
        "KotlinCompile"
    }

    async fn execute(&mut self, callback: Option<&dyn BuildCallback>) -> BuildResult {
        let kotlin_files = sources(&self.source_dirs, "kt");
        if kotlin_files.is_empty() {
            return BuildResult::success("No Kotlin sources");
        }
        // Java sources are passed along so Kotlin code can reference them
        let java_files = sources(&self.source_dirs, "java");

        let libraries = self.classpath.snapshot();
        let mut all_sources = kotlin_files.clone();
        all_sources.extend(java_files.iter().cloned());
        let inputs = fingerprint_inputs(&all_sources, &libraries, &self.android_jar);
        if BuildCacheManager::should_skip(KOTLINC_TASK, &inputs, &self.classes_dir, None) {
            log_line(callback, "Skipping KotlinCompile: Up-to-date.");
            return BuildResult::success("Up-to-date");
        }

        if let Err(e) = tokio::fs::create_dir_all(&self.classes_dir).await {
            return BuildResult::failure(format!("Failed to create {}: {}", self.classes_dir.display(), e));
        }

        let mut compile_path = vec![self.android_jar.clone()];
        compile_path.extend(libraries);

        let command = ToolCommand::tool(&self.kotlinc, &self.java)
            .arg("-d")
            .arg(&self.classes_dir)
            .args(["-no-reflect", "-no-stdlib"])
            .arg("-cp")
            .arg(join_paths(&compile_path))
            .args(&all_sources);

        log_line(callback, &format!("Compiling {} Kotlin files", kotlin_files.len()));
        let result = run_tool(command, callback, "Kotlin compilation successful").await;
        if result.success {
            BuildCacheManager::update_snapshot(KOTLINC_TASK, &inputs, &self.classes_dir);
        }
        result
    }
}
