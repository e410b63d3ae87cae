//! CLI commands for apkforge
//!
//! Each command loads the project configuration, drives one part of the
//! pipeline and reports to the terminal.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use apkforge_build_engine::{standard, ProjectLayout};
use apkforge_core::{BuildCallback, PipelineConfig, SharedArtifacts, ToolchainConfig};
use apkforge_dependency_resolver::{DependencyCoordinate, DependencyResolver, Resolution};
use tracing::{info, warn};

/// Prints streamed pipeline output to the terminal
#[derive(Debug, Default)]
pub struct ConsoleCallback;

impl BuildCallback for ConsoleCallback {
    fn on_log(&self, line: &str) {
        println!("{}", line);
    }

    fn on_success(&self, artifact: &str) {
        println!("BUILD SUCCESSFUL: {}", artifact);
    }

    fn on_failure(&self, message: &str) {
        eprintln!("BUILD FAILED: {}", message);
    }
}

/// Load the project configuration, detecting the toolchain from the SDK
/// when the configured `android.jar` does not exist
pub async fn load_config(project_path: &Path) -> Result<PipelineConfig> {
    let mut config = PipelineConfig::load(project_path)
        .await
        .with_context(|| format!("Failed to load configuration for {}", project_path.display()))?;

    if !config.toolchain.android_jar.is_file() {
        match config.get_sdk_path() {
            Some(sdk) => {
                info!("Detecting toolchain in {:?}", sdk);
                config.toolchain = ToolchainConfig::detect(&sdk, config.sdk.target_sdk)
                    .with_context(|| format!("Failed to detect the toolchain in {}", sdk.display()))?;
            }
            None => warn!("No Android SDK found, using configured tool paths as-is"),
        }
    }

    Ok(config)
}

/// Build command options
pub struct BuildCommand {
    pub project_path: PathBuf,
    pub module: String,
}

impl BuildCommand {
    /// Run the standard pipeline; returns the final APK path
    pub async fn execute(&self) -> Result<PathBuf> {
        info!("Building project: {:?}", self.project_path);

        let config = load_config(&self.project_path).await?;
        let layout = ProjectLayout::new(&self.project_path).with_module(&self.module);
        let mut pipeline = standard(&config, &layout).context("Failed to assemble the build pipeline")?;

        let result = pipeline.execute(Some(&ConsoleCallback)).await;
        if !result.success {
            bail!("Build failed:\n{}", result.output);
        }

        info!("Build successful: {:?}", layout.output_apk());
        Ok(layout.output_apk())
    }
}

/// Resolve command options
pub struct ResolveCommand {
    pub project_path: PathBuf,
    pub json: bool,
}

impl ResolveCommand {
    /// Resolve the project's declarations and print the result
    pub async fn execute(&self) -> Result<Resolution> {
        let config = PipelineConfig::load(&self.project_path).await?;
        let layout = ProjectLayout::new(&self.project_path);
        let resolver = DependencyResolver::new(layout.dependency_file(), &config.resolver, SharedArtifacts::new())?;

        let resolution = resolver
            .resolve_declarations(Some(&ConsoleCallback))
            .await
            .with_context(|| format!("Failed to resolve {}", resolver.declarations().display()))?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&resolution_json(&resolution))?);
        } else {
            println!("{}", resolution.classpath_string());
        }
        Ok(resolution)
    }
}

/// Resolved artifacts as a JSON array of `{coordinate, extension, file}`
pub fn resolution_json(resolution: &Resolution) -> serde_json::Value {
    resolution
        .artifacts
        .iter()
        .map(|artifact| {
            serde_json::json!({
                "coordinate": artifact.coordinate.canonical(),
                "extension": artifact.extension(),
                "file": artifact.file,
            })
        })
        .collect()
}

/// Update check options
pub struct CheckUpdateCommand {
    pub project_path: PathBuf,
    pub coordinate: String,
}

impl CheckUpdateCommand {
    /// Returns the newer version, if the repositories know one
    pub async fn execute(&self) -> Result<Option<String>> {
        let coordinate = DependencyCoordinate::parse(&self.coordinate)
            .ok_or_else(|| anyhow!("Invalid coordinate '{}', expected group:artifact:version", self.coordinate))?;

        let config = PipelineConfig::load(&self.project_path).await?;
        let layout = ProjectLayout::new(&self.project_path);
        let resolver = DependencyResolver::new(layout.dependency_file(), &config.resolver, SharedArtifacts::new())?;

        let newer = resolver.check_for_update(&coordinate).await;
        match &newer {
            Some(version) => println!("{}:{} {} -> {}", coordinate.group, coordinate.artifact, coordinate.version, version),
            None => println!("No update for {}", coordinate),
        }
        Ok(newer)
    }
}
