//! apkforge Core - Step contract, orchestrator and shared types
//!
//! This crate provides the pieces every build step agrees on: the
//! [`BuildStep`] contract and its progress callback, the fail-fast
//! [`BuildOrchestrator`], the late-bound classpath handles shared between
//! steps, and the explicit [`PipelineConfig`].

pub mod classpath;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod step;

pub use classpath::{PathList, SharedArtifacts};
pub use config::{
    ManifestConfig, PipelineConfig, ResolverConfig, SdkConfig, SigningConfig, ToolchainConfig,
};
pub use error::{ForgeError, Result};
pub use orchestrator::BuildOrchestrator;
pub use step::{log_line, BuildCallback, BuildResult, BuildStep, CollectingCallback};

/// apkforge version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "apkforge";
