//! apkforge - on-device Android build pipeline
//!
//! Turns an Android project (manifest, resources, Java/Kotlin sources and
//! Maven dependency declarations) into a signed APK by driving the SDK
//! tools directly.
//!
//! ## Architecture
//!
//! - `apkforge-core`: step contract, orchestrator, shared classpath and configuration
//! - `apkforge-dependency-resolver`: declaration parsing and transitive Maven resolution
//! - `apkforge-manifest-manager`: AndroidManifest.xml merging and validation
//! - `apkforge-build-engine`: tool wrappers, AAR processing, APK assembly and signing

#![warn(clippy::all)]

pub mod commands;

// Re-export main components for library usage
pub use apkforge_build_engine as build;
pub use apkforge_core as core;
pub use apkforge_dependency_resolver as resolver;
pub use apkforge_manifest_manager as manifest;

/// Prelude module for convenient imports
pub mod prelude {
    pub use apkforge_build_engine::{standard, ProjectLayout};
    pub use apkforge_core::{
        BuildCallback, BuildOrchestrator, BuildResult, BuildStep, PipelineConfig, SharedArtifacts,
    };
    pub use apkforge_dependency_resolver::{DependencyCoordinate, DependencyResolver};
    pub use apkforge_manifest_manager::{ManifestOptions, ManifestProcessor};
}
