//! Dependency Resolution
//!
//! Handles everything between a dependency declaration file and a classpath:
//! - Mixed-format declaration parsing and Gradle version catalogs
//! - POM parsing with parents, properties and dependencyManagement
//! - Remote repository download into a local Maven-layout cache
//! - Transitive, nearest-wins resolution and update checks

pub mod declaration;
pub mod metadata;
pub mod pom;
pub mod repository;
pub mod resolver;

pub use declaration::{
    parse_version_catalog, DependencyCoordinate, DependencyDeclarationParser, Exclusion,
    VERSION_CATALOG_FILE,
};
pub use metadata::{compare_versions, VersionIndex};
pub use pom::{Pom, PomDependency};
pub use repository::{LocalRepository, RepositoryClient, RepositoryLock};
pub use resolver::{DependencyResolver, Resolution, ResolvedArtifact};

use std::path::PathBuf;

/// Resolution errors
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("Configuration error: {0}")]
    Config(#[from] apkforge_core::ForgeError),
    #[error("Could not resolve {0} from any repository")]
    NotFound(String),
    #[error("Unsupported version range '{version}' for {coordinate}")]
    VersionRange { coordinate: String, version: String },
    #[error("Checksum mismatch for {0}")]
    ChecksumMismatch(String),
    #[error("Local repository {0:?} is locked by another resolution")]
    Locked(PathBuf),
}
