//! Error types for the pipeline core
//!
//! Errors raised while loading configuration or detecting the toolchain.

use thiserror::Error;

/// Main error type for the pipeline core
#[derive(Error, Debug)]
pub enum ForgeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Toolchain error: {0}")]
    Toolchain(String),
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, ForgeError>;
