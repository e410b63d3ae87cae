//! Android Manifest Manager
//!
//! Parses AndroidManifest.xml into an editable tree, normalizes it for the
//! build and writes it back without disturbing the parts it did not touch.

pub mod document;
pub mod parser;
pub mod processor;
pub mod writer;

pub use document::{Declaration, Document, Element, Node, ANDROID_NS};
pub use parser::ManifestParser;
pub use processor::{normalize, stub_document, ManifestOptions, ManifestProcessor};
pub use writer::ManifestWriter;

use std::path::PathBuf;

/// Manifest errors
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("Manifest not found: {0:?} and no package name was supplied")]
    MissingManifest(PathBuf),
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("Invalid manifest structure: {0}")]
    InvalidStructure(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("UTF-8 error: {0}")]
    FromUtf8(#[from] std::string::FromUtf8Error),
}
