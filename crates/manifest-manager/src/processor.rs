//! Manifest normalization
//!
//! Repairs a hand-written manifest into something `aapt2 link` accepts.
//! Every rule only fills in what is missing, so processing an already
//! processed manifest changes nothing.

use std::path::{Path, PathBuf};

use apkforge_core::{log_line, BuildCallback, BuildResult, BuildStep, SdkConfig};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::document::{Document, Element, ANDROID_NS};
use crate::parser::ManifestParser;
use crate::writer::ManifestWriter;
use crate::ManifestError;

/// Elements that must carry an explicit `android:exported`
pub const COMPONENT_TAGS: &[&str] = &["activity", "activity-alias", "service", "receiver", "provider"];

const DEFAULT_INDENT: &str = "\n    ";

/// What the normalizer should enforce
#[derive(Debug, Clone)]
pub struct ManifestOptions {
    /// Package identifier injected when missing
    pub package_name: Option<String>,
    pub min_sdk: u32,
    pub target_sdk: u32,
    pub required_permissions: Vec<String>,
}

impl Default for ManifestOptions {
    fn default() -> Self {
        let sdk = SdkConfig::default();
        Self {
            package_name: None,
            min_sdk: sdk.min_sdk,
            target_sdk: sdk.target_sdk,
            required_permissions: apkforge_core::ManifestConfig::default().required_permissions,
        }
    }
}

/// Normalizes one manifest file
pub struct ManifestProcessor {
    input: PathBuf,
    output: PathBuf,
    options: ManifestOptions,
}

impl ManifestProcessor {
    /// Process `manifest` in place
    pub fn new(manifest: impl Into<PathBuf>, options: ManifestOptions) -> Self {
        let input = manifest.into();
        Self {
            output: input.clone(),
            input,
            options,
        }
    }

    /// Write the result somewhere other than the input file
    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = output.into();
        self
    }

    pub fn output_path(&self) -> &Path {
        &self.output
    }

    /// Read, normalize and write the manifest
    pub async fn process(&self) -> Result<PathBuf, ManifestError> {
        let mut document = if self.input.exists() {
            ManifestParser::parse_file(&self.input).await?
        } else if self.options.package_name.as_deref().map_or(false, |p| !p.trim().is_empty()) {
            warn!("Manifest {:?} not found, generating a stub", self.input);
            stub_document()
        } else {
            return Err(ManifestError::MissingManifest(self.input.clone()));
        };

        let changes = normalize(&mut document, &self.options)?;
        debug!("Applied {} manifest fixes", changes);

        ManifestWriter::write_file(&document, &self.output).await?;
        Ok(self.output.clone())
    }
}

#[async_trait]
impl BuildStep for ManifestProcessor {
    fn name(&self) -> &str {
        "ProcessManifest"
    }

    async fn execute(&mut self, callback: Option<&dyn BuildCallback>) -> BuildResult {
        log_line(callback, &format!("Processing manifest {}", self.input.display()));
        match self.process().await {
            Ok(path) => BuildResult::success(format!("Manifest processed: {}", path.display())),
            Err(e) => {
                log_line(callback, &e.to_string());
                BuildResult::failure(e.to_string())
            }
        }
    }
}

/// The smallest manifest `normalize` can complete
pub fn stub_document() -> Document {
    let mut root = Element::new("manifest");
    root.append_formatted(
        Element::new("application").with_attr("android:label", "StubApp"),
        DEFAULT_INDENT,
    );
    Document::new(root)
}

/// Apply every normalization rule; returns the number of changes made
pub fn normalize(document: &mut Document, options: &ManifestOptions) -> Result<usize, ManifestError> {
    let root = &mut document.root;
    if root.name != "manifest" {
        return Err(ManifestError::InvalidStructure(format!(
            "root element is <{}>, expected <manifest>",
            root.name
        )));
    }

    let mut changes = 0;

    if root.set_attr_if_absent("xmlns:android", ANDROID_NS) {
        changes += 1;
    }

    if let Some(package) = options.package_name.as_deref().filter(|p| !p.trim().is_empty()) {
        if root.attr("package").map_or(true, |p| p.trim().is_empty()) {
            root.set_attr("package", package);
            changes += 1;
        }
    }

    changes += ensure_single_child(root, "uses-sdk", Placement::First);
    if let Some(uses_sdk) = root.find_child_mut("uses-sdk") {
        if uses_sdk.set_attr_if_absent("android:minSdkVersion", options.min_sdk.to_string()) {
            changes += 1;
        }
        if uses_sdk.set_attr_if_absent("android:targetSdkVersion", options.target_sdk.to_string()) {
            changes += 1;
        }
    }

    changes += ensure_single_child(root, "application", Placement::Last);
    if let Some(application) = root.find_child_mut("application") {
        if application.set_attr_if_absent("android:extractNativeLibs", "true") {
            changes += 1;
        }
    }

    changes += ensure_permissions(root, &options.required_permissions);

    let mut exported = 0;
    root.walk_mut(&mut |element: &mut Element| {
        if !COMPONENT_TAGS.contains(&element.name.as_str()) {
            return;
        }
        let has_filter = element.find_child("intent-filter").is_some();
        let value = if has_filter { "true" } else { "false" };
        if element.set_attr_if_absent("android:exported", value) {
            exported += 1;
        }
    });
    changes += exported;

    Ok(changes)
}

#[derive(Clone, Copy)]
enum Placement {
    First,
    Last,
}

/// Make sure `root` has exactly one direct `name` child
fn ensure_single_child(root: &mut Element, name: &str, placement: Placement) -> usize {
    let indices = root.child_indices(name);

    if indices.is_empty() {
        info!("Adding missing <{}>", name);
        let element = Element::new(name);
        match placement {
            Placement::First => root.insert_first_formatted(element, DEFAULT_INDENT),
            Placement::Last => root.append_formatted(element, DEFAULT_INDENT),
        }
        return 1;
    }

    if indices.len() == 1 {
        return 0;
    }

    warn!("Merging {} duplicate <{}> elements", indices.len() - 1, name);
    let mut duplicates = Vec::new();
    for &index in indices[1..].iter().rev() {
        if let Some(node) = root.remove_child_at(index) {
            if let Some(element) = node.as_element() {
                duplicates.push(element.clone());
            }
        }
    }

    if let Some(first) = root.children[indices[0]].as_element_mut() {
        for duplicate in duplicates.into_iter().rev() {
            for (key, value) in duplicate.attributes {
                first.attributes.entry(key).or_insert(value);
            }
            for child in duplicate.children {
                if let Some(element) = child.as_element() {
                    first.append_formatted(element.clone(), "\n        ");
                }
            }
        }
    }

    indices.len() - 1
}

fn ensure_permissions(root: &mut Element, required: &[String]) -> usize {
    let missing: Vec<&String> = required
        .iter()
        .filter(|permission| {
            !root
                .children_named("uses-permission")
                .any(|e| e.attr("android:name") == Some(permission.as_str()))
        })
        .collect();

    for permission in missing.iter().rev() {
        info!("Adding missing permission {}", permission);
        root.insert_first_formatted(
            Element::new("uses-permission").with_attr("android:name", permission.as_str()),
            DEFAULT_INDENT,
        );
    }

    missing.len()
}
