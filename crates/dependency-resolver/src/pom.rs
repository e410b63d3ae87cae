//! POM documents
//!
//! Only the parts of a POM that matter for resolving a runtime classpath
//! are read: coordinates, parent, packaging, properties, dependencies and
//! dependencyManagement.

use std::collections::HashMap;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::declaration::{DependencyCoordinate, Exclusion};
use crate::ResolveError;

/// Scopes that never reach the runtime classpath
const SKIPPED_SCOPES: &[&str] = &["test", "provided", "system", "import"];

/// How many `${...}` rounds to expand before giving up on nesting
const MAX_INTERPOLATION_ROUNDS: usize = 8;

/// A `<dependency>` entry of a POM
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PomDependency {
    pub group: String,
    pub artifact: String,
    pub version: Option<String>,
    /// `<type>`, defaults to `jar`
    pub extension: Option<String>,
    pub classifier: Option<String>,
    pub scope: Option<String>,
    pub optional: bool,
    pub exclusions: Vec<Exclusion>,
}

impl PomDependency {
    /// Whether this edge belongs on the runtime classpath
    pub fn is_followed(&self) -> bool {
        !self.optional
            && !self
                .scope
                .as_deref()
                .map_or(false, |s| SKIPPED_SCOPES.contains(&s))
    }

    /// Build a coordinate; `None` when the version is still unknown
    pub fn to_coordinate(&self) -> Option<DependencyCoordinate> {
        let mut coordinate = DependencyCoordinate::new(&self.group, &self.artifact, self.version.clone()?);
        if let Some(extension) = &self.extension {
            coordinate.extension = extension.clone();
        }
        coordinate.classifier = self.classifier.clone();
        coordinate.exclusions = self.exclusions.clone();
        Some(coordinate)
    }

    fn field(&mut self, name: &str, value: String) {
        match name {
            "groupId" => self.group = value,
            "artifactId" => self.artifact = value,
            "version" => self.version = Some(value),
            "type" => self.extension = Some(value),
            "classifier" => self.classifier = Some(value),
            "scope" => self.scope = Some(value),
            "optional" => self.optional = value.eq_ignore_ascii_case("true"),
            _ => {}
        }
    }
}

/// `<parent>` reference
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParentRef {
    pub group: String,
    pub artifact: String,
    pub version: String,
}

impl ParentRef {
    pub fn to_coordinate(&self) -> DependencyCoordinate {
        DependencyCoordinate::new(&self.group, &self.artifact, &self.version).with_extension("pom")
    }
}

/// A parsed POM
#[derive(Debug, Clone, Default)]
pub struct Pom {
    pub group: Option<String>,
    pub artifact: Option<String>,
    pub version: Option<String>,
    pub packaging: Option<String>,
    pub parent: Option<ParentRef>,
    pub properties: HashMap<String, String>,
    pub dependencies: Vec<PomDependency>,
    pub managed: Vec<PomDependency>,
}

impl Pom {
    /// Parse POM XML
    pub fn parse(xml: &str) -> Result<Self, ResolveError> {
        let mut reader = Reader::from_str(xml.trim_start_matches('\u{feff}'));
        reader.trim_text(true);

        let mut pom = Pom::default();
        let mut path: Vec<String> = Vec::new();
        let mut dependency: Option<PomDependency> = None;
        let mut exclusion: Option<Exclusion> = None;

        loop {
            match reader.read_event()? {
                Event::Start(e) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    let parent: Vec<&str> = path.iter().map(String::as_str).collect();
                    match (parent.as_slice(), name.as_str()) {
                        (["project", "dependencies"], "dependency")
                        | (["project", "dependencyManagement", "dependencies"], "dependency") => {
                            dependency = Some(PomDependency::default());
                        }
                        ([.., "exclusions"], "exclusion") if dependency.is_some() => {
                            exclusion = Some(Exclusion::new("", ""));
                        }
                        (["project"], "parent") => pom.parent = Some(ParentRef::default()),
                        _ => {}
                    }
                    path.push(name);
                }
                Event::End(_) => {
                    let closed = path.pop().unwrap_or_default();
                    match closed.as_str() {
                        "exclusion" => {
                            if let (Some(dep), Some(ex)) = (dependency.as_mut(), exclusion.take()) {
                                dep.exclusions.push(ex);
                            }
                        }
                        "dependency" => {
                            if let Some(dep) = dependency.take() {
                                if path.iter().any(|p| p == "dependencyManagement") {
                                    pom.managed.push(dep);
                                } else {
                                    pom.dependencies.push(dep);
                                }
                            }
                        }
                        _ => {}
                    }
                }
                Event::Text(e) => {
                    let text = e.unescape()?.trim().to_string();
                    let segments: Vec<&str> = path.iter().map(String::as_str).collect();
                    pom.text(&segments, text, dependency.as_mut(), exclusion.as_mut());
                }
                Event::Eof => break,
                _ => {}
            }
        }

        Ok(pom)
    }

    fn text(
        &mut self,
        path: &[&str],
        text: String,
        dependency: Option<&mut PomDependency>,
        exclusion: Option<&mut Exclusion>,
    ) {
        match path {
            ["project", "groupId"] => self.group = Some(text),
            ["project", "artifactId"] => self.artifact = Some(text),
            ["project", "version"] => self.version = Some(text),
            ["project", "packaging"] => self.packaging = Some(text),
            ["project", "parent", field] => {
                if let Some(parent) = self.parent.as_mut() {
                    match *field {
                        "groupId" => parent.group = text,
                        "artifactId" => parent.artifact = text,
                        "version" => parent.version = text,
                        _ => {}
                    }
                }
            }
            ["project", "properties", key] => {
                self.properties.insert(key.to_string(), text);
            }
            [.., "exclusion", field] => {
                if let Some(exclusion) = exclusion {
                    match *field {
                        "groupId" => exclusion.group = text,
                        "artifactId" => exclusion.artifact = text,
                        _ => {}
                    }
                }
            }
            [.., "dependency", field] => {
                if let Some(dependency) = dependency {
                    dependency.field(field, text);
                }
            }
            _ => {}
        }
    }

    /// Effective group id, inherited from the parent when absent
    pub fn group_id(&self) -> Option<&str> {
        self.group
            .as_deref()
            .or_else(|| self.parent.as_ref().map(|p| p.group.as_str()))
    }

    /// Effective version, inherited from the parent when absent
    pub fn version_id(&self) -> Option<&str> {
        self.version
            .as_deref()
            .or_else(|| self.parent.as_ref().map(|p| p.version.as_str()))
    }

    /// Fold a parent POM into this one; values declared here win
    pub fn merge_parent(&mut self, parent: &Pom) {
        for (key, value) in &parent.properties {
            self.properties.entry(key.clone()).or_insert_with(|| value.clone());
        }
        for managed in &parent.managed {
            let declared = self
                .managed
                .iter()
                .any(|m| m.group == managed.group && m.artifact == managed.artifact);
            if !declared {
                self.managed.push(managed.clone());
            }
        }
        for dependency in &parent.dependencies {
            let declared = self
                .dependencies
                .iter()
                .any(|d| d.group == dependency.group && d.artifact == dependency.artifact);
            if !declared {
                self.dependencies.push(dependency.clone());
            }
        }
    }

    /// Expand `${...}` placeholders; unknown ones are left as they are
    pub fn interpolate(&self, value: &str) -> String {
        let mut current = value.to_string();
        for _ in 0..MAX_INTERPOLATION_ROUNDS {
            if !current.contains("${") {
                break;
            }
            let next = self.interpolate_once(&current);
            if next == current {
                break;
            }
            current = next;
        }
        current
    }

    fn interpolate_once(&self, value: &str) -> String {
        let mut out = String::with_capacity(value.len());
        let mut rest = value;
        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find('}') {
                Some(end) => {
                    let key = &after[..end];
                    match self.property(key) {
                        Some(resolved) => out.push_str(&resolved),
                        None => {
                            out.push_str("${");
                            out.push_str(key);
                            out.push('}');
                        }
                    }
                    rest = &after[end + 1..];
                }
                None => {
                    out.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }

    fn property(&self, key: &str) -> Option<String> {
        match key {
            "project.version" | "pom.version" | "version" => self.version_id().map(str::to_string),
            "project.groupId" | "pom.groupId" | "groupId" => self.group_id().map(str::to_string),
            "project.artifactId" => self.artifact.clone(),
            "project.parent.version" | "parent.version" => self.parent.as_ref().map(|p| p.version.clone()),
            "project.parent.groupId" => self.parent.as_ref().map(|p| p.group.clone()),
            _ => self.properties.get(key).cloned(),
        }
    }

    /// Runtime dependencies with placeholders expanded and managed versions applied
    pub fn effective_dependencies(&self) -> Vec<PomDependency> {
        self.dependencies
            .iter()
            .map(|raw| {
                let mut dep = self.expand(raw);
                if let Some(managed) = self
                    .managed
                    .iter()
                    .map(|m| self.expand(m))
                    .find(|m| m.group == dep.group && m.artifact == dep.artifact)
                {
                    if dep.version.is_none() {
                        dep.version = managed.version;
                    }
                    if dep.scope.is_none() {
                        dep.scope = managed.scope;
                    }
                    for exclusion in managed.exclusions {
                        if !dep.exclusions.contains(&exclusion) {
                            dep.exclusions.push(exclusion);
                        }
                    }
                }
                dep
            })
            .collect()
    }

    fn expand(&self, dep: &PomDependency) -> PomDependency {
        PomDependency {
            group: self.interpolate(&dep.group),
            artifact: self.interpolate(&dep.artifact),
            version: dep.version.as_deref().map(|v| self.interpolate(v)),
            extension: dep.extension.as_deref().map(|v| self.interpolate(v)),
            classifier: dep.classifier.as_deref().map(|v| self.interpolate(v)),
            scope: dep.scope.clone(),
            optional: dep.optional,
            exclusions: dep.exclusions.clone(),
        }
    }

    /// Artifact extension for this POM's packaging; `None` for `pom` packaging
    pub fn artifact_extension(&self, declared: &str) -> Option<String> {
        match self.packaging.as_deref().map(str::trim) {
            Some("pom") if declared == "jar" => None,
            Some("aar") if declared == "jar" => Some("aar".to_string()),
            _ => Some(declared.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POM: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<project xmlns="http://maven.apache.org/POM/4.0.0">
  <modelVersion>4.0.0</modelVersion>
  <parent>
    <groupId>com.example</groupId>
    <artifactId>parent</artifactId>
    <version>2.0</version>
  </parent>
  <artifactId>lib</artifactId>
  <packaging>aar</packaging>
  <properties>
    <okio.version>3.6.0</okio.version>
  </properties>
  <dependencyManagement>
    <dependencies>
      <dependency>
        <groupId>org.slf4j</groupId>
        <artifactId>slf4j-api</artifactId>
        <version>2.0.9</version>
      </dependency>
    </dependencies>
  </dependencyManagement>
  <dependencies>
    <dependency>
      <groupId>com.squareup.okio</groupId>
      <artifactId>okio</artifactId>
      <version>${okio.version}</version>
      <exclusions>
        <exclusion>
          <groupId>org.jetbrains.kotlin</groupId>
          <artifactId>*</artifactId>
        </exclusion>
      </exclusions>
    </dependency>
    <dependency>
      <groupId>org.slf4j</groupId>
      <artifactId>slf4j-api</artifactId>
    </dependency>
    <dependency>
      <groupId>${project.groupId}</groupId>
      <artifactId>sibling</artifactId>
      <version>${project.version}</version>
    </dependency>
    <dependency>
      <groupId>junit</groupId>
      <artifactId>junit</artifactId>
      <version>4.13.2</version>
      <scope>test</scope>
    </dependency>
    <dependency>
      <groupId>com.example</groupId>
      <artifactId>extra</artifactId>
      <version>1.0</version>
      <optional>true</optional>
    </dependency>
  </dependencies>
</project>
"#;

    #[test]
    fn test_parse_basic_fields() {
        let pom = Pom::parse(POM).unwrap();

        assert_eq!(pom.artifact.as_deref(), Some("lib"));
        assert_eq!(pom.group_id(), Some("com.example"));
        assert_eq!(pom.version_id(), Some("2.0"));
        assert_eq!(pom.packaging.as_deref(), Some("aar"));
        assert_eq!(pom.dependencies.len(), 5);
        assert_eq!(pom.managed.len(), 1);
        assert_eq!(
            pom.dependencies[0].exclusions,
            vec![Exclusion::new("org.jetbrains.kotlin", "*")]
        );
    }

    #[test]
    fn test_effective_dependencies() {
        let pom = Pom::parse(POM).unwrap();
        let deps = pom.effective_dependencies();

        assert_eq!(deps[0].version.as_deref(), Some("3.6.0"));
        assert_eq!(deps[1].version.as_deref(), Some("2.0.9"));
        assert_eq!(deps[2].group, "com.example");
        assert_eq!(deps[2].version.as_deref(), Some("2.0"));

        let followed: Vec<_> = deps.iter().filter(|d| d.is_followed()).map(|d| d.artifact.as_str()).collect();
        assert_eq!(followed, vec!["okio", "slf4j-api", "sibling"]);
    }

    #[test]
    fn test_merge_parent_child_wins() {
        let mut child = Pom::parse(POM).unwrap();
        let parent = Pom::parse(
            r#"<project><groupId>com.example</groupId><artifactId>parent</artifactId><version>2.0</version>
<packaging>pom</packaging>
<properties><okio.version>1.0</okio.version><kotlin.version>1.9.0</kotlin.version></properties>
<dependencyManagement><dependencies>
<dependency><groupId>org.jetbrains.kotlin</groupId><artifactId>kotlin-stdlib</artifactId><version>${kotlin.version}</version></dependency>
</dependencies></dependencyManagement>
</project>"#,
        )
        .unwrap();

        child.merge_parent(&parent);

        assert_eq!(child.properties.get("okio.version").map(String::as_str), Some("3.6.0"));
        assert_eq!(child.interpolate("${kotlin.version}"), "1.9.0");
        assert_eq!(child.managed.len(), 2);
    }

    #[test]
    fn test_unknown_placeholder_kept() {
        let pom = Pom::default();
        assert_eq!(pom.interpolate("${nope}-x"), "${nope}-x");
        assert_eq!(pom.interpolate("${unterminated"), "${unterminated");
    }

    #[test]
    fn test_artifact_extension_from_packaging() {
        let mut pom = Pom::default();
        assert_eq!(pom.artifact_extension("jar").as_deref(), Some("jar"));
        pom.packaging = Some("aar".into());
        assert_eq!(pom.artifact_extension("jar").as_deref(), Some("aar"));
        pom.packaging = Some("pom".into());
        assert_eq!(pom.artifact_extension("jar"), None);
        pom.packaging = Some("bundle".into());
        assert_eq!(pom.artifact_extension("jar").as_deref(), Some("jar"));
    }
}
