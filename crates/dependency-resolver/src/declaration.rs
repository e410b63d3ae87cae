//! Dependency declarations
//!
//! Turns free-form dependency text into canonical coordinates. A single
//! file may mix Maven `<dependency>` blocks, TOML `"group:artifact" = "version"`
//! pairs and Gradle-style quoted notation; Gradle version catalogs
//! (`libs.versions.toml`) get their own parser.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use regex::Regex;
use toml::Value;
use tracing::{debug, warn};

use crate::ResolveError;

/// Characters that can never appear in a coordinate part
const INVALID_CHARS: &[char] = &['{', '}', '"', '\'', '=', '<', '>', ';', '$', '(', ')'];

/// File name that selects the version catalog parser
pub const VERSION_CATALOG_FILE: &str = "libs.versions.toml";

/// A `group:artifact` pair excluded below a dependency edge
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Exclusion {
    pub group: String,
    pub artifact: String,
}

impl Exclusion {
    pub fn new(group: impl Into<String>, artifact: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            artifact: artifact.into(),
        }
    }

    /// `*` matches anything
    pub fn matches(&self, group: &str, artifact: &str) -> bool {
        (self.group == "*" || self.group == group) && (self.artifact == "*" || self.artifact == artifact)
    }
}

/// A Maven coordinate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyCoordinate {
    pub group: String,
    pub artifact: String,
    pub version: String,
    /// File extension, `jar` unless declared otherwise
    pub extension: String,
    pub classifier: Option<String>,
    pub exclusions: Vec<Exclusion>,
}

impl DependencyCoordinate {
    pub fn new(group: impl Into<String>, artifact: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            artifact: artifact.into(),
            version: version.into(),
            extension: "jar".to_string(),
            classifier: None,
            exclusions: Vec::new(),
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn with_classifier(mut self, classifier: impl Into<String>) -> Self {
        self.classifier = Some(classifier.into());
        self
    }

    /// Parse `g:a:v`, `g:a:type:v` or `g:a:type:classifier:v`, with an
    /// optional Gradle `@ext` suffix
    pub fn parse(notation: &str) -> Option<Self> {
        let notation = notation.trim();
        let (body, at_extension) = match notation.rsplit_once('@') {
            Some((body, ext)) if !ext.contains(':') => (body, Some(ext)),
            _ => (notation, None),
        };

        let parts: Vec<&str> = body.split(':').map(str::trim).collect();
        let mut coordinate = match parts.as_slice() {
            [g, a, v] => Self::new(*g, *a, *v),
            [g, a, t, v] => Self::new(*g, *a, *v).with_extension(*t),
            [g, a, t, c, v] => Self::new(*g, *a, *v).with_extension(*t).with_classifier(*c),
            _ => return None,
        };
        if let Some(ext) = at_extension {
            coordinate.extension = ext.trim().to_string();
        }

        coordinate.is_valid().then_some(coordinate)
    }

    fn is_valid(&self) -> bool {
        let name_ok = |part: &str| {
            !part.is_empty()
                && !part.contains(char::is_whitespace)
                && !part.contains(INVALID_CHARS)
                && !part.contains(',')
        };
        let version_ok = !self.version.is_empty()
            && !self.version.contains(char::is_whitespace)
            && !self
                .version
                .contains(|c: char| INVALID_CHARS.contains(&c) && c != '(' && c != ')');

        name_ok(&self.group)
            && name_ok(&self.artifact)
            && name_ok(&self.extension)
            && self.classifier.as_deref().map_or(true, name_ok)
            && version_ok
    }

    /// Identity string, `group:artifact:extension[:classifier]:version`
    pub fn canonical(&self) -> String {
        match &self.classifier {
            Some(c) => format!("{}:{}:{}:{}:{}", self.group, self.artifact, self.extension, c, self.version),
            None => format!("{}:{}:{}:{}", self.group, self.artifact, self.extension, self.version),
        }
    }

    /// `group:artifact`, the key used for version mediation
    pub fn key(&self) -> String {
        format!("{}:{}", self.group, self.artifact)
    }

    /// `artifact-version[-classifier].ext`
    pub fn file_name(&self) -> String {
        self.file_name_with_extension(&self.extension)
    }

    pub fn pom_file_name(&self) -> String {
        format!("{}-{}.pom", self.artifact, self.version)
    }

    fn file_name_with_extension(&self, extension: &str) -> String {
        match &self.classifier {
            Some(c) => format!("{}-{}-{}.{}", self.artifact, self.version, c, extension),
            None => format!("{}-{}.{}", self.artifact, self.version, extension),
        }
    }

    /// `group/with/slashes/artifact/version`
    pub fn relative_dir(&self) -> PathBuf {
        let mut dir = PathBuf::new();
        for segment in self.group.split('.') {
            dir.push(segment);
        }
        dir.push(&self.artifact);
        dir.push(&self.version);
        dir
    }

    /// Path of a file of this coordinate relative to a repository root URL
    pub fn url_path(&self, file_name: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            self.group.replace('.', "/"),
            self.artifact,
            self.version,
            file_name
        )
    }

    /// Whether any of `exclusions` removes this coordinate
    pub fn is_excluded_by(&self, exclusions: &[Exclusion]) -> bool {
        exclusions.iter().any(|e| e.matches(&self.group, &self.artifact))
    }
}

impl fmt::Display for DependencyCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// Parser for mixed-format dependency declarations
pub struct DependencyDeclarationParser {
    block: Regex,
    field: Regex,
    exclusions: Regex,
    exclusion: Regex,
    quoted: Regex,
}

impl DependencyDeclarationParser {
    pub fn new() -> Result<Self, ResolveError> {
        Ok(Self {
            block: Regex::new(r"(?s)<dependency>(.*?)</dependency>")?,
            field: Regex::new(r"(?s)<([A-Za-z]+)>\s*([^<]*?)\s*</([A-Za-z]+)>")?,
            exclusions: Regex::new(r"(?s)<exclusions>.*?</exclusions>")?,
            exclusion: Regex::new(r"(?s)<exclusion>(.*?)</exclusion>")?,
            quoted: Regex::new(r#""([^"]*)"|'([^']*)'"#)?,
        })
    }

    /// Read declarations from a file; a missing file declares nothing
    pub async fn read_file(&self, path: &Path) -> Result<Vec<DependencyCoordinate>, ResolveError> {
        if !path.exists() {
            debug!("No dependency declarations at {:?}", path);
            return Ok(Vec::new());
        }

        let text = tokio::fs::read_to_string(path).await?;
        let is_catalog = path.file_name().map_or(false, |n| n == VERSION_CATALOG_FILE);
        if is_catalog {
            parse_version_catalog(&text)
        } else {
            Ok(self.parse(&text))
        }
    }

    /// Parse mixed-dialect text; Maven blocks come first, then line entries
    pub fn parse(&self, text: &str) -> Vec<DependencyCoordinate> {
        let mut collected = Collected::default();

        for capture in self.block.captures_iter(text) {
            match self.parse_maven_block(&capture[1]) {
                Some(coordinate) => collected.push(coordinate),
                None => warn!("Skipping incomplete <dependency> block"),
            }
        }

        let remaining = self.block.replace_all(text, "");
        for raw in remaining.lines() {
            let Some(candidate) = self.line_candidate(raw) else {
                continue;
            };
            match DependencyCoordinate::parse(&candidate) {
                Some(coordinate) => collected.push(coordinate),
                None => warn!("Skipping malformed dependency: {}", candidate),
            }
        }

        collected.items
    }

    fn parse_maven_block(&self, block: &str) -> Option<DependencyCoordinate> {
        let mut exclusions = Vec::new();
        if let Some(section) = self.exclusions.find(block) {
            for capture in self.exclusion.captures_iter(section.as_str()) {
                let group = self.tag_value(&capture[1], "groupId");
                let artifact = self.tag_value(&capture[1], "artifactId");
                if let (Some(group), Some(artifact)) = (group, artifact) {
                    exclusions.push(Exclusion::new(group, artifact));
                }
            }
        }

        let body = self.exclusions.replace_all(block, "");
        let group = self.tag_value(&body, "groupId")?;
        let artifact = self.tag_value(&body, "artifactId")?;
        let version = self.tag_value(&body, "version")?;
        let extension = self
            .tag_value(&body, "type")
            .or_else(|| self.tag_value(&body, "packaging"))
            .unwrap_or_else(|| "jar".to_string());

        let mut coordinate = DependencyCoordinate::new(group, artifact, version).with_extension(extension);
        coordinate.classifier = self.tag_value(&body, "classifier");
        coordinate.exclusions = exclusions;
        coordinate.is_valid().then_some(coordinate)
    }

    fn tag_value(&self, body: &str, tag: &str) -> Option<String> {
        self.field
            .captures_iter(body)
            .find(|c| &c[1] == tag && &c[3] == tag)
            .map(|c| c[2].to_string())
            .filter(|v| !v.is_empty())
    }

    /// Extract the coordinate notation a single line carries, if any
    fn line_candidate(&self, raw: &str) -> Option<String> {
        let line = match raw.find("//") {
            Some(at) => &raw[..at],
            None => raw,
        }
        .trim();

        if line.is_empty() || line.starts_with('#') || line.starts_with('<') {
            return None;
        }

        if let Some((key, value)) = line.split_once('=') {
            let key = strip_quotes(key);
            let value = strip_quotes(value);
            return Some(format!("{}:{}", key, value));
        }

        for capture in self.quoted.captures_iter(line) {
            let quoted = capture.get(1).or_else(|| capture.get(2)).map(|m| m.as_str());
            if let Some(quoted) = quoted.filter(|q| q.contains(':')) {
                return Some(quoted.to_string());
            }
        }

        line.contains(':').then(|| line.to_string())
    }
}

fn strip_quotes(s: &str) -> &str {
    s.trim().trim_matches(|c| c == '"' || c == '\'').trim()
}

/// Coordinates in first-seen order, unique by canonical string
#[derive(Default)]
struct Collected {
    seen: HashSet<String>,
    items: Vec<DependencyCoordinate>,
}

impl Collected {
    fn push(&mut self, coordinate: DependencyCoordinate) {
        if self.seen.insert(coordinate.canonical()) {
            self.items.push(coordinate);
        } else {
            debug!("Duplicate dependency {}", coordinate);
        }
    }
}

/// Parse the `[libraries]` table of a Gradle version catalog
pub fn parse_version_catalog(text: &str) -> Result<Vec<DependencyCoordinate>, ResolveError> {
    let document: toml::Table = toml::from_str(text)?;
    let versions = document.get("versions").and_then(Value::as_table);
    let Some(libraries) = document.get("libraries").and_then(Value::as_table) else {
        return Ok(Vec::new());
    };

    let mut collected = Collected::default();
    for (alias, entry) in libraries {
        match catalog_entry(entry, versions) {
            Some(coordinate) => collected.push(coordinate),
            None => warn!("Skipping catalog library '{}': cannot determine coordinate", alias),
        }
    }
    Ok(collected.items)
}

fn catalog_entry(entry: &Value, versions: Option<&toml::Table>) -> Option<DependencyCoordinate> {
    let table = match entry {
        Value::String(notation) => return DependencyCoordinate::parse(notation),
        Value::Table(table) => table,
        _ => return None,
    };

    let (group, name) = match table.get("module").and_then(Value::as_str) {
        Some(module) => {
            let (group, name) = module.split_once(':')?;
            (group.to_string(), name.to_string())
        }
        None => (
            table.get("group")?.as_str()?.to_string(),
            table.get("name")?.as_str()?.to_string(),
        ),
    };

    let version = match table.get("version")? {
        Value::Table(reference) if reference.contains_key("ref") => {
            let key = reference.get("ref")?.as_str()?;
            version_value(versions?.get(key)?)?
        }
        other => version_value(other)?,
    };

    let coordinate = DependencyCoordinate::new(group, name, version);
    coordinate.is_valid().then_some(coordinate)
}

/// A plain version string or a rich `{ strictly | require | prefer }` table
fn version_value(value: &Value) -> Option<String> {
    match value {
        Value::String(v) => Some(v.clone()),
        Value::Table(rich) => ["strictly", "require", "prefer"]
            .iter()
            .find_map(|k| rich.get(*k).and_then(Value::as_str))
            .map(str::to_string),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn parser() -> DependencyDeclarationParser {
        DependencyDeclarationParser::new().unwrap()
    }

    #[test]
    fn test_maven_block() {
        let text = "<dependency><groupId>org.apache.commons</groupId><artifactId>commons-lang3</artifactId><version>3.12.0</version></dependency>";
        let deps = parser().parse(text);

        assert_eq!(deps, vec![DependencyCoordinate::new("org.apache.commons", "commons-lang3", "3.12.0")]);
    }

    #[test]
    fn test_toml_pair() {
        let deps = parser().parse(r#""com.google.code.gson:gson" = "2.8.8""#);
        assert_eq!(deps, vec![DependencyCoordinate::new("com.google.code.gson", "gson", "2.8.8")]);
    }

    #[test]
    fn test_gradle_line_and_dedup_across_dialects() {
        let text = r#"
implementation "com.squareup.okhttp3:okhttp:4.9.0"
"com.squareup.okhttp3:okhttp" = "4.9.0"
implementation 'androidx.core:core:1.12.0' // core
"#;
        let deps = parser().parse(text);

        assert_eq!(deps.len(), 2);
        assert_eq!(deps[0], DependencyCoordinate::new("com.squareup.okhttp3", "okhttp", "4.9.0"));
        assert_eq!(deps[1].artifact, "core");
    }

    #[test]
    fn test_maven_blocks_come_first() {
        let text = r#"
implementation("a.b:first:1.0")
<dependency>
    <groupId>c.d</groupId>
    <artifactId>second</artifactId>
    <version>2.0</version>
    <type>aar</type>
    <exclusions>
        <exclusion>
            <groupId>x.y</groupId>
            <artifactId>*</artifactId>
        </exclusion>
    </exclusions>
</dependency>
"#;
        let deps = parser().parse(text);

        assert_eq!(deps[0].artifact, "second");
        assert_eq!(deps[0].extension, "aar");
        assert_eq!(deps[0].exclusions, vec![Exclusion::new("x.y", "*")]);
        assert_eq!(deps[1].artifact, "first");
    }

    #[test]
    fn test_incomplete_block_and_malformed_lines_skipped() {
        let text = r#"
<dependency><groupId>a</groupId><artifactId>b</artifactId></dependency>
implementation "only:two"
implementation "g:a:1.0"
# comment: ignored
"#;
        let deps = parser().parse(text);
        assert_eq!(deps, vec![DependencyCoordinate::new("g", "a", "1.0")]);
    }

    #[test]
    fn test_four_and_five_part_notation() {
        let four = DependencyCoordinate::parse("g:a:aar:1.0").unwrap();
        assert_eq!(four.extension, "aar");
        assert_eq!(four.canonical(), "g:a:aar:1.0");

        let five = DependencyCoordinate::parse("g:a:jar:sources:1.0").unwrap();
        assert_eq!(five.classifier.as_deref(), Some("sources"));
        assert_eq!(five.file_name(), "a-1.0-sources.jar");

        let at = DependencyCoordinate::parse("g:a:1.0@aar").unwrap();
        assert_eq!(at.extension, "aar");

        assert!(DependencyCoordinate::parse("g::1.0").is_none());
        assert!(DependencyCoordinate::parse("g:a:$version").is_none());
    }

    #[test]
    fn test_layout_paths() {
        let c = DependencyCoordinate::new("com.squareup.okhttp3", "okhttp", "4.9.0");
        assert_eq!(
            c.relative_dir(),
            PathBuf::from("com").join("squareup").join("okhttp3").join("okhttp").join("4.9.0")
        );
        assert_eq!(c.url_path(&c.pom_file_name()), "com/squareup/okhttp3/okhttp/4.9.0/okhttp-4.9.0.pom");
    }

    #[test]
    fn test_exclusion_wildcards() {
        assert!(Exclusion::new("*", "*").matches("any", "thing"));
        assert!(Exclusion::new("g", "*").matches("g", "x"));
        assert!(!Exclusion::new("g", "a").matches("g", "b"));
    }

    #[test]
    fn test_version_catalog() {
        let text = r#"
[versions]
okhttp = "4.12.0"
core = { strictly = "1.12.0" }

[libraries]
okhttp = { module = "com.squareup.okhttp3:okhttp", version.ref = "okhttp" }
core = { group = "androidx.core", name = "core-ktx", version.ref = "core" }
gson = "com.google.code.gson:gson:2.10.1"
junit = { module = "junit:junit", version = "4.13.2" }
broken = { module = "a:b", version.ref = "missing" }
"#;
        let deps = parse_version_catalog(text).unwrap();

        assert_eq!(deps.len(), 4);
        assert_eq!(deps[0], DependencyCoordinate::new("com.squareup.okhttp3", "okhttp", "4.12.0"));
        assert_eq!(deps[1], DependencyCoordinate::new("androidx.core", "core-ktx", "1.12.0"));
        assert_eq!(deps[2].artifact, "gson");
        assert_eq!(deps[3].version, "4.13.2");
    }

    #[tokio::test]
    async fn test_read_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let deps = parser().read_file(&dir.path().join("dependencies.toml")).await.unwrap();
        assert!(deps.is_empty());
    }

    #[tokio::test]
    async fn test_read_file_selects_catalog_parser() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(VERSION_CATALOG_FILE);
        std::fs::write(&path, "[libraries]\ngson = \"com.google.code.gson:gson:2.10.1\"\n").unwrap();

        let deps = parser().read_file(&path).await.unwrap();

        assert_eq!(deps.len(), 1);
    }
}
