//! Project Layout
//!
//! Where sources are read from and where every intermediate lands.

use std::path::{Path, PathBuf};

use apkforge_dependency_resolver::VERSION_CATALOG_FILE;

/// Plain dependency declaration file at the project root
pub const DEPENDENCIES_FILE: &str = "dependencies.toml";

/// Source and output locations of one Android project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    /// Project root directory
    pub project_dir: PathBuf,

    /// Module holding `src/main` (default: app)
    pub module: String,

    /// Root of all intermediates and outputs
    pub build_dir: PathBuf,
}

impl ProjectLayout {
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        let project_dir = project_dir.into();
        Self {
            build_dir: project_dir.join("build"),
            project_dir,
            module: "app".to_string(),
        }
    }

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = module.into();
        self
    }

    pub fn with_build_dir(mut self, build_dir: impl Into<PathBuf>) -> Self {
        self.build_dir = build_dir.into();
        self
    }

    fn main_dir(&self) -> PathBuf {
        self.project_dir.join(&self.module).join("src").join("main")
    }

    // Sources

    pub fn manifest(&self) -> PathBuf {
        self.main_dir().join("AndroidManifest.xml")
    }

    pub fn res_dir(&self) -> PathBuf {
        self.main_dir().join("res")
    }

    pub fn java_dir(&self) -> PathBuf {
        self.main_dir().join("java")
    }

    pub fn kotlin_dir(&self) -> PathBuf {
        self.main_dir().join("kotlin")
    }

    /// Prebuilt native libraries, `<abi>/*.so`
    pub fn jni_libs_dir(&self) -> PathBuf {
        self.main_dir().join("jniLibs")
    }

    pub fn assets_dir(&self) -> PathBuf {
        self.main_dir().join("assets")
    }

    /// Dependency declarations: the version catalog when the project has
    /// one, the plain declaration file otherwise
    pub fn dependency_file(&self) -> PathBuf {
        let catalog = self.project_dir.join("gradle").join(VERSION_CATALOG_FILE);
        if catalog.exists() {
            catalog
        } else {
            self.project_dir.join(DEPENDENCIES_FILE)
        }
    }

    // Intermediates

    pub fn processed_manifest(&self) -> PathBuf {
        self.build_dir.join("processed_manifest.xml")
    }

    pub fn compiled_res_dir(&self) -> PathBuf {
        self.build_dir.join("compiled_res")
    }

    /// Output of `aapt2 link`: manifest, resources.arsc and res/
    pub fn linked_apk(&self) -> PathBuf {
        self.build_dir.join("resources.apk")
    }

    /// Generated `R.java`
    pub fn gen_dir(&self) -> PathBuf {
        self.build_dir.join("gen")
    }

    pub fn classes_dir(&self) -> PathBuf {
        self.build_dir.join("classes")
    }

    pub fn dex_dir(&self) -> PathBuf {
        self.build_dir.join("dex")
    }

    pub fn exploded_aars_dir(&self) -> PathBuf {
        self.build_dir.join("exploded_aars")
    }

    pub fn compiled_aars_dir(&self) -> PathBuf {
        self.build_dir.join("compiled_aars")
    }

    /// Final archive, signed in place when signing is configured
    pub fn output_apk(&self) -> PathBuf {
        self.build_dir.join("app.apk")
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_standard_locations() {
        let layout = ProjectLayout::new("/work/demo");

        assert_eq!(
            layout.manifest(),
            PathBuf::from("/work/demo/app/src/main/AndroidManifest.xml")
        );
        assert_eq!(layout.java_dir(), PathBuf::from("/work/demo/app/src/main/java"));
        assert_eq!(layout.dex_dir(), PathBuf::from("/work/demo/build/dex"));
        assert_eq!(layout.output_apk(), PathBuf::from("/work/demo/build/app.apk"));
    }

    #[test]
    fn test_custom_module_and_build_dir() {
        let layout = ProjectLayout::new("/p").with_module("mobile").with_build_dir("/tmp/out");

        assert_eq!(layout.res_dir(), PathBuf::from("/p/mobile/src/main/res"));
        assert_eq!(layout.classes_dir(), PathBuf::from("/tmp/out/classes"));
    }

    #[test]
    fn test_dependency_file_prefers_catalog() {
        let dir = TempDir::new().unwrap();
        let layout = ProjectLayout::new(dir.path());
        assert_eq!(layout.dependency_file(), dir.path().join(DEPENDENCIES_FILE));

        std::fs::create_dir_all(dir.path().join("gradle")).unwrap();
        std::fs::write(dir.path().join("gradle").join(VERSION_CATALOG_FILE), "").unwrap();
        assert_eq!(
            layout.dependency_file(),
            dir.path().join("gradle").join(VERSION_CATALOG_FILE)
        );
    }
}
