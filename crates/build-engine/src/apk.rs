//! APK Assembly
//!
//! Splices dex files, native libraries and assets into the archive produced
//! by `aapt2 link`.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use apkforge_core::{log_line, BuildCallback, BuildResult, BuildStep};
use async_trait::async_trait;
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::dex::CLASSES_DEX;
use crate::BuildError;

/// Assembles the final APK
pub struct ApkBuild {
    linked_apk: PathBuf,
    dex_dir: PathBuf,
    output_apk: PathBuf,
    native_libs_dir: Option<PathBuf>,
    assets_dir: Option<PathBuf>,
}

impl ApkBuild {
    pub fn new(linked_apk: impl Into<PathBuf>, dex_dir: impl Into<PathBuf>, output_apk: impl Into<PathBuf>) -> Self {
        Self {
            linked_apk: linked_apk.into(),
            dex_dir: dex_dir.into(),
            output_apk: output_apk.into(),
            native_libs_dir: None,
            assets_dir: None,
        }
    }

    /// Add `<dir>/<abi>/*.so` under `lib/`
    pub fn with_native_libs(mut self, dir: impl Into<PathBuf>) -> Self {
        self.native_libs_dir = Some(dir.into());
        self
    }

    /// Add the directory's contents under `assets/`
    pub fn with_assets(mut self, dir: impl Into<PathBuf>) -> Self {
        self.assets_dir = Some(dir.into());
        self
    }

    pub fn output_path(&self) -> &Path {
        &self.output_apk
    }

    /// Write the APK; the prior output is only removed once `classes.dex` is known to exist
    pub async fn assemble(&self) -> Result<u64, BuildError> {
        let dex = self.dex_dir.join(CLASSES_DEX);
        if !dex.is_file() {
            return Err(BuildError::Input(format!(
                "{} not found in {}",
                CLASSES_DEX,
                self.dex_dir.display()
            )));
        }

        match tokio::fs::remove_file(&self.output_apk).await {
            Ok(()) => debug!("Removed previous {:?}", self.output_apk),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        if let Some(parent) = self.output_apk.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let plan = AssemblyPlan {
            linked_apk: self.linked_apk.clone(),
            dex_files: dex_files(&self.dex_dir),
            native_libs_dir: self.native_libs_dir.clone(),
            assets_dir: self.assets_dir.clone(),
            output_apk: self.output_apk.clone(),
        };
        tokio::task::spawn_blocking(move || plan.write()).await??;

        let size = tokio::fs::metadata(&self.output_apk).await?.len();
        info!("Assembled {:?} ({})", self.output_apk, format_size(size));
        Ok(size)
    }
}

#[async_trait]
impl BuildStep for ApkBuild {
    fn name(&self) -> &str {
        "ApkBuild"
    }

    async fn execute(&mut self, callback: Option<&dyn BuildCallback>) -> BuildResult {
        match self.assemble().await {
            Ok(size) => {
                let message = format!(
                    "APK built successfully: {} ({})",
                    self.output_apk.display(),
                    format_size(size)
                );
                log_line(callback, &message);
                BuildResult::success(message)
            }
            Err(e) => {
                let message = format!("APK Build Failed: {}", e);
                log_line(callback, &message);
                BuildResult::failure(message)
            }
        }
    }
}

struct AssemblyPlan {
    linked_apk: PathBuf,
    dex_files: Vec<PathBuf>,
    native_libs_dir: Option<PathBuf>,
    assets_dir: Option<PathBuf>,
    output_apk: PathBuf,
}

impl AssemblyPlan {
    fn write(self) -> Result<(), BuildError> {
        let partial = self.output_apk.with_extension("apk.partial");
        let result = self.write_to(&partial);
        match result {
            Ok(()) => {
                std::fs::rename(&partial, &self.output_apk)?;
                Ok(())
            }
            Err(e) => {
                let _ = std::fs::remove_file(&partial);
                Err(e)
            }
        }
    }

    fn write_to(&self, target: &Path) -> Result<(), BuildError> {
        let mut out = ZipWriter::new(BufWriter::new(File::create(target)?));
        let deflated = FileOptions::default().compression_method(CompressionMethod::Deflated);

        if self.linked_apk.is_file() {
            let mut base = ZipArchive::new(File::open(&self.linked_apk)?)?;
            for i in 0..base.len() {
                let entry = base.by_index_raw(i)?;
                if is_dex_entry(entry.name()) || entry.name().starts_with("lib/") {
                    debug!("Dropping {} from linked resources", entry.name());
                    continue;
                }
                out.raw_copy_file(entry)?;
            }
        }

        for dex in &self.dex_files {
            let name = dex.file_name().map_or_else(String::new, |n| n.to_string_lossy().into_owned());
            out.start_file(name, deflated)?;
            std::io::copy(&mut File::open(dex)?, &mut out)?;
        }

        if let Some(dir) = &self.native_libs_dir {
            add_tree(&mut out, dir, "lib", deflated)?;
        }
        if let Some(dir) = &self.assets_dir {
            add_tree(&mut out, dir, "assets", deflated)?;
        }

        let mut writer = out.finish()?;
        writer.flush()?;
        Ok(())
    }
}

fn add_tree<W: std::io::Write + std::io::Seek>(
    out: &mut ZipWriter<W>,
    root: &Path,
    prefix: &str,
    options: FileOptions,
) -> Result<(), BuildError> {
    if !root.is_dir() {
        return Ok(());
    }

    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();
    files.sort();

    for file in files {
        let Ok(relative) = file.strip_prefix(root) else {
            continue;
        };
        let mut name = prefix.to_string();
        for component in relative.components() {
            name.push('/');
            name.push_str(&component.as_os_str().to_string_lossy());
        }
        out.start_file(name, options)?;
        std::io::copy(&mut File::open(&file)?, &mut *out)?;
    }
    Ok(())
}

/// `classes.dex`, `classes2.dex`, ...
fn is_dex_entry(name: &str) -> bool {
    dex_index(name).is_some()
}

fn dex_index(name: &str) -> Option<u32> {
    let middle = name.strip_prefix("classes")?.strip_suffix(".dex")?;
    if middle.is_empty() {
        Some(1)
    } else if middle.chars().all(|c| c.is_ascii_digit()) {
        middle.parse().ok().filter(|n| *n >= 2)
    } else {
        None
    }
}

/// Dex files in the dex directory, in multidex order
fn dex_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<(u32, PathBuf)> = std::fs::read_dir(dir)
        .into_iter()
        .flatten()
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let index = dex_index(&e.file_name().to_string_lossy())?;
            Some((index, e.path()))
        })
        .collect();
    files.sort();
    files.into_iter().map(|(_, path)| path).collect()
}

/// Human-readable size
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

/// APK entry information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApkEntry {
    pub name: String,
    pub size: u64,
    pub compressed_size: u64,
    pub is_directory: bool,
}

/// List the entries of an APK in archive order
pub fn list_entries(path: &Path) -> Result<Vec<ApkEntry>, BuildError> {
    let mut archive = ZipArchive::new(File::open(path)?)?;

    let mut entries = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let file = archive.by_index_raw(i)?;
        entries.push(ApkEntry {
            name: file.name().to_string(),
            size: file.size(),
            compressed_size: file.compressed_size(),
            is_directory: file.is_dir(),
        });
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let mut zip = ZipWriter::new(File::create(path).unwrap());
        for (name, data) in entries {
            let options = FileOptions::default().compression_method(CompressionMethod::Stored);
            zip.start_file(*name, options).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    fn read_entry(apk: &Path, name: &str) -> Vec<u8> {
        let mut archive = ZipArchive::new(File::open(apk).unwrap()).unwrap();
        let mut file = archive.by_name(name).unwrap();
        let mut content = Vec::new();
        file.read_to_end(&mut content).unwrap();
        content
    }

    fn names(apk: &Path) -> Vec<String> {
        list_entries(apk).unwrap().into_iter().map(|e| e.name).collect()
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 bytes");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.00 MB");
    }

    #[test]
    fn test_dex_index() {
        assert_eq!(dex_index("classes.dex"), Some(1));
        assert_eq!(dex_index("classes2.dex"), Some(2));
        assert_eq!(dex_index("classes12.dex"), Some(12));
        assert_eq!(dex_index("classes1.dex"), None);
        assert_eq!(dex_index("classesX.dex"), None);
        assert_eq!(dex_index("other.dex"), None);
    }

    #[tokio::test]
    async fn test_assembles_base_dex_libs_and_assets() {
        let dir = TempDir::new().unwrap();
        let linked = dir.path().join("resources.apk");
        write_zip(
            &linked,
            &[
                ("AndroidManifest.xml", b"binary-manifest"),
                ("resources.arsc", b"arsc"),
                ("res/layout/main.xml", b"layout"),
                ("classes.dex", b"stale"),
                ("lib/x86/libold.so", b"old"),
            ],
        );

        let dex = dir.path().join("dex");
        std::fs::create_dir_all(&dex).unwrap();
        std::fs::write(dex.join("classes.dex"), b"fresh-dex").unwrap();
        std::fs::write(dex.join("classes2.dex"), b"second-dex").unwrap();
        std::fs::write(dex.join("d8.snapshot"), b"digest").unwrap();

        let jni = dir.path().join("jniLibs/arm64-v8a");
        std::fs::create_dir_all(&jni).unwrap();
        std::fs::write(jni.join("libnative.so"), b"elf").unwrap();
        let assets = dir.path().join("assets/fonts");
        std::fs::create_dir_all(&assets).unwrap();
        std::fs::write(assets.join("a.ttf"), b"font").unwrap();

        let output = dir.path().join("out/app.apk");
        let mut step = ApkBuild::new(&linked, &dex, &output)
            .with_native_libs(dir.path().join("jniLibs"))
            .with_assets(dir.path().join("assets"));

        let result = step.execute(None).await;
        assert!(result.success, "{}", result.output);

        assert_eq!(
            names(&output),
            vec![
                "AndroidManifest.xml",
                "resources.arsc",
                "res/layout/main.xml",
                "classes.dex",
                "classes2.dex",
                "lib/arm64-v8a/libnative.so",
                "assets/fonts/a.ttf",
            ]
        );
        assert_eq!(read_entry(&output, "classes.dex"), b"fresh-dex");
        assert_eq!(read_entry(&output, "resources.arsc"), b"arsc");
        assert!(!output.with_extension("apk.partial").exists());
    }

    #[tokio::test]
    async fn test_missing_dex_leaves_previous_output() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("app.apk");
        std::fs::write(&output, b"previous build").unwrap();

        let mut step = ApkBuild::new(dir.path().join("resources.apk"), dir.path().join("dex"), &output);
        let result = step.execute(None).await;

        assert!(!result.success);
        assert!(result.output.contains("classes.dex not found"));
        assert_eq!(std::fs::read(&output).unwrap(), b"previous build");
    }

    #[tokio::test]
    async fn test_replaces_previous_output() {
        let dir = TempDir::new().unwrap();
        let dex = dir.path().join("dex");
        std::fs::create_dir_all(&dex).unwrap();
        std::fs::write(dex.join("classes.dex"), b"dex").unwrap();
        let output = dir.path().join("app.apk");
        std::fs::write(&output, b"not a zip").unwrap();

        let size = ApkBuild::new(dir.path().join("missing.apk"), &dex, &output)
            .assemble()
            .await
            .unwrap();

        assert_eq!(size, std::fs::metadata(&output).unwrap().len());
        assert_eq!(names(&output), vec!["classes.dex"]);
    }
}
