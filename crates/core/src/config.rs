//! Pipeline Configuration
//!
//! Everything the pipeline needs from the outside world is passed in as one
//! explicit value:
//! - Toolchain paths (aapt2, d8, javac, kotlinc, apksigner, zipalign, android.jar)
//! - SDK bounds and the package identifier
//! - Signing keystore
//! - Dependency repositories and the local repository cache
//!
//! Lookup order is `apkforge.toml` in the project directory, then the user
//! configuration directory, then built-in defaults.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use directories::{BaseDirs, ProjectDirs};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ForgeError, Result};

/// Project-level configuration file name
pub const CONFIG_FILE_NAME: &str = "apkforge.toml";

/// Maven Central
pub const MAVEN_CENTRAL: &str = "https://repo.maven.apache.org/maven2/";
/// Google's Maven repository
pub const GOOGLE_MAVEN: &str = "https://maven.google.com/";
/// JitPack
pub const JITPACK: &str = "https://jitpack.io/";

/// SDK version bounds written into the manifest and passed to d8
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SdkConfig {
    /// Minimum SDK version
    pub min_sdk: u32,
    /// Target SDK version
    pub target_sdk: u32,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            min_sdk: 24,
            target_sdk: 34,
        }
    }
}

/// Paths of the external build tools
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    /// Platform `android.jar` used as the compile library
    pub android_jar: PathBuf,
    pub aapt2: PathBuf,
    /// `d8` launcher script or `d8.jar`
    pub d8: PathBuf,
    pub javac: PathBuf,
    /// Kotlin compiler; Kotlin compilation is skipped when unset
    pub kotlinc: Option<PathBuf>,
    /// `apksigner` launcher script or `apksigner.jar`
    pub apksigner: PathBuf,
    /// Run before signing when set
    pub zipalign: Option<PathBuf>,
    /// Java launcher used for `.jar` tools
    pub java: PathBuf,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            android_jar: PathBuf::from("android.jar"),
            aapt2: PathBuf::from("aapt2"),
            d8: PathBuf::from("d8"),
            javac: PathBuf::from("javac"),
            kotlinc: None,
            apksigner: PathBuf::from("apksigner"),
            zipalign: None,
            java: PathBuf::from("java"),
        }
    }
}

impl ToolchainConfig {
    /// Fill in tool paths from an Android SDK installation
    pub fn detect(sdk_path: &Path, target_sdk: u32) -> Result<Self> {
        let build_tools = latest_version_dir(&sdk_path.join("build-tools")).ok_or_else(|| {
            ForgeError::Toolchain(format!("No build-tools found under {:?}", sdk_path))
        })?;
        debug!("Using build-tools {:?}", build_tools);

        let platforms = sdk_path.join("platforms");
        let preferred = platforms.join(format!("android-{}", target_sdk));
        let platform = if preferred.join("android.jar").exists() {
            preferred
        } else {
            latest_version_dir(&platforms).ok_or_else(|| {
                ForgeError::Toolchain(format!("No platforms found under {:?}", sdk_path))
            })?
        };

        let (aapt2, d8, apksigner, zipalign) = if cfg!(windows) {
            ("aapt2.exe", "d8.bat", "apksigner.bat", "zipalign.exe")
        } else {
            ("aapt2", "d8", "apksigner", "zipalign")
        };
        let zipalign = build_tools.join(zipalign);

        Ok(Self {
            android_jar: platform.join("android.jar"),
            aapt2: build_tools.join(aapt2),
            d8: build_tools.join(d8),
            javac: which::which("javac").unwrap_or_else(|_| PathBuf::from("javac")),
            kotlinc: which::which("kotlinc").ok(),
            apksigner: build_tools.join(apksigner),
            zipalign: zipalign.exists().then_some(zipalign),
            java: which::which("java").unwrap_or_else(|_| PathBuf::from("java")),
        })
    }
}

/// Keystore used to sign the final archive
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SigningConfig {
    pub keystore_path: PathBuf,
    pub keystore_password: String,
    pub key_alias: String,
    /// Key password, defaults to the keystore password
    #[serde(default)]
    pub key_password: Option<String>,
}

impl SigningConfig {
    /// Get the effective key password
    pub fn effective_key_password(&self) -> &str {
        self.key_password.as_deref().unwrap_or(&self.keystore_password)
    }
}

/// Dependency resolution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Remote repositories, tried in order
    pub repositories: Vec<String>,
    /// Local repository cache; defaults to the user data directory
    pub local_repository: Option<PathBuf>,
    /// HTTP timeout in seconds
    pub timeout_secs: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            repositories: vec![
                MAVEN_CENTRAL.to_string(),
                GOOGLE_MAVEN.to_string(),
                JITPACK.to_string(),
            ],
            local_repository: None,
            timeout_secs: 60,
        }
    }
}

impl ResolverConfig {
    /// Resolve the local repository path
    pub fn local_repository_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.local_repository {
            return Ok(path.clone());
        }
        PipelineConfig::data_dir()
            .map(|dir| dir.join("local-repo"))
            .ok_or_else(|| ForgeError::Config("Cannot determine local repository path".into()))
    }
}

/// Manifest normalization settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ManifestConfig {
    /// Permissions every processed manifest must declare
    pub required_permissions: Vec<String>,
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            required_permissions: vec![
                "android.permission.INTERNET".to_string(),
                "android.permission.FOREGROUND_SERVICE".to_string(),
            ],
        }
    }
}

/// Main pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Application package identifier
    pub package_name: Option<String>,
    /// Android SDK installation, used for toolchain detection
    pub sdk_path: Option<PathBuf>,
    pub sdk: SdkConfig,
    pub toolchain: ToolchainConfig,
    /// The signing step is omitted when unset
    pub signing: Option<SigningConfig>,
    pub resolver: ResolverConfig,
    pub manifest: ManifestConfig,
}

impl PipelineConfig {
    /// Get the user configuration directory path
    pub fn config_dir() -> Option<PathBuf> {
        ProjectDirs::from("com", "apkforge", "apkforge").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the user configuration file path
    pub fn config_file() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Get the data directory path
    pub fn data_dir() -> Option<PathBuf> {
        ProjectDirs::from("com", "apkforge", "apkforge").map(|dirs| dirs.data_dir().to_path_buf())
    }

    /// Load configuration for a project directory
    pub async fn load(project_dir: &Path) -> Result<Self> {
        let project_file = project_dir.join(CONFIG_FILE_NAME);
        if project_file.exists() {
            return Self::load_from(&project_file).await;
        }

        if let Some(user_file) = Self::config_file().filter(|f| f.exists()) {
            return Self::load_from(&user_file).await;
        }

        info!("Config file not found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub async fn load_from(path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", path);
        let contents = tokio::fs::read_to_string(path).await?;
        let config: PipelineConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a file
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let contents = toml::to_string_pretty(self)?;
        tokio::fs::write(path, contents).await?;

        debug!("Config saved to {:?}", path);
        Ok(())
    }

    /// Get Android SDK path, with auto-detection
    pub fn get_sdk_path(&self) -> Option<PathBuf> {
        self.sdk_path.clone().or_else(|| {
            let candidates = [
                std::env::var_os("ANDROID_HOME").map(PathBuf::from),
                std::env::var_os("ANDROID_SDK_ROOT").map(PathBuf::from),
                BaseDirs::new().map(|b| b.home_dir().join("Android").join("Sdk")),
                Some(PathBuf::from("/usr/local/android-sdk")),
            ];

            candidates.into_iter().flatten().find(|p| p.exists())
        })
    }
}

/// Pick the subdirectory with the highest version-like name
fn latest_version_dir(parent: &Path) -> Option<PathBuf> {
    let mut versions: Vec<String> = std::fs::read_dir(parent)
        .ok()?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();

    versions.sort_by(|a, b| compare_version_names(a, b));
    versions.last().map(|latest| parent.join(latest))
}

fn compare_version_names(a: &str, b: &str) -> Ordering {
    let key = |s: &str| -> Vec<u64> {
        s.split(|c: char| !c.is_ascii_digit())
            .filter(|part| !part.is_empty())
            .filter_map(|part| part.parse().ok())
            .collect()
    };
    key(a).cmp(&key(b)).then_with(|| a.cmp(b))
}
