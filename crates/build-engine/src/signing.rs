//! APK Signing
//!
//! Sign APKs using keystore and apksigner, aligning them first when
//! zipalign is available.

use std::path::{Path, PathBuf};

use apkforge_core::{log_line, BuildCallback, BuildResult, BuildStep, SigningConfig};
use async_trait::async_trait;
use tracing::info;

use crate::process::{run_tool, ToolCommand};

/// Signs an APK in place
pub struct ApkSign {
    apksigner: PathBuf,
    java: PathBuf,
    zipalign: Option<PathBuf>,
    signing: SigningConfig,
    apk: PathBuf,
}

impl ApkSign {
    pub fn new(
        apksigner: impl Into<PathBuf>,
        java: impl Into<PathBuf>,
        signing: SigningConfig,
        apk: impl Into<PathBuf>,
    ) -> Self {
        Self {
            apksigner: apksigner.into(),
            java: java.into(),
            zipalign: None,
            signing,
            apk: apk.into(),
        }
    }

    /// Run `zipalign -p 4` before signing
    pub fn with_zipalign(mut self, zipalign: impl Into<PathBuf>) -> Self {
        self.zipalign = Some(zipalign.into());
        self
    }

    /// The `apksigner sign` invocation
    pub fn command(&self) -> ToolCommand {
        ToolCommand::tool(&self.apksigner, &self.java)
            .arg("sign")
            .arg("--ks")
            .arg(&self.signing.keystore_path)
            .arg("--ks-pass")
            .secret_arg(format!("pass:{}", self.signing.keystore_password))
            .arg("--key-pass")
            .secret_arg(format!("pass:{}", self.signing.effective_key_password()))
            .arg("--ks-key-alias")
            .arg(&self.signing.key_alias)
            .arg(&self.apk)
    }

    async fn align(&self, zipalign: &Path, callback: Option<&dyn BuildCallback>) -> BuildResult {
        let aligned = self.apk.with_extension("aligned.apk");
        let command = ToolCommand::tool(zipalign, &self.java)
            .args(["-f", "-p", "4"])
            .arg(&self.apk)
            .arg(&aligned);

        let result = run_tool(command, callback, "APK aligned").await;
        if !result.success {
            let _ = tokio::fs::remove_file(&aligned).await;
            return result;
        }

        match tokio::fs::rename(&aligned, &self.apk).await {
            Ok(()) => result,
            Err(e) => BuildResult::failure(format!("Failed to replace {} with aligned APK: {}", self.apk.display(), e)),
        }
    }
}

#[async_trait]
impl BuildStep for ApkSign {
    fn name(&self) -> &str {
        "ApkSign"
    }

    async fn execute(&mut self, callback: Option<&dyn BuildCallback>) -> BuildResult {
        if !self.apk.is_file() {
            return BuildResult::failure(format!("APK not found: {}", self.apk.display()));
        }
        if !self.signing.keystore_path.is_file() {
            return BuildResult::failure(format!(
                "Keystore not found: {}",
                self.signing.keystore_path.display()
            ));
        }

        let mut transcript = String::new();
        if let Some(zipalign) = self.zipalign.clone() {
            let aligned = self.align(&zipalign, callback).await;
            if !aligned.success {
                return aligned;
            }
            transcript.push_str(&aligned.output);
            transcript.push('\n');
        }

        info!("Signing APK: {:?}", self.apk);
        log_line(callback, &format!("Signing {}", self.apk.display()));
        let signed = run_tool(self.command(), callback, "APK signed").await;
        if signed.success {
            info!("APK signed successfully: {:?}", self.apk);
        }

        transcript.push_str(&signed.output);
        BuildResult {
            success: signed.success,
            output: transcript,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn signing(dir: &Path) -> SigningConfig {
        let keystore = dir.join("release.jks");
        std::fs::write(&keystore, "keystore").unwrap();
        SigningConfig {
            keystore_path: keystore,
            keystore_password: "storepw".into(),
            key_alias: "release".into(),
            key_password: None,
        }
    }

    #[test]
    fn test_command_line() {
        let config = SigningConfig {
            keystore_path: PathBuf::from("/keys/release.jks"),
            keystore_password: "storepw".into(),
            key_alias: "release".into(),
            key_password: Some("keypw".into()),
        };
        let step = ApkSign::new("/sdk/lib/apksigner.jar", "/jdk/bin/java", config, "/build/app.apk");

        assert_eq!(
            step.command().display(),
            "/jdk/bin/java -jar /sdk/lib/apksigner.jar sign --ks /keys/release.jks --ks-pass **** --key-pass **** --ks-key-alias release /build/app.apk"
        );
    }

    #[tokio::test]
    async fn test_missing_keystore_fails() {
        let dir = TempDir::new().unwrap();
        let apk = dir.path().join("app.apk");
        std::fs::write(&apk, "apk").unwrap();
        let mut config = signing(dir.path());
        config.keystore_path = dir.path().join("missing.jks");

        let result = ApkSign::new("apksigner", "java", config, &apk).execute(None).await;

        assert!(!result.success);
        assert!(result.output.starts_with("Keystore not found"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_success_follows_exit_status() {
        let dir = TempDir::new().unwrap();
        let apk = dir.path().join("app.apk");
        std::fs::write(&apk, "apk").unwrap();

        let ok = dir.path().join("ok.sh");
        std::fs::write(&ok, format!("echo \"$@\" > {}\n", dir.path().join("args").display())).unwrap();
        let result = ApkSign::new(&ok, "java", signing(dir.path()), &apk).execute(None).await;
        assert!(result.success, "{}", result.output);
        let args = std::fs::read_to_string(dir.path().join("args")).unwrap();
        assert!(args.contains("--ks-pass pass:storepw --key-pass pass:storepw --ks-key-alias release"));

        let bad = dir.path().join("bad.sh");
        std::fs::write(&bad, "echo keystore was tampered with >&2\nexit 1\n").unwrap();
        let result = ApkSign::new(&bad, "java", signing(dir.path()), &apk).execute(None).await;
        assert!(!result.success);
        assert!(result.output.contains("keystore was tampered with"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_aligns_before_signing() {
        let dir = TempDir::new().unwrap();
        let apk = dir.path().join("app.apk");
        std::fs::write(&apk, "unaligned").unwrap();

        // zipalign -f -p 4 <in> <out>
        let zipalign = dir.path().join("zipalign.sh");
        std::fs::write(&zipalign, "echo aligned > \"$5\"\n").unwrap();
        let signer = dir.path().join("signer.sh");
        std::fs::write(&signer, "true\n").unwrap();

        let result = ApkSign::new(&signer, "java", signing(dir.path()), &apk)
            .with_zipalign(&zipalign)
            .execute(None)
            .await;

        assert!(result.success, "{}", result.output);
        assert_eq!(std::fs::read_to_string(&apk).unwrap(), "aligned\n");
        assert!(!dir.path().join("app.aligned.apk").exists());
    }
}
