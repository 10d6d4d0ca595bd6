//! Signing stage.
//!
//! Every artifact of a run is signed with the same keystore, alias and
//! password. Android rejects a split set whose signers differ, so the identity
//! is resolved once per run and threaded through each call.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::StageError;
use crate::paths::default_keystore_path;
use crate::tool::{self, Tool};

/// Default certificate common name, also used as the key alias.
pub const DEFAULT_COMMON_NAME: &str = "apx";

/// Default keystore and key password. keytool requires at least six characters.
pub const DEFAULT_PASSWORD: &str = "apx-keystore";

/// Resolved signing identity for one run.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningOptions {
    /// Certificate common name and key alias.
    pub common_name: String,
    /// Keystore and key password.
    pub password: String,
    /// Keystore file, created on first use if missing.
    pub keystore: PathBuf,
}

impl std::fmt::Debug for SigningOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningOptions")
            .field("common_name", &self.common_name)
            .field("password", &"<redacted>")
            .field("keystore", &self.keystore)
            .finish()
    }
}

impl SigningOptions {
    /// Resolve the run's signing identity.
    ///
    /// The keystore is the explicit path if given, otherwise
    /// `<output_dir>/<base-file-stem>.keystore`.
    pub fn resolve(
        common_name: Option<String>,
        password: Option<String>,
        keystore: Option<PathBuf>,
        output_dir: &Path,
        base_file: &Path,
    ) -> Self {
        Self {
            common_name: common_name.unwrap_or_else(|| DEFAULT_COMMON_NAME.to_string()),
            password: password.unwrap_or_else(|| DEFAULT_PASSWORD.to_string()),
            keystore: keystore.unwrap_or_else(|| default_keystore_path(output_dir, base_file)),
        }
    }
}

/// APK signing transform.
pub trait Signer: Send + Sync {
    /// Sign `input` into `output` with `options`.
    ///
    /// # Errors
    ///
    /// Returns a [`StageError`] if signing fails; the run aborts.
    fn sign(&self, input: &Path, output: &Path, options: &SigningOptions) -> Result<(), StageError>;
}

/// `apksigner` from the Android build-tools, with `keytool` to mint the
/// keystore on first use.
#[derive(Debug, Clone)]
pub struct ApkSigner {
    apksigner: Tool,
    keytool: Tool,
}

impl ApkSigner {
    /// Install hint for a missing `apksigner`.
    pub const HINT: &'static str =
        "Install the Android SDK build-tools and add them to PATH, or set `apksigner` in config.toml";

    /// Install hint for a missing `keytool`.
    pub const KEYTOOL_HINT: &'static str =
        "Install a Java runtime (keytool ships with the JDK), or set `keytool` in config.toml";

    /// Wrap already located tools.
    pub fn new(apksigner: Tool, keytool: Tool) -> Self {
        Self { apksigner, keytool }
    }

    /// Locate `apksigner` and `keytool` from config or `$PATH`.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::ToolNotFound`] if either binary is missing.
    pub fn locate(apksigner: Option<&Path>, keytool: Option<&Path>) -> Result<Self, StageError> {
        Ok(Self::new(
            Tool::locate("apksigner", apksigner, Self::HINT)?,
            Tool::locate("keytool", keytool, Self::KEYTOOL_HINT)?,
        ))
    }

    /// Create the keystore if it does not exist yet.
    fn ensure_keystore(&self, options: &SigningOptions) -> Result<(), StageError> {
        if options.keystore.exists() {
            return Ok(());
        }
        if let Some(parent) = options.keystore.parent() {
            fs::create_dir_all(parent)?;
        }

        info!(keystore = %options.keystore.display(), "creating keystore");
        let mut args: Vec<OsString> = [
            "-genkeypair",
            "-noprompt",
            "-storetype",
            "PKCS12",
            "-keyalg",
            "RSA",
            "-keysize",
            "2048",
            "-validity",
            "10000",
        ]
        .iter()
        .map(OsString::from)
        .collect();
        args.push("-keystore".into());
        args.push(options.keystore.clone().into_os_string());
        args.push("-alias".into());
        args.push(options.common_name.clone().into());
        args.push("-dname".into());
        args.push(format!("CN={}", options.common_name).into());
        args.push("-storepass".into());
        args.push(options.password.clone().into());
        args.push("-keypass".into());
        args.push(options.password.clone().into());

        self.keytool.run(&args)?;
        tool::expect_output(self.keytool.name(), &options.keystore)
    }
}

impl Signer for ApkSigner {
    fn sign(&self, input: &Path, output: &Path, options: &SigningOptions) -> Result<(), StageError> {
        self.ensure_keystore(options)?;

        let pass = format!("pass:{}", options.password);
        let args: Vec<OsString> = vec![
            "sign".into(),
            "--ks".into(),
            options.keystore.clone().into_os_string(),
            "--ks-key-alias".into(),
            options.common_name.clone().into(),
            "--ks-pass".into(),
            pass.clone().into(),
            "--key-pass".into(),
            pass.into(),
            "--out".into(),
            output.as_os_str().to_owned(),
            input.as_os_str().to_owned(),
        ];

        self.apksigner.run(&args)?;
        tool::expect_output(self.apksigner.name(), output)
    }
}
