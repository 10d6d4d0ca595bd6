//! User configuration (`$APX_HOME/config.toml`).
//!
//! ```toml
//! [tools]
//! zipalign = "/opt/android-sdk/build-tools/35.0.0/zipalign"
//! adb = "/opt/android-sdk/platform-tools/adb"
//!
//! [signing]
//! common_name = "me"
//! keystore = "/home/me/.apx/release.keystore"
//! ```
//!
//! Every key is optional. CLI flags and `APX_*` variables take precedence.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ManifestError;

/// Explicit locations of the external tools. Unset tools are looked up on `$PATH`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolPaths {
    /// `zipalign` binary.
    pub zipalign: Option<PathBuf>,
    /// `apksigner` binary or wrapper script.
    pub apksigner: Option<PathBuf>,
    /// `keytool` binary.
    pub keytool: Option<PathBuf>,
    /// `adb` binary.
    pub adb: Option<PathBuf>,
}

/// Default signing identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SigningDefaults {
    /// Certificate common name and key alias.
    pub common_name: Option<String>,
    /// Keystore and key password.
    pub password: Option<String>,
    /// Keystore reused across runs.
    pub keystore: Option<PathBuf>,
}

/// Parsed configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Tool locations.
    #[serde(default)]
    pub tools: ToolPaths,
    /// Signing defaults.
    #[serde(default)]
    pub signing: SigningDefaults,
    /// Default cache root.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

impl Config {
    /// Load `path`, or return the defaults when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Read`] or [`ManifestError::Parse`] if the file
    /// exists but cannot be read or parsed.
    pub fn load_or_default(path: &Path) -> Result<Self, ManifestError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ManifestError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        toml::from_str(&content).map_err(|source| ManifestError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_config_is_default() {
        let tmp = tempdir().unwrap();
        let config = Config::load_or_default(&tmp.path().join("config.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_config() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(
            &path,
            "[tools]\nadb = \"/opt/sdk/adb\"\n\n[signing]\ncommon_name = \"me\"\n",
        )
        .unwrap();

        let config = Config::load_or_default(&path).unwrap();

        assert_eq!(config.tools.adb.as_deref(), Some(Path::new("/opt/sdk/adb")));
        assert!(config.tools.zipalign.is_none());
        assert_eq!(config.signing.common_name.as_deref(), Some("me"));
        assert!(config.cache_dir.is_none());
    }

    #[test]
    fn test_typo_is_rejected() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(&path, "[tools]\nzipalgin = \"/x\"\n").unwrap();
        assert!(matches!(
            Config::load_or_default(&path),
            Err(ManifestError::Parse { .. })
        ));
    }
}
