use dirs::home_dir;
use std::path::{Path, PathBuf};

/// Returns the apx home directory, or None if the user's home cannot be resolved.
pub fn try_apx_home() -> Option<PathBuf> {
    if let Ok(val) = std::env::var("APX_HOME") {
        return Some(PathBuf::from(val));
    }
    home_dir().map(|h| h.join(".apx"))
}

/// Returns the apx home directory (`~/.apx`), falling back to `./.apx` when
/// neither `APX_HOME` nor the user's home directory is available.
pub fn apx_home() -> PathBuf {
    try_apx_home().unwrap_or_else(|| PathBuf::from(".apx"))
}

/// Default staging cache: ~/.apx/cache
pub fn cache_path() -> PathBuf {
    apx_home().join("cache")
}

/// User configuration file: ~/.apx/config.toml
pub fn config_path() -> PathBuf {
    apx_home().join("config.toml")
}

/// Logs directory: ~/.apx/logs
pub fn log_dir() -> PathBuf {
    apx_home().join("logs")
}

/// Generate a logcat capture path for a package.
pub fn logcat_path(package: &str) -> PathBuf {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_secs());
    log_dir().join(format!("logcat-{package}-{timestamp}.log"))
}

/// Extract the file name of a path as an owned string.
///
/// Staged files keep the name of the artifact they came from, so this is the
/// key that ties a file in `raw/`, `aligned/`, `signed/` and the output
/// directory back to one artifact.
pub fn file_name_of(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

/// Default keystore location: `<output-dir>/<base-file-stem>.keystore`.
pub fn default_keystore_path(output_dir: &Path, base_file: &Path) -> PathBuf {
    let stem = base_file
        .file_stem()
        .map_or_else(|| "apx".to_string(), |s| s.to_string_lossy().into_owned());
    output_dir.join(format!("{stem}.keystore"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_keystore_uses_base_stem() {
        let ks = default_keystore_path(Path::new("/out"), Path::new("/in/app.apk"));
        assert_eq!(ks, PathBuf::from("/out/app.keystore"));
    }

    #[test]
    fn test_file_name_of() {
        assert_eq!(
            file_name_of(Path::new("/a/b/app_lang.apk")).as_deref(),
            Some("app_lang.apk")
        );
        assert_eq!(file_name_of(Path::new("/")), None);
    }
}
