//! Domain-specific errors for the build-and-deploy pipeline

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failures of the staging cache.
#[derive(Error, Debug)]
pub enum CacheError {
    /// A stale cache could not be removed at run start; reusing it is unsafe.
    #[error("Failed to clear cache directory {}: {source}", .path.display())]
    Purge {
        /// Cache root that could not be deleted.
        path: PathBuf,
        /// Underlying filesystem error.
        #[source]
        source: io::Error,
    },

    /// A staging directory could not be created.
    #[error("Failed to create staging directory {}: {source}", .path.display())]
    Create {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying filesystem error.
        #[source]
        source: io::Error,
    },
}

/// Failures while materializing a patched artifact into `raw/`.
#[derive(Error, Debug)]
pub enum WriteError {
    /// Copying or persisting the archive failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The archive could not be read or written.
    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// Walking the patched resource directory failed.
    #[error("Failed to read patched resources: {0}")]
    Resources(#[from] walkdir::Error),

    /// A resource path cannot be expressed as an archive entry name.
    #[error("Invalid resource path: {}", .0.display())]
    InvalidEntry(PathBuf),
}

/// Failures of an external file-to-file transform (zipalign, apksigner, keytool)
/// or of the publish copy.
#[derive(Error, Debug)]
pub enum StageError {
    /// The tool binary could not be located.
    #[error("'{tool}' not found. {hint}")]
    ToolNotFound {
        /// Tool name as invoked.
        tool: String,
        /// Installation hint shown to the user.
        hint: &'static str,
    },

    /// The tool could not be started.
    #[error("Failed to spawn {tool}: {source}")]
    Spawn {
        /// Tool name as invoked.
        tool: String,
        /// Underlying spawn error.
        #[source]
        source: io::Error,
    },

    /// The tool ran and exited unsuccessfully.
    #[error("{tool} failed with exit code {code:?}: {stderr}")]
    Failed {
        /// Tool name as invoked.
        tool: String,
        /// Exit code, if the process was not killed by a signal.
        code: Option<i32>,
        /// Trimmed standard error of the tool.
        stderr: String,
    },

    /// The tool did not finish within its deadline.
    #[error("{tool} timed out after {secs}s")]
    Timeout {
        /// Tool name as invoked.
        tool: String,
        /// Deadline that elapsed.
        secs: u64,
    },

    /// The tool reported success but did not produce its output file.
    #[error("{tool} did not produce {}", .path.display())]
    MissingOutput {
        /// Tool name as invoked.
        tool: String,
        /// Expected output path.
        path: PathBuf,
    },

    /// Filesystem error around the transform.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Failures of a device session.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// No connected device matches the requested serial.
    #[error("Device '{serial}' not found. Connected: {}", serial_list(.connected))]
    NotFound {
        /// Requested serial.
        serial: String,
        /// Serials that were connected at lookup time.
        connected: Vec<String>,
    },

    /// The root privilege probe was refused or failed.
    #[error("Root access denied on '{serial}': {reason}")]
    RootDenied {
        /// Device serial.
        serial: String,
        /// Why the probe failed.
        reason: String,
    },

    /// An operation was attempted on a session that is not ready.
    #[error("Device session for '{0}' is closed")]
    Closed(String),

    /// A package name that is not a valid Android application id.
    #[error("Invalid package name: {0}")]
    InvalidPackage(String),

    /// A device command failed.
    #[error("Device command failed: {0}")]
    Command(#[from] StageError),

    /// Log tailing failed while polling the monitored process.
    #[error("Log tail for '{package}' failed: {source}")]
    LogTail {
        /// Monitored package.
        package: String,
        /// Underlying failure.
        #[source]
        source: Box<DeviceError>,
    },

    /// Local filesystem error (e.g. opening a log file).
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

fn serial_list(serials: &[String]) -> String {
    if serials.is_empty() {
        "none".to_string()
    } else {
        serials.join(", ")
    }
}

/// Failures loading a build manifest.
#[derive(Error, Debug)]
pub enum ManifestError {
    /// The manifest file could not be read.
    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        /// Manifest path.
        path: PathBuf,
        /// Underlying filesystem error.
        #[source]
        source: io::Error,
    },

    /// The manifest is not valid TOML for the expected schema.
    #[error("Failed to parse {}: {source}", .path.display())]
    Parse {
        /// Manifest path.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: toml::de::Error,
    },

    /// A dex file referenced by the manifest could not be loaded.
    #[error("Failed to load dex file {}: {source}", .path.display())]
    Dex {
        /// Dex file path.
        path: PathBuf,
        /// Underlying filesystem error.
        #[source]
        source: io::Error,
    },

    /// The described artifacts violate an artifact-set invariant.
    #[error("Invalid artifact set: {0}")]
    Invalid(String),
}

/// Top-level error of a pipeline run. Every variant aborts the run.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Staging cache could not be prepared.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Writing the raw artifact failed.
    #[error("Failed to write {artifact}: {source}")]
    Write {
        /// Artifact file name.
        artifact: String,
        /// Underlying failure.
        #[source]
        source: WriteError,
    },

    /// Aligning the artifact failed.
    #[error("Failed to align {artifact}: {source}")]
    Align {
        /// Artifact file name.
        artifact: String,
        /// Underlying failure.
        #[source]
        source: StageError,
    },

    /// Signing the artifact failed.
    #[error("Failed to sign {artifact}: {source}")]
    Sign {
        /// Artifact file name.
        artifact: String,
        /// Underlying failure.
        #[source]
        source: StageError,
    },

    /// Publishing the artifact failed.
    #[error("Failed to publish {artifact}: {source}")]
    Publish {
        /// Artifact file name.
        artifact: String,
        /// Underlying failure.
        #[source]
        source: StageError,
    },

    /// Publishing would overwrite the artifact's own source file.
    #[error("Output {path} is the source of {artifact}; choose another output directory")]
    OutputIsSource {
        /// Artifact file name.
        artifact: String,
        /// The colliding path.
        path: PathBuf,
    },

    /// Deploying to the device failed.
    #[error(transparent)]
    Device(#[from] DeviceError),
}

impl PipelineError {
    /// Name of the artifact the failure belongs to, if it is stage-specific.
    pub fn artifact(&self) -> Option<&str> {
        match self {
            Self::Write { artifact, .. }
            | Self::Align { artifact, .. }
            | Self::Sign { artifact, .. }
            | Self::Publish { artifact, .. }
            | Self::OutputIsSource { artifact, .. } => Some(artifact),
            Self::Cache(_) | Self::Device(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_lists_connected_devices() {
        let err = DeviceError::NotFound {
            serial: "device123".to_string(),
            connected: vec!["emulator-5554".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Device 'device123' not found. Connected: emulator-5554"
        );

        let err = DeviceError::NotFound {
            serial: "device123".to_string(),
            connected: vec![],
        };
        assert!(err.to_string().ends_with("Connected: none"));
    }

    #[test]
    fn test_stage_errors_carry_artifact() {
        let err = PipelineError::Align {
            artifact: "app.apk".to_string(),
            source: StageError::Failed {
                tool: "zipalign".to_string(),
                code: Some(1),
                stderr: "bad zip".to_string(),
            },
        };
        assert_eq!(err.artifact(), Some("app.apk"));
        assert!(err.to_string().contains("zipalign failed"));
    }
}
