//! Alignment stage.
//!
//! A pure file-to-file transform: `raw/<name>` in, `aligned/<name>` out.
//! Implementations must be deterministic and idempotent, so re-aligning an
//! already aligned APK leaves it installable.

use std::ffi::OsStr;
use std::path::Path;

use crate::error::StageError;
use crate::tool::{self, Tool};

/// Zip alignment transform.
pub trait Aligner: Send + Sync {
    /// Align `input` into `output`, overwriting `output` if it exists.
    ///
    /// # Errors
    ///
    /// Returns a [`StageError`] if the transform fails; the run aborts.
    fn align(&self, input: &Path, output: &Path) -> Result<(), StageError>;
}

/// Byte boundary for stored entries.
const ALIGNMENT: &str = "4";

/// `zipalign` from the Android build-tools.
///
/// Runs `zipalign -p -f 4 <in> <out>`: 4-byte alignment for stored entries,
/// page alignment for uncompressed native libraries, overwrite enabled.
#[derive(Debug, Clone)]
pub struct ZipAlign {
    tool: Tool,
}

impl ZipAlign {
    /// Install hint for a missing `zipalign`.
    pub const HINT: &'static str =
        "Install the Android SDK build-tools and add them to PATH, or set `zipalign` in config.toml";

    /// Wrap an already located `zipalign`.
    pub fn new(tool: Tool) -> Self {
        Self { tool }
    }

    /// Locate `zipalign` from config or `$PATH`.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::ToolNotFound`] if the binary cannot be found.
    pub fn locate(configured: Option<&Path>) -> Result<Self, StageError> {
        Tool::locate("zipalign", configured, Self::HINT).map(Self::new)
    }
}

impl Aligner for ZipAlign {
    fn align(&self, input: &Path, output: &Path) -> Result<(), StageError> {
        self.tool.run([
            OsStr::new("-p"),
            OsStr::new("-f"),
            OsStr::new(ALIGNMENT),
            input.as_os_str(),
            output.as_os_str(),
        ])?;
        tool::expect_output(self.tool.name(), output)
    }
}
