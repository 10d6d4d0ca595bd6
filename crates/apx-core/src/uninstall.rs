//! Standalone uninstall command path.

use std::sync::Arc;

use tracing::debug;

use crate::device::{Authority, DeviceSession, Transport};
use crate::error::{DeviceError, StageError};
use crate::reporter::Reporter;

/// Result of an uninstall request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UninstallOutcome {
    /// The package (or its mount) was removed.
    Removed,
    /// No device target was given; nothing was done.
    Skipped,
}

/// Remove `package` from the device `serial`.
///
/// Without a serial this reports an error and returns
/// [`UninstallOutcome::Skipped`]; `transport` is never called, so no device
/// operation happens.
///
/// # Errors
///
/// Returns the session's error if the device cannot be opened or the removal
/// fails.
pub fn uninstall<F>(
    serial: Option<&str>,
    package: &str,
    authority: Authority,
    transport: F,
    reporter: Arc<dyn Reporter>,
) -> Result<UninstallOutcome, DeviceError>
where
    F: FnOnce() -> Result<Arc<dyn Transport>, StageError>,
{
    let Some(serial) = serial else {
        reporter.error(&format!(
            "Cannot uninstall {package}: no device specified (use --device)"
        ));
        return Ok(UninstallOutcome::Skipped);
    };

    let mut session = DeviceSession::connect(transport()?, serial, authority, reporter)?;
    let result = session.uninstall(package);
    session.close();
    result?;

    debug!(serial, package, ?authority, "uninstall finished");
    Ok(UninstallOutcome::Removed)
}
