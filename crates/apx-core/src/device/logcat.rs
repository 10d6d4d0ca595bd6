//! Log tailing for a deployed package.
//!
//! A logcat process is started for the package, the caller waits a fixed
//! grace period for the app to come up, then polls the device once per
//! interval until the package's process is gone. The wait blocks the calling
//! thread with no timeout: an app that never exits keeps the run waiting.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::error::DeviceError;

use super::adb::Transport;

/// Where logcat output goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutput {
    /// Stream to this process's stdout and stderr.
    Inherit,
    /// Drop the output; only the wait-for-exit behaviour is wanted.
    Discard,
    /// Write to a log file.
    File(PathBuf),
}

/// Wait before the first poll, giving the app time to start.
pub const STARTUP_GRACE: Duration = Duration::from_secs(3);

/// Delay between process checks.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Timing of the log tail.
#[derive(Debug, Clone, Copy)]
pub struct TailTiming {
    /// Wait before the first poll.
    pub grace: Duration,
    /// Delay between polls.
    pub interval: Duration,
}

impl Default for TailTiming {
    fn default() -> Self {
        Self {
            grace: STARTUP_GRACE,
            interval: POLL_INTERVAL,
        }
    }
}

/// Whether `package` has a live process on the device.
///
/// # Errors
///
/// Returns the transport failure; an absent process is `Ok(false)`.
pub fn is_running(
    transport: &dyn Transport,
    serial: &str,
    package: &str,
) -> Result<bool, DeviceError> {
    // `|| true` keeps a missing process from looking like a transport failure.
    let out = transport.run(serial, &["shell", "pidof", package, "||", "true"])?;
    Ok(!out.trim().is_empty())
}

/// Tail logs for `package` until its process exits.
///
/// # Errors
///
/// Returns [`DeviceError::LogTail`] if logcat cannot be started or a poll
/// fails. Polls are not retried.
pub fn tail(
    transport: &dyn Transport,
    serial: &str,
    package: &str,
    output: &LogOutput,
    timing: TailTiming,
) -> Result<(), DeviceError> {
    let wrap = |source: DeviceError| DeviceError::LogTail {
        package: package.to_string(),
        source: Box::new(source),
    };

    let mut logcat = transport
        .spawn(serial, &["logcat", "-T", "1", "-e", package], output)
        .map_err(|e| wrap(e.into()))?;
    debug!(package, ?output, "logcat started");

    thread::sleep(timing.grace);

    let result = loop {
        match is_running(transport, serial, package) {
            Ok(true) => thread::sleep(timing.interval),
            Ok(false) => break Ok(()),
            Err(e) => break Err(wrap(e)),
        }
    };

    logcat.terminate();
    debug!(package, "logcat stopped");
    result
}
