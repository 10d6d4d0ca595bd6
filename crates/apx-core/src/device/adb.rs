//! Device transport over the `adb` command-line client.

use std::ffi::OsString;
use std::fs::{self, File};
use std::path::Path;
use std::process::{Child, Stdio};
use std::time::Duration;

use crate::error::StageError;
use crate::tool::{self, Tool};

use super::LogOutput;

/// A process running in the background on behalf of a device session.
pub trait BackgroundProcess: Send {
    /// Stop the process and reap it. Safe to call on an exited process.
    fn terminate(&mut self);
}

impl BackgroundProcess for Child {
    fn terminate(&mut self) {
        tool::kill_quietly(self);
    }
}

/// Command primitives a device session is built on.
pub trait Transport: Send + Sync {
    /// Serials of connected, authorized devices.
    ///
    /// # Errors
    ///
    /// Returns a [`StageError`] if the device list cannot be queried.
    fn devices(&self) -> Result<Vec<String>, StageError>;

    /// Run a command against `serial` and return its stdout.
    ///
    /// # Errors
    ///
    /// Returns a [`StageError`] on spawn failure or non-zero exit.
    fn run(&self, serial: &str, args: &[&str]) -> Result<String, StageError>;

    /// Run a command against `serial` and report whether it exited
    /// successfully within `timeout`.
    ///
    /// # Errors
    ///
    /// Returns a [`StageError`] on spawn failure or timeout.
    fn probe(&self, serial: &str, args: &[&str], timeout: Duration) -> Result<bool, StageError>;

    /// Start a long-running command against `serial` with its output routed
    /// to `output`.
    ///
    /// # Errors
    ///
    /// Returns a [`StageError`] if the process cannot be started.
    fn spawn(
        &self,
        serial: &str,
        args: &[&str],
        output: &LogOutput,
    ) -> Result<Box<dyn BackgroundProcess>, StageError>;
}

/// `adb` client binary.
#[derive(Debug, Clone)]
pub struct Adb {
    tool: Tool,
}

impl Adb {
    /// Install hint for a missing `adb`.
    pub const HINT: &'static str =
        "Install the Android SDK platform-tools and add them to PATH, or set `adb` in config.toml";

    /// Wrap an already located `adb`.
    pub fn new(tool: Tool) -> Self {
        Self { tool }
    }

    /// Locate `adb` from config or `$PATH`.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::ToolNotFound`] if the binary cannot be found.
    pub fn locate(configured: Option<&Path>) -> Result<Self, StageError> {
        Tool::locate("adb", configured, Self::HINT).map(Self::new)
    }

    fn targeted(serial: &str, args: &[&str]) -> Vec<OsString> {
        let mut full: Vec<OsString> = vec!["-s".into(), serial.into()];
        full.extend(args.iter().map(OsString::from));
        full
    }
}

/// Parse `adb devices` output into the serials that are ready for use.
///
/// Devices listed as `offline` or `unauthorized` are skipped.
pub fn parse_devices(output: &str) -> Vec<String> {
    output
        .lines()
        .skip_while(|line| !line.starts_with("List of devices"))
        .skip(1)
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next()) {
                (Some(serial), Some("device")) => Some(serial.to_string()),
                _ => None,
            }
        })
        .collect()
}

impl Transport for Adb {
    fn devices(&self) -> Result<Vec<String>, StageError> {
        self.tool.run(["devices"]).map(|out| parse_devices(&out))
    }

    fn run(&self, serial: &str, args: &[&str]) -> Result<String, StageError> {
        let output = self.tool.run(Self::targeted(serial, args))?;
        // Older adb releases exit 0 even when the package manager refuses.
        if let Some(line) = output.lines().find(|l| l.trim_start().starts_with("Failure")) {
            return Err(StageError::Failed {
                tool: self.tool.name().to_string(),
                code: None,
                stderr: line.trim().to_string(),
            });
        }
        Ok(output)
    }

    fn probe(&self, serial: &str, args: &[&str], timeout: Duration) -> Result<bool, StageError> {
        self.tool
            .status_within(Self::targeted(serial, args), timeout)
            .map(|status| status.success())
    }

    fn spawn(
        &self,
        serial: &str,
        args: &[&str],
        output: &LogOutput,
    ) -> Result<Box<dyn BackgroundProcess>, StageError> {
        let (stdout, stderr) = match output {
            LogOutput::Inherit => (Stdio::inherit(), Stdio::inherit()),
            LogOutput::Discard => (Stdio::null(), Stdio::null()),
            LogOutput::File(path) => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                let file = File::create(path)?;
                (Stdio::from(file.try_clone()?), Stdio::from(file))
            }
        };

        let child = self
            .tool
            .spawn(Self::targeted(serial, args), stdout, stderr)?;
        Ok(Box::new(child))
    }
}
