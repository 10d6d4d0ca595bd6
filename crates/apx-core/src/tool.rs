//! External tool invocation.
//!
//! zipalign, apksigner, keytool and adb are all driven the same way: locate
//! the binary, run it with arguments, and turn a non-zero exit into a
//! [`StageError`] carrying the tool's stderr.

use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Output, Stdio};
use std::time::Duration;

use tracing::debug;
use wait_timeout::ChildExt;

use crate::error::StageError;

/// A located external tool.
#[derive(Debug, Clone)]
pub struct Tool {
    name: &'static str,
    program: PathBuf,
    hint: &'static str,
}

impl Tool {
    /// Wrap a tool without looking it up. Spawn failures surface on first use.
    pub fn new(name: &'static str, program: impl Into<PathBuf>, hint: &'static str) -> Self {
        Self {
            name,
            program: program.into(),
            hint,
        }
    }

    /// Resolve `name` to a binary: the configured path if given, else `$PATH`.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::ToolNotFound`] if the configured path does not
    /// exist or the name is not on `$PATH`.
    pub fn locate(
        name: &'static str,
        configured: Option<&Path>,
        hint: &'static str,
    ) -> Result<Self, StageError> {
        let not_found = || StageError::ToolNotFound {
            tool: name.to_string(),
            hint,
        };

        let program = match configured {
            Some(path) if path.exists() => path.to_path_buf(),
            Some(_) => return Err(not_found()),
            None => which::which(name).map_err(|_| not_found())?,
        };

        Ok(Self::new(name, program, hint))
    }

    /// Tool name used in messages.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// A bare command for this tool, for callers that need custom stdio.
    pub fn command(&self) -> Command {
        Command::new(&self.program)
    }

    fn spawn_error(&self, e: io::Error) -> StageError {
        if e.kind() == io::ErrorKind::NotFound {
            StageError::ToolNotFound {
                tool: self.name.to_string(),
                hint: self.hint,
            }
        } else {
            StageError::Spawn {
                tool: self.name.to_string(),
                source: e,
            }
        }
    }

    /// Run to completion and capture output, without judging the exit status.
    ///
    /// # Errors
    ///
    /// Returns an error only if the process cannot be spawned.
    pub fn output<I, S>(&self, args: I) -> Result<Output, StageError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = self.command();
        cmd.args(args);
        debug!(tool = self.name, command = ?cmd, "running");
        cmd.output().map_err(|e| self.spawn_error(e))
    }

    /// Run to completion and return stdout, failing on a non-zero exit.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Failed`] with the tool's stderr if it exits
    /// unsuccessfully, or a spawn error.
    pub fn run<I, S>(&self, args: I) -> Result<String, StageError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = self.output(args)?;
        if !output.status.success() {
            return Err(self.failure(&output));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Build the failure for an unsuccessful run.
    pub fn failure(&self, output: &Output) -> StageError {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let stderr = if stderr.is_empty() {
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        } else {
            stderr
        };
        StageError::Failed {
            tool: self.name.to_string(),
            code: output.status.code(),
            stderr,
        }
    }

    /// Run with stdio discarded, killing the process if it outlives `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Timeout`] if the deadline elapses, or a spawn
    /// error.
    pub fn status_within<I, S>(&self, args: I, timeout: Duration) -> Result<ExitStatus, StageError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = self.command();
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        debug!(tool = self.name, command = ?cmd, ?timeout, "running with deadline");

        let mut child = cmd.spawn().map_err(|e| self.spawn_error(e))?;
        match child.wait_timeout(timeout)? {
            Some(status) => Ok(status),
            None => {
                kill_quietly(&mut child);
                Err(StageError::Timeout {
                    tool: self.name.to_string(),
                    secs: timeout.as_secs(),
                })
            }
        }
    }

    /// Spawn with the given stdio for stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns a spawn error.
    pub fn spawn<I, S>(&self, args: I, stdout: Stdio, stderr: Stdio) -> Result<Child, StageError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = self.command();
        cmd.args(args).stdin(Stdio::null()).stdout(stdout).stderr(stderr);
        debug!(tool = self.name, command = ?cmd, "spawning");
        cmd.spawn().map_err(|e| self.spawn_error(e))
    }
}

/// Kill and reap a child, ignoring an already-exited process.
pub fn kill_quietly(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Fail with [`StageError::MissingOutput`] unless `path` exists after a tool ran.
///
/// # Errors
///
/// Returns [`StageError::MissingOutput`] when the file is absent.
pub fn expect_output(tool: &str, path: &Path) -> Result<(), StageError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(StageError::MissingOutput {
            tool: tool.to_string(),
            path: path.to_path_buf(),
        })
    }
}
