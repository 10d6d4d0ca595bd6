//! Device sessions: install, uninstall and log tailing on a connected device.
//!
//! A session moves through `Disconnected -> Opening -> Ready -> Closed`.
//! Opening resolves the device by serial and, for root authority, proves that
//! `su` works. Install and uninstall dispatch on the authority:
//!
//! - [`Authority::User`] installs through the package manager (`adb install`).
//! - [`Authority::Root`] bind-mounts the patched APK over the installed base
//!   APK and registers a boot script that re-applies the mount.

pub mod adb;
pub mod logcat;

use std::fmt;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::artifact::Artifact;
use crate::error::DeviceError;
use crate::reporter::Reporter;

pub use adb::{Adb, BackgroundProcess, Transport};
pub use logcat::{LogOutput, TailTiming};

/// How long the root probe may wait for a `su` grant.
pub const ROOT_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// World-writable staging area on the device.
const REMOTE_TMP: &str = "/data/local/tmp";

/// Where mounted payloads live.
const MOUNT_DIR: &str = "/data/adb/apx";

/// Late-start service scripts run by the root manager on boot.
const SERVICE_DIR: &str = "/data/adb/service.d";

/// How installs are performed on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authority {
    /// Superuser: mount the patched APK over the stock install.
    Root,
    /// Regular ADB user: install through the package manager.
    User,
}

impl Authority {
    /// Mount mode needs root; everything else installs as a user.
    pub fn for_mount(mount: bool) -> Self {
        if mount { Self::Root } else { Self::User }
    }
}

/// Lifecycle of a [`DeviceSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Constructed, nothing resolved yet.
    Disconnected,
    /// Resolving the device and probing privileges.
    Opening,
    /// Ready for install, uninstall and log tailing.
    Ready,
    /// Released; every operation fails.
    Closed,
}

/// A published file together with the artifact it was built from.
#[derive(Debug, Clone, Copy)]
pub struct InstallTarget<'a> {
    /// Originating artifact.
    pub artifact: &'a Artifact,
    /// File to deploy.
    pub payload: &'a Path,
}

/// Result of deploying one artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    /// Installed through the package manager.
    Installed,
    /// Bind-mounted over the stock APK.
    Mounted,
    /// Not deployed (split artifacts under root authority).
    Skipped,
}

/// A session bound to one device.
pub struct DeviceSession {
    transport: Arc<dyn Transport>,
    serial: String,
    authority: Authority,
    state: SessionState,
    reporter: Arc<dyn Reporter>,
}

impl fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("serial", &self.serial)
            .field("authority", &self.authority)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl DeviceSession {
    /// Create a disconnected session.
    pub fn new(
        transport: Arc<dyn Transport>,
        serial: impl Into<String>,
        authority: Authority,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            transport,
            serial: serial.into(),
            authority,
            state: SessionState::Disconnected,
            reporter,
        }
    }

    /// Create and open a session in one step.
    ///
    /// # Errors
    ///
    /// See [`DeviceSession::open`].
    pub fn connect(
        transport: Arc<dyn Transport>,
        serial: impl Into<String>,
        authority: Authority,
        reporter: Arc<dyn Reporter>,
    ) -> Result<Self, DeviceError> {
        let mut session = Self::new(transport, serial, authority, reporter);
        session.open()?;
        Ok(session)
    }

    /// Resolve the device and, for root authority, probe for `su`.
    ///
    /// Opening a ready session is a no-op. On failure the session returns to
    /// `Disconnected`.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::NotFound`] if no connected device has the
    /// serial, [`DeviceError::RootDenied`] if the root probe fails, and
    /// [`DeviceError::Closed`] if the session was already closed.
    pub fn open(&mut self) -> Result<(), DeviceError> {
        match self.state {
            SessionState::Ready => return Ok(()),
            SessionState::Closed => return Err(DeviceError::Closed(self.serial.clone())),
            SessionState::Disconnected | SessionState::Opening => {}
        }

        self.state = SessionState::Opening;
        let result = self.resolve().and_then(|()| self.probe_root());
        self.state = match result {
            Ok(()) => SessionState::Ready,
            Err(_) => SessionState::Disconnected,
        };
        if result.is_ok() {
            info!(serial = %self.serial, authority = ?self.authority, "device session ready");
        }
        result
    }

    fn resolve(&self) -> Result<(), DeviceError> {
        let connected = self.transport.devices()?;
        if connected.iter().any(|s| *s == self.serial) {
            Ok(())
        } else {
            Err(DeviceError::NotFound {
                serial: self.serial.clone(),
                connected,
            })
        }
    }

    fn probe_root(&self) -> Result<(), DeviceError> {
        if self.authority != Authority::Root {
            return Ok(());
        }

        let denied = |reason: String| DeviceError::RootDenied {
            serial: self.serial.clone(),
            reason,
        };

        match self
            .transport
            .probe(&self.serial, &["shell", "su", "-c", "exit"], ROOT_PROBE_TIMEOUT)
        {
            Ok(true) => Ok(()),
            Ok(false) => Err(denied("su exited unsuccessfully".to_string())),
            Err(e) => Err(denied(e.to_string())),
        }
    }

    /// Device serial.
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Install authority.
    pub fn authority(&self) -> Authority {
        self.authority
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    fn ensure_ready(&self) -> Result<(), DeviceError> {
        if self.state == SessionState::Ready {
            Ok(())
        } else {
            Err(DeviceError::Closed(self.serial.clone()))
        }
    }

    /// Deploy one artifact.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::Closed`] unless the session is ready, or the
    /// failing device command.
    pub fn install(&self, target: InstallTarget<'_>) -> Result<InstallOutcome, DeviceError> {
        self.ensure_ready()?;
        let package = validate_package(target.artifact.package())?;

        match self.authority {
            Authority::User => {
                let payload = target.payload.to_string_lossy();
                self.transport
                    .run(&self.serial, &["install", "-r", payload.as_ref()])?;
                self.reporter
                    .success(&format!("Installed {}", target.artifact.file_name()));
                Ok(InstallOutcome::Installed)
            }
            Authority::Root if !target.artifact.variant().is_base() => {
                self.reporter.warning(&format!(
                    "Skipping {}: mount replaces the base APK only",
                    target.artifact.file_name()
                ));
                Ok(InstallOutcome::Skipped)
            }
            Authority::Root => {
                self.mount(package, target.payload)?;
                self.reporter.success(&format!(
                    "Mounted {} over {package}",
                    target.artifact.file_name()
                ));
                Ok(InstallOutcome::Mounted)
            }
        }
    }

    /// Deploy a whole artifact set.
    ///
    /// With user authority and more than one artifact, everything goes through
    /// a single `install-multiple` transaction so splits install together with
    /// the base.
    ///
    /// # Errors
    ///
    /// Returns the first failing install.
    pub fn install_all(
        &self,
        targets: &[InstallTarget<'_>],
    ) -> Result<Vec<InstallOutcome>, DeviceError> {
        if self.authority == Authority::User && targets.len() > 1 {
            self.ensure_ready()?;
            for target in targets {
                validate_package(target.artifact.package())?;
            }

            let payloads: Vec<String> = targets
                .iter()
                .map(|t| t.payload.to_string_lossy().into_owned())
                .collect();
            let mut args = vec!["install-multiple", "-r"];
            args.extend(payloads.iter().map(String::as_str));
            self.transport.run(&self.serial, &args)?;

            self.reporter
                .success(&format!("Installed {} artifacts together", targets.len()));
            return Ok(vec![InstallOutcome::Installed; targets.len()]);
        }

        targets.iter().map(|t| self.install(*t)).collect()
    }

    /// Remove `package` from the device.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::Closed`] unless the session is ready, or the
    /// failing device command.
    pub fn uninstall(&self, package: &str) -> Result<(), DeviceError> {
        self.ensure_ready()?;
        let package = validate_package(package)?;

        match self.authority {
            Authority::User => {
                self.transport.run(&self.serial, &["uninstall", package])?;
                self.reporter.success(&format!("Uninstalled {package}"));
            }
            Authority::Root => {
                self.run_root_script(package, "unmount", &unmount_script(package))?;
                self.reporter.success(&format!("Unmounted {package}"));
            }
        }
        Ok(())
    }

    /// Tail logs for `package` until its process exits. Blocks the caller.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::LogTail`] if logcat cannot start or a poll fails.
    pub fn tail_logs(&self, package: &str, output: &LogOutput) -> Result<(), DeviceError> {
        self.tail_logs_with(package, output, TailTiming::default())
    }

    /// [`DeviceSession::tail_logs`] with explicit timing.
    ///
    /// # Errors
    ///
    /// See [`DeviceSession::tail_logs`].
    pub fn tail_logs_with(
        &self,
        package: &str,
        output: &LogOutput,
        timing: TailTiming,
    ) -> Result<(), DeviceError> {
        self.ensure_ready()?;
        let package = validate_package(package)?;
        self.reporter
            .info(&format!("Waiting for {package} to exit (logging)..."));
        logcat::tail(self.transport.as_ref(), &self.serial, package, output, timing)
    }

    /// Release the session. Idempotent.
    pub fn close(&mut self) {
        if self.state != SessionState::Closed {
            debug!(serial = %self.serial, "device session closed");
            self.state = SessionState::Closed;
        }
    }

    fn mount(&self, package: &str, payload: &Path) -> Result<(), DeviceError> {
        let staged = format!("{REMOTE_TMP}/apx-{package}.apk");
        let local = payload.to_string_lossy();
        self.transport
            .run(&self.serial, &["push", local.as_ref(), &staged])?;
        self.run_root_script(package, "mount", &mount_script(package, &staged))?;
        Ok(())
    }

    /// Push `script` to the device and execute it as root.
    fn run_root_script(&self, package: &str, label: &str, script: &str) -> Result<String, DeviceError> {
        let mut local = tempfile::Builder::new()
            .prefix("apx-")
            .suffix(".sh")
            .tempfile()?;
        local.write_all(script.as_bytes())?;
        local.flush()?;

        let remote = format!("{REMOTE_TMP}/apx-{label}-{package}.sh");
        let local_path = local.path().to_string_lossy();
        self.transport
            .run(&self.serial, &["push", local_path.as_ref(), &remote])?;

        let command = format!("'sh {remote}'");
        let result = self
            .transport
            .run(&self.serial, &["shell", "su", "-c", &command]);
        let _ = self.transport.run(&self.serial, &["shell", "rm", "-f", &remote]);
        result.map_err(DeviceError::from)
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Accept only Android application ids (`[A-Za-z0-9_.]`), which are also
/// safe to interpolate into device shell scripts.
fn validate_package(package: &str) -> Result<&str, DeviceError> {
    let valid = !package.is_empty()
        && package.contains('.')
        && package
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if valid {
        Ok(package)
    } else {
        Err(DeviceError::InvalidPackage(package.to_string()))
    }
}

fn base_path_lookup(package: &str) -> String {
    format!("base=$(pm path {package} | grep 'base.apk' | sed 's/^package://')")
}

fn boot_script(package: &str) -> String {
    let payload = format!("{MOUNT_DIR}/{package}.apk");
    format!(
        "#!/system/bin/sh\n\
         until [ \"$(getprop sys.boot_completed)\" = 1 ]; do sleep 1; done\n\
         {lookup}\n\
         [ -n \"$base\" ] || exit 0\n\
         chcon u:object_r:apk_data_file:s0 {payload}\n\
         mount -o bind {payload} \"$base\"\n",
        lookup = base_path_lookup(package),
    )
}

fn mount_script(package: &str, staged: &str) -> String {
    let payload = format!("{MOUNT_DIR}/{package}.apk");
    let service = format!("{SERVICE_DIR}/apx_{package}.sh");
    format!(
        "set -e\n\
         {lookup}\n\
         if [ -z \"$base\" ]; then echo \"Failure: {package} is not installed\" >&2; exit 1; fi\n\
         mkdir -p {MOUNT_DIR} {SERVICE_DIR}\n\
         mv {staged} {payload}\n\
         chmod 644 {payload}\n\
         chown system:system {payload}\n\
         chcon u:object_r:apk_data_file:s0 {payload}\n\
         am force-stop {package}\n\
         umount -l \"$base\" 2>/dev/null || true\n\
         mount -o bind {payload} \"$base\"\n\
         cat > {service} <<'APX_EOF'\n\
         {boot}APX_EOF\n\
         chmod 755 {service}\n",
        lookup = base_path_lookup(package),
        boot = boot_script(package),
    )
}

fn unmount_script(package: &str) -> String {
    format!(
        "{lookup}\n\
         am force-stop {package}\n\
         [ -n \"$base\" ] && umount -l \"$base\" 2>/dev/null\n\
         rm -f {MOUNT_DIR}/{package}.apk {SERVICE_DIR}/apx_{package}.sh\n",
        lookup = base_path_lookup(package),
    )
}

#[cfg(test)]
pub(crate) mod fake {
    //! In-memory transport recording every command.

    use super::*;
    use crate::error::StageError;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug, Default)]
    pub(crate) struct FakeTransport {
        pub(crate) connected: Vec<String>,
        pub(crate) root: bool,
        /// Number of polls that still report the process as running.
        pub(crate) running_polls: Mutex<usize>,
        pub(crate) fail_polls: bool,
        pub(crate) calls: Mutex<Vec<String>>,
        pub(crate) terminated: Arc<AtomicBool>,
    }

    impl FakeTransport {
        pub(crate) fn with_device(serial: &str) -> Self {
            Self {
                connected: vec![serial.to_string()],
                ..Self::default()
            }
        }

        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub(crate) fn terminated(&self) -> bool {
            self.terminated.load(Ordering::SeqCst)
        }

        fn record(&self, line: String) {
            self.calls.lock().unwrap().push(line);
        }
    }

    struct FakeChild(Arc<AtomicBool>);

    impl BackgroundProcess for FakeChild {
        fn terminate(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    impl Transport for FakeTransport {
        fn devices(&self) -> Result<Vec<String>, StageError> {
            self.record("devices".to_string());
            Ok(self.connected.clone())
        }

        fn run(&self, serial: &str, args: &[&str]) -> Result<String, StageError> {
            self.record(format!("{serial}: {}", args.join(" ")));
            if args.get(1) == Some(&"pidof") {
                if self.fail_polls {
                    return Err(StageError::Failed {
                        tool: "adb".to_string(),
                        code: Some(1),
                        stderr: "device offline".to_string(),
                    });
                }
                let mut remaining = self.running_polls.lock().unwrap();
                if *remaining > 0 {
                    *remaining -= 1;
                    return Ok("4242\n".to_string());
                }
            }
            Ok(String::new())
        }

        fn probe(&self, serial: &str, args: &[&str], _: Duration) -> Result<bool, StageError> {
            self.record(format!("{serial}: probe {}", args.join(" ")));
            Ok(self.root)
        }

        fn spawn(
            &self,
            serial: &str,
            args: &[&str],
            _: &LogOutput,
        ) -> Result<Box<dyn BackgroundProcess>, StageError> {
            self.record(format!("{serial}: spawn {}", args.join(" ")));
            Ok(Box::new(FakeChild(self.terminated.clone())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeTransport;
    use super::*;
    use crate::artifact::Variant;
    use crate::reporter::NullReporter;
    use std::path::PathBuf;

    fn session(transport: &Arc<FakeTransport>, authority: Authority) -> Result<DeviceSession, DeviceError> {
        DeviceSession::connect(transport.clone(), "device123", authority, Arc::new(NullReporter))
    }

    #[test]
    fn test_open_unknown_serial_is_not_found() {
        let transport = Arc::new(FakeTransport::with_device("emulator-5554"));
        let err = session(&transport, Authority::User).unwrap_err();
        assert!(matches!(err, DeviceError::NotFound { .. }));

        let mut pending = DeviceSession::new(
            transport.clone(),
            "device123",
            Authority::User,
            Arc::new(NullReporter),
        );
        assert!(pending.open().is_err());
        assert_eq!(pending.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_root_probe_failure_is_distinct() {
        let transport = Arc::new(FakeTransport::with_device("device123"));
        let err = session(&transport, Authority::Root).unwrap_err();
        assert!(matches!(err, DeviceError::RootDenied { .. }));
        assert!(transport.calls().contains(&"device123: probe shell su -c exit".to_string()));

        let rooted = Arc::new(FakeTransport {
            root: true,
            ..FakeTransport::with_device("device123")
        });
        assert_eq!(
            session(&rooted, Authority::Root).unwrap().state(),
            SessionState::Ready
        );
    }

    #[test]
    fn test_user_session_skips_root_probe() {
        let transport = Arc::new(FakeTransport::with_device("device123"));
        session(&transport, Authority::User).unwrap();
        assert!(!transport.calls().iter().any(|c| c.contains("probe")));
    }

    #[test]
    fn test_user_install_all_uses_one_transaction() {
        let transport = Arc::new(FakeTransport::with_device("device123"));
        let session = session(&transport, Authority::User).unwrap();

        let base = Artifact::new("/in/app.apk", "com.example", Variant::Base);
        let split = Artifact::new("/in/app_lang.apk", "com.example", Variant::Language);
        let base_out = PathBuf::from("/out/app.apk");
        let split_out = PathBuf::from("/out/app_lang.apk");
        let targets = [
            InstallTarget { artifact: &split, payload: &split_out },
            InstallTarget { artifact: &base, payload: &base_out },
        ];

        let outcomes = session.install_all(&targets).unwrap();

        assert_eq!(outcomes, [InstallOutcome::Installed, InstallOutcome::Installed]);
        assert!(transport.calls().contains(
            &"device123: install-multiple -r /out/app_lang.apk /out/app.apk".to_string()
        ));
    }

    #[test]
    fn test_root_install_mounts_base_and_skips_splits() {
        let transport = Arc::new(FakeTransport {
            root: true,
            ..FakeTransport::with_device("device123")
        });
        let session = session(&transport, Authority::Root).unwrap();

        let base = Artifact::new("/in/app.apk", "com.example", Variant::Base);
        let split = Artifact::new("/in/app_lang.apk", "com.example", Variant::Language);
        let base_out = PathBuf::from("/cache/aligned/app.apk");
        let split_out = PathBuf::from("/cache/aligned/app_lang.apk");

        let outcomes = session
            .install_all(&[
                InstallTarget { artifact: &split, payload: &split_out },
                InstallTarget { artifact: &base, payload: &base_out },
            ])
            .unwrap();

        assert_eq!(outcomes, [InstallOutcome::Skipped, InstallOutcome::Mounted]);
        let calls = transport.calls();
        assert!(calls.contains(
            &"device123: push /cache/aligned/app.apk /data/local/tmp/apx-com.example.apk".to_string()
        ));
        assert!(calls.contains(
            &"device123: shell su -c 'sh /data/local/tmp/apx-mount-com.example.sh'".to_string()
        ));
        assert!(!calls.iter().any(|c| c.contains("app_lang.apk")));
    }

    #[test]
    fn test_mount_script_registers_boot_remount() {
        let script = mount_script("com.example", "/data/local/tmp/apx-com.example.apk");
        assert!(script.contains("mount -o bind /data/adb/apx/com.example.apk \"$base\""));
        assert!(script.contains("cat > /data/adb/service.d/apx_com.example.sh <<'APX_EOF'"));
        assert!(script.contains("#!/system/bin/sh\n"));
        assert!(script.trim_end().ends_with("chmod 755 /data/adb/service.d/apx_com.example.sh"));
    }

    #[test]
    fn test_uninstall_dispatches_on_authority() {
        let transport = Arc::new(FakeTransport::with_device("device123"));
        session(&transport, Authority::User)
            .unwrap()
            .uninstall("com.example")
            .unwrap();
        assert!(transport.calls().contains(&"device123: uninstall com.example".to_string()));

        let rooted = Arc::new(FakeTransport {
            root: true,
            ..FakeTransport::with_device("device123")
        });
        session(&rooted, Authority::Root)
            .unwrap()
            .uninstall("com.example")
            .unwrap();
        assert!(rooted.calls().contains(
            &"device123: shell su -c 'sh /data/local/tmp/apx-unmount-com.example.sh'".to_string()
        ));
    }

    #[test]
    fn test_closed_session_refuses_work() {
        let transport = Arc::new(FakeTransport::with_device("device123"));
        let mut session = session(&transport, Authority::User).unwrap();
        session.close();
        session.close();

        assert_eq!(session.state(), SessionState::Closed);
        assert!(matches!(session.uninstall("com.example"), Err(DeviceError::Closed(_))));
        assert!(matches!(session.open(), Err(DeviceError::Closed(_))));
    }

    #[test]
    fn test_invalid_package_rejected() {
        let transport = Arc::new(FakeTransport::with_device("device123"));
        let session = session(&transport, Authority::User).unwrap();
        assert!(matches!(
            session.uninstall("com.example; reboot"),
            Err(DeviceError::InvalidPackage(_))
        ));
    }

    #[test]
    fn test_tail_logs_until_process_exits() {
        let transport = Arc::new(FakeTransport {
            running_polls: std::sync::Mutex::new(2),
            ..FakeTransport::with_device("device123")
        });
        let session = session(&transport, Authority::User).unwrap();
        let timing = TailTiming {
            grace: Duration::ZERO,
            interval: Duration::ZERO,
        };

        session
            .tail_logs_with("com.example", &LogOutput::Discard, timing)
            .unwrap();

        let calls = transport.calls();
        assert!(calls.contains(&"device123: spawn logcat -T 1 -e com.example".to_string()));
        assert_eq!(calls.iter().filter(|c| c.contains("pidof")).count(), 3);
        assert!(transport.terminated());
    }

    #[test]
    fn test_tail_logs_poll_failure_is_fatal() {
        let transport = Arc::new(FakeTransport {
            fail_polls: true,
            ..FakeTransport::with_device("device123")
        });
        let session = session(&transport, Authority::User).unwrap();
        let timing = TailTiming {
            grace: Duration::ZERO,
            interval: Duration::ZERO,
        };

        let err = session
            .tail_logs_with("com.example", &LogOutput::Discard, timing)
            .unwrap_err();

        assert!(matches!(err, DeviceError::LogTail { .. }));
        assert_eq!(transport.calls().iter().filter(|c| c.contains("pidof")).count(), 1);
        assert!(transport.terminated());
    }
}
