//! Uninstall command

use std::sync::Arc;

use anyhow::Result;
use apx_core::Adb;
use apx_core::device::{Authority, Transport};
use apx_core::uninstall::{self, UninstallOutcome};
use tracing::debug;

use crate::context::Context;

/// Remove `package` from `device`. Without a device this reports an error and
/// exits successfully.
pub fn uninstall(package: &str, device: Option<&str>, unmount: bool) -> Result<()> {
    let ctx = Context::load()?;
    let adb_path = ctx.config.tools.adb.clone();

    let outcome = uninstall::uninstall(
        device,
        package,
        Authority::for_mount(unmount),
        || Adb::locate(adb_path.as_deref()).map(|adb| Arc::new(adb) as Arc<dyn Transport>),
        ctx.reporter.clone(),
    )?;

    if outcome == UninstallOutcome::Skipped {
        debug!(package, "uninstall skipped");
    }
    Ok(())
}
