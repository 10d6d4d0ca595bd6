//! Devices command

use anyhow::Result;
use apx_core::Adb;
use apx_core::device::Transport;

use crate::context::Context;

/// List serials of connected, authorized devices.
pub fn devices() -> Result<()> {
    let ctx = Context::load()?;
    let adb = Adb::locate(ctx.config.tools.adb.as_deref())?;
    let serials = adb.devices()?;

    if serials.is_empty() {
        ctx.reporter.info("No devices connected.");
        return Ok(());
    }
    for serial in serials {
        println!("{serial}");
    }
    Ok(())
}
