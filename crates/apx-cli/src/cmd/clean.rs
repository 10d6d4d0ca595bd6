//! Clean command: drop the staging cache.

use std::io;
use std::path::PathBuf;

use anyhow::{Context as _, Result};

use crate::context::Context;

/// Remove the cache root (or `cache` if given).
pub fn clean(cache: Option<PathBuf>) -> Result<()> {
    let ctx = Context::load()?;
    let dir = ctx.cache_dir(cache);

    match std::fs::remove_dir_all(&dir) {
        Ok(()) => ctx
            .reporter
            .success(&format!("Removed {}", dir.display())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            ctx.reporter.info("Cache is already clean.");
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to remove {}", dir.display()));
        }
    }
    Ok(())
}
