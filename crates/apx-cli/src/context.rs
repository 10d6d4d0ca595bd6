//! Shared command context.
//!
//! Groups the loaded configuration and the console reporter so each command
//! resolves settings the same way: flag, then environment, then config file,
//! then built-in default.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use apx_core::{Config, Reporter};

use crate::ui::Console;

/// State shared by every subcommand.
#[derive(Clone)]
pub struct Context {
    pub config: Config,
    pub reporter: Arc<dyn Reporter>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Context {
    pub fn new(config: Config, reporter: Arc<dyn Reporter>) -> Self {
        Self { config, reporter }
    }

    /// Load `$APX_HOME/config.toml` and attach a console reporter.
    pub fn load() -> Result<Self> {
        let path = apx_core::config_path();
        let config = Config::load_or_default(&path)
            .with_context(|| format!("Failed to load {}", path.display()))?;
        Ok(Self::new(config, Arc::new(Console::new())))
    }

    /// Cache root: explicit flag, then config, then `$APX_HOME/cache`.
    pub fn cache_dir(&self, flag: Option<PathBuf>) -> PathBuf {
        flag.or_else(|| self.config.cache_dir.clone())
            .unwrap_or_else(apx_core::cache_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apx_core::NullReporter;

    #[test]
    fn test_cache_dir_precedence() {
        let mut config = Config::default();
        let ctx = Context::new(config.clone(), Arc::new(NullReporter));
        assert_eq!(ctx.cache_dir(None), apx_core::cache_path());

        config.cache_dir = Some(PathBuf::from("/from/config"));
        let ctx = Context::new(config, Arc::new(NullReporter));
        assert_eq!(ctx.cache_dir(None), PathBuf::from("/from/config"));
        assert_eq!(
            ctx.cache_dir(Some(PathBuf::from("/from/flag"))),
            PathBuf::from("/from/flag")
        );
    }
}
