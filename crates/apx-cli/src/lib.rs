//! apx - build, sign and deploy patched APKs
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
//!
//! Reads the build manifest a patcher leaves behind and runs it through
//! `apx-core`'s pipeline: write, align, sign, publish and (optionally)
//! install on a device.
//!
//! # Directory Layout
//!
//! ```text
//! ~/.apx/
//! ├── config.toml  # Tool paths and signing defaults
//! ├── cache/       # Staging triple (raw/, aligned/, signed/)
//! └── logs/        # logcat captures
//! ```

pub mod cmd;
pub mod context;
pub mod ui;

pub use apx_core::paths::*;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Command-line interface.
#[derive(Debug, Parser)]
#[command(name = "apx")]
#[command(author, version = env!("APX_VERSION"), about = "apx - build, sign and deploy patched APKs")]
pub struct Cli {
    /// Show debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Build patched artifacts and optionally deploy them
    Build(BuildArgs),
    /// Remove a package (or its mount) from a device
    Uninstall {
        /// Package name, e.g. com.example.app
        package: String,
        /// Device serial (see `apx devices`)
        #[arg(short, long, env = "APX_DEVICE")]
        device: Option<String>,
        /// Remove a root mount instead of uninstalling
        #[arg(long)]
        unmount: bool,
    },
    /// List connected devices
    Devices,
    /// Remove the staging cache
    Clean {
        /// Staging cache directory
        #[arg(long, env = "APX_CACHE")]
        cache: Option<PathBuf>,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

/// Arguments of `apx build`.
#[derive(Debug, Args)]
pub struct BuildArgs {
    /// Build manifest written by the patcher (apx.toml)
    pub manifest: PathBuf,

    /// Deploy to the device with this serial
    #[arg(short, long, env = "APX_DEVICE")]
    pub device: Option<String>,

    /// Mount the patched base over the installed app (root, no signing)
    #[arg(long, requires = "device")]
    pub mount: bool,

    /// Delete each staging directory as soon as it is no longer needed
    #[arg(long)]
    pub low_storage: bool,

    /// Delete the cache after the run (and published files after a deploy)
    #[arg(long)]
    pub clean: bool,

    /// Stream the app's logs after install until it exits
    #[arg(long, requires = "device")]
    pub log: bool,

    /// Write the app's logs to a file instead of the terminal
    /// (default: ~/.apx/logs/logcat-<package>-<time>.log)
    #[arg(long, requires = "device", value_name = "PATH", num_args = 0..=1)]
    #[allow(clippy::option_option)]
    pub log_file: Option<Option<PathBuf>>,

    /// Keystore to sign with (created if missing)
    #[arg(long, env = "APX_KEYSTORE")]
    pub keystore: Option<PathBuf>,

    /// Keystore and key password
    #[arg(long, env = "APX_KEYSTORE_PASSWORD", hide_env_values = true)]
    pub keystore_password: Option<String>,

    /// Signer certificate common name (also the key alias)
    #[arg(long, env = "APX_SIGNER_CN")]
    pub signer_cn: Option<String>,

    /// Output directory for finished APKs
    #[arg(short, long, default_value = ".")]
    pub output: PathBuf,

    /// Staging cache directory (wiped on every run)
    #[arg(long, env = "APX_CACHE")]
    pub cache: Option<PathBuf>,
}
