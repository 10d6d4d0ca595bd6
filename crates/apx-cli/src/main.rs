//! apx - build, sign and deploy patched APKs

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use apx_cli::cmd;
use apx_cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins; --verbose only changes the fallback.
    let fallback = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Build(args) => cmd::build::build(args),
        Commands::Uninstall {
            package,
            device,
            unmount,
        } => cmd::uninstall::uninstall(&package, device.as_deref(), unmount),
        Commands::Devices => cmd::devices::devices(),
        Commands::Clean { cache } => cmd::clean::clean(cache),
        Commands::Completions { shell } => {
            cmd::completions::completions(shell);
            Ok(())
        }
    }
}
