//! Subcommand implementations.

pub mod build;
pub mod clean;
pub mod completions;
pub mod devices;
pub mod uninstall;
