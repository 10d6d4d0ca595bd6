//! Core library for apx.
//!
//! Takes the artifacts a patcher produced (one base APK plus any splits) and
//! carries them through the build-and-deploy pipeline:
//!
//! ```text
//! raw-write -> align -> sign -> publish -> install -> cleanup
//! ```
//!
//! Every stage runs over the whole [`ArtifactSet`] before the next one starts,
//! so a staging directory can be dropped as soon as all artifacts have left it.
//!
//! # Directory Layout
//!
//! ```text
//! <cache>/
//! ├── raw/        # Patched, unaligned, unsigned copies
//! ├── aligned/    # zipalign output
//! └── signed/     # apksigner output (empty in mount mode)
//! ```

pub mod align;
pub mod artifact;
pub mod cache;
pub mod config;
pub mod device;
pub mod error;
pub mod manifest;
pub mod paths;
pub mod pipeline;
pub mod publish;
pub mod reporter;
pub mod sign;
pub mod tool;
pub mod uninstall;
pub mod writer;

pub use artifact::{Artifact, ArtifactSet, DexBlob, Variant};
pub use config::Config;
pub use device::{Adb, Authority, DeviceSession, LogOutput};
pub use error::PipelineError;
pub use manifest::BuildManifest;
pub use paths::*;
pub use pipeline::{Pipeline, PipelineOptions, RunReport, SigningOverrides, Stage};
pub use reporter::{NullReporter, Reporter};
