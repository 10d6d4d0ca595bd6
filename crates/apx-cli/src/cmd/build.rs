//! Build command: run a patcher's output through the pipeline.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use apx_core::align::ZipAlign;
use apx_core::device::{Authority, DeviceSession};
use apx_core::sign::{ApkSigner, Signer};
use apx_core::{
    Adb, BuildManifest, LogOutput, Pipeline, PipelineOptions, SigningOverrides, logcat_path,
};
use tracing::info;

use crate::BuildArgs;
use crate::context::Context;

/// Build (and optionally deploy) the artifacts described by `args.manifest`.
pub fn build(args: BuildArgs) -> Result<()> {
    let ctx = Context::load()?;
    let tools = &ctx.config.tools;

    let set = BuildManifest::load(&args.manifest)?
        .into_artifact_set()
        .with_context(|| format!("Invalid build manifest {}", args.manifest.display()))?;
    info!(package = set.package(), artifacts = set.len(), "manifest loaded");

    // Resolve the device before any staging work so a bad serial fails fast.
    let mut session = match args.device.as_deref() {
        Some(serial) => {
            let adb = Adb::locate(tools.adb.as_deref())?;
            Some(DeviceSession::connect(
                Arc::new(adb),
                serial,
                Authority::for_mount(args.mount),
                ctx.reporter.clone(),
            )?)
        }
        None => None,
    };

    let aligner = ZipAlign::locate(tools.zipalign.as_deref())?;
    let signer: Option<Box<dyn Signer>> = if args.mount {
        None
    } else {
        Some(Box::new(ApkSigner::locate(
            tools.apksigner.as_deref(),
            tools.keytool.as_deref(),
        )?))
    };

    let defaults = &ctx.config.signing;
    let mut options = PipelineOptions::new(ctx.cache_dir(args.cache), args.output);
    options.signing = SigningOverrides {
        common_name: args.signer_cn.or_else(|| defaults.common_name.clone()),
        password: args.keystore_password.or_else(|| defaults.password.clone()),
        keystore: args.keystore.or_else(|| defaults.keystore.clone()),
    };
    options.mount = args.mount;
    options.low_storage = args.low_storage;
    options.clean = args.clean;
    options.log = log_output(args.log_file, args.log, set.package());

    let pipeline = Pipeline::new(options, Box::new(aligner), signer, ctx.reporter.clone());
    let result = pipeline.run(&set, session.as_ref());
    if let Some(session) = session.as_mut() {
        session.close();
    }
    let report = result?;

    if !(pipeline.options().clean && args.device.is_some()) {
        for path in &report.published {
            ctx.reporter.info(&format!("Output: {}", path.display()));
        }
    }
    Ok(())
}

/// `--log-file` wins over `--log`; a bare `--log-file` captures under `~/.apx/logs`.
#[allow(clippy::option_option)]
fn log_output(log_file: Option<Option<PathBuf>>, log: bool, package: &str) -> Option<LogOutput> {
    match (log_file, log) {
        (Some(Some(path)), _) => Some(LogOutput::File(path)),
        (Some(None), _) => Some(LogOutput::File(logcat_path(package))),
        (None, true) => Some(LogOutput::Inherit),
        (None, false) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apx_core::log_dir;

    #[test]
    fn test_log_output_precedence() {
        assert!(log_output(None, false, "com.example").is_none());
        assert!(matches!(
            log_output(None, true, "com.example"),
            Some(LogOutput::Inherit)
        ));
        assert!(matches!(
            log_output(Some(Some(PathBuf::from("app.log"))), true, "com.example"),
            Some(LogOutput::File(path)) if path == PathBuf::from("app.log")
        ));

        let Some(LogOutput::File(path)) = log_output(Some(None), false, "com.example") else {
            panic!("expected a capture file");
        };
        assert_eq!(path.parent(), Some(log_dir().as_path()));
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("logcat-com.example-"), "{name}");
        assert!(name.ends_with(".log"), "{name}");
    }
}
