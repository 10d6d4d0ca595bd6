//! Pipeline orchestrator.
//!
//! Drives an [`ArtifactSet`] through write, align, sign, publish and install.
//! Every stage runs over the whole set before the next one starts, so a
//! staging directory can be released as soon as its consumer stage is done.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::align::Aligner;
use crate::artifact::{Artifact, ArtifactSet};
use crate::cache::CacheDirs;
use crate::device::{DeviceSession, InstallOutcome, InstallTarget, LogOutput, TailTiming};
use crate::error::{PipelineError, StageError};
use crate::publish::publish;
use crate::reporter::Reporter;
use crate::sign::{ApkSigner, Signer, SigningOptions};
use crate::writer::ArtifactWriter;

/// A step of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Materialize patched artifacts into `raw/`.
    Write,
    /// Zip-align into `aligned/`.
    Align,
    /// Sign into `signed/`.
    Sign,
    /// Copy into the output directory.
    Publish,
    /// Deploy to the device.
    Install,
    /// Apply the end-of-run clean policy.
    Cleanup,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Write => "write",
            Self::Align => "align",
            Self::Sign => "sign",
            Self::Publish => "publish",
            Self::Install => "install",
            Self::Cleanup => "cleanup",
        };
        f.write_str(name)
    }
}

/// User overrides for the signing identity. Unset fields fall back to defaults.
#[derive(Debug, Clone, Default)]
pub struct SigningOverrides {
    /// Certificate common name.
    pub common_name: Option<String>,
    /// Keystore and key password.
    pub password: Option<String>,
    /// Keystore path.
    pub keystore: Option<PathBuf>,
}

/// Settings of one run.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Cache root holding the staging triple. Wiped at run start.
    pub cache_dir: PathBuf,
    /// Where finished artifacts are published.
    pub output_dir: PathBuf,
    /// Signing identity overrides.
    pub signing: SigningOverrides,
    /// Skip signing and mount the aligned base over the installed app.
    pub mount: bool,
    /// Drop each staging directory as soon as every artifact has left it.
    pub low_storage: bool,
    /// Delete the cache at run end (and published files after a deploy).
    pub clean: bool,
    /// Tail the app's logs after install.
    pub log: Option<LogOutput>,
    /// Grace period and poll interval of the log tail.
    pub tail_timing: TailTiming,
}

impl PipelineOptions {
    /// Options with every policy off.
    pub fn new(cache_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            output_dir: output_dir.into(),
            signing: SigningOverrides::default(),
            mount: false,
            low_storage: false,
            clean: false,
            log: None,
            tail_timing: TailTiming::default(),
        }
    }
}

/// What a successful run produced, in artifact order.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Files written to `raw/`.
    pub raw: Vec<PathBuf>,
    /// Files written to `aligned/`.
    pub aligned: Vec<PathBuf>,
    /// Files written to `signed/` (empty in mount mode).
    pub signed: Vec<PathBuf>,
    /// Files copied to the output directory.
    pub published: Vec<PathBuf>,
    /// Per-artifact deploy result (empty without a device).
    pub installed: Vec<InstallOutcome>,
    /// Number of end-of-run deletions that failed.
    pub cleanup_failures: usize,
}

/// The build-and-deploy orchestrator.
pub struct Pipeline {
    options: PipelineOptions,
    aligner: Box<dyn Aligner>,
    signer: Option<Box<dyn Signer>>,
    reporter: Arc<dyn Reporter>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Create a pipeline from its settings and stage transforms.
    ///
    /// `signer` may be `None` only for mount runs, which never sign.
    pub fn new(
        options: PipelineOptions,
        aligner: Box<dyn Aligner>,
        signer: Option<Box<dyn Signer>>,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            options,
            aligner,
            signer,
            reporter,
        }
    }

    /// Run settings.
    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Build `set` and, with a `session`, deploy it.
    ///
    /// The session must already be open; the caller closes it.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::OutputIsSource`] before touching the cache if
    /// publishing would overwrite a source APK. Any stage failure aborts the
    /// run. Already published files are left in place; the cache is still
    /// removed when the clean policy is set.
    pub fn run(
        &self,
        set: &ArtifactSet,
        session: Option<&DeviceSession>,
    ) -> Result<RunReport, PipelineError> {
        let started = Instant::now();
        self.check_output(set)?;
        let cache = CacheDirs::prepare(&self.options.cache_dir, self.options.low_storage)?;
        info!(
            cache = %cache.root().display(),
            artifacts = set.len(),
            mount = self.options.mount,
            low_storage = self.options.low_storage,
            "run started"
        );

        let result = self.stages(set, &cache, session);

        self.reporter.section(Stage::Cleanup);
        let failures = match &result {
            Ok(report) => cache.finish(self.options.clean, &report.published, session.is_some()),
            Err(_) => cache.finish(self.options.clean, &[], false),
        };
        for failure in &failures {
            self.reporter.warning(&format!(
                "Failed to delete {}: {}",
                failure.path.display(),
                failure.error
            ));
        }

        let mut report = result?;
        report.cleanup_failures = failures.len();

        let action = match (session.is_some(), self.options.mount) {
            (false, _) => "built",
            (true, false) => "installed",
            (true, true) => "mounted",
        };
        self.reporter
            .summary(set.len(), action, started.elapsed().as_secs_f64());
        Ok(report)
    }

    /// Refuse an output directory where a published file would land on its
    /// own source.
    fn check_output(&self, set: &ArtifactSet) -> Result<(), PipelineError> {
        for artifact in set {
            let dest = self.options.output_dir.join(artifact.file_name());
            // A destination that does not exist yet cannot be the source.
            let (Ok(dest), Ok(source)) = (dest.canonicalize(), artifact.source().canonicalize())
            else {
                continue;
            };
            if dest == source {
                return Err(PipelineError::OutputIsSource {
                    artifact: artifact.file_name(),
                    path: dest,
                });
            }
        }
        Ok(())
    }

    fn stages(
        &self,
        set: &ArtifactSet,
        cache: &CacheDirs,
        session: Option<&DeviceSession>,
    ) -> Result<RunReport, PipelineError> {
        let mut report = RunReport::default();

        self.reporter.section(Stage::Write);
        let writer = ArtifactWriter::new(cache.raw());
        for artifact in set {
            let raw = writer
                .write(artifact)
                .map_err(|source| PipelineError::Write {
                    artifact: artifact.file_name(),
                    source,
                })?;
            self.staged(Stage::Write, artifact, &raw);
            report.raw.push(raw);
        }

        self.reporter.section(Stage::Align);
        for (artifact, raw) in set.iter().zip(&report.raw) {
            let aligned = cache.aligned().join(artifact.file_name());
            self.aligner
                .align(raw, &aligned)
                .map_err(|source| PipelineError::Align {
                    artifact: artifact.file_name(),
                    source,
                })?;
            self.staged(Stage::Align, artifact, &aligned);
            report.aligned.push(aligned);
        }
        self.release(cache, cache.raw());

        if self.options.mount {
            self.reporter
                .info("Mount mode: skipping signing, publishing aligned files");
        } else {
            self.sign_all(set, cache, &mut report)?;
            self.release(cache, cache.aligned());
        }

        self.reporter.section(Stage::Publish);
        let finished = if self.options.mount {
            &report.aligned
        } else {
            &report.signed
        };
        let mut published = Vec::with_capacity(finished.len());
        for (artifact, file) in set.iter().zip(finished) {
            let dest = publish(file, &self.options.output_dir).map_err(|source| {
                PipelineError::Publish {
                    artifact: artifact.file_name(),
                    source,
                }
            })?;
            self.staged(Stage::Publish, artifact, &dest);
            published.push(dest);
        }
        report.published = published;
        self.release(cache, cache.signed());
        if self.options.mount {
            self.release(cache, cache.aligned());
        }

        if let Some(session) = session {
            self.reporter.section(Stage::Install);
            let targets: Vec<InstallTarget<'_>> = set
                .iter()
                .zip(&report.published)
                .map(|(artifact, payload)| InstallTarget { artifact, payload })
                .collect();
            report.installed = session.install_all(&targets)?;

            if let Some(output) = &self.options.log {
                session.tail_logs_with(set.package(), output, self.options.tail_timing)?;
            }
        }

        Ok(report)
    }

    fn sign_all(
        &self,
        set: &ArtifactSet,
        cache: &CacheDirs,
        report: &mut RunReport,
    ) -> Result<(), PipelineError> {
        self.reporter.section(Stage::Sign);

        let Some(signer) = &self.signer else {
            return Err(PipelineError::Sign {
                artifact: set.base().file_name(),
                source: StageError::ToolNotFound {
                    tool: "apksigner".to_string(),
                    hint: ApkSigner::HINT,
                },
            });
        };

        let overrides = &self.options.signing;
        let options = SigningOptions::resolve(
            overrides.common_name.clone(),
            overrides.password.clone(),
            overrides.keystore.clone(),
            &self.options.output_dir,
            set.base().source(),
        );
        self.reporter
            .info(&format!("Using keystore {}", options.keystore.display()));

        for (artifact, aligned) in set.iter().zip(&report.aligned) {
            let signed = cache.signed().join(artifact.file_name());
            signer
                .sign(aligned, &signed, &options)
                .map_err(|source| PipelineError::Sign {
                    artifact: artifact.file_name(),
                    source,
                })?;
            self.staged(Stage::Sign, artifact, &signed);
            report.signed.push(signed);
        }
        Ok(())
    }

    fn staged(&self, stage: Stage, artifact: &Artifact, path: &Path) {
        self.reporter
            .staged(stage, &artifact.file_name(), &path.display().to_string());
    }

    /// Drop a staging directory every artifact has left. Low-storage only.
    fn release(&self, cache: &CacheDirs, dir: &Path) {
        match cache.delete(dir, false) {
            Ok(true) => debug!(path = %dir.display(), "released staging directory"),
            Ok(false) => {}
            Err(e) => self.reporter.warning(&format!(
                "Failed to release {}: {e}",
                dir.display()
            )),
        }
    }
}
