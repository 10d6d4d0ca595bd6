//! Reporter trait for dependency injection
//!
//! Every component receives an explicit reporter handle at construction
//! instead of writing to a shared global logger. The CLI plugs in a console
//! implementation; tests use [`NullReporter`].

use crate::pipeline::Stage;

/// Progress and status sink for pipeline components.
pub trait Reporter: Send + Sync {
    /// Indicates a new stage has started over the whole artifact set.
    fn section(&self, stage: Stage);

    /// An artifact finished a stage; `detail` names the produced file.
    fn staged(&self, stage: Stage, artifact: &str, detail: &str);

    /// Log an informational message.
    fn info(&self, msg: &str);

    /// Log a success message.
    fn success(&self, msg: &str);

    /// Log a warning message.
    fn warning(&self, msg: &str);

    /// Log an error message.
    fn error(&self, msg: &str);

    /// Display a final summary of the run.
    fn summary(&self, count: usize, action: &str, elapsed_secs: f64);
}

impl<T: Reporter + ?Sized> Reporter for std::sync::Arc<T> {
    fn section(&self, stage: Stage) {
        (**self).section(stage);
    }
    fn staged(&self, stage: Stage, artifact: &str, detail: &str) {
        (**self).staged(stage, artifact, detail);
    }
    fn info(&self, msg: &str) {
        (**self).info(msg);
    }
    fn success(&self, msg: &str) {
        (**self).success(msg);
    }
    fn warning(&self, msg: &str) {
        (**self).warning(msg);
    }
    fn error(&self, msg: &str) {
        (**self).error(msg);
    }
    fn summary(&self, count: usize, action: &str, elapsed_secs: f64) {
        (**self).summary(count, action, elapsed_secs);
    }
}

/// A no-op reporter for silent operations (e.g., testing).
#[derive(Debug, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn section(&self, _: Stage) {}
    fn staged(&self, _: Stage, _: &str, _: &str) {}
    fn info(&self, _: &str) {}
    fn success(&self, _: &str) {}
    fn warning(&self, _: &str) {}
    fn error(&self, _: &str) {}
    fn summary(&self, _: usize, _: &str, _: f64) {}
}
