//! Console reporter: coloured progress lines on the terminal.
//!
//! Pipeline stages run one after another on a single thread, so lines are
//! printed directly; a mutex only keeps multi-line blocks together.

use std::sync::Mutex;

use apx_core::{Reporter, Stage};
use crossterm::style::Stylize;

use super::theme::Theme;

/// [`Reporter`] that prints to stdout (errors to stderr).
#[derive(Debug, Default)]
pub struct Console {
    theme: Theme,
    lock: Mutex<()>,
}

impl Console {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Header shown when a stage starts.
pub fn stage_title(stage: Stage) -> &'static str {
    match stage {
        Stage::Write => "Writing patched artifacts",
        Stage::Align => "Aligning",
        Stage::Sign => "Signing",
        Stage::Publish => "Publishing",
        Stage::Install => "Installing",
        Stage::Cleanup => "Cleaning up",
    }
}

impl Reporter for Console {
    fn section(&self, stage: Stage) {
        let _guard = self.lock.lock();
        println!();
        println!(
            "{} {}",
            self.theme.icons.active.with(self.theme.colors.secondary),
            stage_title(stage).with(self.theme.colors.header).bold()
        );
    }

    fn staged(&self, _stage: Stage, artifact: &str, detail: &str) {
        let _guard = self.lock.lock();
        println!(
            "  {} {} {}",
            self.theme.icons.success.with(self.theme.colors.success),
            format!("{artifact:<32}").with(self.theme.colors.artifact),
            detail.with(self.theme.colors.secondary)
        );
    }

    fn info(&self, msg: &str) {
        let _guard = self.lock.lock();
        println!("  {} {}", self.theme.icons.info, msg);
    }

    fn success(&self, msg: &str) {
        let _guard = self.lock.lock();
        println!(
            "{} {}",
            self.theme.icons.success.green(),
            msg.with(self.theme.colors.success)
        );
    }

    fn warning(&self, msg: &str) {
        let _guard = self.lock.lock();
        println!(
            "{} {}",
            self.theme.icons.warning.yellow(),
            msg.with(self.theme.colors.warning)
        );
    }

    fn error(&self, msg: &str) {
        let _guard = self.lock.lock();
        eprintln!(
            "{} {}",
            self.theme.icons.error.red(),
            msg.with(self.theme.colors.error)
        );
    }

    fn summary(&self, count: usize, action: &str, elapsed_secs: f64) {
        let _guard = self.lock.lock();
        let operation = action.to_uppercase();
        println!();
        println!(
            "{} {}",
            self.theme.icons.success.green(),
            format!("{operation} {count} artifact(s), elapsed {elapsed_secs:.1}s").green()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_stage_has_a_title() {
        for stage in [
            Stage::Write,
            Stage::Align,
            Stage::Sign,
            Stage::Publish,
            Stage::Install,
            Stage::Cleanup,
        ] {
            assert!(!stage_title(stage).is_empty());
        }
    }

    #[test]
    fn test_console_prints_without_panicking() {
        let console = Console::new();
        console.section(Stage::Write);
        console.staged(Stage::Write, "app.apk", "/tmp/raw/app.apk");
        console.warning("careful");
        console.summary(2, "built", 0.25);
    }
}
