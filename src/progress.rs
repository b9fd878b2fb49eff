//! Startup stage reporting on stderr.
//!
//! Each stage prints a start line (or spinner) and one outcome line. A stage
//! only counts as done once `StageGuard::finish` is called; a guard dropped
//! without it, as happens when `?` leaves the stage early, reports failure.

use anyhow::Result;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

type Transcript = Arc<Mutex<Vec<String>>>;

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
    disable_pretty: bool,
    /// Plain-mode lines go here instead of stderr when set.
    transcript: Option<Transcript>,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool, disable_pretty: bool) -> Self {
        Self {
            mode,
            is_tty,
            disable_pretty,
            transcript: None,
        }
    }

    /// Plain `==>` lines, no spinner. Used by tests and non-interactive runs.
    pub fn plain() -> Self {
        Self::new(UiMode::Plain, false, true)
    }

    /// Plain reporting kept in memory, readable through `transcript`.
    pub fn recorded() -> Self {
        Self {
            transcript: Some(Transcript::default()),
            ..Self::plain()
        }
    }

    pub fn from_args(ui_flag: Option<&str>, is_tty: bool, disable_pretty: bool) -> Self {
        let mode = match ui_flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        };
        Self::new(mode, is_tty, disable_pretty)
    }

    /// Lines reported so far by a `recorded` UI. Empty for every other UI.
    pub fn transcript(&self) -> Vec<String> {
        self.transcript
            .as_ref()
            .map(|lines| lines.lock().unwrap_or_else(PoisonError::into_inner).clone())
            .unwrap_or_default()
    }

    fn use_pretty(&self) -> bool {
        self.transcript.is_none()
            && self.is_tty
            && match self.mode {
                UiMode::Pretty => true,
                UiMode::Auto => !self.disable_pretty,
                UiMode::Plain => false,
            }
    }

    /// Announce a startup stage. Call `finish` on the guard once the stage
    /// has succeeded.
    pub fn stage(&self, name: &str) -> StageGuard {
        let spinner = if self.use_pretty() {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            let style = ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            spinner.set_style(style);
            spinner.set_message(format!("{name}…"));
            Some(spinner)
        } else {
            emit(self.transcript.as_ref(), format!("==> {name}"));
            None
        };
        StageGuard {
            name: name.to_string(),
            start: Instant::now(),
            spinner,
            transcript: self.transcript.clone(),
            succeeded: false,
        }
    }

    /// Run `work` as one stage, reporting whether it succeeded.
    pub fn run_stage<T>(&self, name: &str, work: impl FnOnce() -> Result<T>) -> Result<T> {
        let stage = self.stage(name);
        let value = work()?;
        stage.finish();
        Ok(value)
    }
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
    transcript: Option<Transcript>,
    succeeded: bool,
}

impl StageGuard {
    /// Mark the stage as done and report it.
    pub fn finish(mut self) {
        self.succeeded = true;
    }

    fn outcome_line(&self) -> String {
        let elapsed = format_duration(self.start.elapsed());
        if self.succeeded {
            format!("✔ {} ({elapsed})", self.name)
        } else {
            format!("✘ {} failed ({elapsed})", self.name)
        }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let line = self.outcome_line();
        match &self.spinner {
            Some(spinner) if self.succeeded => spinner.finish_with_message(line),
            Some(spinner) => spinner.abandon_with_message(line),
            None => emit(self.transcript.as_ref(), line),
        }
    }
}

fn emit(transcript: Option<&Transcript>, line: String) {
    match transcript {
        Some(lines) => lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line),
        None => eprintln!("{line}"),
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn ui_flag_selects_mode() {
        assert_eq!(Ui::from_args(Some("plain"), true, false).mode, UiMode::Plain);
        assert_eq!(Ui::from_args(Some("pretty"), true, false).mode, UiMode::Pretty);
        assert_eq!(Ui::from_args(None, true, false).mode, UiMode::Auto);
    }

    #[test]
    fn spinner_only_on_a_tty() {
        assert!(!Ui::new(UiMode::Pretty, false, false).use_pretty());
        assert!(Ui::new(UiMode::Auto, true, false).use_pretty());
        assert!(!Ui::new(UiMode::Auto, true, true).use_pretty());
        assert!(!Ui::plain().use_pretty());
        assert!(!Ui::recorded().use_pretty());
    }

    #[test]
    fn finished_stage_reports_success() -> Result<()> {
        let ui = Ui::recorded();
        let value = ui.run_stage("Load model", || Ok(7))?;
        assert_eq!(value, 7);

        let lines = ui.transcript();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "==> Load model");
        assert!(lines[1].starts_with("✔ Load model ("), "{}", lines[1]);
        Ok(())
    }

    #[test]
    fn failing_stage_reports_failure() {
        let ui = Ui::recorded();
        let result: Result<()> = ui.run_stage("Load labels", || Err(anyhow!("no such file")));
        assert!(result.is_err());

        let lines = ui.transcript();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("✘ Load labels failed ("), "{}", lines[1]);
    }

    #[test]
    fn unfinished_guard_counts_as_failure() {
        let ui = Ui::recorded();
        drop(ui.stage("Open camera"));
        assert!(ui.transcript()[1].starts_with("✘ Open camera failed"));
        assert!(Ui::plain().transcript().is_empty());
    }

    #[test]
    fn durations_format_by_magnitude() {
        assert_eq!(format_duration(Duration::from_millis(42)), "42ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
    }
}
