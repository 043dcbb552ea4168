//! Terminal stage reporting for the binaries.
//!
//! Stages render as spinners on an interactive stderr and as `==>` lines
//! otherwise. Logging stays on `log`; this is only progress feedback.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum UiMode {
    #[default]
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool) -> Self {
        Self { mode, is_tty }
    }

    fn use_pretty(&self) -> bool {
        match self.mode {
            UiMode::Pretty | UiMode::Auto => self.is_tty,
            UiMode::Plain => false,
        }
    }

    /// Start a stage. It is reported as done when the guard drops, unless
    /// `track` saw an error.
    pub fn stage(&self, name: &str) -> StageGuard {
        if self.use_pretty() {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            let style = ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            spinner.set_style(style);
            spinner.set_message(format!("{name}…"));
            StageGuard::new(name.to_string(), Some(spinner))
        } else {
            eprintln!("==> {}", name);
            StageGuard::new(name.to_string(), None)
        }
    }
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
    detail: Option<String>,
    failed: bool,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
            detail: None,
            failed: false,
        }
    }

    /// Attach a short result shown next to the stage name, e.g. "12 entries".
    pub fn finish(mut self, detail: impl Into<String>) {
        self.detail = Some(detail.into());
    }

    /// Pass `result` through, marking the stage failed when it is an error.
    pub fn track<T, E>(&mut self, result: Result<T, E>) -> Result<T, E> {
        if result.is_err() {
            self.failed = true;
        }
        result
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let elapsed = format_duration(self.start.elapsed());
        let mark = if self.failed { "✘" } else { "✔" };
        let message = match &self.detail {
            Some(detail) => format!("{} {}: {} ({})", mark, self.name, detail, elapsed),
            None => format!("{} {} ({})", mark, self.name, elapsed),
        };
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
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

    #[test]
    fn pretty_only_on_tty() {
        assert!(Ui::new(UiMode::Auto, true).use_pretty());
        assert!(!Ui::new(UiMode::Auto, false).use_pretty());
        assert!(!Ui::new(UiMode::Plain, true).use_pretty());
        assert!(!Ui::new(UiMode::Pretty, false).use_pretty());
    }

    #[test]
    fn tracked_error_marks_stage_failed() {
        let ui = Ui::new(UiMode::Plain, false);
        let mut stage = ui.stage("Load models");
        assert_eq!(stage.track::<u32, &str>(Ok(3)), Ok(3));
        assert!(!stage.failed);
        assert_eq!(stage.track::<u32, &str>(Err("missing model")), Err("missing model"));
        assert!(stage.failed);
    }

    #[test]
    fn durations_switch_units() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
    }
}
