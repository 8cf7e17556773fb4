//! User-facing progress reporting.
//!
//! Progress is what the person running the CLI reads on stdout. Diagnostics
//! go through `tracing` instead.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::pipeline::Stage;

/// Receives pipeline progress.
pub trait ProgressSink: Send + Sync {
    /// The pipeline entered `stage`.
    fn stage(&self, stage: Stage);

    /// A one-line message for the user.
    fn info(&self, message: &str);

    /// Still waiting in `stage`, `elapsed` since the wait began.
    fn waiting(&self, stage: Stage, elapsed: Duration);
}

/// Progress printed to stdout.
///
/// Waiting updates rewrite the current line in place.
#[derive(Debug, Default)]
pub struct ConsoleProgress {
    mid_line: AtomicBool,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        Self::default()
    }

    fn end_line(&self) {
        if self.mid_line.swap(false, Ordering::SeqCst) {
            println!();
        }
    }
}

impl ProgressSink for ConsoleProgress {
    fn stage(&self, stage: Stage) {
        if let Some(message) = stage.banner() {
            self.info(message);
        }
    }

    fn info(&self, message: &str) {
        self.end_line();
        println!("{}", message);
    }

    fn waiting(&self, stage: Stage, elapsed: Duration) {
        self.mid_line.store(true, Ordering::SeqCst);
        let mut stdout = std::io::stdout().lock();
        let _ = write!(stdout, "\r{} for: {}", stage.waiting_label(), format_elapsed(elapsed));
        let _ = stdout.flush();
    }
}

/// Format a duration as `1h2m3s`, dropping leading zero units.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);

    if hours > 0 {
        format!("{}h{}m{}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m{}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
