//! Diagnostic logging setup and the colored stdout trace console.

use std::fmt::Display;
use std::io::{self, Write};
#[cfg(test)]
use std::sync::{Arc, Mutex};

use crate::types::{ANSI_RESET, TaskColor};

/// Install the global `tracing` subscriber.
///
/// Diagnostics go to stderr so stdout stays reserved for the task trace.
/// `RUST_LOG` overrides the default filter.
pub fn init_tracing(verbose: bool) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let default = if verbose {
        "sentinel_buffer=debug"
    } else {
        "sentinel_buffer=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // A second init (e.g. from tests) is harmless; keep the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(io::stderr)
                .with_target(false)
                .with_thread_names(true)
                .with_timer(fmt::time::uptime()),
        )
        .with(filter)
        .try_init();
}

/// Per-task writer for the human-readable trace lines on stdout.
#[derive(Clone, Debug)]
pub struct Console {
    label: String,
    color: Option<TaskColor>,
    sink: Sink,
}

#[derive(Clone, Debug)]
enum Sink {
    Stdout,
    Silent,
    #[cfg(test)]
    Capture(Arc<Mutex<Vec<String>>>),
}

impl Console {
    pub fn new(label: impl Into<String>, color: TaskColor, use_color: bool) -> Self {
        Self {
            label: label.into(),
            color: use_color.then_some(color),
            sink: Sink::Stdout,
        }
    }

    /// A console that swallows every line (bench and stress runs).
    pub fn silent(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            color: None,
            sink: Sink::Silent,
        }
    }

    /// A console that records uncolored lines instead of printing them.
    #[cfg(test)]
    pub fn capture(label: impl Into<String>) -> (Self, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let console = Self {
            label: label.into(),
            color: None,
            sink: Sink::Capture(Arc::clone(&lines)),
        };
        (console, lines)
    }

    /// Render one trace line without printing it.
    pub fn render(&self, message: impl Display) -> String {
        match self.color {
            Some(color) => format!("{}[{}] {message}{ANSI_RESET}", color.ansi(), self.label),
            None => format!("[{}] {message}", self.label),
        }
    }

    pub fn line(&self, message: impl Display) {
        match &self.sink {
            Sink::Silent => {}
            Sink::Stdout => {
                let rendered = self.render(message);
                // Hold the stdout lock so lines from different tasks never interleave.
                let mut out = io::stdout().lock();
                let _ = writeln!(out, "{rendered}");
            }
            #[cfg(test)]
            Sink::Capture(lines) => {
                let rendered = self.render(message);
                lines.lock().expect("capture mutex poisoned").push(rendered);
            }
        }
    }
}
