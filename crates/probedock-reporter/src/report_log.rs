//! Human-readable diagnostics buffer.
//!
//! Everything the reporter has to say is collected here and printed once, at
//! shutdown, after the host runner's own output. Each line is also emitted as a
//! `tracing` event so hosts with a subscriber see it as it happens.

use std::fmt;
use std::io::Write;

use tracing::{debug, error, info, warn};

use crate::error::ReporterError;

const PREFIX: &str = "Probe Dock -";

/// Severity of a report log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        };
        f.write_str(label)
    }
}

/// Buffered report log.
#[derive(Debug, Default)]
pub struct ReportLog {
    buffer: String,
    verbose: bool,
}

impl ReportLog {
    pub fn new(verbose: bool) -> Self {
        let mut log = Self {
            buffer: String::new(),
            verbose,
        };
        if verbose {
            log.info("Probe Dock client is verbose.");
        }
        log
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    pub fn debug(&mut self, message: impl AsRef<str>) {
        debug!(target: "probedock", "{}", message.as_ref());
        self.push(Level::Debug, message.as_ref());
    }

    pub fn info(&mut self, message: impl AsRef<str>) {
        info!(target: "probedock", "{}", message.as_ref());
        self.push(Level::Info, message.as_ref());
    }

    pub fn warning(&mut self, message: impl AsRef<str>) {
        warn!(target: "probedock", "{}", message.as_ref());
        self.push(Level::Warning, message.as_ref());
    }

    pub fn error(&mut self, message: impl AsRef<str>) {
        error!(target: "probedock", "{}", message.as_ref());
        self.push(Level::Error, message.as_ref());
    }

    /// Warning that is only recorded in verbose mode.
    pub fn verbose_warning(&mut self, message: impl AsRef<str>) {
        if self.verbose {
            self.warning(message);
        } else {
            debug!(target: "probedock", "{}", message.as_ref());
        }
    }

    /// Log an error at the level its kind deserves.
    pub fn record(&mut self, err: &ReporterError) {
        match err {
            ReporterError::Cache { .. } => self.warning(err.to_string()),
            _ => self.error(err.to_string()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.buffer
    }

    /// Final rendering, framed by blank lines so it stands apart from the
    /// runner's output. Empty when nothing was logged.
    pub fn render(&self) -> String {
        if self.buffer.is_empty() {
            String::new()
        } else {
            format!("\n\n{}\n\n", self.buffer)
        }
    }

    pub fn write_to<W: Write>(&self, mut out: W) -> std::io::Result<()> {
        out.write_all(self.render().as_bytes())?;
        out.flush()
    }

    fn push(&mut self, level: Level, message: &str) {
        self.buffer.push_str(PREFIX);
        self.buffer.push(' ');
        self.buffer.push_str(&level.to_string());
        self.buffer.push(' ');
        self.buffer.push_str(message);
        self.buffer.push('\n');
    }
}
