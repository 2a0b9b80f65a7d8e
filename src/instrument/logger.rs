//! The diagnostic output channel.
//!
//! Everything the instrument reports at runtime is one line of text starting with [`MARKER`],
//! without timestamps or levels, so the lines can be grepped out of an application's regular
//! standard output. A [`Logger`] is a cheap handle to a [`LogSink`]; the agent writes to
//! [`StdoutSink`], tests and tools capture lines with a [`MemorySink`].
//!
//! This channel is product output. Developer diagnostics (why a class could not be parsed, how
//! long a pass took) go through the `log` facade instead and stay silent unless a logger
//! implementation is installed.
//!
//! # Examples
//!
//! ```rust
//! use threadscope::instrument::Logger;
//!
//! let (logger, sink) = Logger::memory();
//! logger.line("Excluded class=com/example/Worker");
//! assert_eq!(sink.lines(), vec!["[threadscope] Excluded class=com/example/Worker"]);
//! ```

use std::{
    fmt,
    io::{self, Write},
    sync::{Arc, Mutex, OnceLock},
};

use crate::{Error, Result};

/// Marker every output line starts with.
pub const MARKER: &str = "[threadscope] ";

static GLOBAL: OnceLock<Logger> = OnceLock::new();

/// Destination for complete output lines.
pub trait LogSink: Send + Sync {
    /// Write one line; `line` carries no line terminator.
    fn write_line(&self, line: &str);
}

/// Writes lines to standard output.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl LogSink for StdoutSink {
    fn write_line(&self, line: &str) {
        let mut stdout = io::stdout().lock();
        // Nothing sensible is left to report to if stdout is gone.
        let _ = writeln!(stdout, "{line}");
    }
}

/// Collects lines in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines written so far.
    pub fn lines(&self) -> Vec<String> {
        lock!(self.lines).clone()
    }

    /// Remove and return the lines written so far.
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *lock!(self.lines))
    }
}

impl LogSink for MemorySink {
    fn write_line(&self, line: &str) {
        lock!(self.lines).push(line.to_string());
    }
}

/// Handle for writing marked diagnostic lines.
#[derive(Clone)]
pub struct Logger {
    sink: Arc<dyn LogSink>,
}

impl Logger {
    /// Create a logger writing to `sink`.
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Logger { sink }
    }

    /// Create a logger writing to standard output.
    #[must_use]
    pub fn stdout() -> Self {
        Logger::new(Arc::new(StdoutSink))
    }

    /// Create a logger collecting lines in the returned [`MemorySink`].
    #[must_use]
    pub fn memory() -> (Self, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        (Logger::new(sink.clone()), sink)
    }

    /// Write `message` as one marked line.
    pub fn line(&self, message: &str) {
        self.sink.write_line(&format!("{MARKER}{message}"));
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger").finish_non_exhaustive()
    }
}

/// Make `logger` the process-wide logger.
///
/// # Errors
/// Returns [`crate::Error::Error`] if a process-wide logger was already installed or used.
pub fn install(logger: Logger) -> Result<()> {
    GLOBAL
        .set(logger)
        .map_err(|_| Error::Error("A process-wide logger is already installed".to_string()))
}

/// The process-wide logger, standard output unless [`install`] ran first.
pub fn global() -> &'static Logger {
    GLOBAL.get_or_init(Logger::stdout)
}
