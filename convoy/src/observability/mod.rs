//! Logging setup.
//!
//! All logs of a run go through one subscriber that owns its writer: stderr
//! by default, or a single file when [`LogOptions::file`] is set. Components
//! tag their output with a `component` span field.

use crate::errors::{ConvoyError, Result};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

/// Logging options, usually taken from CLI flags.
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Fallback filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable text.
    pub json: bool,
    /// Append all output to this file instead of stderr.
    pub file: Option<PathBuf>,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl LogOptions {
    /// Builds the filter: `RUST_LOG` wins, otherwise `level`.
    #[must_use]
    pub fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level))
    }

    fn writer(&self) -> Result<BoxMakeWriter> {
        match &self.file {
            None => Ok(BoxMakeWriter::new(std::io::stderr)),
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| {
                        ConvoyError::Config(format!("cannot open log file {}: {e}", path.display()))
                    })?;
                Ok(BoxMakeWriter::new(Mutex::new(file)))
            }
        }
    }
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Returns an error if the log file cannot be opened or a subscriber is
/// already installed.
pub fn init_logging(options: &LogOptions) -> Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(options.env_filter())
        .with_writer(options.writer()?)
        .with_ansi(options.file.is_none())
        .with_target(false);

    let installed = if options.json {
        builder.json().with_current_span(true).try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| ConvoyError::Config(format!("logging already initialized: {e}")))
}
