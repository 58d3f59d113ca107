//! Tracing subscriber setup.
//!
//! Console output (human-readable or JSON) filtered by the configured
//! directive, plus an optional daily-rolling JSON file written through a
//! non-blocking appender.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use crate::{ConfigError, LoggingConfig, Result};

/// File name prefix for rolling log files.
const LOG_FILE_PREFIX: &str = "mneme.log";

/// Filter applied to the file layer, which always records everything mneme emits.
const FILE_FILTER: &str = "mneme_memory=trace,mneme_embed=trace,mneme_config=trace,info";

/// Install the global tracing subscriber.
///
/// Returns the file writer guard when file logging is enabled; keep it alive
/// for the lifetime of the process or buffered lines are lost. Calling this
/// twice is harmless: the second call leaves the existing subscriber in place
/// and returns `Ok(None)`.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let console_filter = EnvFilter::try_new(&config.filter).map_err(|e| {
        ConfigError::InvalidValue {
            field: "logging.filter".to_string(),
            reason: e.to_string(),
        }
    })?;

    let console = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_filter(console_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(console_filter)
            .boxed()
    };

    let (file, guard) = match config.directory {
        Some(ref dir) => {
            std::fs::create_dir_all(dir).map_err(|e| ConfigError::WriteFile {
                path: dir.display().to_string(),
                source: e,
            })?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_filter(EnvFilter::new(FILE_FILTER));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    match tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
    {
        Ok(()) => Ok(guard),
        // A subscriber is already installed
        Err(_) => Ok(None),
    }
}
