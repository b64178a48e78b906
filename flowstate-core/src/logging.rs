//! Tracing setup
//!
//! The CLI writes its logs to a daily-rotated file under
//! `$XDG_STATE_HOME/flowstate/`; stdout stays reserved for dashboard output.

use crate::config::{Config, LoggingConfig};
use crate::error::{Error, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter for a configured level string such as `"info"` or
/// `"flowstate_core=debug,warn"`.
pub fn level_filter(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(level)
        .map_err(|e| Error::Config(format!("logging.level '{}': {}", level, e)))
}

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
///
/// Keep the returned guard alive for the life of the process; dropping it
/// flushes buffered lines.
pub fn init(config: &LoggingConfig) -> Result<LoggingGuard> {
    let log_dir = Config::state_dir();
    std::fs::create_dir_all(&log_dir)?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("flowstate.log")
        .max_log_files(config.max_files.max(1))
        .build(&log_dir)
        .map_err(|e| Error::Config(format!("cannot open log file in {:?}: {}", log_dir, e)))?;
    let (writer, worker) = tracing_appender::non_blocking(appender);

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => level_filter(&config.level)?,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_thread_names(true)
                .with_line_number(true),
        )
        .try_init()
        .map_err(|e| Error::Config(format!("logging already initialized: {}", e)))?;

    tracing::info!(
        file = %log_file_path().display(),
        level = %config.level,
        version = env!("CARGO_PKG_VERSION"),
        "flowstate logging started"
    );

    Ok(LoggingGuard { _worker: worker })
}

/// Route logs to the test harness. Safe to call from every test.
pub fn init_test() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Flushes pending log lines on drop.
pub struct LoggingGuard {
    _worker: WorkerGuard,
}

/// Base path of the log file; rotated files carry a date suffix.
pub fn log_file_path() -> PathBuf {
    Config::log_path()
}
