use std::io;
use std::path::{Path, PathBuf};
use std::sync::Once;

use chrono::{DateTime, Local};
use etl_config::Environment;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Directory receiving per-run log files, relative to the working directory.
pub const LOG_DIR: &str = "logs";

const DEFAULT_FILTER: &str = "info";

static INIT_TEST_TRACING: Once = Once::new();

/// Errors raised while installing the global subscriber.
#[derive(Debug, Error)]
pub enum TracingError {
    #[error("invalid runtime environment: {0}")]
    Environment(#[source] io::Error),

    #[error("failed to create log directory {path}: {source}")]
    LogDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid log filter: {0}")]
    Filter(#[from] ParseError),

    #[error("failed to install tracing subscriber: {0}")]
    Init(#[from] TryInitError),
}

/// Flushes buffered log lines to the log file when dropped.
///
/// Keep it alive until the process is about to exit.
#[must_use = "dropping the flusher stops writing to the log file"]
pub struct LogFlusher {
    log_file: PathBuf,
    _guard: WorkerGuard,
}

impl LogFlusher {
    /// Path of the file this run logs to.
    pub fn log_file(&self) -> &Path {
        &self.log_file
    }
}

/// Installs a subscriber writing to stdout and to `logs/<app>_<YYYYmmdd_HHMMSS>.log`.
///
/// Output is JSON lines in [`Environment::Prod`] and text otherwise. The filter comes from
/// `RUST_LOG` and defaults to `info`.
pub fn init_tracing(app_name: &str) -> Result<LogFlusher, TracingError> {
    let environment = Environment::load().map_err(TracingError::Environment)?;

    init_tracing_with(app_name, Path::new(LOG_DIR), environment)
}

/// Same as [`init_tracing`] with an explicit log directory and environment.
pub fn init_tracing_with(
    app_name: &str,
    log_dir: &Path,
    environment: Environment,
) -> Result<LogFlusher, TracingError> {
    std::fs::create_dir_all(log_dir).map_err(|source| TracingError::LogDir {
        path: log_dir.to_path_buf(),
        source,
    })?;

    let file_name = log_file_name(app_name, Local::now());
    let log_file = log_dir.join(&file_name);
    let appender = tracing_appender::rolling::never(log_dir, &file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) => EnvFilter::try_new(directives)?,
        Err(_) => EnvFilter::try_new(DEFAULT_FILTER)?,
    };

    let (stdout_layer, file_layer) = if environment.is_prod() {
        (
            fmt::layer().json().with_writer(io::stdout).boxed(),
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(file_writer)
                .boxed(),
        )
    } else {
        (
            fmt::layer().with_writer(io::stdout).boxed(),
            fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer)
                .boxed(),
        )
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()?;

    Ok(LogFlusher {
        log_file,
        _guard: guard,
    })
}

/// Returns the log file name for a run of `app_name` started at `started_at`.
pub fn log_file_name(app_name: &str, started_at: DateTime<Local>) -> String {
    format!("{app_name}_{}.log", started_at.format("%Y%m%d_%H%M%S"))
}

/// Installs a test subscriber once per process.
///
/// Events are captured by the test harness and only shown for failing tests. Set `RUST_LOG`
/// to change the filter.
pub fn init_test_tracing() {
    INIT_TEST_TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_test_writer())
            .try_init();
    });
}
