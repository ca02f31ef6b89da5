//! Logging setup for the compositor.
//!
//! Built on `tracing`. [`init_minimal_logging`] installs a stderr subscriber
//! for use before the configuration is available; [`init_logging`] installs
//! the configured stdout layer and an optional rolling file layer.

use std::fs;
use std::io::stdout;
use std::path::Path;
use std::sync::Mutex;

use once_cell::sync::Lazy;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

use crate::config::LoggingConfig;
use crate::error::CompositorError;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Keeps the non-blocking file writer alive until the process exits.
static LOG_WORKER_GUARD: Lazy<Mutex<Option<WorkerGuard>>> = Lazy::new(|| Mutex::new(None));

/// Installs a stderr subscriber at INFO, or at `RUST_LOG` if set.
///
/// Does nothing if a global subscriber is already installed.
pub fn init_minimal_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()));

    let _ = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .try_init();
}

/// Installs the global subscriber described by `config`.
///
/// # Errors
///
/// Returns [`CompositorError::Logging`] if the level is unknown or a global
/// subscriber is already installed, and [`CompositorError::Io`] if the log
/// directory cannot be created.
pub fn init_logging(config: &LoggingConfig) -> Result<(), CompositorError> {
    let level = parse_level(&config.level)?;

    let stdout_filter = EnvFilter::new(level.to_string());
    let stdout_layer = match config.format.as_str() {
        "json" => fmt::layer()
            .json()
            .with_writer(stdout)
            .with_ansi(false)
            .with_filter(stdout_filter)
            .boxed(),
        _ => fmt::layer()
            .with_writer(stdout)
            .with_ansi(atty::is(atty::Stream::Stdout))
            .with_filter(stdout_filter)
            .boxed(),
    };

    let mut layers: Vec<BoxedLayer> = vec![stdout_layer];
    let mut file_guard = None;
    if let Some(log_path) = &config.file_path {
        let (file_layer, guard) = create_file_layer(log_path, &config.format)?;
        layers.push(file_layer.with_filter(EnvFilter::new(level.to_string())).boxed());
        file_guard = Some(guard);
    }

    Registry::default().with(layers).try_init().map_err(|e| {
        CompositorError::Logging(format!(
            "Failed to set global tracing subscriber. Was it already initialized? Error: {e}"
        ))
    })?;

    match LOG_WORKER_GUARD.lock() {
        Ok(mut slot) => *slot = file_guard,
        Err(e) => eprintln!(
            "[ERROR] Failed to store the log writer guard: {e}. Log flushing may be affected."
        ),
    }
    Ok(())
}

fn parse_level(level: &str) -> Result<Level, CompositorError> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(CompositorError::Logging(format!(
            "Invalid log level in config: {other}"
        ))),
    }
}

/// Creates a daily-rolling, non-blocking file layer writing to `log_path`.
fn create_file_layer(
    log_path: &Path,
    format: &str,
) -> Result<(BoxedLayer, WorkerGuard), CompositorError> {
    let directory = log_path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(directory)?;

    let file_name = log_path
        .file_name()
        .unwrap_or_else(|| std::ffi::OsStr::new("compositor.log"));
    let appender = tracing_appender::rolling::daily(directory, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let layer = match format {
        "json" => fmt::layer().json().with_writer(writer).with_ansi(false).boxed(),
        _ => fmt::layer().with_writer(writer).with_ansi(false).boxed(),
    };
    Ok((layer, guard))
}
