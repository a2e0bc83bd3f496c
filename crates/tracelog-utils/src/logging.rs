//! # Logging Utilities
//!
//! Logging infrastructure for Tracelog using `tracing`.
//!
//! Console output goes to stderr so that decoded records written to stdout
//! stay machine-readable. Supported:
//! - Pretty output for terminals, JSON for log collectors
//! - Environment variable configuration
//! - Log level filtering with `RUST_LOG` directives
//! - An optional log file next to the console output, or instead of it
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tracelog_utils::init_logging;
//!
//! // Keep the guard alive for as long as file logging should work
//! let _guard = init_logging().expect("Failed to initialize logging");
//!
//! tracing::info!("Application started");
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level filter (e.g., `RUST_LOG=debug`, `RUST_LOG=tracelog_core=trace`)
//! - `TRACELOG_LOG_FORMAT`: Set output format (`json` or `pretty`, default: `pretty`)
//! - `TRACELOG_LOG_FILE`: Optional path to a log file written alongside the console
//!
//! ## Examples
//!
//! ```rust,no_run
//! use tracelog_utils::{LogFormat, LogLevel, init_logging_to_file, init_logging_with_level};
//!
//! // Console only, explicit level
//! let _guard = init_logging_with_level(LogLevel::Debug, LogFormat::Pretty).expect("Failed to initialize logging");
//!
//! // Or: JSON into a file, nothing on the console
//! let _guard = init_logging_to_file("tracelog.log".as_ref(), LogFormat::Json, None).expect("Failed to initialize logging");
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{env, fs, io};

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::writer::MakeWriter;
use tracing_subscriber::fmt::{self};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat
{
    /// Pretty-printed, human-readable format (default)
    Pretty,
    /// JSON lines
    Json,
}

impl FromStr for LogFormat
{
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "pretty" | "dev" | "development" => Ok(LogFormat::Pretty),
            "json" | "prod" | "production" => Ok(LogFormat::Json),
            _ => Err(format!("Unknown log format: {s}. Use 'pretty' or 'json'")),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel
{
    /// Error level
    Error,
    /// Warning level
    Warn,
    /// Info level (default)
    Info,
    /// Debug level
    Debug,
    /// Trace level (most verbose)
    Trace,
}

impl From<LogLevel> for Level
{
    fn from(level: LogLevel) -> Self
    {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

impl FromStr for LogLevel
{
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "error" | "err" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" | "dbg" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(format!(
                "Unknown log level: {s}. Use 'error', 'warn', 'info', 'debug', or 'trace'"
            )),
        }
    }
}

/// Keeps the background file writer running.
///
/// Dropping it flushes and stops file logging; console logging continues.
#[must_use = "file logging stops when the guard is dropped"]
#[derive(Debug)]
pub struct LoggingGuard
{
    _file: Option<WorkerGuard>,
}

/// Initialize logging with default settings
///
/// Reads configuration from environment variables:
/// - `RUST_LOG`: Log level filter (e.g., `debug`, `tracelog_core=debug`)
/// - `TRACELOG_LOG_FORMAT`: Output format (`json` or `pretty`, default: `pretty`)
/// - `TRACELOG_LOG_FILE`: Optional path to log file
///
/// ## Errors
///
/// Returns an error if:
/// - Logging is already initialized
/// - The log file directory cannot be created
pub fn init_logging() -> Result<LoggingGuard, LoggingError>
{
    let format = env::var("TRACELOG_LOG_FORMAT")
        .ok()
        .and_then(|s| LogFormat::from_str(&s).ok())
        .unwrap_or(LogFormat::Pretty);

    let default_level = env::var("RUST_LOG")
        .unwrap_or_else(|_| "info".to_string())
        .parse::<LogLevel>()
        .map(Into::into)
        .unwrap_or(Level::INFO);

    let log_file = env::var("TRACELOG_LOG_FILE").ok().map(PathBuf::from);
    init_logging_internal(format, default_level, log_file.as_deref())
}

/// Initialize logging with explicit level and format
///
/// `RUST_LOG` still wins when it is set, so module-specific directives keep
/// working.
///
/// ## Errors
///
/// Returns an error if logging is already initialized.
pub fn init_logging_with_level(level: LogLevel, format: LogFormat) -> Result<LoggingGuard, LoggingError>
{
    init_logging_internal(format, level.into(), None)
}

/// Initialize file-only logging
///
/// Nothing is written to the console. Useful when both stdout and stderr
/// are consumed by another program.
///
/// ## Arguments
///
/// * `level` - Optional log level. If `None`, uses `RUST_LOG` or defaults to `INFO`.
///
/// ## Errors
///
/// Returns an error if logging is already initialized or the directory of
/// `log_file` cannot be created.
pub fn init_logging_to_file(log_file: &Path, format: LogFormat, level: Option<LogLevel>) -> Result<LoggingGuard, LoggingError>
{
    // Priority: explicit level, then RUST_LOG, then INFO
    let env_filter = if let Some(level) = level {
        EnvFilter::new(Level::from(level).to_string())
    } else if let Ok(rust_log) = env::var("RUST_LOG") {
        EnvFilter::try_new(&rust_log).unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()))
    } else {
        EnvFilter::new(Level::INFO.to_string())
    };

    let (file_layer, guard) = file_layer(log_file, format, env_filter)?;
    Registry::default()
        .with(vec![file_layer])
        .try_init()
        .map_err(|err| LoggingError::InitializationFailed(err.to_string()))?;

    Ok(LoggingGuard { _file: Some(guard) })
}

fn init_logging_internal(format: LogFormat, default_level: Level, log_file: Option<&Path>) -> Result<LoggingGuard, LoggingError>
{
    // RUST_LOG can override the default level with more specific filters
    let env_filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));

    let mut layers = vec![build_layer(format, io::stderr, true, env_filter())];
    let mut guard = None;
    if let Some(path) = log_file {
        let (layer, file_guard) = file_layer(path, format, env_filter())?;
        layers.push(layer);
        guard = Some(file_guard);
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|err| LoggingError::InitializationFailed(err.to_string()))?;

    Ok(LoggingGuard { _file: guard })
}

fn file_layer(log_file: &Path, format: LogFormat, env_filter: EnvFilter) -> Result<(BoxedLayer, WorkerGuard), LoggingError>
{
    let dir = match log_file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;
    let file_name = log_file.file_name().ok_or_else(|| {
        LoggingError::InitializationFailed(format!("{} does not name a file", log_file.display()))
    })?;

    let file_appender = tracing_appender::rolling::never(&dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    // No ANSI in files
    Ok((build_layer(format, non_blocking, false, env_filter), guard))
}

fn build_layer<W>(format: LogFormat, writer: W, ansi: bool, env_filter: EnvFilter) -> BoxedLayer
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    match format {
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_ansi(ansi)
            .with_writer(writer)
            .with_filter(env_filter)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(writer)
            .with_filter(env_filter)
            .boxed(),
    }
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError
{
    /// Invalid log format
    #[error("Invalid log format: {0}")]
    InvalidFormat(String),

    /// Invalid log level
    #[error("Invalid log level: {0}")]
    InvalidLevel(String),

    /// Failed to initialize logging
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    /// File logging error
    #[error("File logging error: {0}")]
    FileError(#[from] io::Error),
}
