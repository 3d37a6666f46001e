//! # Logging Utilities
//!
//! `tracing` bootstrap for programs embedding debuglens.
//!
//! The library crates only emit events; this module installs the global subscriber
//! that prints them.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use debuglens_utils::init_logging;
//!
//! // Keep the guard alive until exit so buffered file output is flushed
//! let _guard = init_logging().expect("Failed to initialize logging");
//! tracing::info!("resolver ready");
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Filter directives (e.g. `RUST_LOG=debuglens_core=trace`)
//! - `DEBUGLENS_LOG_FORMAT`: `pretty` (default) or `json`
//! - `DEBUGLENS_LOG_FILE`: Also write to this file, without ANSI colours. A path
//!   ending in `/` names a directory that receives `YYYY-MM-DD-debuglens.log`

use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::Utc;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::{self};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat
{
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

impl FromStr for LogFormat
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(LoggingError::InvalidFormat(s.to_string())),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel
{
    Error,
    Warn,
    Info,
    Debug,
    /// Includes one event per relocation section
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
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(LoggingError::InvalidLevel(s.to_string())),
        }
    }
}

/// Initialize logging from the environment
///
/// An unparsable `DEBUGLENS_LOG_FORMAT` falls back to `pretty`; an unset or invalid
/// `RUST_LOG` falls back to `info`.
///
/// ## Errors
///
/// Returns an error if a global subscriber is already installed or the log file
/// directory cannot be created.
pub fn init_logging() -> Result<Option<WorkerGuard>, LoggingError>
{
    let format = std::env::var("DEBUGLENS_LOG_FORMAT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_default();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()));

    install(format, filter, log_file_from_env())
}

/// Initialize logging with an explicit level, ignoring `RUST_LOG`
///
/// `DEBUGLENS_LOG_FILE` is still honoured.
///
/// ## Errors
///
/// Returns an error if a global subscriber is already installed or the log file
/// directory cannot be created.
pub fn init_logging_with_level(level: LogLevel, format: LogFormat) -> Result<Option<WorkerGuard>, LoggingError>
{
    install(format, EnvFilter::new(Level::from(level).to_string()), log_file_from_env())
}

fn log_file_from_env() -> Option<PathBuf>
{
    let raw = std::env::var("DEBUGLENS_LOG_FILE").ok().filter(|value| !value.is_empty())?;
    Some(resolve_log_file(&raw))
}

fn resolve_log_file(raw: &str) -> PathBuf
{
    if raw.ends_with('/') {
        let today = Utc::now().format("%Y-%m-%d");
        Path::new(raw).join(format!("{today}-debuglens.log"))
    } else {
        PathBuf::from(raw)
    }
}

fn console_layer(format: LogFormat) -> BoxedLayer
{
    let layer = fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_timer(ChronoUtc::rfc_3339())
        .with_writer(io::stderr);

    match format {
        LogFormat::Pretty => layer.with_ansi(true).boxed(),
        LogFormat::Json => layer.json().with_current_span(true).with_span_list(true).boxed(),
    }
}

fn file_layer(format: LogFormat, path: &Path) -> Result<(BoxedLayer, WorkerGuard), LoggingError>
{
    let dir = path.parent().filter(|dir| !dir.as_os_str().is_empty()).unwrap_or(Path::new("."));
    std::fs::create_dir_all(dir)?;
    let file_name = path.file_name().unwrap_or_else(|| "debuglens.log".as_ref());

    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
    let layer = fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_timer(ChronoUtc::rfc_3339())
        .with_ansi(false)
        .with_writer(writer);

    let layer = match format {
        LogFormat::Pretty => layer.boxed(),
        LogFormat::Json => layer.json().with_current_span(true).with_span_list(true).boxed(),
    };
    Ok((layer, guard))
}

fn install(format: LogFormat, filter: EnvFilter, log_file: Option<PathBuf>) -> Result<Option<WorkerGuard>, LoggingError>
{
    let mut layers = vec![console_layer(format)];
    let mut guard = None;
    if let Some(path) = log_file {
        let (layer, file_guard) = file_layer(format, &path)?;
        layers.push(layer);
        guard = Some(file_guard);
    }

    Registry::default()
        .with(layers.with_filter(filter))
        .try_init()
        .map_err(|err| LoggingError::InitializationFailed(err.to_string()))?;

    Ok(guard)
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError
{
    #[error("Invalid log format: {0}. Use 'pretty' or 'json'")]
    InvalidFormat(String),

    #[error("Invalid log level: {0}. Use 'error', 'warn', 'info', 'debug', or 'trace'")]
    InvalidLevel(String),

    /// A global subscriber was already installed
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    #[error("File logging error: {0}")]
    FileError(#[from] io::Error),
}
