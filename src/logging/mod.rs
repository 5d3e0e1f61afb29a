//! Logging setup on top of `tracing-subscriber`
//!
//! Output is human-readable or JSON, optionally mirrored as JSON into a
//! file. Initialisation happens at most once per process.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: standard tracing filter, takes precedence (e.g. "rocml=trace")
//! - `ROCML_LOG_LEVEL`: error, warn, info, debug or trace
//! - `ROCML_LOG_FORMAT`: "human" or "json"
//! - `ROCML_LOG_FILE`: path of an additional JSON log file

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::error::{MlError, MlResult};

static TRACING_INITIALIZED: OnceCell<()> = OnceCell::new();

const LOG_LEVEL_ENV: &str = "ROCML_LOG_LEVEL";
const LOG_FORMAT_ENV: &str = "ROCML_LOG_FORMAT";
const LOG_FILE_ENV: &str = "ROCML_LOG_FILE";

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }

    pub fn as_filter_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl FromStr for LogLevel {
    type Err = MlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(MlError::Logging(format!("invalid log level: {}", other))),
        }
    }
}

/// Console output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Human,
    Json,
}

impl FromStr for LogFormat {
    type Err = MlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "human" | "pretty" | "console" => Ok(LogFormat::Human),
            "json" | "structured" => Ok(LogFormat::Json),
            other => Err(MlError::Logging(format!("invalid log format: {}", other))),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    /// Include file and line in console output
    pub with_file_info: bool,
    /// Emit an event when spans close
    pub with_span_events: bool,
    /// Additional JSON log file
    pub log_file: Option<PathBuf>,
}

impl LoggingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_file_info(mut self, with_file_info: bool) -> Self {
        self.with_file_info = with_file_info;
        self
    }

    pub fn with_span_events(mut self, with_span_events: bool) -> Self {
        self.with_span_events = with_span_events;
        self
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Defaults overridden by the `ROCML_LOG_*` variables
    ///
    /// Unparseable values are reported rather than ignored.
    pub fn from_env() -> MlResult<Self> {
        let mut config = Self::new();
        if let Ok(level) = std::env::var(LOG_LEVEL_ENV) {
            config.level = level.parse()?;
        }
        if let Ok(format) = std::env::var(LOG_FORMAT_ENV) {
            config.format = format.parse()?;
        }
        if let Ok(file) = std::env::var(LOG_FILE_ENV) {
            config.log_file = Some(PathBuf::from(file));
        }
        Ok(config)
    }
}

/// Initialise from the environment, falling back to defaults on bad values
///
/// ```ignore
/// rocml::init_logging_default();
/// tracing::info!("started");
/// ```
pub fn init_logging_default() {
    let config = LoggingConfig::from_env().unwrap_or_default();
    init_with_config(&config);
}

/// Initialise from the environment
///
/// Fails on unparseable variables or an unopenable log file. A no-op if
/// logging is already initialised.
pub fn init_logging_from_env() -> MlResult<()> {
    let config = LoggingConfig::from_env()?;
    try_init_with_config(&config)
}

/// Initialise with `config`, ignoring failures
pub fn init_with_config(config: &LoggingConfig) {
    if let Err(e) = try_init_with_config(config) {
        eprintln!("rocml: logging disabled: {}", e);
    }
}

/// Initialise with `config`
pub fn try_init_with_config(config: &LoggingConfig) -> MlResult<()> {
    let mut result = Ok(());
    TRACING_INITIALIZED.get_or_init(|| {
        result = install(config);
    });
    result
}

pub fn is_initialized() -> bool {
    TRACING_INITIALIZED.get().is_some()
}

fn install(config: &LoggingConfig) -> MlResult<()> {
    let filter = build_env_filter(config.level)?;
    let spans = if config.with_span_events {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    // File output is always JSON with source locations
    let file_layer = match &config.log_file {
        Some(path) => Some(
            fmt::layer()
                .json()
                .with_writer(Arc::new(open_log_file(path)?))
                .with_target(false)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false)
                .with_span_events(spans.clone()),
        ),
        None => None,
    };

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);
    let installed = match config.format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(false)
                    .with_file(config.with_file_info)
                    .with_line_number(config.with_file_info)
                    .with_span_events(spans),
            )
            .try_init(),
        LogFormat::Human => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_file(config.with_file_info)
                    .with_line_number(config.with_file_info)
                    .with_span_events(spans),
            )
            .try_init(),
    };
    installed.map_err(|e| MlError::Logging(e.to_string()))
}

fn open_log_file(path: &Path) -> MlResult<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            MlError::Logging(format!("cannot create {}: {}", parent.display(), e))
        })?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| MlError::Logging(format!("cannot open {}: {}", path.display(), e)))
}

/// `RUST_LOG` if set, otherwise `level`
fn build_env_filter(level: LogLevel) -> MlResult<EnvFilter> {
    match std::env::var("RUST_LOG") {
        Ok(directives) => EnvFilter::try_new(directives)
            .map_err(|e| MlError::Logging(format!("invalid RUST_LOG: {}", e))),
        Err(_) => Ok(EnvFilter::new(level.as_filter_str())),
    }
}
