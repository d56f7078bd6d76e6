//! Logging setup for hosts embedding trellis.
//!
//! The plugin crates only emit `tracing` events; installing a subscriber is left to the host. This module offers
//! the subscriber the `trellis` binary uses so other hosts can share it.
//!
//! # Environment Variables
//!
//! - `TRELLIS_LOG`: Filter directive (like `RUST_LOG`), e.g., `trellis_lua=debug`
//! - `TRELLIS_LOG_FORMAT`: Output format for stderr: `pretty`, `json`, `compact`
//! - `TRELLIS_LOG_DIR`: Directory for file logging (defaults to `~/.trellis/logs`)
//!
//! A bare level such as `info` applies to the trellis crates only; dependencies stay at `warn`.
//!
//! # Example
//!
//! ```no_run
//! use trellis_core::logging::{self, LogFormat, LoggingConfig};
//!
//! let config = LoggingConfig::default().with_overrides(Some("debug".into()), Some(LogFormat::Compact));
//! let _guard = logging::init_logging(Some(config))?;
//! tracing::info!("ready");
//! # Ok::<(), trellis_core::Error>(())
//! ```

use crate::Error;
use crate::config::{FileLoggingConfig, LoggingSection};
use std::env;
use std::fmt as std_fmt;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Crates whose events a bare level applies to.
const TRELLIS_TARGETS: &[&str] = &["trellis", "trellis_core", "trellis_native", "trellis_lua", "trellis_python"];

/// How events are written to stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Multi-line, colored
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
    /// One line per event
    Compact,
}

impl LogFormat {
    pub const VALUES: &[LogFormat] = &[LogFormat::Pretty, LogFormat::Json, LogFormat::Compact];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Pretty => "pretty",
            LogFormat::Json => "json",
            LogFormat::Compact => "compact",
        }
    }
}

impl std_fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std_fmt::Formatter<'_>) -> std_fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LogFormat::VALUES
            .iter()
            .copied()
            .find(|format| format.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("invalid log format '{}', expected pretty, json or compact", s))
    }
}

/// Resolved logging settings handed to [`init_logging`].
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Level for the trellis crates, or a full filter directive.
    pub level: String,
    /// stderr format; `None` picks one from the environment and TTY.
    pub format: Option<LogFormat>,
    /// Rolling file output, when enabled.
    pub file: Option<FileLoggingConfig>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "warn".to_string(), format: None, file: None }
    }
}

/// An unknown `format` in the manifest falls back to detection instead of failing.
impl From<LoggingSection> for LoggingConfig {
    fn from(section: LoggingSection) -> Self {
        Self {
            level: section.level,
            format: section.format.parse().ok(),
            file: section.file.enabled.then_some(section.file),
        }
    }
}

impl LoggingConfig {
    /// Apply command-line choices on top of the configured ones.
    pub fn with_overrides(mut self, level: Option<String>, format: Option<LogFormat>) -> Self {
        if let Some(level) = level {
            self.level = level;
        }
        if format.is_some() {
            self.format = format;
        }
        self
    }

    /// Filter directive for `level`: a bare level is scoped to the trellis crates.
    fn directive(level: &str) -> String {
        if level.contains('=') || level.contains(',') {
            return level.to_string();
        }
        let mut directive = String::from("warn");
        for target in TRELLIS_TARGETS {
            directive.push_str(&format!(",{}={}", target, level));
        }
        directive
    }

    fn build_env_filter(&self) -> EnvFilter {
        let filter = env::var("TRELLIS_LOG")
            .or_else(|_| env::var("RUST_LOG"))
            .unwrap_or_else(|_| Self::directive(&self.level));

        EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new("warn"))
    }

    /// `TRELLIS_LOG_FORMAT` wins over the configured format; without either, pretty on a TTY and compact otherwise.
    fn detect_format(&self) -> LogFormat {
        if let Ok(value) = env::var("TRELLIS_LOG_FORMAT")
            && let Ok(format) = value.parse()
        {
            return format;
        }

        match self.format {
            Some(format) => format,
            None if atty::is(atty::Stream::Stderr) => LogFormat::Pretty,
            None => LogFormat::Compact,
        }
    }

    fn log_dir(file: &FileLoggingConfig) -> Result<PathBuf, Error> {
        if let Ok(directory) = env::var("TRELLIS_LOG_DIR") {
            return Ok(PathBuf::from(directory));
        }
        if let Some(directory) = &file.directory {
            return Ok(directory.clone());
        }

        env::var_os("HOME")
            .or_else(|| env::var_os("USERPROFILE"))
            .map(|home| PathBuf::from(home).join(".trellis").join("logs"))
            .ok_or_else(|| Error::Config("no home directory for file logging; set logging.file.directory".to_string()))
    }
}

/// Keeps the background file writer alive; dropping it flushes pending file output.
#[derive(Default)]
pub struct LoggingGuard {
    _worker: Option<WorkerGuard>,
}

/// Install the global subscriber: filtered stderr output plus optional daily rolling JSON files.
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(config: Option<LoggingConfig>) -> Result<LoggingGuard, Error> {
    let config = config.unwrap_or_default();
    let env_filter = config.build_env_filter();

    let stderr_layer = match config.detect_format() {
        LogFormat::Pretty => fmt::layer().pretty().with_writer(io::stderr).boxed(),
        LogFormat::Json => fmt::layer().json().with_writer(io::stderr).boxed(),
        LogFormat::Compact => fmt::layer().compact().with_writer(io::stderr).boxed(),
    };

    let mut guard = LoggingGuard::default();
    let file_layer = match &config.file {
        Some(file) => {
            let directory = LoggingConfig::log_dir(file)?;
            std::fs::create_dir_all(&directory)?;

            let appender = tracing_appender::rolling::daily(directory, "trellis.log");
            let (writer, worker) = tracing_appender::non_blocking(appender);
            guard._worker = Some(worker);

            let filter = EnvFilter::try_new(LoggingConfig::directive(&file.level))
                .unwrap_or_else(|_| EnvFilter::new("debug"));
            Some(fmt::layer().json().with_writer(writer).with_filter(filter))
        }
        None => None,
    };

    Registry::default()
        .with(stderr_layer.with_filter(env_filter))
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Config(format!("tracing subscriber already installed: {}", e)))?;

    Ok(guard)
}
