//! Subscriber setup for hosts that do not install their own.
//!
//! The engine only emits `tracing` events. [`init_logging`] routes them to
//! stderr or a file as configured by the `log { ... }` block of config.kdl
//! (see [`crate::config::ResolvedConfig::log_config`]).
//!
//! # Log Levels
//!
//! - `warn`: Persistence and journal failures (never fatal)
//! - `info`: Evictions, branch creation and deletion, imports, AI jobs
//! - `debug`: State machine transitions, node creation, navigation
//! - `trace`: Per-frame gesture physics updates

use crate::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, PartialEq)]
pub struct LogConfig {
    /// Level for this crate's events; dependencies stay at warn
    pub level: Level,
    pub format: LogFormat,
    /// Append to this file instead of writing to stderr
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::default(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

impl LogFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Json => "json",
        }
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG`, when set, replaces the configured level. Fails if the log
/// file cannot be opened or a global subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,canvas_history={}",
            config.level.as_str().to_lowercase()
        ))
    });
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match (&config.file, config.format) {
        (Some(path), LogFormat::Json) => registry
            .with(fmt::layer().json().with_writer(file_appender(path)?))
            .try_init(),
        (Some(path), LogFormat::Text) => registry
            .with(fmt::layer().with_ansi(false).with_writer(file_appender(path)?))
            .try_init(),
        (None, LogFormat::Json) => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        (None, LogFormat::Text) => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    };

    installed.map_err(|e| Error::Other(format!("Failed to install log subscriber: {}", e)))
}

/// Append-only, never rotated.
fn file_appender(path: &Path) -> Result<RollingFileAppender> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::Config(format!("log file {} has no file name", path.display())))?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));

    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(name)
        .build(dir)
        .map_err(|e| Error::Config(format!("cannot open log file {}: {}", path.display(), e)))
}
