//! Action journal for navigation commands.
//!
//! Every command the navigation controller executes can be appended to a
//! JSONL file, one [`ActionLog`] per line. Journaling never fails the
//! command: write errors are reported through `tracing` and dropped.

use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Represents a single action log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionLog {
    /// When the command finished
    pub timestamp: DateTime<Utc>,

    /// Canvas session the command ran against
    pub session: String,

    /// Command name (e.g., "undo", "create_snapshot", "import_state")
    pub command: String,

    /// Command arguments as JSON
    pub args: serde_json::Value,

    /// Whether the command succeeded
    pub success: bool,

    /// Error message if the command failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Command execution duration in milliseconds
    pub duration_ms: u64,
}

/// Appends [`ActionLog`] entries to a file.
#[derive(Debug, Clone)]
pub struct ActionLogger {
    path: PathBuf,
    session: String,
    sanitize: bool,
}

impl ActionLogger {
    pub fn new(path: impl AsRef<Path>, session: impl Into<String>) -> Self {
        Self {
            path: expand_home(path.as_ref()),
            session: session.into(),
            sanitize: true,
        }
    }

    /// Keep arguments verbatim instead of redacting and truncating them.
    pub fn with_sanitize(mut self, sanitize: bool) -> Self {
        self.sanitize = sanitize;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record the outcome of one command.
    pub fn record<T>(
        &self,
        command: &str,
        args: serde_json::Value,
        outcome: &Result<T>,
        elapsed: Duration,
    ) {
        let args = if self.sanitize {
            sanitize_args(&args)
        } else {
            args
        };
        let entry = ActionLog {
            timestamp: Utc::now(),
            session: self.session.clone(),
            command: command.to_string(),
            args,
            success: outcome.is_ok(),
            error: outcome.as_ref().err().map(|e| e.to_string()),
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        };

        if let Err(e) = write_log_entry(&self.path, &entry) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to write action log");
        }
    }
}

/// Read every entry back, skipping lines that fail to parse.
pub fn read_entries(path: &Path) -> Result<Vec<ActionLog>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(File::open(path)?);
    let mut entries = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if let Ok(entry) = serde_json::from_str::<ActionLog>(&line) {
            entries.push(entry);
        }
    }
    Ok(entries)
}

/// Expand ~ in path to home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}

fn write_log_entry(path: &Path, entry: &ActionLog) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string(entry)?;
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", json)?;
    Ok(())
}

/// Redact secrets, shorten prompts and collapse large arrays such as layer
/// lists.
fn sanitize_args(args: &serde_json::Value) -> serde_json::Value {
    match args {
        serde_json::Value::Object(map) => {
            let mut sanitized = serde_json::Map::new();
            for (key, value) in map {
                let key_lower = key.to_lowercase();
                if key_lower.contains("token")
                    || key_lower.contains("secret")
                    || key_lower.contains("api_key")
                    || key_lower.contains("password")
                {
                    sanitized.insert(
                        key.clone(),
                        serde_json::Value::String("[REDACTED]".to_string()),
                    );
                } else {
                    sanitized.insert(key.clone(), sanitize_args(value));
                }
            }
            serde_json::Value::Object(sanitized)
        }
        serde_json::Value::Array(arr) => {
            if arr.len() > 10 {
                serde_json::Value::String(format!("[Array with {} items]", arr.len()))
            } else {
                serde_json::Value::Array(arr.iter().map(sanitize_args).collect())
            }
        }
        serde_json::Value::String(s) => {
            let len = s.chars().count();
            if len > 100 {
                let head: String = s.chars().take(97).collect();
                serde_json::Value::String(format!("{}... ({} chars)", head, len))
            } else {
                serde_json::Value::String(s.clone())
            }
        }
        _ => args.clone(),
    }
}
