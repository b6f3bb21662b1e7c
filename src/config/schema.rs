//! KDL schema for config.kdl.
//!
//! Every field is optional so a file only needs to name what it changes;
//! layers are combined with [`EngineConfig::merge`] and unset values fall
//! back to the built-in defaults of each component.

use crate::action_log::expand_home;
use crate::ai::{BackoffStrategy, FallbackStrategy, SchedulerConfig};
use crate::gesture::GestureConfig;
use crate::logging::{LogConfig, LogFormat};
use crate::storage::BackendType;
use crate::{Error, Result};
use kdl::{KdlDocument, KdlEntry, KdlNode, KdlValue};
use std::path::Path;
use tracing::Level;

/// Name of the config file inside a config directory.
pub const CONFIG_FILE: &str = "config.kdl";

/// Gesture tuning, the `gesture { ... }` block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GestureSection {
    pub friction: Option<f64>,
    pub threshold: Option<f64>,
    pub momentum: Option<bool>,
    pub history_limit: Option<usize>,
}

impl GestureSection {
    fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn from_kdl(doc: &KdlDocument) -> Self {
        Self {
            friction: doc.get("friction").and_then(get_f64_arg),
            threshold: doc.get("threshold").and_then(get_f64_arg),
            momentum: doc.get("momentum").and_then(get_bool_arg),
            history_limit: doc.get("history-limit").and_then(get_count_arg),
        }
    }

    fn to_kdl(&self) -> KdlDocument {
        let mut doc = KdlDocument::new();
        if let Some(friction) = self.friction {
            doc.nodes_mut().push(value_node("friction", KdlValue::Float(friction)));
        }
        if let Some(threshold) = self.threshold {
            doc.nodes_mut().push(value_node("threshold", KdlValue::Float(threshold)));
        }
        if let Some(momentum) = self.momentum {
            doc.nodes_mut().push(value_node("momentum", KdlValue::Bool(momentum)));
        }
        if let Some(limit) = self.history_limit {
            doc.nodes_mut()
                .push(value_node("history-limit", KdlValue::Integer(limit as i128)));
        }
        doc
    }

    fn merge(&mut self, other: &GestureSection) {
        if other.friction.is_some() {
            self.friction = other.friction;
        }
        if other.threshold.is_some() {
            self.threshold = other.threshold;
        }
        if other.momentum.is_some() {
            self.momentum = other.momentum;
        }
        if other.history_limit.is_some() {
            self.history_limit = other.history_limit;
        }
    }

    /// Apply the set fields on top of the defaults.
    pub fn build(&self) -> Result<GestureConfig> {
        let defaults = GestureConfig::default();
        let config = GestureConfig {
            friction: self.friction.unwrap_or(defaults.friction),
            threshold: self.threshold.unwrap_or(defaults.threshold),
            momentum_enabled: self.momentum.unwrap_or(defaults.momentum_enabled),
            history_limit: self.history_limit.unwrap_or(defaults.history_limit),
        };
        config.validate()?;
        Ok(config)
    }
}

/// AI scheduler tuning, the `ai { ... }` block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AiSection {
    pub max_retries: Option<u32>,
    pub backoff_base_ms: Option<u64>,
    pub backoff_max_ms: Option<u64>,
    pub max_queue_size: Option<usize>,
    pub fallback: Option<FallbackStrategy>,
}

impl AiSection {
    fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn from_kdl(doc: &KdlDocument) -> Self {
        let mut section = Self {
            max_retries: doc
                .get("max-retries")
                .and_then(get_count_arg)
                .and_then(|n| u32::try_from(n).ok()),
            backoff_base_ms: doc.get("backoff-base-ms").and_then(get_millis_arg),
            backoff_max_ms: doc.get("backoff-max-ms").and_then(get_millis_arg),
            max_queue_size: doc.get("max-queue-size").and_then(get_count_arg),
            fallback: None,
        };
        if let Some(raw) = doc.get("fallback").and_then(get_string_arg) {
            section.fallback = FallbackStrategy::parse(&raw);
            if section.fallback.is_none() {
                tracing::warn!(value = %raw, "Ignoring unknown ai fallback strategy");
            }
        }
        section
    }

    fn to_kdl(&self) -> KdlDocument {
        let mut doc = KdlDocument::new();
        if let Some(n) = self.max_retries {
            doc.nodes_mut()
                .push(value_node("max-retries", KdlValue::Integer(n as i128)));
        }
        if let Some(ms) = self.backoff_base_ms {
            doc.nodes_mut()
                .push(value_node("backoff-base-ms", KdlValue::Integer(ms as i128)));
        }
        if let Some(ms) = self.backoff_max_ms {
            doc.nodes_mut()
                .push(value_node("backoff-max-ms", KdlValue::Integer(ms as i128)));
        }
        if let Some(n) = self.max_queue_size {
            doc.nodes_mut()
                .push(value_node("max-queue-size", KdlValue::Integer(n as i128)));
        }
        if let Some(fallback) = self.fallback {
            doc.nodes_mut().push(value_node(
                "fallback",
                KdlValue::String(fallback.as_str().to_string()),
            ));
        }
        doc
    }

    fn merge(&mut self, other: &AiSection) {
        if other.max_retries.is_some() {
            self.max_retries = other.max_retries;
        }
        if other.backoff_base_ms.is_some() {
            self.backoff_base_ms = other.backoff_base_ms;
        }
        if other.backoff_max_ms.is_some() {
            self.backoff_max_ms = other.backoff_max_ms;
        }
        if other.max_queue_size.is_some() {
            self.max_queue_size = other.max_queue_size;
        }
        if other.fallback.is_some() {
            self.fallback = other.fallback;
        }
    }

    /// Apply the set fields on top of the defaults.
    pub fn build(&self) -> Result<SchedulerConfig> {
        let defaults = SchedulerConfig::default();
        let mut retry = defaults.retry.clone();
        if let Some(n) = self.max_retries {
            retry.max_retries = n;
        }
        if let BackoffStrategy::Exponential { base_ms, max_ms } = &mut retry.backoff {
            if let Some(base) = self.backoff_base_ms {
                *base_ms = base;
            }
            if let Some(max) = self.backoff_max_ms {
                *max_ms = max;
            }
        }

        let config = SchedulerConfig {
            retry,
            max_queue_size: self.max_queue_size.unwrap_or(defaults.max_queue_size),
            fallback: self.fallback.unwrap_or(defaults.fallback),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Log output, the `log { ... }` block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogSection {
    pub level: Option<Level>,
    pub format: Option<LogFormat>,
    /// `~` is expanded
    pub file: Option<String>,
}

impl LogSection {
    fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn from_kdl(doc: &KdlDocument) -> Self {
        let mut section = Self {
            file: doc.get("file").and_then(get_string_arg),
            ..Default::default()
        };
        if let Some(raw) = doc.get("level").and_then(get_string_arg) {
            section.level = raw.parse().ok();
            if section.level.is_none() {
                tracing::warn!(value = %raw, "Ignoring unknown log level");
            }
        }
        if let Some(raw) = doc.get("format").and_then(get_string_arg) {
            section.format = LogFormat::parse(&raw);
            if section.format.is_none() {
                tracing::warn!(value = %raw, "Ignoring unknown log format");
            }
        }
        section
    }

    fn to_kdl(&self) -> KdlDocument {
        let mut doc = KdlDocument::new();
        if let Some(level) = self.level {
            doc.nodes_mut().push(value_node(
                "level",
                KdlValue::String(level.as_str().to_lowercase()),
            ));
        }
        if let Some(format) = self.format {
            doc.nodes_mut().push(value_node(
                "format",
                KdlValue::String(format.as_str().to_string()),
            ));
        }
        if let Some(ref file) = self.file {
            doc.nodes_mut()
                .push(value_node("file", KdlValue::String(file.clone())));
        }
        doc
    }

    fn merge(&mut self, other: &LogSection) {
        if other.level.is_some() {
            self.level = other.level;
        }
        if other.format.is_some() {
            self.format = other.format;
        }
        if other.file.is_some() {
            self.file = other.file.clone();
        }
    }

    /// Apply the set fields on top of the defaults.
    pub fn build(&self) -> LogConfig {
        let defaults = LogConfig::default();
        LogConfig {
            level: self.level.unwrap_or(defaults.level),
            format: self.format.unwrap_or(defaults.format),
            file: self.file.as_deref().map(|p| expand_home(Path::new(p))),
        }
    }
}

/// Engine preferences stored in config.kdl.
///
/// # KDL Schema
///
/// ```kdl
/// max-history-size 100
/// storage "sqlite"  // "memory" | "jsonl" | "sqlite"
/// action-log "~/.local/share/canvas-history/action.log"
///
/// gesture {
///     friction 0.85
///     threshold 10.0
///     momentum #true
///     history-limit 1000
/// }
///
/// ai {
///     max-retries 3
///     backoff-base-ms 500
///     backoff-max-ms 8000
///     max-queue-size 64
///     fallback "show-cached-suggestions"
/// }
///
/// log {
///     level "debug"  // "error" | "warn" | "info" | "debug" | "trace"
///     format "json"  // "text" | "json"
///     file "~/.local/share/canvas-history/engine.log"
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineConfig {
    /// Node count past which the oldest history is evicted
    pub max_history_size: Option<usize>,

    /// Persistence backend for history
    pub storage: Option<BackendType>,

    /// Path of the JSONL action journal; `~` is expanded
    pub action_log: Option<String>,

    pub gesture: GestureSection,

    pub ai: AiSection,

    pub log: LogSection,
}

impl EngineConfig {
    /// Create an empty config with no values set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check ranges that parsing alone lets through.
    pub fn validate(&self) -> Result<()> {
        if self.max_history_size == Some(0) {
            return Err(Error::Config("max-history-size must be at least 1".to_string()));
        }
        if let Some(path) = &self.action_log
            && path.trim().is_empty()
        {
            return Err(Error::Config("action-log must not be empty".to_string()));
        }
        self.gesture
            .build()
            .map_err(|e| Error::Config(format!("gesture: {}", e)))?;
        self.ai
            .build()
            .map_err(|e| Error::Config(format!("ai: {}", e)))?;
        if let Some(path) = &self.log.file
            && path.trim().is_empty()
        {
            return Err(Error::Config("log: file must not be empty".to_string()));
        }
        Ok(())
    }

    /// Parse config from a KDL document.
    ///
    /// Unknown nodes are ignored. Values of the wrong type or outside the
    /// representable range are dropped, leaving the field unset.
    pub fn from_kdl(doc: &KdlDocument) -> Self {
        let mut config = Self::new();

        config.max_history_size = doc.get("max-history-size").and_then(get_count_arg);

        if let Some(raw) = doc.get("storage").and_then(get_string_arg) {
            config.storage = BackendType::parse(&raw);
            if config.storage.is_none() {
                tracing::warn!(value = %raw, "Ignoring unknown storage backend");
            }
        }

        config.action_log = doc.get("action-log").and_then(get_string_arg);

        if let Some(children) = doc.get("gesture").and_then(|n| n.children()) {
            config.gesture = GestureSection::from_kdl(children);
        }
        if let Some(children) = doc.get("ai").and_then(|n| n.children()) {
            config.ai = AiSection::from_kdl(children);
        }
        if let Some(children) = doc.get("log").and_then(|n| n.children()) {
            config.log = LogSection::from_kdl(children);
        }

        config
    }

    /// Convert config to a KDL document.
    pub fn to_kdl(&self) -> KdlDocument {
        let mut doc = KdlDocument::new();

        if let Some(size) = self.max_history_size {
            doc.nodes_mut()
                .push(value_node("max-history-size", KdlValue::Integer(size as i128)));
        }
        if let Some(storage) = self.storage {
            doc.nodes_mut().push(value_node(
                "storage",
                KdlValue::String(storage.as_str().to_string()),
            ));
        }
        if let Some(ref path) = self.action_log {
            doc.nodes_mut()
                .push(value_node("action-log", KdlValue::String(path.clone())));
        }
        if !self.gesture.is_empty() {
            let mut node = KdlNode::new("gesture");
            node.set_children(self.gesture.to_kdl());
            doc.nodes_mut().push(node);
        }
        if !self.ai.is_empty() {
            let mut node = KdlNode::new("ai");
            node.set_children(self.ai.to_kdl());
            doc.nodes_mut().push(node);
        }
        if !self.log.is_empty() {
            let mut node = KdlNode::new("log");
            node.set_children(self.log.to_kdl());
            doc.nodes_mut().push(node);
        }

        doc
    }

    /// Merge another config into this one.
    /// Values from `other` override values in `self` if they are Some.
    pub fn merge(&mut self, other: &EngineConfig) {
        if other.max_history_size.is_some() {
            self.max_history_size = other.max_history_size;
        }
        if other.storage.is_some() {
            self.storage = other.storage;
        }
        if other.action_log.is_some() {
            self.action_log = other.action_log.clone();
        }
        self.gesture.merge(&other.gesture);
        self.ai.merge(&other.ai);
        self.log.merge(&other.log);
    }

    /// Load a config file. A missing file is an empty config.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path)?;
        let doc: KdlDocument = content.parse().map_err(|e| {
            Error::Config(format!("Failed to parse KDL in {}: {}", path.display(), e))
        })?;
        Ok(Self::from_kdl(&doc))
    }

    /// Write the config as KDL, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_kdl().to_string())?;
        Ok(())
    }
}

fn value_node(name: &str, value: KdlValue) -> KdlNode {
    let mut node = KdlNode::new(name);
    node.push(KdlEntry::new(value));
    node
}

fn first_value(node: &KdlNode) -> Option<&KdlValue> {
    node.entries().first().map(|e| e.value())
}

/// Get a string argument from a node's first entry.
fn get_string_arg(node: &KdlNode) -> Option<String> {
    first_value(node)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

/// Get a boolean argument from a node's first entry.
fn get_bool_arg(node: &KdlNode) -> Option<bool> {
    first_value(node).and_then(|v| v.as_bool())
}

/// Integers are accepted where a float is expected (`threshold 10`).
fn get_f64_arg(node: &KdlNode) -> Option<f64> {
    let value = first_value(node)?;
    value
        .as_float()
        .or_else(|| value.as_integer().map(|i| i as f64))
}

fn get_count_arg(node: &KdlNode) -> Option<usize> {
    first_value(node)
        .and_then(|v| v.as_integer())
        .and_then(|i| usize::try_from(i).ok())
}

fn get_millis_arg(node: &KdlNode) -> Option<u64> {
    first_value(node)
        .and_then(|v| v.as_integer())
        .and_then(|i| u64::try_from(i).ok())
}
