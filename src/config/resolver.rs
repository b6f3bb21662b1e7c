//! Precedence resolution for engine configuration.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. Runtime overrides (passed by the host application)
//! 2. Session config.kdl (`<data-dir>/canvas-history/<session-hash>/config.kdl`)
//! 3. System config.kdl (`~/.config/canvas-history/config.kdl`)
//! 4. Built-in defaults
//!
//! `max-history-size` and `storage` carry their [`ValueSource`] so hosts can
//! explain where a surprising value came from. The gesture, ai, log and
//! action-log settings are merged field by field without source tracking.

use crate::Result;
use crate::action_log::expand_home;
use crate::ai::SchedulerConfig;
use crate::config::schema::{CONFIG_FILE, EngineConfig};
use crate::gesture::GestureConfig;
use crate::logging::LogConfig;
use crate::navigation::{DEFAULT_MAX_HISTORY_SIZE, NavigationConfig};
use crate::storage::BackendType;
use std::path::{Path, PathBuf};

/// Environment variable overriding the system config directory.
pub const CONFIG_DIR_ENV: &str = "CANVAS_HISTORY_CONFIG_DIR";

/// Tracks where a resolved value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    /// Value from a runtime override
    Override,
    /// Value from session-level config
    Session,
    /// Value from system-level config
    System,
    /// Built-in default value
    Default,
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSource::Override => write!(f, "override"),
            ValueSource::Session => write!(f, "session"),
            ValueSource::System => write!(f, "system"),
            ValueSource::Default => write!(f, "default"),
        }
    }
}

/// A resolved value with its source.
#[derive(Debug, Clone)]
pub struct Resolved<T> {
    /// The resolved value
    pub value: T,
    /// Where the value came from
    pub source: ValueSource,
}

impl<T> Resolved<T> {
    /// Create a new resolved value.
    pub fn new(value: T, source: ValueSource) -> Self {
        Self { value, source }
    }
}

/// Fully resolved configuration.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// History capacity before eviction
    pub max_history_size: Resolved<usize>,
    /// Persistence backend
    pub storage: Resolved<BackendType>,
    /// All layers merged, for the sections without source tracking
    pub merged: EngineConfig,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            max_history_size: Resolved::new(DEFAULT_MAX_HISTORY_SIZE, ValueSource::Default),
            storage: Resolved::new(BackendType::default(), ValueSource::Default),
            merged: EngineConfig::default(),
        }
    }
}

impl ResolvedConfig {
    pub fn max_history_size(&self) -> usize {
        self.max_history_size.value
    }

    pub fn storage(&self) -> BackendType {
        self.storage.value
    }

    /// Action journal path with `~` expanded, if configured.
    pub fn action_log_path(&self) -> Option<PathBuf> {
        self.merged.action_log.as_deref().map(|p| expand_home(Path::new(p)))
    }

    pub fn navigation_config(&self, session_id: impl Into<String>) -> Result<NavigationConfig> {
        let config = NavigationConfig {
            max_history_size: self.max_history_size(),
            session_id: session_id.into(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn gesture_config(&self) -> Result<GestureConfig> {
        self.merged.gesture.build()
    }

    pub fn scheduler_config(&self) -> Result<SchedulerConfig> {
        self.merged.ai.build()
    }

    /// Input for [`crate::logging::init_logging`].
    pub fn log_config(&self) -> LogConfig {
        self.merged.log.build()
    }
}

/// Runtime overrides for configuration resolution.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub max_history_size: Option<usize>,
    pub storage: Option<BackendType>,
}

impl ConfigOverrides {
    /// Create empty overrides.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_history_size(mut self, size: usize) -> Self {
        self.max_history_size = Some(size);
        self
    }

    pub fn with_storage(mut self, storage: BackendType) -> Self {
        self.storage = Some(storage);
        self
    }
}

/// System config directory: `$CANVAS_HISTORY_CONFIG_DIR`, else the
/// platform config dir.
pub fn system_config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV)
        && !dir.is_empty()
    {
        return Some(PathBuf::from(dir));
    }
    dirs::config_dir().map(|d| d.join("canvas-history"))
}

/// Path of the system-wide config.kdl, if a config dir exists.
pub fn system_config_path() -> Option<PathBuf> {
    system_config_dir().map(|d| d.join(CONFIG_FILE))
}

/// Resolve configuration with full precedence chain.
///
/// `session_dir` is the session's storage directory (see
/// [`crate::storage::get_storage_dir`]). The merged result is validated.
pub fn resolve_config(session_dir: &Path, overrides: &ConfigOverrides) -> Result<ResolvedConfig> {
    let mut result = ResolvedConfig::default();

    // Load system config (lowest precedence among file-based)
    let system_config = match system_config_path() {
        Some(path) => EngineConfig::load(&path)?,
        None => EngineConfig::new(),
    };

    // Load session config (higher precedence than system)
    let session_config = EngineConfig::load(&session_dir.join(CONFIG_FILE))?;

    // Resolve max_history_size
    if let Some(size) = overrides.max_history_size {
        result.max_history_size = Resolved::new(size, ValueSource::Override);
    } else if let Some(size) = session_config.max_history_size {
        result.max_history_size = Resolved::new(size, ValueSource::Session);
    } else if let Some(size) = system_config.max_history_size {
        result.max_history_size = Resolved::new(size, ValueSource::System);
    }

    // Resolve storage
    if let Some(storage) = overrides.storage {
        result.storage = Resolved::new(storage, ValueSource::Override);
    } else if let Some(storage) = session_config.storage {
        result.storage = Resolved::new(storage, ValueSource::Session);
    } else if let Some(storage) = system_config.storage {
        result.storage = Resolved::new(storage, ValueSource::System);
    }

    result.merged = system_config;
    result.merged.merge(&session_config);
    result.merged.max_history_size = Some(result.max_history_size.value);
    result.merged.storage = Some(result.storage.value);
    result.merged.validate()?;

    tracing::debug!(
        max_history_size = result.max_history_size.value,
        max_history_source = %result.max_history_size.source,
        storage = %result.storage.value,
        storage_source = %result.storage.source,
        "Configuration resolved"
    );
    Ok(result)
}
