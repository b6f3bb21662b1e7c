//! Engine configuration.
//!
//! ## config.kdl
//!
//! Located at:
//! - System: `~/.config/canvas-history/config.kdl` (or `$CANVAS_HISTORY_CONFIG_DIR`)
//! - Session: `<data-dir>/canvas-history/<session-hash>/config.kdl`
//!
//! Contains:
//! - `max-history-size` - Node count before the oldest history is evicted
//! - `storage` - "memory", "jsonl" or "sqlite"
//! - `action-log` - Path of the JSONL action journal
//! - `gesture { ... }` - Swipe physics tuning
//! - `ai { ... }` - Retry and queue limits for the AI scheduler
//! - `log { ... }` - Level, format and file for [`crate::logging`]
//!
//! ## Precedence
//!
//! runtime override > session config > system config > defaults
//!
//! Use the [`resolver`] module for unified precedence resolution.

pub mod resolver;
pub mod schema;

pub use resolver::{
    CONFIG_DIR_ENV, ConfigOverrides, Resolved, ResolvedConfig, ValueSource, resolve_config,
    system_config_dir, system_config_path,
};
pub use schema::{AiSection, CONFIG_FILE, EngineConfig, GestureSection, LogSection};
