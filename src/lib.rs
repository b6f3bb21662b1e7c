//! canvas-history - A versioned state-history engine for canvas editors.
//!
//! This library provides the core of a canvas design tool's history:
//! a DAG of canvas snapshots with branches, undo/redo navigation,
//! gesture-driven navigation physics, and an AI variation job scheduler.
//! Rendering, widgets, and network transport stay outside; the engine
//! talks to them through the traits in [`storage`] and [`ai`].

pub mod action_log;
pub mod ai;
pub mod config;
pub mod events;
pub mod gesture;
pub mod history;
pub mod logging;
pub mod models;
pub mod navigation;
pub mod storage;

pub use ai::{AiCollaborator, AiScheduler, run_next_job};
pub use gesture::{GestureEngine, NavigationCommand};
pub use history::HistoryGraph;
pub use models::{CanvasSnapshot, HistoryBranch, HistoryNode, Layer, NavigationState};
pub use navigation::{NavigationConfig, NavigationController};
pub use storage::HistoryStore;

/// Test utilities for isolated test environments.
#[cfg(test)]
pub(crate) mod test_utils {
    use std::path::Path;

    use chrono::{DateTime, TimeZone, Utc};
    use tempfile::TempDir;

    use crate::models::{CanvasSnapshot, Layer, LayerContent};
    use crate::storage::{JsonlStore, SqliteStore};

    /// Test environment with an isolated session directory.
    pub struct TestEnv {
        /// Isolated data storage directory
        pub data_dir: TempDir,
    }

    impl TestEnv {
        pub fn new() -> Self {
            Self {
                data_dir: TempDir::new().unwrap(),
            }
        }

        pub fn data_path(&self) -> &Path {
            self.data_dir.path()
        }

        pub fn jsonl_store(&self) -> JsonlStore {
            JsonlStore::init(self.data_path()).unwrap()
        }

        pub fn sqlite_store(&self) -> SqliteStore {
            SqliteStore::open(&self.data_path().join("history.db")).unwrap()
        }
    }

    impl Default for TestEnv {
        fn default() -> Self {
            Self::new()
        }
    }

    /// Fixed timestamp `secs` seconds after an arbitrary epoch.
    pub fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    /// A one-layer snapshot whose text content identifies it.
    pub fn snapshot(tag: &str) -> CanvasSnapshot {
        CanvasSnapshot::new(vec![Layer::new(
            format!("layer-{tag}"),
            LayerContent::Text {
                content: tag.to_string(),
                font_size: 24.0,
                color: "#111111".to_string(),
            },
        )])
    }

    /// Like [`snapshot`], with a deterministic timestamp.
    pub fn snapshot_at(tag: &str, secs: i64) -> CanvasSnapshot {
        snapshot(tag).with_timestamp(at(secs))
    }

    /// Text content of the first layer, for asserting which snapshot came back.
    pub fn tag_of(snapshot: &CanvasSnapshot) -> String {
        match snapshot.layers.first().map(|l| &l.content) {
            Some(LayerContent::Text { content, .. }) => content.clone(),
            _ => String::new(),
        }
    }
}

/// Library-level error type for history engine operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Illegal transition: cannot {action} while {from}")]
    StateTransition { from: String, action: &'static str },

    #[error("Cycle detected in history graph: {0}")]
    CycleDetected(String),

    #[error("Cannot undo: no previous state")]
    NoPreviousState,

    #[error("Cannot redo: no forward state")]
    NoForwardState,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("AI collaborator error: {0}")]
    Collaborator(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub(crate) fn transition(from: impl std::fmt::Display, action: &'static str) -> Self {
        Error::StateTransition {
            from: from.to_string(),
            action,
        }
    }
}

/// Result type alias for history engine operations.
pub type Result<T> = std::result::Result<T, Error>;
