//! Common test utilities for canvas-history integration tests.
//!
//! Provides `TestEnv` for isolated test environments that don't pollute
//! the user's data directory.

#![allow(dead_code)]

use canvas_history::models::{CanvasSnapshot, Layer, LayerContent};
use canvas_history::navigation::{NavigationConfig, NavigationController};
use canvas_history::storage::{JsonlStore, MemoryStore, SQLITE_FILE, SqliteStore};
use chrono::{DateTime, TimeZone, Utc};
pub use tempfile::TempDir;

/// A test environment with isolated data storage.
pub struct TestEnv {
    pub data_dir: TempDir,
}

impl TestEnv {
    /// Create a new test environment with an isolated directory.
    pub fn new() -> Self {
        Self {
            data_dir: TempDir::new().unwrap(),
        }
    }

    /// Get the path to the data directory.
    pub fn data_path(&self) -> &std::path::Path {
        self.data_dir.path()
    }

    pub fn jsonl_store(&self) -> JsonlStore {
        JsonlStore::init(self.data_path()).unwrap()
    }

    pub fn sqlite_store(&self) -> SqliteStore {
        SqliteStore::open(&self.data_path().join(SQLITE_FILE)).unwrap()
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// A controller over an in-memory store.
pub fn memory_controller(max_history_size: usize) -> NavigationController<MemoryStore> {
    NavigationController::new(
        MemoryStore::new(),
        NavigationConfig {
            max_history_size,
            ..Default::default()
        },
    )
    .unwrap()
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
            font_size: 18.0,
            color: "#222222".to_string(),
        },
    )])
}

pub fn snapshot_at(tag: &str, secs: i64) -> CanvasSnapshot {
    snapshot(tag).with_timestamp(at(secs))
}

/// The tag a [`snapshot`] was created with.
pub fn tag_of(snapshot: &CanvasSnapshot) -> String {
    match snapshot.layers.first().map(|l| &l.content) {
        Some(LayerContent::Text { content, .. }) => content.clone(),
        _ => String::new(),
    }
}
