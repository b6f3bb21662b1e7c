//! Storage layer for history data.
//!
//! The in-memory graph owned by the navigation controller is the source of
//! truth; stores are mirrors written after every committed mutation, on a
//! background [`StoreWriter`] thread.
//!
//! ## Storage Backends
//!
//! - **JSONL** (default): `nodes.jsonl`, `branches.jsonl` and `cursor.json`
//!   under `~/.local/share/canvas-history/<session-hash>/`
//! - **SQLite**: `history.db` in the same directory
//! - **Memory**: nothing is written; used by tests and throwaway sessions

pub mod backend;
pub mod jsonl;
pub mod sqlite;
pub mod writer;

pub use backend::{BackendType, Cursor, HistoryStore, LoadedHistory};
pub use jsonl::JsonlStore;
pub use sqlite::SqliteStore;
pub use writer::{StateUpdate, StoreWriter};

use crate::models::{HistoryBranch, HistoryNode};
use crate::{Error, Result};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Environment variable overriding the base data directory.
pub const DATA_DIR_ENV: &str = "CANVAS_HISTORY_DATA_DIR";

/// SQLite file name inside a session directory.
pub const SQLITE_FILE: &str = "history.db";

/// Get the storage directory for a canvas session.
///
/// Uses a hash of the session id to create a unique directory under
/// `$CANVAS_HISTORY_DATA_DIR` or `~/.local/share/canvas-history/`.
pub fn get_storage_dir(session_id: &str) -> Result<PathBuf> {
    let base = match std::env::var_os(DATA_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs::data_dir()
            .ok_or_else(|| Error::Other("Could not determine data directory".to_string()))?
            .join("canvas-history"),
    };
    Ok(base.join(session_hash(session_id)))
}

/// Short, filesystem-safe hash of a session id.
pub fn session_hash(session_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(session_id.as_bytes());
    let hash_hex = format!("{:x}", hasher.finalize());
    hash_hex[..12].to_string()
}

/// Open a store of the given type rooted at `dir`.
pub fn open_store(backend: BackendType, dir: &Path) -> Result<Box<dyn HistoryStore>> {
    Ok(match backend {
        BackendType::Memory => Box::new(MemoryStore::new()),
        BackendType::Jsonl => Box::new(JsonlStore::init(dir)?),
        BackendType::Sqlite => {
            std::fs::create_dir_all(dir)?;
            Box::new(SqliteStore::open(&dir.join(SQLITE_FILE))?)
        }
    })
}

/// In-process store.
///
/// Can be switched into a failing mode to exercise the controller's
/// best-effort persistence path. The switch is shared, so it still works
/// after the store has moved onto a writer thread.
#[derive(Debug, Default)]
pub struct MemoryStore {
    nodes: HashMap<String, HistoryNode>,
    branches: HashMap<String, HistoryBranch>,
    cursor: Cursor,
    fail_writes: WriteSwitch,
    writes: usize,
}

/// Shared handle that makes a [`MemoryStore`] reject writes.
#[derive(Debug, Clone, Default)]
pub struct WriteSwitch(Arc<AtomicBool>);

impl WriteSwitch {
    pub fn set_fail_writes(&self, fail: bool) {
        self.0.store(fail, Ordering::SeqCst);
    }

    fn failing(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose writes all fail.
    pub fn failing() -> Self {
        let store = Self::default();
        store.set_fail_writes(true);
        store
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.set_fail_writes(fail);
    }

    pub fn write_switch(&self) -> WriteSwitch {
        self.fail_writes.clone()
    }

    /// Number of successful save calls.
    pub fn write_count(&self) -> usize {
        self.writes
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.failing() {
            return Err(Error::Persistence("memory store is read-only".to_string()));
        }
        Ok(())
    }
}

impl HistoryStore for MemoryStore {
    fn save_nodes(&mut self, nodes: &HashMap<String, HistoryNode>) -> Result<()> {
        self.check_writable()?;
        self.nodes = nodes.clone();
        self.writes += 1;
        Ok(())
    }

    fn save_branches(&mut self, branches: &HashMap<String, HistoryBranch>) -> Result<()> {
        self.check_writable()?;
        self.branches = branches.clone();
        self.writes += 1;
        Ok(())
    }

    fn save_cursor(&mut self, cursor: &Cursor) -> Result<()> {
        self.check_writable()?;
        self.cursor = cursor.clone();
        self.writes += 1;
        Ok(())
    }

    fn load_all(&self) -> Result<LoadedHistory> {
        Ok(LoadedHistory {
            nodes: self.nodes.clone(),
            branches: self.branches.clone(),
            cursor: self.cursor.clone(),
        })
    }

    fn location(&self) -> String {
        "memory".to_string()
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Memory
    }
}
