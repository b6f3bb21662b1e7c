//! Persistence collaborator trait and backend selection.
//!
//! This module provides the interface the navigation controller mirrors its
//! state into, and the set of interchangeable implementations:
//! - `MemoryStore` - In-process store, used by tests and ephemeral sessions
//! - `JsonlStore` - JSONL files in a session directory (default)
//! - `SqliteStore` - Single SQLite database file

use crate::models::{HistoryBranch, HistoryNode};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Persisted cursor: which node is current and which branch is active.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_branch_id: Option<String>,
}

/// Everything a store holds, as returned by [`HistoryStore::load_all`].
#[derive(Debug, Clone, Default)]
pub struct LoadedHistory {
    pub nodes: HashMap<String, HistoryNode>,
    pub branches: HashMap<String, HistoryBranch>,
    pub cursor: Cursor,
}

impl LoadedHistory {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.branches.is_empty()
    }
}

/// Trait for durable mirrors of the history graph.
///
/// Every save replaces the previous contents of that collection. Saves run
/// on a [`StoreWriter`](super::StoreWriter) thread, never on the command
/// path; errors are reported here and logged there, never rolled back.
pub trait HistoryStore: Send {
    /// Replace all stored nodes.
    fn save_nodes(&mut self, nodes: &HashMap<String, HistoryNode>) -> Result<()>;

    /// Replace all stored branches.
    fn save_branches(&mut self, branches: &HashMap<String, HistoryBranch>) -> Result<()>;

    /// Replace the stored cursor.
    fn save_cursor(&mut self, cursor: &Cursor) -> Result<()>;

    /// Read everything back.
    fn load_all(&self) -> Result<LoadedHistory>;

    /// Get the storage location description (for display purposes).
    fn location(&self) -> String;

    /// Get the backend type.
    fn backend_type(&self) -> BackendType;
}

impl<T: HistoryStore + ?Sized> HistoryStore for Box<T> {
    fn save_nodes(&mut self, nodes: &HashMap<String, HistoryNode>) -> Result<()> {
        (**self).save_nodes(nodes)
    }

    fn save_branches(&mut self, branches: &HashMap<String, HistoryBranch>) -> Result<()> {
        (**self).save_branches(branches)
    }

    fn save_cursor(&mut self, cursor: &Cursor) -> Result<()> {
        (**self).save_cursor(cursor)
    }

    fn load_all(&self) -> Result<LoadedHistory> {
        (**self).load_all()
    }

    fn location(&self) -> String {
        (**self).location()
    }

    fn backend_type(&self) -> BackendType {
        (**self).backend_type()
    }
}

/// Available storage backend types.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// Nothing leaves the process
    Memory,
    /// JSONL files under the session directory (default)
    #[default]
    Jsonl,
    /// SQLite database under the session directory
    Sqlite,
}

impl BackendType {
    /// Parse a backend type from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "memory" | "mem" | "none" => Some(Self::Memory),
            "jsonl" | "file" | "default" => Some(Self::Jsonl),
            "sqlite" | "db" | "database" => Some(Self::Sqlite),
            _ => None,
        }
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Jsonl => "jsonl",
            Self::Sqlite => "sqlite",
        }
    }
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BackendType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s).ok_or_else(|| Error::Config(format!("unknown storage backend: {}", s)))
    }
}
