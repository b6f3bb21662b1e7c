//! SQLite store.
//!
//! Nodes and branches are stored as JSON payloads keyed by id, with a few
//! columns pulled out for inspection with the `sqlite3` shell. The cursor
//! lives in a single-row table.

use super::backend::{BackendType, Cursor, HistoryStore, LoadedHistory};
use crate::models::{HistoryBranch, HistoryNode};
use crate::Result;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub struct SqliteStore {
    path: PathBuf,
    conn: Connection,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").field("path", &self.path).finish()
    }
}

impl SqliteStore {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            path: path.to_path_buf(),
            conn,
        })
    }

    /// A private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn,
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS nodes (
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                branch_name TEXT,
                bookmarked INTEGER NOT NULL DEFAULT 0,
                payload TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS branches (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 0,
                payload TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS cursor (
                slot INTEGER PRIMARY KEY CHECK (slot = 0),
                current_node_id TEXT,
                active_branch_id TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_nodes_created_at ON nodes(created_at);
            CREATE INDEX IF NOT EXISTS idx_branches_name ON branches(name);
            "#,
        )?;
        Ok(())
    }
}

impl HistoryStore for SqliteStore {
    fn save_nodes(&mut self, nodes: &HashMap<String, HistoryNode>) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM nodes", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO nodes (id, created_at, branch_name, bookmarked, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for node in nodes.values() {
                stmt.execute(params![
                    node.id,
                    node.snapshot.timestamp.to_rfc3339(),
                    node.branch_name,
                    node.bookmarked,
                    serde_json::to_string(node)?,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn save_branches(&mut self, branches: &HashMap<String, HistoryBranch>) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM branches", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO branches (id, name, is_active, payload) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for branch in branches.values() {
                stmt.execute(params![
                    branch.id,
                    branch.name,
                    branch.is_active,
                    serde_json::to_string(branch)?,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn save_cursor(&mut self, cursor: &Cursor) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO cursor (slot, current_node_id, active_branch_id)
             VALUES (0, ?1, ?2)",
            params![cursor.current_node_id, cursor.active_branch_id],
        )?;
        Ok(())
    }

    fn load_all(&self) -> Result<LoadedHistory> {
        let mut nodes = HashMap::new();
        let mut stmt = self.conn.prepare("SELECT payload FROM nodes")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        for row in rows {
            let node: HistoryNode = serde_json::from_str(&row?)?;
            nodes.insert(node.id.clone(), node);
        }

        let mut branches = HashMap::new();
        let mut stmt = self.conn.prepare("SELECT payload FROM branches")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        for row in rows {
            let branch: HistoryBranch = serde_json::from_str(&row?)?;
            branches.insert(branch.id.clone(), branch);
        }

        let cursor = self
            .conn
            .query_row(
                "SELECT current_node_id, active_branch_id FROM cursor WHERE slot = 0",
                [],
                |row| {
                    Ok(Cursor {
                        current_node_id: row.get(0)?,
                        active_branch_id: row.get(1)?,
                    })
                },
            )
            .optional()?
            .unwrap_or_default();

        Ok(LoadedHistory {
            nodes,
            branches,
            cursor,
        })
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Sqlite
    }
}
