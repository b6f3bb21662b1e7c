//! JSONL file store.
//!
//! One JSON object per line in `nodes.jsonl` and `branches.jsonl`, plus a
//! single-object `cursor.json`. Each save rewrites its file through a
//! temporary sibling and a rename, so a crash mid-write leaves the previous
//! generation intact.

use super::backend::{BackendType, Cursor, HistoryStore, LoadedHistory};
use crate::models::{HistoryBranch, HistoryNode};
use crate::{Error, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

pub const NODES_FILE: &str = "nodes.jsonl";
pub const BRANCHES_FILE: &str = "branches.jsonl";
pub const CURSOR_FILE: &str = "cursor.json";

#[derive(Debug)]
pub struct JsonlStore {
    root: PathBuf,
}

impl JsonlStore {
    /// Open or create a store in `root`, creating the directory and empty
    /// data files when missing.
    pub fn init(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)?;
        for file in [NODES_FILE, BRANCHES_FILE] {
            let path = root.join(file);
            if !path.exists() {
                File::create(&path)?;
            }
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Open an existing store without creating anything.
    pub fn open(root: &Path) -> Result<Self> {
        if !root.join(NODES_FILE).exists() {
            return Err(Error::NotFound(format!(
                "No history store at {}",
                root.display()
            )));
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn write_lines<'a, T, I>(&self, file: &str, items: I) -> Result<()>
    where
        T: Serialize + 'a,
        I: IntoIterator<Item = &'a T>,
    {
        let path = self.root.join(file);
        let tmp = path.with_extension("jsonl.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            for item in items {
                serde_json::to_writer(&mut writer, item)?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn read_lines<T: DeserializeOwned>(&self, file: &str) -> Result<Vec<T>> {
        let path = self.root.join(file);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(&path)?);
        let mut items = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let item = serde_json::from_str(&line).map_err(|e| {
                Error::Persistence(format!("{} line {}: {}", file, idx + 1, e))
            })?;
            items.push(item);
        }
        Ok(items)
    }
}

impl HistoryStore for JsonlStore {
    fn save_nodes(&mut self, nodes: &HashMap<String, HistoryNode>) -> Result<()> {
        let mut sorted: Vec<&HistoryNode> = nodes.values().collect();
        sorted.sort_by(|a, b| {
            a.snapshot
                .timestamp
                .cmp(&b.snapshot.timestamp)
                .then_with(|| a.id.cmp(&b.id))
        });
        self.write_lines(NODES_FILE, sorted)
    }

    fn save_branches(&mut self, branches: &HashMap<String, HistoryBranch>) -> Result<()> {
        let mut sorted: Vec<&HistoryBranch> = branches.values().collect();
        sorted.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        self.write_lines(BRANCHES_FILE, sorted)
    }

    fn save_cursor(&mut self, cursor: &Cursor) -> Result<()> {
        let path = self.root.join(CURSOR_FILE);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(cursor)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn load_all(&self) -> Result<LoadedHistory> {
        let nodes = self
            .read_lines::<HistoryNode>(NODES_FILE)?
            .into_iter()
            .map(|n| (n.id.clone(), n))
            .collect();
        let branches = self
            .read_lines::<HistoryBranch>(BRANCHES_FILE)?
            .into_iter()
            .map(|b| (b.id.clone(), b))
            .collect();

        let cursor_path = self.root.join(CURSOR_FILE);
        let cursor = if cursor_path.exists() {
            serde_json::from_str(&fs::read_to_string(&cursor_path)?)?
        } else {
            Cursor::default()
        };

        Ok(LoadedHistory {
            nodes,
            branches,
            cursor,
        })
    }

    fn location(&self) -> String {
        self.root.display().to_string()
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Jsonl
    }
}
