//! Data models for history engine entities.
//!
//! This module defines the core data structures:
//! - `CanvasSnapshot` - One immutable versioned state of the layer set
//! - `Layer` - A canvas layer, tagged by kind (text, image, shape, background)
//! - `HistoryNode` - A snapshot plus its DAG linkage, tags and bookmark flag
//! - `HistoryBranch` - A named, ordered line of exploration through the graph
//! - `NavigationState` - The full serializable navigation state

pub mod graph;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use crate::{Error, Result};

/// Current schema version written into new snapshots.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Format version of [`HistoryExport`] blobs.
pub const EXPORT_FORMAT_VERSION: u32 = 1;

/// Where a snapshot's content came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotSource {
    /// Direct user edit
    #[default]
    User,
    /// Produced by the AI collaborator
    Ai,
    /// Loaded from an export blob
    Import,
}

impl SnapshotSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotSource::User => "user",
            SnapshotSource::Ai => "ai",
            SnapshotSource::Import => "import",
        }
    }
}

impl fmt::Display for SnapshotSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind-specific layer payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayerContent {
    Text {
        content: String,
        font_size: f64,
        color: String,
    },
    Image {
        uri: String,
        width: u32,
        height: u32,
    },
    Shape {
        shape: String,
        fill: String,
    },
    Background {
        color: String,
    },
}

impl LayerContent {
    /// The `kind` tag as written on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            LayerContent::Text { .. } => "text",
            LayerContent::Image { .. } => "image",
            LayerContent::Shape { .. } => "shape",
            LayerContent::Background { .. } => "background",
        }
    }
}

/// A single canvas layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    /// Layer identifier, unique within a snapshot
    pub id: String,

    #[serde(default)]
    pub x: f64,

    #[serde(default)]
    pub y: f64,

    /// Opacity in [0, 1]
    #[serde(default = "default_opacity")]
    pub opacity: f64,

    #[serde(flatten)]
    pub content: LayerContent,
}

fn default_opacity() -> f64 {
    1.0
}

impl Layer {
    /// Create a fully opaque layer at the origin.
    pub fn new(id: impl Into<String>, content: LayerContent) -> Self {
        Self {
            id: id.into(),
            x: 0.0,
            y: 0.0,
            opacity: 1.0,
            content,
        }
    }

    /// Move the layer.
    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.x = x;
        self.y = y;
        self
    }
}

/// One immutable versioned state of the canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanvasSnapshot {
    /// Snapshot schema version
    #[serde(default = "default_snapshot_version")]
    pub version: u32,

    /// Layers, bottom to top
    #[serde(default)]
    pub layers: Vec<Layer>,

    /// When the snapshot was taken; drives eviction order
    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub source: SnapshotSource,

    /// Free-form metadata (job ids, prompt text, device hints...)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

fn default_snapshot_version() -> u32 {
    SNAPSHOT_VERSION
}

impl CanvasSnapshot {
    /// Create a user-sourced snapshot stamped with the current time.
    pub fn new(layers: Vec<Layer>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            layers,
            timestamp: Utc::now(),
            source: SnapshotSource::User,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_source(mut self, source: SnapshotSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Reject malformed snapshots before they reach the graph.
    pub fn validate(&self) -> Result<()> {
        if self.version == 0 || self.version > SNAPSHOT_VERSION {
            return Err(Error::Validation(format!(
                "unsupported snapshot version {}",
                self.version
            )));
        }

        let mut seen = HashSet::new();
        for layer in &self.layers {
            if layer.id.trim().is_empty() {
                return Err(Error::Validation("layer id must not be empty".to_string()));
            }
            if !seen.insert(layer.id.as_str()) {
                return Err(Error::Validation(format!(
                    "duplicate layer id: {}",
                    layer.id
                )));
            }
            if !(0.0..=1.0).contains(&layer.opacity) {
                return Err(Error::Validation(format!(
                    "layer {} opacity must be within [0, 1], got {}",
                    layer.id, layer.opacity
                )));
            }
        }
        Ok(())
    }
}

/// A versioned canvas state plus its position in the history DAG.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryNode {
    /// Unique identifier (e.g., "hn-1a2b3c4d")
    pub id: String,

    pub snapshot: CanvasSnapshot,

    /// Parent node IDs; the first entry is the canonical parent
    #[serde(default)]
    pub parent_ids: Vec<String>,

    /// Child node IDs in insertion order
    #[serde(default)]
    pub child_ids: Vec<String>,

    /// Name of the branch this node opened, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,

    #[serde(default)]
    pub bookmarked: bool,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub description: String,
}

impl HistoryNode {
    /// Create an unlinked node.
    pub fn new(id: String, snapshot: CanvasSnapshot) -> Self {
        Self {
            id,
            snapshot,
            parent_ids: Vec::new(),
            child_ids: Vec::new(),
            branch_name: None,
            bookmarked: false,
            tags: Vec::new(),
            description: String::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_ids.is_empty()
    }

    pub fn is_leaf(&self) -> bool {
        self.child_ids.is_empty()
    }

    /// Parent used for path reconstruction.
    pub fn canonical_parent(&self) -> Option<&str> {
        self.parent_ids.first().map(String::as_str)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// A named, ordered sequence of nodes representing one line of exploration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryBranch {
    /// Unique identifier (e.g., "hb-9f8e7d6c")
    pub id: String,

    pub name: String,

    pub start_node_id: String,

    /// Member nodes in insertion order
    #[serde(default)]
    pub node_ids: Vec<String>,

    #[serde(default)]
    pub is_active: bool,

    #[serde(default)]
    pub description: String,

    pub created_at: DateTime<Utc>,
}

impl HistoryBranch {
    /// Create an inactive branch containing only its start node.
    pub fn new(id: String, name: String, start_node_id: String) -> Self {
        Self {
            id,
            name,
            node_ids: vec![start_node_id.clone()],
            start_node_id,
            is_active: false,
            description: String::new(),
            created_at: Utc::now(),
        }
    }

    /// Most recently appended node.
    pub fn head(&self) -> Option<&str> {
        self.node_ids.last().map(String::as_str)
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.node_ids.iter().any(|id| id == node_id)
    }
}

/// Full navigation state: the graph plus the cursor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NavigationState {
    #[serde(default)]
    pub nodes: HashMap<String, HistoryNode>,

    #[serde(default)]
    pub branches: HashMap<String, HistoryBranch>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_node_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_branch_id: Option<String>,

    /// Derived from the undo stack; ignored on import
    #[serde(default)]
    pub can_undo: bool,

    /// Derived from the redo stack; ignored on import
    #[serde(default)]
    pub can_redo: bool,
}

/// Serialized form of a [`NavigationState`] used by export/import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryExport {
    pub format_version: u32,

    pub exported_at: DateTime<Utc>,

    #[serde(flatten)]
    pub state: NavigationState,
}

impl HistoryExport {
    pub fn new(state: NavigationState) -> Self {
        Self {
            format_version: EXPORT_FORMAT_VERSION,
            exported_at: Utc::now(),
            state,
        }
    }
}
