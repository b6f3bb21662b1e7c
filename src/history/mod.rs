//! History graph store.
//!
//! `HistoryGraph` owns every [`HistoryNode`] and [`HistoryBranch`] of a canvas
//! session and keeps the redundant parent/child links consistent. It knows
//! nothing about undo/redo or the cursor; the navigation controller layers
//! that on top and tells the store which nodes must survive eviction.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::models::graph::{self, GraphValidation, UnionFind};
use crate::models::{CanvasSnapshot, HistoryBranch, HistoryNode, SnapshotSource};
use crate::{Error, Result};

/// ID prefix for history nodes.
pub const NODE_ID_PREFIX: &str = "hn";

/// ID prefix for branches.
pub const BRANCH_ID_PREFIX: &str = "hb";

/// Aggregate counts over the graph, for status displays and analytics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HistoryStats {
    pub node_count: usize,
    pub branch_count: usize,
    pub root_count: usize,
    pub leaf_count: usize,
    pub bookmarked_count: usize,
    pub ai_node_count: usize,
    pub component_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newest: Option<DateTime<Utc>>,
}

/// Owner of all history nodes and branches for one session.
#[derive(Debug, Clone, Default)]
pub struct HistoryGraph {
    nodes: HashMap<String, HistoryNode>,
    branches: HashMap<String, HistoryBranch>,
    /// Mixed into id seeds so ids created within one clock tick still differ
    id_counter: u64,
}

impl HistoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from previously stored parts, validating structure first.
    pub fn from_parts(
        nodes: HashMap<String, HistoryNode>,
        branches: HashMap<String, HistoryBranch>,
    ) -> Result<Self> {
        graph::validate_graph(&nodes).into_result()?;
        for node in nodes.values() {
            node.snapshot.validate()?;
        }

        for (key, branch) in &branches {
            if branch.id != *key {
                return Err(Error::Validation(format!(
                    "branch {} stored under key {}",
                    branch.id, key
                )));
            }
            if let Some(missing) = branch.node_ids.iter().find(|id| !nodes.contains_key(*id)) {
                return Err(Error::Validation(format!(
                    "branch {} references missing node {}",
                    branch.name, missing
                )));
            }
        }
        if branches.values().filter(|b| b.is_active).count() > 1 {
            return Err(Error::Validation(
                "more than one branch is marked active".to_string(),
            ));
        }

        Ok(Self {
            id_counter: nodes.len() as u64,
            nodes,
            branches,
        })
    }

    pub fn into_parts(self) -> (HashMap<String, HistoryNode>, HashMap<String, HistoryBranch>) {
        (self.nodes, self.branches)
    }

    pub fn nodes(&self) -> &HashMap<String, HistoryNode> {
        &self.nodes
    }

    pub fn branches(&self) -> &HashMap<String, HistoryBranch> {
        &self.branches
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node(&self, id: &str) -> Option<&HistoryNode> {
        self.nodes.get(id)
    }

    /// Like [`node`](Self::node), but a missing id is an error.
    pub fn get_node(&self, id: &str) -> Result<&HistoryNode> {
        self.nodes
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("node {}", id)))
    }

    fn get_node_mut(&mut self, id: &str) -> Result<&mut HistoryNode> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("node {}", id)))
    }

    pub fn branch(&self, id: &str) -> Option<&HistoryBranch> {
        self.branches.get(id)
    }

    pub fn get_branch(&self, id: &str) -> Result<&HistoryBranch> {
        self.branches
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("branch {}", id)))
    }

    pub fn branch_by_name(&self, name: &str) -> Option<&HistoryBranch> {
        self.branches.values().find(|b| b.name == name)
    }

    /// The branch opened at `node_id`, if any.
    pub fn branch_starting_at(&self, node_id: &str) -> Option<&HistoryBranch> {
        self.branches.values().find(|b| b.start_node_id == node_id)
    }

    pub fn active_branch(&self) -> Option<&HistoryBranch> {
        self.branches.values().find(|b| b.is_active)
    }

    /// Create a node, optionally linked under `parent_id` and opening a branch.
    ///
    /// All inputs are validated before anything is inserted, so a failed call
    /// leaves the graph untouched. No eviction happens here.
    pub fn create_node(
        &mut self,
        snapshot: CanvasSnapshot,
        parent_id: Option<&str>,
        branch_name: Option<&str>,
    ) -> Result<HistoryNode> {
        snapshot.validate()?;
        if let Some(parent) = parent_id {
            if !self.nodes.contains_key(parent) {
                return Err(Error::NotFound(format!("parent node {}", parent)));
            }
        }
        if let Some(name) = branch_name {
            self.check_branch_name(name)?;
        }

        let id = self.allocate_id(NODE_ID_PREFIX, parent_id.unwrap_or("root"));
        let mut node = HistoryNode::new(id.clone(), snapshot);
        node.branch_name = branch_name.map(|n| n.trim().to_string());

        if let Some(parent) = parent_id {
            node.parent_ids.push(parent.to_string());
            if let Some(p) = self.nodes.get_mut(parent) {
                p.child_ids.push(id.clone());
            }
        }
        self.nodes.insert(id.clone(), node.clone());

        if let Some(name) = branch_name {
            self.insert_branch(name, &id, "")?;
        }

        tracing::debug!(node_id = %id, parent = ?parent_id, "History node created");
        Ok(node)
    }

    /// Add an extra (non-canonical) parent link, e.g. after a merge.
    pub fn add_parent_link(&mut self, child_id: &str, parent_id: &str) -> Result<()> {
        self.get_node(child_id)?;
        self.get_node(parent_id)?;

        if self.nodes[child_id].parent_ids.iter().any(|p| p == parent_id) {
            return Ok(());
        }
        if graph::would_create_cycle(&self.nodes, parent_id, child_id) {
            return Err(Error::CycleDetected(format!(
                "linking {} under {} would create a cycle",
                child_id, parent_id
            )));
        }

        self.get_node_mut(child_id)?
            .parent_ids
            .push(parent_id.to_string());
        self.get_node_mut(parent_id)?
            .child_ids
            .push(child_id.to_string());
        Ok(())
    }

    /// Evict the oldest nodes until at most `max_size` remain.
    ///
    /// Candidates are ordered by snapshot timestamp, ties broken by id. Ids in
    /// `protected` are never evicted; the next-oldest candidate is taken
    /// instead, so the graph can stay above `max_size` only when protected
    /// nodes alone exceed it. Returns the evicted ids, oldest first.
    pub fn evict_to_capacity(&mut self, max_size: usize, protected: &[&str]) -> Vec<String> {
        if self.nodes.len() <= max_size {
            return Vec::new();
        }
        let excess = self.nodes.len() - max_size;

        let mut candidates: Vec<(&DateTime<Utc>, &String)> = self
            .nodes
            .values()
            .filter(|n| !protected.contains(&n.id.as_str()))
            .map(|n| (&n.snapshot.timestamp, &n.id))
            .collect();
        candidates.sort();

        let victims: Vec<String> = candidates
            .into_iter()
            .take(excess)
            .map(|(_, id)| id.clone())
            .collect();

        for id in &victims {
            self.unlink_node(id);
        }

        if !victims.is_empty() {
            tracing::info!(
                evicted = victims.len(),
                remaining = self.nodes.len(),
                max_size,
                "Evicted oldest history nodes"
            );
        }
        victims
    }

    /// Remove a node and every reference to it.
    pub fn delete_node(&mut self, id: &str) -> Result<HistoryNode> {
        self.get_node(id)?;
        self.unlink_node(id)
            .ok_or_else(|| Error::NotFound(format!("node {}", id)))
    }

    fn unlink_node(&mut self, id: &str) -> Option<HistoryNode> {
        let node = self.nodes.remove(id)?;

        for parent in &node.parent_ids {
            if let Some(p) = self.nodes.get_mut(parent) {
                p.child_ids.retain(|c| c != id);
            }
        }
        for child in &node.child_ids {
            if let Some(c) = self.nodes.get_mut(child) {
                c.parent_ids.retain(|p| p != id);
            }
        }

        for branch in self.branches.values_mut() {
            branch.node_ids.retain(|n| n != id);
            if branch.start_node_id == id {
                if let Some(first) = branch.node_ids.first() {
                    branch.start_node_id = first.clone();
                }
            }
        }
        self.branches
            .retain(|_, b| b.is_active || !b.node_ids.is_empty());

        Some(node)
    }

    /// Path following child edges only. See [`graph::find_path`].
    pub fn find_path(&self, from: &str, to: &str) -> Vec<String> {
        graph::find_path(&self.nodes, from, to)
    }

    /// Root-to-node path through canonical parents. See [`graph::path_to`].
    pub fn path_to(&self, id: &str) -> Result<Vec<String>> {
        graph::path_to(&self.nodes, id)
    }

    pub fn validate(&self) -> GraphValidation {
        graph::validate_graph(&self.nodes)
    }

    pub fn children_of(&self, id: &str) -> Result<Vec<&HistoryNode>> {
        let node = self.get_node(id)?;
        Ok(node
            .child_ids
            .iter()
            .filter_map(|c| self.nodes.get(c))
            .collect())
    }

    pub fn parents_of(&self, id: &str) -> Result<Vec<&HistoryNode>> {
        let node = self.get_node(id)?;
        Ok(node
            .parent_ids
            .iter()
            .filter_map(|p| self.nodes.get(p))
            .collect())
    }

    // === Node annotations ===

    /// Add a tag. Returns false if the node already had it.
    pub fn add_tag(&mut self, id: &str, tag: &str) -> Result<bool> {
        let tag = tag.trim();
        if tag.is_empty() {
            return Err(Error::Validation("tag must not be empty".to_string()));
        }
        let node = self.get_node_mut(id)?;
        if node.has_tag(tag) {
            return Ok(false);
        }
        node.tags.push(tag.to_string());
        Ok(true)
    }

    /// Remove a tag. Returns false if the node did not have it.
    pub fn remove_tag(&mut self, id: &str, tag: &str) -> Result<bool> {
        let node = self.get_node_mut(id)?;
        let before = node.tags.len();
        node.tags.retain(|t| t != tag);
        Ok(node.tags.len() != before)
    }

    pub fn set_bookmarked(&mut self, id: &str, bookmarked: bool) -> Result<()> {
        self.get_node_mut(id)?.bookmarked = bookmarked;
        Ok(())
    }

    pub fn set_description(&mut self, id: &str, description: &str) -> Result<()> {
        self.get_node_mut(id)?.description = description.to_string();
        Ok(())
    }

    /// Bookmarked nodes, oldest first.
    pub fn bookmarked_nodes(&self) -> Vec<&HistoryNode> {
        self.sorted_nodes(|n| n.bookmarked)
    }

    /// Nodes carrying `tag`, oldest first.
    pub fn nodes_with_tag(&self, tag: &str) -> Vec<&HistoryNode> {
        self.sorted_nodes(|n| n.has_tag(tag))
    }

    fn sorted_nodes(&self, filter: impl Fn(&HistoryNode) -> bool) -> Vec<&HistoryNode> {
        let mut found: Vec<&HistoryNode> = self.nodes.values().filter(|n| filter(n)).collect();
        found.sort_by(|a, b| {
            a.snapshot
                .timestamp
                .cmp(&b.snapshot.timestamp)
                .then_with(|| a.id.cmp(&b.id))
        });
        found
    }

    // === Branches ===

    /// Create an inactive branch starting at `start_node_id`.
    pub fn create_branch(
        &mut self,
        name: &str,
        start_node_id: &str,
        description: &str,
    ) -> Result<HistoryBranch> {
        self.check_branch_name(name)?;
        self.get_node(start_node_id)?;
        self.insert_branch(name, start_node_id, description)
    }

    fn check_branch_name(&self, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::Validation("branch name must not be empty".to_string()));
        }
        if self.branch_by_name(name).is_some() {
            return Err(Error::Validation(format!("branch {} already exists", name)));
        }
        Ok(())
    }

    fn insert_branch(
        &mut self,
        name: &str,
        start_node_id: &str,
        description: &str,
    ) -> Result<HistoryBranch> {
        let id = self.allocate_id(BRANCH_ID_PREFIX, name);
        let mut branch = HistoryBranch::new(id.clone(), name.trim().to_string(), start_node_id.to_string());
        branch.description = description.to_string();
        self.branches.insert(id.clone(), branch.clone());
        tracing::info!(branch_id = %id, name = %branch.name, start = %start_node_id, "Branch created");
        Ok(branch)
    }

    /// Append a node to a branch, unless it is already the branch head.
    pub fn append_to_branch(&mut self, branch_id: &str, node_id: &str) -> Result<()> {
        self.get_node(node_id)?;
        let branch = self
            .branches
            .get_mut(branch_id)
            .ok_or_else(|| Error::NotFound(format!("branch {}", branch_id)))?;
        if branch.head() != Some(node_id) {
            branch.node_ids.push(node_id.to_string());
        }
        Ok(())
    }

    /// Mark exactly one branch (or none) as active.
    pub fn set_active_branch(&mut self, branch_id: Option<&str>) -> Result<()> {
        if let Some(id) = branch_id {
            self.get_branch(id)?;
        }
        for branch in self.branches.values_mut() {
            branch.is_active = Some(branch.id.as_str()) == branch_id;
        }
        Ok(())
    }

    /// Delete an inactive branch. Member nodes are kept.
    pub fn delete_branch(&mut self, branch_id: &str) -> Result<HistoryBranch> {
        let branch = self.get_branch(branch_id)?;
        if branch.is_active {
            return Err(Error::InvalidState(format!(
                "cannot delete active branch {}",
                branch.name
            )));
        }
        let removed = self
            .branches
            .remove(branch_id)
            .ok_or_else(|| Error::NotFound(format!("branch {}", branch_id)))?;
        tracing::info!(branch_id, name = %removed.name, "Branch deleted");
        Ok(removed)
    }

    // === Analytics ===

    /// Weakly connected components, each sorted by id.
    pub fn components(&self) -> Vec<Vec<String>> {
        UnionFind::from_nodes(&self.nodes).components()
    }

    pub fn stats(&self) -> HistoryStats {
        let timestamps = self.nodes.values().map(|n| n.snapshot.timestamp);
        HistoryStats {
            node_count: self.nodes.len(),
            branch_count: self.branches.len(),
            root_count: self.nodes.values().filter(|n| n.is_root()).count(),
            leaf_count: self.nodes.values().filter(|n| n.is_leaf()).count(),
            bookmarked_count: self.nodes.values().filter(|n| n.bookmarked).count(),
            ai_node_count: self
                .nodes
                .values()
                .filter(|n| n.snapshot.source == SnapshotSource::Ai)
                .count(),
            component_count: self.components().len(),
            oldest: timestamps.clone().min(),
            newest: timestamps.max(),
        }
    }

    fn allocate_id(&mut self, prefix: &str, seed: &str) -> String {
        loop {
            self.id_counter += 1;
            let id = generate_id(prefix, &format!("{}:{}", seed, self.id_counter));
            if !self.nodes.contains_key(&id) && !self.branches.contains_key(&id) {
                return id;
            }
        }
    }
}

/// Generate an id for a node or branch.
///
/// Format: `<prefix>-<8 hex chars>`, hashed from the seed and the current time.
pub fn generate_id(prefix: &str, seed: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    hasher.update(
        Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or(0)
            .to_le_bytes(),
    );
    let hash_hex = format!("{:x}", hasher.finalize());
    format!("{}-{}", prefix, &hash_hex[..8])
}

/// Validate that an id matches the `<prefix>-<8 hex chars>` format.
pub fn validate_id(id: &str, prefix: &str) -> Result<()> {
    let suffix = id
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('-'))
        .ok_or_else(|| Error::Validation(format!("id must start with '{}-', got: {}", prefix, id)))?;

    if suffix.len() != 8 || !suffix.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::Validation(format!(
            "id suffix must be 8 hex characters, got: {}",
            suffix
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{snapshot, snapshot_at};

    /// Chain of nodes with increasing timestamps; returns the graph and ids in order.
    fn chain(len: usize) -> (HistoryGraph, Vec<String>) {
        let mut g = HistoryGraph::new();
        let mut ids: Vec<String> = Vec::new();
        for i in 0..len {
            let parent = ids.last().map(String::as_str);
            let node = g
                .create_node(snapshot_at(&format!("s{i}"), i as i64), parent, None)
                .unwrap();
            ids.push(node.id);
        }
        (g, ids)
    }

    fn assert_no_references(g: &HistoryGraph, gone: &[String]) {
        for node in g.nodes().values() {
            for id in gone {
                assert!(!node.parent_ids.contains(id), "{} still has parent {}", node.id, id);
                assert!(!node.child_ids.contains(id), "{} still has child {}", node.id, id);
            }
        }
        for branch in g.branches().values() {
            for id in gone {
                assert!(!branch.node_ids.contains(id));
            }
        }
    }

    #[test]
    fn test_generate_id_format() {
        let id = generate_id(NODE_ID_PREFIX, "seed");
        assert!(id.starts_with("hn-"));
        assert_eq!(id.len(), 11);
        validate_id(&id, NODE_ID_PREFIX).unwrap();
    }

    #[test]
    fn test_validate_id_rejects_bad_ids() {
        assert!(validate_id("hb-12345678", NODE_ID_PREFIX).is_err());
        assert!(validate_id("hn-1234", NODE_ID_PREFIX).is_err());
        assert!(validate_id("hn-zzzzzzzz", NODE_ID_PREFIX).is_err());
    }

    #[test]
    fn test_create_root_node() {
        let mut g = HistoryGraph::new();
        let node = g.create_node(snapshot("a"), None, None).unwrap();
        assert!(node.is_root());
        assert_eq!(g.len(), 1);
        assert!(g.branches().is_empty());
    }

    #[test]
    fn test_create_node_links_parent_and_child() {
        let mut g = HistoryGraph::new();
        let root = g.create_node(snapshot("a"), None, None).unwrap();
        let child = g.create_node(snapshot("b"), Some(&root.id), None).unwrap();

        assert_eq!(child.parent_ids, vec![root.id.clone()]);
        assert_eq!(g.node(&root.id).unwrap().child_ids, vec![child.id.clone()]);
    }

    #[test]
    fn test_create_node_with_branch_name_opens_branch() {
        let mut g = HistoryGraph::new();
        let node = g.create_node(snapshot("a"), None, Some("explore")).unwrap();
        let branch = g.branch_starting_at(&node.id).unwrap();
        assert_eq!(branch.name, "explore");
        assert_eq!(branch.node_ids, vec![node.id.clone()]);
        assert_eq!(node.branch_name.as_deref(), Some("explore"));
    }

    #[test]
    fn test_create_node_failures_leave_graph_untouched() {
        let mut g = HistoryGraph::new();
        g.create_node(snapshot("a"), None, Some("main")).unwrap();

        assert!(matches!(
            g.create_node(snapshot("b"), Some("hn-00000000"), None),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            g.create_node(snapshot("b"), None, Some("main")),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            g.create_node(snapshot("b"), None, Some("   ")),
            Err(Error::Validation(_))
        ));
        assert_eq!(g.len(), 1);
        assert_eq!(g.branches().len(), 1);
    }

    #[test]
    fn test_evict_to_capacity_removes_oldest() {
        let (mut g, ids) = chain(6);
        let evicted = g.evict_to_capacity(4, &[]);

        assert_eq!(evicted, vec![ids[0].clone(), ids[1].clone()]);
        assert_eq!(g.len(), 4);
        assert!(g.node(&ids[2]).unwrap().is_root());
        assert_no_references(&g, &evicted);
        assert!(g.validate().is_valid);
    }

    #[test]
    fn test_evict_to_capacity_noop_under_limit() {
        let (mut g, _) = chain(3);
        assert!(g.evict_to_capacity(3, &[]).is_empty());
        assert!(g.evict_to_capacity(10, &[]).is_empty());
        assert_eq!(g.len(), 3);
    }

    #[test]
    fn test_evict_skips_protected_node() {
        let (mut g, ids) = chain(5);
        let evicted = g.evict_to_capacity(3, &[ids[0].as_str()]);

        assert_eq!(evicted, vec![ids[1].clone(), ids[2].clone()]);
        assert!(g.contains(&ids[0]));
        assert_eq!(g.len(), 3);
        assert_no_references(&g, &evicted);
    }

    #[test]
    fn test_evict_ties_broken_by_id() {
        let mut g = HistoryGraph::new();
        let a = g.create_node(snapshot_at("a", 0), None, None).unwrap();
        let b = g.create_node(snapshot_at("b", 0), None, None).unwrap();
        let expected = std::cmp::min(a.id.clone(), b.id.clone());

        assert_eq!(g.evict_to_capacity(1, &[]), vec![expected]);
    }

    #[test]
    fn test_evict_updates_branches() {
        let mut g = HistoryGraph::new();
        let root = g.create_node(snapshot_at("r", 0), None, Some("old")).unwrap();
        let a = g.create_node(snapshot_at("a", 1), Some(&root.id), Some("alt")).unwrap();
        let b = g.create_node(snapshot_at("b", 2), Some(&a.id), None).unwrap();
        let alt_id = g.branch_by_name("alt").unwrap().id.clone();
        g.append_to_branch(&alt_id, &b.id).unwrap();

        let evicted = g.evict_to_capacity(1, &[b.id.as_str()]);
        assert_eq!(evicted.len(), 2);

        // "old" lost its only node and is dropped, "alt" moves its start forward
        assert!(g.branch_by_name("old").is_none());
        let alt = g.branch_by_name("alt").unwrap();
        assert_eq!(alt.start_node_id, b.id);
        assert_eq!(alt.node_ids, vec![b.id.clone()]);
    }

    #[test]
    fn test_evict_keeps_empty_active_branch() {
        let mut g = HistoryGraph::new();
        let root = g.create_node(snapshot_at("r", 0), None, Some("main")).unwrap();
        g.create_node(snapshot_at("a", 1), Some(&root.id), None).unwrap();
        let main_id = g.branch_by_name("main").unwrap().id.clone();
        g.set_active_branch(Some(&main_id)).unwrap();

        g.evict_to_capacity(1, &[]);
        let main = g.branch(&main_id).unwrap();
        assert!(main.is_active);
        assert!(main.node_ids.is_empty());
    }

    #[test]
    fn test_delete_node_unlinks() {
        let (mut g, ids) = chain(3);
        g.delete_node(&ids[1]).unwrap();
        assert_no_references(&g, &[ids[1].clone()]);
        assert!(g.node(&ids[2]).unwrap().is_root());
        assert!(matches!(g.delete_node(&ids[1]), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_add_parent_link_rejects_cycle() {
        let (mut g, ids) = chain(3);
        assert!(matches!(
            g.add_parent_link(&ids[0], &ids[2]),
            Err(Error::CycleDetected(_))
        ));

        let extra = g.create_node(snapshot("x"), None, None).unwrap();
        g.add_parent_link(&ids[2], &extra.id).unwrap();
        g.add_parent_link(&ids[2], &extra.id).unwrap();
        let node = g.node(&ids[2]).unwrap();
        assert_eq!(node.parent_ids, vec![ids[1].clone(), extra.id.clone()]);
        assert_eq!(node.canonical_parent(), Some(ids[1].as_str()));
        assert!(g.validate().is_valid);
    }

    #[test]
    fn test_tags_and_bookmarks() {
        let (mut g, ids) = chain(3);
        assert!(g.add_tag(&ids[0], "hero").unwrap());
        assert!(!g.add_tag(&ids[0], "hero").unwrap());
        g.add_tag(&ids[2], "hero").unwrap();
        assert!(g.add_tag(&ids[0], "  ").is_err());

        let tagged: Vec<&str> = g.nodes_with_tag("hero").iter().map(|n| n.id.as_str()).collect();
        assert_eq!(tagged, vec![ids[0].as_str(), ids[2].as_str()]);

        assert!(g.remove_tag(&ids[0], "hero").unwrap());
        assert!(!g.remove_tag(&ids[0], "hero").unwrap());

        g.set_bookmarked(&ids[1], true).unwrap();
        assert_eq!(g.bookmarked_nodes().len(), 1);
        g.set_description(&ids[1], "final layout").unwrap();
        assert_eq!(g.node(&ids[1]).unwrap().description, "final layout");
        assert!(g.set_bookmarked("hn-missing0", true).is_err());
    }

    #[test]
    fn test_branch_lifecycle() {
        let (mut g, ids) = chain(2);
        let branch = g.create_branch("alt", &ids[0], "try warmer palette").unwrap();
        assert!(!branch.is_active);
        assert!(g.create_branch("alt", &ids[1], "").is_err());
        assert!(matches!(
            g.create_branch("other", "hn-missing0", ""),
            Err(Error::NotFound(_))
        ));

        g.append_to_branch(&branch.id, &ids[1]).unwrap();
        g.append_to_branch(&branch.id, &ids[1]).unwrap();
        assert_eq!(g.branch(&branch.id).unwrap().node_ids, ids);

        g.set_active_branch(Some(&branch.id)).unwrap();
        assert!(matches!(
            g.delete_branch(&branch.id),
            Err(Error::InvalidState(_))
        ));
        g.set_active_branch(None).unwrap();
        g.delete_branch(&branch.id).unwrap();
        assert!(matches!(g.delete_branch(&branch.id), Err(Error::NotFound(_))));
        // Nodes survive branch deletion
        assert_eq!(g.len(), 2);
    }

    #[test]
    fn test_from_parts_rejects_invalid_graph() {
        let (g, ids) = chain(3);
        let (mut nodes, branches) = g.into_parts();
        nodes.get_mut(&ids[2]).unwrap().child_ids.push(ids[0].clone());

        assert!(matches!(
            HistoryGraph::from_parts(nodes, branches),
            Err(Error::CycleDetected(_))
        ));
    }

    #[test]
    fn test_from_parts_rejects_branch_with_missing_node() {
        let mut g = HistoryGraph::new();
        let node = g.create_node(snapshot("a"), None, Some("main")).unwrap();
        let (mut nodes, branches) = g.into_parts();
        nodes.remove(&node.id);

        assert!(matches!(
            HistoryGraph::from_parts(nodes, branches),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_stats_and_components() {
        let (mut g, ids) = chain(3);
        g.create_node(snapshot_at("island", 10), None, None).unwrap();
        g.set_bookmarked(&ids[0], true).unwrap();

        let stats = g.stats();
        assert_eq!(stats.node_count, 4);
        assert_eq!(stats.root_count, 2);
        assert_eq!(stats.leaf_count, 2);
        assert_eq!(stats.bookmarked_count, 1);
        assert_eq!(stats.component_count, 2);
        assert_eq!(stats.ai_node_count, 0);
        assert!(stats.oldest < stats.newest);
    }
}
