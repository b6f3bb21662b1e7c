//! Graph algorithms over the history DAG.
//!
//! All traversal for navigation follows `child_ids` edges only. Parent edges
//! are used to discover the root of a node (through the canonical parent) and
//! for validation, never for path search.

use std::collections::{HashMap, HashSet};
use std::fmt;

use super::HistoryNode;
use crate::{Error, Result};

/// A structural problem found by [`validate_graph`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphIssue {
    /// A cycle reachable through child edges, listed in traversal order
    Cycle(Vec<String>),
    /// `node` lists `parent` as a parent, but `parent` is not in the graph
    DanglingParent { node: String, parent: String },
    /// `node` lists `child` as a child, but `child` is not in the graph
    DanglingChild { node: String, child: String },
    /// A node is stored under a key different from its own id
    KeyMismatch { key: String, id: String },
}

impl fmt::Display for GraphIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphIssue::Cycle(path) => write!(f, "cycle: {}", path.join(" -> ")),
            GraphIssue::DanglingParent { node, parent } => {
                write!(f, "node {} references missing parent {}", node, parent)
            }
            GraphIssue::DanglingChild { node, child } => {
                write!(f, "node {} references missing child {}", node, child)
            }
            GraphIssue::KeyMismatch { key, id } => {
                write!(f, "node {} stored under key {}", id, key)
            }
        }
    }
}

/// Result of [`validate_graph`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphValidation {
    pub is_valid: bool,
    pub errors: Vec<GraphIssue>,
}

impl GraphValidation {
    pub fn has_cycle(&self) -> bool {
        self.errors
            .iter()
            .any(|issue| matches!(issue, GraphIssue::Cycle(_)))
    }

    /// Convert into an error, preferring the cycle error when present.
    pub fn into_result(self) -> Result<()> {
        if self.is_valid {
            return Ok(());
        }
        if let Some(GraphIssue::Cycle(path)) = self
            .errors
            .iter()
            .find(|issue| matches!(issue, GraphIssue::Cycle(_)))
        {
            return Err(Error::CycleDetected(path.join(" -> ")));
        }
        let messages: Vec<String> = self.errors.iter().map(ToString::to_string).collect();
        Err(Error::Validation(messages.join("; ")))
    }
}

/// Depth-first search from `from` to `to` following child edges.
///
/// Returns the first path found (children explored in insertion order), or
/// an empty vector when `to` is unreachable or either id is unknown.
pub fn find_path(nodes: &HashMap<String, HistoryNode>, from: &str, to: &str) -> Vec<String> {
    if !nodes.contains_key(from) || !nodes.contains_key(to) {
        return Vec::new();
    }

    let mut visited: HashSet<&str> = HashSet::new();
    // (node id, index of the next child to explore)
    let mut stack: Vec<(&str, usize)> = vec![(from, 0)];
    visited.insert(from);

    while let Some((current, next_child)) = stack.last().copied() {
        if current == to {
            return stack.iter().map(|(id, _)| id.to_string()).collect();
        }

        let children = nodes
            .get(current)
            .map(|n| n.child_ids.as_slice())
            .unwrap_or_default();

        if let Some(child) = children.get(next_child) {
            if let Some(top) = stack.last_mut() {
                top.1 += 1;
            }
            if nodes.contains_key(child.as_str()) && visited.insert(child.as_str()) {
                stack.push((child.as_str(), 0));
            }
        } else {
            stack.pop();
        }
    }

    Vec::new()
}

/// Walk canonical parents from `id` up to its parentless ancestor.
///
/// Fails loudly instead of guessing: a parent walk that revisits a node is a
/// cycle, and a missing parent is a dangling reference.
pub fn canonical_root(nodes: &HashMap<String, HistoryNode>, id: &str) -> Result<String> {
    let mut current = nodes
        .get(id)
        .ok_or_else(|| Error::NotFound(format!("node {}", id)))?;
    let mut seen: HashSet<&str> = HashSet::new();

    while let Some(parent_id) = current.canonical_parent() {
        if !seen.insert(current.id.as_str()) {
            return Err(Error::CycleDetected(format!(
                "parent chain of {} loops back to {}",
                id, current.id
            )));
        }
        current = nodes.get(parent_id).ok_or_else(|| {
            Error::Validation(format!(
                "node {} references missing parent {}",
                current.id, parent_id
            ))
        })?;
    }

    Ok(current.id.clone())
}

/// Path from the root of `id` down to `id`, used to rebuild undo stacks.
pub fn path_to(nodes: &HashMap<String, HistoryNode>, id: &str) -> Result<Vec<String>> {
    let root = canonical_root(nodes, id)?;
    let path = find_path(nodes, &root, id);
    if path.is_empty() {
        return Err(Error::InvalidState(format!(
            "node {} is not reachable from its root {} through child links",
            id, root
        )));
    }
    Ok(path)
}

/// All parentless nodes, oldest first (ties broken by id).
pub fn roots(nodes: &HashMap<String, HistoryNode>) -> Vec<String> {
    let mut found: Vec<&HistoryNode> = nodes.values().filter(|n| n.is_root()).collect();
    found.sort_by(|a, b| {
        a.snapshot
            .timestamp
            .cmp(&b.snapshot.timestamp)
            .then_with(|| a.id.cmp(&b.id))
    });
    found.into_iter().map(|n| n.id.clone()).collect()
}

/// Oldest parentless node.
///
/// An empty graph has no root (NotFound); a non-empty graph without any
/// parentless node can only come from a parent cycle (CycleDetected).
pub fn find_root(nodes: &HashMap<String, HistoryNode>) -> Result<String> {
    if nodes.is_empty() {
        return Err(Error::NotFound("root of empty graph".to_string()));
    }
    roots(nodes)
        .into_iter()
        .next()
        .ok_or_else(|| Error::CycleDetected("every node has a parent".to_string()))
}

/// Check whether linking `parent -> child` would close a cycle.
///
/// That happens exactly when `parent` is already reachable from `child`.
pub fn would_create_cycle(nodes: &HashMap<String, HistoryNode>, parent: &str, child: &str) -> bool {
    if parent == child {
        return true;
    }

    let mut visited = HashSet::new();
    let mut stack = vec![child];

    while let Some(current) = stack.pop() {
        if current == parent {
            return true;
        }
        if !visited.insert(current) {
            continue;
        }
        if let Some(node) = nodes.get(current) {
            for next in &node.child_ids {
                if !visited.contains(next.as_str()) {
                    stack.push(next.as_str());
                }
            }
        }
    }

    false
}

/// Structural validation used for import/export safety.
///
/// Detects child-reachability cycles, dangling parent references, and
/// dangling child references. The cycle search is an iterative DFS, so
/// arbitrarily long histories validate in linear time.
pub fn validate_graph(nodes: &HashMap<String, HistoryNode>) -> GraphValidation {
    let mut errors = Vec::new();

    let mut ids: Vec<&String> = nodes.keys().collect();
    ids.sort();

    for &key in &ids {
        let node = &nodes[key.as_str()];
        if node.id != *key {
            errors.push(GraphIssue::KeyMismatch {
                key: key.to_string(),
                id: node.id.clone(),
            });
        }
        for parent in &node.parent_ids {
            if !nodes.contains_key(parent) {
                errors.push(GraphIssue::DanglingParent {
                    node: node.id.clone(),
                    parent: parent.clone(),
                });
            }
        }
        for child in &node.child_ids {
            if !nodes.contains_key(child) {
                errors.push(GraphIssue::DanglingChild {
                    node: node.id.clone(),
                    child: child.clone(),
                });
            }
        }
    }

    let mut visited: HashSet<&str> = HashSet::new();
    for &key in &ids {
        if !visited.contains(key.as_str()) {
            detect_cycles(nodes, key, &mut visited, &mut errors);
        }
    }

    GraphValidation {
        is_valid: errors.is_empty(),
        errors,
    }
}

/// DFS from `start` over child links, recording every back edge as a cycle.
fn detect_cycles<'a>(
    nodes: &'a HashMap<String, HistoryNode>,
    start: &'a str,
    visited: &mut HashSet<&'a str>,
    errors: &mut Vec<GraphIssue>,
) {
    // (node id, index of the next child to explore)
    let mut stack: Vec<(&'a str, usize)> = vec![(start, 0)];
    let mut on_stack: HashSet<&'a str> = HashSet::from([start]);
    visited.insert(start);

    while let Some((current, next_child)) = stack.last().copied() {
        let children = nodes
            .get(current)
            .map(|n| n.child_ids.as_slice())
            .unwrap_or_default();

        let Some(child) = children.get(next_child) else {
            on_stack.remove(current);
            stack.pop();
            continue;
        };
        if let Some(top) = stack.last_mut() {
            top.1 += 1;
        }

        let child = child.as_str();
        if on_stack.contains(child) {
            let pos = stack.iter().position(|(id, _)| *id == child).unwrap_or(0);
            let mut cycle: Vec<String> = stack[pos..].iter().map(|(id, _)| id.to_string()).collect();
            cycle.push(child.to_string());
            errors.push(GraphIssue::Cycle(cycle));
        } else if nodes.contains_key(child) && visited.insert(child) {
            on_stack.insert(child);
            stack.push((child, 0));
        }
    }
}

/// Union-Find (Disjoint Set Union) over node ids.
///
/// Uses path compression and union by rank. Used to count weakly connected
/// components of the history, e.g. islands left behind by eviction.
#[derive(Debug, Clone, Default)]
pub struct UnionFind {
    parent: HashMap<String, String>,
    rank: HashMap<String, usize>,
}

impl UnionFind {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the structure from every parent/child link in `nodes`.
    pub fn from_nodes(nodes: &HashMap<String, HistoryNode>) -> Self {
        let mut uf = Self::new();
        for id in nodes.keys() {
            uf.make_set(id);
        }
        for node in nodes.values() {
            for child in &node.child_ids {
                uf.union(&node.id, child);
            }
            for parent in &node.parent_ids {
                uf.union(&node.id, parent);
            }
        }
        uf
    }

    /// Add a new element. No-op if it already exists.
    pub fn make_set(&mut self, x: &str) {
        if !self.parent.contains_key(x) {
            self.parent.insert(x.to_string(), x.to_string());
            self.rank.insert(x.to_string(), 0);
        }
    }

    /// Representative of the set containing `x`, compressing the path.
    pub fn find(&mut self, x: &str) -> Option<String> {
        let parent = self.parent.get(x)?.clone();
        if parent == x {
            return Some(parent);
        }
        let root = self.find(&parent)?;
        self.parent.insert(x.to_string(), root.clone());
        Some(root)
    }

    /// Merge the sets of `x` and `y`. Returns false if already merged or unknown.
    pub fn union(&mut self, x: &str, y: &str) -> bool {
        let (Some(root_x), Some(root_y)) = (self.find(x), self.find(y)) else {
            return false;
        };
        if root_x == root_y {
            return false;
        }

        let rank_x = self.rank.get(&root_x).copied().unwrap_or(0);
        let rank_y = self.rank.get(&root_y).copied().unwrap_or(0);
        if rank_x < rank_y {
            self.parent.insert(root_x, root_y);
        } else if rank_x > rank_y {
            self.parent.insert(root_y, root_x);
        } else {
            self.parent.insert(root_y, root_x.clone());
            self.rank.insert(root_x, rank_x + 1);
        }
        true
    }

    pub fn connected(&mut self, x: &str, y: &str) -> bool {
        match (self.find(x), self.find(y)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// All components, each sorted, ordered by their first id.
    pub fn components(&mut self) -> Vec<Vec<String>> {
        let mut grouped: HashMap<String, Vec<String>> = HashMap::new();
        let elements: Vec<String> = self.parent.keys().cloned().collect();
        for elem in elements {
            if let Some(root) = self.find(&elem) {
                grouped.entry(root).or_default().push(elem);
            }
        }
        let mut components: Vec<Vec<String>> = grouped
            .into_values()
            .map(|mut c| {
                c.sort();
                c
            })
            .collect();
        components.sort();
        components
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::snapshot_at;

    /// Build nodes from (id, children) pairs, deriving parent links.
    fn graph(edges: &[(&str, &[&str])]) -> HashMap<String, HistoryNode> {
        let mut nodes: HashMap<String, HistoryNode> = HashMap::new();
        for (i, (id, _)) in edges.iter().enumerate() {
            nodes.insert(
                id.to_string(),
                HistoryNode::new(id.to_string(), snapshot_at(id, i as i64)),
            );
        }
        for (id, children) in edges {
            for child in children.iter() {
                nodes.get_mut(*id).unwrap().child_ids.push(child.to_string());
                if let Some(c) = nodes.get_mut(*child) {
                    c.parent_ids.push(id.to_string());
                }
            }
        }
        nodes
    }

    #[test]
    fn test_find_path_linear_chain() {
        let nodes = graph(&[("R", &["A"]), ("A", &["B"]), ("B", &["C"]), ("C", &[])]);
        assert_eq!(find_path(&nodes, "R", "C"), vec!["R", "A", "B", "C"]);
    }

    #[test]
    fn test_find_path_disconnected_is_empty() {
        let nodes = graph(&[("R", &["A"]), ("A", &[]), ("X", &[])]);
        assert!(find_path(&nodes, "R", "X").is_empty());
    }

    #[test]
    fn test_find_path_ignores_parent_edges() {
        let nodes = graph(&[("R", &["A"]), ("A", &[])]);
        assert!(find_path(&nodes, "A", "R").is_empty());
    }

    #[test]
    fn test_find_path_same_node() {
        let nodes = graph(&[("R", &[])]);
        assert_eq!(find_path(&nodes, "R", "R"), vec!["R"]);
    }

    #[test]
    fn test_find_path_unknown_ids() {
        let nodes = graph(&[("R", &[])]);
        assert!(find_path(&nodes, "R", "missing").is_empty());
        assert!(find_path(&nodes, "missing", "R").is_empty());
    }

    #[test]
    fn test_find_path_prefers_first_inserted_child() {
        let nodes = graph(&[
            ("R", &["A", "B"]),
            ("A", &["T"]),
            ("B", &["T"]),
            ("T", &[]),
        ]);
        assert_eq!(find_path(&nodes, "R", "T"), vec!["R", "A", "T"]);
    }

    #[test]
    fn test_find_path_terminates_on_cycle() {
        let nodes = graph(&[("A", &["B"]), ("B", &["C"]), ("C", &["A"]), ("X", &[])]);
        assert!(find_path(&nodes, "A", "X").is_empty());
        assert_eq!(find_path(&nodes, "A", "C"), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_validate_detects_three_node_ring() {
        let nodes = graph(&[("A", &["B"]), ("B", &["C"]), ("C", &["A"])]);
        let result = validate_graph(&nodes);
        assert!(!result.is_valid);
        assert!(result.has_cycle());
        assert!(matches!(result.into_result(), Err(Error::CycleDetected(_))));
    }

    #[test]
    fn test_validate_detects_dangling_references() {
        let mut nodes = graph(&[("A", &["B"]), ("B", &[])]);
        nodes.get_mut("A").unwrap().child_ids.push("ghost".to_string());
        nodes.get_mut("B").unwrap().parent_ids.push("phantom".to_string());

        let result = validate_graph(&nodes);
        assert!(!result.is_valid);
        assert!(result.errors.contains(&GraphIssue::DanglingChild {
            node: "A".to_string(),
            child: "ghost".to_string()
        }));
        assert!(result.errors.contains(&GraphIssue::DanglingParent {
            node: "B".to_string(),
            parent: "phantom".to_string()
        }));
        assert!(!result.has_cycle());
        assert!(matches!(result.into_result(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_validate_long_chain_iteratively() {
        let len = 100_000;
        let base = snapshot_at("link", 0);
        let mut nodes = HashMap::with_capacity(len);
        for i in 0..len {
            let mut node = HistoryNode::new(format!("n{i}"), base.clone());
            if i > 0 {
                node.parent_ids.push(format!("n{}", i - 1));
            }
            if i + 1 < len {
                node.child_ids.push(format!("n{}", i + 1));
            }
            nodes.insert(node.id.clone(), node);
        }

        assert!(validate_graph(&nodes).is_valid);
        assert_eq!(path_to(&nodes, "n99999").unwrap().len(), len);
        let restored = crate::history::HistoryGraph::from_parts(nodes.clone(), HashMap::new());
        assert_eq!(restored.unwrap().len(), len);

        // Closing the chain into a ring is caught without recursion too
        nodes.get_mut("n99999").unwrap().child_ids.push("n0".to_string());
        let result = validate_graph(&nodes);
        assert!(result.has_cycle());
        match &result.errors[..] {
            [GraphIssue::Cycle(path)] => {
                assert_eq!(path.len(), len + 1);
                assert_eq!(path.first(), path.last());
            }
            other => panic!("expected one cycle, got {} issues", other.len()),
        }
    }

    #[test]
    fn test_validate_accepts_diamond_dag() {
        let nodes = graph(&[
            ("R", &["A", "B"]),
            ("A", &["M"]),
            ("B", &["M"]),
            ("M", &[]),
        ]);
        let result = validate_graph(&nodes);
        assert!(result.is_valid, "{:?}", result.errors);
    }

    #[test]
    fn test_canonical_root_walks_first_parent() {
        let nodes = graph(&[("R", &["A"]), ("A", &["B"]), ("B", &[])]);
        assert_eq!(canonical_root(&nodes, "B").unwrap(), "R");
        assert_eq!(path_to(&nodes, "B").unwrap(), vec!["R", "A", "B"]);
    }

    #[test]
    fn test_canonical_root_fails_on_parent_loop() {
        let nodes = graph(&[("A", &["B"]), ("B", &["A"])]);
        assert!(matches!(
            canonical_root(&nodes, "A"),
            Err(Error::CycleDetected(_))
        ));
        assert!(matches!(find_root(&nodes), Err(Error::CycleDetected(_))));
    }

    #[test]
    fn test_find_root_prefers_oldest() {
        let nodes = graph(&[("R1", &["A"]), ("A", &[]), ("R2", &[])]);
        assert_eq!(find_root(&nodes).unwrap(), "R1");
        assert_eq!(roots(&nodes), vec!["R1", "R2"]);
        assert!(matches!(find_root(&HashMap::new()), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_would_create_cycle() {
        let nodes = graph(&[("R", &["A"]), ("A", &["B"]), ("B", &[]), ("X", &[])]);
        assert!(would_create_cycle(&nodes, "B", "R"));
        assert!(would_create_cycle(&nodes, "A", "A"));
        assert!(!would_create_cycle(&nodes, "X", "B"));
        assert!(!would_create_cycle(&nodes, "R", "B"));
    }

    #[test]
    fn test_union_find_components() {
        let nodes = graph(&[("R", &["A"]), ("A", &[]), ("X", &["Y"]), ("Y", &[]), ("Z", &[])]);
        let mut uf = UnionFind::from_nodes(&nodes);
        assert_eq!(uf.len(), 5);
        assert!(uf.connected("R", "A"));
        assert!(!uf.connected("A", "X"));
        let components = uf.components();
        assert_eq!(components.len(), 3);
        assert_eq!(components[0], vec!["A", "R"]);
    }

    #[test]
    fn test_union_find_unknown_elements() {
        let mut uf = UnionFind::new();
        assert!(uf.is_empty());
        uf.make_set("a");
        assert!(!uf.union("a", "b"));
        assert_eq!(uf.find("b"), None);
    }
}
