//! Undo/redo and arbitrary-node navigation over the history graph.
//!
//! The controller owns the [`HistoryGraph`], the cursor and two stacks of
//! node ids. The undo stack is always a root-to-current path through child
//! links, with the current node on top; the redo stack holds the nodes an
//! undo stepped back over, next-forward on top.
//!
//! Every successful mutation is published as a [`NavigationView`] to
//! subscribers and handed to a [`StoreWriter`] that mirrors it into the
//! injected [`HistoryStore`] on its own thread. Commands never wait for the
//! store; write failures are logged and counted, never rolled back.

use crate::action_log::ActionLogger;
use crate::events::StateStream;
use crate::gesture::NavigationCommand;
use crate::history::{HistoryGraph, HistoryStats};
use crate::models::{
    CanvasSnapshot, EXPORT_FORMAT_VERSION, HistoryBranch, HistoryExport, HistoryNode,
    NavigationState,
};
use crate::storage::{Cursor, HistoryStore, StateUpdate, StoreWriter};
use crate::{Error, Result};
use serde::Serialize;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use tokio::sync::watch;

/// Default cap on retained history nodes.
pub const DEFAULT_MAX_HISTORY_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationConfig {
    /// Evict oldest nodes once the graph grows past this many
    pub max_history_size: usize,
    /// Recorded in action journal entries
    pub session_id: String,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            max_history_size: DEFAULT_MAX_HISTORY_SIZE,
            session_id: "default".to_string(),
        }
    }
}

impl NavigationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_history_size == 0 {
            return Err(Error::Validation(
                "max_history_size must be at least 1".to_string(),
            ));
        }
        if self.session_id.trim().is_empty() {
            return Err(Error::Validation("session_id must not be empty".to_string()));
        }
        Ok(())
    }
}

/// What UI observers receive after every committed mutation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NavigationView {
    /// Bumped once per published mutation
    pub revision: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_branch_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_snapshot: Option<CanvasSnapshot>,
    pub can_undo: bool,
    pub can_redo: bool,
    pub undo_depth: usize,
    pub redo_depth: usize,
    pub node_count: usize,
    pub branch_count: usize,
}

/// Single-writer navigation state machine for one canvas session.
pub struct NavigationController<S: HistoryStore + 'static> {
    graph: HistoryGraph,
    current_node_id: Option<String>,
    undo_stack: Vec<String>,
    redo_stack: Vec<String>,
    /// Nodes eviction must not remove
    pinned: HashSet<String>,
    config: NavigationConfig,
    writer: StoreWriter<S>,
    stream: StateStream<NavigationView>,
    action_log: Option<ActionLogger>,
    revision: u64,
}

impl<S: HistoryStore + 'static> NavigationController<S> {
    /// A controller with empty history. Nothing is read from `store`.
    pub fn new(store: S, config: NavigationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            graph: HistoryGraph::new(),
            current_node_id: None,
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            pinned: HashSet::new(),
            config,
            writer: StoreWriter::start(store)?,
            stream: StateStream::default(),
            action_log: None,
            revision: 0,
        })
    }

    /// Start a session from whatever `store` holds.
    ///
    /// The loaded graph and cursor are validated like an import; the undo
    /// stack is rebuilt from the path to the stored current node.
    pub fn open(store: S, config: NavigationConfig) -> Result<Self> {
        let loaded = store.load_all()?;
        let mut controller = Self::new(store, config)?;
        if loaded.is_empty() {
            return Ok(controller);
        }

        let (graph, current, undo_stack) = Self::restore(
            loaded.nodes,
            loaded.branches,
            loaded.cursor.current_node_id,
            loaded.cursor.active_branch_id,
        )?;
        controller.graph = graph;
        controller.current_node_id = current;
        controller.undo_stack = undo_stack;
        tracing::info!(
            location = %controller.writer.location(),
            nodes = controller.graph.len(),
            "History session opened"
        );
        controller.publish();
        Ok(controller)
    }

    /// End the session: write everything once more, wait for the writer to
    /// drain and hand the store back.
    pub fn close(mut self) -> Result<S> {
        self.persist_all();
        let store = self.writer.finish()?;
        tracing::debug!(session = %self.config.session_id, "History session closed");
        Ok(store)
    }

    /// Wait until every change so far has been attempted against the store.
    pub fn flush(&self) {
        self.writer.flush();
    }

    /// Journal every command to `logger`.
    pub fn with_action_log(mut self, logger: ActionLogger) -> Self {
        self.action_log = Some(logger);
        self
    }

    // === Accessors ===

    pub fn graph(&self) -> &HistoryGraph {
        &self.graph
    }

    pub fn config(&self) -> &NavigationConfig {
        &self.config
    }

    /// Where the store writes, for display.
    pub fn store_location(&self) -> &str {
        self.writer.location()
    }

    pub fn current_node_id(&self) -> Option<&str> {
        self.current_node_id.as_deref()
    }

    pub fn current_node(&self) -> Option<&HistoryNode> {
        self.current_node_id
            .as_deref()
            .and_then(|id| self.graph.node(id))
    }

    pub fn current_snapshot(&self) -> Option<&CanvasSnapshot> {
        self.current_node().map(|n| &n.snapshot)
    }

    pub fn active_branch_id(&self) -> Option<&str> {
        self.graph.active_branch().map(|b| b.id.as_str())
    }

    pub fn can_undo(&self) -> bool {
        self.undo_stack.len() > 1
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_stack(&self) -> &[String] {
        &self.undo_stack
    }

    pub fn redo_stack(&self) -> &[String] {
        &self.redo_stack
    }

    pub fn stats(&self) -> HistoryStats {
        self.graph.stats()
    }

    /// Store writes that failed since the controller was created. Writes
    /// are asynchronous; call [`flush`](Self::flush) first for an exact count.
    pub fn persistence_failures(&self) -> u64 {
        self.writer.failures()
    }

    pub fn is_pinned(&self, id: &str) -> bool {
        self.pinned.contains(id)
    }

    /// Full copy of the navigation state.
    pub fn state(&self) -> NavigationState {
        NavigationState {
            nodes: self.graph.nodes().clone(),
            branches: self.graph.branches().clone(),
            current_node_id: self.current_node_id.clone(),
            active_branch_id: self.active_branch_id().map(str::to_string),
            can_undo: self.can_undo(),
            can_redo: self.can_redo(),
        }
    }

    pub fn view(&self) -> NavigationView {
        NavigationView {
            revision: self.revision,
            current_node_id: self.current_node_id.clone(),
            active_branch_id: self.active_branch_id().map(str::to_string),
            current_snapshot: self.current_snapshot().cloned(),
            can_undo: self.can_undo(),
            can_redo: self.can_redo(),
            undo_depth: self.undo_stack.len(),
            redo_depth: self.redo_stack.len(),
            node_count: self.graph.len(),
            branch_count: self.graph.branches().len(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<NavigationView> {
        self.stream.subscribe()
    }

    // === Commands ===

    /// Record a new canvas state as a child of the current node.
    ///
    /// Clears forward history. With `branch_name` the new node opens a new
    /// active branch; otherwise it extends the active branch, if any.
    pub fn create_snapshot(
        &mut self,
        snapshot: CanvasSnapshot,
        branch_name: Option<&str>,
    ) -> Result<CanvasSnapshot> {
        let started = Instant::now();
        let args = json!({
            "layers": snapshot.layers.len(),
            "source": snapshot.source.as_str(),
            "branch": branch_name,
        });
        let outcome = self.create_snapshot_inner(snapshot, branch_name);
        self.journal("create_snapshot", args, &outcome, started);
        outcome
    }

    fn create_snapshot_inner(
        &mut self,
        snapshot: CanvasSnapshot,
        branch_name: Option<&str>,
    ) -> Result<CanvasSnapshot> {
        let parent = self.current_node_id.clone();
        let node = self
            .graph
            .create_node(snapshot, parent.as_deref(), branch_name)?;

        if branch_name.is_some() {
            let opened = self.graph.branch_starting_at(&node.id).map(|b| b.id.clone());
            self.graph.set_active_branch(opened.as_deref())?;
        } else if let Some(active) = self.active_branch_id().map(str::to_string) {
            self.graph.append_to_branch(&active, &node.id)?;
        }

        self.undo_stack.push(node.id.clone());
        self.redo_stack.clear();
        self.current_node_id = Some(node.id.clone());

        if self.graph.len() > self.config.max_history_size {
            let protected: Vec<&str> = std::iter::once(node.id.as_str())
                .chain(self.pinned.iter().map(String::as_str))
                .collect();
            let evicted = self
                .graph
                .evict_to_capacity(self.config.max_history_size, &protected);
            self.undo_stack.retain(|id| !evicted.contains(id));
            self.redo_stack.retain(|id| !evicted.contains(id));
        }

        tracing::debug!(node_id = %node.id, undo_depth = self.undo_stack.len(), "Snapshot created");
        self.persist_all();
        self.publish();
        Ok(node.snapshot)
    }

    /// Step back to the previous node on the undo stack.
    pub fn undo(&mut self) -> Result<CanvasSnapshot> {
        let started = Instant::now();
        let outcome = self.undo_inner();
        self.journal("undo", json!({}), &outcome, started);
        outcome
    }

    fn undo_inner(&mut self) -> Result<CanvasSnapshot> {
        if self.undo_stack.len() <= 1 {
            return Err(Error::NoPreviousState);
        }
        let target = self.undo_stack[self.undo_stack.len() - 2].clone();
        let snapshot = self.graph.get_node(&target)?.snapshot.clone();

        if let Some(top) = self.undo_stack.pop() {
            self.redo_stack.push(top);
        }
        self.current_node_id = Some(target.clone());
        self.sync_active_branch()?;

        tracing::debug!(node_id = %target, redo_depth = self.redo_stack.len(), "Undo");
        self.persist_cursor();
        self.publish();
        Ok(snapshot)
    }

    /// Step forward to the most recently undone node.
    pub fn redo(&mut self) -> Result<CanvasSnapshot> {
        let started = Instant::now();
        let outcome = self.redo_inner();
        self.journal("redo", json!({}), &outcome, started);
        outcome
    }

    fn redo_inner(&mut self) -> Result<CanvasSnapshot> {
        let target = self.redo_stack.last().cloned().ok_or(Error::NoForwardState)?;
        let snapshot = self.graph.get_node(&target)?.snapshot.clone();

        self.redo_stack.pop();
        self.undo_stack.push(target.clone());
        self.current_node_id = Some(target.clone());
        self.sync_active_branch()?;

        tracing::debug!(node_id = %target, redo_depth = self.redo_stack.len(), "Redo");
        self.persist_cursor();
        self.publish();
        Ok(snapshot)
    }

    /// Jump to any node.
    ///
    /// The undo stack becomes the root-to-target path. Jumping back along the
    /// current undo path keeps the skipped nodes redoable; jumping anywhere
    /// else discards forward history.
    pub fn navigate_to_node(&mut self, id: &str) -> Result<CanvasSnapshot> {
        let started = Instant::now();
        let outcome = self.navigate_to_node_inner(id);
        self.journal("navigate_to_node", json!({ "node_id": id }), &outcome, started);
        outcome
    }

    fn navigate_to_node_inner(&mut self, id: &str) -> Result<CanvasSnapshot> {
        let snapshot = self.graph.get_node(id)?.snapshot.clone();
        let path = self.graph.path_to(id)?;

        self.move_cursor(id, path);
        self.sync_active_branch()?;

        tracing::debug!(node_id = %id, undo_depth = self.undo_stack.len(), "Navigated");
        self.persist_cursor();
        self.publish();
        Ok(snapshot)
    }

    /// Open a branch at `from_node` (default: the current node), make it
    /// active and move there.
    pub fn create_branch(&mut self, name: &str, from_node: Option<&str>) -> Result<HistoryBranch> {
        let started = Instant::now();
        let outcome = self.create_branch_inner(name, from_node);
        self.journal(
            "create_branch",
            json!({ "name": name, "from_node": from_node }),
            &outcome,
            started,
        );
        outcome
    }

    fn create_branch_inner(&mut self, name: &str, from_node: Option<&str>) -> Result<HistoryBranch> {
        let start = match from_node {
            Some(id) => id.to_string(),
            None => self.current_node_id.clone().ok_or_else(|| {
                Error::Validation("cannot branch from an empty history".to_string())
            })?,
        };
        self.graph.get_node(&start)?;
        let path = self.graph.path_to(&start)?;

        let branch = self.graph.create_branch(name, &start, "")?;
        self.graph.set_active_branch(Some(&branch.id))?;
        self.move_cursor(&start, path);

        self.persist_all();
        self.publish();
        Ok(self.graph.get_branch(&branch.id)?.clone())
    }

    /// Move to the last node of a branch and make it active.
    pub fn switch_to_branch(&mut self, branch_id: &str) -> Result<CanvasSnapshot> {
        let started = Instant::now();
        let outcome = self.switch_to_branch_inner(branch_id);
        self.journal(
            "switch_to_branch",
            json!({ "branch_id": branch_id }),
            &outcome,
            started,
        );
        outcome
    }

    fn switch_to_branch_inner(&mut self, branch_id: &str) -> Result<CanvasSnapshot> {
        let branch = self.graph.get_branch(branch_id)?;
        let head = branch
            .head()
            .ok_or_else(|| Error::InvalidState(format!("branch {} has no nodes", branch.name)))?
            .to_string();
        let snapshot = self.graph.get_node(&head)?.snapshot.clone();
        let path = self.graph.path_to(&head)?;

        self.graph.set_active_branch(Some(branch_id))?;
        self.move_cursor(&head, path);

        tracing::debug!(branch_id, node_id = %head, "Switched branch");
        self.persist_all();
        self.publish();
        Ok(snapshot)
    }

    /// Delete an inactive branch. Its nodes stay in the graph.
    pub fn delete_branch(&mut self, branch_id: &str) -> Result<HistoryBranch> {
        let started = Instant::now();
        let outcome = self.graph.delete_branch(branch_id);
        if outcome.is_ok() {
            self.persist_branches();
            self.publish();
        }
        self.journal("delete_branch", json!({ "branch_id": branch_id }), &outcome, started);
        outcome
    }

    /// Delete any node except the current one.
    pub fn delete_node(&mut self, id: &str) -> Result<HistoryNode> {
        let started = Instant::now();
        let outcome = self.delete_node_inner(id);
        self.journal("delete_node", json!({ "node_id": id }), &outcome, started);
        outcome
    }

    fn delete_node_inner(&mut self, id: &str) -> Result<HistoryNode> {
        if self.current_node_id.as_deref() == Some(id) {
            return Err(Error::InvalidState(format!(
                "cannot delete current node {}",
                id
            )));
        }
        let removed = self.graph.delete_node(id)?;
        self.pinned.remove(id);
        self.undo_stack.retain(|n| n != id);
        self.redo_stack.retain(|n| n != id);

        self.persist_all();
        self.publish();
        Ok(removed)
    }

    /// Dispatch a command produced by the gesture engine.
    pub fn apply_command(&mut self, command: NavigationCommand) -> Result<Option<CanvasSnapshot>> {
        match command {
            NavigationCommand::Undo => self.undo().map(Some),
            NavigationCommand::Redo => self.redo().map(Some),
            NavigationCommand::None => Ok(None),
        }
    }

    // === Export / import ===

    /// Serialize nodes, branches and cursor as a versioned JSON document.
    pub fn export_state(&self) -> Result<String> {
        let export = HistoryExport::new(self.state());
        Ok(serde_json::to_string_pretty(&export)?)
    }

    /// Replace all state with an exported document.
    ///
    /// Everything is validated before anything changes: the format version,
    /// graph structure (cycles, dangling links), branch references and the
    /// cursor. Forward history is discarded.
    pub fn import_state(&mut self, blob: &str) -> Result<()> {
        let started = Instant::now();
        let outcome = self.import_state_inner(blob);
        self.journal("import_state", json!({ "bytes": blob.len() }), &outcome, started);
        outcome
    }

    fn import_state_inner(&mut self, blob: &str) -> Result<()> {
        let export: HistoryExport = serde_json::from_str(blob)?;
        if export.format_version == 0 || export.format_version > EXPORT_FORMAT_VERSION {
            return Err(Error::Validation(format!(
                "unsupported export format version {}",
                export.format_version
            )));
        }

        let state = export.state;
        let (graph, current, undo_stack) = Self::restore(
            state.nodes,
            state.branches,
            state.current_node_id,
            state.active_branch_id,
        )?;

        self.graph = graph;
        self.current_node_id = current;
        self.undo_stack = undo_stack;
        self.redo_stack.clear();
        self.pinned.retain(|id| self.graph.contains(id));

        tracing::info!(
            nodes = self.graph.len(),
            branches = self.graph.branches().len(),
            exported_at = %export.exported_at,
            "History imported"
        );
        self.persist_all();
        self.publish();
        Ok(())
    }

    /// Validate stored parts and compute the cursor and undo stack for them.
    fn restore(
        nodes: HashMap<String, HistoryNode>,
        branches: HashMap<String, HistoryBranch>,
        current: Option<String>,
        active_branch: Option<String>,
    ) -> Result<(HistoryGraph, Option<String>, Vec<String>)> {
        let mut graph = HistoryGraph::from_parts(nodes, branches)?;

        if let Some(id) = current.as_deref() {
            if !graph.contains(id) {
                return Err(Error::Validation(format!(
                    "cursor references missing node {}",
                    id
                )));
            }
        }
        if let Some(id) = active_branch.as_deref() {
            if graph.branch(id).is_none() {
                return Err(Error::Validation(format!(
                    "cursor references missing branch {}",
                    id
                )));
            }
        }

        let undo_stack = match current.as_deref() {
            Some(id) => graph.path_to(id)?,
            None => Vec::new(),
        };
        graph.set_active_branch(active_branch.as_deref())?;
        Ok((graph, current, undo_stack))
    }

    // === Annotations ===

    pub fn add_tag(&mut self, node_id: &str, tag: &str) -> Result<bool> {
        let added = self.graph.add_tag(node_id, tag)?;
        if added {
            self.persist_nodes();
            self.publish();
        }
        Ok(added)
    }

    pub fn remove_tag(&mut self, node_id: &str, tag: &str) -> Result<bool> {
        let removed = self.graph.remove_tag(node_id, tag)?;
        if removed {
            self.persist_nodes();
            self.publish();
        }
        Ok(removed)
    }

    pub fn set_bookmarked(&mut self, node_id: &str, bookmarked: bool) -> Result<()> {
        self.graph.set_bookmarked(node_id, bookmarked)?;
        self.persist_nodes();
        self.publish();
        Ok(())
    }

    pub fn set_description(&mut self, node_id: &str, description: &str) -> Result<()> {
        self.graph.set_description(node_id, description)?;
        self.persist_nodes();
        self.publish();
        Ok(())
    }

    /// Keep `node_id` through eviction until it is unpinned.
    pub fn pin_node(&mut self, node_id: &str) -> Result<()> {
        self.graph.get_node(node_id)?;
        self.pinned.insert(node_id.to_string());
        Ok(())
    }

    /// Returns whether the node was pinned.
    pub fn unpin_node(&mut self, node_id: &str) -> bool {
        self.pinned.remove(node_id)
    }

    // === Internals ===

    /// Point the cursor at `id`, whose root path is `path`, keeping any
    /// skipped-over part of the old undo path redoable.
    fn move_cursor(&mut self, id: &str, path: Vec<String>) {
        match self.undo_stack.iter().position(|n| n == id) {
            Some(pos) => {
                let skipped = self.undo_stack.split_off(pos + 1);
                self.redo_stack.extend(skipped.into_iter().rev());
            }
            None => self.redo_stack.clear(),
        }
        self.undo_stack = path;
        self.current_node_id = Some(id.to_string());
    }

    /// Keep the active branch if it holds the current node, else activate
    /// the newest branch that does, else none.
    fn sync_active_branch(&mut self) -> Result<()> {
        let Some(current) = self.current_node_id.as_deref() else {
            return Ok(());
        };
        if self
            .graph
            .active_branch()
            .is_some_and(|b| b.contains(current))
        {
            return Ok(());
        }
        let next = self
            .graph
            .branches()
            .values()
            .filter(|b| b.contains(current))
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)))
            .map(|b| b.id.clone());
        self.graph.set_active_branch(next.as_deref())
    }

    fn cursor(&self) -> Cursor {
        Cursor {
            current_node_id: self.current_node_id.clone(),
            active_branch_id: self.active_branch_id().map(str::to_string),
        }
    }

    fn persist_nodes(&self) {
        self.writer.send(StateUpdate {
            nodes: Some(self.graph.nodes().clone()),
            ..Default::default()
        });
    }

    fn persist_branches(&self) {
        self.writer.send(StateUpdate {
            branches: Some(self.graph.branches().clone()),
            ..Default::default()
        });
    }

    /// Undo/redo can flip which branch is active, so branches go along.
    fn persist_cursor(&self) {
        self.writer.send(StateUpdate {
            branches: Some(self.graph.branches().clone()),
            cursor: Some(self.cursor()),
            ..Default::default()
        });
    }

    fn persist_all(&self) {
        self.writer.send(StateUpdate {
            nodes: Some(self.graph.nodes().clone()),
            branches: Some(self.graph.branches().clone()),
            cursor: Some(self.cursor()),
        });
    }

    fn publish(&mut self) {
        self.revision += 1;
        self.stream.publish(self.view());
    }

    fn journal<T>(&self, command: &str, args: serde_json::Value, outcome: &Result<T>, started: Instant) {
        if let Some(logger) = &self.action_log {
            logger.record(command, args, outcome, started.elapsed());
        }
    }
}

impl<S: HistoryStore + 'static> std::fmt::Debug for NavigationController<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NavigationController")
            .field("current_node_id", &self.current_node_id)
            .field("undo_stack", &self.undo_stack)
            .field("redo_stack", &self.redo_stack)
            .field("nodes", &self.graph.len())
            .field("store", &self.writer.location())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action_log::read_entries;
    use crate::storage::MemoryStore;
    use crate::test_utils::{TestEnv, snapshot_at, tag_of};

    fn controller() -> NavigationController<MemoryStore> {
        NavigationController::new(MemoryStore::new(), NavigationConfig::default()).unwrap()
    }

    fn with_snapshots(tags: &[&str]) -> NavigationController<MemoryStore> {
        let mut nav = controller();
        for (i, tag) in tags.iter().enumerate() {
            nav.create_snapshot(snapshot_at(tag, i as i64), None).unwrap();
        }
        nav
    }

    #[test]
    fn test_config_validation() {
        let config = NavigationConfig {
            max_history_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            NavigationController::new(MemoryStore::new(), config),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_undo_redo_walks_the_stacks() {
        let mut nav = with_snapshots(&["s0", "s1", "s2"]);
        assert!(nav.can_undo());
        assert!(!nav.can_redo());

        assert_eq!(tag_of(&nav.undo().unwrap()), "s1");
        assert_eq!(tag_of(&nav.undo().unwrap()), "s0");
        assert!(matches!(nav.undo(), Err(Error::NoPreviousState)));
        assert_eq!(nav.redo_stack().len(), 2);

        assert_eq!(tag_of(&nav.redo().unwrap()), "s1");
        assert_eq!(tag_of(&nav.redo().unwrap()), "s2");
        assert!(matches!(nav.redo(), Err(Error::NoForwardState)));
    }

    #[test]
    fn test_new_snapshot_clears_redo() {
        let mut nav = with_snapshots(&["s0", "s1"]);
        nav.undo().unwrap();
        assert!(nav.can_redo());

        nav.create_snapshot(snapshot_at("s2", 5), None).unwrap();
        assert!(nav.redo_stack().is_empty());
        assert!(matches!(nav.redo(), Err(Error::NoForwardState)));

        // s2 forks from s0
        let s0 = nav.undo_stack()[0].clone();
        assert_eq!(nav.graph().node(&s0).unwrap().child_ids.len(), 2);
    }

    #[test]
    fn test_failed_undo_leaves_state_unchanged() {
        let mut nav = with_snapshots(&["only"]);
        let before = nav.view();
        assert!(nav.undo().is_err());
        assert_eq!(nav.view(), before);
    }

    #[test]
    fn test_navigate_back_along_path_keeps_redo() {
        let mut nav = with_snapshots(&["a", "b", "c", "d"]);
        let ids = nav.undo_stack().to_vec();

        assert_eq!(tag_of(&nav.navigate_to_node(&ids[1]).unwrap()), "b");
        assert_eq!(nav.undo_stack(), &ids[..2]);
        assert_eq!(nav.redo_stack(), &[ids[3].clone(), ids[2].clone()]);

        assert_eq!(tag_of(&nav.redo().unwrap()), "c");
        assert_eq!(tag_of(&nav.redo().unwrap()), "d");
    }

    #[test]
    fn test_navigate_off_path_clears_redo() {
        let mut nav = with_snapshots(&["a", "b"]);
        nav.undo().unwrap();
        nav.create_snapshot(snapshot_at("c", 9), None).unwrap();
        let c = nav.current_node_id().unwrap().to_string();
        let b = nav.graph().nodes().values().find(|n| tag_of(&n.snapshot) == "b").unwrap().id.clone();

        nav.navigate_to_node(&b).unwrap();
        assert!(nav.redo_stack().is_empty());
        assert_eq!(nav.undo_stack().len(), 2);

        nav.navigate_to_node(&c).unwrap();
        assert_eq!(nav.current_node_id(), Some(c.as_str()));
        assert!(matches!(
            nav.navigate_to_node("hn-deadbeef"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_branch_lifecycle() {
        let mut nav = with_snapshots(&["a", "b"]);
        let a = nav.undo_stack()[0].clone();

        let branch = nav.create_branch("explore", Some(&a)).unwrap();
        assert!(branch.is_active);
        assert_eq!(nav.current_node_id(), Some(a.as_str()));
        assert_eq!(nav.active_branch_id(), Some(branch.id.as_str()));

        nav.create_snapshot(snapshot_at("a2", 10), None).unwrap();
        let explore = nav.graph().branch(&branch.id).unwrap();
        assert_eq!(explore.node_ids.len(), 2);

        assert!(matches!(
            nav.delete_branch(&branch.id),
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(
            nav.create_branch("explore", None),
            Err(Error::Validation(_))
        ));

        let main = nav.create_branch("main", Some(&a)).unwrap();
        let snapshot = nav.switch_to_branch(&branch.id).unwrap();
        assert_eq!(tag_of(&snapshot), "a2");
        nav.delete_branch(&main.id).unwrap();
        assert!(nav.graph().branch(&main.id).is_none());
        assert!(matches!(nav.switch_to_branch(&main.id), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_create_branch_on_empty_history_fails() {
        let mut nav = controller();
        assert!(matches!(
            nav.create_branch("x", None),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_snapshot_with_branch_name_activates_it() {
        let mut nav = with_snapshots(&["a"]);
        nav.create_snapshot(snapshot_at("b", 1), Some("ideas")).unwrap();
        let active = nav.graph().active_branch().unwrap();
        assert_eq!(active.name, "ideas");
        assert_eq!(active.node_ids, vec![nav.current_node_id().unwrap().to_string()]);

        nav.create_snapshot(snapshot_at("c", 2), None).unwrap();
        assert_eq!(nav.graph().active_branch().unwrap().node_ids.len(), 2);

        // Stepping back before the branch leaves no branch holding the cursor
        nav.undo().unwrap();
        nav.undo().unwrap();
        assert_eq!(nav.active_branch_id(), None);
    }

    #[test]
    fn test_eviction_keeps_stacks_consistent() {
        let config = NavigationConfig {
            max_history_size: 3,
            ..Default::default()
        };
        let mut nav = NavigationController::new(MemoryStore::new(), config).unwrap();
        for i in 0..5 {
            nav.create_snapshot(snapshot_at(&format!("s{i}"), i), None).unwrap();
        }
        assert_eq!(nav.graph().len(), 3);
        assert_eq!(nav.undo_stack().len(), 3);
        for id in nav.undo_stack() {
            assert!(nav.graph().contains(id));
        }
        assert!(nav.graph().validate().is_valid);
        assert_eq!(tag_of(nav.current_snapshot().unwrap()), "s4");
    }

    #[test]
    fn test_export_import_round_trip() {
        let mut nav = with_snapshots(&["a", "b", "c"]);
        nav.undo().unwrap();
        let root = nav.undo_stack()[0].clone();
        nav.set_bookmarked(&root, true).unwrap();
        let blob = nav.export_state().unwrap();

        let mut other = controller();
        other.import_state(&blob).unwrap();
        assert_eq!(other.graph().nodes(), nav.graph().nodes());
        assert_eq!(other.current_node_id(), nav.current_node_id());
        assert_eq!(other.undo_stack(), nav.undo_stack());
        assert!(other.redo_stack().is_empty());
        assert_eq!(other.graph().bookmarked_nodes().len(), 1);
    }

    #[test]
    fn test_import_rejects_cycles_and_leaves_state() {
        let nav = with_snapshots(&["a", "b", "c"]);
        let mut state = nav.state();
        let ids = nav.undo_stack().to_vec();
        state
            .nodes
            .get_mut(&ids[2])
            .unwrap()
            .child_ids
            .push(ids[0].clone());
        let blob = serde_json::to_string(&HistoryExport::new(state)).unwrap();

        let mut target = with_snapshots(&["x"]);
        let before = target.state();
        assert!(matches!(
            target.import_state(&blob),
            Err(Error::CycleDetected(_))
        ));
        assert_eq!(target.state(), before);
    }

    #[test]
    fn test_import_rejects_bad_cursor_and_version() {
        let nav = with_snapshots(&["a"]);
        let mut state = nav.state();
        state.current_node_id = Some("hn-00000000".to_string());
        let blob = serde_json::to_string(&HistoryExport::new(state)).unwrap();
        let mut target = controller();
        assert!(matches!(target.import_state(&blob), Err(Error::Validation(_))));

        let mut export = HistoryExport::new(nav.state());
        export.format_version = EXPORT_FORMAT_VERSION + 1;
        let blob = serde_json::to_string(&export).unwrap();
        assert!(matches!(target.import_state(&blob), Err(Error::Validation(_))));
        assert!(matches!(target.import_state("{"), Err(Error::Json(_))));
    }

    #[test]
    fn test_persistence_failure_does_not_roll_back() {
        let mut nav =
            NavigationController::new(MemoryStore::failing(), NavigationConfig::default()).unwrap();
        nav.create_snapshot(snapshot_at("a", 0), None).unwrap();
        nav.create_snapshot(snapshot_at("b", 1), None).unwrap();
        assert_eq!(nav.graph().len(), 2);
        nav.flush();
        assert!(nav.persistence_failures() > 0);
        assert_eq!(tag_of(&nav.undo().unwrap()), "a");
    }

    #[test]
    fn test_close_and_open_restores_session() {
        let mut nav = with_snapshots(&["a", "b", "c"]);
        nav.undo().unwrap();
        let current = nav.current_node_id().unwrap().to_string();
        let store = nav.close().unwrap();

        let reopened = NavigationController::open(store, NavigationConfig::default()).unwrap();
        assert_eq!(reopened.current_node_id(), Some(current.as_str()));
        assert_eq!(reopened.undo_stack().len(), 2);
        assert!(reopened.redo_stack().is_empty());
    }

    #[test]
    fn test_failed_node_write_keeps_stored_session_openable() {
        let store = MemoryStore::new();
        let switch = store.write_switch();
        let mut nav = NavigationController::new(store, NavigationConfig::default()).unwrap();
        nav.create_snapshot(snapshot_at("a", 0), None).unwrap();
        let a = nav.current_node_id().unwrap().to_string();
        nav.flush();

        switch.set_fail_writes(true);
        nav.create_snapshot(snapshot_at("b", 1), None).unwrap();
        nav.flush();
        assert!(nav.persistence_failures() > 0);
        let store = nav.close().unwrap();

        // The stored cursor still points at a node the store holds
        let reopened = NavigationController::open(store, NavigationConfig::default()).unwrap();
        assert_eq!(reopened.current_node_id(), Some(a.as_str()));
        assert_eq!(reopened.graph().len(), 1);
    }

    #[test]
    fn test_pinned_nodes_survive_eviction() {
        let config = NavigationConfig {
            max_history_size: 2,
            ..Default::default()
        };
        let mut nav = NavigationController::new(MemoryStore::new(), config).unwrap();
        nav.create_snapshot(snapshot_at("root", 0), None).unwrap();
        let root = nav.current_node_id().unwrap().to_string();
        nav.pin_node(&root).unwrap();
        assert!(nav.is_pinned(&root));

        for i in 1..4 {
            nav.create_snapshot(snapshot_at(&format!("s{i}"), i), None).unwrap();
        }
        assert!(nav.graph().contains(&root));
        assert_eq!(nav.graph().len(), 2);

        assert!(nav.unpin_node(&root));
        nav.create_snapshot(snapshot_at("s4", 4), None).unwrap();
        assert!(!nav.graph().contains(&root));
        assert!(matches!(nav.pin_node(&root), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_delete_node_refuses_current() {
        let mut nav = with_snapshots(&["a", "b"]);
        let current = nav.current_node_id().unwrap().to_string();
        assert!(matches!(
            nav.delete_node(&current),
            Err(Error::InvalidState(_))
        ));
        nav.undo().unwrap();
        nav.delete_node(&current).unwrap();
        assert!(!nav.can_redo());
    }

    #[test]
    fn test_subscribers_see_each_commit() {
        let mut nav = controller();
        let mut rx = nav.subscribe();
        nav.create_snapshot(snapshot_at("a", 0), None).unwrap();
        nav.create_snapshot(snapshot_at("b", 1), None).unwrap();

        let view = rx.borrow_and_update().clone();
        assert_eq!(view.revision, 2);
        assert_eq!(view.node_count, 2);
        assert!(view.can_undo);
        assert_eq!(tag_of(view.current_snapshot.as_ref().unwrap()), "b");

        let _ = nav.redo();
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_apply_command_dispatches() {
        let mut nav = with_snapshots(&["a", "b"]);
        assert_eq!(nav.apply_command(NavigationCommand::None).unwrap(), None);
        let back = nav.apply_command(NavigationCommand::Undo).unwrap().unwrap();
        assert_eq!(tag_of(&back), "a");
        let forward = nav.apply_command(NavigationCommand::Redo).unwrap().unwrap();
        assert_eq!(tag_of(&forward), "b");
    }

    #[test]
    fn test_commands_are_journaled() {
        let env = TestEnv::new();
        let log_path = env.data_path().join("action.log");
        let mut nav = controller().with_action_log(ActionLogger::new(&log_path, "canvas-7"));

        nav.create_snapshot(snapshot_at("a", 0), None).unwrap();
        let _ = nav.undo();

        let entries = read_entries(&log_path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].command, "create_snapshot");
        assert_eq!(entries[0].args["layers"], 1);
        assert!(!entries[1].success);
        assert_eq!(entries[1].session, "canvas-7");
    }
}
