//! Background thread that owns a [`HistoryStore`] and applies writes to it.
//!
//! The navigation controller hands every committed change to
//! [`StoreWriter::send`], which never blocks on the store. Updates that pile
//! up before the thread gets to them are coalesced: each part (nodes,
//! branches, cursor) is a full replacement, so only the newest copy of each
//! is written.
//!
//! Within one batch parts are written in dependency order, nodes first, and
//! the batch stops at the first failure. A cursor is therefore never stored
//! ahead of the nodes it points at. Parts that failed or were skipped stay
//! pending and are retried with the next batch.

use super::backend::{BackendType, Cursor, HistoryStore};
use crate::models::{HistoryBranch, HistoryNode};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

/// Replacement contents for some or all of a store.
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub nodes: Option<HashMap<String, HistoryNode>>,
    pub branches: Option<HashMap<String, HistoryBranch>>,
    pub cursor: Option<Cursor>,
}

impl StateUpdate {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_none() && self.branches.is_none() && self.cursor.is_none()
    }

    /// Fold a later update into this one; newer parts win.
    pub fn merge(&mut self, newer: StateUpdate) {
        if newer.nodes.is_some() {
            self.nodes = newer.nodes;
        }
        if newer.branches.is_some() {
            self.branches = newer.branches;
        }
        if newer.cursor.is_some() {
            self.cursor = newer.cursor;
        }
    }
}

#[derive(Debug)]
enum WriteMsg {
    Update(StateUpdate),
    /// Answered once everything received before it has been attempted
    Flush(mpsc::Sender<()>),
    Shutdown,
}

/// Handle to the writer thread. Dropping it drains pending writes.
pub struct StoreWriter<S: HistoryStore + 'static> {
    sender: mpsc::Sender<WriteMsg>,
    handle: Option<JoinHandle<S>>,
    failures: Arc<AtomicU64>,
    location: String,
    backend: BackendType,
}

impl<S: HistoryStore + 'static> StoreWriter<S> {
    /// Move `store` onto a new writer thread.
    pub fn start(store: S) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<WriteMsg>();
        let failures = Arc::new(AtomicU64::new(0));
        let location = store.location();
        let backend = store.backend_type();

        let thread_failures = Arc::clone(&failures);
        let handle = thread::Builder::new()
            .name("canvas-history-writer".into())
            .spawn(move || write_loop(store, rx, thread_failures))?;

        Ok(Self {
            sender: tx,
            handle: Some(handle),
            failures,
            location,
            backend,
        })
    }

    /// Queue `update` for writing. Returns immediately.
    pub fn send(&self, update: StateUpdate) {
        if update.is_empty() {
            return;
        }
        if self.sender.send(WriteMsg::Update(update)).is_err() {
            self.failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(location = %self.location, "History writer is gone; dropping update");
        }
    }

    /// Block until every update sent so far has been attempted.
    pub fn flush(&self) {
        let (reply_tx, reply_rx) = mpsc::channel();
        if self.sender.send(WriteMsg::Flush(reply_tx)).is_ok() {
            let _ = reply_rx.recv();
        }
    }

    /// Store writes that failed so far.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn backend_type(&self) -> BackendType {
        self.backend
    }

    /// Drain pending writes, stop the thread and take the store back.
    pub fn finish(&mut self) -> Result<S> {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| Error::InvalidState("history writer already stopped".to_string()))?;
        let _ = self.sender.send(WriteMsg::Shutdown);
        handle
            .join()
            .map_err(|_| Error::Persistence(format!("history writer for {} panicked", self.location)))
    }
}

impl<S: HistoryStore + 'static> Drop for StoreWriter<S> {
    fn drop(&mut self) {
        let _ = self.sender.send(WriteMsg::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn write_loop<S: HistoryStore>(
    mut store: S,
    rx: mpsc::Receiver<WriteMsg>,
    failures: Arc<AtomicU64>,
) -> S {
    let mut pending = StateUpdate::default();
    loop {
        // All senders gone means the handle was dropped without a shutdown
        let Ok(first) = rx.recv() else {
            write_pending(&mut store, &mut pending, &failures);
            return store;
        };

        let mut waiters = Vec::new();
        let mut shutdown = false;
        for msg in std::iter::once(first).chain(rx.try_iter()) {
            match msg {
                WriteMsg::Update(update) => pending.merge(update),
                WriteMsg::Flush(reply) => waiters.push(reply),
                WriteMsg::Shutdown => {
                    shutdown = true;
                    break;
                }
            }
        }

        write_pending(&mut store, &mut pending, &failures);
        for reply in waiters {
            let _ = reply.send(());
        }
        if shutdown {
            return store;
        }
    }
}

fn write_pending<S: HistoryStore>(store: &mut S, pending: &mut StateUpdate, failures: &AtomicU64) {
    if let Some(nodes) = &pending.nodes {
        if let Err(e) = store.save_nodes(nodes) {
            report(store, "nodes", &e, failures);
            return;
        }
        pending.nodes = None;
    }
    if let Some(branches) = &pending.branches {
        if let Err(e) = store.save_branches(branches) {
            report(store, "branches", &e, failures);
            return;
        }
        pending.branches = None;
    }
    if let Some(cursor) = &pending.cursor {
        if let Err(e) = store.save_cursor(cursor) {
            report(store, "cursor", &e, failures);
            return;
        }
        pending.cursor = None;
    }
}

fn report<S: HistoryStore>(store: &S, what: &'static str, error: &Error, failures: &AtomicU64) {
    failures.fetch_add(1, Ordering::Relaxed);
    tracing::warn!(
        what,
        location = %store.location(),
        error = %error,
        "Failed to persist history; keeping in-memory state"
    );
}
