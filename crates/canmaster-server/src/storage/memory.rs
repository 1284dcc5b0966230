#![allow(clippy::disallowed_types, reason = "synchronous in-memory operations only")]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use canmaster_core::model::{AuditEntry, Definition, HistorySnapshot, Node, NodeId};

use super::{Storage, StorageError};

/// In-memory storage for tests and the `LoopbackBusPort` scenarios.
///
/// All state lives behind an `Arc<Mutex<..>>` so the type stays cheaply
/// `Clone`. Uses `lock().expect()`, which panics if the mutex is poisoned —
/// acceptable for test code, never used in the production `RedbStorage`.
#[derive(Clone)]
pub struct MemoryStorage {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    nodes: HashMap<String, Node>,
    history: Vec<HistorySnapshot>,
    audit: Vec<AuditEntry>,
    comments: HashMap<u64, String>,
    definitions: Vec<Definition>,
    next_history_id: u64,
    next_audit_id: u64,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    /// An empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                nodes: HashMap::new(),
                history: Vec::new(),
                audit: Vec::new(),
                comments: HashMap::new(),
                definitions: Vec::new(),
                next_history_id: 1,
                next_audit_id: 1,
            })),
        }
    }

    /// Number of history rows recorded so far. Useful in tests that assert
    /// the CRC-drift snapshot law fired exactly once.
    #[allow(clippy::missing_panics_doc)]
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.inner.lock().expect("mutex poisoned").history.len()
    }
}

impl Storage for MemoryStorage {
    fn commit_node_intro(
        &self,
        node: &Node,
        drift_snapshot: Option<&HistorySnapshot>,
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().expect("mutex poisoned");
        if let Some(snap) = drift_snapshot {
            let mut snap = snap.clone();
            snap.history_id = inner.next_history_id;
            inner.next_history_id += 1;
            inner.history.push(snap);
        }
        inner.nodes.insert(node.node_id.hex(), node.clone());
        Ok(())
    }

    fn commit_config_write(
        &self,
        node: &Node,
        history: &HistorySnapshot,
        audit_entries: &[AuditEntry],
    ) -> Result<Vec<u64>, StorageError> {
        let mut inner = self.inner.lock().expect("mutex poisoned");

        let mut snap = history.clone();
        snap.history_id = inner.next_history_id;
        inner.next_history_id += 1;
        inner.history.push(snap);

        let mut ids = Vec::with_capacity(audit_entries.len());
        for entry in audit_entries {
            let mut entry = entry.clone();
            entry.audit_id = inner.next_audit_id;
            inner.next_audit_id += 1;
            ids.push(entry.audit_id);
            inner.audit.push(entry);
        }

        inner.nodes.insert(node.node_id.hex(), node.clone());
        Ok(ids)
    }

    fn remove_node(&self, id: &NodeId) -> Result<(), StorageError> {
        self.inner.lock().expect("mutex poisoned").nodes.remove(&id.hex());
        Ok(())
    }

    fn load_all_nodes(&self) -> Result<Vec<Node>, StorageError> {
        Ok(self.inner.lock().expect("mutex poisoned").nodes.values().cloned().collect())
    }

    fn upsert_comment(&self, audit_id: u64, comment: &str) -> Result<(), StorageError> {
        self.inner.lock().expect("mutex poisoned").comments.insert(audit_id, comment.to_string());
        Ok(())
    }

    fn recent_audit_with_comments(&self, limit: usize) -> Result<Vec<AuditEntry>, StorageError> {
        let inner = self.inner.lock().expect("mutex poisoned");
        let mut rows: Vec<AuditEntry> = inner
            .audit
            .iter()
            .rev()
            .take(limit)
            .map(|entry| {
                let mut entry = entry.clone();
                entry.comment = inner.comments.get(&entry.audit_id).cloned();
                entry
            })
            .collect();
        rows.reverse();
        Ok(rows)
    }

    fn replace_definitions(&self, definitions: &[Definition]) -> Result<(), StorageError> {
        self.inner.lock().expect("mutex poisoned").definitions = definitions.to_vec();
        Ok(())
    }

    fn load_definitions(&self) -> Result<Vec<Definition>, StorageError> {
        Ok(self.inner.lock().expect("mutex poisoned").definitions.clone())
    }
}
