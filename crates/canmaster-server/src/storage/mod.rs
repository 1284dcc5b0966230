//! Persistence Layer (C4): durable mirrors of the inventory, append-only
//! history and audit trails, operator comments, and the ingested
//! definition table.
//!
//! Every method is synchronous — the persistence layer is accessed
//! directly from the engine task as a short blocking call (§5), not
//! dispatched as an async action.

pub mod error;
pub mod memory;
pub mod redb;

pub use error::StorageError;
pub use memory::MemoryStorage;
pub use redb::RedbStorage;

use canmaster_core::model::{AuditEntry, Definition, HistorySnapshot, Node, NodeId};

/// Durable backing store for the inventory, history, audit, comments, and
/// definition tables.
pub trait Storage: Clone + Send + Sync + 'static {
    /// Upsert a node row, and — iff CRC drift was detected — insert one
    /// history row capturing the *prior* state, in a single transaction.
    fn commit_node_intro(
        &self,
        node: &Node,
        drift_snapshot: Option<&HistorySnapshot>,
    ) -> Result<(), StorageError>;

    /// Upsert a node row, insert one history row capturing the *post-write*
    /// state, and append the given audit entries, all in a single
    /// transaction. Returns the audit IDs assigned, in the same order as
    /// `audit_entries`.
    fn commit_config_write(
        &self,
        node: &Node,
        history: &HistorySnapshot,
        audit_entries: &[AuditEntry],
    ) -> Result<Vec<u64>, StorageError>;

    /// Delete a node's inventory row. History and audit rows referencing it
    /// are left untouched.
    fn remove_node(&self, id: &NodeId) -> Result<(), StorageError>;

    /// Load every node row, for restoring the in-memory inventory at
    /// startup.
    fn load_all_nodes(&self) -> Result<Vec<Node>, StorageError>;

    /// Upsert a free-text comment on an existing audit row.
    fn upsert_comment(&self, audit_id: u64, comment: &str) -> Result<(), StorageError>;

    /// The most recent `limit` audit rows, most recent first, each with its
    /// comment populated if one exists.
    fn recent_audit_with_comments(&self, limit: usize) -> Result<Vec<AuditEntry>, StorageError>;

    /// Replace the definition table in a single transaction.
    fn replace_definitions(&self, definitions: &[Definition]) -> Result<(), StorageError>;

    /// The full definition table.
    fn load_definitions(&self) -> Result<Vec<Definition>, StorageError>;
}
