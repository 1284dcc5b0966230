//! In-memory authoritative state: a single-writer map of `NodeId` → `Node`.
//!
//! Owned exclusively by the engine task (see the crate-level docs on the
//! concurrency model); no internal locking. Concurrent access is prevented
//! structurally, not by synchronization primitives.

use std::collections::HashMap;

use crate::model::{Node, NodeId};

/// The authoritative node/sub-module inventory.
#[derive(Debug, Default)]
pub struct Inventory {
    nodes: HashMap<String, Node>,
}

impl Inventory {
    /// An empty inventory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a node, creating it (with `node_type_msg` and `now` as its
    /// initial values) if it isn't present. Returns a mutable reference so
    /// callers can finish populating the fresh or existing node in place.
    pub fn get_or_create(&mut self, id: NodeId, node_type_msg: u16, now: u64) -> &mut Node {
        self.nodes
            .entry(id.hex())
            .or_insert_with(|| Node::new(id, node_type_msg, now))
    }

    /// Read-only lookup.
    #[must_use]
    pub fn get_node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(&id.hex())
    }

    /// Mutable lookup, for the Config Writer's in-place edits.
    pub fn get_node_mut(&mut self, id: &NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id.hex())
    }

    /// Clear a node's sub-module map and reset its interview progress,
    /// ahead of re-running its interview. No-op (returns `None`) if the
    /// node is unknown.
    pub fn reset_node_interview_state(&mut self, id: &NodeId) -> Option<()> {
        let node = self.nodes.get_mut(&id.hex())?;
        node.sub_module = Default::default();
        node.last_sub_mod_idx = 0;
        node.intro_complete = false;
        Some(())
    }

    /// Delete a node's inventory row entirely (operator-initiated erase).
    /// History rows referencing it are untouched.
    pub fn remove(&mut self, id: &NodeId) -> Option<Node> {
        self.nodes.remove(&id.hex())
    }

    /// A deep copy of every node, for broadcast to operators.
    #[must_use]
    pub fn snapshot_all(&self) -> Vec<Node> {
        let mut nodes: Vec<Node> = self.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.node_id.hex().cmp(&b.node_id.hex()));
        nodes
    }

    /// Number of nodes currently tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the inventory is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(b: u8) -> NodeId {
        NodeId::new([0, 0, 0, b])
    }

    #[test]
    fn get_or_create_creates_once() {
        let mut inv = Inventory::new();
        let node = inv.get_or_create(id(1), 0x781, 100);
        assert_eq!(node.first_seen, 100);
        node.last_seen = 200;

        let again = inv.get_or_create(id(1), 0x781, 999);
        assert_eq!(again.first_seen, 100, "existing node is not reinitialized");
        assert_eq!(again.last_seen, 200);
        assert_eq!(inv.len(), 1);
    }

    #[test]
    fn reset_interview_state_clears_sub_modules() {
        let mut inv = Inventory::new();
        let node = inv.get_or_create(id(1), 0x781, 0);
        node.sub_module[0] = Some(crate::model::SubModule::new(0, 0x700, 0));
        node.last_sub_mod_idx = 3;
        node.intro_complete = true;

        inv.reset_node_interview_state(&id(1)).expect("node exists");
        let node = inv.get_node(&id(1)).unwrap();
        assert!(node.sub_module.iter().all(Option::is_none));
        assert_eq!(node.last_sub_mod_idx, 0);
        assert!(!node.intro_complete);
    }

    #[test]
    fn reset_interview_state_on_unknown_node_is_noop() {
        let mut inv = Inventory::new();
        assert!(inv.reset_node_interview_state(&id(9)).is_none());
    }

    #[test]
    fn snapshot_all_is_sorted_and_independent() {
        let mut inv = Inventory::new();
        inv.get_or_create(id(2), 0x781, 0);
        inv.get_or_create(id(1), 0x781, 0);

        let snap = inv.snapshot_all();
        assert_eq!(snap.len(), 2);
        assert!(snap[0].node_id.hex() < snap[1].node_id.hex());

        inv.get_or_create(id(1), 0x781, 0).last_seen = 500;
        assert_eq!(snap[0].last_seen, 0, "snapshot is a deep copy");
    }

    #[test]
    fn remove_drops_the_row() {
        let mut inv = Inventory::new();
        inv.get_or_create(id(1), 0x781, 0);
        assert!(inv.remove(&id(1)).is_some());
        assert!(inv.get_node(&id(1)).is_none());
        assert!(inv.remove(&id(1)).is_none());
    }
}
