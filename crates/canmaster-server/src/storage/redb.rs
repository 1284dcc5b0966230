//! Redb-backed durable storage implementation.
//!
//! Uses redb's ACID transactions with copy-on-write for crash safety. All
//! five tables (`node_inventory`, `node_history`, `audit_log`,
//! `config_comments`, `message_definitions`) live in one database file so a
//! single write transaction can touch several of them atomically.

use std::path::Path;
use std::sync::Arc;

use canmaster_core::model::{AuditEntry, Definition, HistorySnapshot, Node, NodeId};
use redb::{Database, ReadableTable, TableDefinition};

use super::{Storage, StorageError};

const NODE_INVENTORY: TableDefinition<&str, &[u8]> = TableDefinition::new("node_inventory");
const NODE_HISTORY: TableDefinition<u64, &[u8]> = TableDefinition::new("node_history");
const AUDIT_LOG: TableDefinition<u64, &[u8]> = TableDefinition::new("audit_log");
const CONFIG_COMMENTS: TableDefinition<u64, &str> = TableDefinition::new("config_comments");
const MESSAGE_DEFINITIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("message_definitions");
/// Single-row counters table: `next_history_id`, `next_audit_id`.
const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");

fn cbor_encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| StorageError::Serialization(e.to_string()))?;
    Ok(buf)
}

fn cbor_decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    ciborium::from_reader(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// Durable storage backed by redb.
///
/// Thread-safe through redb's internal locking; `Clone` is cheap (`Arc`).
#[derive(Clone)]
pub struct RedbStorage {
    db: Arc<Database>,
}

impl RedbStorage {
    /// Open or create a redb database at `path`, creating every table (and
    /// the counters row) if they don't already exist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Database`] if the file cannot be opened or
    /// the initial tables cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref()).map_err(|e| StorageError::Database(e.to_string()))?;

        let txn = db.begin_write().map_err(|e| StorageError::Database(e.to_string()))?;
        {
            let _ = txn.open_table(NODE_INVENTORY).map_err(|e| StorageError::Database(e.to_string()))?;
            let _ = txn.open_table(NODE_HISTORY).map_err(|e| StorageError::Database(e.to_string()))?;
            let _ = txn.open_table(AUDIT_LOG).map_err(|e| StorageError::Database(e.to_string()))?;
            let _ = txn.open_table(CONFIG_COMMENTS).map_err(|e| StorageError::Database(e.to_string()))?;
            let _ = txn
                .open_table(MESSAGE_DEFINITIONS)
                .map_err(|e| StorageError::Database(e.to_string()))?;

            let mut counters = txn.open_table(COUNTERS).map_err(|e| StorageError::Database(e.to_string()))?;
            if counters.get("next_history_id").map_err(|e| StorageError::Database(e.to_string()))?.is_none() {
                counters.insert("next_history_id", 1u64).map_err(|e| StorageError::Database(e.to_string()))?;
            }
            if counters.get("next_audit_id").map_err(|e| StorageError::Database(e.to_string()))?.is_none() {
                counters.insert("next_audit_id", 1u64).map_err(|e| StorageError::Database(e.to_string()))?;
            }
        }
        txn.commit().map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }

    fn next_id(
        counters: &mut redb::Table<'_, &str, u64>,
        key: &str,
    ) -> Result<u64, StorageError> {
        let current = counters
            .get(key)
            .map_err(|e| StorageError::Database(e.to_string()))?
            .map(|v| v.value())
            .unwrap_or(1);
        counters.insert(key, current + 1).map_err(|e| StorageError::Database(e.to_string()))?;
        Ok(current)
    }
}

impl Storage for RedbStorage {
    fn commit_node_intro(
        &self,
        node: &Node,
        drift_snapshot: Option<&HistorySnapshot>,
    ) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(|e| StorageError::Database(e.to_string()))?;
        {
            if let Some(snapshot) = drift_snapshot {
                let mut counters =
                    txn.open_table(COUNTERS).map_err(|e| StorageError::Database(e.to_string()))?;
                let id = Self::next_id(&mut counters, "next_history_id")?;
                let mut snapshot = snapshot.clone();
                snapshot.history_id = id;

                let mut history =
                    txn.open_table(NODE_HISTORY).map_err(|e| StorageError::Database(e.to_string()))?;
                history
                    .insert(id, cbor_encode(&snapshot)?.as_slice())
                    .map_err(|e| StorageError::Database(e.to_string()))?;
            }

            let mut inventory =
                txn.open_table(NODE_INVENTORY).map_err(|e| StorageError::Database(e.to_string()))?;
            inventory
                .insert(node.node_id.hex().as_str(), cbor_encode(node)?.as_slice())
                .map_err(|e| StorageError::Database(e.to_string()))?;
        }
        txn.commit().map_err(|e| StorageError::Database(e.to_string()))?;
        Ok(())
    }

    fn commit_config_write(
        &self,
        node: &Node,
        history: &HistorySnapshot,
        audit_entries: &[AuditEntry],
    ) -> Result<Vec<u64>, StorageError> {
        let txn = self.db.begin_write().map_err(|e| StorageError::Database(e.to_string()))?;
        let mut assigned_ids = Vec::with_capacity(audit_entries.len());
        {
            let mut counters = txn.open_table(COUNTERS).map_err(|e| StorageError::Database(e.to_string()))?;

            let history_id = Self::next_id(&mut counters, "next_history_id")?;
            let mut history = history.clone();
            history.history_id = history_id;
            let mut history_table =
                txn.open_table(NODE_HISTORY).map_err(|e| StorageError::Database(e.to_string()))?;
            history_table
                .insert(history_id, cbor_encode(&history)?.as_slice())
                .map_err(|e| StorageError::Database(e.to_string()))?;

            let mut audit_table =
                txn.open_table(AUDIT_LOG).map_err(|e| StorageError::Database(e.to_string()))?;
            for entry in audit_entries {
                let id = Self::next_id(&mut counters, "next_audit_id")?;
                let mut entry = entry.clone();
                entry.audit_id = id;
                audit_table
                    .insert(id, cbor_encode(&entry)?.as_slice())
                    .map_err(|e| StorageError::Database(e.to_string()))?;
                assigned_ids.push(id);
            }

            let mut inventory =
                txn.open_table(NODE_INVENTORY).map_err(|e| StorageError::Database(e.to_string()))?;
            inventory
                .insert(node.node_id.hex().as_str(), cbor_encode(node)?.as_slice())
                .map_err(|e| StorageError::Database(e.to_string()))?;
        }
        txn.commit().map_err(|e| StorageError::Database(e.to_string()))?;
        Ok(assigned_ids)
    }

    fn remove_node(&self, id: &NodeId) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(|e| StorageError::Database(e.to_string()))?;
        {
            let mut inventory =
                txn.open_table(NODE_INVENTORY).map_err(|e| StorageError::Database(e.to_string()))?;
            inventory.remove(id.hex().as_str()).map_err(|e| StorageError::Database(e.to_string()))?;
        }
        txn.commit().map_err(|e| StorageError::Database(e.to_string()))?;
        Ok(())
    }

    fn load_all_nodes(&self) -> Result<Vec<Node>, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Database(e.to_string()))?;
        let table = txn.open_table(NODE_INVENTORY).map_err(|e| StorageError::Database(e.to_string()))?;
        let mut nodes = Vec::new();
        for result in table.iter().map_err(|e| StorageError::Database(e.to_string()))? {
            let (_, value) = result.map_err(|e| StorageError::Database(e.to_string()))?;
            nodes.push(cbor_decode(value.value())?);
        }
        Ok(nodes)
    }

    fn upsert_comment(&self, audit_id: u64, comment: &str) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(|e| StorageError::Database(e.to_string()))?;
        {
            let mut table =
                txn.open_table(CONFIG_COMMENTS).map_err(|e| StorageError::Database(e.to_string()))?;
            table.insert(audit_id, comment).map_err(|e| StorageError::Database(e.to_string()))?;
        }
        txn.commit().map_err(|e| StorageError::Database(e.to_string()))?;
        Ok(())
    }

    fn recent_audit_with_comments(&self, limit: usize) -> Result<Vec<AuditEntry>, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Database(e.to_string()))?;
        let audit_table = txn.open_table(AUDIT_LOG).map_err(|e| StorageError::Database(e.to_string()))?;
        let comments_table =
            txn.open_table(CONFIG_COMMENTS).map_err(|e| StorageError::Database(e.to_string()))?;

        let mut rows = Vec::with_capacity(limit);
        for result in audit_table.iter().map_err(|e| StorageError::Database(e.to_string()))?.rev().take(limit) {
            let (key, value) = result.map_err(|e| StorageError::Database(e.to_string()))?;
            let mut entry: AuditEntry = cbor_decode(value.value())?;
            entry.comment = comments_table
                .get(key.value())
                .map_err(|e| StorageError::Database(e.to_string()))?
                .map(|v| v.value().to_string());
            rows.push(entry);
        }
        rows.reverse();
        Ok(rows)
    }

    fn replace_definitions(&self, definitions: &[Definition]) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(|e| StorageError::Database(e.to_string()))?;
        {
            let mut table = txn
                .open_table(MESSAGE_DEFINITIONS)
                .map_err(|e| StorageError::Database(e.to_string()))?;
            for definition in definitions {
                table
                    .insert(definition.id_hex.as_str(), cbor_encode(definition)?.as_slice())
                    .map_err(|e| StorageError::Database(e.to_string()))?;
            }
        }
        txn.commit().map_err(|e| StorageError::Database(e.to_string()))?;
        Ok(())
    }

    fn load_definitions(&self) -> Result<Vec<Definition>, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Database(e.to_string()))?;
        let table =
            txn.open_table(MESSAGE_DEFINITIONS).map_err(|e| StorageError::Database(e.to_string()))?;
        let mut definitions = Vec::new();
        for result in table.iter().map_err(|e| StorageError::Database(e.to_string()))? {
            let (_, value) = result.map_err(|e| StorageError::Database(e.to_string()))?;
            definitions.push(cbor_decode(value.value())?);
        }
        Ok(definitions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_storage() -> (tempfile::TempDir, RedbStorage) {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = RedbStorage::open(dir.path().join("canmaster.redb")).expect("open");
        (dir, storage)
    }

    fn node(id: [u8; 4]) -> Node {
        Node::new(NodeId::new(id), 0x780, 0)
    }

    #[test]
    fn commit_node_intro_persists_and_survives_reopen() {
        let (dir, storage) = temp_storage();
        storage.commit_node_intro(&node([1, 0, 0, 0]), None).unwrap();
        drop(storage);

        let reopened = RedbStorage::open(dir.path().join("canmaster.redb")).unwrap();
        let nodes = reopened.load_all_nodes().unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].node_id.hex(), "01000000");
    }

    #[test]
    fn crc_drift_snapshot_law_one_history_row_per_drift() {
        let (_dir, storage) = temp_storage();
        let n = node([1, 0, 0, 0]);
        storage.commit_node_intro(&n, None).unwrap();

        let snapshot = HistorySnapshot {
            history_id: 0,
            node_id: n.node_id,
            node_type_msg: n.node_type_msg,
            sub_mod_cnt: n.sub_mod_cnt,
            config_crc: Some(0x0012),
            recorded_at: 0,
            full_data: Default::default(),
        };
        storage.commit_node_intro(&n, Some(&snapshot)).unwrap();

        let txn = storage.db.begin_read().unwrap();
        let table = txn.open_table(NODE_HISTORY).unwrap();
        assert_eq!(table.iter().unwrap().count(), 1);
    }

    #[test]
    fn commit_config_write_assigns_unique_audit_ids_across_transactions() {
        let (_dir, storage) = temp_storage();
        let n = node([1, 0, 0, 0]);
        let history = HistorySnapshot {
            history_id: 0,
            node_id: n.node_id,
            node_type_msg: n.node_type_msg,
            sub_mod_cnt: n.sub_mod_cnt,
            config_crc: n.config_crc,
            recorded_at: 0,
            full_data: Default::default(),
        };
        let entry = AuditEntry {
            audit_id: 0,
            timestamp_ms: 0,
            node_id: n.node_id,
            sub_idx: None,
            field: "dataMsgId".into(),
            old_value: serde_json::Value::Null,
            new_value: serde_json::Value::Null,
            comment: None,
        };

        let first = storage.commit_config_write(&n, &history, std::slice::from_ref(&entry)).unwrap();
        let second = storage.commit_config_write(&n, &history, std::slice::from_ref(&entry)).unwrap();
        assert_eq!(first, vec![1]);
        assert_eq!(second, vec![2]);
    }

    #[test]
    fn recent_audit_with_comments_joins_and_orders_chronologically() {
        let (_dir, storage) = temp_storage();
        let n = node([1, 0, 0, 0]);
        let history = HistorySnapshot {
            history_id: 0,
            node_id: n.node_id,
            node_type_msg: n.node_type_msg,
            sub_mod_cnt: n.sub_mod_cnt,
            config_crc: n.config_crc,
            recorded_at: 0,
            full_data: Default::default(),
        };
        for field in ["a", "b"] {
            let entry = AuditEntry {
                audit_id: 0,
                timestamp_ms: 0,
                node_id: n.node_id,
                sub_idx: None,
                field: field.into(),
                old_value: serde_json::Value::Null,
                new_value: serde_json::Value::Null,
                comment: None,
            };
            storage.commit_config_write(&n, &history, std::slice::from_ref(&entry)).unwrap();
        }
        storage.upsert_comment(1, "reviewed").unwrap();

        let rows = storage.recent_audit_with_comments(10).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].comment.as_deref(), Some("reviewed"));
        assert_eq!(rows[1].comment, None);
    }

    #[test]
    fn remove_node_drops_inventory_row_only() {
        let (_dir, storage) = temp_storage();
        let n = node([1, 0, 0, 0]);
        storage.commit_node_intro(&n, None).unwrap();
        storage.remove_node(&n.node_id).unwrap();
        assert!(storage.load_all_nodes().unwrap().is_empty());
    }

    #[test]
    fn definitions_round_trip() {
        let (_dir, storage) = temp_storage();
        let def = Definition {
            id_dec: 0x780,
            id_hex: "0x780".to_string(),
            name: "NODE_INTRO".to_string(),
            dlc: 8,
            category: "intro".to_string(),
            description: "node introduction".to_string(),
        };
        storage.replace_definitions(std::slice::from_ref(&def)).unwrap();
        let loaded = storage.load_definitions().unwrap();
        assert_eq!(loaded, vec![def]);
    }
}
