//! Converts operator-intent payloads into outbound CAN frames, applies the
//! diff to the in-memory node, and produces the audit/history records the
//! caller must persist in a single transaction alongside the upsert.

use canmaster_proto::codec::split_be16;
use canmaster_proto::gateway::UpdateNodeConfigPayload;
use canmaster_proto::Frame;

use crate::error::EngineError;
use crate::ids::{CFG_SUB_DATA_MSG_ID, CFG_SUB_RAW_DATA_ID};
use crate::inventory::Inventory;
use crate::model::{AuditEntry, HistorySnapshot, Node, NodeId, SubModule};

/// Everything that resulted from applying one `UPDATE_NODE_CONFIG`.
///
/// `audit_entries.is_empty()` iff the request was a no-op: per §4.5, a
/// request matching current state produces no frames, no audit rows, no
/// history row, and no ACK.
#[derive(Debug, Clone)]
pub struct ConfigWriteOutcome {
    pub node: Node,
    pub frames: Vec<Frame>,
    pub audit_entries: Vec<AuditEntry>,
    pub history: Option<HistorySnapshot>,
}

#[allow(clippy::unwrap_used)] // both constants are in range; payloads are always 8 bytes
fn build_cfg_sub_data_msg_id(node_id: NodeId, sub_mod_idx: u8, data_msg_id: u16, dlc: u8) -> Frame {
    let id = node_id.bytes();
    let (hi, lo) = split_be16(data_msg_id);
    Frame::new(CFG_SUB_DATA_MSG_ID, vec![id[0], id[1], id[2], id[3], sub_mod_idx, hi, lo, dlc]).unwrap()
}

#[allow(clippy::unwrap_used)]
fn build_cfg_sub_raw_data(node_id: NodeId, sub_mod_idx: u8, raw_config: [u8; 3]) -> Frame {
    let id = node_id.bytes();
    Frame::new(
        CFG_SUB_RAW_DATA_ID,
        vec![id[0], id[1], id[2], id[3], sub_mod_idx, raw_config[0], raw_config[1], raw_config[2]],
    )
    .unwrap()
}

fn diff_entry<T: serde::Serialize>(
    node_id: NodeId,
    sub_idx: Option<u8>,
    field: &str,
    old: T,
    new: T,
    now: u64,
) -> AuditEntry {
    AuditEntry {
        audit_id: 0, // assigned by the persistence layer on insert
        timestamp_ms: now,
        node_id,
        sub_idx,
        field: field.to_string(),
        old_value: serde_json::to_value(old).unwrap_or(serde_json::Value::Null),
        new_value: serde_json::to_value(new).unwrap_or(serde_json::Value::Null),
        comment: None,
    }
}

/// Apply an `UPDATE_NODE_CONFIG` request to the inventory.
///
/// # Errors
///
/// - [`EngineError::UnknownNodeOnUpdate`] if `node_id` isn't in the inventory.
/// - [`EngineError::InvalidSubModIdx`] if a `Submodule` target names an
///   index ≥ 8.
pub fn apply_update(
    inventory: &mut Inventory,
    node_id: NodeId,
    payload: &UpdateNodeConfigPayload,
    now: u64,
) -> Result<ConfigWriteOutcome, EngineError> {
    if inventory.get_node(&node_id).is_none() {
        return Err(EngineError::UnknownNodeOnUpdate(node_id));
    }

    let mut frames = Vec::new();
    let mut audit_entries = Vec::new();

    match payload {
        UpdateNodeConfigPayload::Parent { node_type_msg, sub_mod_cnt, node_type_dlc } => {
            let node = inventory.get_node_mut(&node_id).expect("presence checked above");
            if node.node_type_msg != *node_type_msg {
                audit_entries.push(diff_entry(
                    node_id,
                    None,
                    "nodeTypeMsg",
                    node.node_type_msg,
                    *node_type_msg,
                    now,
                ));
                node.node_type_msg = *node_type_msg;
            }
            if node.sub_mod_cnt != *sub_mod_cnt {
                audit_entries.push(diff_entry(node_id, None, "subModCnt", node.sub_mod_cnt, *sub_mod_cnt, now));
                node.sub_mod_cnt = *sub_mod_cnt;
            }
            if node.node_type_dlc != *node_type_dlc {
                audit_entries.push(diff_entry(
                    node_id,
                    None,
                    "nodeTypeDlc",
                    node.node_type_dlc,
                    *node_type_dlc,
                    now,
                ));
                node.node_type_dlc = *node_type_dlc;
            }
        }
        UpdateNodeConfigPayload::Submodule {
            sub_mod_idx,
            intro_msg_id,
            data_msg_id,
            data_msg_dlc,
            raw_config,
        } => {
            if *sub_mod_idx >= 8 {
                return Err(EngineError::InvalidSubModIdx(*sub_mod_idx));
            }
            let node = inventory.get_node_mut(&node_id).expect("presence checked above");
            let slot = *sub_mod_idx as usize;
            let sm = node.sub_module[slot]
                .get_or_insert_with(|| SubModule::new(*sub_mod_idx, *intro_msg_id, now));

            if sm.intro_msg_id != *intro_msg_id {
                audit_entries.push(diff_entry(
                    node_id,
                    Some(*sub_mod_idx),
                    "introMsgId",
                    sm.intro_msg_id,
                    *intro_msg_id,
                    now,
                ));
                sm.intro_msg_id = *intro_msg_id;
            }
            if sm.data_msg_id != *data_msg_id || sm.data_msg_dlc != *data_msg_dlc {
                frames.push(build_cfg_sub_data_msg_id(node_id, *sub_mod_idx, *data_msg_id, *data_msg_dlc));
                if sm.data_msg_id != *data_msg_id {
                    audit_entries.push(diff_entry(
                        node_id,
                        Some(*sub_mod_idx),
                        "dataMsgId",
                        sm.data_msg_id,
                        *data_msg_id,
                        now,
                    ));
                }
                if sm.data_msg_dlc != *data_msg_dlc {
                    audit_entries.push(diff_entry(
                        node_id,
                        Some(*sub_mod_idx),
                        "dataMsgDlc",
                        sm.data_msg_dlc,
                        *data_msg_dlc,
                        now,
                    ));
                }
                sm.data_msg_id = *data_msg_id;
                sm.data_msg_dlc = *data_msg_dlc;
            }
            if sm.raw_config != *raw_config {
                frames.push(build_cfg_sub_raw_data(node_id, *sub_mod_idx, *raw_config));
                audit_entries.push(diff_entry(
                    node_id,
                    Some(*sub_mod_idx),
                    "rawConfig",
                    sm.raw_config,
                    *raw_config,
                    now,
                ));
                sm.raw_config = *raw_config;
            }
        }
    }

    if audit_entries.is_empty() {
        let node = inventory.get_node(&node_id).cloned().expect("presence checked above");
        return Ok(ConfigWriteOutcome { node, frames: Vec::new(), audit_entries: Vec::new(), history: None });
    }

    let node = inventory.get_node(&node_id).cloned().expect("presence checked above");
    let history = HistorySnapshot {
        history_id: 0, // assigned by the persistence layer on insert
        node_id,
        node_type_msg: node.node_type_msg,
        sub_mod_cnt: node.sub_mod_cnt,
        config_crc: node.config_crc,
        recorded_at: now,
        full_data: node.sub_module.clone(),
    };

    Ok(ConfigWriteOutcome { node, frames, audit_entries, history: Some(history) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interview::handle_node_intro;

    fn seed_node(inv: &mut Inventory, id: [u8; 4]) -> NodeId {
        let payload = vec![id[0], id[1], id[2], id[3], 2, 0, 0, 0];
        handle_node_intro(inv, 0x780, &payload, 1000).unwrap();
        let node_id = NodeId::new(id);
        let node = inv.get_node_mut(&node_id).unwrap();
        node.sub_module[0] = Some(SubModule {
            sub_mod_idx: 0,
            intro_msg_id: 0x700,
            intro_msg_dlc: 8,
            last_seen: 1000,
            raw_config: [0xAA, 0xBB, 0xCC],
            data_msg_id: 0x0210,
            data_msg_dlc: 8,
            save_state: true,
            part_a_complete: true,
            part_b_complete: true,
        });
        node_id
    }

    #[test]
    fn unknown_node_is_rejected() {
        let mut inv = Inventory::new();
        let payload = UpdateNodeConfigPayload::Parent { node_type_msg: 0x781, sub_mod_cnt: 1, node_type_dlc: 8 };
        let err = apply_update(&mut inv, NodeId::new([1, 2, 3, 4]), &payload, 1000).unwrap_err();
        assert_eq!(err, EngineError::UnknownNodeOnUpdate(NodeId::new([1, 2, 3, 4])));
    }

    #[test]
    fn s5_matching_payload_is_a_noop() {
        let mut inv = Inventory::new();
        let id = seed_node(&mut inv, [0x19, 0, 0, 0x19]);
        let payload = UpdateNodeConfigPayload::Submodule {
            sub_mod_idx: 0,
            intro_msg_id: 0x700,
            data_msg_id: 0x0210,
            data_msg_dlc: 8,
            raw_config: [0xAA, 0xBB, 0xCC],
        };
        let outcome = apply_update(&mut inv, id, &payload, 2000).unwrap();
        assert!(outcome.frames.is_empty());
        assert!(outcome.audit_entries.is_empty());
        assert!(outcome.history.is_none());
    }

    #[test]
    fn s6_data_msg_id_change_emits_one_frame_and_one_audit_row() {
        let mut inv = Inventory::new();
        let id = seed_node(&mut inv, [0x19, 0, 0, 0x19]);
        let payload = UpdateNodeConfigPayload::Submodule {
            sub_mod_idx: 0,
            intro_msg_id: 0x700,
            data_msg_id: 0x0211,
            data_msg_dlc: 8,
            raw_config: [0xAA, 0xBB, 0xCC],
        };
        let outcome = apply_update(&mut inv, id, &payload, 2000).unwrap();
        assert_eq!(outcome.frames.len(), 1);
        let frame = &outcome.frames[0];
        assert_eq!(frame.id(), CFG_SUB_DATA_MSG_ID);
        assert_eq!(&frame.data()[5..7], &[0x02, 0x11]);
        assert_eq!(outcome.audit_entries.len(), 1);
        assert_eq!(outcome.audit_entries[0].field, "dataMsgId");
        assert!(outcome.history.is_some());
    }

    #[test]
    fn raw_config_change_emits_cfg_sub_raw_data_frame() {
        let mut inv = Inventory::new();
        let id = seed_node(&mut inv, [0x19, 0, 0, 0x19]);
        let payload = UpdateNodeConfigPayload::Submodule {
            sub_mod_idx: 0,
            intro_msg_id: 0x700,
            data_msg_id: 0x0210,
            data_msg_dlc: 8,
            raw_config: [0x01, 0x02, 0x03],
        };
        let outcome = apply_update(&mut inv, id, &payload, 2000).unwrap();
        assert_eq!(outcome.frames.len(), 1);
        assert_eq!(outcome.frames[0].id(), CFG_SUB_RAW_DATA_ID);
        assert_eq!(outcome.audit_entries[0].field, "rawConfig");
    }

    #[test]
    fn invalid_submodule_index_is_rejected() {
        let mut inv = Inventory::new();
        let id = seed_node(&mut inv, [0x19, 0, 0, 0x19]);
        let payload = UpdateNodeConfigPayload::Submodule {
            sub_mod_idx: 8,
            intro_msg_id: 0x700,
            data_msg_id: 0,
            data_msg_dlc: 0,
            raw_config: [0, 0, 0],
        };
        let err = apply_update(&mut inv, id, &payload, 2000).unwrap_err();
        assert_eq!(err, EngineError::InvalidSubModIdx(8));
    }
}
