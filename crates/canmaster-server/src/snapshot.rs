//! Conversions from core domain types to the gateway's JSON wire shapes.

use canmaster_core::{AuditEntry, Node, SubModule};
use canmaster_proto::gateway::{AuditRow, NodeSnapshot, SubModuleSnapshot};

fn sub_module_snapshot(sm: &SubModule) -> SubModuleSnapshot {
    SubModuleSnapshot {
        sub_mod_idx: sm.sub_mod_idx,
        intro_msg_id: sm.intro_msg_id,
        intro_msg_dlc: sm.intro_msg_dlc,
        last_seen: sm.last_seen,
        raw_config: sm.raw_config,
        data_msg_id: sm.data_msg_id,
        data_msg_dlc: sm.data_msg_dlc,
        save_state: sm.save_state,
        part_a_complete: sm.part_a_complete,
        part_b_complete: sm.part_b_complete,
    }
}

/// Project a [`Node`] into the JSON shape a `DATABASE_UPDATE` publishes.
pub fn node_snapshot(node: &Node) -> NodeSnapshot {
    let mut sub_module: [Option<SubModuleSnapshot>; 8] = Default::default();
    for (dst, src) in sub_module.iter_mut().zip(node.sub_module.iter()) {
        *dst = src.as_ref().map(sub_module_snapshot);
    }
    NodeSnapshot {
        node_id: node.node_id.hex(),
        node_type_msg: node.node_type_msg,
        node_type_dlc: node.node_type_dlc,
        sub_mod_cnt: node.sub_mod_cnt,
        config_crc: node.config_crc,
        first_seen: node.first_seen,
        last_seen: node.last_seen,
        last_sub_mod_idx: node.last_sub_mod_idx,
        intro_complete: node.intro_complete,
        sub_module,
    }
}

/// Project every node in a snapshot list.
pub fn node_snapshots(nodes: &[Node]) -> Vec<NodeSnapshot> {
    nodes.iter().map(node_snapshot).collect()
}

/// Project an [`AuditEntry`] into the JSON shape an `AUDIT_LOG_UPDATE` publishes.
pub fn audit_row(entry: &AuditEntry) -> AuditRow {
    AuditRow {
        audit_id: entry.audit_id,
        timestamp_ms: entry.timestamp_ms,
        node_id: entry.node_id.hex(),
        sub_idx: entry.sub_idx,
        field: entry.field.clone(),
        old_value: entry.old_value.clone(),
        new_value: entry.new_value.clone(),
        comment: entry.comment.clone(),
    }
}

/// Project a list of audit entries.
pub fn audit_rows(entries: &[AuditEntry]) -> Vec<AuditRow> {
    entries.iter().map(audit_row).collect()
}
