//! Two-phase introduction protocol: node-intro and sub-module-intro frame
//! handling, CRC-drift detection, and the ACK that solicits continuation.

use canmaster_proto::codec::{assemble_be16, decode_node_id, pack_be8, unpack_byte_seven};
use canmaster_proto::Frame;

use crate::error::EngineError;
use crate::ids::ACK_INTRO;
use crate::inventory::Inventory;
use crate::model::{HistorySnapshot, Node, NodeId, SubModule};

fn byte_at(payload: &[u8], idx: usize) -> u8 {
    payload.get(idx).copied().unwrap_or(0)
}

#[allow(clippy::unwrap_used)] // ACK_INTRO is in range and pack_be8 always yields 8 bytes
fn ack_frame(id: NodeId) -> Frame {
    Frame::new(ACK_INTRO, pack_be8(&id.bytes()).to_vec()).unwrap()
}

/// Result of processing one node-intro frame.
#[derive(Debug, Clone)]
pub struct NodeIntroOutcome {
    /// The node as it stands after this frame was applied.
    pub node: Node,
    /// A snapshot of the node's state *before* this frame, present iff the
    /// frame changed a previously-known `configCrc` (the drift-detection
    /// contract: callers must persist this alongside `node` in the same
    /// transaction).
    pub drift_snapshot: Option<HistorySnapshot>,
    /// The ACK to send, if the node still has sub-modules left to solicit.
    pub ack: Option<Frame>,
}

/// Apply a node-intro frame (arbitration ID in `0x780..=0x7FF`).
///
/// # Errors
///
/// Returns [`EngineError::MalformedFrame`] if `payload` is shorter than 4
/// bytes; per §4.4.1 the frame is dropped in that case.
pub fn handle_node_intro(
    inventory: &mut Inventory,
    frame_id: u16,
    payload: &[u8],
    now: u64,
) -> Result<NodeIntroOutcome, EngineError> {
    let bytes = decode_node_id(payload).map_err(|_| EngineError::MalformedFrame)?;
    let node_id = NodeId::new(bytes);

    let prior = inventory.get_node(&node_id).cloned();
    let incoming_crc = assemble_be16(byte_at(payload, 5), byte_at(payload, 6));
    let sub_mod_cnt = byte_at(payload, 4);

    let drift_snapshot = prior.as_ref().and_then(|p| {
        p.config_crc.filter(|&old| old != incoming_crc).map(|old_crc| HistorySnapshot {
            history_id: 0,
            node_id,
            node_type_msg: p.node_type_msg,
            sub_mod_cnt: p.sub_mod_cnt,
            config_crc: Some(old_crc),
            recorded_at: p.last_seen,
            full_data: p.sub_module.clone(),
        })
    });

    let node = inventory.get_or_create(node_id, frame_id, now);
    node.node_type_msg = frame_id;
    node.node_type_dlc = 8;
    node.sub_mod_cnt = sub_mod_cnt;
    node.config_crc = Some(incoming_crc);
    node.last_seen = now;

    node.intro_complete = node.compute_intro_complete();
    let ack = if node.intro_complete { None } else { Some(ack_frame(node_id)) };

    Ok(NodeIntroOutcome { node: node.clone(), drift_snapshot, ack })
}

/// Result of processing one sub-module-intro frame.
#[derive(Debug, Clone)]
pub struct SubModuleOutcome {
    /// The parent node as it stands after this frame was applied.
    pub node: Node,
    /// Whether this frame completed (both phases done for) a sub-module
    /// that was not previously complete; only then must the caller persist.
    pub newly_completed: bool,
    /// The ACK to send, if the frame warranted continuation.
    pub ack: Option<Frame>,
}

/// Apply a sub-module-intro frame (arbitration ID in `0x700..=0x77F`).
///
/// # Errors
///
/// - [`EngineError::MalformedFrame`] if `payload` is shorter than 4 bytes.
/// - [`EngineError::UnknownParentNode`] if the parent node hasn't been
///   introduced yet.
/// - [`EngineError::InvalidSubModIdx`] if the low 7 bits of the tag byte
///   name an index ≥ 8.
pub fn handle_submodule_intro(
    inventory: &mut Inventory,
    frame_id: u16,
    payload: &[u8],
    now: u64,
) -> Result<SubModuleOutcome, EngineError> {
    let bytes = decode_node_id(payload).map_err(|_| EngineError::MalformedFrame)?;
    let node_id = NodeId::new(bytes);

    let tag = byte_at(payload, 4);
    let working_idx = tag & 0x7F;
    let is_part_b = tag >= 0x80;

    if working_idx >= 8 {
        return Err(EngineError::InvalidSubModIdx(working_idx));
    }

    let node = inventory.get_node_mut(&node_id).ok_or(EngineError::UnknownParentNode(node_id))?;

    let slot = working_idx as usize;
    if node.sub_module[slot].as_ref().is_some_and(SubModule::interviewed) {
        // Idempotent re-receipt: nothing changed, nothing to acknowledge.
        return Ok(SubModuleOutcome { node: node.clone(), newly_completed: false, ack: None });
    }

    let sm = node.sub_module[slot].get_or_insert_with(|| SubModule::new(working_idx, frame_id, now));
    sm.sub_mod_idx = working_idx;
    sm.intro_msg_id = frame_id;
    sm.intro_msg_dlc = 8;
    sm.last_seen = now;

    if is_part_b {
        sm.data_msg_id = assemble_be16(byte_at(payload, 5), byte_at(payload, 6));
        let unpacked = unpack_byte_seven(byte_at(payload, 7));
        sm.data_msg_dlc = unpacked.dlc;
        sm.save_state = unpacked.save_state;
        sm.part_b_complete = true;
    } else {
        sm.raw_config = [byte_at(payload, 5), byte_at(payload, 6), byte_at(payload, 7)];
        sm.part_a_complete = true;
    }

    let newly_completed = sm.interviewed();
    if newly_completed {
        node.last_sub_mod_idx = working_idx;
    }

    Ok(SubModuleOutcome { node: node.clone(), newly_completed, ack: Some(ack_frame(node_id)) })
}

/// Reset a node's interview state ahead of re-running it (§4.4.4), returning
/// the `REQ_NODE_INTRO` frame to enqueue.
///
/// # Errors
///
/// Returns [`EngineError::UnknownNodeOnInterviewRequest`] if `node_id` isn't
/// in the inventory.
#[allow(clippy::unwrap_used)] // REQ_NODE_INTRO is in range; pack_be8 always yields 8 bytes
pub fn request_reinterview(
    inventory: &mut Inventory,
    node_id: NodeId,
) -> Result<(Node, Frame), EngineError> {
    inventory
        .reset_node_interview_state(&node_id)
        .ok_or(EngineError::UnknownNodeOnInterviewRequest(node_id))?;
    let node = inventory.get_node(&node_id).cloned().unwrap();
    let frame = Frame::new(crate::ids::REQ_NODE_INTRO, pack_be8(&node_id.bytes()).to_vec()).unwrap();
    Ok((node, frame))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_intro_payload(id: [u8; 4], sub_mod_cnt: u8, crc: u16) -> Vec<u8> {
        let (hi, lo) = canmaster_proto::codec::split_be16(crc);
        vec![id[0], id[1], id[2], id[3], sub_mod_cnt, hi, lo, 0]
    }

    #[test]
    fn s1_first_contact() {
        let mut inv = Inventory::new();
        let payload = node_intro_payload([0x19, 0, 0, 0x19], 2, 0x0012);
        let outcome = handle_node_intro(&mut inv, 0x780, &payload, 1000).unwrap();

        assert_eq!(outcome.node.node_id.hex(), "19000019");
        assert_eq!(outcome.node.sub_mod_cnt, 2);
        assert_eq!(outcome.node.config_crc, Some(0x0012));
        assert_eq!(outcome.node.first_seen, 1000);
        assert_eq!(outcome.node.last_seen, 1000);
        assert!(!outcome.node.intro_complete);
        assert!(outcome.drift_snapshot.is_none());
        let ack = outcome.ack.expect("ack emitted");
        assert_eq!(ack.id(), ACK_INTRO);
        assert_eq!(&ack.data()[0..4], &[0x19, 0, 0, 0x19]);
    }

    #[test]
    fn s2_sub_module_phase_a_then_b() {
        let mut inv = Inventory::new();
        let id = [0x19, 0, 0, 0x19];
        handle_node_intro(&mut inv, 0x780, &node_intro_payload(id, 2, 0x0012), 1000).unwrap();

        let phase_a = [id[0], id[1], id[2], id[3], 0x00, 0xAA, 0xBB, 0xCC];
        let out_a = handle_submodule_intro(&mut inv, 0x700, &phase_a, 1001).unwrap();
        assert!(!out_a.newly_completed);
        assert!(out_a.ack.is_some());

        let phase_b = [id[0], id[1], id[2], id[3], 0x80, 0x02, 0x10, 0x88];
        let out_b = handle_submodule_intro(&mut inv, 0x700, &phase_b, 1002).unwrap();
        assert!(out_b.newly_completed);

        let sm = out_b.node.sub_module[0].clone().unwrap();
        assert_eq!(sm.raw_config, [0xAA, 0xBB, 0xCC]);
        assert_eq!(sm.data_msg_id, 0x0210);
        assert_eq!(sm.data_msg_dlc, 8);
        assert!(sm.save_state);
        assert_eq!(out_b.node.last_sub_mod_idx, 0);
    }

    #[test]
    fn s3_completion_stops_ack() {
        let mut inv = Inventory::new();
        let id = [0x19, 0, 0, 0x19];
        handle_node_intro(&mut inv, 0x780, &node_intro_payload(id, 1, 0x0012), 1000).unwrap();
        let phase_a = [id[0], id[1], id[2], id[3], 0x00, 0, 0, 0];
        handle_submodule_intro(&mut inv, 0x700, &phase_a, 1001).unwrap();
        let phase_b = [id[0], id[1], id[2], id[3], 0x80, 0, 0, 0];
        handle_submodule_intro(&mut inv, 0x700, &phase_b, 1002).unwrap();

        let repeat = handle_node_intro(&mut inv, 0x780, &node_intro_payload(id, 1, 0x0012), 1003).unwrap();
        assert!(repeat.node.intro_complete);
        assert!(repeat.ack.is_none());
    }

    #[test]
    fn s4_crc_drift_archives_prior_state() {
        let mut inv = Inventory::new();
        let id = [0x19, 0, 0, 0x19];
        handle_node_intro(&mut inv, 0x780, &node_intro_payload(id, 2, 0x0012), 1000).unwrap();

        let drifted = handle_node_intro(&mut inv, 0x780, &node_intro_payload(id, 2, 0x0099), 2000).unwrap();
        let snap = drifted.drift_snapshot.expect("crc changed, snapshot required");
        assert_eq!(snap.config_crc, Some(0x0012));
        assert_eq!(drifted.node.config_crc, Some(0x0099));
    }

    #[test]
    fn malformed_node_intro_is_dropped() {
        let mut inv = Inventory::new();
        let err = handle_node_intro(&mut inv, 0x780, &[1, 2, 3], 1000).unwrap_err();
        assert_eq!(err, EngineError::MalformedFrame);
    }

    #[test]
    fn submodule_intro_rejects_unknown_parent() {
        let mut inv = Inventory::new();
        let payload = [1, 2, 3, 4, 0, 0, 0, 0];
        let err = handle_submodule_intro(&mut inv, 0x700, &payload, 1000).unwrap_err();
        assert_eq!(err, EngineError::UnknownParentNode(NodeId::new([1, 2, 3, 4])));
    }

    #[test]
    fn submodule_intro_rejects_out_of_range_index() {
        let mut inv = Inventory::new();
        let id = [0x19, 0, 0, 0x19];
        handle_node_intro(&mut inv, 0x780, &node_intro_payload(id, 2, 0x0012), 1000).unwrap();
        let payload = [id[0], id[1], id[2], id[3], 8, 0, 0, 0];
        let err = handle_submodule_intro(&mut inv, 0x700, &payload, 1001).unwrap_err();
        assert_eq!(err, EngineError::InvalidSubModIdx(8));
    }

    #[test]
    fn phase_monotonicity_idempotent_resend_is_a_noop() {
        let mut inv = Inventory::new();
        let id = [0x19, 0, 0, 0x19];
        handle_node_intro(&mut inv, 0x780, &node_intro_payload(id, 1, 0x0012), 1000).unwrap();
        let phase_a = [id[0], id[1], id[2], id[3], 0x00, 1, 2, 3];
        handle_submodule_intro(&mut inv, 0x700, &phase_a, 1001).unwrap();
        let phase_b = [id[0], id[1], id[2], id[3], 0x80, 0, 0, 0];
        handle_submodule_intro(&mut inv, 0x700, &phase_b, 1002).unwrap();

        let before = inv.get_node(&NodeId::new(id)).unwrap().clone();
        let resend = handle_submodule_intro(&mut inv, 0x700, &phase_a, 1003).unwrap();
        assert!(!resend.newly_completed);
        assert!(resend.ack.is_none());
        assert_eq!(inv.get_node(&NodeId::new(id)).unwrap(), &before);
    }

    #[test]
    fn s5_interview_reset_enqueues_req_node_intro() {
        let mut inv = Inventory::new();
        let id = [0x19, 0, 0, 0x19];
        handle_node_intro(&mut inv, 0x780, &node_intro_payload(id, 1, 0x0012), 1000).unwrap();
        let phase_a = [id[0], id[1], id[2], id[3], 0x00, 0, 0, 0];
        handle_submodule_intro(&mut inv, 0x700, &phase_a, 1001).unwrap();

        let (node, frame) = request_reinterview(&mut inv, NodeId::new(id)).unwrap();
        assert!(node.sub_module.iter().all(Option::is_none));
        assert_eq!(node.last_sub_mod_idx, 0);
        assert!(!node.intro_complete);
        assert_eq!(frame.id(), crate::ids::REQ_NODE_INTRO);
        assert_eq!(&frame.data()[0..4], &id);
    }
}
