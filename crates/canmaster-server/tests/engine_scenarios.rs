//! End-to-end scenarios driving [`Engine`] against real `RedbStorage`,
//! verifying that interview state, CRC-drift history, and config writes all
//! survive a process restart.

use canmaster_core::NodeId;
use canmaster_proto::codec::split_be16;
use canmaster_proto::gateway::{InboundMessage, OutboundMessage, UpdateNodeConfigPayload};
use canmaster_proto::Frame;
use canmaster_server::{Engine, EngineAction, RedbStorage, Storage};
use tempfile::tempdir;

fn node_intro_frame(id: [u8; 4], sub_mod_cnt: u8, crc: u16) -> Frame {
    let (hi, lo) = split_be16(crc);
    Frame::new(0x780, vec![id[0], id[1], id[2], id[3], sub_mod_cnt, hi, lo, 0]).unwrap()
}

fn submodule_frame(id: [u8; 4], tag: u8, b5: u8, b6: u8, b7: u8) -> Frame {
    Frame::new(0x700, vec![id[0], id[1], id[2], id[3], tag, b5, b6, b7]).unwrap()
}

#[test]
fn interview_state_survives_a_restart() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("canmaster.redb");
    let id = [0x19, 0, 0, 0x19];

    {
        let storage = RedbStorage::open(&db_path).unwrap();
        let mut engine =
            Engine::restore(storage, NodeId::new([0, 0, 0, 1]), 0, None).unwrap();

        engine.process_bus_frame(&node_intro_frame(id, 1, 0x0012), 1000);
        engine.process_bus_frame(&submodule_frame(id, 0x00, 0xAA, 0xBB, 0xCC), 1001);
        engine.process_bus_frame(&submodule_frame(id, 0x80, 0x02, 0x10, 0x88), 1002);
    }

    {
        let storage = RedbStorage::open(&db_path).unwrap();
        let nodes = storage.load_all_nodes().unwrap();
        assert_eq!(nodes.len(), 1);
        let node = &nodes[0];
        assert_eq!(node.node_id, NodeId::new(id));
        assert!(node.intro_complete);
        let sm = node.sub_module[0].as_ref().unwrap();
        assert_eq!(sm.raw_config, [0xAA, 0xBB, 0xCC]);
        assert_eq!(sm.data_msg_id, 0x0210);
    }
}

#[test]
fn crc_drift_is_archived_and_queryable_after_restart() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("canmaster.redb");
    let id = [0x19, 0, 0, 0x19];

    {
        let storage = RedbStorage::open(&db_path).unwrap();
        let mut engine =
            Engine::restore(storage, NodeId::new([0, 0, 0, 1]), 0, None).unwrap();
        engine.process_bus_frame(&node_intro_frame(id, 2, 0x0012), 1000);
        engine.process_bus_frame(&node_intro_frame(id, 2, 0x0099), 2000);
    }

    {
        let storage = RedbStorage::open(&db_path).unwrap();
        let nodes = storage.load_all_nodes().unwrap();
        assert_eq!(nodes[0].config_crc, Some(0x0099));
    }
}

#[test]
fn config_write_commits_audit_and_history_then_broadcasts_an_update() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("canmaster.redb");
    let id = [0x19, 0, 0, 0x19];

    let storage = RedbStorage::open(&db_path).unwrap();
    let mut engine = Engine::restore(storage, NodeId::new([0, 0, 0, 1]), 0, None).unwrap();

    engine.process_bus_frame(&node_intro_frame(id, 1, 0x0012), 1000);
    engine.process_bus_frame(&submodule_frame(id, 0x00, 0xAA, 0xBB, 0xCC), 1001);
    engine.process_bus_frame(&submodule_frame(id, 0x80, 0x02, 0x10, 0x88), 1002);

    let payload = UpdateNodeConfigPayload::Submodule {
        sub_mod_idx: 0,
        intro_msg_id: 0x700,
        data_msg_id: 0x0211,
        data_msg_dlc: 8,
        raw_config: [0xAA, 0xBB, 0xCC],
    };
    let actions = engine.process_gateway_msg(
        1,
        InboundMessage::UpdateNodeConfig { node_id: "19000019".to_string(), payload },
        2000,
    );

    assert!(actions.iter().any(|a| matches!(a, EngineAction::SendBusFrame(_))));
    assert!(actions.iter().any(|a| matches!(
        a,
        EngineAction::SendGateway { message: OutboundMessage::UpdateAck { success: true, .. }, .. }
    )));
    assert!(actions
        .iter()
        .any(|a| matches!(a, EngineAction::BroadcastGateway(OutboundMessage::AuditLogUpdate { .. }))));
}

#[test]
fn interview_reset_clears_sub_modules_and_requests_reintroduction() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("canmaster.redb");
    let id = [0x19, 0, 0, 0x19];

    let storage = RedbStorage::open(&db_path).unwrap();
    let mut engine = Engine::restore(storage, NodeId::new([0, 0, 0, 1]), 0, None).unwrap();
    engine.process_bus_frame(&node_intro_frame(id, 1, 0x0012), 1000);
    engine.process_bus_frame(&submodule_frame(id, 0x00, 0xAA, 0xBB, 0xCC), 1001);

    let actions =
        engine.process_gateway_msg(1, InboundMessage::RequestNodeInterview { node_id: "19000019".to_string() }, 2000);

    assert!(actions.iter().any(|a| matches!(
        a,
        EngineAction::SendBusFrame(frame) if frame.id() == canmaster_core::ids::REQ_NODE_INTRO
    )));
    assert!(actions.iter().any(|a| matches!(a, EngineAction::BroadcastGateway(OutboundMessage::DatabaseUpdate { .. }))));
}
