//! JSON wire schemas for the operator gateway's duplex connection.
//!
//! These types own only the wire shape; the server crate is responsible for
//! building them from engine-owned state and for dispatching inbound
//! variants to the engine.

use serde::{Deserialize, Serialize};

/// One row of the message-name definition table, as handed to operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Definition {
    /// Arbitration ID in decimal.
    pub id_dec: u32,
    /// Arbitration ID as a `0x`-prefixed hex string, as read from the CSV.
    pub id_hex: String,
    /// Human-readable message name.
    pub name: String,
    /// Data length code.
    pub dlc: u8,
    /// Grouping category.
    pub category: String,
    /// Free-text description.
    pub description: String,
}

/// JSON projection of a sub-module, as published in a `DATABASE_UPDATE`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubModuleSnapshot {
    pub sub_mod_idx: u8,
    pub intro_msg_id: u16,
    pub intro_msg_dlc: u8,
    pub last_seen: u64,
    pub raw_config: [u8; 3],
    pub data_msg_id: u16,
    pub data_msg_dlc: u8,
    pub save_state: bool,
    pub part_a_complete: bool,
    pub part_b_complete: bool,
}

/// JSON projection of a node, as published in a `DATABASE_UPDATE`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSnapshot {
    pub node_id: String,
    pub node_type_msg: u16,
    pub node_type_dlc: u8,
    pub sub_mod_cnt: u8,
    pub config_crc: Option<u16>,
    pub first_seen: u64,
    pub last_seen: u64,
    pub last_sub_mod_idx: u8,
    pub intro_complete: bool,
    /// Dense-from-zero slots; a `None` entry means that index hasn't been
    /// seen yet, which may occur mid-interview.
    pub sub_module: [Option<SubModuleSnapshot>; 8],
}

/// One row of the audit log joined with its optional operator comment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRow {
    pub audit_id: u64,
    pub timestamp_ms: u64,
    pub node_id: String,
    pub sub_idx: Option<u8>,
    pub field: String,
    pub old_value: serde_json::Value,
    pub new_value: serde_json::Value,
    pub comment: Option<String>,
}

/// The two shapes an `UPDATE_NODE_CONFIG` request can take, discriminated by
/// `configTarget` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "configTarget", rename_all = "camelCase")]
pub enum UpdateNodeConfigPayload {
    /// Replace the node-level intro fields.
    #[serde(rename = "PARENT")]
    Parent {
        node_type_msg: u16,
        sub_mod_cnt: u8,
        node_type_dlc: u8,
    },
    /// Replace one sub-module's writable fields.
    #[serde(rename = "SUBMODULE")]
    Submodule {
        sub_mod_idx: u8,
        intro_msg_id: u16,
        data_msg_id: u16,
        data_msg_dlc: u8,
        raw_config: [u8; 3],
    },
}

/// Messages an operator connection may send to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum InboundMessage {
    /// Operator-authored edit; see [`UpdateNodeConfigPayload`].
    #[serde(rename = "UPDATE_NODE_CONFIG")]
    UpdateNodeConfig {
        node_id: String,
        #[serde(flatten)]
        payload: UpdateNodeConfigPayload,
    },
    /// Request to discard and re-run a node's interview.
    #[serde(rename = "REQUEST_NODE_INTERVIEW")]
    RequestNodeInterview { node_id: String },
    /// Attach or replace a free-text comment on an audit row.
    #[serde(rename = "SAVE_AUDIT_COMMENT")]
    SaveAuditComment { audit_id: u64, comment: String },
    /// Request the full definition list.
    #[serde(rename = "GET_DEFINITIONS")]
    GetDefinitions,
    /// Reserved; see the design notes on `SAVE_TO_BUS`.
    #[serde(rename = "SAVE_TO_BUS")]
    SaveToBus { node_id: String },
    /// Erase a node's inventory row. History and audit rows referencing it
    /// are left untouched.
    #[serde(rename = "REMOVE_NODE")]
    RemoveNode { node_id: String },
}

/// Messages the engine may publish to an operator connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum OutboundMessage {
    /// Full definition table, sent on connect and on demand.
    #[serde(rename = "DEFINITIONS_LIST")]
    DefinitionsList { payload: Vec<Definition> },
    /// Full inventory snapshot.
    #[serde(rename = "DATABASE_UPDATE")]
    DatabaseUpdate { payload: Vec<NodeSnapshot> },
    /// Most recent audit rows, joined with comments.
    #[serde(rename = "AUDIT_LOG_UPDATE")]
    AuditLogUpdate { payload: Vec<AuditRow> },
    /// Result of a Config Writer operation.
    #[serde(rename = "UPDATE_ACK")]
    UpdateAck {
        node_id: String,
        sub_mod_idx: Option<u8>,
        success: bool,
    },
    /// A decoded, live CAN frame.
    #[serde(rename = "CAN_MESSAGE")]
    CanMessage {
        id: u16,
        name: String,
        data: Vec<u8>,
        timestamp: u64,
    },
}

/// Name used for [`OutboundMessage::CanMessage`] when the Definition
/// Registry has no entry for the frame's arbitration ID.
pub const UNKNOWN_MESSAGE_NAME: &str = "UNKNOWN";

/// Number of most-recent audit rows included in an `AUDIT_LOG_UPDATE`.
pub const AUDIT_LOG_PAGE_SIZE: usize = 20;
