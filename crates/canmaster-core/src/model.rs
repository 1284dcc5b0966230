//! Inventory data model: `NodeId`, `Node`, `SubModule`, and the
//! persistence/audit record types that travel alongside them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a physical node: exactly 4 bytes, rendered as an 8-char
/// lowercase hex string for map keys and persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId([u8; 4]);

impl NodeId {
    /// Wrap the 4 raw bytes of a node identity.
    #[must_use]
    pub fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// The raw 4 bytes, in wire order.
    #[must_use]
    pub fn bytes(&self) -> [u8; 4] {
        self.0
    }

    /// The lowercase 8-hex-char rendering used as the inventory key.
    #[must_use]
    pub fn hex(&self) -> String {
        canmaster_proto::codec::encode_node_id(self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex())
    }
}

impl Serialize for NodeId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.hex())
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_node_id_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Parse an 8-hex-char string back into a [`NodeId`].
///
/// # Errors
///
/// Returns a description of the failure if `s` is not exactly 8 hex digits.
pub fn parse_node_id_hex(s: &str) -> Result<NodeId, String> {
    if s.len() != 8 {
        return Err(format!("node id {s:?} is not 8 hex characters"));
    }
    let mut bytes = [0u8; 4];
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
            .map_err(|e| format!("node id {s:?} invalid at byte {i}: {e}"))?;
    }
    Ok(NodeId(bytes))
}

/// One of a node's up to 8 logical channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubModule {
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

impl SubModule {
    /// A freshly created sub-module at `idx`, with both phases pending.
    #[must_use]
    pub fn new(idx: u8, intro_msg_id: u16, now: u64) -> Self {
        Self {
            sub_mod_idx: idx,
            intro_msg_id,
            intro_msg_dlc: 8,
            last_seen: now,
            raw_config: [0, 0, 0],
            data_msg_id: 0,
            data_msg_dlc: 0,
            save_state: false,
            part_a_complete: false,
            part_b_complete: false,
        }
    }

    /// A sub-module is interviewed once both of its phases have arrived.
    #[must_use]
    pub fn interviewed(&self) -> bool {
        self.part_a_complete && self.part_b_complete
    }
}

/// A physical node and its up to 8 sub-modules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub node_id: NodeId,
    pub node_type_msg: u16,
    pub node_type_dlc: u8,
    pub sub_mod_cnt: u8,
    pub config_crc: Option<u16>,
    pub first_seen: u64,
    pub last_seen: u64,
    pub last_sub_mod_idx: u8,
    pub intro_complete: bool,
    pub sub_module: [Option<SubModule>; 8],
}

impl Node {
    /// A freshly discovered node, with no sub-modules interviewed yet.
    #[must_use]
    pub fn new(node_id: NodeId, node_type_msg: u16, now: u64) -> Self {
        Self {
            node_id,
            node_type_msg,
            node_type_dlc: 8,
            sub_mod_cnt: 0,
            config_crc: None,
            first_seen: now,
            last_seen: now,
            last_sub_mod_idx: 0,
            intro_complete: false,
            sub_module: Default::default(),
        }
    }

    /// `true` once every sub-module up to `sub_mod_cnt - 1` has completed
    /// both interview phases.
    #[must_use]
    pub fn compute_intro_complete(&self) -> bool {
        self.sub_mod_cnt > 0 && self.last_sub_mod_idx >= self.sub_mod_cnt - 1
    }
}

/// One row of the ingested message-name definition table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Definition {
    pub id_dec: u32,
    pub id_hex: String,
    pub name: String,
    pub dlc: u8,
    pub category: String,
    pub description: String,
}

/// An append-only record of an operator-initiated field change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub audit_id: u64,
    pub timestamp_ms: u64,
    pub node_id: NodeId,
    pub sub_idx: Option<u8>,
    pub field: String,
    pub old_value: serde_json::Value,
    pub new_value: serde_json::Value,
    pub comment: Option<String>,
}

/// An append-only snapshot of a node's prior state, recorded whenever a
/// node-intro frame changes a known node's `configCrc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySnapshot {
    pub history_id: u64,
    pub node_id: NodeId,
    pub node_type_msg: u16,
    pub sub_mod_cnt: u8,
    pub config_crc: Option<u16>,
    pub recorded_at: u64,
    pub full_data: [Option<SubModule>; 8],
}
