//! Engine-level error kinds: the non-fatal conditions the engine classifies
//! and logs per the error-handling table, plus the few that are rejected
//! back to the caller.

use std::fmt;

use crate::model::NodeId;

/// Conditions the engine can hit while processing a bus frame, a gateway
/// message, or an operator-initiated edit. None of these are fatal; each
/// carries a documented policy (drop, log, or reject without an ACK).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A node-scoped frame arrived with fewer than 4 payload bytes.
    MalformedFrame,
    /// A sub-module intro named an index ≥ 8.
    InvalidSubModIdx(u8),
    /// An `UPDATE_NODE_CONFIG` named a node the inventory doesn't know.
    UnknownNodeOnUpdate(NodeId),
    /// A `REQUEST_NODE_INTERVIEW` named a node the inventory doesn't know.
    UnknownNodeOnInterviewRequest(NodeId),
    /// A sub-module intro arrived for a node that hasn't been introduced yet.
    UnknownParentNode(NodeId),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedFrame => write!(f, "frame payload shorter than 4 bytes"),
            Self::InvalidSubModIdx(idx) => write!(f, "sub-module index {idx} out of range"),
            Self::UnknownNodeOnUpdate(id) => write!(f, "update targets unknown node {id}"),
            Self::UnknownNodeOnInterviewRequest(id) => {
                write!(f, "interview request targets unknown node {id}")
            }
            Self::UnknownParentNode(id) => {
                write!(f, "sub-module intro for unknown parent node {id}")
            }
        }
    }
}

impl std::error::Error for EngineError {}
