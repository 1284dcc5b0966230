//! Arbitration IDs for the master-originated control frames.
//!
//! Node-intro (`0x780..=0x7FF`) and sub-module-intro (`0x700..=0x77F`) are
//! ranges owned by nodes and are matched by range, not by a single
//! constant. These are the master's own fixed IDs, chosen outside both
//! ranges.

/// Master → all: request a node to (re-)run its intro sequence.
pub const REQ_NODE_INTRO: u16 = 0x100;
/// Master → node: acknowledge an intro frame, soliciting the next one.
pub const ACK_INTRO: u16 = 0x101;
/// Master → all: wall-clock epoch broadcast.
pub const DATA_EPOCH_ID: u16 = 0x102;
/// Master → node: write a sub-module's data-message id/dlc pair.
pub const CFG_SUB_DATA_MSG_ID: u16 = 0x110;
/// Master → node: write a sub-module's raw config bytes.
pub const CFG_SUB_RAW_DATA_ID: u16 = 0x111;

/// Low bound of the node-intro arbitration range.
pub const NODE_INTRO_RANGE: std::ops::RangeInclusive<u16> = 0x780..=0x7FF;
/// Low bound of the sub-module-intro arbitration range.
pub const SUBMOD_INTRO_RANGE: std::ops::RangeInclusive<u16> = 0x700..=0x77F;
