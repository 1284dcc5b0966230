//! Sans-IO node/sub-module discovery and configuration engine.
//!
//! This crate holds the pure domain logic: the in-memory inventory, the
//! two-phase interview state machine, the operator config-write path, and
//! the housekeeping timers. It performs no I/O and owns no storage or
//! transport handle — callers (the `canmaster-server` crate) drive it with
//! decoded frames and persist what it reports back.

pub mod config_writer;
pub mod error;
pub mod ids;
pub mod interview;
pub mod inventory;
pub mod housekeeping;
pub mod model;

pub use error::EngineError;
pub use inventory::Inventory;
pub use model::{AuditEntry, Definition, HistorySnapshot, Node, NodeId, SubModule};
