//! CAN bus master controller: production server.
//!
//! Wraps [`canmaster_core`]'s Sans-IO domain logic ([`Engine`]) with real
//! I/O: a SocketCAN or loopback bus, a redb-backed persistence layer, and a
//! WebSocket operator gateway. [`server::run`] is the single Tokio task
//! that owns the engine and drives it from those three sources.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod bus;
mod config;
mod definitions;
mod engine;
mod error;
mod gateway;
mod server;
mod snapshot;
pub mod storage;

pub use bus::{BusError, BusPort, LoopbackBusHandle, LoopbackBusPort, SocketCanPort};
pub use config::Args;
pub use definitions::{DefinitionRegistry, DefinitionsError};
pub use engine::{Engine, EngineAction};
pub use error::ServerError;
pub use gateway::{run as gateway_run, GatewayError, GatewayEvent, GatewayRegistry};
pub use server::run;
pub use storage::{MemoryStorage, RedbStorage, Storage, StorageError};
