//! Top-level server error type: wraps each layer's own error enum, per the
//! teacher's convention of one enum per layer joined by `From` impls.

use std::fmt;

use crate::bus::BusError;
use crate::definitions::DefinitionsError;
use crate::storage::StorageError;
use canmaster_core::EngineError;

/// Errors that can surface while running the server.
#[derive(Debug)]
pub enum ServerError {
    /// The engine rejected a frame or gateway request. Most variants are
    /// logged and swallowed by the caller rather than propagated this far;
    /// this wraps the few that abort start-up (none today, reserved for
    /// future strict-mode init).
    Engine(EngineError),
    /// A persistence operation failed.
    Storage(StorageError),
    /// The CAN interface could not be opened.
    Bus(BusError),
    /// The definitions CSV could not be loaded.
    Definitions(DefinitionsError),
    /// The bind address or a config value was invalid.
    Config(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Engine(e) => write!(f, "engine error: {e}"),
            Self::Storage(e) => write!(f, "storage error: {e}"),
            Self::Bus(e) => write!(f, "bus error: {e}"),
            Self::Definitions(e) => write!(f, "definitions error: {e}"),
            Self::Config(msg) => write!(f, "config error: {msg}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Engine(e) => Some(e),
            Self::Storage(e) => Some(e),
            Self::Bus(e) => Some(e),
            Self::Definitions(e) => Some(e),
            Self::Config(_) => None,
        }
    }
}

impl From<EngineError> for ServerError {
    fn from(e: EngineError) -> Self {
        Self::Engine(e)
    }
}

impl From<StorageError> for ServerError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<BusError> for ServerError {
    fn from(e: BusError) -> Self {
        Self::Bus(e)
    }
}

impl From<DefinitionsError> for ServerError {
    fn from(e: DefinitionsError) -> Self {
        Self::Definitions(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_error_displays_with_wrapping_context() {
        let err = ServerError::from(EngineError::MalformedFrame);
        assert_eq!(err.to_string(), "engine error: frame payload shorter than 4 bytes");
    }
}
