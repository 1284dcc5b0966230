//! Storage error types.

use std::fmt;

/// Errors that can occur during persistence operations.
#[derive(Debug)]
pub enum StorageError {
    /// Underlying database I/O failed.
    ///
    /// May be transient (disk contention) or fatal (disk full, permissions).
    /// The in-memory inventory remains authoritative; the caller logs and
    /// continues per the persistence-failure policy.
    Io(String),

    /// A table open or transaction commit failed at the `redb` layer.
    ///
    /// Distinct from `Io` because `redb` reports this as a structured
    /// error rather than a raw I/O failure.
    Database(String),

    /// CBOR encode/decode of a stored value failed.
    ///
    /// Indicates a schema mismatch between what was written and what is
    /// being read back, or corruption. Fatal for that row.
    Serialization(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(msg) => write!(f, "storage I/O error: {msg}"),
            Self::Database(msg) => write!(f, "database error: {msg}"),
            Self::Serialization(msg) => write!(f, "serialization error: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
