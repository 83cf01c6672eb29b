use kongossa_shared::{MessageId, TunnelId, WireError};
use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error from the persistence backend.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// JSON encoding or decoding failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored or imported envelope failed validation.
    #[error("Invalid envelope: {0}")]
    Wire(#[from] WireError),

    /// A local append reused an id already present in the tunnel.
    #[error("Duplicate message id: {0}")]
    DuplicateMessage(MessageId),

    #[error("Unknown tunnel: {0}")]
    UnknownTunnel(TunnelId),

    /// A thread panicked while holding the backend lock.
    #[error("Backend lock poisoned")]
    LockPoisoned,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
