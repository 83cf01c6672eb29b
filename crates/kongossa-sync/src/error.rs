use kongossa_store::StoreError;
use thiserror::Error;

/// Errors produced by the sync layer. Peer failures are reported to the
/// engine, which keeps the subscription and retries later.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Invalid peer URL: {0}")]
    InvalidPeerUrl(String),

    #[error("Peer {url} unreachable: {reason}")]
    PeerUnreachable { url: String, reason: String },

    #[error("Peer {url} timed out")]
    PeerTimeout { url: String },

    /// The whole response is discarded.
    #[error("Malformed payload from {url}: {reason}")]
    MalformedPeerPayload { url: String, reason: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, SyncError>;
