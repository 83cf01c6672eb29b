use thiserror::Error;

#[derive(Error, Debug)]
pub enum KongossaError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Invalid secret: {0}")]
    Secret(#[from] SecretError),

    #[error("Wire format error: {0}")]
    Wire(#[from] WireError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,

    #[error("Key derivation failed")]
    KeyDerivationFailed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecretError {
    #[error("Secret is empty")]
    Empty,

    #[error("Secret too short: {len} chars (min {min})")]
    TooShort { len: usize, min: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("Invalid tunnel id: {0}")]
    InvalidTunnelId(String),

    #[error("Invalid content type: {0}")]
    InvalidContentType(String),

    #[error("Malformed envelope {id}: {reason}")]
    MalformedEnvelope { id: String, reason: String },

    #[error("Invalid share link: {0}")]
    InvalidShareLink(String),
}
