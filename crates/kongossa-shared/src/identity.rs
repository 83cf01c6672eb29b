use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::constants::{MIN_SECRET_LEN, TUNNEL_ID_HEX_LEN};
use crate::error::{SecretError, WireError};

/// A tunnel secret shared out-of-band. Lives only in memory; never
/// serialized and redacted from `Debug`.
#[derive(Clone)]
pub struct Secret(String);

impl Secret {
    /// Validate a user-supplied secret before anything is derived from it.
    pub fn new(raw: impl Into<String>) -> Result<Self, SecretError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(SecretError::Empty);
        }
        let len = raw.chars().count();
        if len < MIN_SECRET_LEN {
            return Err(SecretError::TooShort {
                len,
                min: MIN_SECRET_LEN,
            });
        }
        Ok(Self(raw))
    }

    pub(crate) fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(..)")
    }
}

/// Public identifier of a tunnel: SHA-256 of the secret, first
/// [`TUNNEL_ID_HEX_LEN`] lowercase hex chars.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TunnelId(String);

impl TunnelId {
    pub fn from_secret(secret: &Secret) -> Self {
        let digest = Sha256::digest(secret.expose().as_bytes());
        let mut id = hex::encode(digest);
        id.truncate(TUNNEL_ID_HEX_LEN);
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        &self.0[..8]
    }
}

impl FromStr for TunnelId {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let well_formed = s.len() == TUNNEL_ID_HEX_LEN
            && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        if !well_formed {
            return Err(WireError::InvalidTunnelId(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for TunnelId {
    type Error = WireError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<TunnelId> for String {
    fn from(id: TunnelId) -> Self {
        id.0
    }
}

impl std::fmt::Display for TunnelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
