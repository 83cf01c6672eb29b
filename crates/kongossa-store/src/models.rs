//! Domain model structs owned by the store.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use kongossa_shared::{Message, TunnelId};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Merge strategy
// ---------------------------------------------------------------------------

/// How a remote tunnel snapshot is folded into the local one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    /// Insert every remote message whose id is unseen. Never loses messages.
    #[default]
    Union,
    /// Replace the local tunnel wholesale when the remote version is higher.
    /// Lossy: concurrent local messages disappear.
    Version,
}

impl FromStr for MergeStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "union" => Ok(Self::Union),
            "version" | "version-wins" => Ok(Self::Version),
            other => Err(format!("unknown merge strategy: {other}")),
        }
    }
}

/// Result of folding one remote tunnel into local state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeOutcome {
    /// Messages whose id was not present locally before the merge.
    pub inserted: usize,
    /// Messages dropped by the retention limit.
    pub evicted: usize,
    /// `true` when version-wins replaced the local tunnel.
    pub replaced: bool,
    pub version_before: u64,
    pub version_after: u64,
}

impl MergeOutcome {
    pub fn changed(&self) -> bool {
        self.inserted > 0 || self.replaced || self.version_before != self.version_after
    }
}

/// Result of a local append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AppendOutcome {
    pub version: u64,
    /// Messages dropped by the retention limit, possibly the new one.
    pub evicted: usize,
    /// `false` when the appended message was older than everything kept in a
    /// full tunnel and was evicted straight away.
    pub retained: bool,
}

// ---------------------------------------------------------------------------
// Tunnel record
// ---------------------------------------------------------------------------

/// Persisted form of a tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelRecord {
    pub id: TunnelId,
    pub version: u64,
    /// Oldest first.
    pub messages: Vec<Message>,
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// A directed edge to a peer whose exposed state this node pulls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Normalized peer base URL (no trailing slash).
    pub peer_url: String,
    pub added_at: DateTime<Utc>,
    /// Last successful fetch; `None` until the peer answers once.
    pub last_seen: Option<DateTime<Utc>>,
}

impl Subscription {
    pub fn new(peer_url: impl Into<String>) -> Self {
        Self {
            peer_url: peer_url.into(),
            added_at: Utc::now(),
            last_seen: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Import stats
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ImportStats {
    pub messages_read: usize,
    pub messages_imported: usize,
    pub version: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_strategy_parse() {
        assert_eq!("union".parse::<MergeStrategy>().unwrap(), MergeStrategy::Union);
        assert_eq!(" Version ".parse::<MergeStrategy>().unwrap(), MergeStrategy::Version);
        assert!("lww".parse::<MergeStrategy>().is_err());
    }
}
