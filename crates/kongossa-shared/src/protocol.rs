//! JSON wire format exchanged between nodes.
//!
//! Everything here is ciphertext plus routing metadata. Peer input is
//! validated as a whole: one bad envelope rejects the entire payload.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::WireError;
use crate::identity::TunnelId;
use crate::types::{ContentType, Message, MessageId, NodeId};

const MAX_ID_LEN: usize = 128;
const MAX_USER_LEN: usize = 64;

/// A message as it travels on the wire and in backups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEnvelope {
    pub id: String,
    pub user: String,
    #[serde(rename = "type")]
    pub content_type: String,
    /// Single base64 ciphertext (older peers).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Ordered base64 fragments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub f: Option<Vec<String>>,
    /// Unix epoch seconds (fractional allowed).
    pub ts: f64,
}

impl From<&Message> for WireEnvelope {
    fn from(m: &Message) -> Self {
        Self {
            id: m.id.0.clone(),
            user: m.author.clone(),
            content_type: m.content_type.to_string(),
            data: None,
            f: Some(m.fragments.iter().map(|f| STANDARD.encode(f)).collect()),
            ts: m.created_at.timestamp_millis() as f64 / 1000.0,
        }
    }
}

impl TryFrom<WireEnvelope> for Message {
    type Error = WireError;

    fn try_from(env: WireEnvelope) -> Result<Self, Self::Error> {
        let malformed = |reason: &str| WireError::MalformedEnvelope {
            id: env.id.chars().take(MAX_ID_LEN).collect(),
            reason: reason.to_string(),
        };

        if env.id.is_empty() || env.id.len() > MAX_ID_LEN {
            return Err(malformed("id must be 1..=128 bytes"));
        }
        if env.user.is_empty() || env.user.len() > MAX_USER_LEN {
            return Err(malformed("user must be 1..=64 bytes"));
        }
        let content_type: ContentType = env.content_type.parse()?;

        let encoded: Vec<&String> = match (&env.data, &env.f) {
            (Some(data), None) => vec![data],
            (None, Some(list)) if !list.is_empty() => list.iter().collect(),
            (None, Some(_)) => return Err(malformed("empty fragment list")),
            (Some(_), Some(_)) => return Err(malformed("both data and f present")),
            (None, None) => return Err(malformed("missing ciphertext")),
        };
        let mut fragments = Vec::with_capacity(encoded.len());
        for piece in encoded {
            let bytes = STANDARD
                .decode(piece)
                .map_err(|_| malformed("fragment is not base64"))?;
            fragments.push(bytes);
        }

        let created_at = timestamp_from_secs(env.ts).ok_or_else(|| malformed("invalid ts"))?;

        Ok(Message {
            id: MessageId(env.id),
            author: env.user,
            content_type,
            fragments,
            created_at,
        })
    }
}

fn timestamp_from_secs(ts: f64) -> Option<DateTime<Utc>> {
    if !ts.is_finite() || ts < 0.0 {
        return None;
    }
    let millis = (ts * 1000.0).round();
    if millis > i64::MAX as f64 {
        return None;
    }
    Utc.timestamp_millis_opt(millis as i64).single()
}

/// One tunnel as exposed by a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunnelSnapshot {
    pub version: u64,
    pub messages: Vec<WireEnvelope>,
}

/// Body of `GET ?api=state` for a node exposing all of its tunnels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    #[serde(rename = "ID")]
    pub node_id: NodeId,
    #[serde(rename = "TUNNELS")]
    pub tunnels: BTreeMap<TunnelId, TunnelSnapshot>,
}

/// Body served by single-profile peers: one author, one tunnel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSnapshot {
    pub user: String,
    #[serde(rename = "tunnelId")]
    pub tunnel_id: TunnelId,
    pub posts: Vec<WireEnvelope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

/// Any state body a peer may answer with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PeerPayload {
    Node(NodeSnapshot),
    Profile(ProfileSnapshot),
}

/// A validated remote tunnel, ready to merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTunnel {
    pub tunnel_id: TunnelId,
    pub version: u64,
    pub messages: Vec<Message>,
}

impl RemoteTunnel {
    pub fn from_envelopes(
        tunnel_id: TunnelId,
        version: u64,
        envelopes: Vec<WireEnvelope>,
    ) -> Result<Self, WireError> {
        let messages = envelopes
            .into_iter()
            .map(Message::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            tunnel_id,
            version,
            messages,
        })
    }
}

impl PeerPayload {
    pub fn parse(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    /// Validate every envelope and normalize to per-tunnel snapshots.
    /// All or nothing.
    pub fn into_tunnels(self) -> Result<Vec<RemoteTunnel>, WireError> {
        match self {
            PeerPayload::Node(node) => node
                .tunnels
                .into_iter()
                .map(|(id, snap)| RemoteTunnel::from_envelopes(id, snap.version, snap.messages))
                .collect(),
            PeerPayload::Profile(profile) => {
                let version = profile.version.unwrap_or(profile.posts.len() as u64);
                let tunnel = RemoteTunnel::from_envelopes(profile.tunnel_id, version, profile.posts)?;
                Ok(vec![tunnel])
            }
        }
    }
}
