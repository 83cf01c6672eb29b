use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::Fragment;
use crate::error::WireError;

/// Globally unique message token; the only dedup key during merge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Public identifier of a running node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn generate() -> Self {
        let raw = Uuid::new_v4();
        Self(format!("node-{}", &raw.simple().to_string()[..8]))
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Audio,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }
}

/// Wire `type` field: `"text"`, or a media kind with an optional mime
/// subtype (`"image"`, `"image/png"`, `"video/mp4"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentType {
    pub kind: MessageKind,
    pub subtype: Option<String>,
}

impl ContentType {
    pub fn text() -> Self {
        Self {
            kind: MessageKind::Text,
            subtype: None,
        }
    }

    pub fn media(kind: MessageKind, subtype: impl Into<String>) -> Self {
        Self {
            kind,
            subtype: Some(subtype.into()),
        }
    }
}

impl FromStr for ContentType {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || WireError::InvalidContentType(s.to_string());
        let (major, subtype) = match s.split_once('/') {
            Some((major, sub)) => (major, Some(sub)),
            None => (s, None),
        };
        let kind = match major {
            "text" => MessageKind::Text,
            "image" => MessageKind::Image,
            "video" => MessageKind::Video,
            "audio" => MessageKind::Audio,
            _ => return Err(invalid()),
        };
        let subtype = match subtype {
            None => None,
            Some(sub)
                if !sub.is_empty()
                    && sub.len() <= 64
                    && sub
                        .bytes()
                        .all(|b| b.is_ascii_alphanumeric() || b"+-.".contains(&b)) =>
            {
                Some(sub.to_string())
            }
            Some(_) => return Err(invalid()),
        };
        Ok(Self { kind, subtype })
    }
}

impl TryFrom<String> for ContentType {
    type Error = WireError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ContentType> for String {
    fn from(ct: ContentType) -> Self {
        ct.to_string()
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.subtype {
            Some(sub) => write!(f, "{}/{}", self.kind.as_str(), sub),
            None => f.write_str(self.kind.as_str()),
        }
    }
}

/// An immutable tunnel message. Content is always ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    /// Node or user name of the author, as they chose to present it.
    pub author: String,
    pub content_type: ContentType,
    /// `nonce || ciphertext`, possibly split for transport.
    pub fragments: Vec<Fragment>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        self.content_type.kind
    }

    /// Display/merge order: creation time, ties broken by id.
    pub fn order_key(&self) -> (DateTime<Utc>, &MessageId) {
        (self.created_at, &self.id)
    }
}
