//! Local view of a tunnel for an actor holding its secret.
//!
//! A session derives the tunnel id and key once, seals outgoing payloads
//! into [`Message`]s and opens incoming ones. Messages that fail to decrypt
//! are not ours to read and are skipped.

use chrono::Utc;

use crate::constants::MAX_PLAINTEXT_SIZE;
use crate::crypto::{self, TunnelKey};
use crate::error::{CryptoError, KongossaError};
use crate::identity::{Secret, TunnelId};
use crate::types::{ContentType, Message, MessageId};

pub struct TunnelSession {
    tunnel_id: TunnelId,
    key: TunnelKey,
    author: String,
}

/// A message this session could decrypt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedMessage {
    pub id: MessageId,
    pub author: String,
    pub content_type: ContentType,
    pub plaintext: Vec<u8>,
    pub created_at: chrono::DateTime<Utc>,
}

impl TunnelSession {
    /// Validate the secret and derive the tunnel credentials.
    pub fn open(secret: &str, author: impl Into<String>) -> Result<Self, KongossaError> {
        let secret = Secret::new(secret)?;
        Ok(Self::from_secret(&secret, author))
    }

    pub fn from_secret(secret: &Secret, author: impl Into<String>) -> Self {
        Self {
            tunnel_id: TunnelId::from_secret(secret),
            key: crypto::derive_key(secret),
            author: author.into(),
        }
    }

    pub fn tunnel_id(&self) -> &TunnelId {
        &self.tunnel_id
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    /// Encrypt a payload into a new message split into `fragments` pieces.
    pub fn seal(
        &self,
        content_type: ContentType,
        plaintext: &[u8],
        fragments: usize,
    ) -> Result<Message, CryptoError> {
        if plaintext.len() > MAX_PLAINTEXT_SIZE {
            return Err(CryptoError::EncryptionFailed);
        }
        let fragments = crypto::encrypt_fragments(&self.key, plaintext, fragments)?;
        Ok(Message {
            id: MessageId::new(),
            author: self.author.clone(),
            content_type,
            fragments,
            created_at: Utc::now(),
        })
    }

    pub fn seal_text(&self, text: &str) -> Result<Message, CryptoError> {
        self.seal(ContentType::text(), text.as_bytes(), 1)
    }

    pub fn open_message(&self, message: &Message) -> Result<OpenedMessage, CryptoError> {
        let plaintext = crypto::decrypt_fragments(&self.key, &message.fragments)?;
        Ok(OpenedMessage {
            id: message.id.clone(),
            author: message.author.clone(),
            content_type: message.content_type.clone(),
            plaintext,
            created_at: message.created_at,
        })
    }

    /// Decrypt what can be decrypted, newest first.
    pub fn read<'a>(&self, messages: impl IntoIterator<Item = &'a Message>) -> Vec<OpenedMessage> {
        let mut opened: Vec<OpenedMessage> = messages
            .into_iter()
            .filter_map(|m| self.open_message(m).ok())
            .collect();
        opened.sort_by(|a, b| (b.created_at, &b.id).cmp(&(a.created_at, &a.id)));
        opened
    }
}

impl std::fmt::Debug for TunnelSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelSession")
            .field("tunnel_id", &self.tunnel_id)
            .field("author", &self.author)
            .finish_non_exhaustive()
    }
}
