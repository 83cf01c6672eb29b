//! # kongossa-shared
//!
//! Primitives shared by every Kongossa node: tunnel identity and key
//! derivation, authenticated fragmentable encryption, the message model and
//! the JSON wire protocol.

pub mod constants;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod protocol;
pub mod session;
pub mod types;

pub use crypto::{Fragment, TunnelKey};
pub use error::{CryptoError, KongossaError, SecretError, WireError};
pub use identity::{Secret, TunnelId};
pub use protocol::{NodeSnapshot, PeerPayload, RemoteTunnel, TunnelSnapshot, WireEnvelope};
pub use session::{OpenedMessage, TunnelSession};
pub use types::{ContentType, Message, MessageId, MessageKind, NodeId};
