//! # kongossa-store
//!
//! Local state of a Kongossa node: the per-tunnel message log with its merge
//! strategies and retention limit, participant presence, backup
//! export/import, and an optional SQLite backend that keeps ciphertext
//! across restarts.

pub mod backend;
pub mod backup;
pub mod database;
pub mod migrations;
pub mod models;
pub mod presence;
pub mod store;
pub mod subscriptions;
pub mod tunnel;
pub mod tunnels;

mod error;

pub use backend::{SqliteBackend, TunnelBackend};
pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
pub use presence::PresenceTracker;
pub use store::MessageStore;
pub use tunnel::Tunnel;
