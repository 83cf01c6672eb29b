//! Pluggable persistence behind the in-memory store.

use std::sync::Mutex;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Subscription, TunnelRecord};

/// Durable storage for tunnels and subscriptions. Only ciphertext ever
/// reaches a backend.
pub trait TunnelBackend: Send + Sync {
    fn save_tunnel(&self, record: &TunnelRecord) -> Result<()>;

    fn load_tunnels(&self) -> Result<Vec<TunnelRecord>>;

    fn save_subscription(&self, subscription: &Subscription) -> Result<()>;

    /// Returns `true` when a stored subscription was removed.
    fn delete_subscription(&self, peer_url: &str) -> Result<bool>;

    fn load_subscriptions(&self) -> Result<Vec<Subscription>>;
}

/// [`TunnelBackend`] over a SQLite [`Database`].
pub struct SqliteBackend {
    db: Mutex<Database>,
}

impl SqliteBackend {
    pub fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    fn with_db<T>(&self, f: impl FnOnce(&mut Database) -> Result<T>) -> Result<T> {
        let mut db = self.db.lock().map_err(|_| StoreError::LockPoisoned)?;
        f(&mut db)
    }
}

impl TunnelBackend for SqliteBackend {
    fn save_tunnel(&self, record: &TunnelRecord) -> Result<()> {
        self.with_db(|db| db.save_tunnel(record))
    }

    fn load_tunnels(&self) -> Result<Vec<TunnelRecord>> {
        self.with_db(|db| db.load_tunnels())
    }

    fn save_subscription(&self, subscription: &Subscription) -> Result<()> {
        self.with_db(|db| db.upsert_subscription(subscription))
    }

    fn delete_subscription(&self, peer_url: &str) -> Result<bool> {
        self.with_db(|db| db.delete_subscription(peer_url))
    }

    fn load_subscriptions(&self) -> Result<Vec<Subscription>> {
        self.with_db(|db| db.list_subscriptions())
    }
}
