//! The node's lifecycle-scoped state: built once at startup, shared with
//! the HTTP layer and the sync driver, dropped on shutdown.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use kongossa_store::{Database, MessageStore, PresenceTracker, SqliteBackend, TunnelBackend};
use kongossa_sync::{
    ActivityClocks, ActivityConfig, HttpFetcher, PeerFetcher, SyncConfig, SyncDriver, SyncEngine,
};
use tracing::{info, warn};

use crate::config::NodeConfig;

/// How often the driver wakes up. Matches the fastest refresh interval.
const DRIVER_TICK: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct Node {
    pub config: Arc<NodeConfig>,
    pub store: Arc<MessageStore>,
    pub presence: PresenceTracker,
    pub engine: Arc<SyncEngine>,
    pub started_at: Instant,
}

impl Node {
    /// Wire the components together. Nothing is loaded or polled yet.
    pub fn new(
        config: NodeConfig,
        backend: Option<Arc<dyn TunnelBackend>>,
        fetcher: Arc<dyn PeerFetcher>,
    ) -> Self {
        let mut store = MessageStore::new(config.tunnel_capacity, config.merge_strategy);
        if let Some(backend) = &backend {
            store = store.with_backend(backend.clone());
        }
        let store = Arc::new(store);

        let clocks = ActivityClocks::new(ActivityConfig {
            mode: config.activity_mode,
            ..ActivityConfig::default()
        });

        let mut engine = SyncEngine::new(
            store.clone(),
            clocks,
            fetcher,
            SyncConfig {
                peer_timeout: config.peer_timeout,
                max_concurrent: config.max_concurrent_fetches,
                ..SyncConfig::default()
            },
        );
        if let Some(backend) = backend {
            engine = engine.with_backend(backend);
        }

        Self {
            config: Arc::new(config),
            store,
            presence: PresenceTracker::new(),
            engine: Arc::new(engine),
            started_at: Instant::now(),
        }
    }

    /// Build a node from configuration: open storage, restore state and
    /// register the configured peers. Storage failures are fatal.
    pub async fn open(config: NodeConfig) -> anyhow::Result<Self> {
        let backend: Option<Arc<dyn TunnelBackend>> = match &config.db_path {
            Some(path) => {
                let db = Database::open_at(path)
                    .with_context(|| format!("failed to open database at {}", path.display()))?;
                info!(path = %path.display(), "opened database");
                Some(Arc::new(SqliteBackend::new(db)))
            }
            None => {
                info!("no DB_PATH configured, state is in-memory only");
                None
            }
        };

        let fetcher = Arc::new(HttpFetcher::new(config.peer_timeout)?);
        let node = Self::new(config, backend, fetcher);

        node.store.restore().await.context("failed to restore tunnels")?;
        node.engine
            .restore_subscriptions()
            .await
            .context("failed to restore subscriptions")?;

        for peer in &node.config.peers {
            if let Err(e) = node.engine.subscribe(peer).await {
                warn!(peer = %peer, error = %e, "ignoring configured peer");
            }
        }

        Ok(node)
    }

    pub fn driver(&self) -> SyncDriver {
        SyncDriver::new(
            self.engine.clone(),
            self.presence.clone(),
            self.config.presence_ttl,
            DRIVER_TICK,
        )
    }

    pub fn presence_ttl(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.presence_ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(30))
    }
}
