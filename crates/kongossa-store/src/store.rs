//! The node's message store: one [`Tunnel`] per tunnel id, each behind its
//! own lock so appends and merges on different tunnels never contend.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use kongossa_shared::{Message, RemoteTunnel, TunnelId, TunnelSnapshot};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::backend::TunnelBackend;
use crate::error::Result;
use crate::models::{AppendOutcome, MergeOutcome, MergeStrategy};
use crate::tunnel::Tunnel;

pub struct MessageStore {
    tunnels: RwLock<HashMap<TunnelId, Arc<Mutex<Tunnel>>>>,
    capacity: usize,
    strategy: MergeStrategy,
    backend: Option<Arc<dyn TunnelBackend>>,
}

impl MessageStore {
    /// In-memory store with the given retention limit and network merge
    /// strategy.
    pub fn new(capacity: usize, strategy: MergeStrategy) -> Self {
        Self {
            tunnels: RwLock::new(HashMap::new()),
            capacity,
            strategy,
            backend: None,
        }
    }

    /// Write every mutation through to `backend`.
    pub fn with_backend(mut self, backend: Arc<dyn TunnelBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn strategy(&self) -> MergeStrategy {
        self.strategy
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Load persisted tunnels. Returns how many were restored.
    pub async fn restore(&self) -> Result<usize> {
        let Some(backend) = &self.backend else {
            return Ok(0);
        };
        let records = backend.load_tunnels()?;
        let count = records.len();
        let mut tunnels = self.tunnels.write().await;
        for record in records {
            let id = record.id.clone();
            let tunnel = Tunnel::from_record(record, self.capacity);
            tunnels.insert(id, Arc::new(Mutex::new(tunnel)));
        }
        info!(count, "restored tunnels from storage");
        Ok(count)
    }

    async fn tunnel(&self, id: &TunnelId) -> Option<Arc<Mutex<Tunnel>>> {
        self.tunnels.read().await.get(id).cloned()
    }

    async fn tunnel_or_create(&self, id: &TunnelId) -> Arc<Mutex<Tunnel>> {
        if let Some(tunnel) = self.tunnel(id).await {
            return tunnel;
        }
        let mut tunnels = self.tunnels.write().await;
        tunnels
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(Tunnel::new(id.clone(), self.capacity))))
            .clone()
    }

    /// Append a locally authored message.
    pub async fn append(&self, tunnel_id: &TunnelId, message: Message) -> Result<AppendOutcome> {
        let tunnel = self.tunnel_or_create(tunnel_id).await;
        let mut tunnel = tunnel.lock().await;
        let message_id = message.id.clone();
        let outcome = tunnel.append(message)?;
        self.persist(&tunnel).await;

        debug!(
            tunnel = %tunnel_id,
            message = %message_id,
            version = outcome.version,
            evicted = outcome.evicted,
            retained = outcome.retained,
            "appended message"
        );
        Ok(outcome)
    }

    /// Merge with the configured network strategy.
    pub async fn merge_remote(&self, remote: &RemoteTunnel) -> MergeOutcome {
        self.merge_remote_with(remote, self.strategy).await
    }

    /// The one merge routine used by network sync and backup import.
    pub async fn merge_remote_with(
        &self,
        remote: &RemoteTunnel,
        strategy: MergeStrategy,
    ) -> MergeOutcome {
        let tunnel = self.tunnel_or_create(&remote.tunnel_id).await;
        let mut tunnel = tunnel.lock().await;
        let outcome = tunnel.merge(remote, strategy);
        if outcome.changed() {
            self.persist(&tunnel).await;
            debug!(
                tunnel = %remote.tunnel_id,
                inserted = outcome.inserted,
                evicted = outcome.evicted,
                replaced = outcome.replaced,
                version = outcome.version_after,
                "merged remote tunnel"
            );
        }
        outcome
    }

    pub async fn version(&self, tunnel_id: &TunnelId) -> Option<u64> {
        let tunnel = self.tunnel(tunnel_id).await?;
        let version = tunnel.lock().await.version();
        Some(version)
    }

    /// Up to `limit` messages, newest first.
    pub async fn messages(&self, tunnel_id: &TunnelId, limit: usize) -> Vec<Message> {
        let Some(tunnel) = self.tunnel(tunnel_id).await else {
            return Vec::new();
        };
        let tunnel = tunnel.lock().await;
        tunnel.messages().rev().take(limit).cloned().collect()
    }

    pub async fn tunnel_snapshot(&self, tunnel_id: &TunnelId) -> Option<TunnelSnapshot> {
        let tunnel = self.tunnel(tunnel_id).await?;
        let snapshot = tunnel.lock().await.snapshot();
        Some(snapshot)
    }

    /// Ciphertext snapshot of every tunnel, as exposed to peers.
    pub async fn snapshot(&self) -> BTreeMap<TunnelId, TunnelSnapshot> {
        let handles: Vec<(TunnelId, Arc<Mutex<Tunnel>>)> = self
            .tunnels
            .read()
            .await
            .iter()
            .map(|(id, t)| (id.clone(), t.clone()))
            .collect();

        let mut out = BTreeMap::new();
        for (id, tunnel) in handles {
            out.insert(id, tunnel.lock().await.snapshot());
        }
        out
    }

    pub async fn tunnel_ids(&self) -> Vec<TunnelId> {
        let mut ids: Vec<TunnelId> = self.tunnels.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Per-tunnel count of messages inserted since the previous drain.
    pub async fn drain_churn(&self) -> HashMap<TunnelId, usize> {
        let handles: Vec<(TunnelId, Arc<Mutex<Tunnel>>)> = self
            .tunnels
            .read()
            .await
            .iter()
            .map(|(id, t)| (id.clone(), t.clone()))
            .collect();

        let mut churn = HashMap::with_capacity(handles.len());
        for (id, tunnel) in handles {
            churn.insert(id, tunnel.lock().await.take_churn());
        }
        churn
    }

    // Backend failures never fail the in-memory operation. The caller keeps
    // the tunnel locked, so writes of one tunnel land in order.
    async fn persist(&self, tunnel: &Tunnel) {
        let Some(backend) = self.backend.clone() else {
            return;
        };
        let record = tunnel.to_record();
        match tokio::task::spawn_blocking(move || backend.save_tunnel(&record)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(tunnel = %tunnel.id(), error = %e, "failed to persist tunnel"),
            Err(e) => warn!(tunnel = %tunnel.id(), error = %e, "tunnel save task failed"),
        }
    }
}
