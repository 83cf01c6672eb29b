//! Pull-based gossip: poll subscribed peers and merge what they expose.
//!
//! A single scan timestamp gates the whole pass at the activity-driven
//! refresh interval. Inside a pass every due peer is fetched concurrently
//! (bounded pool, hard per-peer timeout) and each response is merged all or
//! nothing. Failing peers stay subscribed and, once they fail twice in a
//! row, back off exponentially.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use kongossa_shared::constants::{MAX_TUNNELS_PER_PEER, PEER_TIMEOUT_SECS};
use kongossa_shared::PeerPayload;
use kongossa_store::{MessageStore, Subscription, TunnelBackend};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::activity::ActivityClocks;
use crate::error::{Result, SyncError};
use crate::fetch::PeerFetcher;
use crate::link::normalize_peer_url;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Hard limit on a single peer fetch.
    pub peer_timeout: Duration,
    /// Maximum number of fetches in flight during one pass.
    pub max_concurrent: usize,
    /// Upper bound of the backoff multiplier applied to failing peers.
    pub max_backoff: u32,
    /// A peer advertising more tunnels than this is rejected whole.
    pub max_tunnels_per_peer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            peer_timeout: Duration::from_secs(PEER_TIMEOUT_SECS),
            max_concurrent: 8,
            max_backoff: 16,
            max_tunnels_per_peer: MAX_TUNNELS_PER_PEER,
        }
    }
}

// ---------------------------------------------------------------------------
// Per-peer state
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct PeerState {
    subscription: Subscription,
    last_poll: Option<Instant>,
    in_flight: Arc<AtomicBool>,
    failures: u32,
}

impl PeerState {
    fn new(subscription: Subscription) -> Self {
        Self {
            subscription,
            last_poll: None,
            in_flight: Arc::new(AtomicBool::new(false)),
            failures: 0,
        }
    }

    fn in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// A single failure keeps the regular cadence; from the second
    /// consecutive failure on the interval doubles, up to `max`.
    fn backoff(&self, max: u32) -> u32 {
        if self.failures < 2 {
            return 1;
        }
        2u32.saturating_pow((self.failures - 1).min(16)).min(max.max(1))
    }

    fn is_due(&self, now: Instant, interval: Duration, max_backoff: u32) -> bool {
        if self.in_flight() {
            return false;
        }
        match self.last_poll {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= interval * self.backoff(max_backoff),
        }
    }

    fn claim(&mut self, now: Instant) -> InFlight {
        self.in_flight.store(true, Ordering::Release);
        self.last_poll = Some(now);
        InFlight(self.in_flight.clone())
    }
}

/// Marks a peer as being fetched. Dropping it, even when the pass itself is
/// cancelled, frees the peer for the next pass.
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Health of one subscription, as reported to the local admin.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionStatus {
    pub peer_url: String,
    pub added_at: DateTime<Utc>,
    pub last_seen: Option<DateTime<Utc>>,
    pub failures: u32,
    pub in_flight: bool,
}

/// Summary of one [`SyncEngine::poll_once`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollReport {
    /// The global gate had not elapsed; nothing was fetched.
    pub skipped: bool,
    pub polled: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// New messages merged across all peers.
    pub inserted: usize,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct SyncEngine {
    store: Arc<MessageStore>,
    clocks: ActivityClocks,
    fetcher: Arc<dyn PeerFetcher>,
    backend: Option<Arc<dyn TunnelBackend>>,
    config: SyncConfig,
    peers: Mutex<BTreeMap<String, PeerState>>,
    last_pass: Mutex<Option<Instant>>,
}

impl SyncEngine {
    pub fn new(
        store: Arc<MessageStore>,
        clocks: ActivityClocks,
        fetcher: Arc<dyn PeerFetcher>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            clocks,
            fetcher,
            backend: None,
            config,
            peers: Mutex::new(BTreeMap::new()),
            last_pass: Mutex::new(None),
        }
    }

    /// Persist subscriptions to `backend`.
    pub fn with_backend(mut self, backend: Arc<dyn TunnelBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn store(&self) -> &Arc<MessageStore> {
        &self.store
    }

    pub fn clocks(&self) -> &ActivityClocks {
        &self.clocks
    }

    /// Subscribe to a peer. Idempotent by normalized URL; returns `true` when
    /// the subscription is new.
    pub async fn subscribe(&self, peer_url: &str) -> Result<bool> {
        let url = normalize_peer_url(peer_url)?;
        let mut peers = self.peers.lock().await;
        if peers.contains_key(&url) {
            debug!(peer = %url, "already subscribed");
            return Ok(false);
        }

        let subscription = Subscription::new(url.clone());
        self.persist(&subscription).await;
        peers.insert(url.clone(), PeerState::new(subscription));
        info!(peer = %url, "subscribed to peer");
        Ok(true)
    }

    /// Drop a subscription. Returns `false` when the peer was not subscribed.
    /// A fetch already under way finishes but its result is ignored.
    pub async fn unsubscribe(&self, peer_url: &str) -> Result<bool> {
        let url = normalize_peer_url(peer_url)?;
        let removed = self.peers.lock().await.remove(&url).is_some();
        if !removed {
            return Ok(false);
        }

        if let Some(backend) = self.backend.clone() {
            let target = url.clone();
            match tokio::task::spawn_blocking(move || backend.delete_subscription(&target)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!(peer = %url, error = %e, "failed to forget subscription"),
                Err(e) => warn!(peer = %url, error = %e, "subscription delete task failed"),
            }
        }
        info!(peer = %url, "unsubscribed from peer");
        Ok(true)
    }

    /// Load persisted subscriptions. Returns how many were restored.
    pub async fn restore_subscriptions(&self) -> Result<usize> {
        let Some(backend) = &self.backend else {
            return Ok(0);
        };
        let subscriptions = backend.load_subscriptions()?;
        let count = subscriptions.len();
        let mut peers = self.peers.lock().await;
        for subscription in subscriptions {
            peers
                .entry(subscription.peer_url.clone())
                .or_insert_with(|| PeerState::new(subscription));
        }
        info!(count, "restored subscriptions from storage");
        Ok(count)
    }

    pub async fn subscriptions(&self) -> Vec<SubscriptionStatus> {
        self.peers
            .lock()
            .await
            .values()
            .map(|p| SubscriptionStatus {
                peer_url: p.subscription.peer_url.clone(),
                added_at: p.subscription.added_at,
                last_seen: p.subscription.last_seen,
                failures: p.failures,
                in_flight: p.in_flight(),
            })
            .collect()
    }

    /// Run one pass if the global gate has elapsed.
    pub async fn poll_once(&self) -> PollReport {
        self.poll_once_at(Instant::now()).await
    }

    /// [`poll_once`](Self::poll_once) with an explicit clock reading.
    pub async fn poll_once_at(&self, now: Instant) -> PollReport {
        let interval = self.clocks.recommended_interval().await;

        {
            let mut last_pass = self.last_pass.lock().await;
            if let Some(last) = *last_pass {
                if now.saturating_duration_since(last) < interval {
                    return PollReport {
                        skipped: true,
                        ..PollReport::default()
                    };
                }
            }
            *last_pass = Some(now);
        }

        let due: Vec<(String, InFlight)> = {
            let mut peers = self.peers.lock().await;
            peers
                .iter_mut()
                .filter(|(_, p)| p.is_due(now, interval, self.config.max_backoff))
                .map(|(url, p)| (url.clone(), p.claim(now)))
                .collect()
        };

        let mut report = PollReport {
            polled: due.len(),
            ..PollReport::default()
        };
        if due.is_empty() {
            return report;
        }

        debug!(peers = due.len(), interval_ms = interval.as_millis() as u64, "polling peers");

        let timeout = self.config.peer_timeout;
        let results: Vec<(String, Result<PeerPayload>, InFlight)> = stream::iter(due)
            .map(|(url, guard)| async move {
                let result = match tokio::time::timeout(timeout, self.fetcher.fetch_state(&url)).await {
                    Ok(result) => result,
                    Err(_) => Err(SyncError::PeerTimeout { url: url.clone() }),
                };
                (url, result, guard)
            })
            .buffer_unordered(self.config.max_concurrent.max(1))
            .collect()
            .await;

        for (url, result, guard) in results {
            let applied = self.apply(&url, result).await;
            drop(guard);
            match applied {
                Ok(inserted) => {
                    report.succeeded += 1;
                    report.inserted += inserted;
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(peer = %url, error = %e, "peer poll failed");
                }
            }
        }

        report
    }

    async fn apply(&self, url: &str, result: Result<PeerPayload>) -> Result<usize> {
        let outcome = match result {
            Ok(payload) => payload
                .into_tunnels()
                .map_err(|e| SyncError::MalformedPeerPayload {
                    url: url.to_string(),
                    reason: e.to_string(),
                }),
            Err(e) => Err(e),
        };

        let outcome = outcome.and_then(|tunnels| {
            if tunnels.len() > self.config.max_tunnels_per_peer {
                return Err(SyncError::MalformedPeerPayload {
                    url: url.to_string(),
                    reason: format!(
                        "{} tunnels advertised, limit is {}",
                        tunnels.len(),
                        self.config.max_tunnels_per_peer
                    ),
                });
            }
            Ok(tunnels)
        });

        let tunnels = match outcome {
            Ok(tunnels) => tunnels,
            Err(e) => {
                let mut peers = self.peers.lock().await;
                if let Some(peer) = peers.get_mut(url) {
                    peer.failures = peer.failures.saturating_add(1);
                }
                return Err(e);
            }
        };

        let mut inserted = 0;
        for tunnel in &tunnels {
            inserted += self.store.merge_remote(tunnel).await.inserted;
        }

        let mut peers = self.peers.lock().await;
        if let Some(peer) = peers.get_mut(url) {
            peer.failures = 0;
            peer.subscription.last_seen = Some(Utc::now());
            self.persist(&peer.subscription).await;
        }

        debug!(peer = %url, tunnels = tunnels.len(), inserted, "merged peer state");
        Ok(inserted)
    }

    async fn persist(&self, subscription: &Subscription) {
        let Some(backend) = self.backend.clone() else {
            return;
        };
        let record = subscription.clone();
        match tokio::task::spawn_blocking(move || backend.save_subscription(&record)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(peer = %subscription.peer_url, error = %e, "failed to persist subscription")
            }
            Err(e) => warn!(peer = %subscription.peer_url, error = %e, "subscription save task failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> PeerState {
        PeerState::new(Subscription::new("http://peer"))
    }

    #[test]
    fn test_backoff_starts_after_second_failure() {
        let mut p = peer();
        assert_eq!(p.backoff(16), 1);
        p.failures = 1;
        assert_eq!(p.backoff(16), 1);
        p.failures = 2;
        assert_eq!(p.backoff(16), 2);
        p.failures = 4;
        assert_eq!(p.backoff(16), 8);
        p.failures = 10;
        assert_eq!(p.backoff(16), 16);
        p.failures = u32::MAX;
        assert_eq!(p.backoff(16), 16);
    }

    #[test]
    fn test_in_flight_peer_is_never_due() {
        let mut p = peer();
        let now = Instant::now();
        assert!(p.is_due(now, Duration::from_secs(7), 16));
        let guard = p.claim(now);
        assert!(!p.is_due(now + Duration::from_secs(60), Duration::from_secs(7), 16));
        drop(guard);
        assert!(p.is_due(now + Duration::from_secs(7), Duration::from_secs(7), 16));
    }

    #[test]
    fn test_due_respects_backoff() {
        let mut p = peer();
        let t0 = Instant::now();
        let interval = Duration::from_secs(1);
        p.last_poll = Some(t0);

        p.failures = 1;
        assert!(p.is_due(t0 + interval, interval, 16));

        p.failures = 3;
        assert!(!p.is_due(t0 + Duration::from_secs(3), interval, 16));
        assert!(p.is_due(t0 + Duration::from_secs(4), interval, 16));
    }
}
