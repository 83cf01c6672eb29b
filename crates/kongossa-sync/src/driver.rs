//! The node's periodic driver: one task that closes the
//! presence/churn → activity → polling loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kongossa_store::{MessageStore, PresenceTracker};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::engine::{PollReport, SyncEngine};

/// Passes between two presence garbage collections.
const PURGE_EVERY: u64 = 60;

pub struct SyncDriver {
    engine: Arc<SyncEngine>,
    presence: PresenceTracker,
    presence_ttl: chrono::Duration,
    tick: Duration,
    passes: u64,
}

impl SyncDriver {
    /// `tick` is how often the driver wakes up; the engine's own gate
    /// decides whether a wake-up turns into a poll.
    pub fn new(
        engine: Arc<SyncEngine>,
        presence: PresenceTracker,
        presence_ttl: Duration,
        tick: Duration,
    ) -> Self {
        Self {
            engine,
            presence,
            presence_ttl: chrono::Duration::from_std(presence_ttl)
                .unwrap_or_else(|_| chrono::Duration::seconds(30)),
            tick,
            passes: 0,
        }
    }

    fn store(&self) -> &Arc<MessageStore> {
        self.engine.store()
    }

    /// Feed churn and presence into the activity clocks, then poll.
    pub async fn run_once(&mut self) -> PollReport {
        let clocks = self.engine.clocks();

        let churn = self.store().drain_churn().await;
        clocks.record_churn(&churn).await;

        let present = self.presence.active_counts_at(self.presence_ttl, Utc::now()).await;
        clocks.step_all(Instant::now(), &present).await;

        self.passes = self.passes.wrapping_add(1);
        if self.passes % PURGE_EVERY == 0 {
            self.presence.purge_stale(self.presence_ttl).await;
        }

        self.engine.poll_once().await
    }

    /// Run until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(tick_ms = self.tick.as_millis() as u64, "sync driver started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.run_once().await;
                    if !report.skipped && report.polled > 0 {
                        debug!(
                            polled = report.polled,
                            succeeded = report.succeeded,
                            failed = report.failed,
                            inserted = report.inserted,
                            "sync pass complete"
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("sync driver stopped");
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kongossa_shared::{PeerPayload, TunnelId};
    use kongossa_store::MergeStrategy;

    use crate::activity::{ActivityClocks, ActivityConfig};
    use crate::engine::SyncConfig;
    use crate::error::{Result, SyncError};
    use crate::fetch::PeerFetcher;

    struct Unreachable;

    #[async_trait]
    impl PeerFetcher for Unreachable {
        async fn fetch_state(&self, peer_url: &str) -> Result<PeerPayload> {
            Err(SyncError::PeerUnreachable {
                url: peer_url.to_string(),
                reason: "offline".to_string(),
            })
        }
    }

    fn driver() -> (SyncDriver, PresenceTracker) {
        let store = Arc::new(MessageStore::new(10, MergeStrategy::Union));
        let engine = Arc::new(SyncEngine::new(
            store,
            ActivityClocks::new(ActivityConfig::default()),
            Arc::new(Unreachable),
            SyncConfig::default(),
        ));
        let presence = PresenceTracker::new();
        let driver = SyncDriver::new(
            engine,
            presence.clone(),
            Duration::from_secs(30),
            Duration::from_millis(10),
        );
        (driver, presence)
    }

    #[tokio::test]
    async fn test_run_once_creates_clock_for_present_tunnel() {
        let (mut driver, presence) = driver();
        let tunnel: TunnelId = "1d5fa7b32c7096501b6c".parse().unwrap();
        presence.heartbeat("ada", &tunnel).await;

        driver.run_once().await;
        let state = driver.engine.clocks().state(&tunnel).await.unwrap();
        assert_eq!(state.tick, 1);
        assert!(state.rho > 0.0);
    }

    fn message(id: &str) -> kongossa_shared::Message {
        kongossa_shared::Message {
            id: kongossa_shared::MessageId(id.to_string()),
            author: "nze".to_string(),
            content_type: kongossa_shared::ContentType::text(),
            fragments: vec![vec![3; 48]],
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_local_and_merged_messages_weigh_the_same() {
        let tunnel: TunnelId = "1d5fa7b32c7096501b6c".parse().unwrap();

        let (mut local, _) = driver();
        local.store().append(&tunnel, message("l1")).await.unwrap();
        local.engine.clocks().nudge(&tunnel).await;
        local.run_once().await;

        let (mut merged, _) = driver();
        merged
            .store()
            .merge_remote(&kongossa_shared::RemoteTunnel {
                tunnel_id: tunnel.clone(),
                version: 1,
                messages: vec![message("r1")],
            })
            .await;
        merged.run_once().await;

        let local_rho = local.engine.clocks().state(&tunnel).await.unwrap().rho;
        let merged_rho = merged.engine.clocks().state(&tunnel).await.unwrap().rho;
        assert!(local_rho > 0.0);
        assert_eq!(local_rho, merged_rho);
    }

    #[tokio::test]
    async fn test_failed_peer_keeps_subscription() {
        let (mut driver, _) = driver();
        driver.engine.subscribe("http://10.0.0.9:8080").await.unwrap();

        let report = driver.run_once().await;
        assert_eq!(report.polled, 1);
        assert_eq!(report.failed, 1);

        let subs = driver.engine.subscriptions().await;
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].failures, 1);
        assert!(subs[0].last_seen.is_none());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (driver, _) = driver();
        let (tx, rx) = watch::channel(false);
        let handle = driver.spawn(rx);
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
