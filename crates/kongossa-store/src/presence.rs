//! Time-to-live presence per tunnel.
//!
//! Records are upserted on heartbeat and filtered by age at read time.
//! Stale records are only dropped by [`PresenceTracker::purge_stale`].

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use kongossa_shared::TunnelId;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Clone, Default)]
pub struct PresenceTracker {
    records: Arc<Mutex<HashMap<TunnelId, HashMap<String, DateTime<Utc>>>>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn heartbeat(&self, participant: &str, tunnel: &TunnelId) {
        self.heartbeat_at(participant, tunnel, Utc::now()).await;
    }

    pub async fn heartbeat_at(&self, participant: &str, tunnel: &TunnelId, now: DateTime<Utc>) {
        let mut records = self.records.lock().await;
        records
            .entry(tunnel.clone())
            .or_default()
            .insert(participant.to_string(), now);
    }

    pub async fn active_participants(&self, tunnel: &TunnelId, ttl: Duration) -> BTreeSet<String> {
        self.active_participants_at(tunnel, ttl, Utc::now()).await
    }

    /// Participants of `tunnel` seen less than `ttl` before `now`.
    pub async fn active_participants_at(
        &self,
        tunnel: &TunnelId,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> BTreeSet<String> {
        let records = self.records.lock().await;
        records
            .get(tunnel)
            .map(|members| {
                members
                    .iter()
                    .filter(|(_, seen)| now.signed_duration_since(**seen) < ttl)
                    .map(|(participant, _)| participant.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Active participant count for every tunnel with at least one record.
    pub async fn active_counts_at(
        &self,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> HashMap<TunnelId, usize> {
        let records = self.records.lock().await;
        records
            .iter()
            .map(|(tunnel, members)| {
                let active = members
                    .values()
                    .filter(|seen| now.signed_duration_since(**seen) < ttl)
                    .count();
                (tunnel.clone(), active)
            })
            .collect()
    }

    /// Drop records older than `ttl`. Returns how many were removed.
    pub async fn purge_stale(&self, ttl: Duration) -> usize {
        let now = Utc::now();
        let mut records = self.records.lock().await;
        let mut removed = 0;
        records.retain(|_, members| {
            let before = members.len();
            members.retain(|_, seen| now.signed_duration_since(*seen) < ttl);
            removed += before - members.len();
            !members.is_empty()
        });
        if removed > 0 {
            debug!(removed, "purged stale presence records");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tunnel(n: u8) -> TunnelId {
        format!("{:020x}", n).parse().unwrap()
    }

    #[tokio::test]
    async fn test_heartbeat_makes_active() {
        let presence = PresenceTracker::new();
        presence.heartbeat("nze", &tunnel(1)).await;
        let active = presence
            .active_participants(&tunnel(1), Duration::seconds(30))
            .await;
        assert!(active.contains("nze"));
        assert!(presence
            .active_participants(&tunnel(2), Duration::seconds(30))
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_stale_filtered_not_removed() {
        let presence = PresenceTracker::new();
        let t0 = Utc::now();
        presence.heartbeat_at("old", &tunnel(1), t0).await;
        presence
            .heartbeat_at("fresh", &tunnel(1), t0 + Duration::seconds(25))
            .await;

        let later = t0 + Duration::seconds(31);
        let active = presence
            .active_participants_at(&tunnel(1), Duration::seconds(30), later)
            .await;
        assert_eq!(active.into_iter().collect::<Vec<_>>(), vec!["fresh".to_string()]);

        // still recorded, just inactive
        let records = presence.records.lock().await;
        assert_eq!(records[&tunnel(1)].len(), 2);
    }

    #[tokio::test]
    async fn test_ttl_boundary_is_exclusive() {
        let presence = PresenceTracker::new();
        let t0 = Utc::now();
        presence.heartbeat_at("edge", &tunnel(1), t0).await;
        let at_ttl = t0 + Duration::seconds(30);
        assert!(presence
            .active_participants_at(&tunnel(1), Duration::seconds(30), at_ttl)
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_heartbeat_upserts() {
        let presence = PresenceTracker::new();
        let t0 = Utc::now() - Duration::seconds(100);
        presence.heartbeat_at("nze", &tunnel(1), t0).await;
        presence.heartbeat("nze", &tunnel(1)).await;
        let counts = presence
            .active_counts_at(Duration::seconds(30), Utc::now())
            .await;
        assert_eq!(counts[&tunnel(1)], 1);
    }

    #[tokio::test]
    async fn test_purge_stale() {
        let presence = PresenceTracker::new();
        presence
            .heartbeat_at("gone", &tunnel(1), Utc::now() - Duration::seconds(120))
            .await;
        presence.heartbeat("here", &tunnel(2)).await;

        assert_eq!(presence.purge_stale(Duration::seconds(30)).await, 1);
        let records = presence.records.lock().await;
        assert!(!records.contains_key(&tunnel(1)));
        assert!(records.contains_key(&tunnel(2)));
    }
}
