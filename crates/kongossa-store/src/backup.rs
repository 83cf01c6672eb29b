use kongossa_shared::{RemoteTunnel, TunnelId, WireEnvelope};
use tracing::info;

use crate::error::{Result, StoreError};
use crate::models::{ImportStats, MergeStrategy};
use crate::store::MessageStore;

impl MessageStore {
    /// Export a tunnel as a JSON array of wire envelopes, oldest first.
    pub async fn export_tunnel(&self, tunnel_id: &TunnelId) -> Result<Vec<WireEnvelope>> {
        let snapshot = self
            .tunnel_snapshot(tunnel_id)
            .await
            .ok_or_else(|| StoreError::UnknownTunnel(tunnel_id.clone()))?;
        Ok(snapshot.messages)
    }

    pub async fn export_tunnel_json(&self, tunnel_id: &TunnelId) -> Result<String> {
        Ok(serde_json::to_string(&self.export_tunnel(tunnel_id).await?)?)
    }

    /// Import a backup array. Every envelope is validated before anything is
    /// merged; then the network merge routine runs in lossless union mode.
    pub async fn import_tunnel(
        &self,
        tunnel_id: &TunnelId,
        envelopes: Vec<WireEnvelope>,
    ) -> Result<ImportStats> {
        let messages_read = envelopes.len();
        // Version 0 never wins or bumps: an import adds messages, not history.
        let remote = RemoteTunnel::from_envelopes(tunnel_id.clone(), 0, envelopes)?;
        let outcome = self.merge_remote_with(&remote, MergeStrategy::Union).await;

        info!(
            tunnel = %tunnel_id,
            read = messages_read,
            imported = outcome.inserted,
            "imported backup"
        );

        Ok(ImportStats {
            messages_read,
            messages_imported: outcome.inserted,
            version: outcome.version_after,
        })
    }

    pub async fn import_tunnel_json(&self, tunnel_id: &TunnelId, json: &[u8]) -> Result<ImportStats> {
        let envelopes: Vec<WireEnvelope> = serde_json::from_slice(json)?;
        self.import_tunnel(tunnel_id, envelopes).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use kongossa_shared::{ContentType, Message, MessageId};

    use super::*;

    fn tunnel_id() -> TunnelId {
        "1d5fa7b32c7096501b6c".parse().unwrap()
    }

    fn msg(id: &str) -> Message {
        Message {
            id: MessageId(id.to_string()),
            author: "essono".to_string(),
            content_type: ContentType::text(),
            fragments: vec![vec![3; 41], vec![4; 2]],
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_export_import_restores_messages() {
        let source = MessageStore::new(50, MergeStrategy::Union);
        source.append(&tunnel_id(), msg("a")).await.unwrap();
        source.append(&tunnel_id(), msg("b")).await.unwrap();
        let json = source.export_tunnel_json(&tunnel_id()).await.unwrap();

        let target = MessageStore::new(50, MergeStrategy::Union);
        target.append(&tunnel_id(), msg("local")).await.unwrap();
        let stats = target
            .import_tunnel_json(&tunnel_id(), json.as_bytes())
            .await
            .unwrap();

        assert_eq!(stats.messages_read, 2);
        assert_eq!(stats.messages_imported, 2);
        let ids: Vec<String> = target
            .messages(&tunnel_id(), 10)
            .await
            .into_iter()
            .map(|m| m.id.0)
            .collect();
        assert_eq!(ids.len(), 3);
        assert!(ids.contains(&"local".to_string()));
    }

    #[tokio::test]
    async fn test_reimport_is_noop() {
        let store = MessageStore::new(50, MergeStrategy::Version);
        store.append(&tunnel_id(), msg("a")).await.unwrap();
        let json = store.export_tunnel_json(&tunnel_id()).await.unwrap();

        let stats = store
            .import_tunnel_json(&tunnel_id(), json.as_bytes())
            .await
            .unwrap();
        assert_eq!(stats.messages_imported, 0);
        assert_eq!(stats.version, 1);
    }

    #[tokio::test]
    async fn test_import_rejects_whole_file_on_bad_entry() {
        let store = MessageStore::new(50, MergeStrategy::Union);
        let json = serde_json::json!([
            { "id": "ok", "user": "x", "type": "text", "data": "AAAA", "ts": 1.0 },
            { "id": "bad", "user": "x", "type": "text", "ts": 2.0 }
        ]);
        let result = store
            .import_tunnel_json(&tunnel_id(), json.to_string().as_bytes())
            .await;
        assert!(matches!(result, Err(StoreError::Wire(_))));
        assert!(store.messages(&tunnel_id(), 10).await.is_empty());
    }

    #[tokio::test]
    async fn test_export_unknown_tunnel() {
        let store = MessageStore::new(50, MergeStrategy::Union);
        assert!(matches!(
            store.export_tunnel(&tunnel_id()).await,
            Err(StoreError::UnknownTunnel(_))
        ));
    }
}
