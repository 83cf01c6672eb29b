//! Persistence of [`TunnelRecord`]s.

use chrono::Utc;
use kongossa_shared::{Message, TunnelId, WireEnvelope};
use rusqlite::params;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::TunnelRecord;

impl Database {
    /// Replace the stored copy of a tunnel in one transaction.
    pub fn save_tunnel(&mut self, record: &TunnelRecord) -> Result<()> {
        let tx = self.conn_mut().transaction()?;
        tx.execute(
            "INSERT INTO tunnels (id, version, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET version = excluded.version,
                                           updated_at = excluded.updated_at",
            params![
                record.id.as_str(),
                record.version as i64,
                Utc::now().to_rfc3339()
            ],
        )?;
        tx.execute(
            "DELETE FROM messages WHERE tunnel_id = ?1",
            params![record.id.as_str()],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO messages (tunnel_id, id, envelope, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for message in &record.messages {
                let envelope = serde_json::to_string(&WireEnvelope::from(message))?;
                stmt.execute(params![
                    record.id.as_str(),
                    message.id.as_str(),
                    envelope,
                    message.created_at.to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn load_tunnels(&self) -> Result<Vec<TunnelRecord>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT id, version FROM tunnels ORDER BY id ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, version) = row?;
            let id: TunnelId = id.parse()?;
            let messages = self.load_messages(&id)?;
            records.push(TunnelRecord {
                id,
                version: version.max(0) as u64,
                messages,
            });
        }
        Ok(records)
    }

    /// Messages of one tunnel, oldest first.
    pub fn load_messages(&self, tunnel_id: &TunnelId) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(
            "SELECT envelope FROM messages
             WHERE tunnel_id = ?1
             ORDER BY created_at ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![tunnel_id.as_str()], |row| row.get::<_, String>(0))?;

        let mut messages = Vec::new();
        for row in rows {
            let envelope: WireEnvelope = serde_json::from_str(&row?)?;
            messages.push(Message::try_from(envelope).map_err(StoreError::Wire)?);
        }
        Ok(messages)
    }
}
