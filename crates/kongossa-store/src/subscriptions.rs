//! CRUD operations for [`Subscription`] records.

use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::database::Database;
use crate::error::Result;
use crate::models::Subscription;

impl Database {
    /// Insert a subscription or refresh its `last_seen`. `added_at` of an
    /// existing row is kept.
    pub fn upsert_subscription(&self, sub: &Subscription) -> Result<()> {
        self.conn().execute(
            "INSERT INTO subscriptions (peer_url, added_at, last_seen) VALUES (?1, ?2, ?3)
             ON CONFLICT(peer_url) DO UPDATE SET last_seen = excluded.last_seen",
            params![
                sub.peer_url,
                sub.added_at.to_rfc3339(),
                sub.last_seen.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// List all subscriptions, oldest first.
    pub fn list_subscriptions(&self) -> Result<Vec<Subscription>> {
        let mut stmt = self.conn().prepare(
            "SELECT peer_url, added_at, last_seen
             FROM subscriptions
             ORDER BY added_at ASC",
        )?;

        let rows = stmt.query_map([], row_to_subscription)?;

        let mut subs = Vec::new();
        for row in rows {
            subs.push(row?);
        }
        Ok(subs)
    }

    /// Delete a subscription.  Returns `true` if a row was deleted.
    pub fn delete_subscription(&self, peer_url: &str) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM subscriptions WHERE peer_url = ?1", params![peer_url])?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_ts(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// Map a `rusqlite::Row` to a [`Subscription`].
fn row_to_subscription(row: &rusqlite::Row<'_>) -> rusqlite::Result<Subscription> {
    let peer_url: String = row.get(0)?;
    let added_str: String = row.get(1)?;
    let last_seen_str: Option<String> = row.get(2)?;

    let added_at = parse_ts(1, &added_str)?;
    let last_seen = last_seen_str.as_deref().map(|s| parse_ts(2, s)).transpose()?;

    Ok(Subscription {
        peer_url,
        added_at,
        last_seen,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_upsert_keeps_added_at() {
        let db = Database::open_in_memory().unwrap();
        let mut sub = Subscription::new("http://10.0.0.2:8080");
        let added = sub.added_at;
        db.upsert_subscription(&sub).unwrap();

        sub.added_at = added + Duration::hours(1);
        sub.last_seen = Some(Utc::now());
        db.upsert_subscription(&sub).unwrap();

        let subs = db.list_subscriptions().unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].added_at.timestamp(), added.timestamp());
        assert!(subs[0].last_seen.is_some());
    }

    #[test]
    fn test_delete_subscription() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_subscription(&Subscription::new("http://peer")).unwrap();
        assert!(db.delete_subscription("http://peer").unwrap());
        assert!(!db.delete_subscription("http://peer").unwrap());
        assert!(db.list_subscriptions().unwrap().is_empty());
    }
}
