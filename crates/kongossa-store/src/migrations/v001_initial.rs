//! v001 -- Initial schema creation.
//!
//! Creates `tunnels`, `messages` and `subscriptions`. Message content is the
//! wire envelope JSON, so only ciphertext is ever written.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Tunnels
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS tunnels (
    id         TEXT PRIMARY KEY NOT NULL,     -- 20 hex chars
    version    INTEGER NOT NULL,
    updated_at TEXT NOT NULL                  -- RFC-3339
);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    tunnel_id  TEXT NOT NULL,                 -- FK -> tunnels(id)
    id         TEXT NOT NULL,                 -- message token
    envelope   TEXT NOT NULL,                 -- wire envelope JSON (ciphertext)
    created_at TEXT NOT NULL,                 -- RFC-3339

    PRIMARY KEY (tunnel_id, id),
    FOREIGN KEY (tunnel_id) REFERENCES tunnels(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_tunnel_created
    ON messages(tunnel_id, created_at);

-- ----------------------------------------------------------------
-- Subscriptions
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS subscriptions (
    peer_url  TEXT PRIMARY KEY NOT NULL,
    added_at  TEXT NOT NULL,
    last_seen TEXT                            -- nullable until first success
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
