//! Node configuration loaded from environment variables.
//!
//! Every setting has a default so a node starts with zero configuration for
//! local use. Invalid values are logged and replaced by the default.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use kongossa_shared::constants::{
    DEFAULT_HTTP_PORT, DEFAULT_TUNNEL_CAPACITY, PEER_TIMEOUT_SECS, PRESENCE_TTL_SECS,
};
use kongossa_shared::NodeId;
use kongossa_store::MergeStrategy;
use kongossa_sync::ActivityMode;

#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Socket address for the HTTP (axum) server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Base URL peers reach this node at; used in share links.
    /// Env: `PUBLIC_URL`
    /// Default: `http://127.0.0.1:8080`
    pub public_url: String,

    /// Public node identifier.
    /// Env: `NODE_ID`
    /// Default: random `node-<8 hex>`
    pub node_id: NodeId,

    /// SQLite file for persistence.
    /// Env: `DB_PATH`
    /// Default: unset (in-memory only)
    pub db_path: Option<PathBuf>,

    /// Env: `TUNNEL_CAPACITY`
    pub tunnel_capacity: usize,

    /// Env: `MERGE_STRATEGY` (`union` | `version`)
    pub merge_strategy: MergeStrategy,

    /// Env: `PRESENCE_TTL_SECS`
    pub presence_ttl: Duration,

    /// Env: `PEER_TIMEOUT_SECS`
    pub peer_timeout: Duration,

    /// Env: `MAX_CONCURRENT_FETCHES`
    pub max_concurrent_fetches: usize,

    /// Env: `ACTIVITY_MODE` (`presence` | `push`)
    pub activity_mode: ActivityMode,

    /// Initial subscriptions.
    /// Env: `PEERS` (comma-separated base URLs)
    pub peers: Vec<String>,

    /// Bearer token for the local admin endpoints.
    /// Env: `ADMIN_TOKEN`
    /// Default: unset (admin endpoints disabled)
    pub admin_token: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            public_url: format!("http://127.0.0.1:{DEFAULT_HTTP_PORT}"),
            node_id: NodeId::generate(),
            db_path: None,
            tunnel_capacity: DEFAULT_TUNNEL_CAPACITY,
            merge_strategy: MergeStrategy::Union,
            presence_ttl: Duration::from_secs(PRESENCE_TTL_SECS),
            peer_timeout: Duration::from_secs(PEER_TIMEOUT_SECS),
            max_concurrent_fetches: 8,
            activity_mode: ActivityMode::Presence,
            peers: Vec::new(),
            admin_token: None,
        }
    }
}

impl NodeConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            parse_into(&mut config.http_addr, "HTTP_ADDR", &addr);
        }

        if let Some(url) = lookup("PUBLIC_URL") {
            let url = url.trim().trim_end_matches('/');
            if !url.is_empty() {
                config.public_url = url.to_string();
            }
        }

        if let Some(id) = lookup("NODE_ID") {
            let id = id.trim();
            if !id.is_empty() {
                config.node_id = NodeId(id.to_string());
            }
        }

        if let Some(path) = lookup("DB_PATH") {
            if !path.trim().is_empty() {
                config.db_path = Some(PathBuf::from(path.trim()));
            }
        }

        if let Some(val) = lookup("TUNNEL_CAPACITY") {
            parse_into(&mut config.tunnel_capacity, "TUNNEL_CAPACITY", &val);
            config.tunnel_capacity = config.tunnel_capacity.max(1);
        }

        if let Some(val) = lookup("MERGE_STRATEGY") {
            parse_into(&mut config.merge_strategy, "MERGE_STRATEGY", &val);
        }

        if let Some(val) = lookup("PRESENCE_TTL_SECS") {
            parse_secs_into(&mut config.presence_ttl, "PRESENCE_TTL_SECS", &val);
        }

        if let Some(val) = lookup("PEER_TIMEOUT_SECS") {
            parse_secs_into(&mut config.peer_timeout, "PEER_TIMEOUT_SECS", &val);
        }

        if let Some(val) = lookup("MAX_CONCURRENT_FETCHES") {
            parse_into(&mut config.max_concurrent_fetches, "MAX_CONCURRENT_FETCHES", &val);
            config.max_concurrent_fetches = config.max_concurrent_fetches.max(1);
        }

        if let Some(val) = lookup("ACTIVITY_MODE") {
            parse_into(&mut config.activity_mode, "ACTIVITY_MODE", &val);
        }

        if let Some(val) = lookup("PEERS") {
            config.peers = val
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }

        if let Some(token) = lookup("ADMIN_TOKEN") {
            if !token.is_empty() {
                config.admin_token = Some(token);
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }
}

fn parse_into<T>(slot: &mut T, key: &str, raw: &str)
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw.trim().parse::<T>() {
        Ok(value) => *slot = value,
        Err(e) => tracing::warn!(key, value = %raw, error = %e, "invalid setting, using default"),
    }
}

fn parse_secs_into(slot: &mut Duration, key: &str, raw: &str) {
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => *slot = Duration::from_secs(secs),
        _ => tracing::warn!(key, value = %raw, "invalid duration, using default"),
    }
}
