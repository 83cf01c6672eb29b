//! # kongossa-node
//!
//! A sovereign Kongossa node.
//!
//! This binary provides:
//! - **Tunnel state exposure** (`GET /?api=state`) so peers can pull the
//!   ciphertext this node holds
//! - **Pull-based sync** of subscribed peers at an activity-driven cadence
//! - **Local API** (axum) for appending ciphertext, presence heartbeats,
//!   subscriptions and backup export/import
//! - **Optional SQLite persistence** of tunnels and subscriptions

mod api;
mod config;
mod error;
mod state;

use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::NodeConfig;
use crate::state::Node;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("info,kongossa_node=debug,kongossa_sync=debug")
            }),
        )
        .init();

    info!("Starting Kongossa node v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = NodeConfig::from_env();
    info!(
        node_id = %config.node_id,
        public_url = %config.public_url,
        capacity = config.tunnel_capacity,
        strategy = ?config.merge_strategy,
        activity = ?config.activity_mode,
        persistent = config.db_path.is_some(),
        admin_enabled = config.admin_token.is_some(),
        "Loaded configuration"
    );

    // -----------------------------------------------------------------------
    // 3. Build node state (opens storage, restores tunnels and peers)
    // -----------------------------------------------------------------------
    let node = Node::open(config).await?;
    let http_addr = node.config.http_addr;

    // -----------------------------------------------------------------------
    // 4. Spawn the sync driver
    // -----------------------------------------------------------------------
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let driver = node.driver().spawn(shutdown_rx);

    // -----------------------------------------------------------------------
    // 5. Serve HTTP until Ctrl+C
    // -----------------------------------------------------------------------
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
        }
        info!("Received Ctrl+C, shutting down");
    };

    let served = api::serve(node, http_addr, shutdown).await;

    let _ = shutdown_tx.send(true);
    if let Err(e) = driver.await {
        tracing::error!(error = %e, "sync driver task failed");
    }

    if let Err(e) = &served {
        tracing::error!(error = %e, "HTTP server failed");
    }
    served
}
