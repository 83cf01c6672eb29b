//! Pulling a peer's exposed state.

use std::time::Duration;

use async_trait::async_trait;
use kongossa_shared::constants::{MAX_PEER_BODY_BYTES, STATE_API};
use kongossa_shared::PeerPayload;
use reqwest::Client;

use crate::error::{Result, SyncError};

/// Source of peer state. The engine only ever talks to peers through this
/// trait; tests plug in an in-process implementation.
#[async_trait]
pub trait PeerFetcher: Send + Sync {
    /// Fetch and parse `GET <peer_url>?api=state`.
    async fn fetch_state(&self, peer_url: &str) -> Result<PeerPayload>;
}

/// [`PeerFetcher`] over HTTP.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    max_body: usize,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(concat!("kongossa/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::PeerUnreachable {
                url: String::new(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            max_body: MAX_PEER_BODY_BYTES,
        })
    }

    /// Reject peer responses larger than `bytes`.
    pub fn with_max_body(mut self, bytes: usize) -> Self {
        self.max_body = bytes;
        self
    }
}

#[async_trait]
impl PeerFetcher for HttpFetcher {
    async fn fetch_state(&self, peer_url: &str) -> Result<PeerPayload> {
        let endpoint = format!("{peer_url}/?api={STATE_API}");

        let mut response = self.client.get(&endpoint).send().await.map_err(|e| {
            if e.is_timeout() {
                SyncError::PeerTimeout {
                    url: peer_url.to_string(),
                }
            } else {
                SyncError::PeerUnreachable {
                    url: peer_url.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::PeerUnreachable {
                url: peer_url.to_string(),
                reason: format!("HTTP {status}"),
            });
        }

        let too_large = |url: &str| SyncError::MalformedPeerPayload {
            url: url.to_string(),
            reason: format!("response exceeds {} bytes", self.max_body),
        };
        if response.content_length().is_some_and(|len| len > self.max_body as u64) {
            return Err(too_large(peer_url));
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| SyncError::PeerUnreachable {
            url: peer_url.to_string(),
            reason: e.to_string(),
        })? {
            if body.len() + chunk.len() > self.max_body {
                return Err(too_large(peer_url));
            }
            body.extend_from_slice(&chunk);
        }

        PeerPayload::parse(&body).map_err(|e| SyncError::MalformedPeerPayload {
            url: peer_url.to_string(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response and return the peer URL.
    async fn serve_once(body: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await;
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        });
        format!("http://{addr}")
    }

    fn node_body() -> String {
        r#"{"ID":"node-0badf00d","TUNNELS":{}}"#.to_string()
    }

    #[tokio::test]
    async fn test_fetch_parses_node_state() {
        let url = serve_once(node_body()).await;
        let fetcher = HttpFetcher::new(Duration::from_secs(2)).unwrap();
        let payload = fetcher.fetch_state(&url).await.unwrap();
        assert!(payload.into_tunnels().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_response_is_rejected() {
        let url = serve_once(node_body()).await;
        let fetcher = HttpFetcher::new(Duration::from_secs(2))
            .unwrap()
            .with_max_body(16);
        let err = fetcher.fetch_state(&url).await.unwrap_err();
        assert!(matches!(err, SyncError::MalformedPeerPayload { .. }), "{err}");
    }
}
