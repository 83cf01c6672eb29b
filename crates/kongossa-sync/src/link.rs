//! Shareable subscription links: `<base>?node=<nodeId>&url=<peerBaseUrl>`.

use kongossa_shared::NodeId;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// Canonical form of a peer base URL: http(s) only, no query or fragment,
/// no trailing slash. Subscriptions are keyed by this string.
pub fn normalize_peer_url(raw: &str) -> Result<String> {
    let url = Url::parse(raw.trim()).map_err(|e| SyncError::InvalidPeerUrl(format!("{raw}: {e}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(SyncError::InvalidPeerUrl(format!(
            "{raw}: unsupported scheme {}",
            url.scheme()
        )));
    }
    if url.host_str().is_none() {
        return Err(SyncError::InvalidPeerUrl(format!("{raw}: missing host")));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(SyncError::InvalidPeerUrl(format!(
            "{raw}: query and fragment are not allowed"
        )));
    }

    Ok(url.as_str().trim_end_matches('/').to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareLink {
    pub node: NodeId,
    /// Normalized base URL of the sharing node.
    pub url: String,
}

impl ShareLink {
    pub fn new(node: NodeId, url: &str) -> Result<Self> {
        Ok(Self {
            node,
            url: normalize_peer_url(url)?,
        })
    }

    /// Parse a full link. Only the `node` and `url` parameters matter; the
    /// link's own host is whatever node the user happened to open it on.
    pub fn parse(link: &str) -> Result<Self> {
        let parsed =
            Url::parse(link.trim()).map_err(|e| SyncError::InvalidPeerUrl(format!("{link}: {e}")))?;

        let mut node = None;
        let mut url = None;
        for (key, value) in parsed.query_pairs() {
            match key.as_ref() {
                "node" => node = Some(value.into_owned()),
                "url" => url = Some(value.into_owned()),
                _ => {}
            }
        }

        match (node, url) {
            (Some(node), Some(url)) if !node.is_empty() => Self::new(NodeId(node), &url),
            _ => Err(SyncError::InvalidPeerUrl(format!(
                "{link}: missing node or url parameter"
            ))),
        }
    }

    /// Render the link against the node's own base URL.
    pub fn to_url(&self, base: &str) -> Result<String> {
        let mut url =
            Url::parse(base).map_err(|e| SyncError::InvalidPeerUrl(format!("{base}: {e}")))?;
        url.query_pairs_mut()
            .clear()
            .append_pair("node", &self.node.0)
            .append_pair("url", &self.url);
        Ok(url.to_string())
    }
}
