//! Outbound peer transport.
//!
//! [`PeerClient`] is the seam between the group pipeline and the network:
//! the HTTP implementation lives here, tests substitute their own.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::peers::protocol::{
    error_from_remote, ErrorBody, PeerInvalidateRequest, PeerRequest, PEER_GET_PATH,
    PEER_INVALIDATE_PATH,
};

/// A remote node that can serve `(group, key)` lookups.
#[async_trait]
pub trait PeerClient: Send + Sync {
    /// The peer's base address, as listed in the peer set.
    fn addr(&self) -> &str;

    /// Fetch `key` from `group` on this peer. Transport failures are reported
    /// as [`Error::PeerUnreachable`] and never touch local cache state.
    async fn fetch(&self, group: &str, key: &[u8]) -> Result<Bytes>;

    /// Drop `key` (every key when None) from `group` on this peer, without
    /// forwarding it any further.
    async fn invalidate(&self, group: &str, key: Option<&[u8]>) -> Result<()>;
}

/// Builds clients for peer addresses when the peer set changes.
pub trait PeerConnector: Send + Sync {
    fn connect(&self, addr: &str) -> Arc<dyn PeerClient>;
}

/// HTTP connector sharing one connection pool across all peers.
#[derive(Clone)]
pub struct HttpConnector {
    client: reqwest::Client,
}

impl HttpConnector {
    /// Connector whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

impl PeerConnector for HttpConnector {
    fn connect(&self, addr: &str) -> Arc<dyn PeerClient> {
        let base = addr.trim_end_matches('/');
        Arc::new(HttpPeer {
            addr: addr.to_string(),
            url: format!("{base}{PEER_GET_PATH}"),
            invalidate_url: format!("{base}{PEER_INVALIDATE_PATH}"),
            client: self.client.clone(),
        })
    }
}

/// A peer reached over HTTP.
pub struct HttpPeer {
    addr: String,
    url: String,
    invalidate_url: String,
    client: reqwest::Client,
}

impl HttpPeer {
    fn unreachable(&self, err: impl std::fmt::Display) -> Error {
        Error::PeerUnreachable {
            peer: self.addr.clone(),
            reason: err.to_string(),
        }
    }
}

#[async_trait]
impl PeerClient for HttpPeer {
    fn addr(&self) -> &str {
        &self.addr
    }

    async fn fetch(&self, group: &str, key: &[u8]) -> Result<Bytes> {
        let request = PeerRequest {
            group: group.to_string(),
            key: key.to_vec(),
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                warn!(peer = %self.addr, group, error = %e, "Peer request failed");
                self.unreachable(e)
            })?;

        let status = response.status();
        if status.is_success() {
            let value = response.bytes().await.map_err(|e| self.unreachable(e))?;
            debug!(peer = %self.addr, group, bytes = value.len(), "Fetched from peer");
            return Ok(value);
        }

        let body = response.json::<ErrorBody>().await.ok();
        Err(error_from_remote(&self.addr, status.as_u16(), body, key))
    }

    async fn invalidate(&self, group: &str, key: Option<&[u8]>) -> Result<()> {
        let request = PeerInvalidateRequest {
            group: group.to_string(),
            key: key.map(<[u8]>::to_vec),
        };

        let response = self
            .client
            .post(&self.invalidate_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                warn!(peer = %self.addr, group, error = %e, "Peer invalidation failed");
                self.unreachable(e)
            })?;

        let status = response.status();
        if status.is_success() {
            debug!(peer = %self.addr, group, "Invalidation forwarded");
            return Ok(());
        }

        let body = response.json::<ErrorBody>().await.ok();
        Err(error_from_remote(&self.addr, status.as_u16(), body, key.unwrap_or(&b"*"[..])))
    }
}
