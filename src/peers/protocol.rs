//! Peer wire protocol.
//!
//! One synchronous request/response per fetch:
//! `POST {peer}/_groupcache/get` with a JSON [`PeerRequest`]. A `200` carries
//! the raw value bytes; anything else carries a JSON [`ErrorBody`].
//!
//! Invalidations travel the same way: `POST {peer}/_groupcache/invalidate`
//! with a [`PeerInvalidateRequest`], answered by `204` or an [`ErrorBody`].

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Path of the peer fetch endpoint, relative to a peer's base URL.
pub const PEER_GET_PATH: &str = "/_groupcache/get";

/// Path of the peer invalidation endpoint.
pub const PEER_INVALIDATE_PATH: &str = "/_groupcache/invalidate";

/// Inbound/outbound fetch request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerRequest {
    pub group: String,
    pub key: Vec<u8>,
}

/// Drop `key` (every key when None) from `group` on the receiving peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerInvalidateRequest {
    pub group: String,
    #[serde(default)]
    pub key: Option<Vec<u8>>,
}

/// Error payload for non-200 responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

impl From<&Error> for ErrorBody {
    fn from(err: &Error) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// HTTP status used to report `err` to a peer or client.
pub fn status_for(err: &Error) -> u16 {
    match err {
        Error::GroupNotFound(_) => 404,
        Error::PeerUnreachable { .. } | Error::Remote { .. } => 502,
        Error::Cancelled => 504,
        Error::LoaderFailed { .. } | Error::Internal(_) => 500,
    }
}

/// Rebuild an engine error from a peer's error response.
pub fn error_from_remote(peer: &str, status: u16, body: Option<ErrorBody>, key: &[u8]) -> Error {
    match body {
        Some(body) if body.kind == "loader_failed" => {
            Error::loader_failed(key, anyhow::anyhow!("{} (on {peer})", body.message))
        }
        Some(body) => Error::Remote {
            peer: peer.to_string(),
            status,
            message: body.message,
        },
        None => Error::Remote {
            peer: peer.to_string(),
            status,
            message: "unreadable error response".to_string(),
        },
    }
}
