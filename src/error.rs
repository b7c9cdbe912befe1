//! Error types for the cache engine.
//!
//! A cache miss is never an error: it simply proceeds to a load. Errors are
//! produced only when a value is currently unobtainable, and they always reach
//! the original caller of `Get` unchanged.

use std::sync::Arc;

use thiserror::Error;

/// Result type alias using the engine's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by group lookups, peer fetches and registry operations.
///
/// `Clone` so that a single load outcome can be handed to every waiter of a
/// deduplicated flight.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// The group's loader (the source of truth) failed. Nothing was cached.
    #[error("loader failed for key {key:?}: {reason}")]
    LoaderFailed {
        key: String,
        reason: Arc<anyhow::Error>,
    },

    /// Transport-level failure reaching the owning peer (refused, timeout, ...).
    #[error("peer {peer} unreachable: {reason}")]
    PeerUnreachable { peer: String, reason: String },

    /// The owning peer answered with an error we cannot map to a local kind.
    #[error("peer {peer} returned {status}: {message}")]
    Remote {
        peer: String,
        status: u16,
        message: String,
    },

    /// The caller's deadline or cancellation signal fired while waiting.
    #[error("request cancelled")]
    Cancelled,

    /// No group is registered under this name.
    #[error("group not found: {0}")]
    GroupNotFound(String),

    /// The load task panicked or was aborted.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wrap a loader failure for `key`.
    pub fn loader_failed(key: &[u8], reason: anyhow::Error) -> Self {
        Error::LoaderFailed {
            key: String::from_utf8_lossy(key).into_owned(),
            reason: Arc::new(reason),
        }
    }

    /// Whether a caller may reasonably retry the same request.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Error::PeerUnreachable { .. } | Error::Cancelled | Error::Internal(_)
        )
    }

    /// Short machine-readable tag, used on the peer wire protocol.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::LoaderFailed { .. } => "loader_failed",
            Error::PeerUnreachable { .. } => "peer_unreachable",
            Error::Remote { .. } => "remote",
            Error::Cancelled => "cancelled",
            Error::GroupNotFound(_) => "group_not_found",
            Error::Internal(_) => "internal",
        }
    }
}
