//! Cache entry and tier types.
//!
//! An entry is immutable once stored: a new value for the same key replaces the
//! entry rather than mutating it.

use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Fixed bookkeeping cost charged per entry on top of key and value length.
pub const ENTRY_OVERHEAD: usize = 64;

/// Identifies which storage tier an entry resides in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Values fetched from the owning peer and re-requested here.
    Hot,
    /// Values this node is authoritative for (loaded locally).
    Main,
}

impl Tier {
    /// Lookup order: hot first, then main.
    pub const ALL: [Tier; 2] = [Tier::Hot, Tier::Main];

    /// The other tier.
    pub fn other(&self) -> Tier {
        match self {
            Tier::Hot => Tier::Main,
            Tier::Main => Tier::Hot,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Hot => write!(f, "hot"),
            Tier::Main => write!(f, "main"),
        }
    }
}

/// Bytes charged against a tier budget for one entry.
pub fn charge(key: &[u8], value: &[u8]) -> usize {
    key.len() + value.len() + ENTRY_OVERHEAD
}

/// A single cached value.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The cached value.
    pub value: Bytes,

    /// When the entry was stored.
    pub inserted_at: Instant,

    /// Deadline after which the entry is treated as absent.
    pub expires_at: Option<Instant>,

    /// Bytes charged against the tier budget.
    pub size: usize,
}

impl CacheEntry {
    pub fn new(key: &[u8], value: Bytes, ttl: Option<Duration>, now: Instant) -> Self {
        let size = charge(key, &value);
        Self {
            value,
            inserted_at: now,
            expires_at: ttl.map(|ttl| now + ttl),
            size,
        }
    }

    /// Expired once `now` is strictly past the deadline.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now > deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_charge_includes_overhead() {
        assert_eq!(charge(b"key", b"value"), 3 + 5 + ENTRY_OVERHEAD);
    }

    #[test]
    fn test_expiry_boundary() {
        let now = Instant::now();
        let entry = CacheEntry::new(b"k", Bytes::from_static(b"v"), Some(Duration::from_secs(5)), now);
        assert!(!entry.is_expired(now + Duration::from_secs(4)));
        assert!(!entry.is_expired(now + Duration::from_secs(5)));
        assert!(entry.is_expired(now + Duration::from_secs(6)));
    }

    #[test]
    fn test_no_ttl_never_expires() {
        let now = Instant::now();
        let entry = CacheEntry::new(b"k", Bytes::from_static(b"v"), None, now);
        assert!(!entry.is_expired(now + Duration::from_secs(86_400)));
    }

    #[test]
    fn test_tier_other() {
        assert_eq!(Tier::Hot.other(), Tier::Main);
        assert_eq!(Tier::Main.to_string(), "main");
    }
}
