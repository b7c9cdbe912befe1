//! A single LRU-ordered, byte-budgeted tier.
//!
//! Eviction removes least-recently-used entries until the tier is back under
//! budget. Expired entries are reported as absent and dropped on lookup.

use bytes::Bytes;
use lru::LruCache;
use serde::Serialize;
use tokio::time::Instant;
use tracing::trace;

use crate::cache::entry::{CacheEntry, Tier};

/// Per-tier usage statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TierStats {
    /// Number of resident entries.
    pub items: usize,
    /// Total bytes charged.
    pub bytes: usize,
    /// Capacity budget in bytes.
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

impl TierStats {
    /// Usage as a fraction of capacity (0.0 - 1.0).
    pub fn usage_fraction(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.bytes as f64 / self.capacity as f64
    }
}

/// LRU tier with a byte budget. Not synchronized; the store wraps it in a lock.
pub struct LruTier {
    tier: Tier,
    entries: LruCache<Bytes, CacheEntry>,
    bytes: usize,
    capacity: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl LruTier {
    /// Create an empty tier. A capacity of 0 disables caching in this tier.
    pub fn new(tier: Tier, capacity: usize) -> Self {
        Self {
            tier,
            entries: LruCache::unbounded(),
            bytes: 0,
            capacity,
            hits: 0,
            misses: 0,
            evictions: 0,
            expirations: 0,
        }
    }

    /// Look up a live entry, promoting it to most-recently-used.
    pub fn get(&mut self, key: &[u8], now: Instant) -> Option<Bytes> {
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                self.hits += 1;
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            self.remove(key);
            self.expirations += 1;
            trace!(tier = %self.tier, "dropped expired entry on lookup");
        }
        self.misses += 1;
        None
    }

    /// Whether a live entry exists, without touching LRU order or counters.
    pub fn contains(&self, key: &[u8], now: Instant) -> bool {
        self.entries
            .peek(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Store an entry, replacing any previous value for the key.
    ///
    /// Returns false when the entry cannot fit the budget at all; any previous
    /// value for the key is still removed in that case.
    pub fn insert(&mut self, key: Bytes, entry: CacheEntry) -> bool {
        self.remove(&key);

        if entry.size > self.capacity {
            return false;
        }

        self.bytes += entry.size;
        self.entries.put(key, entry);
        self.evict_to_budget();
        true
    }

    /// Remove an entry, returning it if it was resident.
    pub fn remove(&mut self, key: &[u8]) -> Option<CacheEntry> {
        let entry = self.entries.pop(key)?;
        self.bytes = self.bytes.saturating_sub(entry.size);
        Some(entry)
    }

    /// Drop every entry. Counters are kept.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.bytes = 0;
    }

    /// Remove every expired entry. Returns the number removed.
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<Bytes> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.remove(key);
        }
        self.expirations += expired.len() as u64;
        expired.len()
    }

    fn evict_to_budget(&mut self) {
        while self.bytes > self.capacity {
            match self.entries.pop_lru() {
                Some((_, victim)) => {
                    self.bytes = self.bytes.saturating_sub(victim.size);
                    self.evictions += 1;
                }
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> TierStats {
        TierStats {
            items: self.entries.len(),
            bytes: self.bytes,
            capacity: self.capacity,
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            expirations: self.expirations,
        }
    }
}
