//! Local tiered store: a hot tier for peer-fetched values and a main tier for
//! values this node is authoritative for.
//!
//! Each tier has its own lock so readers of one tier never wait on writers of
//! the other. Operations that must see both tiers at once (moving a key between
//! tiers, clearing) take the locks in a fixed order: hot, then main.

use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use crate::cache::entry::{CacheEntry, Tier};
use crate::cache::tier::{LruTier, TierStats};

/// Snapshot of both tiers.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub hot: TierStats,
    pub main: TierStats,
}

impl StoreStats {
    pub fn items(&self) -> usize {
        self.hot.items + self.main.items
    }

    pub fn bytes(&self) -> usize {
        self.hot.bytes + self.main.bytes
    }
}

/// Bounded, size-accounted storage with lazy time-to-live expiry.
pub struct TieredStore {
    hot: Mutex<LruTier>,
    main: Mutex<LruTier>,
    default_ttl: Option<Duration>,
}

impl TieredStore {
    /// Create a store with explicit per-tier budgets.
    pub fn new(hot_capacity: usize, main_capacity: usize, default_ttl: Option<Duration>) -> Self {
        Self {
            hot: Mutex::new(LruTier::new(Tier::Hot, hot_capacity)),
            main: Mutex::new(LruTier::new(Tier::Main, main_capacity)),
            default_ttl,
        }
    }

    /// Split a single quota between the tiers. `hot_fraction` is clamped to [0, 1].
    pub fn with_quota(quota: usize, hot_fraction: f64, default_ttl: Option<Duration>) -> Self {
        let hot = (quota as f64 * hot_fraction.clamp(0.0, 1.0)) as usize;
        Self::new(hot, quota - hot, default_ttl)
    }

    /// Single-tier store: everything lands in main. Used when the caller has no
    /// need for the hot/main distinction.
    pub fn single(capacity: usize, default_ttl: Option<Duration>) -> Self {
        Self::new(0, capacity, default_ttl)
    }

    fn tier(&self, tier: Tier) -> &Mutex<LruTier> {
        match tier {
            Tier::Hot => &self.hot,
            Tier::Main => &self.main,
        }
    }

    /// Look up a key: hot tier first, then main. Expired matches are dropped
    /// and reported as not found.
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.get_with_tier(key).map(|(value, _)| value)
    }

    /// Like [`get`](Self::get), also reporting which tier answered.
    pub fn get_with_tier(&self, key: &[u8]) -> Option<(Bytes, Tier)> {
        let now = Instant::now();
        for tier in Tier::ALL {
            if let Some(value) = self.tier(tier).lock().get(key, now) {
                return Some((value, tier));
            }
        }
        None
    }

    /// Store a value in `tier` with the store's default ttl.
    pub fn set(&self, key: Bytes, value: Bytes, tier: Tier) -> bool {
        self.set_with_ttl(key, value, tier, self.default_ttl)
    }

    /// Store a value in `tier` with an explicit ttl (`None` never expires).
    ///
    /// Any copy of the key in the other tier is removed so an entry is resident
    /// in exactly one tier. Returns false if the value could not be stored.
    pub fn set_with_ttl(&self, key: Bytes, value: Bytes, tier: Tier, ttl: Option<Duration>) -> bool {
        let entry = CacheEntry::new(&key, value, ttl, Instant::now());
        let mut hot = self.hot.lock();
        let mut main = self.main.lock();
        let (target, other) = match tier {
            Tier::Hot => (&mut *hot, &mut *main),
            Tier::Main => (&mut *main, &mut *hot),
        };
        other.remove(&key);
        let stored = target.insert(key, entry);
        if !stored {
            debug!(tier = %tier, capacity = target.capacity(), "value not cached: exceeds tier budget");
        }
        stored
    }

    /// Remove a key from both tiers. Returns true if it was resident anywhere.
    pub fn remove(&self, key: &[u8]) -> bool {
        let mut hot = self.hot.lock();
        let mut main = self.main.lock();
        let in_hot = hot.remove(key).is_some();
        let in_main = main.remove(key).is_some();
        in_hot || in_main
    }

    /// Empty both tiers. Both locks are held for the duration, so concurrent
    /// readers observe either the full pre-clear or the post-clear state.
    pub fn clear(&self) {
        let mut hot = self.hot.lock();
        let mut main = self.main.lock();
        hot.clear();
        main.clear();
    }

    /// Drop every expired entry. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        Tier::ALL
            .iter()
            .map(|tier| self.tier(*tier).lock().purge_expired(now))
            .sum()
    }

    /// Whether a live entry exists in any tier (no LRU or counter side effects).
    pub fn contains(&self, key: &[u8]) -> bool {
        let now = Instant::now();
        Tier::ALL
            .iter()
            .any(|tier| self.tier(*tier).lock().contains(key, now))
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl
    }

    pub fn stats(&self) -> StoreStats {
        let hot = self.hot.lock();
        let main = self.main.lock();
        StoreStats {
            hot: hot.stats(),
            main: main.stats(),
        }
    }
}
