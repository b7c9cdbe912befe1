//! Local tiered cache storage.
//!
//! - [`entry`]: CacheEntry, Tier and size accounting
//! - [`tier`]: LRU tier with a byte budget and lazy expiry
//! - [`store`]: hot/main tiered store shared by all callers of a group

pub mod entry;
pub mod store;
pub mod tier;

pub use entry::{CacheEntry, Tier, ENTRY_OVERHEAD};
pub use store::{StoreStats, TieredStore};
pub use tier::{LruTier, TierStats};
