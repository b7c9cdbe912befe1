//! group-cache: a distributed read-through cache.
//!
//! Named cache groups fetch missing values through a user-supplied loader,
//! collapse concurrent loads of the same key into one, route each key to the
//! node that owns it on a consistent hash ring, and keep hot/main tiers with
//! lazy time-to-live expiry.
//!
//! ```text
//! GroupRegistry ── Group ─┬─ TieredStore (hot | main)
//!                         ├─ FlightGroup (single-flight)
//!                         ├─ PeerPool ── HashRing / PeerClient
//!                         └─ Loader
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod flight;
pub mod group;
pub mod loader;
pub mod metrics;
pub mod peers;
pub mod registry;
pub mod server;

pub use error::{Error, Result};
pub use group::{Group, GroupOptions, Invalidation};
pub use loader::{loader_fn, CachingLoader, FnLoader, Loader};
pub use registry::GroupRegistry;
