//! Cache groups: the `Get` pipeline.
//!
//! ```text
//! get(key)
//!   ├─ local tier hit ───────────────────────────────► value
//!   └─ miss → single-flight(key)
//!               ├─ owner is remote → peer fetch → hot tier
//!               └─ owner is local  → loader     → main tier
//! ```
//!
//! Loads run in a spawned task: a caller that gives up (timeout, cancellation)
//! returns [`Error::Cancelled`] while the flight completes for everyone else and
//! still populates the cache.

use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use futures::future::join_all;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::cache::{Tier, TieredStore};
use crate::error::{Error, Result};
use crate::flight::{FlightGroup, Role};
use crate::loader::Loader;
use crate::metrics::{GroupMetrics, GroupStats};
use crate::peers::PeerPool;

/// Per-group sizing and expiry.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupOptions {
    /// Byte quota across both tiers; 0 disables caching.
    pub quota_bytes: usize,
    /// Share of the quota given to the hot tier.
    pub hot_fraction: f64,
    /// Per-entry lifetime; None never expires.
    pub ttl: Option<Duration>,
    /// Passive cleanup cadence; None disables the sweeper.
    pub sweep_interval: Option<Duration>,
}

impl Default for GroupOptions {
    fn default() -> Self {
        Self {
            quota_bytes: 64 << 20,
            hot_fraction: 0.125,
            ttl: None,
            sweep_interval: None,
        }
    }
}

impl GroupOptions {
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            quota_bytes,
            ..Default::default()
        }
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn sweep_interval(mut self, every: Duration) -> Self {
        self.sweep_interval = Some(every);
        self
    }
}

/// Target of a forced invalidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
    Key(Bytes),
    All,
}

impl Invalidation {
    /// `"*"` invalidates every key; anything else names one key.
    pub fn parse(key: &str) -> Self {
        if key == "*" {
            Invalidation::All
        } else {
            Invalidation::Key(Bytes::copy_from_slice(key.as_bytes()))
        }
    }
}

struct GroupInner {
    name: String,
    options: GroupOptions,
    loader: Arc<dyn Loader>,
    store: TieredStore,
    flights: FlightGroup<Bytes, Result<Bytes>>,
    peers: Arc<PeerPool>,
    metrics: GroupMetrics,
    /// Bumped by every invalidation and clear. Loads that started under an
    /// older epoch return their value but do not populate the store.
    epoch: RwLock<u64>,
}

/// A named cache namespace. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Group {
    inner: Arc<GroupInner>,
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("name", &self.inner.name)
            .field("options", &self.inner.options)
            .finish()
    }
}

impl Group {
    pub(crate) fn new(
        name: &str,
        options: GroupOptions,
        loader: Arc<dyn Loader>,
        peers: Arc<PeerPool>,
        metrics: GroupMetrics,
    ) -> Self {
        let store = TieredStore::with_quota(options.quota_bytes, options.hot_fraction, options.ttl);
        let inner = Arc::new(GroupInner {
            name: name.to_string(),
            options,
            loader,
            store,
            flights: FlightGroup::new(),
            peers,
            metrics,
            epoch: RwLock::new(0),
        });
        if let Some(every) = inner.options.sweep_interval {
            spawn_sweeper(Arc::downgrade(&inner), every);
        }
        Self { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn options(&self) -> &GroupOptions {
        &self.inner.options
    }

    pub fn loader(&self) -> Arc<dyn Loader> {
        Arc::clone(&self.inner.loader)
    }

    /// Get the value for `key`: from a local tier, the owning peer, or the loader.
    pub async fn get(&self, key: impl AsRef<[u8]>) -> Result<Bytes> {
        let key = key.as_ref();
        let inner = &self.inner;
        inner.metrics.gets.inc();

        if let Some((value, tier)) = inner.store.get_with_tier(key) {
            inner.metrics.cache_hits.inc();
            debug!(group = %inner.name, tier = %tier, "Cache hit");
            return Ok(value);
        }

        self.load(Bytes::copy_from_slice(key)).await
    }

    /// [`get`](Self::get) bounded by `timeout`; on expiry returns
    /// [`Error::Cancelled`] and leaves the in-flight load running.
    pub async fn get_with_timeout(&self, key: impl AsRef<[u8]>, timeout: Duration) -> Result<Bytes> {
        match tokio::time::timeout(timeout, self.get(key)).await {
            Ok(result) => result,
            Err(_) => {
                debug!(group = %self.inner.name, ?timeout, "Get timed out");
                Err(Error::Cancelled)
            }
        }
    }

    /// [`get`](Self::get) that gives up with [`Error::Cancelled`] as soon as
    /// `cancel` resolves.
    pub async fn get_or_cancel<C>(&self, key: impl AsRef<[u8]>, cancel: C) -> Result<Bytes>
    where
        C: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            result = self.get(key) => result,
            _ = cancel => {
                debug!(group = %self.inner.name, "Get cancelled by caller");
                Err(Error::Cancelled)
            }
        }
    }

    /// Serve a lookup on behalf of another peer.
    pub async fn serve_peer(&self, key: impl AsRef<[u8]>) -> Result<Bytes> {
        self.inner.metrics.server_requests.inc();
        self.get(key).await
    }

    async fn load(&self, key: Bytes) -> Result<Bytes> {
        let inner = Arc::clone(&self.inner);
        inner.metrics.loads.inc();

        let task_inner = Arc::clone(&inner);
        let task_key = key.clone();
        let (outcome, role) = inner
            .flights
            .work(key, move || {
                let task = tokio::spawn(task_inner.load_once(task_key));
                async move {
                    task.await
                        .unwrap_or_else(|e| Err(Error::Internal(format!("load task failed: {e}"))))
                }
            })
            .await;

        if role == Role::Follower {
            inner.metrics.loads_deduped.inc();
        }
        outcome
    }

    /// Forced invalidation: remove the matching entries and make sure the next
    /// `get` for them starts a fresh load.
    ///
    /// A key owned by a remote peer is invalidated on that owner first, so the
    /// owner's loader runs again; [`Invalidation::All`] goes to every remote
    /// peer. The local copy is dropped either way. A forwarding failure is
    /// returned after the local invalidation has been applied.
    pub async fn invalidate(&self, target: Invalidation) -> Result<()> {
        let inner = &self.inner;
        let forwarded = match &target {
            Invalidation::Key(key) => match inner.peers.pick_peer(key) {
                Some(peer) => peer.invalidate(&inner.name, Some(&key[..])).await,
                None => Ok(()),
            },
            Invalidation::All => {
                let peers = inner.peers.remote_peers();
                let sends = peers.iter().map(|peer| peer.invalidate(&inner.name, None));
                join_all(sends).await.into_iter().collect::<Result<Vec<()>>>().map(|_| ())
            }
        };

        self.invalidate_local(&target);
        if let Err(err) = &forwarded {
            warn!(group = %inner.name, target = ?target, error = %err, "Forwarding invalidation failed");
        }
        forwarded
    }

    /// Apply an invalidation to this node only.
    ///
    /// Loads already in flight when this is called still answer their current
    /// waiters, but their results are not cached (for any key, not only the
    /// invalidated ones).
    pub fn invalidate_local(&self, target: &Invalidation) {
        let inner = &self.inner;
        let mut epoch = inner.epoch.write();
        *epoch += 1;
        match target {
            Invalidation::Key(key) => {
                inner.store.remove(key);
                inner.flights.forget(key);
            }
            Invalidation::All => {
                inner.store.clear();
                inner.flights.forget_all();
            }
        }
        inner.metrics.invalidations.inc();
        info!(group = %inner.name, target = ?target, "Invalidated");
    }

    /// Empty both local tiers. Does not detach in-flight loads, but stops them
    /// from repopulating the store.
    pub fn clear(&self) {
        let inner = &self.inner;
        let mut epoch = inner.epoch.write();
        *epoch += 1;
        inner.store.clear();
        info!(group = %inner.name, "Local tiers cleared");
    }

    /// The group's local store.
    pub fn store(&self) -> &TieredStore {
        &self.inner.store
    }

    pub fn stats(&self) -> GroupStats {
        let mut stats = self.inner.metrics.snapshot();
        stats.store = self.inner.store.stats();
        stats
    }

    /// Whether `other` is a handle to the same group instance.
    pub fn same_instance(&self, other: &Group) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl GroupInner {
    async fn load_once(self: Arc<Self>, key: Bytes) -> Result<Bytes> {
        let epoch = *self.epoch.read();

        // A flight that finished between our miss and this one starting may
        // already have populated the store.
        if let Some(value) = self.store.get(&key) {
            self.metrics.cache_hits.inc();
            return Ok(value);
        }

        if let Some(peer) = self.peers.pick_peer(&key) {
            self.metrics.peer_loads.inc();
            return match peer.fetch(&self.name, &key).await {
                Ok(value) => {
                    self.populate(key, value.clone(), Tier::Hot, epoch);
                    Ok(value)
                }
                Err(err) => {
                    self.metrics.peer_errors.inc();
                    warn!(group = %self.name, peer = %peer.addr(), error = %err, "Peer fetch failed");
                    Err(err)
                }
            };
        }

        self.metrics.local_loads.inc();
        match self.loader.load(&key).await {
            Ok(value) => {
                self.populate(key, value.clone(), Tier::Main, epoch);
                Ok(value)
            }
            Err(err) => {
                self.metrics.local_load_errors.inc();
                warn!(group = %self.name, error = %err, "Loader failed");
                Err(Error::loader_failed(&key, err))
            }
        }
    }

    fn populate(&self, key: Bytes, value: Bytes, tier: Tier, started: u64) {
        let epoch = self.epoch.read();
        if *epoch != started {
            debug!(group = %self.name, "Invalidated during load; not caching");
            return;
        }
        self.store.set(key, value, tier);
    }
}

fn spawn_sweeper(group: Weak<GroupInner>, every: Duration) {
    if every.is_zero() {
        return;
    }
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        debug!("No runtime; expiry sweeper disabled");
        return;
    };
    runtime.spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(group) = group.upgrade() else {
                break;
            };
            let purged = group.store.purge_expired();
            if purged > 0 {
                debug!(group = %group.name, purged, "Swept expired entries");
            }
        }
    });
}
