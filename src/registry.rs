//! Group registry: the named set of cache groups owned by a serving process.
//!
//! The registry is an explicit object (not process-global state). Creating a
//! group under a name that is already registered returns the existing
//! instance; resetting a group replaces it with a fresh, empty one.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::error::{Error, Result};
use crate::group::{Group, GroupOptions, Invalidation};
use crate::loader::Loader;
use crate::metrics::CacheMetrics;
use crate::peers::PeerPool;

pub struct GroupRegistry {
    groups: RwLock<HashMap<String, Group>>,
    peers: Arc<PeerPool>,
    metrics: Arc<CacheMetrics>,
    defaults: GroupOptions,
}

impl GroupRegistry {
    pub fn new(peers: Arc<PeerPool>, defaults: GroupOptions) -> prometheus::Result<Self> {
        Ok(Self::with_metrics(peers, defaults, Arc::new(CacheMetrics::new()?)))
    }

    pub fn with_metrics(peers: Arc<PeerPool>, defaults: GroupOptions, metrics: Arc<CacheMetrics>) -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
            peers,
            metrics,
            defaults,
        }
    }

    /// Register `name`, or return the group already registered under it (in
    /// which case `options` and `loader` are ignored).
    pub fn new_group(&self, name: &str, options: GroupOptions, loader: Arc<dyn Loader>) -> Group {
        if let Some(group) = self.groups.read().get(name) {
            return group.clone();
        }

        let mut groups = self.groups.write();
        if let Some(group) = groups.get(name) {
            info!(group = name, "Group already exists");
            return group.clone();
        }
        let group = self.build(name, options, loader);
        groups.insert(name.to_string(), group.clone());
        group
    }

    /// Register `name` with the registry's default options.
    pub fn new_default_group(&self, name: &str, loader: Arc<dyn Loader>) -> Group {
        self.new_group(name, self.defaults.clone(), loader)
    }

    pub fn get_group(&self, name: &str) -> Option<Group> {
        self.groups.read().get(name).cloned()
    }

    /// Like [`get_group`](Self::get_group), as an error when absent.
    pub fn group(&self, name: &str) -> Result<Group> {
        self.get_group(name)
            .ok_or_else(|| Error::GroupNotFound(name.to_string()))
    }

    /// Deregister `name`. Outstanding handles keep working against the old
    /// instance but the registry will never hand it out again.
    pub fn remove_group(&self, name: &str) -> Option<Group> {
        let removed = self.groups.write().remove(name);
        if removed.is_some() {
            self.metrics.remove_group(name);
            info!(group = name, "Group removed");
        }
        removed
    }

    /// Deregister and recreate `name` with empty tiers.
    pub fn reset_group(&self, name: &str, options: GroupOptions, loader: Arc<dyn Loader>) -> Group {
        let mut groups = self.groups.write();
        if groups.remove(name).is_some() {
            self.metrics.remove_group(name);
        }
        let group = self.build(name, options, loader);
        groups.insert(name.to_string(), group.clone());
        info!(group = name, "Group reset");
        group
    }

    /// Recreate `name` with its current options and loader but empty tiers.
    pub fn reset(&self, name: &str) -> Result<Group> {
        let current = self.group(name)?;
        let loader = current.loader();
        Ok(self.reset_group(name, current.options().clone(), loader))
    }

    /// Force-invalidate one key (or all keys) of a group, on this node and
    /// on the peers that own them.
    pub async fn invalidate(&self, name: &str, target: Invalidation) -> Result<()> {
        self.group(name)?.invalidate(target).await
    }

    /// Empty a group's local tiers.
    pub fn clear(&self, name: &str) -> Result<()> {
        self.group(name)?.clear();
        Ok(())
    }

    /// Look up `key` in group `name`.
    pub async fn get(&self, name: &str, key: impl AsRef<[u8]>) -> Result<bytes::Bytes> {
        self.group(name)?.get(key).await
    }

    /// Registered groups, sorted by name.
    pub fn groups(&self) -> Vec<Group> {
        let mut groups: Vec<Group> = self.groups.read().values().cloned().collect();
        groups.sort_by(|a, b| a.name().cmp(b.name()));
        groups
    }

    pub fn peers(&self) -> &Arc<PeerPool> {
        &self.peers
    }

    pub fn metrics(&self) -> &Arc<CacheMetrics> {
        &self.metrics
    }

    pub fn defaults(&self) -> &GroupOptions {
        &self.defaults
    }

    /// Prometheus text exposition, with tier gauges refreshed first.
    pub fn encode_metrics(&self) -> prometheus::Result<String> {
        for group in self.groups() {
            self.metrics.observe_store(group.name(), &group.store().stats());
        }
        self.metrics.encode()
    }

    fn build(&self, name: &str, options: GroupOptions, loader: Arc<dyn Loader>) -> Group {
        info!(
            group = name,
            quota_bytes = options.quota_bytes,
            ttl = ?options.ttl,
            "Creating group"
        );
        Group::new(
            name,
            options,
            loader,
            Arc::clone(&self.peers),
            self.metrics.group(name),
        )
    }
}
