//! Prometheus metrics for cache groups.
//!
//! One [`CacheMetrics`] per registry (no process-global state). Counters are
//! labelled by group name; tier gauges are refreshed from the stores at scrape
//! time.

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::cache::StoreStats;

/// Counters of a single group, plus its store snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GroupStats {
    pub gets: u64,
    pub cache_hits: u64,
    pub peer_loads: u64,
    pub peer_errors: u64,
    pub loads: u64,
    pub loads_deduped: u64,
    pub local_loads: u64,
    pub local_load_errors: u64,
    pub server_requests: u64,
    pub invalidations: u64,
    pub store: StoreStats,
}

/// Counter handles resolved for one group.
#[derive(Clone)]
pub struct GroupMetrics {
    /// Any Get request, including from peers.
    pub gets: IntCounter,
    /// Served from a local tier.
    pub cache_hits: IntCounter,
    /// Remote fetches attempted.
    pub peer_loads: IntCounter,
    pub peer_errors: IntCounter,
    /// Gets that missed the cache.
    pub loads: IntCounter,
    /// Misses that joined an in-flight load instead of starting one.
    pub loads_deduped: IntCounter,
    /// Loader invocations.
    pub local_loads: IntCounter,
    pub local_load_errors: IntCounter,
    /// Gets that arrived from peers.
    pub server_requests: IntCounter,
    pub invalidations: IntCounter,
}

impl GroupMetrics {
    pub fn snapshot(&self) -> GroupStats {
        GroupStats {
            gets: self.gets.get(),
            cache_hits: self.cache_hits.get(),
            peer_loads: self.peer_loads.get(),
            peer_errors: self.peer_errors.get(),
            loads: self.loads.get(),
            loads_deduped: self.loads_deduped.get(),
            local_loads: self.local_loads.get(),
            local_load_errors: self.local_load_errors.get(),
            server_requests: self.server_requests.get(),
            invalidations: self.invalidations.get(),
            store: StoreStats::default(),
        }
    }
}

pub struct CacheMetrics {
    registry: Registry,
    gets: IntCounterVec,
    cache_hits: IntCounterVec,
    peer_loads: IntCounterVec,
    peer_errors: IntCounterVec,
    loads: IntCounterVec,
    loads_deduped: IntCounterVec,
    local_loads: IntCounterVec,
    local_load_errors: IntCounterVec,
    server_requests: IntCounterVec,
    invalidations: IntCounterVec,
    tier_bytes: IntGaugeVec,
    tier_items: IntGaugeVec,
}

fn counter(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntCounterVec> {
    let vec = IntCounterVec::new(Opts::new(name, help).namespace("groupcache"), &["group"])?;
    registry.register(Box::new(vec.clone()))?;
    Ok(vec)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntGaugeVec> {
    let vec = IntGaugeVec::new(
        Opts::new(name, help).namespace("groupcache"),
        &["group", "tier"],
    )?;
    registry.register(Box::new(vec.clone()))?;
    Ok(vec)
}

impl CacheMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();
        Ok(Self {
            gets: counter(&registry, "gets_total", "Get requests, local and from peers")?,
            cache_hits: counter(&registry, "cache_hits_total", "Gets served from a local tier")?,
            peer_loads: counter(&registry, "peer_loads_total", "Fetches from the owning peer")?,
            peer_errors: counter(&registry, "peer_errors_total", "Failed fetches from peers")?,
            loads: counter(&registry, "loads_total", "Gets that missed the local tiers")?,
            loads_deduped: counter(&registry, "loads_deduped_total", "Misses that joined an in-flight load")?,
            local_loads: counter(&registry, "local_loads_total", "Loader invocations")?,
            local_load_errors: counter(&registry, "local_load_errors_total", "Loader failures")?,
            server_requests: counter(&registry, "server_requests_total", "Gets received from peers")?,
            invalidations: counter(&registry, "invalidations_total", "Forced invalidations")?,
            tier_bytes: gauge(&registry, "tier_bytes", "Bytes charged per tier")?,
            tier_items: gauge(&registry, "tier_items", "Resident entries per tier")?,
            registry,
        })
    }

    /// Resolve the counters for `group`.
    pub fn group(&self, group: &str) -> GroupMetrics {
        let labels = [group];
        GroupMetrics {
            gets: self.gets.with_label_values(&labels),
            cache_hits: self.cache_hits.with_label_values(&labels),
            peer_loads: self.peer_loads.with_label_values(&labels),
            peer_errors: self.peer_errors.with_label_values(&labels),
            loads: self.loads.with_label_values(&labels),
            loads_deduped: self.loads_deduped.with_label_values(&labels),
            local_loads: self.local_loads.with_label_values(&labels),
            local_load_errors: self.local_load_errors.with_label_values(&labels),
            server_requests: self.server_requests.with_label_values(&labels),
            invalidations: self.invalidations.with_label_values(&labels),
        }
    }

    /// Drop every series for `group`, so a recreated group starts from zero.
    pub fn remove_group(&self, group: &str) {
        let labels = [group];
        for vec in [
            &self.gets,
            &self.cache_hits,
            &self.peer_loads,
            &self.peer_errors,
            &self.loads,
            &self.loads_deduped,
            &self.local_loads,
            &self.local_load_errors,
            &self.server_requests,
            &self.invalidations,
        ] {
            let _ = vec.remove_label_values(&labels);
        }
        for tier in ["hot", "main"] {
            let _ = self.tier_bytes.remove_label_values(&[group, tier]);
            let _ = self.tier_items.remove_label_values(&[group, tier]);
        }
    }

    /// Refresh tier gauges for `group`.
    pub fn observe_store(&self, group: &str, stats: &StoreStats) {
        for (tier, tier_stats) in [("hot", &stats.hot), ("main", &stats.main)] {
            self.tier_bytes
                .with_label_values(&[group, tier])
                .set(tier_stats.bytes as i64);
            self.tier_items
                .with_label_values(&[group, tier])
                .set(tier_stats.items as i64);
        }
    }

    /// Text exposition of every registered metric.
    pub fn encode(&self) -> prometheus::Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_counters_are_labelled() {
        let metrics = CacheMetrics::new().unwrap();
        let a = metrics.group("a");
        let b = metrics.group("b");
        a.gets.inc();
        a.gets.inc();
        b.gets.inc();

        assert_eq!(a.snapshot().gets, 2);
        assert_eq!(metrics.group("b").snapshot().gets, 1);

        let text = metrics.encode().unwrap();
        assert!(text.contains("groupcache_gets_total{group=\"a\"} 2"));
    }

    #[test]
    fn test_remove_group_resets_series() {
        let metrics = CacheMetrics::new().unwrap();
        metrics.group("g").local_loads.inc();
        metrics.remove_group("g");
        assert_eq!(metrics.group("g").snapshot().local_loads, 0);
    }
}
