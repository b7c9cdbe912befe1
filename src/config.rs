//! Runtime configuration for a group-cache node.
//!
//! Configuration can be loaded from a JSON file or constructed programmatically.
//! Command-line flags override the file for the handful of per-node settings
//! (listen address, self address, peer list).

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::group::GroupOptions;

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "group-cache", about = "Distributed read-through cache node")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// HTTP listen address (overrides the config file).
    #[arg(long)]
    pub listen: Option<String>,

    /// This node's base URL as the other peers know it, e.g. http://10.0.0.1:8081.
    #[arg(long)]
    pub self_addr: Option<String>,

    /// Comma-separated peer base URLs, including this node.
    #[arg(long, value_delimiter = ',')]
    pub peers: Vec<String>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,

    /// Peer membership and transport.
    pub peers: PeerConfig,

    /// Default cache sizing and expiry for groups.
    pub cache: CacheConfig,

    /// Groups registered at startup.
    pub groups: Vec<GroupConfig>,

    /// Sample loader used by the node binary.
    pub demo: DemoConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g. "0.0.0.0:8081").
    pub listen: String,

    /// Base URL other peers use to reach this node.
    pub self_addr: String,

    /// Per-request timeout for client-facing lookups, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8081".to_string(),
            self_addr: "http://localhost:8081".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Peer set and outbound transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Peer base URLs, this node included.
    pub addresses: Vec<String>,

    /// Virtual nodes per peer on the hash ring.
    pub replicas: usize,

    /// Timeout for a single outbound fetch, in milliseconds.
    pub fetch_timeout_ms: u64,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            addresses: Vec::new(),
            replicas: crate::peers::ring::DEFAULT_REPLICAS,
            fetch_timeout_ms: 5_000,
        }
    }
}

/// Default per-group cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Byte quota for a group that does not set its own.
    pub default_quota_bytes: usize,

    /// Share of a group's quota given to the hot (peer-fetched) tier.
    pub hot_fraction: f64,

    /// Per-entry lifetime in seconds (None = entries never expire).
    pub ttl_secs: Option<u64>,

    /// Passive cleanup cadence in seconds (None or 0 disables the sweeper).
    pub sweep_interval_secs: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_quota_bytes: 64 << 20, // 64 MB
            hot_fraction: 0.125,
            ttl_secs: None,
            sweep_interval_secs: Some(600),
        }
    }
}

/// A group registered at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupConfig {
    pub name: String,

    #[serde(default)]
    pub quota_bytes: Option<usize>,

    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

/// Settings for the binary's sample loader.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Simulated source-of-truth latency, in milliseconds.
    pub load_delay_ms: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self { load_delay_ms: 1_000 }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }

    /// Apply command-line overrides.
    pub fn merge_cli(&mut self, cli: &Cli) {
        if let Some(listen) = &cli.listen {
            self.server.listen = listen.clone();
        }
        if let Some(self_addr) = &cli.self_addr {
            self.server.self_addr = self_addr.clone();
        }
        if !cli.peers.is_empty() {
            self.peers.addresses = cli.peers.clone();
        }
    }

    /// Default options for groups that do not override them.
    pub fn default_group_options(&self) -> GroupOptions {
        GroupOptions {
            quota_bytes: self.cache.default_quota_bytes,
            hot_fraction: self.cache.hot_fraction,
            ttl: self.cache.ttl_secs.map(Duration::from_secs),
            sweep_interval: self
                .cache
                .sweep_interval_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        }
    }

    /// Options for one configured group, layered over the defaults.
    pub fn group_options(&self, group: &GroupConfig) -> GroupOptions {
        let mut options = self.default_group_options();
        if let Some(quota) = group.quota_bytes {
            options.quota_bytes = quota;
        }
        if let Some(ttl) = group.ttl_secs {
            options.ttl = Some(Duration::from_secs(ttl));
        }
        options
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.peers.fetch_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.cache.default_quota_bytes, 64 << 20);
        assert_eq!(cfg.peers.replicas, crate::peers::ring::DEFAULT_REPLICAS);
        assert!(cfg.groups.is_empty());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{
            "cache": { "ttl_secs": 5 },
            "groups": [ { "name": "myCacheGroup", "quota_bytes": 0 } ]
        }"#;
        let cfg: Config = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.cache.ttl_secs, Some(5));
        assert_eq!(cfg.cache.hot_fraction, 0.125);
        assert_eq!(cfg.server.listen, "0.0.0.0:8081");

        let options = cfg.group_options(&cfg.groups[0]);
        assert_eq!(options.quota_bytes, 0);
        assert_eq!(options.ttl, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "group-cache",
            "--self-addr",
            "http://localhost:8082",
            "--peers",
            "http://localhost:8081,http://localhost:8082",
        ]);
        let mut cfg = Config::default();
        cfg.merge_cli(&cli);
        assert_eq!(cfg.server.self_addr, "http://localhost:8082");
        assert_eq!(cfg.peers.addresses.len(), 2);
        assert_eq!(cfg.server.listen, "0.0.0.0:8081");
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(cfg.demo.load_delay_ms, 1_000);
    }
}
