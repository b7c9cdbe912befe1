//! group-cache node: serves cache groups to clients and to its peers.
//!
//! Every node runs the same binary with the same peer list; each key is owned
//! by exactly one node, which loads it from the source of truth and serves it
//! to the others over HTTP.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use group_cache::config::{Cli, Config};
use group_cache::peers::{HttpConnector, PeerPool};
use group_cache::server::{build_router, AppState};
use group_cache::{GroupRegistry, Loader};

/// Sample source of truth: answers every key after a fixed delay.
struct DemoLoader {
    delay: Duration,
}

#[async_trait]
impl Loader for DemoLoader {
    async fn load(&self, key: &[u8]) -> anyhow::Result<Bytes> {
        info!(key = %String::from_utf8_lossy(key), "Querying data source");
        tokio::time::sleep(self.delay).await;
        Ok(Bytes::from(format!(
            "Data for key: {}",
            String::from_utf8_lossy(key)
        )))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "group_cache=debug,tower_http=debug"
    } else {
        "group_cache=info,tower_http=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    info!("group-cache v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let mut config = Config::load(&cli.config)?;
    config.merge_cli(&cli);
    let config = Arc::new(config);

    info!(
        listen = %config.server.listen,
        self_addr = %config.server.self_addr,
        peers = ?config.peers.addresses,
        "Configuration loaded"
    );

    // Peer membership and transport.
    let connector = Arc::new(HttpConnector::new(config.fetch_timeout())?);
    let peers = Arc::new(PeerPool::new(
        &config.server.self_addr,
        config.peers.replicas,
        connector,
    ));
    peers.set_peers(&config.peers.addresses);

    // Groups.
    let registry = Arc::new(GroupRegistry::new(
        peers,
        config.default_group_options(),
    )?);
    let loader: Arc<dyn Loader> = Arc::new(DemoLoader {
        delay: Duration::from_millis(config.demo.load_delay_ms),
    });
    if config.groups.is_empty() {
        warn!("No groups configured; registering \"default\"");
        registry.new_default_group("default", Arc::clone(&loader));
    }
    for group in &config.groups {
        registry.new_group(&group.name, config.group_options(group), Arc::clone(&loader));
    }

    // Build the HTTP router.
    let state = Arc::new(AppState::new(registry, config.request_timeout()));
    let app = build_router(state);

    // Start the server.
    let listen_addr = config.server.listen.clone();
    info!(addr = %listen_addr, "Starting server");

    let listener = TcpListener::bind(&listen_addr).await?;
    info!("Listening on {listen_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutting down");
        })
        .await?;

    Ok(())
}
