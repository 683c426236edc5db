//! Snapshot gateway server
//!
//! Entry point: loads configuration, sets up logging, wires the request
//! pipeline (metadata store, origin fetcher, cache, metrics), and starts
//! the HTTP server.

use anyhow::Context;
use snapshot_gateway::config::DEFAULT_CONFIG_PATH;
use snapshot_gateway::{
    CacheStore, FileMetadataStore, GatewayConfig, GatewayMetrics, GatewayServer, MemoryCache,
    MetadataStore, MetricsEndpoint, OriginFetcher, SnapshotGateway,
};
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Main entry point for the snapshot gateway
///
/// # Usage
/// ```bash
/// # Start with snapshot_gateway.yaml when present, built-in defaults otherwise
/// cargo run
///
/// # Start with custom config
/// cargo run -- /path/to/config.yaml
/// ```
#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting snapshot gateway");

    // Optional config file path from the command line
    let config_path = env::args().nth(1);

    if let Err(e) = run(config_path.as_deref()).await {
        error!("Fatal: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(config_path: Option<&str>) -> anyhow::Result<()> {
    match config_path {
        Some(path) => info!("Loading configuration from: {}", path),
        None => info!(
            "No config path given, using {} if present",
            DEFAULT_CONFIG_PATH
        ),
    }

    let config = GatewayConfig::resolve(config_path).with_context(|| {
        format!(
            "failed to load configuration from {}",
            config_path.unwrap_or(DEFAULT_CONFIG_PATH)
        )
    })?;

    info!("Configuration loaded successfully");
    info!("  - Listen address: {}", config.listen_address);
    info!("  - Origin URL: {}", config.origin_url);
    info!("  - Origin timeout: {} seconds", config.origin_timeout_secs);
    info!("  - Origin max retries: {}", config.origin_max_retries);
    info!("  - Metadata directory: {}", config.metadata_dir);
    info!("  - Cache enabled: {}", config.enable_cache);
    if config.enable_cache {
        info!("  - Cache s-maxage: {} seconds", config.cache_smaxage_secs);
        info!(
            "  - Cache budget: {} entries, {} MB total",
            config.cache_max_entries,
            config.cache_max_total_bytes / (1024 * 1024)
        );
    }

    let config = Arc::new(config);

    let metrics =
        Arc::new(GatewayMetrics::new().context("failed to build the metrics registry")?);

    let metadata: Arc<dyn MetadataStore> = Arc::new(FileMetadataStore::new(&config.metadata_dir));

    let cache: Option<Arc<dyn CacheStore>> = if config.enable_cache {
        Some(Arc::new(MemoryCache::with_limits(
            Duration::from_secs(config.cache_smaxage_secs),
            config.cache_max_entries,
            config.cache_max_entry_bytes,
            config.cache_max_total_bytes,
        )))
    } else {
        None
    };

    let origin = Arc::new(
        OriginFetcher::new(
            &config.origin_url,
            config.origin_timeout_secs,
            config.origin_max_retries,
        )?
        .with_metrics(Arc::clone(&metrics)),
    );

    if let Some(endpoint) = &config.metrics_endpoint {
        if endpoint.enabled {
            let addr: SocketAddr = endpoint.address.parse().with_context(|| {
                format!("metrics address {} is not a socket address", endpoint.address)
            })?;
            let admin = MetricsEndpoint::new(Arc::clone(&metrics), addr);
            tokio::spawn(async move {
                if let Err(e) = admin.start().await {
                    error!("Metrics endpoint failed: {}", e);
                }
            });
        }
    }

    let gateway = Arc::new(SnapshotGateway::new(
        config, metadata, cache, origin, metrics,
    ));

    GatewayServer::new(gateway)
        .start()
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    Ok(())
}
