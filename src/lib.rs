//! Snapshot Gateway
//!
//! An edge HTTP gateway that serves point-in-time snapshots of an append-only
//! archive. Each snapshot is composed on the fly from two sources: a byte-range
//! prefix fetched from the live origin archive and a stored trailer captured
//! when the snapshot was taken, streamed to the client as one fixed-length
//! response.
//!
//! # Overview
//!
//! The archive at the origin only ever grows, so the first `prefix_size` bytes
//! of today's archive are exactly the first `prefix_size` bytes of the archive
//! at capture time. A snapshot is therefore fully described by a prefix length
//! and the trailer bytes that followed it; the gateway replays the pair as a
//! single response whose total length is known before the first byte is sent.
//!
//! # Features
//!
//! - **On-the-fly composition**: Prefix bytes stream from the origin to the
//!   client while the transfer is still in flight; the trailer follows from
//!   memory
//! - **Fixed-length guarantee**: The response never delivers more or fewer
//!   bytes than the declared `Content-Length`; mismatches abort the transfer
//!   visibly instead of truncating silently
//! - **Strict origin validation**: Only a `206 Partial Content` whose
//!   `Content-Range` matches the request is accepted; anything else is
//!   surfaced to the client, never passed through as snapshot bytes
//! - **Retry Logic**: Automatic retry with exponential backoff for transient
//!   origin transport failures
//! - **Response caching**: Composed snapshots are immutable and cached in
//!   memory with TTL and size bounds
//! - **Metrics Collection**: Prometheus metrics exposed on a separate admin
//!   endpoint
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use snapshot_gateway::{
//!     FileMetadataStore, GatewayConfig, GatewayMetrics, GatewayServer, OriginFetcher,
//!     SnapshotGateway,
//! };
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! // Load configuration from file
//! let config = Arc::new(GatewayConfig::from_file("snapshot_gateway.yaml")?);
//! let metrics = Arc::new(GatewayMetrics::new()?);
//!
//! let origin = OriginFetcher::new(
//!     &config.origin_url,
//!     config.origin_timeout_secs,
//!     config.origin_max_retries,
//! )?;
//!
//! let gateway = Arc::new(SnapshotGateway::new(
//!     Arc::clone(&config),
//!     Arc::new(FileMetadataStore::new(&config.metadata_dir)),
//!     None, // caching disabled
//!     Arc::new(origin),
//!     metrics,
//! ));
//!
//! GatewayServer::new(gateway).start().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! The gateway consists of several key components:
//!
//! - [`SnapshotGateway`]: Request pipeline that coordinates all components
//! - [`FileMetadataStore`]: Resolves snapshot ids to their prefix size and
//!   trailer bytes, one JSON document per snapshot
//! - [`OriginFetcher`]: Issues the single validated range request for the
//!   live archive prefix
//! - [`SnapshotSink`] / [`SnapshotBody`]: Fixed-length channel between the
//!   composing task and the response body
//! - [`MemoryCache`]: In-memory store for fully composed responses
//! - [`GatewayMetrics`]: Prometheus metric registry
//! - [`MetricsEndpoint`]: Admin HTTP server exposing the registry
//! - [`GatewayServer`]: Front-end HTTP listener
//!
//! # Configuration
//!
//! Configuration is loaded from a YAML file; every field has a default:
//!
//! ```yaml
//! listen_address: "0.0.0.0:8080"
//! origin_url: "https://hackage.haskell.org/01-index.tar.gz"
//! origin_timeout_secs: 30
//! origin_max_retries: 2
//! metadata_dir: "/var/lib/snapshot-gateway/snapshots"
//! enable_cache: true
//! cache_smaxage_secs: 604800       # 1 week
//! metrics_endpoint:
//!   enabled: true
//!   address: "127.0.0.1:9090"
//! ```
//!
//! See [`GatewayConfig`] for detailed configuration options.
//!
//! # Error Handling
//!
//! The crate uses a custom error type [`GatewayError`] for all error
//! conditions:
//!
//! ```rust,no_run
//! use snapshot_gateway::{GatewayConfig, GatewayError};
//!
//! # fn main() {
//! match GatewayConfig::from_file("config.yaml") {
//!     Ok(config) => println!("Config loaded successfully"),
//!     Err(GatewayError::ConfigError(msg)) => eprintln!("Config error: {}", msg),
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! # }
//! ```
//!
//! # Testing
//!
//! The crate includes comprehensive tests:
//!
//! - Unit tests for individual components
//! - Property-based tests for the range header and the fixed-length stream
//! - Integration tests against a mock origin for end-to-end behavior
//!
//! Run tests with:
//!
//! ```bash
//! cargo test
//! ```

pub mod config;
pub mod models;
pub mod error;
pub mod metadata;
pub mod origin;
pub mod compose;
pub mod cache;
pub mod metrics;
pub mod metrics_endpoint;
pub mod gateway;
pub mod server;

// Re-export commonly used types
pub use cache::{request_identity, CacheStats, CacheStore, MemoryCache};
pub use compose::{
    composed_response, fixed_length_channel, full_body, spawn_pipe, GatewayBody, SnapshotBody,
    SnapshotSink,
};
pub use config::{GatewayConfig, MetricsEndpointConfig};
pub use error::{GatewayError, Result};
pub use gateway::SnapshotGateway;
pub use metadata::{FileMetadataStore, MemoryMetadataStore, MetadataStore};
pub use metrics::GatewayMetrics;
pub use metrics_endpoint::MetricsEndpoint;
pub use models::{CachedResponse, PrefixRange, SnapshotMetadata, StoredSnapshot};
pub use origin::{OriginFetcher, PrefixStream, RetryPolicy};
pub use server::GatewayServer;
