//! Snapshot request pipeline
//!
//! [`SnapshotGateway`] is the handler behind every request: route on the
//! first path segment, consult the edge cache, resolve the snapshot
//! record, fetch the validated origin prefix, and return the fixed-length
//! composed response while detached tasks stream the body and feed the
//! cache. Every error is rendered to its HTTP shape here; the handler
//! itself never fails.

use crate::cache::{request_identity, spawn_store, CacheStore};
use crate::compose::{composed_response, fixed_length_channel, full_body, spawn_pipe, GatewayBody};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::metadata::MetadataStore;
use crate::metrics::GatewayMetrics;
use crate::models::CachedResponse;
use crate::origin::OriginFetcher;
use http::{header, HeaderValue, Method, Request, Response, Uri};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Body served for the bare root path
const BANNER: &str = "snapshot gateway\n";

/// Buffered chunks between the response stream and the cache collector
const TEE_CAPACITY: usize = 64;

/// Request handler composing snapshots from prefix and trailer
pub struct SnapshotGateway {
    config: Arc<GatewayConfig>,
    metadata: Arc<dyn MetadataStore>,
    cache: Option<Arc<dyn CacheStore>>,
    origin: Arc<OriginFetcher>,
    metrics: Arc<GatewayMetrics>,
}

impl SnapshotGateway {
    /// Create a gateway over its wired collaborators
    ///
    /// Pass `None` for `cache` to disable the caching layer entirely; the
    /// composed responses then also carry no `Cache-Control` header.
    pub fn new(
        config: Arc<GatewayConfig>,
        metadata: Arc<dyn MetadataStore>,
        cache: Option<Arc<dyn CacheStore>>,
        origin: Arc<OriginFetcher>,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        SnapshotGateway {
            config,
            metadata,
            cache,
            origin,
            metrics,
        }
    }

    /// Gateway configuration
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Metrics collector shared with the admin endpoint
    pub fn metrics(&self) -> &GatewayMetrics {
        &self.metrics
    }

    /// Handle one inbound request, producing its terminal response
    ///
    /// The request body is irrelevant to a GET-only surface and is never
    /// read, so any body type serves.
    pub async fn handle<B>(&self, request: Request<B>) -> Response<GatewayBody> {
        let started = Instant::now();
        let method = request.method().clone();
        let uri = request.uri().clone();

        let response = self.dispatch(&method, &uri).await;

        self.metrics.record_request_duration(started.elapsed());
        debug!("{} {} -> {}", method, uri, response.status());
        response
    }

    async fn dispatch(&self, method: &Method, uri: &Uri) -> Response<GatewayBody> {
        if method != Method::GET {
            self.metrics.record_request("method_not_allowed");
            return error_response(&GatewayError::method_not_allowed(method.as_str()));
        }

        let id = snapshot_id(uri.path());
        if id.is_empty() {
            self.metrics.record_request("banner");
            return banner_response();
        }

        let identity = request_identity(method, uri);

        if let Some(cache) = &self.cache {
            match cache.lookup(&identity).await {
                Ok(Some(cached)) => {
                    self.metrics.record_cache_hit();
                    self.metrics.record_request("cache_hit");
                    info!("cache hit for {}", identity);
                    return replay_cached(cached);
                }
                Ok(None) => self.metrics.record_cache_miss(),
                Err(error) => {
                    // A failing cache degrades to a miss, never to a
                    // failed request
                    warn!("cache lookup for {} failed: {}", identity, error);
                    self.metrics.record_cache_miss();
                }
            }
        }

        match self.compose(id, identity).await {
            Ok(response) => {
                self.metrics.record_request("composed");
                response
            }
            Err(error) => {
                self.metrics.record_request(outcome_label(&error));
                match &error {
                    GatewayError::SnapshotNotFound { .. } => debug!("snapshot {} unknown", id),
                    other => warn!("snapshot {} failed: {}", id, other),
                }
                error_response(&error)
            }
        }
    }

    /// Pipeline tail: resolve, fetch, compose, detach the body writers
    async fn compose(&self, id: &str, identity: String) -> Result<Response<GatewayBody>> {
        let metadata = self
            .metadata
            .resolve(id)
            .await?
            .ok_or_else(|| GatewayError::not_found(id))?;

        let range = metadata.prefix_range();
        let prefix = match self.origin.fetch_prefix(range).await {
            Ok(stream) => {
                let result = if range.is_empty() { "skipped" } else { "success" };
                self.metrics.record_origin_fetch(result);
                stream
            }
            Err(error) => {
                self.metrics.record_origin_fetch(fetch_result_label(&error));
                return Err(error);
            }
        };

        info!(
            "composing snapshot {}: prefix={}B trailer={}B total={}B",
            id,
            metadata.prefix_size,
            metadata.trailer.len(),
            metadata.total_len()
        );

        let content_type = prefix.content_type();
        let cache_control = self
            .cache
            .as_ref()
            .map(|_| format!("s-maxage={}, immutable", self.config.cache_smaxage_secs));

        // Responses above the per-entry ceiling are never tee'd
        let (tee_tx, tee_rx) = if self.cacheable(metadata.total_len()) {
            let (tx, rx) = mpsc::channel(TEE_CAPACITY);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let (sink, body) = fixed_length_channel(metadata.total_len(), tee_tx);
        let response = composed_response(&metadata, content_type, cache_control, body);

        if let (Some(cache), Some(rx)) = (self.cache.clone(), tee_rx) {
            spawn_store(
                cache,
                identity,
                response.status(),
                response.headers().clone(),
                metadata.total_len(),
                rx,
            );
        }

        spawn_pipe(
            sink,
            prefix,
            metadata.trailer.clone(),
            Arc::clone(&self.metrics),
        );
        Ok(response)
    }

    fn cacheable(&self, total_len: u64) -> bool {
        self.cache.is_some() && total_len <= self.config.cache_max_entry_bytes as u64
    }
}

/// First path segment after the leading slash; later segments are ignored
fn snapshot_id(path: &str) -> &str {
    path.strip_prefix('/')
        .unwrap_or(path)
        .split('/')
        .next()
        .unwrap_or("")
}

fn banner_response() -> Response<GatewayBody> {
    let mut response = Response::new(full_body(BANNER));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// Replay a stored response byte-for-byte, headers included
fn replay_cached(cached: CachedResponse) -> Response<GatewayBody> {
    let mut response = Response::new(full_body(cached.body));
    *response.status_mut() = cached.status;
    *response.headers_mut() = cached.headers;
    response
}

/// Render an error into its outbound HTTP shape
fn error_response(error: &GatewayError) -> Response<GatewayBody> {
    let mut response = Response::new(full_body(error.client_message()));
    *response.status_mut() = error.to_http_status();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    if matches!(error, GatewayError::MethodNotAllowed { .. }) {
        response
            .headers_mut()
            .insert(header::ALLOW, HeaderValue::from_static("GET"));
    }
    response
}

/// Terminal outcome label for the request counter
fn outcome_label(error: &GatewayError) -> &'static str {
    match error {
        GatewayError::MethodNotAllowed { .. } => "method_not_allowed",
        GatewayError::SnapshotNotFound { .. } => "not_found",
        GatewayError::OriginStatus { .. } => "origin_status",
        GatewayError::OriginRequest(_) | GatewayError::OriginTimeout { .. } => "origin_unreachable",
        GatewayError::OriginContract(_) => "origin_contract",
        _ => "internal_error",
    }
}

/// Result label for the origin fetch counter
fn fetch_result_label(error: &GatewayError) -> &'static str {
    match error {
        GatewayError::OriginStatus { .. } => "status_mismatch",
        GatewayError::OriginContract(_) => "contract_violation",
        GatewayError::OriginTimeout { .. } => "timeout",
        _ => "transport_error",
    }
}
