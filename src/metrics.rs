//! Prometheus metrics for the snapshot pipeline
//!
//! Every metric lives on an explicit [`Registry`] owned by the
//! [`GatewayMetrics`] instance, never on the process-wide default, so
//! embedders and tests can hold any number of instances without name
//! collisions. The admin endpoint renders the registry with the text
//! encoder.

use crate::error::GatewayError;
use prometheus::{Counter, CounterVec, Histogram, HistogramOpts, Opts, Registry};
use std::time::Duration;

/// Metrics collector for the snapshot gateway
#[derive(Clone)]
pub struct GatewayMetrics {
    registry: Registry,

    /// Requests handled, labeled by terminal outcome
    requests_total: CounterVec,

    /// Edge cache lookups, labeled hit or miss
    cache_lookups_total: CounterVec,

    /// Origin prefix fetches, labeled by result
    origin_fetches_total: CounterVec,

    /// Retried origin fetch attempts
    origin_retries_total: Counter,

    /// Composed bytes fully delivered to clients
    streamed_bytes_total: Counter,

    /// Aborted composed streams, labeled by abort kind
    stream_aborts_total: CounterVec,

    /// Seconds from dispatch to response headers
    request_duration_seconds: Histogram,
}

impl GatewayMetrics {
    /// Create the gateway metrics on a fresh registry
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests_total = CounterVec::new(
            Opts::new(
                "snapshot_gateway_requests_total",
                "Total requests handled, by terminal outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let cache_lookups_total = CounterVec::new(
            Opts::new(
                "snapshot_gateway_cache_lookups_total",
                "Edge cache lookups, by result",
            ),
            &["result"],
        )?;
        registry.register(Box::new(cache_lookups_total.clone()))?;

        let origin_fetches_total = CounterVec::new(
            Opts::new(
                "snapshot_gateway_origin_fetches_total",
                "Origin prefix fetches, by result",
            ),
            &["result"],
        )?;
        registry.register(Box::new(origin_fetches_total.clone()))?;

        let origin_retries_total = Counter::new(
            "snapshot_gateway_origin_retries_total",
            "Retried origin fetch attempts",
        )?;
        registry.register(Box::new(origin_retries_total.clone()))?;

        let streamed_bytes_total = Counter::new(
            "snapshot_gateway_streamed_bytes_total",
            "Composed bytes fully delivered to clients",
        )?;
        registry.register(Box::new(streamed_bytes_total.clone()))?;

        let stream_aborts_total = CounterVec::new(
            Opts::new(
                "snapshot_gateway_stream_aborts_total",
                "Aborted composed streams, by kind",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(stream_aborts_total.clone()))?;

        let request_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "snapshot_gateway_request_duration_seconds",
                "Seconds from request dispatch to response headers",
            )
            .buckets(vec![
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
            ]),
        )?;
        registry.register(Box::new(request_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            cache_lookups_total,
            origin_fetches_total,
            origin_retries_total,
            streamed_bytes_total,
            stream_aborts_total,
            request_duration_seconds,
        })
    }

    /// Registry holding every gateway metric
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record a handled request with its terminal outcome
    pub fn record_request(&self, outcome: &str) {
        self.requests_total.with_label_values(&[outcome]).inc();
    }

    /// Record an edge cache hit
    pub fn record_cache_hit(&self) {
        self.cache_lookups_total.with_label_values(&["hit"]).inc();
    }

    /// Record an edge cache miss
    pub fn record_cache_miss(&self) {
        self.cache_lookups_total.with_label_values(&["miss"]).inc();
    }

    /// Record the result of one origin prefix fetch
    pub fn record_origin_fetch(&self, result: &str) {
        self.origin_fetches_total.with_label_values(&[result]).inc();
    }

    /// Record one retried origin fetch attempt
    pub fn record_origin_retry(&self) {
        self.origin_retries_total.inc();
    }

    /// Record composed bytes that reached a client in full
    pub fn record_bytes_streamed(&self, count: u64) {
        self.streamed_bytes_total.inc_by(count as f64);
    }

    /// Record an aborted composed stream
    pub fn record_stream_abort(&self, error: &GatewayError) {
        self.stream_aborts_total
            .with_label_values(&[abort_kind(error)])
            .inc();
    }

    /// Record how long a request took to reach its response headers
    pub fn record_request_duration(&self, duration: Duration) {
        self.request_duration_seconds.observe(duration.as_secs_f64());
    }
}

/// Label for the abort counter, by error class
fn abort_kind(error: &GatewayError) -> &'static str {
    match error {
        GatewayError::StreamShortWrite { .. } => "short_write",
        GatewayError::StreamOverflow { .. } => "overflow",
        GatewayError::ClientDisconnected => "client_disconnect",
        GatewayError::OriginRequest(_) | GatewayError::OriginTimeout { .. } => "origin",
        _ => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    #[test]
    fn test_counters_accumulate() {
        let metrics = GatewayMetrics::new().unwrap();

        metrics.record_request("composed");
        metrics.record_request("composed");
        metrics.record_request("not_found");
        metrics.record_cache_hit();
        metrics.record_cache_miss();
        metrics.record_cache_miss();
        metrics.record_origin_fetch("success");
        metrics.record_origin_retry();
        metrics.record_bytes_streamed(1029);

        assert_eq!(
            metrics.requests_total.with_label_values(&["composed"]).get(),
            2.0
        );
        assert_eq!(
            metrics
                .requests_total
                .with_label_values(&["not_found"])
                .get(),
            1.0
        );
        assert_eq!(
            metrics.cache_lookups_total.with_label_values(&["hit"]).get(),
            1.0
        );
        assert_eq!(
            metrics
                .cache_lookups_total
                .with_label_values(&["miss"])
                .get(),
            2.0
        );
        assert_eq!(metrics.origin_retries_total.get(), 1.0);
        assert_eq!(metrics.streamed_bytes_total.get(), 1029.0);
    }

    #[test]
    fn test_abort_kinds_map_by_error_class() {
        let metrics = GatewayMetrics::new().unwrap();

        metrics.record_stream_abort(&GatewayError::StreamShortWrite {
            declared: 10,
            delivered: 3,
        });
        metrics.record_stream_abort(&GatewayError::StreamOverflow {
            declared: 10,
            attempted: 12,
        });
        metrics.record_stream_abort(&GatewayError::ClientDisconnected);
        metrics.record_stream_abort(&GatewayError::OriginRequest("reset".into()));
        metrics.record_stream_abort(&GatewayError::OriginStatus {
            status: StatusCode::OK,
            range_end: 9,
        });

        for kind in ["short_write", "overflow", "client_disconnect", "origin", "other"] {
            assert_eq!(
                metrics.stream_aborts_total.with_label_values(&[kind]).get(),
                1.0,
                "kind {}",
                kind
            );
        }
    }

    #[test]
    fn test_duration_observations_land_in_histogram() {
        let metrics = GatewayMetrics::new().unwrap();
        metrics.record_request_duration(Duration::from_millis(12));
        metrics.record_request_duration(Duration::from_millis(700));
        assert_eq!(metrics.request_duration_seconds.get_sample_count(), 2);
    }

    #[test]
    fn test_instances_do_not_share_a_registry() {
        let a = GatewayMetrics::new().unwrap();
        let b = GatewayMetrics::new().unwrap();
        a.record_request("composed");
        assert_eq!(a.requests_total.with_label_values(&["composed"]).get(), 1.0);
        assert_eq!(b.requests_total.with_label_values(&["composed"]).get(), 0.0);
    }

    #[test]
    fn test_registry_gathers_every_family() {
        let metrics = GatewayMetrics::new().unwrap();
        metrics.record_request("composed");
        metrics.record_cache_miss();
        metrics.record_origin_fetch("success");
        metrics.record_stream_abort(&GatewayError::ClientDisconnected);

        let names: Vec<String> = metrics
            .registry()
            .gather()
            .iter()
            .map(|f| f.get_name().to_string())
            .collect();
        for expected in [
            "snapshot_gateway_requests_total",
            "snapshot_gateway_cache_lookups_total",
            "snapshot_gateway_origin_fetches_total",
            "snapshot_gateway_origin_retries_total",
            "snapshot_gateway_streamed_bytes_total",
            "snapshot_gateway_stream_aborts_total",
            "snapshot_gateway_request_duration_seconds",
        ] {
            assert!(names.contains(&expected.to_string()), "missing {}", expected);
        }
    }
}
