//! Integration tests for the metrics endpoint
//!
//! These tests verify that the admin HTTP endpoint correctly exposes the
//! gateway's Prometheus registry.

use snapshot_gateway::{GatewayMetrics, MetricsEndpoint};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Reserve a free port, then bind the endpoint to it
async fn spawn_endpoint(metrics: Arc<GatewayMetrics>) -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener); // Release the port

    let endpoint = MetricsEndpoint::new(metrics, addr);
    let handle = tokio::spawn(async move {
        let _ = endpoint.start().await;
    });

    (addr, handle)
}

/// Fetch a path once the server accepts connections
async fn fetch(addr: SocketAddr, path: &str) -> reqwest::Response {
    let url = format!("http://{}{}", addr, path);
    for _ in 0..50 {
        match reqwest::get(&url).await {
            Ok(response) => return response,
            Err(_) => tokio::time::sleep(Duration::from_millis(50)).await,
        }
    }
    panic!("metrics endpoint at {} never came up", addr);
}

#[tokio::test]
async fn test_metrics_endpoint_starts() {
    let metrics = Arc::new(GatewayMetrics::new().unwrap());
    metrics.record_request("composed");
    metrics.record_cache_hit();

    let (_addr, handle) = spawn_endpoint(metrics).await;

    // Give it a moment to start
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Abort the task (we just wanted to verify it starts without panicking)
    handle.abort();
}

#[tokio::test]
async fn test_metrics_endpoint_serves_metrics() {
    let metrics = Arc::new(GatewayMetrics::new().unwrap());
    metrics.record_request("composed");
    metrics.record_request("composed");
    metrics.record_request("not_found");
    metrics.record_cache_hit();
    metrics.record_cache_miss();
    metrics.record_bytes_streamed(1536);

    let (addr, handle) = spawn_endpoint(metrics).await;
    let response = fetch(addr, "/metrics").await;
    assert_eq!(response.status(), 200);
    assert_eq!(
        response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap(),
        "text/plain; version=0.0.4; charset=utf-8"
    );

    let body = response.text().await.unwrap();
    handle.abort();

    // Verify Prometheus exposition format
    assert!(body.contains("# HELP"));
    assert!(body.contains("# TYPE"));
    assert!(body.contains(r#"snapshot_gateway_requests_total{outcome="composed"} 2"#));
    assert!(body.contains(r#"snapshot_gateway_requests_total{outcome="not_found"} 1"#));
    assert!(body.contains(r#"snapshot_gateway_cache_lookups_total{result="hit"} 1"#));
    assert!(body.contains(r#"snapshot_gateway_cache_lookups_total{result="miss"} 1"#));
    assert!(body.contains("snapshot_gateway_streamed_bytes_total 1536"));
    // Unlabelled counters are present even at zero
    assert!(body.contains("snapshot_gateway_origin_retries_total 0"));
}

#[tokio::test]
async fn test_metrics_endpoint_health_check() {
    let metrics = Arc::new(GatewayMetrics::new().unwrap());
    let (addr, handle) = spawn_endpoint(metrics).await;

    let response = fetch(addr, "/health").await;
    assert_eq!(response.status(), 200);

    let body = response.text().await.unwrap();
    handle.abort();
    assert!(body.contains("healthy"));
}

#[tokio::test]
async fn test_metrics_endpoint_index() {
    let metrics = Arc::new(GatewayMetrics::new().unwrap());
    let (addr, handle) = spawn_endpoint(metrics).await;

    let response = fetch(addr, "/").await;
    assert_eq!(response.status(), 200);

    let body = response.text().await.unwrap();
    handle.abort();
    assert!(body.contains("Snapshot Gateway Metrics"));
    assert!(body.contains("/metrics"));
    assert!(body.contains("/health"));
}

#[tokio::test]
async fn test_metrics_endpoint_not_found() {
    let metrics = Arc::new(GatewayMetrics::new().unwrap());
    let (addr, handle) = spawn_endpoint(metrics).await;

    let response = fetch(addr, "/nonexistent").await;
    handle.abort();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_metrics_update_reflected_in_endpoint() {
    let metrics = Arc::new(GatewayMetrics::new().unwrap());
    let (addr, handle) = spawn_endpoint(Arc::clone(&metrics)).await;

    metrics.record_request("composed");
    metrics.record_cache_hit();

    let body = fetch(addr, "/metrics").await.text().await.unwrap();
    assert!(body.contains(r#"snapshot_gateway_requests_total{outcome="composed"} 1"#));
    assert!(body.contains(r#"snapshot_gateway_cache_lookups_total{result="hit"} 1"#));

    // Scrapes observe later increments
    metrics.record_request("composed");
    metrics.record_cache_hit();

    let body = fetch(addr, "/metrics").await.text().await.unwrap();
    handle.abort();
    assert!(body.contains(r#"snapshot_gateway_requests_total{outcome="composed"} 2"#));
    assert!(body.contains(r#"snapshot_gateway_cache_lookups_total{result="hit"} 2"#));
}
