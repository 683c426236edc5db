//! Origin range fetching
//!
//! Issues the single `Range: bytes=0-{prefix_size-1}` request a snapshot
//! needs and validates the answer before any byte reaches the composer.
//! Exactly 206 Partial Content is acceptable; any other status is carried
//! back as a typed error so the gateway can forward it to the client.

use crate::error::{GatewayError, Result};
use crate::metrics::GatewayMetrics;
use crate::models::PrefixRange;
use bytes::Bytes;
use http::StatusCode;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// Retry policy for transient origin transport failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries
    pub max_retries: usize,
    /// Backoff durations in milliseconds for each retry attempt
    pub backoff_ms: Vec<u64>,
}

impl RetryPolicy {
    /// Create a new retry policy with exponential backoff
    pub fn new(max_retries: usize) -> Self {
        // Exponential backoff: 100ms, 200ms, 400ms, ...
        let backoff_ms = (0..max_retries).map(|i| 100 * 2u64.pow(i as u32)).collect();

        RetryPolicy {
            max_retries,
            backoff_ms,
        }
    }

    /// Check if a failed attempt should be retried
    ///
    /// Delegates transience to [`GatewayError::should_retry`]: a delivered
    /// non-206 answer is final no matter how many attempts remain.
    pub fn should_retry(&self, attempt: usize, error: &GatewayError) -> bool {
        attempt < self.max_retries && error.should_retry()
    }

    /// Get the backoff duration for a given attempt
    pub fn backoff_duration(&self, attempt: usize) -> Duration {
        let ms = self
            .backoff_ms
            .get(attempt)
            .copied()
            .unwrap_or_else(|| *self.backoff_ms.last().unwrap_or(&1000));
        Duration::from_millis(ms)
    }
}

/// A validated prefix byte stream
///
/// `Empty` is the `prefix_size == 0` case: no origin request was made and
/// the stream yields nothing. `Live` wraps an open 206 response whose
/// headers have already been checked against the requested range.
pub enum PrefixStream {
    Empty,
    Live(reqwest::Response),
}

impl PrefixStream {
    /// Origin `Content-Type`, when the stream came from a live response
    pub fn content_type(&self) -> Option<String> {
        match self {
            PrefixStream::Empty => None,
            PrefixStream::Live(response) => response
                .headers()
                .get(http::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.to_string()),
        }
    }

    /// Pull the next chunk of prefix bytes, `None` when the stream ends
    pub async fn chunk(&mut self) -> Result<Option<Bytes>> {
        match self {
            PrefixStream::Empty => Ok(None),
            PrefixStream::Live(response) => response
                .chunk()
                .await
                .map_err(|e| GatewayError::OriginRequest(format!("mid-stream failure: {}", e))),
        }
    }
}

/// Fetcher for the live archive prefix
pub struct OriginFetcher {
    http_client: Client,
    url: String,
    timeout_secs: u64,
    retry_policy: RetryPolicy,
    metrics: Option<Arc<GatewayMetrics>>,
}

impl OriginFetcher {
    /// Create a new OriginFetcher
    ///
    /// The read timeout bounds every chunk of the prefix stream: a stalled
    /// origin surfaces as a transport error instead of a hung transfer.
    ///
    /// # Arguments
    /// * `url` - The fixed origin archive URL
    /// * `timeout_secs` - Deadline for obtaining validated response headers
    /// * `max_retries` - Retry budget for transient transport failures
    pub fn new(url: impl Into<String>, timeout_secs: u64, max_retries: usize) -> Result<Self> {
        let http_client = Client::builder()
            .connect_timeout(Duration::from_secs(timeout_secs))
            .read_timeout(Duration::from_secs(timeout_secs))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| GatewayError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(OriginFetcher {
            http_client,
            url: url.into(),
            timeout_secs,
            retry_policy: RetryPolicy::new(max_retries),
            metrics: None,
        })
    }

    /// Attach a metrics collector; retried attempts are counted on it
    pub fn with_metrics(mut self, metrics: Arc<GatewayMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Origin URL this fetcher targets
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetch the archive prefix covered by `range`
    ///
    /// The empty prefix is special-cased: no request is issued at all, so
    /// the degenerate header `bytes=0--1` can never be sent. Transient
    /// transport failures are retried per the policy; a delivered non-206
    /// answer is returned immediately as [`GatewayError::OriginStatus`].
    pub async fn fetch_prefix(&self, range: PrefixRange) -> Result<PrefixStream> {
        let Some(range_header) = range.to_header() else {
            debug!("prefix is empty, skipping origin fetch");
            return Ok(PrefixStream::Empty);
        };

        let mut attempt = 0;
        loop {
            match self.try_fetch(&range_header, range).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    if !self.retry_policy.should_retry(attempt, &e) {
                        return Err(e);
                    }
                    if let Some(metrics) = &self.metrics {
                        metrics.record_origin_retry();
                    }
                    let backoff = self.retry_policy.backoff_duration(attempt);
                    warn!(
                        "Origin fetch failed (attempt {}), retrying after {:?}: {}",
                        attempt + 1,
                        backoff,
                        e
                    );
                    sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Single fetch attempt: send, bound by the deadline, validate headers
    async fn try_fetch(&self, range_header: &str, range: PrefixRange) -> Result<PrefixStream> {
        // last_byte is Some: the empty prefix never reaches this point
        let range_end = range.last_byte().unwrap_or(0);

        let request = self.http_client.get(&self.url).header("Range", range_header);

        let response = timeout(Duration::from_secs(self.timeout_secs), request.send())
            .await
            .map_err(|_| GatewayError::OriginTimeout {
                seconds: self.timeout_secs,
            })?
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::OriginTimeout {
                        seconds: self.timeout_secs,
                    }
                } else {
                    GatewayError::OriginRequest(e.to_string())
                }
            })?;

        let status = response.status();
        if status != StatusCode::PARTIAL_CONTENT {
            // Forwarded to the client with the origin's own status
            return Err(GatewayError::OriginStatus { status, range_end });
        }

        // A 206 must carry a Content-Range agreeing with the request
        match response
            .headers()
            .get(http::header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
        {
            Some(content_range) => validate_content_range(content_range, range)?,
            None => {
                return Err(GatewayError::OriginContract(
                    "206 response without a Content-Range header".to_string(),
                ));
            }
        }

        // A declared length disagreeing with the range would otherwise only
        // surface as a stream abort after headers have been sent
        if let Some(declared) = response.content_length() {
            if declared != range.len() {
                return Err(GatewayError::OriginContract(format!(
                    "206 declares {} bytes for a {}-byte range",
                    declared,
                    range.len()
                )));
            }
        }

        debug!("origin accepted range {}, streaming prefix", range_header);
        Ok(PrefixStream::Live(response))
    }
}

/// Validate a `Content-Range` value (format: `bytes start-end/total`)
/// against the requested prefix range
fn validate_content_range(content_range: &str, range: PrefixRange) -> Result<()> {
    let content_range = content_range.trim();

    let rest = content_range.strip_prefix("bytes ").ok_or_else(|| {
        GatewayError::OriginContract(format!(
            "Content-Range must start with 'bytes ', got: {}",
            content_range
        ))
    })?;

    let (span, _total) = rest.split_once('/').ok_or_else(|| {
        GatewayError::OriginContract(format!(
            "Content-Range missing '/total' part: {}",
            content_range
        ))
    })?;

    let (start, end) = span.split_once('-').ok_or_else(|| {
        GatewayError::OriginContract(format!("Invalid span in Content-Range: {}", span))
    })?;

    let start = start.trim().parse::<u64>().map_err(|e| {
        GatewayError::OriginContract(format!("Invalid Content-Range start: {}", e))
    })?;
    let end = end
        .trim()
        .parse::<u64>()
        .map_err(|e| GatewayError::OriginContract(format!("Invalid Content-Range end: {}", e)))?;

    if start != 0 || Some(end) != range.last_byte() {
        return Err(GatewayError::OriginContract(format!(
            "Content-Range {}-{} does not cover the requested 0-{}",
            start,
            end,
            range.last_byte().unwrap_or(0)
        )));
    }

    Ok(())
}
