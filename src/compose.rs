//! Fixed-length response composition
//!
//! A composed response is exactly `prefix_size + trailer_size` bytes: the
//! live origin prefix followed by the stored trailer. The channel built
//! here is the enforcement point for that length. The sink side accounts
//! every write against the declared total and refuses to complete unless
//! the accounts match; the body side surfaces any deviation as a body
//! error, so a metadata/origin disagreement aborts the transfer instead of
//! delivering a silently corrupt archive.
//!
//! The channel is bounded, so the full prefix is never buffered: the piping
//! task suspends when the client is slower than the origin. The terminal
//! state travels out of band in a shared slot, never as a data message, so
//! a full pipe cannot swallow an abort cause.

use crate::error::GatewayError;
use crate::metrics::GatewayMetrics;
use crate::models::SnapshotMetadata;
use crate::origin::PrefixStream;
use bytes::Bytes;
use http::header;
use http::{HeaderValue, Response, StatusCode};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Frame, SizeHint};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Response body type used by every gateway response
pub type GatewayBody = BoxBody<Bytes, GatewayError>;

/// Buffered chunks between the piping task and the client connection
const PIPE_CAPACITY: usize = 16;

/// How the producer side left the stream
type EndState = Arc<Mutex<Option<Result<(), GatewayError>>>>;

/// Wrap fully materialized bytes as a gateway body
pub fn full_body(bytes: impl Into<Bytes>) -> GatewayBody {
    Full::new(bytes.into()).map_err(|never| match never {}).boxed()
}

/// Create a fixed-length channel for a composed response
///
/// # Arguments
/// * `declared` - Exact number of body bytes the response advertises
/// * `tee` - Optional copy stream feeding the cache writer; lossy, detached
///   from delivery
pub fn fixed_length_channel(
    declared: u64,
    tee: Option<mpsc::Sender<Bytes>>,
) -> (SnapshotSink, SnapshotBody) {
    let (tx, rx) = mpsc::channel(PIPE_CAPACITY);
    let end: EndState = Arc::new(Mutex::new(None));
    (
        SnapshotSink {
            tx: Some(tx),
            declared,
            written: 0,
            end: Arc::clone(&end),
            tee,
        },
        SnapshotBody {
            rx,
            declared,
            seen: 0,
            done: false,
            end,
        },
    )
}

/// Producer half of the fixed-length channel
///
/// Writes are checked against the declared total as they happen: a write
/// that would overshoot fails immediately, and `finish` fails unless the
/// total was reached exactly. Dropping the sink without finishing marks the
/// body as aborted.
pub struct SnapshotSink {
    tx: Option<mpsc::Sender<Bytes>>,
    declared: u64,
    written: u64,
    end: EndState,
    tee: Option<mpsc::Sender<Bytes>>,
}

impl SnapshotSink {
    /// Bytes written so far
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Deliver one chunk toward the declared total
    ///
    /// # Returns
    /// * `Err(StreamOverflow)` if the chunk would exceed the declaration
    /// * `Err(ClientDisconnected)` if the body side has gone away
    pub async fn write(&mut self, chunk: Bytes) -> Result<(), GatewayError> {
        if chunk.is_empty() {
            return Ok(());
        }
        if self.tx.is_none() {
            // Sealed already; nothing further may be delivered
            return Err(GatewayError::ClientDisconnected);
        }

        let attempted = self.written + chunk.len() as u64;
        if attempted > self.declared {
            let err = GatewayError::StreamOverflow {
                declared: self.declared,
                attempted,
            };
            self.seal(Err(err.clone()));
            return Err(err);
        }

        // The cache copy must never hold up the client: drop the tee the
        // moment it cannot keep pace or its collector is gone
        if let Some(tee) = &self.tee {
            if tee.try_send(chunk.clone()).is_err() {
                debug!("cache copy abandoned mid-stream");
                self.tee = None;
            }
        }

        let delivered = match &self.tx {
            Some(tx) => tx.send(chunk).await.is_ok(),
            None => false,
        };
        if !delivered {
            self.seal(Err(GatewayError::ClientDisconnected));
            return Err(GatewayError::ClientDisconnected);
        }
        self.written = attempted;
        Ok(())
    }

    /// Complete the stream, verifying the declared total was reached
    pub fn finish(&mut self) -> Result<(), GatewayError> {
        if self.written != self.declared {
            let err = GatewayError::StreamShortWrite {
                declared: self.declared,
                delivered: self.written,
            };
            self.seal(Err(err.clone()));
            return Err(err);
        }
        self.seal(Ok(()));
        Ok(())
    }

    /// Abort the stream, surfacing `error` to the body side
    pub fn abort(&mut self, error: GatewayError) {
        self.seal(Err(error));
    }

    fn seal(&mut self, end: Result<(), GatewayError>) {
        if self.tx.is_none() {
            return;
        }
        if let Ok(mut slot) = self.end.lock() {
            if slot.is_none() {
                *slot = Some(end);
            }
        }
        // Closing the channel wakes the body; the slot carries the cause
        self.tx = None;
        self.tee = None;
    }
}

impl Drop for SnapshotSink {
    fn drop(&mut self) {
        if self.tx.is_some() {
            let err = GatewayError::StreamShortWrite {
                declared: self.declared,
                delivered: self.written,
            };
            self.seal(Err(err));
        }
    }
}

/// Consumer half of the fixed-length channel, served as the response body
pub struct SnapshotBody {
    rx: mpsc::Receiver<Bytes>,
    declared: u64,
    seen: u64,
    done: bool,
    end: EndState,
}

impl Body for SnapshotBody {
    type Data = Bytes;
    type Error = GatewayError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        match this.rx.poll_recv(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(chunk)) => {
                this.seen += chunk.len() as u64;
                Poll::Ready(Some(Ok(Frame::data(chunk))))
            }
            Poll::Ready(None) => {
                this.done = true;
                let end = this.end.lock().ok().and_then(|mut slot| slot.take());
                match end {
                    Some(Ok(())) => Poll::Ready(None),
                    Some(Err(e)) => Poll::Ready(Some(Err(e))),
                    // Producer vanished without sealing the stream
                    None => Poll::Ready(Some(Err(GatewayError::StreamShortWrite {
                        declared: this.declared,
                        delivered: this.seen,
                    }))),
                }
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.done
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::with_exact(self.declared.saturating_sub(self.seen))
    }
}

/// Spawn the detached task that pipes prefix bytes then trailer bytes
///
/// The handler returns the response as soon as this task is spawned; the
/// client receives prefix bytes while the origin is still sending them. The
/// prefix writes never seal the sink (the trailer follows); the final seal
/// happens in `finish`, after the trailer. Every failure path seals the
/// sink with its cause so the transfer aborts visibly.
pub fn spawn_pipe(
    mut sink: SnapshotSink,
    mut prefix: PrefixStream,
    trailer: Bytes,
    metrics: Arc<GatewayMetrics>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let result = match drive(&mut sink, &mut prefix, trailer).await {
            Ok(()) => sink.finish(),
            Err(e) => {
                sink.abort(e.clone());
                Err(e)
            }
        };

        match result {
            Ok(()) => {
                metrics.record_bytes_streamed(sink.written());
                debug!("composed response complete: {} bytes", sink.written());
            }
            Err(e) => {
                metrics.record_stream_abort(&e);
                warn!(
                    "snapshot stream aborted after {} of {} bytes: {}",
                    sink.written(),
                    sink.declared,
                    e
                );
            }
        }
    })
}

async fn drive(
    sink: &mut SnapshotSink,
    prefix: &mut PrefixStream,
    trailer: Bytes,
) -> Result<(), GatewayError> {
    while let Some(chunk) = prefix.chunk().await? {
        sink.write(chunk).await?;
    }
    sink.write(trailer).await?;
    Ok(())
}

/// Assemble the outbound 200 for a composed snapshot
///
/// Declares the exact total length up front; `Cache-Control` is present
/// only when the caching layer is enabled, and the capture digest (when
/// recorded) is surfaced as a strong ETag.
pub fn composed_response(
    metadata: &SnapshotMetadata,
    content_type: Option<String>,
    cache_control: Option<String>,
    body: SnapshotBody,
) -> Response<GatewayBody> {
    let mut response = Response::new(body.boxed());
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(metadata.total_len()));

    let content_type = content_type
        .and_then(|v| HeaderValue::from_str(&v).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
    headers.insert(header::CONTENT_TYPE, content_type);

    if let Some(cache_control) = cache_control {
        if let Ok(value) = HeaderValue::from_str(&cache_control) {
            headers.insert(header::CACHE_CONTROL, value);
        }
    }

    if let Some(digest) = &metadata.digest {
        if let Ok(value) = HeaderValue::from_str(&format!("\"sha256:{}\"", digest)) {
            headers.insert(header::ETAG, value);
        }
    }

    response
}
