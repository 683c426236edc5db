//! Core data models for the snapshot gateway

use crate::error::{GatewayError, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// The archive prefix `[0, len)` requested from the origin
///
/// A snapshot's prefix always starts at byte zero, so only the length
/// varies. The empty prefix deliberately has no header rendering: a literal
/// translation of length zero would yield the malformed value `bytes=0--1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PrefixRange {
    len: u64,
}

impl PrefixRange {
    /// Create a PrefixRange covering the first `len` bytes of the archive
    pub fn new(len: u64) -> Self {
        PrefixRange { len }
    }

    /// Length of the prefix in bytes
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the prefix is empty (no origin fetch required)
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Index of the last byte covered, if any
    pub fn last_byte(&self) -> Option<u64> {
        self.len.checked_sub(1)
    }

    /// Render as an HTTP Range header value, `None` for the empty prefix
    ///
    /// # Returns
    /// `Some("bytes=0-{len-1}")` for a non-empty prefix, `None` otherwise
    pub fn to_header(&self) -> Option<String> {
        self.last_byte().map(|end| format!("bytes=0-{}", end))
    }
}

/// Per-snapshot metadata resolved from the store
///
/// `trailer` is exactly the bytes appended to the archive after offset
/// `prefix_size` at capture time; both fields come from one atomic store
/// read and are immutable once captured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotMetadata {
    /// Number of live archive bytes to fetch from the origin
    pub prefix_size: u64,
    /// Captured bytes following the prefix
    pub trailer: Bytes,
    /// Hex SHA-256 of the full composed snapshot, when the capture
    /// pipeline recorded one
    pub digest: Option<String>,
}

impl SnapshotMetadata {
    /// Create metadata without a digest
    pub fn new(prefix_size: u64, trailer: impl Into<Bytes>) -> Self {
        SnapshotMetadata {
            prefix_size,
            trailer: trailer.into(),
            digest: None,
        }
    }

    /// Total length of the composed response in bytes
    ///
    /// Saturating; documents whose combined length would overflow are
    /// rejected by [`StoredSnapshot::decode`] before they reach the
    /// pipeline.
    pub fn total_len(&self) -> u64 {
        self.prefix_size.saturating_add(self.trailer.len() as u64)
    }

    /// The origin range covering this snapshot's prefix
    pub fn prefix_range(&self) -> PrefixRange {
        PrefixRange::new(self.prefix_size)
    }
}

/// Persisted form of snapshot metadata
///
/// One JSON document per snapshot id, as emitted by the capture pipeline:
///
/// ```json
/// { "prefix_size": 752481485, "trailer": "<base64>", "sha256": "<hex>" }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSnapshot {
    /// Number of archive bytes preceding the trailer at capture time
    pub prefix_size: u64,
    /// Base64-encoded trailer bytes
    pub trailer: String,
    /// Optional hex SHA-256 of the full composed snapshot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl StoredSnapshot {
    /// Decode the persisted document into resolved metadata
    ///
    /// # Returns
    /// * `Ok(SnapshotMetadata)` with the trailer decoded
    /// * `Err(GatewayError)` if the trailer is not valid base64 or the
    ///   combined length overflows a u64
    pub fn decode(self) -> Result<SnapshotMetadata> {
        let trailer = BASE64.decode(self.trailer.as_bytes()).map_err(|e| {
            GatewayError::MetadataStore(format!("trailer is not valid base64: {}", e))
        })?;
        if self.prefix_size.checked_add(trailer.len() as u64).is_none() {
            return Err(GatewayError::MetadataStore(format!(
                "prefix_size {} plus a {} byte trailer overflows the composed length",
                self.prefix_size,
                trailer.len()
            )));
        }
        Ok(SnapshotMetadata {
            prefix_size: self.prefix_size,
            trailer: Bytes::from(trailer),
            digest: self.sha256,
        })
    }

    /// Encode resolved metadata back into the persisted form
    pub fn encode(metadata: &SnapshotMetadata) -> Self {
        StoredSnapshot {
            prefix_size: metadata.prefix_size,
            trailer: BASE64.encode(&metadata.trailer),
            sha256: metadata.digest.clone(),
        }
    }
}

/// A fully materialized response held by the edge cache
///
/// Headers are stored verbatim so a cache hit replays exactly the bytes the
/// pipeline would have produced, headers included.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub stored_at: SystemTime,
}

impl CachedResponse {
    /// Create a cache entry timestamped now
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        CachedResponse {
            status,
            headers,
            body,
            stored_at: SystemTime::now(),
        }
    }

    /// Body size in bytes, used for cache accounting
    pub fn byte_len(&self) -> usize {
        self.body.len()
    }
}
