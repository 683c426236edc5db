//! Edge response cache
//!
//! Composed snapshot responses are immutable, so the cache key is simply
//! the request identity (method plus full URL) and a replay is bit-for-bit
//! identical to the response that was stored. The gateway consumes the
//! [`CacheStore`] trait; [`MemoryCache`] is the in-process implementation
//! with TTL expiry and size-bounded eviction. [`spawn_store`] is the
//! detached collector that turns the tee'd body copy into a cache entry
//! off the response path.

use crate::error::Result;
use crate::models::CachedResponse;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http::{HeaderMap, Method, StatusCode, Uri};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Cache key for a request: method plus full URL
pub fn request_identity(method: &Method, uri: &Uri) -> String {
    format!("{} {}", method, uri)
}

/// Store for replayable composed responses
///
/// Both operations are best-effort from the gateway's point of view: a
/// lookup failure degrades to a miss and a store failure is logged, never
/// surfaced to the client.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch the stored response for `key`, if present and fresh
    async fn lookup(&self, key: &str) -> Result<Option<CachedResponse>>;

    /// Store a fully collected response under `key`
    async fn store(&self, key: &str, response: CachedResponse) -> Result<()>;
}

/// Point-in-time cache statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: usize,
}

/// In-memory response cache with TTL expiry and bounded size
///
/// Eviction is oldest-first by store time: snapshots are immutable, so
/// recency of access carries no information that store time does not.
pub struct MemoryCache {
    storage: Arc<RwLock<HashMap<String, CachedResponse>>>,
    ttl: Duration,
    max_entries: usize,
    max_entry_bytes: usize,
    max_total_bytes: usize,
    current_bytes: Arc<RwLock<usize>>,
}

impl MemoryCache {
    /// Create a cache with the given TTL and no size bounds
    pub fn new(ttl: Duration) -> Self {
        Self::with_limits(ttl, usize::MAX, usize::MAX, usize::MAX)
    }

    /// Create a cache with the given TTL and size ceilings
    ///
    /// # Arguments
    /// * `ttl` - How long an entry stays fresh after being stored
    /// * `max_entries` - Maximum number of stored responses
    /// * `max_entry_bytes` - Per-response body ceiling; larger responses
    ///   are skipped silently
    /// * `max_total_bytes` - Ceiling on the sum of stored body bytes
    pub fn with_limits(
        ttl: Duration,
        max_entries: usize,
        max_entry_bytes: usize,
        max_total_bytes: usize,
    ) -> Self {
        MemoryCache {
            storage: Arc::new(RwLock::new(HashMap::new())),
            ttl,
            max_entries,
            max_entry_bytes,
            max_total_bytes,
            current_bytes: Arc::new(RwLock::new(0)),
        }
    }

    /// Current entry count and stored body bytes
    pub fn stats(&self) -> CacheStats {
        let entries = self.storage.read().map(|s| s.len()).unwrap_or(0);
        let total_bytes = self.current_bytes.read().map(|b| *b).unwrap_or(0);
        CacheStats {
            entries,
            total_bytes,
        }
    }

    fn expired(&self, entry: &CachedResponse, now: SystemTime) -> bool {
        now.duration_since(entry.stored_at)
            .map(|age| age >= self.ttl)
            .unwrap_or(false)
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn lookup(&self, key: &str) -> Result<Option<CachedResponse>> {
        let now = SystemTime::now();
        let entry = match self.storage.read() {
            Ok(storage) => storage
                .get(key)
                .filter(|entry| !self.expired(entry, now))
                .cloned(),
            Err(_) => {
                warn!("cache lookup skipped: lock poisoned");
                None
            }
        };
        Ok(entry)
    }

    async fn store(&self, key: &str, response: CachedResponse) -> Result<()> {
        let size = response.byte_len();
        if size > self.max_entry_bytes {
            debug!(
                "response of {} bytes exceeds the {} byte per-entry ceiling, not cached",
                size, self.max_entry_bytes
            );
            return Ok(());
        }

        let now = SystemTime::now();
        let mut storage = match self.storage.write() {
            Ok(storage) => storage,
            Err(_) => {
                warn!("cache store skipped: lock poisoned");
                return Ok(());
            }
        };
        let mut current = self.current_bytes.read().map(|b| *b).unwrap_or(0);

        // Expired entries go first, then the key being replaced
        let mut reclaimed = 0usize;
        storage.retain(|_, entry| {
            if self.expired(entry, now) {
                reclaimed += entry.byte_len();
                false
            } else {
                true
            }
        });
        current = current.saturating_sub(reclaimed);
        if let Some(old) = storage.remove(key) {
            current = current.saturating_sub(old.byte_len());
        }

        // Evict oldest entries until the new one fits both ceilings
        while storage.len() >= self.max_entries
            || current.saturating_add(size) > self.max_total_bytes
        {
            let oldest = storage
                .iter()
                .min_by_key(|(_, entry)| entry.stored_at)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    if let Some(evicted) = storage.remove(&k) {
                        debug!("evicted cached response under {}", k);
                        current = current.saturating_sub(evicted.byte_len());
                    }
                }
                None => break,
            }
        }

        storage.insert(key.to_string(), response);
        current = current.saturating_add(size);
        debug!(
            "cached response under {} ({} bytes, {} entries)",
            key,
            size,
            storage.len()
        );

        // Written back before the storage lock is released; concurrent
        // stores serialize the counter read-modify-write
        if let Ok(mut bytes) = self.current_bytes.write() {
            *bytes = current;
        }
        Ok(())
    }
}

/// Spawn the detached collector that stores one tee'd response copy
///
/// The collector accumulates chunks until the tee closes and stores the
/// entry only when exactly `declared_len` bytes arrived: a lossy tee or an
/// aborted transfer produces no cache entry at all. Store failures are
/// logged and swallowed; the client response finished independently long
/// before.
pub fn spawn_store(
    cache: Arc<dyn CacheStore>,
    key: String,
    status: StatusCode,
    headers: HeaderMap,
    declared_len: u64,
    mut chunks: mpsc::Receiver<Bytes>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut body = BytesMut::with_capacity(declared_len.min(1 << 20) as usize);
        while let Some(chunk) = chunks.recv().await {
            body.extend_from_slice(&chunk);
            if body.len() as u64 > declared_len {
                warn!(
                    "cache copy for {} exceeded the declared {} bytes, abandoned",
                    key, declared_len
                );
                return;
            }
        }
        if body.len() as u64 != declared_len {
            debug!(
                "cache copy for {} incomplete ({} of {} bytes), abandoned",
                key,
                body.len(),
                declared_len
            );
            return;
        }

        let response = CachedResponse::new(status, headers, body.freeze());
        if let Err(e) = cache.store(&key, response).await {
            warn!("cache store for {} failed: {}", key, e);
        }
    })
}
