//! Snapshot metadata resolution
//!
//! The gateway resolves a snapshot id to its `{prefix_size, trailer}` pair
//! through the [`MetadataStore`] trait. The production store is a directory
//! of JSON documents, one per snapshot, in the exact shape the capture
//! pipeline emits; an in-memory store backs tests and embedding.

use crate::error::{GatewayError, Result};
use crate::models::{SnapshotMetadata, StoredSnapshot};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Key-value lookup of per-snapshot metadata
///
/// `resolve` must return both fields of an entry atomically: a store that
/// could pair a `prefix_size` from one write with a trailer from another is
/// non-conforming. Both implementations here read one document per call.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Look up a snapshot id, returning `None` when it is unknown
    async fn resolve(&self, id: &str) -> Result<Option<SnapshotMetadata>>;
}

/// Whether an id could name a stored snapshot
///
/// Ids are opaque to the pipeline, but in practice they are UTC timestamps
/// (`2023-11-01T00:00:00Z`). The filter admits that alphabet and rejects
/// anything that could escape the store directory; ids failing it resolve
/// to unknown without touching the filesystem.
fn id_is_safe(id: &str) -> bool {
    !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | ':' | '+' | '.' | '_'))
}

/// Directory-backed metadata store
///
/// Each snapshot lives in `<root>/<id>.json` as a [`StoredSnapshot`]
/// document. A missing file is an unknown snapshot; an unreadable or
/// malformed file is a store error.
pub struct FileMetadataStore {
    root: PathBuf,
}

impl FileMetadataStore {
    /// Create a store rooted at the given directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileMetadataStore { root: root.into() }
    }

    fn document_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}.json", id))
    }

    /// Directory this store reads from
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl MetadataStore for FileMetadataStore {
    async fn resolve(&self, id: &str) -> Result<Option<SnapshotMetadata>> {
        if !id_is_safe(id) {
            debug!("rejecting unsafe snapshot id: {:?}", id);
            return Ok(None);
        }

        let path = self.document_path(id);
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let stored: StoredSnapshot = serde_json::from_slice(&raw).map_err(|e| {
            GatewayError::MetadataStore(format!(
                "malformed snapshot document {}: {}",
                path.display(),
                e
            ))
        })?;

        let metadata = stored.decode()?;
        debug!(
            "resolved snapshot {}: prefix_size={} trailer={}B",
            id,
            metadata.prefix_size,
            metadata.trailer.len()
        );
        Ok(Some(metadata))
    }
}

/// In-memory metadata store for tests and embedding
#[derive(Default)]
pub struct MemoryMetadataStore {
    entries: HashMap<String, SnapshotMetadata>,
}

impl MemoryMetadataStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a snapshot entry
    pub fn insert(&mut self, id: impl Into<String>, metadata: SnapshotMetadata) {
        self.entries.insert(id.into(), metadata);
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn resolve(&self, id: &str) -> Result<Option<SnapshotMetadata>> {
        Ok(self.entries.get(id).cloned())
    }
}
