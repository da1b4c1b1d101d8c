//! In-memory blob store.

use std::collections::HashMap;

use tokio::sync::RwLock;

use super::{Blob, BlobError, BlobStore, ExpectedGeneration, ReadOptions, Result, WriteOptions, validate_path};

/// A [`BlobStore`] kept entirely in process memory.
///
/// Preconditions behave exactly as in the durable backends, which makes this
/// the store of choice for pipeline tests.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Blob>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs.
    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

impl BlobStore for MemoryBlobStore {
    async fn write_blob(&self, path: &str, data: Vec<u8>, opts: WriteOptions) -> Result<u64> {
        validate_path(path)?;
        let mut blobs = self.blobs.write().await;

        let current = blobs.get(path).map(|b| b.generation);
        opts.precondition().check(path, current)?;

        let generation = current.map_or(1, |g| g + 1);
        blobs.insert(
            path.to_string(),
            Blob {
                data,
                content_type: opts.content_type,
                metadata: opts.metadata,
                generation,
            },
        );
        Ok(generation)
    }

    async fn read_blob(&self, path: &str, opts: ReadOptions) -> Result<Blob> {
        validate_path(path)?;
        let blobs = self.blobs.read().await;

        let blob = blobs
            .get(path)
            .ok_or_else(|| BlobError::BlobNotFound(path.to_string()))?;
        if let Some(want) = opts.generation {
            ExpectedGeneration::Matches(want).check(path, Some(blob.generation))?;
        }
        Ok(blob.clone())
    }
}
