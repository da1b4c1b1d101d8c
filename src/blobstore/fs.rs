//! Filesystem-backed blob store.
//!
//! Blobs live under a root directory, one file family per key (see
//! [`super::generation`]). Writes are crash-safe: the generation pointer is
//! replaced atomically only after the new generation's data and metadata are
//! durable.
//!
//! Preconditions are enforced under an in-process lock, so a single
//! `FsBlobStore` instance is safe to share between tasks but two processes
//! pointing at the same root are not coordinated. File I/O runs on tokio's
//! blocking pool.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use super::fsync::write_atomic;
use super::generation::{data_path, delete_generation, meta_path, read_generation, write_generation};
use super::{Blob, BlobError, BlobStore, ExpectedGeneration, ReadOptions, Result, WriteOptions, validate_path};

/// Contents of the `<key>.<N>.meta` sidecar.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct BlobMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content_type: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    metadata: HashMap<String, String>,
}

/// A [`BlobStore`] rooted at a local directory.
pub struct FsBlobStore {
    root: PathBuf,
    lock: Mutex<()>,
}

impl FsBlobStore {
    /// Creates a store rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsBlobStore {
            root: root.into(),
            lock: Mutex::new(()),
        }
    }
}

/// Maps a key onto its file family under `root`.
fn base_path(root: &Path, path: &str) -> PathBuf {
    path.split('/').fold(root.to_path_buf(), |acc, seg| acc.join(seg))
}

/// Runs blocking file work off the async workers.
async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| BlobError::Io(io::Error::other(e)))?
}

fn write_sync(base: &Path, path: &str, data: &[u8], opts: WriteOptions) -> Result<u64> {
    let current = read_generation(base)?;
    opts.precondition().check(path, current)?;

    let next = current.map_or(1, |g| g + 1);
    let meta = BlobMeta {
        content_type: opts.content_type,
        metadata: opts.metadata,
    };

    write_atomic(&data_path(base, next), data)?;
    write_atomic(&meta_path(base, next), &serde_json::to_vec(&meta)?)?;
    write_generation(base, next)?;

    if let Some(prev) = current
        && let Err(e) = delete_generation(base, prev)
    {
        // The new generation is already committed; a stale file is only garbage.
        warn!(path, generation = prev, error = %e, "failed to delete superseded generation");
    }
    Ok(next)
}

fn read_sync(base: &Path, path: &str, opts: ReadOptions) -> Result<Blob> {
    let Some(generation) = read_generation(base)? else {
        return Err(BlobError::BlobNotFound(path.to_string()));
    };

    if let Some(want) = opts.generation {
        ExpectedGeneration::Matches(want).check(path, Some(generation))?;
    }

    let data = match std::fs::read(data_path(base, generation)) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(BlobError::BlobNotFound(path.to_string()));
        }
        Err(e) => return Err(e.into()),
    };

    let meta = match std::fs::read(meta_path(base, generation)) {
        Ok(bytes) => serde_json::from_slice(&bytes)?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => BlobMeta::default(),
        Err(e) => return Err(e.into()),
    };

    Ok(Blob {
        data,
        content_type: meta.content_type,
        metadata: meta.metadata,
        generation,
    })
}

impl BlobStore for FsBlobStore {
    #[instrument(skip(self, data, opts), fields(len = data.len()))]
    async fn write_blob(&self, path: &str, data: Vec<u8>, opts: WriteOptions) -> Result<u64> {
        validate_path(path)?;
        // Held across the blocking work so the precondition check and the
        // commit happen as one step.
        let _guard = self.lock.lock().await;

        let base = base_path(&self.root, path);
        let key = path.to_string();
        let next = blocking(move || write_sync(&base, &key, &data, opts)).await?;

        debug!(path, generation = next, "wrote blob");
        Ok(next)
    }

    #[instrument(skip(self, opts))]
    async fn read_blob(&self, path: &str, opts: ReadOptions) -> Result<Blob> {
        validate_path(path)?;
        let _guard = self.lock.lock().await;

        let base = base_path(&self.root, path);
        let key = path.to_string();
        blocking(move || read_sync(&base, &key, opts)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blobstore::generation::generation_path;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn read_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());

        let err = store.read_blob("a/b.json", ReadOptions::new()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn write_then_read_roundtrip() {
        let dir = tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let mut metadata = HashMap::new();
        metadata.insert("search".to_string(), "abc".to_string());

        let generation = store
            .write_blob(
                "searches/abc/weekly.json",
                b"{\"x\":1}".to_vec(),
                WriteOptions::new()
                    .with_content_type("application/json")
                    .with_metadata(metadata.clone()),
            )
            .await
            .unwrap();
        assert_eq!(generation, 1);

        let blob = store
            .read_blob("searches/abc/weekly.json", ReadOptions::new())
            .await
            .unwrap();
        assert_eq!(blob.data, b"{\"x\":1}");
        assert_eq!(blob.generation, 1);
        assert_eq!(blob.content_type.as_deref(), Some("application/json"));
        assert_eq!(blob.metadata, metadata);
    }

    #[tokio::test]
    async fn generations_increase_and_old_files_are_removed() {
        let dir = tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());

        store.write_blob("k", b"1".to_vec(), WriteOptions::new()).await.unwrap();
        let g2 = store.write_blob("k", b"2".to_vec(), WriteOptions::new()).await.unwrap();
        assert_eq!(g2, 2);

        let base = dir.path().join("k");
        assert!(!data_path(&base, 1).exists());
        assert!(data_path(&base, 2).exists());
        assert_eq!(std::fs::read_to_string(generation_path(&base)).unwrap().trim(), "2");
    }

    #[tokio::test]
    async fn create_only_rejects_existing_blob() {
        let dir = tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let create_only = WriteOptions::new().with_expected_generation(ExpectedGeneration::DoesNotExist);

        store.write_blob("k", b"a".to_vec(), create_only.clone()).await.unwrap();
        let err = store.write_blob("k", b"b".to_vec(), create_only).await.unwrap_err();

        assert!(err.is_precondition_failed());
        let blob = store.read_blob("k", ReadOptions::new()).await.unwrap();
        assert_eq!(blob.data, b"a", "failed write must not change the blob");
    }

    #[tokio::test]
    async fn compare_and_swap_detects_stale_writer() {
        let dir = tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());

        let g1 = store.write_blob("k", b"a".to_vec(), WriteOptions::new()).await.unwrap();
        let cas = WriteOptions::new().with_expected_generation(ExpectedGeneration::Matches(g1));

        // First writer holding g1 wins, second writer holding g1 loses.
        store.write_blob("k", b"b".to_vec(), cas.clone()).await.unwrap();
        let err = store.write_blob("k", b"c".to_vec(), cas).await.unwrap_err();
        assert!(matches!(
            err,
            BlobError::PreconditionFailed { actual: Some(2), .. }
        ));
    }

    #[tokio::test]
    async fn read_with_stale_generation_fails() {
        let dir = tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        store.write_blob("k", b"a".to_vec(), WriteOptions::new()).await.unwrap();
        store.write_blob("k", b"b".to_vec(), WriteOptions::new()).await.unwrap();

        let err = store
            .read_blob("k", ReadOptions::new().with_generation(1))
            .await
            .unwrap_err();
        assert!(err.is_precondition_failed());
        assert!(store.read_blob("k", ReadOptions::new().with_generation(2)).await.is_ok());
    }

    #[tokio::test]
    async fn invalid_path_is_rejected() {
        let dir = tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());

        let err = store
            .write_blob("../escape", b"x".to_vec(), WriteOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::InvalidPath(_)));
    }

    #[tokio::test]
    async fn concurrent_create_only_has_single_winner() {
        let dir = tempdir().unwrap();
        let store = Arc::new(FsBlobStore::new(dir.path()));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    store
                        .write_blob(
                            "race",
                            vec![i as u8],
                            WriteOptions::new()
                                .with_expected_generation(ExpectedGeneration::DoesNotExist),
                        )
                        .await
                })
            })
            .collect();

        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn compare_and_swap_writers_each_commit_once() {
        let dir = tempdir().unwrap();
        let store = Arc::new(FsBlobStore::new(dir.path()));

        let handles: Vec<_> = (0..8u8)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    loop {
                        let current = match store.read_blob("counter", ReadOptions::new()).await {
                            Ok(blob) => Some(blob.generation),
                            Err(e) if e.is_not_found() => None,
                            Err(e) => panic!("read failed: {e}"),
                        };
                        let opts = WriteOptions::new()
                            .with_expected_generation(ExpectedGeneration::for_read(current));
                        match store.write_blob("counter", vec![i], opts).await {
                            Ok(generation) => return generation,
                            Err(e) if e.is_precondition_failed() => continue,
                            Err(e) => panic!("write failed: {e}"),
                        }
                    }
                })
            })
            .collect();

        let mut generations = Vec::new();
        for handle in handles {
            generations.push(handle.await.unwrap());
        }
        generations.sort_unstable();
        assert_eq!(generations, (1..=8).collect::<Vec<u64>>());

        let blob = store.read_blob("counter", ReadOptions::new()).await.unwrap();
        assert_eq!(blob.generation, 8);
    }
}
