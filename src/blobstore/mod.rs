//! Generation-addressed blob storage.
//!
//! Durable pipeline state (feature-list snapshots) lives in a blob store. Every
//! successful write to a path bumps that path's generation, and writers can
//! make a write conditional on the generation they last read. This is the only
//! mutable state shared between producer instances, so all coordination
//! between them happens through these preconditions.
//!
//! # Preconditions
//!
//! | [`ExpectedGeneration`] | raw | meaning                                   |
//! |------------------------|-----|-------------------------------------------|
//! | `DoesNotExist`         | 0   | create-only; fails if the blob exists     |
//! | `Any`                  | -1  | unconditional overwrite                   |
//! | `Matches(n)`           | n   | compare-and-swap against generation `n`   |
//!
//! A failed precondition surfaces as [`BlobError::PreconditionFailed`]; the
//! caller is expected to re-read and retry its whole read-modify-write cycle.
//!
//! # Backends
//!
//! - [`FsBlobStore`]: local directory, crash-safe via generation files
//! - [`MemoryBlobStore`]: in-process map, for tests and local runs

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::io;

use thiserror::Error;

pub mod fs;
pub mod fsync;
pub mod generation;
pub mod memory;

pub use fs::FsBlobStore;
pub use memory::MemoryBlobStore;

/// Errors returned by blob store operations.
#[derive(Debug, Error)]
pub enum BlobError {
    /// No blob exists at the path (or at the requested generation).
    #[error("blob not found: {0}")]
    BlobNotFound(String),

    /// The write or read precondition did not hold.
    #[error("precondition failed for {path}: expected {expected}, found {}", fmt_generation(.actual))]
    PreconditionFailed {
        path: String,
        expected: ExpectedGeneration,
        actual: Option<u64>,
    },

    /// The path is empty, absolute, or contains traversal segments.
    #[error("invalid blob path: {0}")]
    InvalidPath(String),

    /// IO error from the backing storage.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Metadata could not be (de)serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BlobError {
    /// Returns true if this is a missing-blob error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, BlobError::BlobNotFound(_))
    }

    /// Returns true if this is a generation precondition failure.
    pub fn is_precondition_failed(&self) -> bool {
        matches!(self, BlobError::PreconditionFailed { .. })
    }
}

fn fmt_generation(generation: &Option<u64>) -> String {
    match generation {
        Some(g) => format!("generation {g}"),
        None => "no blob".to_string(),
    }
}

/// Result type for blob store operations.
pub type Result<T> = std::result::Result<T, BlobError>;

/// The generation a conditional write expects the blob to be at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedGeneration {
    /// The blob must not exist yet (create-only).
    DoesNotExist,
    /// No precondition (force overwrite).
    Any,
    /// The blob must currently be at exactly this generation.
    Matches(u64),
}

impl ExpectedGeneration {
    /// Maps the integer convention (0 = create-only, negative = force,
    /// positive = compare-and-swap) onto the enum.
    pub fn from_raw(generation: i64) -> Self {
        match generation {
            0 => ExpectedGeneration::DoesNotExist,
            g if g < 0 => ExpectedGeneration::Any,
            g => ExpectedGeneration::Matches(g as u64),
        }
    }

    /// Returns the expectation matching a blob we just read, or `DoesNotExist`
    /// if the read found nothing.
    pub fn for_read(current: Option<u64>) -> Self {
        match current {
            Some(g) => ExpectedGeneration::Matches(g),
            None => ExpectedGeneration::DoesNotExist,
        }
    }

    /// Checks the expectation against the blob's current generation.
    pub fn check(&self, path: &str, current: Option<u64>) -> Result<()> {
        let ok = match (self, current) {
            (ExpectedGeneration::Any, _) => true,
            (ExpectedGeneration::DoesNotExist, None) => true,
            (ExpectedGeneration::Matches(want), Some(have)) => *want == have,
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(BlobError::PreconditionFailed {
                path: path.to_string(),
                expected: *self,
                actual: current,
            })
        }
    }
}

impl fmt::Display for ExpectedGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedGeneration::DoesNotExist => write!(f, "no blob"),
            ExpectedGeneration::Any => write!(f, "any generation"),
            ExpectedGeneration::Matches(g) => write!(f, "generation {g}"),
        }
    }
}

/// A blob read back from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub data: Vec<u8>,
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
    /// Generation of this version of the blob. Always >= 1.
    pub generation: u64,
}

/// Options for [`BlobStore::write_blob`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOptions {
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
    /// `None` behaves like [`ExpectedGeneration::Any`].
    pub expected_generation: Option<ExpectedGeneration>,
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_expected_generation(mut self, expected: ExpectedGeneration) -> Self {
        self.expected_generation = Some(expected);
        self
    }

    fn precondition(&self) -> ExpectedGeneration {
        self.expected_generation.unwrap_or(ExpectedGeneration::Any)
    }
}

/// Options for [`BlobStore::read_blob`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadOptions {
    /// If set, the read fails with `PreconditionFailed` unless the blob is
    /// currently at this generation.
    pub generation: Option<u64>,
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = Some(generation);
        self
    }
}

/// A generation-addressed object store.
///
/// Paths are `/`-separated relative keys such as `searches/abc/weekly.json`.
pub trait BlobStore: Send + Sync {
    /// Writes `data` at `path`, returning the new generation.
    fn write_blob(
        &self,
        path: &str,
        data: Vec<u8>,
        opts: WriteOptions,
    ) -> impl Future<Output = Result<u64>> + Send;

    /// Reads the current version of the blob at `path`.
    fn read_blob(&self, path: &str, opts: ReadOptions) -> impl Future<Output = Result<Blob>> + Send;
}

/// Validates that a blob path is a safe relative key.
///
/// A path is rejected if it:
/// - Is empty or starts with `/`
/// - Contains backslashes or null bytes
/// - Has an empty, `.` or `..` segment
pub fn validate_path(path: &str) -> Result<()> {
    let invalid = || Err(BlobError::InvalidPath(path.to_string()));

    if path.is_empty() || path.starts_with('/') {
        return invalid();
    }
    if path.contains('\\') || path.contains('\0') {
        return invalid();
    }
    if path
        .split('/')
        .any(|seg| seg.is_empty() || seg == "." || seg == "..")
    {
        return invalid();
    }
    Ok(())
}
