//! Generation files for the filesystem blob backend.
//!
//! Each blob key `<key>` maps to a small family of files:
//!
//! ```text
//! <key>.generation     # current generation number (single integer)
//! <key>.<N>            # blob bytes for generation N
//! <key>.<N>.meta       # content type + metadata for generation N (JSON)
//! ```
//!
//! A write lands `<key>.<N+1>` and its `.meta` first, then atomically replaces
//! the generation file. The generation file is the commit point: a crash before
//! it is replaced leaves generation N current and N+1 as garbage that the next
//! successful write overwrites.

use std::ffi::OsString;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use super::fsync::{fsync_dir, remove_if_exists, write_atomic};
use super::{BlobError, Result};

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = base.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Path of the generation pointer for a blob.
pub fn generation_path(base: &Path) -> PathBuf {
    with_suffix(base, ".generation")
}

/// Path of the data file for a given generation.
pub fn data_path(base: &Path, generation: u64) -> PathBuf {
    with_suffix(base, &format!(".{generation}"))
}

/// Path of the metadata sidecar for a given generation.
pub fn meta_path(base: &Path, generation: u64) -> PathBuf {
    with_suffix(base, &format!(".{generation}.meta"))
}

/// Reads the current generation of a blob.
///
/// Returns `Ok(None)` if the blob has never been written. An empty or
/// non-numeric generation file is reported as corrupt rather than treated as
/// absent, since treating it as absent would let a create-only write clobber
/// existing data.
pub fn read_generation(base: &Path) -> Result<Option<u64>> {
    let path = generation_path(base);

    match File::open(&path) {
        Ok(file) => {
            let mut line = String::new();
            BufReader::new(file).read_line(&mut line)?;
            line.trim().parse().map(Some).map_err(|_| {
                BlobError::Io(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("corrupt generation file {}: {:?}", path.display(), line.trim()),
                ))
            })
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Atomically points the blob at a new generation.
pub fn write_generation(base: &Path, generation: u64) -> Result<()> {
    write_atomic(&generation_path(base), format!("{generation}\n").as_bytes())?;
    Ok(())
}

/// Deletes the data and metadata files of a superseded generation.
///
/// Missing files are tolerated. Should only be called after the newer
/// generation is committed.
pub fn delete_generation(base: &Path, generation: u64) -> Result<()> {
    remove_if_exists(&data_path(base, generation))?;
    remove_if_exists(&meta_path(base, generation))?;

    if let Some(parent) = base.parent() {
        match fsync_dir(parent) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
