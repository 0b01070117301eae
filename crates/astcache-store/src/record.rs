//! On-disk entry format.
//!
//! Each entry is one JSON document at `<root>/<key>`:
//! `{"payload": ..., "metadata": {"cachedAt", "sourceAbsolutePath", "projectRoot"}}`.
//!
//! Writes are staged in `<root>/.staging/` and renamed into place, so an
//! entry's file name (the source file's own name) never collides with an
//! in-flight temp file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use astcache_key::CacheKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Directory directly below the cache root that holds in-flight writes.
/// Never a language bucket.
pub const STAGING_DIR: &str = ".staging";

/// Prefix of staged temp file names.
pub const TEMP_PREFIX: &str = ".tmp.";

/// Provenance stored next to every payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMetadata {
    /// When the entry was written
    pub cached_at: DateTime<Utc>,
    /// Absolute path of the analyzed source file
    pub source_absolute_path: PathBuf,
    /// Project root the key was computed against
    pub project_root: PathBuf,
}

/// The serialized record.
#[derive(Debug, Serialize, Deserialize)]
pub struct StoredRecord<T> {
    pub payload: T,
    pub metadata: EntryMetadata,
}

/// Metadata-only view of a record; the payload is skipped.
#[derive(Debug, Deserialize)]
struct RecordHeader {
    metadata: EntryMetadata,
}

/// A cache entry as returned to callers.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    pub key: CacheKey,
    pub payload: T,
    pub source_absolute_path: PathBuf,
    pub project_root: PathBuf,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
}

impl<T> CacheEntry<T> {
    pub(crate) fn from_record(key: CacheKey, record: StoredRecord<T>, size_bytes: u64) -> Self {
        Self {
            key,
            payload: record.payload,
            source_absolute_path: record.metadata.source_absolute_path,
            project_root: record.metadata.project_root,
            created_at: record.metadata.cached_at,
            size_bytes,
        }
    }
}

/// Read only the metadata of a record. `None` if unreadable or not a record.
pub fn read_metadata(path: &Path) -> Option<EntryMetadata> {
    let bytes = fs::read(path).ok()?;
    serde_json::from_slice::<RecordHeader>(&bytes)
        .ok()
        .map(|h| h.metadata)
}

/// Creation time of a record: `cachedAt`, or the file mtime for records
/// whose metadata cannot be read.
pub fn created_at(path: &Path, fallback: SystemTime) -> SystemTime {
    read_metadata(path)
        .map(|m| SystemTime::from(m.cached_at))
        .unwrap_or(fallback)
}

fn temp_file_name() -> String {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    format!(
        "{}{}.{}.{}",
        TEMP_PREFIX,
        std::process::id(),
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0),
        SEQ.fetch_add(1, Ordering::Relaxed)
    )
}

/// Write atomically: stage the bytes in `staging`, then rename into place.
///
/// `staging` must be on the same filesystem as `path`. Readers see either
/// the previous file or the complete new one.
pub fn write_atomic(staging: &Path, path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "entry path has no parent"))?;
    fs::create_dir_all(parent)?;
    fs::create_dir_all(staging)?;

    let temp_path = staging.join(temp_file_name());
    if let Err(e) = fs::write(&temp_path, bytes) {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    Ok(())
}
