//! Cache manager: the on-disk store of AST results.
//!
//! Layout: `<cache_root>/<language>/<branch>-<content_identity>/<relative_path>`
//!
//! Read and write paths never fail loudly. Storage faults become misses on
//! `get` and `false` on `set`/`clear`, so a broken cache only costs
//! recomputation.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use astcache_key::{CacheKey, KeyError, KeyGenerator};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::lock::CleanupLock;
use crate::record::{write_atomic, CacheEntry, EntryMetadata, StoredRecord, STAGING_DIR};

/// Store result type
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("key error: {0}")]
    Key(#[from] KeyError),

    #[error("language {0:?} is reserved by the cache store")]
    ReservedLanguage(String),

    #[error("cache root {path} is not writable: {source}")]
    NotWritable { path: PathBuf, source: io::Error },
}

/// Hit/miss/write/invalidation counters for one manager instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStatistics {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub invalidations: u64,
}

impl CacheStatistics {
    /// Fraction of lookups that hit, 0.0 when nothing was looked up.
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    invalidations: AtomicU64,
}

/// Cache manager.
///
/// All methods take `&self`; share it across threads behind an `Arc`.
#[derive(Debug)]
pub struct CacheManager {
    cache_root: PathBuf,
    keys: KeyGenerator,
    counters: Counters,
}

impl CacheManager {
    /// Probe file used by [`CacheManager::initialize`].
    const PROBE_FILENAME: &'static str = ".write_probe";

    /// Create a manager over `cache_root` with the default key tables.
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self::with_key_generator(cache_root, KeyGenerator::default())
    }

    pub fn with_key_generator(cache_root: impl Into<PathBuf>, keys: KeyGenerator) -> Self {
        Self {
            cache_root: cache_root.into(),
            keys,
            counters: Counters::default(),
        }
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    pub fn key_generator(&self) -> &KeyGenerator {
        &self.keys
    }

    /// Ensure the cache root exists and is writable.
    ///
    /// Unlike every other operation this one reports failure: an unusable
    /// cache root is a configuration error.
    pub fn initialize(&self) -> StoreResult<()> {
        let not_writable = |source| StoreError::NotWritable {
            path: self.cache_root.clone(),
            source,
        };

        fs::create_dir_all(&self.cache_root).map_err(not_writable)?;

        let probe = self.cache_root.join(Self::PROBE_FILENAME);
        File::create(&probe).map_err(not_writable)?;
        let _ = fs::remove_file(&probe);

        debug!(root = %self.cache_root.display(), "cache initialized");
        Ok(())
    }

    /// Filesystem path of an entry.
    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.cache_root.join(key.to_relative_path())
    }

    /// Store `payload` for a file version. Returns `false` on any failure.
    pub fn set<T: Serialize>(
        &self,
        file_path: &Path,
        project_root: &Path,
        payload: &T,
        branch: &str,
        content_identity: &str,
    ) -> bool {
        match self.try_set(file_path, project_root, payload, branch, content_identity) {
            Ok(key) => {
                self.counters.writes.fetch_add(1, Ordering::Relaxed);
                debug!(%key, "cache write");
                true
            }
            Err(e) => {
                warn!(file = %file_path.display(), error = %e, "cache write failed");
                false
            }
        }
    }

    fn try_set<T: Serialize>(
        &self,
        file_path: &Path,
        project_root: &Path,
        payload: &T,
        branch: &str,
        content_identity: &str,
    ) -> StoreResult<CacheKey> {
        let key = self
            .keys
            .cache_key(file_path, project_root, branch, content_identity)?;
        if key.language == STAGING_DIR {
            return Err(StoreError::ReservedLanguage(key.language));
        }

        let record = StoredRecord {
            payload,
            metadata: EntryMetadata {
                cached_at: Utc::now(),
                source_absolute_path: absolute_source(file_path, project_root),
                project_root: project_root.to_path_buf(),
            },
        };
        let bytes = serde_json::to_vec(&record)?;
        write_atomic(&self.cache_root.join(STAGING_DIR), &self.entry_path(&key), &bytes)?;

        Ok(key)
    }

    /// Look up a file version. `None` on absence, unreadable or unparsable
    /// records, and invalid keys.
    pub fn get<T: DeserializeOwned>(
        &self,
        file_path: &Path,
        project_root: &Path,
        branch: &str,
        content_identity: &str,
    ) -> Option<CacheEntry<T>> {
        let entry = match self.try_get(file_path, project_root, branch, content_identity) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(file = %file_path.display(), error = %e, "cache read failed, treating as miss");
                None
            }
        };

        let counter = if entry.is_some() {
            &self.counters.hits
        } else {
            &self.counters.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);

        entry
    }

    fn try_get<T: DeserializeOwned>(
        &self,
        file_path: &Path,
        project_root: &Path,
        branch: &str,
        content_identity: &str,
    ) -> StoreResult<Option<CacheEntry<T>>> {
        let key = self
            .keys
            .cache_key(file_path, project_root, branch, content_identity)?;

        let bytes = match fs::read(self.entry_path(&key)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(%key, "cache miss");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let record: StoredRecord<T> = serde_json::from_slice(&bytes)?;
        debug!(%key, "cache hit");
        Ok(Some(CacheEntry::from_record(key, record, bytes.len() as u64)))
    }

    /// Remove every content-identity variant of a file on a branch.
    ///
    /// Returns the number of entries removed.
    pub fn invalidate_file(&self, file_path: &Path, project_root: &Path, branch: &str) -> usize {
        let scope = match self.keys.file_scope(file_path, project_root, branch) {
            Ok(scope) => scope,
            Err(e) => {
                warn!(file = %file_path.display(), error = %e, "cannot invalidate");
                return 0;
            }
        };

        let language_dir = self.cache_root.join(&scope.language);
        let segments = match fs::read_dir(&language_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return 0,
            Err(e) => {
                warn!(dir = %language_dir.display(), error = %e, "cannot list cache directory");
                return 0;
            }
        };

        let mut removed = 0;
        for segment in segments.flatten() {
            let name = segment.file_name();
            let Some(name) = name.to_str() else { continue };
            if !scope.owns_segment(name) {
                continue;
            }

            let Some((_, hash)) = astcache_key::split_segment(name) else { continue };
            let path = self.entry_path(&scope.with_hash(hash));
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove entry"),
            }
        }

        self.counters
            .invalidations
            .fetch_add(removed as u64, Ordering::Relaxed);
        debug!(file = %file_path.display(), removed, "invalidated");
        removed
    }

    /// Delete everything under the cache root. The root itself is kept.
    pub fn clear(&self) -> bool {
        let entries = match fs::read_dir(&self.cache_root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return true,
            Err(e) => {
                warn!(root = %self.cache_root.display(), error = %e, "cannot clear cache");
                return false;
            }
        };

        let mut ok = true;
        for entry in entries.flatten() {
            if entry.file_name() == CleanupLock::LOCK_FILENAME {
                continue;
            }

            let path = entry.path();
            let result = match entry.file_type() {
                Ok(t) if t.is_dir() => fs::remove_dir_all(&path),
                _ => fs::remove_file(&path),
            };
            match result {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to clear");
                    ok = false;
                }
            }
        }

        debug!(root = %self.cache_root.display(), ok, "cache cleared");
        ok
    }

    /// Current counters.
    pub fn get_stats(&self) -> CacheStatistics {
        CacheStatistics {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
        }
    }

    /// Zero all counters.
    pub fn reset_stats(&self) {
        self.counters.hits.store(0, Ordering::Relaxed);
        self.counters.misses.store(0, Ordering::Relaxed);
        self.counters.writes.store(0, Ordering::Relaxed);
        self.counters.invalidations.store(0, Ordering::Relaxed);
    }
}

fn absolute_source(file_path: &Path, project_root: &Path) -> PathBuf {
    if file_path.is_absolute() {
        file_path.to_path_buf()
    } else {
        project_root.join(file_path)
    }
}
