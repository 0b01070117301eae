//! Streaming enumeration of the store.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use astcache_key::CacheKey;
use walkdir::WalkDir;

use crate::lock::CleanupLock;
use crate::record::STAGING_DIR;

/// One file found under the cache root.
#[derive(Debug)]
pub(crate) enum ScanItem {
    /// A record at a path that parses as a cache key.
    Entry(ScannedEntry),
    /// An in-flight or abandoned temp file in the staging directory.
    Temp {
        path: PathBuf,
        size: u64,
        modified: SystemTime,
    },
    /// A file or directory that could not be read. Skipped.
    Error(String),
}

#[derive(Debug, Clone)]
pub(crate) struct ScannedEntry {
    pub path: PathBuf,
    pub key: CacheKey,
    pub size: u64,
    pub modified: SystemTime,
}

/// Walk `root` lazily. Directories are not yielded; files that are neither
/// records nor staged temp files are ignored.
pub(crate) fn scan(root: &Path) -> impl Iterator<Item = ScanItem> + '_ {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(move |item| {
            let entry = match item {
                Ok(entry) => entry,
                Err(e) => {
                    let missing = e
                        .io_error()
                        .is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound);
                    return if missing {
                        None
                    } else {
                        Some(ScanItem::Error(e.to_string()))
                    };
                }
            };

            if !entry.file_type().is_file() {
                return None;
            }

            let is_lock = entry.depth() == 1 && entry.file_name() == CleanupLock::LOCK_FILENAME;
            if is_lock {
                return None;
            }
            let is_temp = in_staging(root, entry.path());

            let meta = match entry.metadata() {
                Ok(meta) => meta,
                Err(e) => {
                    let missing = e
                        .io_error()
                        .is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound);
                    return if missing {
                        None
                    } else {
                        Some(ScanItem::Error(format!(
                            "failed to stat {}: {}",
                            entry.path().display(),
                            e
                        )))
                    };
                }
            };
            let size = meta.len();
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);

            if is_temp {
                return Some(ScanItem::Temp {
                    path: entry.into_path(),
                    size,
                    modified,
                });
            }

            if entry.depth() < 3 {
                return None;
            }

            let key = key_for(root, entry.path())?;
            Some(ScanItem::Entry(ScannedEntry {
                path: entry.into_path(),
                key,
                size,
                modified,
            }))
        })
}

fn in_staging(root: &Path, path: &Path) -> bool {
    path.strip_prefix(root)
        .ok()
        .and_then(|rel| rel.components().next())
        .is_some_and(|first| first.as_os_str() == STAGING_DIR)
}

fn key_for(root: &Path, path: &Path) -> Option<CacheKey> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Option<Vec<&str>> = rel.components().map(|c| c.as_os_str().to_str()).collect();
    CacheKey::parse(&parts?.join("/")).ok()
}
