//! Cache cleanup and eviction
//!
//! Four stages run in order:
//! - age: entries cached longer ago than `max_age`
//! - size: oldest entries first until the store fits in `max_size_bytes`
//! - orphans: entries whose source file is gone, plus abandoned temp files
//!   in the staging directory
//! - directories: empty directories left behind by the other stages
//!
//! Per-file failures are recorded in the stage result and skipped. A stage
//! is marked not completed only when the cache root cannot be read at all.

mod scan;
mod units;

pub use units::{format_bytes, parse_cache_max_age, parse_cache_max_size, UnitError};

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::lock::CleanupLock;
use crate::manager::StoreResult;
use crate::record::{created_at, read_metadata, STAGING_DIR};
use scan::{scan, ScanItem, ScannedEntry};

/// Eviction policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupPolicy {
    /// Maximum entry age (zero = unlimited)
    pub max_age: Duration,
    /// Maximum total store size in bytes (0 = unlimited)
    pub max_size_bytes: u64,
    /// Temp files older than this are considered abandoned
    pub orphan_temp_age: Duration,
    /// Count what would be deleted without deleting it
    pub dry_run: bool,
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(7 * 24 * 60 * 60),
            max_size_bytes: 1024 * 1024 * 1024,
            orphan_temp_age: Duration::from_secs(60 * 60),
            dry_run: false,
        }
    }
}

impl CleanupPolicy {
    /// Build a policy from unit strings such as `"7d"` and `"1GB"`.
    pub fn from_limits(max_age: &str, max_size: &str) -> Result<Self, UnitError> {
        Ok(Self {
            max_age: Duration::from_millis(parse_cache_max_age(max_age)?),
            max_size_bytes: parse_cache_max_size(max_size)?,
            ..Self::default()
        })
    }

    pub fn age_based(max_age: Duration) -> Self {
        Self {
            max_age,
            max_size_bytes: 0,
            ..Self::default()
        }
    }

    pub fn size_based(max_size_bytes: u64) -> Self {
        Self {
            max_age: Duration::ZERO,
            max_size_bytes,
            ..Self::default()
        }
    }

    pub fn with_dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }
}

/// Outcome of one cleanup stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResult {
    pub files_deleted: usize,
    pub bytes_freed: u64,
    pub directories_removed: usize,
    /// Non-fatal errors, one per skipped file
    pub errors: Vec<String>,
    /// False when the stage could not run
    pub completed: bool,
}

impl StageResult {
    fn completed() -> Self {
        Self {
            completed: true,
            ..Self::default()
        }
    }

    fn not_run(reason: String) -> Self {
        Self {
            errors: vec![reason],
            completed: false,
            ..Self::default()
        }
    }
}

/// Per-stage results of a full pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupDetails {
    pub age_cleanup: StageResult,
    pub size_cleanup: StageResult,
    pub orphan_cleanup: StageResult,
    pub directory_cleanup: StageResult,
}

impl CleanupDetails {
    fn stages(&self) -> [&StageResult; 4] {
        [
            &self.age_cleanup,
            &self.size_cleanup,
            &self.orphan_cleanup,
            &self.directory_cleanup,
        ]
    }

    /// Files deleted across all stages.
    pub fn files_deleted(&self) -> usize {
        self.stages().iter().map(|s| s.files_deleted).sum()
    }

    /// Bytes freed across all stages.
    pub fn bytes_freed(&self) -> u64 {
        self.stages().iter().map(|s| s.bytes_freed).sum()
    }
}

/// Result of [`CacheCleaner::cleanup`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// True when every stage ran
    pub success: bool,
    pub details: CleanupDetails,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageUsage {
    pub files: usize,
    pub size: u64,
}

/// Store usage, aggregated per language.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSizeReport {
    pub total_files: usize,
    pub total_size: u64,
    pub languages: BTreeMap<String, LanguageUsage>,
}

/// Cache cleaner.
#[derive(Debug, Clone)]
pub struct CacheCleaner {
    cache_root: PathBuf,
    policy: CleanupPolicy,
    lock_timeout: Duration,
}

impl CacheCleaner {
    pub fn new(cache_root: impl Into<PathBuf>, policy: CleanupPolicy) -> Self {
        Self {
            cache_root: cache_root.into(),
            policy,
            lock_timeout: Duration::ZERO,
        }
    }

    /// How long [`CacheCleaner::cleanup`] waits for a concurrent pass.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    pub fn policy(&self) -> &CleanupPolicy {
        &self.policy
    }

    /// Ensure the cache root exists.
    pub fn initialize(&self) -> StoreResult<()> {
        fs::create_dir_all(&self.cache_root)?;
        Ok(())
    }

    /// Run all stages in order under the cleanup lock.
    pub fn cleanup(&self) -> CleanupReport {
        let _lock = match CleanupLock::acquire(&self.cache_root, self.lock_timeout) {
            Ok(lock) => lock,
            Err(e) => {
                warn!(root = %self.cache_root.display(), error = %e, "cleanup skipped");
                let reason = format!("cleanup lock unavailable: {}", e);
                return CleanupReport {
                    success: false,
                    details: CleanupDetails {
                        age_cleanup: StageResult::not_run(reason.clone()),
                        size_cleanup: StageResult::not_run(reason.clone()),
                        orphan_cleanup: StageResult::not_run(reason.clone()),
                        directory_cleanup: StageResult::not_run(reason),
                    },
                };
            }
        };

        let details = CleanupDetails {
            age_cleanup: self.cleanup_by_age(),
            size_cleanup: self.cleanup_by_size(),
            orphan_cleanup: self.cleanup_orphans(),
            directory_cleanup: self.cleanup_empty_directories(),
        };
        let success = details.stages().iter().all(|s| s.completed);

        info!(
            root = %self.cache_root.display(),
            success,
            files_deleted = details.files_deleted(),
            freed = %format_bytes(details.bytes_freed()),
            directories_removed = details.directory_cleanup.directories_removed,
            dry_run = self.policy.dry_run,
            "cleanup finished"
        );

        CleanupReport { success, details }
    }

    /// Delete entries older than `max_age`.
    pub fn cleanup_by_age(&self) -> StageResult {
        let mut result = match self.begin_stage() {
            Ok(result) => result,
            Err(not_run) => return not_run,
        };
        if self.policy.max_age.is_zero() {
            return result;
        }

        let now = SystemTime::now();
        for item in scan(&self.cache_root) {
            let entry = match item {
                ScanItem::Entry(entry) => entry,
                ScanItem::Error(e) => {
                    result.errors.push(e);
                    continue;
                }
                ScanItem::Temp { .. } => continue,
            };

            let created = created_at(&entry.path, entry.modified);
            let expired = now
                .duration_since(created)
                .is_ok_and(|age| age > self.policy.max_age);
            if expired {
                self.delete_file(&entry.path, entry.size, &mut result);
            }
        }

        debug!(deleted = result.files_deleted, "age cleanup");
        result
    }

    /// Delete oldest entries until the store fits in `max_size_bytes`.
    pub fn cleanup_by_size(&self) -> StageResult {
        let mut result = match self.begin_stage() {
            Ok(result) => result,
            Err(not_run) => return not_run,
        };
        if self.policy.max_size_bytes == 0 {
            return result;
        }

        let mut entries: Vec<(SystemTime, ScannedEntry)> = Vec::new();
        for item in scan(&self.cache_root) {
            match item {
                ScanItem::Entry(entry) => {
                    let created = created_at(&entry.path, entry.modified);
                    entries.push((created, entry));
                }
                ScanItem::Error(e) => result.errors.push(e),
                ScanItem::Temp { .. } => {}
            }
        }

        let mut total: u64 = entries.iter().map(|(_, e)| e.size).sum();
        if total <= self.policy.max_size_bytes {
            return result;
        }

        entries.sort_by_key(|(created, _)| *created);
        for (_, entry) in &entries {
            if total <= self.policy.max_size_bytes {
                break;
            }
            if self.delete_file(&entry.path, entry.size, &mut result) {
                total = total.saturating_sub(entry.size);
            }
        }

        debug!(deleted = result.files_deleted, remaining = total, "size cleanup");
        result
    }

    /// Delete entries whose source file no longer exists, unreadable
    /// records, and abandoned temp files.
    pub fn cleanup_orphans(&self) -> StageResult {
        let mut result = match self.begin_stage() {
            Ok(result) => result,
            Err(not_run) => return not_run,
        };

        let now = SystemTime::now();
        for item in scan(&self.cache_root) {
            match item {
                ScanItem::Entry(entry) => {
                    let Some(metadata) = read_metadata(&entry.path) else {
                        // Vanished since the scan, or not a record.
                        if entry.path.exists() {
                            debug!(path = %entry.path.display(), "unreadable record");
                            self.delete_file(&entry.path, entry.size, &mut result);
                        }
                        continue;
                    };

                    match metadata.source_absolute_path.try_exists() {
                        Ok(true) => {}
                        Ok(false) => {
                            self.delete_file(&entry.path, entry.size, &mut result);
                        }
                        Err(e) => result.errors.push(format!(
                            "failed to check source {}: {}",
                            metadata.source_absolute_path.display(),
                            e
                        )),
                    }
                }
                ScanItem::Temp {
                    path,
                    size,
                    modified,
                } => {
                    let abandoned = now
                        .duration_since(modified)
                        .is_ok_and(|age| age > self.policy.orphan_temp_age);
                    if abandoned {
                        self.delete_file(&path, size, &mut result);
                    }
                }
                ScanItem::Error(e) => result.errors.push(e),
            }
        }

        debug!(deleted = result.files_deleted, "orphan cleanup");
        result
    }

    /// Remove empty directories below the cache root. The root and the
    /// staging directory are kept.
    pub fn cleanup_empty_directories(&self) -> StageResult {
        let mut result = match self.begin_stage() {
            Ok(result) => result,
            Err(not_run) => return not_run,
        };

        let walker = WalkDir::new(&self.cache_root)
            .min_depth(1)
            .follow_links(false)
            .contents_first(true);

        for item in walker {
            let entry = match item {
                Ok(entry) => entry,
                Err(e) => {
                    if !is_not_found(e.io_error()) {
                        result.errors.push(e.to_string());
                    }
                    continue;
                }
            };
            if !entry.file_type().is_dir() || !is_empty_dir(entry.path()) {
                continue;
            }
            if entry.depth() == 1 && entry.file_name() == STAGING_DIR {
                continue;
            }

            if self.policy.dry_run {
                debug!(path = %entry.path().display(), "dry run: would remove directory");
                result.directories_removed += 1;
                continue;
            }

            match fs::remove_dir(entry.path()) {
                Ok(()) => result.directories_removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                // Repopulated by a concurrent write.
                Err(_) if !is_empty_dir(entry.path()) => {}
                Err(e) => result
                    .errors
                    .push(format!("failed to remove {}: {}", entry.path().display(), e)),
            }
        }

        debug!(removed = result.directories_removed, "directory cleanup");
        result
    }

    /// Count and size every entry, per language.
    pub fn get_cache_size(&self) -> CacheSizeReport {
        let mut report = CacheSizeReport::default();

        for item in scan(&self.cache_root) {
            if let ScanItem::Entry(entry) = item {
                report.total_files += 1;
                report.total_size += entry.size;

                let usage = report.languages.entry(entry.key.language).or_default();
                usage.files += 1;
                usage.size += entry.size;
            }
        }

        report
    }

    /// A missing root is nothing to do. An unreadable one stops the stage.
    fn begin_stage(&self) -> Result<StageResult, StageResult> {
        match fs::read_dir(&self.cache_root) {
            Ok(_) => Ok(StageResult::completed()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(StageResult::completed()),
            Err(e) => {
                warn!(root = %self.cache_root.display(), error = %e, "cache root unreadable");
                Err(StageResult::not_run(format!(
                    "cannot read {}: {}",
                    self.cache_root.display(),
                    e
                )))
            }
        }
    }

    /// Returns whether the file is gone (or would be, in dry-run mode).
    fn delete_file(&self, path: &Path, size: u64, result: &mut StageResult) -> bool {
        if self.policy.dry_run {
            debug!(path = %path.display(), size, "dry run: would delete");
        } else {
            match fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), size, "deleted"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => return true,
                Err(e) => {
                    result
                        .errors
                        .push(format!("failed to delete {}: {}", path.display(), e));
                    return false;
                }
            }
        }

        result.files_deleted += 1;
        result.bytes_freed += size;
        true
    }
}

fn is_not_found(e: Option<&io::Error>) -> bool {
    e.is_some_and(|e| e.kind() == io::ErrorKind::NotFound)
}

fn is_empty_dir(path: &Path) -> bool {
    fs::read_dir(path).is_ok_and(|mut entries| entries.next().is_none())
}
