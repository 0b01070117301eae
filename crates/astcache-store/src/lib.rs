//! On-disk store for AST analysis results.
//!
//! - [`CacheManager`]: get/set/invalidate/clear over the key layout
//! - [`CacheCleaner`]: age, size, orphan and empty-directory cleanup
//! - [`CleanupLock`]: one cleanup pass per cache root at a time

pub mod cleaner;
pub mod lock;
pub mod manager;
pub mod record;

pub use cleaner::{
    format_bytes, parse_cache_max_age, parse_cache_max_size, CacheCleaner, CacheSizeReport,
    CleanupDetails, CleanupPolicy, CleanupReport, LanguageUsage, StageResult, UnitError,
};
pub use lock::{CleanupLock, LockError, LockResult};
pub use manager::{CacheManager, CacheStatistics, StoreError, StoreResult};
pub use record::{CacheEntry, EntryMetadata};
