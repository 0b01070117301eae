//! AST Cache - persistent, branch-aware cache for per-file analysis results
//!
//! Results are stored under deterministic keys
//! `{language}/{branch}-{content_identity}/{relative_path}`, so switching
//! branches or reverting a file hits entries written earlier. The cache
//! never looks inside the payload.
//!
//! [`initialize_ast_cache`] wires the [`CacheManager`] together with an
//! optional [`FileWatcher`], [`CacheCleaner`] and background cleanup.

pub mod config;
pub mod facade;
pub mod scheduler;
pub mod watcher;

pub use config::{AstCacheConfig, ConfigError};
pub use facade::{initialize_ast_cache, AstCache, AstCacheError, AstCacheResult, AstCacheStats};
pub use scheduler::CleanupScheduler;
pub use watcher::{ChangeType, FileChangedEvent, FileWatcher, WatchError, WatcherStatus};

pub use astcache_key::{
    content_digest, file_digest, generate_key, generate_keys, parse_key, sanitize_branch_name,
    should_exclude_file, CacheKey, ExcludeRules, KeyError, KeyGenerator, KeyedFile, LanguageTable,
};
pub use astcache_store::{
    format_bytes, parse_cache_max_age, parse_cache_max_size, CacheCleaner, CacheEntry,
    CacheManager, CacheSizeReport, CacheStatistics, CleanupLock, CleanupPolicy, CleanupReport,
    StageResult, StoreError,
};
