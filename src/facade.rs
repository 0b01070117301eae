//! Unified cache: manager plus optional watcher, cleaner and scheduler
//! behind one lifecycle.

use std::path::Path;
use std::sync::Arc;

use astcache_store::{
    CacheCleaner, CacheEntry, CacheManager, CacheSizeReport, CacheStatistics, StoreError,
};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{AstCacheConfig, ConfigError};
use crate::scheduler::CleanupScheduler;
use crate::watcher::{FileWatcher, WatchError};

/// Facade result type
pub type AstCacheResult<T> = Result<T, AstCacheError>;

/// Errors surfaced by the facade. Everything else degrades to a miss.
#[derive(Debug, Error)]
pub enum AstCacheError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("cache store error: {0}")]
    Store(#[from] StoreError),

    #[error("file watcher error: {0}")]
    Watch(#[from] WatchError),

    #[error("failed to start cleanup scheduler: {0}")]
    Scheduler(#[from] std::io::Error),

    #[error("shutdown failed: {0}")]
    Shutdown(String),
}

/// Combined statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AstCacheStats {
    pub cache: CacheStatistics,
    /// Present when a cleaner is configured
    pub size: Option<CacheSizeReport>,
}

/// The cache as the rest of the pipeline sees it.
pub struct AstCache {
    config: AstCacheConfig,
    manager: CacheManager,
    watcher: Option<FileWatcher>,
    cleaner: Option<Arc<CacheCleaner>>,
    scheduler: Mutex<Option<CleanupScheduler>>,
}

/// Build and start every configured component.
///
/// An unwritable cache root or an invalid config is an error; a watch path
/// that cannot be watched is only logged.
pub fn initialize_ast_cache(config: AstCacheConfig) -> AstCacheResult<AstCache> {
    config.validate()?;
    let keys = config.key_generator()?;

    let manager = CacheManager::with_key_generator(&config.cache_root, keys.clone());
    manager.initialize()?;

    let watcher = if config.enable_watcher {
        let watcher = FileWatcher::new(
            keys.languages().clone(),
            keys.excludes().clone(),
            config.debounce(),
        );
        watcher.initialize()?;
        for path in &config.watch_paths {
            watcher.watch(path);
        }
        Some(watcher)
    } else {
        None
    };

    let cleaner = if config.enable_cleaner {
        let cleaner = CacheCleaner::new(&config.cache_root, config.cleanup_policy()?);
        cleaner.initialize()?;
        Some(Arc::new(cleaner))
    } else {
        None
    };

    let scheduler = match (config.cleanup_interval()?, &cleaner) {
        (Some(interval), Some(cleaner)) => {
            Some(CleanupScheduler::start(Arc::clone(cleaner), interval)?)
        }
        (Some(_), None) => {
            warn!("cleanup_interval is set but the cleaner is disabled");
            None
        }
        (None, _) => None,
    };

    info!(
        root = %config.cache_root.display(),
        watcher = watcher.is_some(),
        cleaner = cleaner.is_some(),
        scheduled = scheduler.is_some(),
        "ast cache initialized"
    );

    Ok(AstCache {
        config,
        manager,
        watcher,
        cleaner,
        scheduler: Mutex::new(scheduler),
    })
}

impl AstCache {
    pub fn config(&self) -> &AstCacheConfig {
        &self.config
    }

    pub fn cache_manager(&self) -> &CacheManager {
        &self.manager
    }

    pub fn file_watcher(&self) -> Option<&FileWatcher> {
        self.watcher.as_ref()
    }

    pub fn cache_cleaner(&self) -> Option<&CacheCleaner> {
        self.cleaner.as_deref()
    }

    pub fn set<T: Serialize>(
        &self,
        file_path: &Path,
        project_root: &Path,
        payload: &T,
        branch: &str,
        content_identity: &str,
    ) -> bool {
        self.manager
            .set(file_path, project_root, payload, branch, content_identity)
    }

    pub fn get<T: DeserializeOwned>(
        &self,
        file_path: &Path,
        project_root: &Path,
        branch: &str,
        content_identity: &str,
    ) -> Option<CacheEntry<T>> {
        self.manager
            .get(file_path, project_root, branch, content_identity)
    }

    pub fn invalidate_file(&self, file_path: &Path, project_root: &Path, branch: &str) -> usize {
        self.manager.invalidate_file(file_path, project_root, branch)
    }

    pub fn clear(&self) -> bool {
        self.manager.clear()
    }

    /// Manager counters, plus a size report when a cleaner is configured.
    pub fn get_stats(&self) -> AstCacheStats {
        AstCacheStats {
            cache: self.manager.get_stats(),
            size: self.cleaner.as_ref().map(|c| c.get_cache_size()),
        }
    }

    /// Stop the scheduler and the watcher. Safe to call more than once.
    pub fn shutdown(&self) -> AstCacheResult<()> {
        let mut failures = Vec::new();

        if let Some(scheduler) = self.scheduler.lock().take() {
            if !scheduler.stop() {
                failures.push("cleanup scheduler panicked");
            }
        }

        if let Some(watcher) = &self.watcher {
            if !watcher.shutdown() {
                failures.push("watch dispatcher panicked");
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(AstCacheError::Shutdown(failures.join(", ")))
        }
    }
}

impl Drop for AstCache {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(error = %e, "ast cache shutdown on drop failed");
        }
    }
}
