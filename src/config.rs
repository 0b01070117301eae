//! Cache configuration (`ast-cache.toml` or built in code)
//!
//! Every field has a default, so an empty document is a valid config.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use astcache_key::{ExcludeError, ExcludeRules, KeyGenerator, LanguageTable};
use astcache_store::{parse_cache_max_age, CleanupPolicy, UnitError};
use serde::{Deserialize, Serialize};

/// Error types for config operations
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid unit: {0}")]
    UnitError(#[from] UnitError),

    #[error("Invalid exclude pattern: {0}")]
    ExcludeError(#[from] ExcludeError),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Configuration for [`crate::initialize_ast_cache`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AstCacheConfig {
    /// Directory holding the store
    pub cache_root: PathBuf,

    /// Start a file watcher
    pub enable_watcher: bool,

    /// Create a cache cleaner
    pub enable_cleaner: bool,

    /// Maximum entry age, e.g. "7d"
    pub max_age: String,

    /// Maximum store size, e.g. "1GB"
    pub max_size: String,

    /// Run cleanup in the background at this interval, e.g. "1h"
    pub cleanup_interval: Option<String>,

    /// Per-file debounce window for change events
    pub debounce_ms: u64,

    /// Directories watched right after startup
    pub watch_paths: Vec<PathBuf>,

    /// Glob patterns excluded in addition to the built-in list
    pub exclude_patterns: Vec<String>,

    /// Extra `extension = "language"` mappings
    pub languages: BTreeMap<String, String>,

    /// Cleanup counts what it would delete without deleting
    pub dry_run: bool,
}

impl Default for AstCacheConfig {
    fn default() -> Self {
        Self {
            cache_root: PathBuf::from(".ast-cache"),
            enable_watcher: false,
            enable_cleaner: true,
            max_age: "7d".to_string(),
            max_size: "1GB".to_string(),
            cleanup_interval: None,
            debounce_ms: 300,
            watch_paths: Vec::new(),
            exclude_patterns: Vec::new(),
            languages: BTreeMap::new(),
            dry_run: false,
        }
    }
}

impl AstCacheConfig {
    /// Default config rooted at `cache_root`.
    pub fn with_cache_root(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
            ..Self::default()
        }
    }

    /// Load and parse config from a TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parse config from a TOML string
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: AstCacheConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Check unit strings and patterns up front so startup fails loudly.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_root.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "'cache_root' must not be empty".to_string(),
            ));
        }

        self.cleanup_policy()?;
        self.cleanup_interval()?;
        self.exclude_rules()?;

        for (ext, language) in &self.languages {
            // The language is a directory name directly below the cache root,
            // where dot-names are reserved for the store itself.
            let bad_language = language.is_empty()
                || language.starts_with('.')
                || language.contains(['/', '\\']);
            if ext.trim_start_matches('.').is_empty() || bad_language {
                return Err(ConfigError::ValidationError(format!(
                    "invalid language mapping '{}' = '{}'",
                    ext, language
                )));
            }
        }

        Ok(())
    }

    pub fn cleanup_policy(&self) -> Result<CleanupPolicy, ConfigError> {
        let policy = CleanupPolicy::from_limits(&self.max_age, &self.max_size)?;
        Ok(if self.dry_run { policy.with_dry_run() } else { policy })
    }

    /// Background cleanup interval, if configured. Zero is rejected.
    pub fn cleanup_interval(&self) -> Result<Option<Duration>, ConfigError> {
        let Some(interval) = &self.cleanup_interval else {
            return Ok(None);
        };

        let ms = parse_cache_max_age(interval)?;
        if ms == 0 {
            return Err(ConfigError::ValidationError(
                "'cleanup_interval' must be greater than zero".to_string(),
            ));
        }
        Ok(Some(Duration::from_millis(ms)))
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn language_table(&self) -> LanguageTable {
        let mut table = LanguageTable::default();
        for (ext, language) in &self.languages {
            table.insert(ext, language);
        }
        table
    }

    pub fn exclude_rules(&self) -> Result<ExcludeRules, ConfigError> {
        let rules = ExcludeRules::new()?;
        if self.exclude_patterns.is_empty() {
            return Ok(rules);
        }

        let extra: Vec<&str> = self.exclude_patterns.iter().map(String::as_str).collect();
        Ok(rules.with_patterns(&extra)?)
    }

    pub fn key_generator(&self) -> Result<KeyGenerator, ConfigError> {
        Ok(KeyGenerator::new(self.language_table(), self.exclude_rules()?))
    }
}
