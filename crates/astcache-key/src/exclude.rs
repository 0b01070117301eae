//! Exclusion rules for cacheable and watchable files
//!
//! A path is excluded when any of its segments matches one of the patterns.
//! Patterns are globs over a single segment (`node_modules`, `*.egg-info`).

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::fs;
use std::path::{Component, Path};

/// Default segment patterns: dependencies, build output, coverage, VCS metadata
/// and tool caches.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    "node_modules",
    "bower_components",
    "jspm_packages",
    "vendor",
    ".git",
    ".svn",
    ".hg",
    "dist",
    "build",
    "out",
    "target",
    "coverage",
    ".nyc_output",
    "__pycache__",
    ".pytest_cache",
    ".mypy_cache",
    ".venv",
    "venv",
    ".tox",
    "*.egg-info",
    ".next",
    ".nuxt",
    ".turbo",
    ".cache",
    "*.min.js",
];

/// Errors for exclusion rules
#[derive(Debug, thiserror::Error)]
pub enum ExcludeError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Glob pattern error: {0}")]
    GlobError(#[from] globset::Error),
}

/// Exclusion rules for filtering files
#[derive(Debug, Clone)]
pub struct ExcludeRules {
    patterns: Vec<String>,
    glob_set: GlobSet,
}

impl Default for ExcludeRules {
    fn default() -> Self {
        Self::new().expect("default exclusion patterns are valid globs")
    }
}

impl ExcludeRules {
    /// Create new exclusion rules with defaults
    pub fn new() -> Result<Self, ExcludeError> {
        Self::from_patterns(DEFAULT_EXCLUDES.iter().map(|p| p.to_string()).collect())
    }

    /// Rules with exactly the given patterns and no defaults.
    pub fn from_patterns(patterns: Vec<String>) -> Result<Self, ExcludeError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &patterns {
            builder.add(Glob::new(pattern)?);
        }

        Ok(Self {
            glob_set: builder.build()?,
            patterns,
        })
    }

    /// Add patterns from an ignore file (one per line, `#` comments)
    pub fn with_ignore_file(self, path: &Path) -> Result<Self, ExcludeError> {
        let contents = fs::read_to_string(path)?;
        let patterns: Vec<&str> = contents
            .lines()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .collect();

        self.with_patterns(&patterns)
    }

    /// Add additional patterns
    pub fn with_patterns(self, patterns: &[&str]) -> Result<Self, ExcludeError> {
        let mut all = self.patterns;
        all.extend(
            patterns
                .iter()
                .filter(|p| !p.is_empty())
                .map(|p| p.to_string()),
        );
        Self::from_patterns(all)
    }

    /// Patterns in effect.
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Check if a path should be excluded
    pub fn is_excluded(&self, path: &Path) -> bool {
        path.components().any(|component| match component {
            Component::Normal(segment) => self.glob_set.is_match(Path::new(segment)),
            _ => false,
        })
    }
}
