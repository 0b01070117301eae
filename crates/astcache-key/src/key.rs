//! Canonical cache keys.
//!
//! Format: `{language}/{sanitized_branch}-{content_identity}/{relative_path}`
//!
//! Sanitized branch names may contain `-`, content identities may not, so the
//! middle segment always splits at its last `-`.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::exclude::ExcludeRules;
use crate::language::LanguageTable;

/// Key result type
pub type KeyResult<T> = Result<T, KeyError>;

/// Errors from key generation and parsing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("{file} is not inside project root {root}")]
    OutsideProjectRoot { file: PathBuf, root: PathBuf },

    #[error("invalid content identity {0:?}: expected [A-Za-z0-9._]+")]
    InvalidContentIdentity(String),

    #[error("malformed cache key {key:?}: {reason}")]
    Malformed { key: String, reason: &'static str },
}

/// Replace every character outside `[A-Za-z0-9._-]` with `_`.
///
/// `"feature/user-auth:test"` becomes `"feature_user-auth_test"`. Idempotent.
pub fn sanitize_branch_name(name: &str) -> String {
    if name.is_empty() {
        return "_".to_string();
    }
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Content identities are digests or VCS object ids: non-empty, no `-`.
pub fn is_valid_content_identity(identity: &str) -> bool {
    !identity.is_empty()
        && identity
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_')
}

/// The four-part identity of a cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    /// Language bucket derived from the file extension
    pub language: String,
    /// Sanitized branch name
    pub branch: String,
    /// Content identity
    pub hash: String,
    /// Project-relative path with forward slashes
    pub relative_path: String,
}

impl CacheKey {
    /// Parse a canonical key string.
    pub fn parse(key: &str) -> KeyResult<Self> {
        let malformed = |reason| KeyError::Malformed {
            key: key.to_string(),
            reason,
        };

        let mut parts = key.splitn(3, '/');
        let language = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| malformed("missing language"))?;
        let segment = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| malformed("missing branch segment"))?;
        let relative_path = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| malformed("missing relative path"))?;

        let (branch, hash) = split_segment(segment).ok_or_else(|| malformed("bad branch segment"))?;

        if relative_path.starts_with('/')
            || relative_path.split('/').any(|s| s.is_empty() || s == "." || s == "..")
        {
            return Err(malformed("relative path is not normalized"));
        }

        Ok(Self {
            language: language.to_string(),
            branch: branch.to_string(),
            hash: hash.to_string(),
            relative_path: relative_path.to_string(),
        })
    }

    /// The `{branch}-{hash}` directory name.
    pub fn segment(&self) -> String {
        format!("{}-{}", self.branch, self.hash)
    }

    /// Relative filesystem path of this entry under a cache root.
    pub fn to_relative_path(&self) -> PathBuf {
        let mut path = PathBuf::from(&self.language);
        path.push(self.segment());
        for part in self.relative_path.split('/') {
            path.push(part);
        }
        path
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}-{}/{}", self.language, self.branch, self.hash, self.relative_path)
    }
}

/// Split a `{branch}-{hash}` directory name at its last `-`.
///
/// Returns `None` when there is no `-` or the suffix is not a valid content
/// identity.
pub fn split_segment(segment: &str) -> Option<(&str, &str)> {
    let (branch, hash) = segment.rsplit_once('-')?;
    if is_valid_content_identity(hash) {
        Some((branch, hash))
    } else {
        None
    }
}

/// Everything in a key except the content identity: the set of entries one
/// file has on one branch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileScope {
    pub language: String,
    pub branch: String,
    pub relative_path: String,
}

impl FileScope {
    /// Whether a `{branch}-{hash}` directory name belongs to this scope.
    pub fn owns_segment(&self, segment: &str) -> bool {
        split_segment(segment).is_some_and(|(branch, _)| branch == self.branch)
    }

    /// Key for one content identity within this scope.
    pub fn with_hash(&self, hash: &str) -> CacheKey {
        CacheKey {
            language: self.language.clone(),
            branch: self.branch.clone(),
            hash: hash.to_string(),
            relative_path: self.relative_path.clone(),
        }
    }
}

/// A file paired with its generated key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyedFile {
    pub file_path: PathBuf,
    pub cache_key: String,
}

/// Key generator with injected language and exclusion tables.
#[derive(Debug, Clone, Default)]
pub struct KeyGenerator {
    languages: LanguageTable,
    excludes: ExcludeRules,
}

impl KeyGenerator {
    pub fn new(languages: LanguageTable, excludes: ExcludeRules) -> Self {
        Self {
            languages,
            excludes,
        }
    }

    pub fn languages(&self) -> &LanguageTable {
        &self.languages
    }

    pub fn excludes(&self) -> &ExcludeRules {
        &self.excludes
    }

    /// Build the structured key for a file.
    ///
    /// A relative `file_path` is resolved against `project_root`. Both paths
    /// are normalized lexically; the filesystem is never consulted.
    pub fn cache_key(
        &self,
        file_path: &Path,
        project_root: &Path,
        branch: &str,
        content_identity: &str,
    ) -> KeyResult<CacheKey> {
        if !is_valid_content_identity(content_identity) {
            return Err(KeyError::InvalidContentIdentity(content_identity.to_string()));
        }

        Ok(CacheKey {
            language: self.languages.language_for_path(file_path).to_string(),
            branch: sanitize_branch_name(branch),
            hash: content_identity.to_string(),
            relative_path: relative_path(file_path, project_root)?,
        })
    }

    /// Key without a content identity, for operations over all versions of
    /// a file.
    pub fn file_scope(
        &self,
        file_path: &Path,
        project_root: &Path,
        branch: &str,
    ) -> KeyResult<FileScope> {
        Ok(FileScope {
            language: self.languages.language_for_path(file_path).to_string(),
            branch: sanitize_branch_name(branch),
            relative_path: relative_path(file_path, project_root)?,
        })
    }

    /// Canonical key string for a file.
    pub fn generate_key(
        &self,
        file_path: &Path,
        project_root: &Path,
        branch: &str,
        content_identity: &str,
    ) -> KeyResult<String> {
        self.cache_key(file_path, project_root, branch, content_identity)
            .map(|k| k.to_string())
    }

    /// Generate keys for `(path, content identity)` pairs.
    pub fn generate_keys<P: AsRef<Path>, S: AsRef<str>>(
        &self,
        files: &[(P, S)],
        project_root: &Path,
        branch: &str,
    ) -> KeyResult<Vec<KeyedFile>> {
        files
            .iter()
            .map(|(path, identity)| {
                let path = path.as_ref();
                Ok(KeyedFile {
                    file_path: path.to_path_buf(),
                    cache_key: self.generate_key(path, project_root, branch, identity.as_ref())?,
                })
            })
            .collect()
    }

    /// Whether `path` lies in an excluded directory or matches an excluded name.
    pub fn should_exclude_file(&self, path: &Path) -> bool {
        self.excludes.is_excluded(path)
    }
}

/// Project-relative path of `file_path`, forward-slash separated.
pub fn relative_path(file_path: &Path, project_root: &Path) -> KeyResult<String> {
    let root = normalize(project_root);
    let file = if file_path.is_absolute() {
        normalize(file_path)
    } else {
        normalize(&project_root.join(file_path))
    };

    let outside = || KeyError::OutsideProjectRoot {
        file: file_path.to_path_buf(),
        root: project_root.to_path_buf(),
    };

    let rel = file.strip_prefix(&root).map_err(|_| outside())?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();

    if parts.is_empty() {
        return Err(outside());
    }
    Ok(parts.join("/"))
}

/// Resolve `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}
