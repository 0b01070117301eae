//! Cache-key scheme for the AST cache.
//!
//! Turns `(file, project root, branch, content identity)` into the canonical
//! key `"{language}/{sanitized_branch}-{content_identity}/{relative_path}"`
//! and back. Everything in this crate is pure: no filesystem access except
//! [`file_digest`].
//!
//! The extension table and exclusion rules are plain data injected into a
//! [`KeyGenerator`]. The free functions use the default tables.

mod digest;
mod exclude;
mod key;
mod language;

pub use digest::{content_digest, file_digest};
pub use exclude::{ExcludeError, ExcludeRules, DEFAULT_EXCLUDES};
pub use key::{
    is_valid_content_identity, relative_path, sanitize_branch_name, split_segment, CacheKey,
    FileScope, KeyError, KeyGenerator, KeyResult, KeyedFile,
};
pub use language::{LanguageTable, GENERIC_LANGUAGE};

use std::path::Path;
use std::sync::OnceLock;

fn default_generator() -> &'static KeyGenerator {
    static GENERATOR: OnceLock<KeyGenerator> = OnceLock::new();
    GENERATOR.get_or_init(KeyGenerator::default)
}

/// Generate the canonical cache key using the default tables.
pub fn generate_key(
    file_path: &Path,
    project_root: &Path,
    branch: &str,
    content_identity: &str,
) -> KeyResult<String> {
    default_generator().generate_key(file_path, project_root, branch, content_identity)
}

/// Generate keys for a batch of `(path, content identity)` pairs using the
/// default tables.
pub fn generate_keys<P: AsRef<Path>, S: AsRef<str>>(
    files: &[(P, S)],
    project_root: &Path,
    branch: &str,
) -> KeyResult<Vec<KeyedFile>> {
    default_generator().generate_keys(files, project_root, branch)
}

/// Parse a canonical key back into its parts.
pub fn parse_key(key: &str) -> KeyResult<CacheKey> {
    CacheKey::parse(key)
}

/// Check a path against the default exclusion rules.
pub fn should_exclude_file(path: &Path) -> bool {
    default_generator().should_exclude_file(path)
}
