//! Extension → language table.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Bucket for extensions the table does not know.
pub const GENERIC_LANGUAGE: &str = "generic";

/// Built-in mapping. JS/TS family files share one analyzer and one bucket.
const DEFAULT_LANGUAGES: &[(&str, &str)] = &[
    ("js", "javascript"),
    ("jsx", "javascript"),
    ("mjs", "javascript"),
    ("cjs", "javascript"),
    ("ts", "javascript"),
    ("tsx", "javascript"),
    ("mts", "javascript"),
    ("cts", "javascript"),
    ("py", "python"),
    ("pyi", "python"),
    ("go", "go"),
    ("rs", "rust"),
    ("java", "java"),
    ("kt", "kotlin"),
    ("kts", "kotlin"),
    ("c", "c"),
    ("h", "c"),
    ("cc", "cpp"),
    ("cpp", "cpp"),
    ("cxx", "cpp"),
    ("hpp", "cpp"),
    ("hh", "cpp"),
    ("cs", "csharp"),
    ("rb", "ruby"),
    ("php", "php"),
    ("swift", "swift"),
];

/// Extension → language mapping, case-insensitive on the extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageTable {
    extensions: BTreeMap<String, String>,
}

impl Default for LanguageTable {
    fn default() -> Self {
        Self {
            extensions: DEFAULT_LANGUAGES
                .iter()
                .map(|(ext, lang)| (ext.to_string(), lang.to_string()))
                .collect(),
        }
    }
}

impl LanguageTable {
    /// A table with no entries; every file lands in [`GENERIC_LANGUAGE`].
    pub fn empty() -> Self {
        Self {
            extensions: BTreeMap::new(),
        }
    }

    /// Add or override one extension. A leading `.` is accepted.
    pub fn with_extension(mut self, extension: &str, language: &str) -> Self {
        self.insert(extension, language);
        self
    }

    pub fn insert(&mut self, extension: &str, language: &str) {
        self.extensions
            .insert(normalize_extension(extension), language.to_string());
    }

    /// Language for a path, or [`GENERIC_LANGUAGE`].
    pub fn language_for_path(&self, path: &Path) -> &str {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(|e| self.extensions.get(&e.to_ascii_lowercase()))
            .map(String::as_str)
            .unwrap_or(GENERIC_LANGUAGE)
    }

    /// Whether the path has an extension in the table.
    pub fn is_supported(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.contains_key(&e.to_ascii_lowercase()))
            .unwrap_or(false)
    }

    /// Known extensions with a leading dot, sorted.
    pub fn extensions(&self) -> Vec<String> {
        self.extensions.keys().map(|e| format!(".{e}")).collect()
    }

    /// Distinct language names, sorted.
    pub fn languages(&self) -> Vec<String> {
        let mut langs: Vec<String> = self.extensions.values().cloned().collect();
        langs.sort();
        langs.dedup();
        langs
    }
}

fn normalize_extension(extension: &str) -> String {
    extension.trim_start_matches('.').to_ascii_lowercase()
}
