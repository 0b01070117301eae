//! Cache lifecycle tests
//!
//! Exercise the cache through the unified facade with real files on disk.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use ast_cache::{
    file_digest, generate_key, initialize_ast_cache, parse_key, sanitize_branch_name,
    AstCacheConfig, CacheCleaner, CacheEntry, CacheManager, CleanupPolicy,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Analysis {
    functions: Vec<String>,
    imports: usize,
}

fn analysis(name: &str) -> Analysis {
    Analysis {
        functions: vec![name.to_string()],
        imports: name.len(),
    }
}

struct Project {
    _temp_dir: TempDir,
    root: PathBuf,
    cache_root: PathBuf,
}

impl Project {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("project");
        let cache_root = temp_dir.path().join("cache");
        fs::create_dir_all(&root).unwrap();
        Self {
            _temp_dir: temp_dir,
            root,
            cache_root,
        }
    }

    fn file(&self, rel: &str, contents: &str) -> PathBuf {
        let path = self.root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, contents).unwrap();
        path
    }

    fn config(&self) -> AstCacheConfig {
        AstCacheConfig::with_cache_root(&self.cache_root)
    }
}

// =============================================================================
// End-to-end: two versions coexist, invalidation removes both, cleanup of a
// fresh cache deletes nothing
// =============================================================================

#[test]
fn test_end_to_end_scenario() {
    let project = Project::new();
    let file = project.file("src/app.ts", "export const a = 1;");
    let cache = initialize_ast_cache(project.config()).unwrap();

    assert!(cache.set(&file, &project.root, &analysis("v1"), "main", "h1"));
    assert!(cache.set(&file, &project.root, &analysis("v2"), "main", "h2"));

    let v1: CacheEntry<Analysis> = cache.get(&file, &project.root, "main", "h1").unwrap();
    let v2: CacheEntry<Analysis> = cache.get(&file, &project.root, "main", "h2").unwrap();
    assert_eq!(v1.payload, analysis("v1"));
    assert_eq!(v2.payload, analysis("v2"));

    let report = cache.cache_cleaner().unwrap().cleanup();
    assert!(report.success);
    for stage in [
        &report.details.age_cleanup,
        &report.details.size_cleanup,
        &report.details.orphan_cleanup,
        &report.details.directory_cleanup,
    ] {
        assert!(stage.completed);
        assert_eq!(stage.files_deleted, 0);
        assert!(stage.errors.is_empty(), "unexpected errors: {:?}", stage.errors);
    }

    assert_eq!(cache.invalidate_file(&file, &project.root, "main"), 2);
    assert!(cache.get::<Analysis>(&file, &project.root, "main", "h1").is_none());
    assert!(cache.get::<Analysis>(&file, &project.root, "main", "h2").is_none());

    // Nothing left to delete, only the emptied directories to remove.
    let report = cache.cache_cleaner().unwrap().cleanup();
    assert!(report.success);
    for stage in [
        &report.details.age_cleanup,
        &report.details.size_cleanup,
        &report.details.orphan_cleanup,
        &report.details.directory_cleanup,
    ] {
        assert!(stage.completed);
        assert_eq!(stage.files_deleted, 0);
        assert!(stage.errors.is_empty(), "unexpected errors: {:?}", stage.errors);
    }
    // javascript/, main-h1/, main-h1/src/, main-h2/, main-h2/src/
    assert_eq!(report.details.directory_cleanup.directories_removed, 5);
    assert!(!project.cache_root.join("javascript").exists());

    let stats = cache.get_stats();
    assert_eq!(stats.cache.writes, 2);
    assert_eq!(stats.cache.hits, 2);
    assert_eq!(stats.cache.misses, 2);
    assert_eq!(stats.cache.invalidations, 2);
    assert_eq!(stats.size.unwrap().total_files, 0);

    cache.shutdown().unwrap();
}

// =============================================================================
// Keys
// =============================================================================

#[test]
fn test_key_matches_disk_layout() {
    let project = Project::new();
    let file = project.file("pkg/util.py", "def f(): pass\n");
    let cache = initialize_ast_cache(project.config()).unwrap();

    let key = generate_key(&file, &project.root, "feature/login", "0a1b").unwrap();
    assert_eq!(key, "python/feature_login-0a1b/pkg/util.py");

    cache.set(&file, &project.root, &analysis("f"), "feature/login", "0a1b");
    assert!(project.cache_root.join(&key).is_file());

    let parsed = parse_key(&key).unwrap();
    assert_eq!(parsed.branch, sanitize_branch_name("feature/login"));
    assert_eq!(parsed.hash, "0a1b");
}

#[test]
fn test_branch_names_with_hyphens_round_trip() {
    let project = Project::new();
    let file = project.file("a.rs", "fn main() {}");

    for branch in ["release-1.2", "fix-abc-123", "user/feat-x", "-leading"] {
        let key = generate_key(&file, &project.root, branch, "deadbeef").unwrap();
        let parsed = parse_key(&key).unwrap();
        assert_eq!(parsed.branch, sanitize_branch_name(branch), "branch {branch:?}");
        assert_eq!(parsed.hash, "deadbeef");
        assert_eq!(parsed.relative_path, "a.rs");
    }
}

#[test]
fn test_file_digest_as_content_identity() {
    let project = Project::new();
    let file = project.file("lib/x.rb", "puts 1\n");
    let cache = initialize_ast_cache(project.config()).unwrap();

    let before = file_digest(&file).unwrap();
    cache.set(&file, &project.root, &analysis("x"), "main", &before);

    fs::write(&file, "puts 2\n").unwrap();
    let after = file_digest(&file).unwrap();
    assert_ne!(before, after);
    assert!(cache.get::<Analysis>(&file, &project.root, "main", &after).is_none());

    fs::write(&file, "puts 1\n").unwrap();
    let reverted = file_digest(&file).unwrap();
    assert!(
        cache.get::<Analysis>(&file, &project.root, "main", &reverted).is_some(),
        "reverting content hits the earlier entry"
    );
}

// =============================================================================
// Branch isolation and persistence
// =============================================================================

#[test]
fn test_branches_are_isolated() {
    let project = Project::new();
    let file = project.file("main.go", "package main");
    let cache = initialize_ast_cache(project.config()).unwrap();

    cache.set(&file, &project.root, &analysis("main"), "main", "aa");
    cache.set(&file, &project.root, &analysis("dev"), "dev", "aa");

    assert_eq!(cache.invalidate_file(&file, &project.root, "dev"), 1);
    let kept: CacheEntry<Analysis> = cache.get(&file, &project.root, "main", "aa").unwrap();
    assert_eq!(kept.payload, analysis("main"));
}

#[test]
fn test_entries_survive_restart() {
    let project = Project::new();
    let file = project.file("Main.java", "class Main {}");

    {
        let cache = initialize_ast_cache(project.config()).unwrap();
        cache.set(&file, &project.root, &analysis("Main"), "main", "cafe");
        cache.shutdown().unwrap();
    }

    let cache = initialize_ast_cache(project.config()).unwrap();
    let entry: CacheEntry<Analysis> = cache.get(&file, &project.root, "main", "cafe").unwrap();
    assert_eq!(entry.payload, analysis("Main"));
    assert_eq!(cache.get_stats().cache.hits, 1, "counters start fresh");
}

#[test]
fn test_clear_empties_store() {
    let project = Project::new();
    let a = project.file("a.py", "");
    let b = project.file("b.ts", "");
    let cache = initialize_ast_cache(project.config()).unwrap();

    cache.set(&a, &project.root, &analysis("a"), "main", "01");
    cache.set(&b, &project.root, &analysis("b"), "main", "02");
    assert!(cache.clear());

    assert!(cache.get::<Analysis>(&a, &project.root, "main", "01").is_none());
    assert_eq!(cache.get_stats().size.unwrap().total_files, 0);
}

// =============================================================================
// Cleanup through the facade
// =============================================================================

#[test]
fn test_source_named_like_temp_file_is_a_regular_entry() {
    let project = Project::new();
    let file = project.file(".tmp.setup.js", "module.exports = {};");
    let manager = CacheManager::new(&project.cache_root);
    manager.initialize().unwrap();
    let cleaner = CacheCleaner::new(
        &project.cache_root,
        CleanupPolicy {
            orphan_temp_age: Duration::ZERO,
            ..CleanupPolicy::default()
        },
    );

    assert!(manager.set(&file, &project.root, &analysis("setup"), "main", "01"));
    assert_eq!(cleaner.get_cache_size().total_files, 1);

    thread::sleep(Duration::from_millis(20));
    let report = cleaner.cleanup();
    assert!(report.success);
    assert_eq!(report.details.files_deleted(), 0);
    assert!(manager
        .get::<Analysis>(&file, &project.root, "main", "01")
        .is_some());
}

#[test]
fn test_orphans_removed_after_source_deleted() {
    let project = Project::new();
    let kept = project.file("kept.py", "");
    let gone = project.file("gone.py", "");
    let cache = initialize_ast_cache(project.config()).unwrap();

    cache.set(&kept, &project.root, &analysis("k"), "main", "01");
    cache.set(&gone, &project.root, &analysis("g"), "main", "01");
    fs::remove_file(&gone).unwrap();

    let report = cache.cache_cleaner().unwrap().cleanup();
    assert!(report.success);
    assert_eq!(report.details.orphan_cleanup.files_deleted, 1);

    assert!(cache.get::<Analysis>(&kept, &project.root, "main", "01").is_some());
    assert!(cache.get::<Analysis>(&gone, &project.root, "main", "01").is_none());
}

#[test]
fn test_dry_run_config_keeps_files() {
    let project = Project::new();
    let gone = project.file("gone.py", "");
    let cache = initialize_ast_cache(AstCacheConfig {
        dry_run: true,
        ..project.config()
    })
    .unwrap();

    cache.set(&gone, &project.root, &analysis("g"), "main", "01");
    fs::remove_file(&gone).unwrap();

    let report = cache.cache_cleaner().unwrap().cleanup();
    assert_eq!(report.details.orphan_cleanup.files_deleted, 1);
    assert_eq!(cache.get_stats().size.unwrap().total_files, 1);
}

// =============================================================================
// Concurrency
// =============================================================================

#[test]
fn test_parallel_writers_distinct_files() {
    let project = Project::new();
    let manager = Arc::new(CacheManager::new(&project.cache_root));
    manager.initialize().unwrap();

    let files: Vec<PathBuf> = (0..16)
        .map(|i| project.file(&format!("src/m{i}.py"), "x = 1"))
        .collect();

    let handles: Vec<_> = files
        .iter()
        .cloned()
        .map(|file| {
            let manager = Arc::clone(&manager);
            let root = project.root.clone();
            thread::spawn(move || {
                let name = file.file_name().unwrap().to_string_lossy().into_owned();
                assert!(manager.set(&file, &root, &analysis(&name), "main", "01"));
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for file in &files {
        let entry: CacheEntry<Analysis> = manager.get(file, &project.root, "main", "01").unwrap();
        let name = file.file_name().unwrap().to_string_lossy();
        assert_eq!(entry.payload.functions[0], name);
    }
    assert_eq!(manager.get_stats().writes, 16);
}

#[test]
fn test_relative_and_absolute_paths_agree() {
    let project = Project::new();
    let file = project.file("src/a.c", "int main;");
    let cache = initialize_ast_cache(project.config()).unwrap();

    cache.set(Path::new("src/a.c"), &project.root, &analysis("a"), "main", "01");
    assert!(cache.get::<Analysis>(&file, &project.root, "main", "01").is_some());
    assert!(cache
        .get::<Analysis>(&project.root.join("src/../src/a.c"), &project.root, "main", "01")
        .is_some());
}
