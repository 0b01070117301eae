//! File watcher tests against the real notification backend.
//!
//! Native events can be slow on loaded machines, so receives use generous
//! timeouts and tests that need silence wait well past the debounce window.

use std::fs;
use std::path::Path;
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use ast_cache::{
    initialize_ast_cache, AstCacheConfig, ChangeType, ExcludeRules, FileChangedEvent, FileWatcher,
    LanguageTable,
};

const DEBOUNCE: Duration = Duration::from_millis(50);
const PATIENCE: Duration = Duration::from_secs(5);

fn watcher() -> FileWatcher {
    FileWatcher::new(LanguageTable::default(), ExcludeRules::default(), DEBOUNCE)
}

fn watched_dir() -> (TempDir, std::path::PathBuf) {
    let dir = TempDir::new().unwrap();
    let root = dir.path().canonicalize().unwrap();
    (dir, root)
}

/// Wait for the first event about `path`, skipping others.
fn next_for(rx: &Receiver<FileChangedEvent>, path: &Path) -> Option<FileChangedEvent> {
    let deadline = Instant::now() + PATIENCE;
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        match rx.recv_timeout(left) {
            Ok(event) if event.file_path == path => return Some(event),
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
    None
}

#[test]
fn test_write_produces_one_debounced_event() {
    let (_dir, root) = watched_dir();
    let watcher = watcher();
    let rx = watcher.subscribe();
    assert!(watcher.watch(&root));

    let file = root.join("app.ts");
    fs::write(&file, "let a = 1;").unwrap();
    fs::write(&file, "let a = 2;").unwrap();
    fs::write(&file, "let a = 3;").unwrap();

    let event = next_for(&rx, &file).expect("no event for app.ts");
    assert_eq!(event.language, "javascript");
    assert!(matches!(
        event.change_type,
        ChangeType::Created | ChangeType::Modified
    ));

    // The burst must not produce a trailing duplicate.
    std::thread::sleep(DEBOUNCE * 6);
    assert!(rx.try_iter().all(|e| e.file_path != file));
}

#[test]
fn test_delete_is_reported() {
    let (_dir, root) = watched_dir();
    let file = root.join("gone.py");
    fs::write(&file, "x = 1").unwrap();

    let watcher = watcher();
    let rx = watcher.subscribe();
    assert!(watcher.watch(&root));
    fs::remove_file(&file).unwrap();

    let event = next_for(&rx, &file).expect("no event for gone.py");
    assert_eq!(event.change_type, ChangeType::Deleted);
    assert_eq!(event.language, "python");
}

#[test]
fn test_every_subscriber_receives_events() {
    let (_dir, root) = watched_dir();
    let watcher = watcher();
    let first = watcher.subscribe();
    let second = watcher.subscribe();
    assert!(watcher.watch(&root));

    let file = root.join("lib.rs");
    fs::write(&file, "pub fn f() {}").unwrap();

    assert!(next_for(&first, &file).is_some());
    assert!(next_for(&second, &file).is_some());
}

#[test]
fn test_excluded_and_unsupported_files_are_silent() {
    let (_dir, root) = watched_dir();
    fs::create_dir_all(root.join("node_modules")).unwrap();

    let watcher = watcher();
    let rx = watcher.subscribe();
    assert!(watcher.watch(&root));

    fs::write(root.join("node_modules").join("dep.js"), "x").unwrap();
    fs::write(root.join("notes.txt"), "x").unwrap();
    let marker = root.join("marker.go");
    fs::write(&marker, "package m").unwrap();

    // The marker arriving means the earlier writes were already processed.
    assert!(next_for(&rx, &marker).is_some());
    std::thread::sleep(DEBOUNCE * 4);
    let others: Vec<_> = rx.try_iter().filter(|e| e.file_path != marker).collect();
    assert!(others.is_empty(), "unexpected events: {:?}", others);
}

#[test]
fn test_no_events_after_stop_watching() {
    let (_dir, root) = watched_dir();
    let watcher = watcher();
    let rx = watcher.subscribe();
    assert!(watcher.watch(&root));

    fs::write(root.join("pending.py"), "x").unwrap();
    assert!(watcher.stop_watching(&root));

    fs::write(root.join("after.py"), "y").unwrap();
    std::thread::sleep(DEBOUNCE * 6);
    assert!(rx.try_recv().is_err(), "no event may fire after stop_watching");
}

#[test]
fn test_facade_watcher_reports_changes() {
    let (dir, root) = watched_dir();
    let src = root.join("src");
    fs::create_dir_all(&src).unwrap();

    let cache = initialize_ast_cache(AstCacheConfig {
        enable_watcher: true,
        debounce_ms: 50,
        watch_paths: vec![src.clone()],
        ..AstCacheConfig::with_cache_root(dir.path().join("cache"))
    })
    .unwrap();
    let rx = cache.file_watcher().unwrap().subscribe();

    let file = src.join("handler.rb");
    fs::write(&file, "def handle; end").unwrap();
    let event = next_for(&rx, &file).expect("no event for handler.rb");
    assert_eq!(event.language, "ruby");

    cache.shutdown().unwrap();
    assert!(!cache.file_watcher().unwrap().get_status().is_watching);
}
