//! File watcher
//!
//! Watches directory trees through the platform's native notification
//! backend and publishes debounced [`FileChangedEvent`]s. The watcher never
//! touches the cache; subscribers decide what a change means.

mod debounce;
mod event;

pub use event::{ChangeType, FileChangedEvent};

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use astcache_key::{ExcludeRules, LanguageTable};
use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use debounce::{Message, Shared};

/// Default per-file debounce window.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Watch result type
pub type WatchResult<T> = Result<T, WatchError>;

/// Errors from attaching a watch
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("notification backend error: {0}")]
    Notify(#[from] notify::Error),

    #[error("failed to start dispatcher: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Snapshot of what is being watched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatcherStatus {
    pub is_watching: bool,
    pub watched_paths: Vec<PathBuf>,
}

struct Dispatcher {
    tx: Sender<Message>,
    handle: JoinHandle<()>,
}

/// Debounced, multi-subscriber file watcher.
pub struct FileWatcher {
    shared: Arc<Shared>,
    dispatcher: Mutex<Option<Dispatcher>>,
}

impl Default for FileWatcher {
    fn default() -> Self {
        Self::new(LanguageTable::default(), ExcludeRules::default(), DEFAULT_DEBOUNCE)
    }
}

impl FileWatcher {
    pub fn new(languages: LanguageTable, excludes: ExcludeRules, debounce: Duration) -> Self {
        Self {
            shared: Arc::new(Shared::new(languages, excludes, debounce)),
            dispatcher: Mutex::new(None),
        }
    }

    /// Start the dispatcher thread. Idempotent; `watch` calls it as needed.
    pub fn initialize(&self) -> WatchResult<()> {
        self.sender().map(|_| ())
    }

    fn sender(&self) -> WatchResult<Sender<Message>> {
        let mut dispatcher = self.dispatcher.lock();
        if let Some(d) = dispatcher.as_ref() {
            return Ok(d.tx.clone());
        }

        let (tx, rx) = mpsc::channel();
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("ast-cache-watch".to_string())
            .spawn(move || debounce::run(&shared, rx))?;

        debug!(debounce_ms = self.shared.debounce.as_millis() as u64, "watch dispatcher started");
        *dispatcher = Some(Dispatcher {
            tx: tx.clone(),
            handle,
        });
        Ok(tx)
    }

    /// Start watching a directory tree. `false` if it cannot be watched.
    /// Watching an already-watched directory is a no-op returning `true`.
    pub fn watch(&self, directory: &Path) -> bool {
        match self.try_watch(directory) {
            Ok(()) => true,
            Err(e) => {
                warn!(path = %directory.display(), error = %e, "cannot watch directory");
                false
            }
        }
    }

    fn try_watch(&self, directory: &Path) -> WatchResult<()> {
        if !directory.is_dir() {
            return Err(WatchError::NotADirectory(directory.to_path_buf()));
        }
        let root = canonical(directory);

        {
            let mut state = self.shared.state.lock();
            if state.watches.contains_key(&root) {
                state.aliases.insert(directory.to_path_buf(), root);
                return Ok(());
            }
        }

        let tx = self.sender()?;
        let event_root = root.clone();
        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<notify::Event>| {
                let _ = tx.send(Message::Fs {
                    root: event_root.clone(),
                    result,
                });
            },
            Config::default(),
        )?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        let mut state = self.shared.state.lock();
        // Lost a race with another caller watching the same root.
        if state.watches.contains_key(&root) {
            state.aliases.insert(directory.to_path_buf(), root);
            return Ok(());
        }
        info!(path = %root.display(), "watching");
        state.insert_watch(directory, root, watcher);
        Ok(())
    }

    /// Stop watching a directory and cancel its pending events.
    ///
    /// No event for the directory is delivered after this returns. `false`
    /// if the directory was not being watched.
    pub fn stop_watching(&self, directory: &Path) -> bool {
        let resolved = canonical(directory);
        let mut state = self.shared.state.lock();
        let Some(root) = state.root_for(directory, &resolved) else {
            return false;
        };
        let removed = state.remove_watch(&root);
        if removed {
            info!(path = %root.display(), "stopped watching");
        }
        removed
    }

    /// Stop every watch and cancel all pending events.
    pub fn stop_all(&self) {
        let mut state = self.shared.state.lock();
        let count = state.watches.len();
        state.clear();
        if count > 0 {
            info!(count, "stopped all watches");
        }
    }

    pub fn is_watching_path(&self, directory: &Path) -> bool {
        let resolved = canonical(directory);
        self.shared
            .state
            .lock()
            .root_for(directory, &resolved)
            .is_some()
    }

    pub fn get_status(&self) -> WatcherStatus {
        let state = self.shared.state.lock();
        WatcherStatus {
            is_watching: !state.watches.is_empty(),
            watched_paths: state.watches.keys().cloned().collect(),
        }
    }

    /// Same exclusion rules as the cache keys use.
    pub fn should_exclude_file(&self, path: &Path) -> bool {
        self.shared.excludes.is_excluded(path)
    }

    /// Extensions that produce events, with leading dots.
    pub fn get_supported_extensions(&self) -> Vec<String> {
        self.shared.languages.extensions()
    }

    /// Receive every `"file-changed"` event from now on. Dropping the
    /// receiver unsubscribes.
    pub fn subscribe(&self) -> Receiver<FileChangedEvent> {
        let (tx, rx) = mpsc::channel();
        self.shared.subscribers.lock().push(tx);
        rx
    }

    /// Stop all watches and join the dispatcher thread. `false` if the
    /// dispatcher panicked.
    pub fn shutdown(&self) -> bool {
        self.stop_all();

        let Some(dispatcher) = self.dispatcher.lock().take() else {
            return true;
        };
        let _ = dispatcher.tx.send(Message::Shutdown);
        dispatcher.handle.join().is_ok()
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        if !self.shutdown() {
            warn!("watch dispatcher panicked");
        }
    }
}

/// Watches are keyed by canonical path so `./src` and `/abs/src` agree.
/// Falls back to the path as given when it cannot be resolved.
fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}
