//! Per-path debouncing and fan-out to subscribers.
//!
//! OS notifications arrive on notify's threads and are forwarded as
//! [`Message`]s to a single dispatcher thread. The dispatcher keeps one
//! pending change per file with its own deadline, so a burst on one file
//! never delays another. The deadline is set by the first change in a
//! window; later changes only fold into the pending change type, so a file
//! that is written continuously still reports once per window. Watches and pending changes live under the same
//! lock: once a watch is removed under that lock, nothing for it can fire.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use astcache_key::{ExcludeRules, LanguageTable};
use notify::RecommendedWatcher;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::event::{classify, ChangeType, FileChangedEvent};

pub(crate) enum Message {
    Fs {
        root: PathBuf,
        result: notify::Result<notify::Event>,
    },
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Pending {
    pub root: PathBuf,
    pub change_type: ChangeType,
    pub deadline: Instant,
}

#[derive(Default)]
pub(crate) struct WatchState {
    /// Keyed by canonical root
    pub watches: BTreeMap<PathBuf, RecommendedWatcher>,
    /// Paths callers passed to `watch`, mapped to their canonical root
    pub aliases: HashMap<PathBuf, PathBuf>,
    pub pending: HashMap<PathBuf, Pending>,
}

impl WatchState {
    /// Find the watched root for a caller's path. `canonical` is the path
    /// resolved now, which fails once the directory is gone.
    pub fn root_for(&self, directory: &Path, canonical: &Path) -> Option<PathBuf> {
        if self.watches.contains_key(canonical) {
            return Some(canonical.to_path_buf());
        }
        self.aliases
            .get(directory)
            .filter(|root| self.watches.contains_key(*root))
            .cloned()
    }

    pub fn insert_watch(&mut self, directory: &Path, root: PathBuf, watcher: RecommendedWatcher) {
        self.aliases.insert(directory.to_path_buf(), root.clone());
        self.watches.insert(root, watcher);
    }

    /// Drop a watch and every pending change under it.
    pub fn remove_watch(&mut self, root: &Path) -> bool {
        let removed = self.watches.remove(root).is_some();
        self.aliases.retain(|_, r| r != root);
        self.pending.retain(|_, p| p.root != root);
        removed
    }

    pub fn clear(&mut self) {
        self.watches.clear();
        self.aliases.clear();
        self.pending.clear();
    }
}

pub(crate) struct Shared {
    pub state: Mutex<WatchState>,
    pub subscribers: Mutex<Vec<Sender<FileChangedEvent>>>,
    pub languages: LanguageTable,
    pub excludes: ExcludeRules,
    pub debounce: Duration,
}

impl Shared {
    pub fn new(languages: LanguageTable, excludes: ExcludeRules, debounce: Duration) -> Self {
        Self {
            state: Mutex::new(WatchState::default()),
            subscribers: Mutex::new(Vec::new()),
            languages,
            excludes,
            debounce,
        }
    }

    /// Whether a changed path is source we report on.
    pub fn is_relevant(&self, root: &Path, path: &Path) -> bool {
        let rel = path.strip_prefix(root).unwrap_or(path);
        self.languages.is_supported(path) && !self.excludes.is_excluded(rel)
    }

    /// Fold one notification into the pending set.
    pub fn record(&self, root: &Path, event: notify::Event, now: Instant) {
        let mut state = self.state.lock();
        if !state.watches.contains_key(root) {
            return;
        }

        for (path, change) in classify(&event.kind, &event.paths) {
            if !self.is_relevant(root, &path) {
                continue;
            }

            state
                .pending
                .entry(path)
                .and_modify(|p| p.change_type = p.change_type.coalesce(change))
                .or_insert_with(|| Pending {
                    root: root.to_path_buf(),
                    change_type: change,
                    deadline: now + self.debounce,
                });
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.state.lock().pending.values().map(|p| p.deadline).min()
    }

    /// Emit every change whose window has closed. Returns how many fired.
    pub fn flush_due(&self, now: Instant) -> usize {
        let mut state = self.state.lock();

        let mut due: Vec<(PathBuf, Pending)> = Vec::new();
        state.pending.retain(|path, p| {
            if p.deadline <= now {
                due.push((path.clone(), p.clone()));
                false
            } else {
                true
            }
        });
        if due.is_empty() {
            return 0;
        }
        due.sort_by_key(|(_, p)| p.deadline);

        // Emission happens under the state lock so a concurrent stop cannot
        // return while one of its events is in flight.
        let mut subscribers = self.subscribers.lock();
        for (path, pending) in &due {
            let event = FileChangedEvent {
                language: self.languages.language_for_path(path).to_string(),
                file_path: path.clone(),
                change_type: pending.change_type,
            };
            debug!(path = %path.display(), change = ?pending.change_type, "file changed");
            subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }

        due.len()
    }

    pub fn handle(&self, message: Message) -> bool {
        match message {
            Message::Fs {
                root,
                result: Ok(event),
            } => {
                self.record(&root, event, Instant::now());
                true
            }
            Message::Fs {
                root,
                result: Err(e),
            } => {
                warn!(root = %root.display(), error = %e, "watch error");
                true
            }
            Message::Shutdown => false,
        }
    }
}

/// Dispatcher loop. Runs until shutdown or until every sender is gone.
pub(crate) fn run(shared: &Shared, rx: Receiver<Message>) {
    loop {
        let message = match shared.next_deadline() {
            Some(deadline) => rx.recv_timeout(deadline.saturating_duration_since(Instant::now())),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match message {
            Ok(message) => {
                if !shared.handle(message) {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        shared.flush_due(Instant::now());
    }

    debug!("watch dispatcher stopped");
}
