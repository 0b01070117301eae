//! Background cleanup at a fixed interval.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use astcache_store::{format_bytes, CacheCleaner};
use tracing::{debug, info};

/// Runs [`CacheCleaner::cleanup`] every `interval` on its own thread.
pub struct CleanupScheduler {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

impl CleanupScheduler {
    /// Start the thread. The first pass runs one interval from now.
    pub fn start(cleaner: Arc<CacheCleaner>, interval: Duration) -> std::io::Result<Self> {
        let (stop, stop_rx) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name("ast-cache-cleanup".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let report = cleaner.cleanup();
                        debug!(
                            success = report.success,
                            files_deleted = report.details.files_deleted(),
                            freed = %format_bytes(report.details.bytes_freed()),
                            "scheduled cleanup"
                        );
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        info!(interval_secs = interval.as_secs_f64(), "cleanup scheduler started");
        Ok(Self { stop, handle })
    }

    /// Signal the thread and wait for it. A pass in progress finishes first.
    /// `false` if the thread panicked.
    pub fn stop(self) -> bool {
        let _ = self.stop.send(());
        let ok = self.handle.join().is_ok();
        info!("cleanup scheduler stopped");
        ok
    }
}
