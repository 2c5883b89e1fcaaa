//! Delivers files dropped into the watched folder.

use crate::handle::MonitorHandle;
use openscan_driver::{FolderWatchDriver, ScannerDriver};
use openscan_output::{OutputError, OutputRouter};
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Polls a [`FolderWatchDriver`] and routes every stable file.
#[derive(Debug)]
pub struct FolderWatchTask {
    driver: Arc<FolderWatchDriver>,
    router: Arc<OutputRouter>,
}

impl FolderWatchTask {
    /// Create a task for a watcher and a router.
    #[must_use]
    pub fn new(driver: Arc<FolderWatchDriver>, router: Arc<OutputRouter>) -> Self {
        Self { driver, router }
    }

    /// Run one poll; returns how many files were saved locally.
    ///
    /// The original file is released (kept, deleted or archived) once the
    /// local save succeeded, even when Paperless delivery failed. A file
    /// whose save failed is left in place and offered again on a later poll.
    pub async fn tick(&self) -> usize {
        let detected = match self.driver.poll().await {
            Ok(detected) => detected,
            Err(e) => {
                warn!(folder = %self.driver.root().display(), "folder poll failed: {e}");
                return 0;
            }
        };

        let mut saved = 0;
        for file in detected {
            info!(file = %file.path.display(), size = file.result.size_bytes, "picked up file");
            match self.router.route(&file.result).await {
                Ok(_) | Err(OutputError::Delivery { .. }) => {
                    saved += 1;
                    if let Err(e) = self.driver.complete_delivery(&file.result).await {
                        warn!(file = %file.path.display(), "post-delivery action failed: {e}");
                    }
                }
                Err(e) => {
                    error!(file = %file.path.display(), "saving watched file failed: {e}");
                    self.driver.abandon_delivery(&file.result).await;
                }
            }
        }
        if saved > 0 {
            debug!(saved, "folder poll delivered files");
        }
        saved
    }

    /// Poll on the watcher's interval until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.driver.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(folder = %self.driver.root().display(), "folder watcher started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
        info!("folder watcher stopped");
    }

    /// Spawn [`FolderWatchTask::run`] on the runtime.
    #[must_use]
    pub fn spawn(self) -> MonitorHandle {
        let cancel = CancellationToken::new();
        let join = tokio::spawn(self.run(cancel.clone()));
        MonitorHandle::new("folder-watch", cancel, join)
    }
}
