//! Scan-to-FTP: the receiver plus a watcher on its staging folder.

use crate::folder::FolderWatchTask;
use crate::handle::MonitorHandle;
use openscan_core::FtpReceiveConfig;
use openscan_driver::{FolderWatchDriver, FtpReceiver};
use openscan_output::OutputRouter;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// A bound FTP receiver whose uploads are routed like folder-watch files.
#[derive(Debug)]
pub struct FtpReceiveTask {
    receiver: FtpReceiver,
    watch: FolderWatchTask,
}

impl FtpReceiveTask {
    /// Pair a bound receiver with a watcher over its staging folder.
    #[must_use]
    pub fn new(
        receiver: FtpReceiver,
        config: &FtpReceiveConfig,
        job_timeout: Duration,
        router: Arc<OutputRouter>,
    ) -> Self {
        let mut watch = config.staging_watch();
        watch.watch_folder = receiver.staging_dir().display().to_string();
        // Staged files left from a previous run were never routed
        let driver = Arc::new(FolderWatchDriver::from_config(&watch, job_timeout).including_existing());
        Self {
            receiver,
            watch: FolderWatchTask::new(driver, router),
        }
    }

    /// Bound control address.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.receiver.local_addr().ok()
    }

    /// Serve uploads and route them until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        tokio::join!(
            self.receiver.run(cancel.clone()),
            self.watch.run(cancel.clone())
        );
        info!("FTP receive stopped");
    }

    /// Spawn [`FtpReceiveTask::run`] on the runtime.
    #[must_use]
    pub fn spawn(self) -> MonitorHandle {
        let cancel = CancellationToken::new();
        let join = tokio::spawn(self.run(cancel.clone()));
        MonitorHandle::new("ftp-receive", cancel, join)
    }
}
