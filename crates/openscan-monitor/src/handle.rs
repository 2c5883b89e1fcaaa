//! Ownership of a running background task.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// A spawned polling loop and the token that stops it.
///
/// Dropping the handle does not stop the task; call [`MonitorHandle::stop`].
#[derive(Debug)]
pub struct MonitorHandle {
    name: &'static str,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl MonitorHandle {
    pub(crate) fn new(name: &'static str, cancel: CancellationToken, join: JoinHandle<()>) -> Self {
        Self { name, cancel, join }
    }

    /// Task name used in logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the loop is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.join.is_finished()
    }

    /// Ask the loop to stop after its current cycle and wait for it.
    ///
    /// A scan in progress is allowed to finish first.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            warn!(task = self.name, "background task ended abnormally: {e}");
        }
    }
}
