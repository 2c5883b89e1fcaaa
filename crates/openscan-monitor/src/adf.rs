//! Auto-scan when paper is loaded into the feeder.

use crate::handle::MonitorHandle;
use crate::state::MonitorState;
use openscan_core::{
    AdfState, DeviceState, MonitorConfig, Protocol, ScanRequest, ScanSource, ScannerDescriptor,
};
use openscan_driver::{DriverError, DriverHandle};
use openscan_output::OutputRouter;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What one monitor cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Status unavailable; cycle skipped
    Offline,
    /// Feeder not loaded
    Waiting,
    /// Feeder still loaded after a scan was already started
    Debounced,
    /// Paper seen but it was gone, or the device was busy, after settling
    Unsettled,
    /// Another scan holds the driver
    Busy,
    /// A scan ran and was handed to the router
    Scanned,
    /// A scan was started but failed
    Failed,
}

/// Polls the active driver and scans from the feeder when paper appears.
pub struct AdfMonitor {
    driver: DriverHandle,
    router: Arc<OutputRouter>,
    config: MonitorConfig,
    state: MonitorState,
}

impl AdfMonitor {
    /// Whether a monitor makes sense for this scanner and configuration.
    #[must_use]
    pub fn should_run(descriptor: &ScannerDescriptor, config: &MonitorConfig) -> bool {
        config.enabled && descriptor.has_feeder() && descriptor.protocol != Protocol::Folder
    }

    /// Create a monitor in the waiting state.
    #[must_use]
    pub fn new(driver: DriverHandle, router: Arc<OutputRouter>, config: MonitorConfig) -> Self {
        Self {
            driver,
            router,
            config,
            state: MonitorState::default(),
        }
    }

    /// Current debounce state.
    #[must_use]
    pub fn state(&self) -> MonitorState {
        self.state
    }

    /// Run one poll cycle.
    pub async fn tick(&mut self) -> TickOutcome {
        let Some(adf) = self.poll_adf().await else {
            return TickOutcome::Offline;
        };
        if !self.state.observe(adf) {
            return if self.state.is_triggered() {
                TickOutcome::Debounced
            } else {
                TickOutcome::Waiting
            };
        }

        info!(scanner = %self.driver.descriptor().id(), "paper detected in feeder, settling");
        tokio::time::sleep(self.config.settle()).await;
        match self.driver.status().await {
            Ok(status) if status.adf_state == AdfState::Loaded && status.state == DeviceState::Idle => {}
            Ok(status) => {
                debug!(?status, "feeder changed while settling");
                if status.adf_state != AdfState::Loaded {
                    self.state.observe(status.adf_state);
                }
                return TickOutcome::Unsettled;
            }
            Err(e) => {
                debug!("status re-check failed: {e}");
                return TickOutcome::Unsettled;
            }
        }

        self.scan().await
    }

    async fn poll_adf(&self) -> Option<AdfState> {
        match self.driver.status().await {
            Ok(status) if status.is_online() => Some(status.adf_state),
            Ok(_) => {
                debug!(scanner = %self.driver.descriptor().id(), "scanner offline, skipping cycle");
                None
            }
            Err(e) => {
                debug!(scanner = %self.driver.descriptor().id(), "monitor poll failed: {e}");
                None
            }
        }
    }

    async fn scan(&mut self) -> TickOutcome {
        info!("auto-scanning from feeder");
        match self.driver.scan(ScanRequest::automatic(ScanSource::Feeder)).await {
            Ok(result) => {
                self.state.mark_triggered();
                match self.router.route(&result).await {
                    Ok(report) => info!(
                        filename = %report.filename,
                        size = result.size_bytes,
                        "auto-scan complete"
                    ),
                    Err(e) => error!(kind = %e.kind(), "auto-scan output failed: {e}"),
                }
                TickOutcome::Scanned
            }
            Err(DriverError::Busy { .. }) => {
                debug!("driver busy, trying again next cycle");
                TickOutcome::Busy
            }
            Err(e) => {
                self.state.mark_triggered();
                error!(kind = %e.kind(), "auto-scan failed: {e}");
                TickOutcome::Failed
            }
        }
    }

    /// Poll on the configured interval until `cancel` fires.
    ///
    /// Each cycle, including its scan, finishes before the next tick is
    /// considered; ticks that fall due meanwhile are skipped.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            scanner = %self.driver.descriptor().id(),
            interval = ?self.config.interval(),
            "ADF monitor started"
        );
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let outcome = self.tick().await;
                    if outcome == TickOutcome::Failed {
                        warn!("auto-scan cycle failed; monitor keeps polling");
                    }
                }
            }
        }
        info!("ADF monitor stopped");
    }

    /// Spawn [`AdfMonitor::run`] on the runtime.
    #[must_use]
    pub fn spawn(self) -> MonitorHandle {
        let cancel = CancellationToken::new();
        let join = tokio::spawn(self.run(cancel.clone()));
        MonitorHandle::new("adf-monitor", cancel, join)
    }
}

impl std::fmt::Debug for AdfMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdfMonitor")
            .field("scanner", self.driver.descriptor().id())
            .field("config", &self.config)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
