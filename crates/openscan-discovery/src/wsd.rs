//! WS-Discovery multicast probing for WSD scanners.

use crate::error::Result;
use crate::manual::enrich;
use crate::strategy::{CandidateSink, DiscoveryStrategy};
use async_trait::async_trait;
use openscan_core::JobConfig;
use openscan_driver::ws_discovery::{multicast_target, probe_with};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Default window during which ProbeMatch replies are collected.
pub const DEFAULT_PROBE_WINDOW: Duration = Duration::from_secs(3);

/// Sends one WS-Discovery Probe and reports each scanner that answers.
///
/// Every match is asked for its scanner elements before it is reported, so
/// the candidate carries the real model and feeder.
#[derive(Debug, Clone)]
pub struct WsDiscoveryStrategy {
    target: SocketAddr,
    window: Duration,
    jobs: JobConfig,
}

impl WsDiscoveryStrategy {
    /// Probe the standard multicast group.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self::with_target(multicast_target(), window)
    }

    /// Probe a specific address (unicast or another group).
    #[must_use]
    pub fn with_target(target: SocketAddr, window: Duration) -> Self {
        Self {
            target,
            window,
            jobs: JobConfig::default(),
        }
    }

    /// HTTP settings for the capabilities lookup of each match.
    #[must_use]
    pub fn with_jobs(mut self, jobs: JobConfig) -> Self {
        self.jobs = jobs;
        self
    }
}

impl Default for WsDiscoveryStrategy {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_WINDOW)
    }
}

#[async_trait]
impl DiscoveryStrategy for WsDiscoveryStrategy {
    fn name(&self) -> &'static str {
        "ws-discovery"
    }

    async fn run(&self, sink: CandidateSink, cancel: CancellationToken) -> Result<()> {
        let mut lookups = JoinSet::new();
        let probe = probe_with(self.target, self.window, |found, sender| {
            match found.descriptor(sender) {
                Some(descriptor) => {
                    info!(ip = %descriptor.ip, port = descriptor.port, "WS-Discovery found WSD scanner");
                    let sink = sink.clone();
                    let jobs = self.jobs.clone();
                    lookups.spawn(async move {
                        // Receiver gone means the run is over
                        let _ = sink.send(enrich(descriptor, &jobs).await);
                    });
                }
                None => debug!(%sender, "ProbeMatch without usable transfer address"),
            }
        });

        let probed = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            res = probe => res,
        };
        probed?;

        tokio::select! {
            () = cancel.cancelled() => {}
            () = async { while lookups.join_next().await.is_some() {} } => {}
        }
        Ok(())
    }
}
