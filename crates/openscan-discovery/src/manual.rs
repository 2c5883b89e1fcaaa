//! Manual probing of an explicit `(ip, port)`.

use crate::error::Result;
use crate::strategy::{CandidateSink, DiscoveryStrategy};
use async_trait::async_trait;
use openscan_core::{JobConfig, Protocol, ScannerDescriptor};
use openscan_driver::{EsclDriver, ScannerDriver, WsdDriver};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Upper bound on one capabilities lookup for a discovered candidate.
pub const ENRICH_TIMEOUT: Duration = Duration::from_secs(3);

/// Protocols to try for a probe, in order.
#[must_use]
pub fn probe_order(hint: Option<Protocol>) -> [Protocol; 2] {
    match hint {
        Some(Protocol::Wsd) => [Protocol::Wsd, Protocol::Escl],
        _ => [Protocol::Escl, Protocol::Wsd],
    }
}

/// Ask one host which scanning protocol it speaks.
///
/// The hinted protocol is tried first, then the other one. The first
/// protocol whose capabilities document parses wins. `None` means neither
/// answered, which is a negative result and not a failure.
pub async fn probe(
    ip: &str,
    port: u16,
    hint: Option<Protocol>,
    jobs: &JobConfig,
) -> Option<ScannerDescriptor> {
    for protocol in probe_order(hint) {
        match probe_protocol(ip, port, protocol, jobs).await {
            Ok(descriptor) => {
                info!(ip, port, protocol = %protocol, "probe succeeded");
                return Some(descriptor);
            }
            Err(e) => debug!(ip, port, protocol = %protocol, "probe failed: {e}"),
        }
    }
    None
}

async fn probe_protocol(
    ip: &str,
    port: u16,
    protocol: Protocol,
    jobs: &JobConfig,
) -> openscan_driver::Result<ScannerDescriptor> {
    fetch_capabilities(ScannerDescriptor::new(ip, port, protocol), jobs).await
}

async fn fetch_capabilities(
    descriptor: ScannerDescriptor,
    jobs: &JobConfig,
) -> openscan_driver::Result<ScannerDescriptor> {
    let caps = match descriptor.protocol {
        Protocol::Escl => EsclDriver::new(descriptor.clone(), jobs)?.capabilities().await?,
        Protocol::Wsd => WsdDriver::new(descriptor.clone(), jobs)?.capabilities().await?,
        Protocol::Folder => {
            return Err(openscan_driver::DriverError::UnsupportedProtocol {
                protocol: descriptor.protocol.to_string(),
            })
        }
    };
    Ok(caps.apply_to(descriptor))
}

/// Fill in model and input sources of a multicast candidate.
///
/// Asks the device for its capabilities over the candidate's own protocol
/// and service path. The lookup is bounded by [`ENRICH_TIMEOUT`] and the
/// request timeout; on any failure the candidate is returned unchanged.
pub async fn enrich(descriptor: ScannerDescriptor, jobs: &JobConfig) -> ScannerDescriptor {
    let bound = jobs.request_timeout().min(ENRICH_TIMEOUT);
    match tokio::time::timeout(bound, fetch_capabilities(descriptor.clone(), jobs)).await {
        Ok(Ok(enriched)) => {
            debug!(id = %enriched.id(), feeder = enriched.has_feeder(), "capabilities read");
            enriched
        }
        Ok(Err(e)) => {
            debug!(id = %descriptor.id(), "capabilities lookup failed: {e}");
            descriptor
        }
        Err(_) => {
            debug!(id = %descriptor.id(), "capabilities lookup timed out");
            descriptor
        }
    }
}

/// Probes a fixed list of hosts as part of a discovery run.
#[derive(Debug, Clone, Default)]
pub struct ManualProbeStrategy {
    targets: Vec<(String, u16, Option<Protocol>)>,
    jobs: JobConfig,
}

impl ManualProbeStrategy {
    /// Create a strategy with no targets.
    #[must_use]
    pub fn new(jobs: JobConfig) -> Self {
        Self {
            targets: Vec::new(),
            jobs,
        }
    }

    /// Add a host to probe.
    #[must_use]
    pub fn with_target(mut self, ip: impl Into<String>, port: u16, hint: Option<Protocol>) -> Self {
        self.targets.push((ip.into(), port, hint));
        self
    }

    /// Whether any host is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[async_trait]
impl DiscoveryStrategy for ManualProbeStrategy {
    fn name(&self) -> &'static str {
        "manual"
    }

    async fn run(&self, sink: CandidateSink, cancel: CancellationToken) -> Result<()> {
        let probes = self.targets.iter().map(|(ip, port, hint)| {
            let sink = sink.clone();
            async move {
                if let Some(descriptor) = probe(ip, *port, *hint, &self.jobs).await {
                    let _ = sink.send(descriptor);
                }
            }
        });

        tokio::select! {
            () = cancel.cancelled() => {}
            _ = futures::future::join_all(probes) => {}
        }
        Ok(())
    }
}
