//! mDNS browsing for eSCL (`_uscan._tcp`) services.

use crate::error::Result;
use crate::manual::enrich;
use crate::strategy::{CandidateSink, DiscoveryStrategy};
use async_trait::async_trait;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use openscan_core::{JobConfig, Protocol, ScanSource, ScannerDescriptor};
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Service type advertised by eSCL scanners.
pub const ESCL_SERVICE_TYPE: &str = "_uscan._tcp.local.";

const RECV_SLICE: Duration = Duration::from_millis(100);

/// Browses mDNS and reports every resolved eSCL service.
///
/// Services whose TXT record omits `is` are asked for their capabilities
/// before they are reported.
#[derive(Debug, Clone)]
pub struct MdnsStrategy {
    service_type: String,
    jobs: JobConfig,
}

impl MdnsStrategy {
    /// Browse the standard eSCL service type.
    #[must_use]
    pub fn new() -> Self {
        Self::with_service_type(ESCL_SERVICE_TYPE)
    }

    /// Browse a custom service type.
    #[must_use]
    pub fn with_service_type(service_type: impl Into<String>) -> Self {
        Self {
            service_type: service_type.into(),
            jobs: JobConfig::default(),
        }
    }

    /// HTTP settings for capabilities lookups.
    #[must_use]
    pub fn with_jobs(mut self, jobs: JobConfig) -> Self {
        self.jobs = jobs;
        self
    }
}

impl Default for MdnsStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DiscoveryStrategy for MdnsStrategy {
    fn name(&self) -> &'static str {
        "mdns"
    }

    async fn run(&self, sink: CandidateSink, cancel: CancellationToken) -> Result<()> {
        let daemon = ServiceDaemon::new()?;
        let receiver = daemon.browse(&self.service_type)?;
        debug!(service_type = %self.service_type, "browsing mDNS");

        let (resolved_tx, mut resolved_rx) = mpsc::unbounded_channel();
        let service_type = self.service_type.clone();
        let stop = cancel.clone();
        let browse = tokio::task::spawn_blocking(move || {
            while !stop.is_cancelled() {
                match receiver.recv_timeout(RECV_SLICE) {
                    Ok(ServiceEvent::ServiceResolved(info)) => {
                        if let Some(resolved) = descriptor_from_service(&info, &service_type) {
                            info!(ip = %resolved.0.ip, port = resolved.0.port, "mDNS resolved eSCL scanner");
                            if resolved_tx.send(resolved).is_err() {
                                break;
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(e) if receiver.is_disconnected() => {
                        debug!("mDNS browse channel closed: {e}");
                        break;
                    }
                    Err(_) => {}
                }
            }
            if let Err(e) = daemon.stop_browse(&service_type) {
                debug!("stopping mDNS browse failed: {e}");
            }
            if let Err(e) = daemon.shutdown() {
                warn!("mDNS daemon shutdown failed: {e}");
            }
        });

        let forward = async {
            let mut lookups = JoinSet::new();
            while let Some((descriptor, lists_sources)) = resolved_rx.recv().await {
                if lists_sources {
                    let _ = sink.send(descriptor);
                    continue;
                }
                let sink = sink.clone();
                let jobs = self.jobs.clone();
                lookups.spawn(async move {
                    let _ = sink.send(enrich(descriptor, &jobs).await);
                });
            }
            while lookups.join_next().await.is_some() {}
        };
        tokio::select! {
            () = cancel.cancelled() => {}
            () = forward => {}
        }

        browse
            .await
            .map_err(|e| crate::error::DiscoveryError::Task(e.to_string()))
    }
}

/// Descriptor of a resolved service and whether its TXT record lists sources.
fn descriptor_from_service(
    info: &ServiceInfo,
    service_type: &str,
) -> Option<(ScannerDescriptor, bool)> {
    let addresses: Vec<IpAddr> = info.get_addresses().iter().copied().collect();
    let ip = addresses
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addresses.first())
        .copied()?;
    let txt: HashMap<String, String> = info
        .get_properties()
        .iter()
        .map(|p| (p.key().to_ascii_lowercase(), p.val_str().to_string()))
        .collect();
    let instance = info
        .get_fullname()
        .strip_suffix(service_type)
        .unwrap_or(info.get_fullname())
        .trim_end_matches('.');
    let lists_sources = txt.contains_key("is");
    Some((descriptor_from_txt(ip, info.get_port(), instance, &txt), lists_sources))
}

/// Build an eSCL descriptor from a resolved service and its TXT record.
///
/// `ty` names the model, `rs` the eSCL root path and `is` the input sources.
#[must_use]
pub fn descriptor_from_txt(
    ip: IpAddr,
    port: u16,
    instance: &str,
    txt: &HashMap<String, String>,
) -> ScannerDescriptor {
    let mut descriptor = ScannerDescriptor::new(ip.to_string(), port, Protocol::Escl);

    if let Some(model) = txt.get("ty").filter(|v| !v.is_empty()) {
        descriptor = descriptor.with_model(model);
    }
    let name = if instance.is_empty() {
        descriptor.model.clone()
    } else {
        instance.to_string()
    };
    if !name.is_empty() {
        descriptor = descriptor.with_display_name(name);
    }
    if let Some(root) = txt.get("rs").map(|v| v.trim().trim_matches('/')).filter(|v| !v.is_empty()) {
        descriptor = descriptor.with_service_path(format!("/{root}"));
    }
    if let Some(sources) = txt.get("is") {
        let parsed: Vec<ScanSource> = sources
            .split(',')
            .filter_map(|s| match s.trim().to_ascii_lowercase().as_str() {
                "platen" => Some(ScanSource::Platen),
                "adf" | "feeder" => Some(ScanSource::Feeder),
                _ => None,
            })
            .collect();
        descriptor = descriptor.with_sources(parsed);
    }
    descriptor
}
