//! The aggregate discovery call.

use crate::manual::ManualProbeStrategy;
use crate::mdns::MdnsStrategy;
use crate::strategy::DiscoveryStrategy;
use crate::wsd::WsDiscoveryStrategy;
use openscan_core::{JobConfig, ScannerDescriptor, MAX_DURATION};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Runs every strategy concurrently under one deadline.
#[derive(Clone)]
pub struct DiscoveryService {
    strategies: Vec<Arc<dyn DiscoveryStrategy>>,
}

impl DiscoveryService {
    /// Create a service from explicit strategies.
    #[must_use]
    pub fn new(strategies: Vec<Arc<dyn DiscoveryStrategy>>) -> Self {
        Self { strategies }
    }

    /// mDNS plus WS-Discovery, and manual probes when any target is set.
    ///
    /// The WS-Discovery probe window is capped by `timeout`. Multicast
    /// candidates are completed with a capabilities lookup using `jobs`.
    #[must_use]
    pub fn with_defaults(timeout: Duration, jobs: &JobConfig, manual: ManualProbeStrategy) -> Self {
        let window = timeout.min(crate::wsd::DEFAULT_PROBE_WINDOW);
        let mut strategies: Vec<Arc<dyn DiscoveryStrategy>> = vec![
            Arc::new(MdnsStrategy::new().with_jobs(jobs.clone())),
            Arc::new(WsDiscoveryStrategy::new(window).with_jobs(jobs.clone())),
        ];
        if !manual.is_empty() {
            strategies.push(Arc::new(manual));
        }
        Self::new(strategies)
    }

    /// Names of the configured strategies.
    #[must_use]
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Discover scanners until `timeout` elapses or every strategy finishes.
    ///
    /// Candidates are deduplicated on `(ip, port)`; the first responder wins.
    /// A failing strategy contributes nothing. An empty list is a valid
    /// result.
    pub async fn discover(&self, timeout: Duration) -> Vec<ScannerDescriptor> {
        let now = Instant::now();
        let deadline = now.checked_add(timeout).unwrap_or(now + MAX_DURATION);
        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut tasks = JoinSet::new();
        for strategy in &self.strategies {
            let strategy = Arc::clone(strategy);
            let sink = tx.clone();
            let token = cancel.child_token();
            tasks.spawn(async move {
                let name = strategy.name();
                if let Err(e) = strategy.run(sink, token).await {
                    warn!(strategy = name, "discovery strategy failed: {e}");
                }
            });
        }
        // Channel closes once every strategy has dropped its sender
        drop(tx);

        let mut seen = HashSet::new();
        let mut found = Vec::new();
        loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(candidate)) => {
                    if seen.insert(candidate.endpoint()) {
                        debug!(id = %candidate.id(), "discovered scanner");
                        found.push(candidate);
                    } else {
                        debug!(id = %candidate.id(), "dropping duplicate candidate");
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    debug!("discovery deadline reached");
                    break;
                }
            }
        }

        cancel.cancel();
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}

        info!(count = found.len(), "discovery finished");
        found
    }
}

impl std::fmt::Debug for DiscoveryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryService")
            .field("strategies", &self.strategy_names())
            .finish()
    }
}
