//! The operations a front end drives: discovery, scanning and reconfiguration.

use crate::error::{HubError, Result};
use openscan_core::{
    AppConfig, DeliveryConfig, FolderWatchConfig, FtpReceiveConfig, JobConfig, MonitorConfig,
    OutputConfig, PaperlessConfig, Protocol, ScanRecord, ScanRequest, ScanResult, ScanSource, ScannerDescriptor,
    ScannerStatus,
};
use openscan_discovery::{DiscoveryService, ManualProbeStrategy};
use openscan_driver::{
    DriverHandle, DriverRegistry, DriverSettings, FolderWatchDriver, FtpReceiver, ScannerDriver,
};
use openscan_monitor::{AdfMonitor, FolderWatchTask, FtpReceiveTask, MonitorHandle};
use openscan_output::{DeliveryReport, OutputError, OutputRouter, PaperlessClient, ScanHistory};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Settings swapped in by [`ScanHub::reconfigure`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Reconfiguration {
    /// Scanner to activate; `None` clears the active scanner
    pub scanner: Option<ScannerDescriptor>,
    /// Local output folder and naming
    pub output: OutputConfig,
    /// Paperless-NGX delivery
    pub paperless: PaperlessConfig,
    /// ADF auto-scan monitor
    pub monitor: MonitorConfig,
}

impl Reconfiguration {
    /// Take the reconfigurable sections out of a full config record.
    ///
    /// # Errors
    /// Returns error if the stored scanner protocol is unknown.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            scanner: config.active_descriptor()?,
            output: config.output.clone(),
            paperless: config.paperless.clone(),
            monitor: config.monitor.clone(),
        })
    }
}

/// A manual scan that was saved locally.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    /// What the scanner produced
    pub result: ScanResult,
    /// Where it was saved and how Paperless took it
    pub report: DeliveryReport,
}

#[derive(Debug, Default)]
struct Background {
    monitor: Option<MonitorHandle>,
    folder_watch: Option<MonitorHandle>,
    folder_config: FolderWatchConfig,
    ftp: Option<(MonitorHandle, SocketAddr)>,
    ftp_config: FtpReceiveConfig,
}

/// Single entry point owning the driver registry, output pipeline and
/// background tasks.
pub struct ScanHub {
    registry: DriverRegistry,
    jobs: JobConfig,
    delivery: DeliveryConfig,
    discovery_timeout: Duration,
    history: Arc<ScanHistory>,
    router: RwLock<Arc<OutputRouter>>,
    background: Mutex<Background>,
}

impl ScanHub {
    /// Build an idle hub: no active scanner, no background tasks.
    ///
    /// # Errors
    /// Returns error if the Paperless settings are unusable.
    pub fn new(config: &AppConfig) -> Result<Self> {
        let registry = DriverRegistry::with_default_drivers(DriverSettings {
            jobs: config.jobs.clone(),
            folder_watch: config.folder_watch.clone(),
        });
        let history = Arc::new(ScanHistory::new(config.history.limit));
        let router = OutputRouter::new(
            &config.output,
            &config.paperless,
            &config.delivery,
            history.clone(),
        )?;

        Ok(Self {
            registry,
            jobs: config.jobs.clone(),
            delivery: config.delivery.clone(),
            discovery_timeout: config.discovery.timeout(),
            history,
            router: RwLock::new(Arc::new(router)),
            background: Mutex::new(Background {
                folder_config: config.folder_watch.clone(),
                ftp_config: config.ftp_receive.clone(),
                ..Background::default()
            }),
        })
    }

    /// Build a hub and bring up everything the config asks for.
    ///
    /// An FTP port that cannot be bound is logged and the receiver left down.
    ///
    /// # Errors
    /// Returns error if the config cannot be applied.
    pub async fn start(config: &AppConfig) -> Result<Self> {
        let hub = Self::new(config)?;
        hub.reconfigure(Reconfiguration::from_config(config)?).await?;
        Ok(hub)
    }

    /// Default overall discovery timeout.
    #[must_use]
    pub fn discovery_timeout(&self) -> Duration {
        self.discovery_timeout
    }

    /// Find scanners on the local network.
    ///
    /// The configured network scanner is probed directly as well, so it is
    /// listed even where multicast is filtered. Never fails; an empty list
    /// means nothing answered in time.
    pub async fn discover(&self, timeout: Duration) -> Vec<ScannerDescriptor> {
        let mut manual = ManualProbeStrategy::new(self.jobs.clone());
        if let Some(active) = self.active_descriptor() {
            if active.protocol != Protocol::Folder {
                manual = manual.with_target(active.ip.clone(), active.port, Some(active.protocol));
            }
        }
        DiscoveryService::with_defaults(timeout, &self.jobs, manual)
            .discover(timeout)
            .await
    }

    /// Ask one host which protocol it speaks; `None` when neither answers.
    pub async fn probe(
        &self,
        ip: &str,
        port: u16,
        hint: Option<Protocol>,
    ) -> Option<ScannerDescriptor> {
        openscan_discovery::probe(ip, port, hint, &self.jobs).await
    }

    /// Status of the active scanner; `Offline` when there is none or it is
    /// unreachable.
    pub async fn status(&self) -> ScannerStatus {
        match self.registry.active() {
            Some(driver) => driver.status_or_offline().await,
            None => ScannerStatus::offline(),
        }
    }

    /// Manual scan on the active scanner, saved and delivered.
    ///
    /// # Errors
    /// Returns [`HubError::NoActiveScanner`] without a scanner, the driver's
    /// error when the scan fails, and [`OutputError::Delivery`] when the scan
    /// was saved but Paperless rejected it.
    pub async fn scan(&self, source: ScanSource) -> Result<ScanOutcome> {
        let driver = self.registry.active().ok_or(HubError::NoActiveScanner)?;
        let result = driver
            .scan(ScanRequest::new(source))
            .await
            .map_err(|e| {
                error!(scanner = %driver.descriptor().id(), kind = %e.kind(), "scan failed: {e}");
                e
            })?;

        let router = self.router();
        let routed = router.route(&result).await;
        if matches!(routed, Ok(_) | Err(OutputError::Delivery { .. })) {
            if let Err(e) = driver.complete_delivery(&result).await {
                warn!(scanner = %driver.descriptor().id(), "post-delivery action failed: {e}");
            }
        } else {
            driver.abandon_delivery(&result).await;
        }
        let report = routed?;
        Ok(ScanOutcome { result, report })
    }

    /// Scan with a descriptor that is not (necessarily) active yet.
    ///
    /// Nothing is saved, delivered or recorded. The active driver instance
    /// is reused when the descriptor matches it, so a test scan can never
    /// run alongside a scan on the same device.
    ///
    /// # Errors
    /// Returns error when no driver fits the descriptor or the scan fails.
    pub async fn test_scan(
        &self,
        descriptor: &ScannerDescriptor,
        source: ScanSource,
    ) -> Result<ScanResult> {
        let driver = match self.registry.active() {
            Some(active) if active.descriptor().id() == descriptor.id() => active,
            _ => self.registry.create(descriptor)?,
        };
        let result = driver.scan(ScanRequest::new(source)).await.map_err(|e| {
            warn!(scanner = %descriptor.id(), "test scan failed: {e}");
            e
        })?;
        info!(scanner = %descriptor.id(), size = result.size_bytes, "test scan succeeded");
        Ok(result)
    }

    /// Whether the device behind a descriptor answers and is not offline.
    ///
    /// # Errors
    /// Returns error when no driver fits the descriptor.
    pub async fn test_connection(&self, descriptor: &ScannerDescriptor) -> Result<bool> {
        let driver = self.registry.create(descriptor)?;
        Ok(driver.driver().test_connection().await)
    }

    /// Check Paperless settings before saving them; returns the HTTP status
    /// (or 200 for a reachable consume folder).
    ///
    /// # Errors
    /// Returns [`HubError::Paperless`] when delivery is disabled or the check
    /// fails.
    pub async fn test_paperless(&self, config: &PaperlessConfig) -> Result<u16> {
        let client = PaperlessClient::from_config(config, self.delivery.retry.clone())?
            .ok_or_else(|| HubError::Paperless("Paperless delivery is disabled".to_string()))?;
        client.test_connection().await.map_err(HubError::Paperless)
    }

    /// Most recent scans, newest first.
    #[must_use]
    pub fn history(&self, limit: usize) -> Vec<ScanRecord> {
        self.history.recent(limit)
    }

    /// Swap the active scanner and output settings, restarting background
    /// tasks.
    ///
    /// Everything that can fail is built before anything is torn down, so an
    /// error leaves the previous configuration running. A scan already in
    /// flight on the old driver finishes on it.
    ///
    /// # Errors
    /// Returns error if the Paperless settings are unusable or no driver
    /// fits the scanner.
    pub async fn reconfigure(&self, change: Reconfiguration) -> Result<()> {
        let router = Arc::new(OutputRouter::new(
            &change.output,
            &change.paperless,
            &self.delivery,
            self.history.clone(),
        )?);
        let driver = change
            .scanner
            .as_ref()
            .map(|descriptor| self.registry.create(descriptor))
            .transpose()?;

        let mut background = self.background.lock().await;
        stop_task(background.monitor.take()).await;
        stop_task(background.folder_watch.take()).await;
        stop_task(background.ftp.take().map(|(handle, _)| handle)).await;

        *self.router.write().expect("acquire write lock on router") = router;
        match driver {
            Some(driver) => {
                self.registry.install(driver);
            }
            None => {
                if let Some(previous) = self.registry.deactivate() {
                    info!(scanner = %previous.descriptor().id(), "deactivated scanner");
                }
            }
        }

        let folder_config = background.folder_config.clone();
        background.folder_watch = self.spawn_folder_watch(&folder_config);
        background.monitor = self.spawn_monitor(&change.monitor);
        let ftp_config = background.ftp_config.clone();
        background.ftp = match self.spawn_ftp_receive(&ftp_config).await {
            Ok(task) => task,
            Err(e) => {
                error!(port = ftp_config.port, "FTP receiver not started: {e}");
                None
            }
        };
        Ok(())
    }

    /// Replace the folder-watch settings, restarting the watcher.
    pub async fn reconfigure_folder_watch(&self, config: FolderWatchConfig) {
        let mut background = self.background.lock().await;
        stop_task(background.folder_watch.take()).await;
        background.folder_watch = self.spawn_folder_watch(&config);
        background.folder_config = config;
    }

    /// Replace the Scan-to-FTP settings, restarting the receiver.
    ///
    /// # Errors
    /// Returns error if the staging folder or the port is unusable; the
    /// receiver is then left stopped.
    pub async fn reconfigure_ftp_receive(&self, config: FtpReceiveConfig) -> Result<()> {
        let mut background = self.background.lock().await;
        stop_task(background.ftp.take().map(|(handle, _)| handle)).await;
        let started = self.spawn_ftp_receive(&config).await;
        background.ftp_config = config;
        background.ftp = started?;
        Ok(())
    }

    /// Descriptor of the active scanner.
    #[must_use]
    pub fn active_descriptor(&self) -> Option<ScannerDescriptor> {
        self.registry.active().map(|d| d.descriptor().clone())
    }

    /// Whether the ADF monitor is running.
    pub async fn monitor_running(&self) -> bool {
        self.background
            .lock()
            .await
            .monitor
            .as_ref()
            .is_some_and(MonitorHandle::is_running)
    }

    /// Whether the folder watcher is running.
    pub async fn folder_watch_running(&self) -> bool {
        self.background
            .lock()
            .await
            .folder_watch
            .as_ref()
            .is_some_and(MonitorHandle::is_running)
    }

    /// Address the FTP receiver listens on, if it is running.
    pub async fn ftp_receive_addr(&self) -> Option<SocketAddr> {
        self.background
            .lock()
            .await
            .ftp
            .as_ref()
            .filter(|(handle, _)| handle.is_running())
            .map(|(_, addr)| *addr)
    }

    /// Stop background tasks and release the active scanner.
    pub async fn shutdown(&self) {
        let mut background = self.background.lock().await;
        stop_task(background.monitor.take()).await;
        stop_task(background.folder_watch.take()).await;
        stop_task(background.ftp.take().map(|(handle, _)| handle)).await;
        self.registry.deactivate();
        info!("scan hub stopped");
    }

    fn router(&self) -> Arc<OutputRouter> {
        self.router
            .read()
            .expect("acquire read lock on router")
            .clone()
    }

    fn spawn_monitor(&self, config: &MonitorConfig) -> Option<MonitorHandle> {
        let driver = self.registry.active()?;
        if !AdfMonitor::should_run(driver.descriptor(), config) {
            return None;
        }
        info!(
            scanner = %driver.descriptor().id(),
            interval = ?config.interval(),
            "starting ADF monitor"
        );
        Some(AdfMonitor::new(driver, self.router(), config.clone()).spawn())
    }

    /// Start the watcher; an active folder scanner on the same directory is
    /// switched to the watcher's instance so both see one set of files.
    fn spawn_folder_watch(&self, config: &FolderWatchConfig) -> Option<MonitorHandle> {
        if !config.enabled || config.watch_folder.trim().is_empty() {
            return None;
        }
        let watcher = Arc::new(FolderWatchDriver::from_config(config, self.jobs.timeout()));
        if let Some(active) = self.registry.active() {
            let shared = active.descriptor().protocol == Protocol::Folder
                && Path::new(&active.descriptor().ip) == watcher.root();
            if shared {
                self.registry.install(DriverHandle::new(watcher.clone()));
            }
        }
        info!(folder = %watcher.root().display(), "starting folder watch");
        Some(FolderWatchTask::new(watcher, self.router()).spawn())
    }

    async fn spawn_ftp_receive(
        &self,
        config: &FtpReceiveConfig,
    ) -> Result<Option<(MonitorHandle, SocketAddr)>> {
        if !config.enabled {
            return Ok(None);
        }
        let receiver = FtpReceiver::bind(config).await?;
        let addr = receiver.local_addr()?;
        info!(%addr, staging = %receiver.staging_dir().display(), "starting FTP receive");
        let task = FtpReceiveTask::new(receiver, config, self.jobs.timeout(), self.router());
        Ok(Some((task.spawn(), addr)))
    }
}

async fn stop_task(handle: Option<MonitorHandle>) {
    if let Some(handle) = handle {
        let name = handle.name();
        handle.stop().await;
        info!(task = name, "stopped background task");
    }
}

impl std::fmt::Debug for ScanHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanHub")
            .field("registry", &self.registry)
            .field("history", &self.history.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openscan_core::ErrorKind;
    use tempfile::TempDir;

    fn config(out: &Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.output.folder = out.display().to_string();
        config
    }

    #[tokio::test]
    async fn test_idle_hub_is_offline() {
        let out = TempDir::new().unwrap();
        let hub = ScanHub::new(&config(out.path())).unwrap();

        assert!(hub.active_descriptor().is_none());
        assert!(!hub.status().await.is_online());
        assert!(!hub.monitor_running().await);
    }

    #[tokio::test]
    async fn test_scan_without_scanner() {
        let out = TempDir::new().unwrap();
        let hub = ScanHub::new(&config(out.path())).unwrap();

        let err = hub.scan(ScanSource::Platen).await.unwrap_err();
        assert!(matches!(err, HubError::NoActiveScanner));
        assert_eq!(err.kind(), ErrorKind::DriverUnavailable);
    }

    #[tokio::test]
    async fn test_bad_paperless_config_keeps_previous_setup() {
        let out = TempDir::new().unwrap();
        let hub = ScanHub::new(&config(out.path())).unwrap();
        let scanner = ScannerDescriptor::new("10.0.0.9", 80, Protocol::Escl);

        let err = hub
            .reconfigure(Reconfiguration {
                scanner: Some(scanner),
                paperless: PaperlessConfig {
                    enabled: true,
                    mode: openscan_core::PaperlessMode::Api,
                    ..PaperlessConfig::default()
                },
                ..Reconfiguration::default()
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::DeliveryFailure);
        assert!(hub.active_descriptor().is_none());
    }

    #[tokio::test]
    async fn test_paperless_check_needs_delivery_enabled() {
        let out = TempDir::new().unwrap();
        let hub = ScanHub::new(&config(out.path())).unwrap();

        let err = hub
            .test_paperless(&PaperlessConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::Paperless(_)));
    }
}
