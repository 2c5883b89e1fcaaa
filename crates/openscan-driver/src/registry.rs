//! Protocol-tagged driver factories and the active driver slot.

use crate::driver::{DriverCapabilities, ScannerDriver};
use crate::drivers::{EsclDriver, FolderWatchDriver, WsdDriver};
use crate::error::{DriverError, Result};
use openscan_core::{
    FolderWatchConfig, JobConfig, Protocol, ScanRequest, ScanResult, ScannerDescriptor,
    ScannerStatus,
};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Settings handed to every driver factory.
#[derive(Debug, Clone, Default)]
pub struct DriverSettings {
    /// Job polling, timeouts and retry policy
    pub jobs: JobConfig,
    /// Folder-watch parameters
    pub folder_watch: FolderWatchConfig,
}

/// Builds a driver instance for a descriptor.
pub type DriverFactory =
    Arc<dyn Fn(&ScannerDescriptor, &DriverSettings) -> Result<Arc<dyn ScannerDriver>> + Send + Sync>;

/// Wrap a closure as a [`DriverFactory`].
pub fn driver_factory<F>(factory: F) -> DriverFactory
where
    F: Fn(&ScannerDescriptor, &DriverSettings) -> Result<Arc<dyn ScannerDriver>> + Send + Sync + 'static,
{
    Arc::new(factory)
}

/// A driver instance plus the gate that keeps its scans exclusive.
///
/// Clones share the same gate, so the ADF monitor and manual requests
/// holding clones of one handle can never overlap their scans.
#[derive(Clone)]
pub struct DriverHandle {
    driver: Arc<dyn ScannerDriver>,
    scan_gate: Arc<Mutex<()>>,
}

impl DriverHandle {
    /// Wrap a driver instance.
    #[must_use]
    pub fn new(driver: Arc<dyn ScannerDriver>) -> Self {
        Self {
            driver,
            scan_gate: Arc::new(Mutex::new(())),
        }
    }

    /// Descriptor of the underlying driver.
    #[must_use]
    pub fn descriptor(&self) -> &ScannerDescriptor {
        self.driver.descriptor()
    }

    /// The underlying driver.
    #[must_use]
    pub fn driver(&self) -> &Arc<dyn ScannerDriver> {
        &self.driver
    }

    /// Whether a scan is currently running on this instance.
    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.scan_gate.try_lock().is_err()
    }

    /// Run a scan, rejecting the call if another scan is in flight.
    ///
    /// # Errors
    /// Returns [`DriverError::Busy`] when a scan is already running, otherwise
    /// whatever the driver returns.
    pub async fn scan(&self, request: ScanRequest) -> Result<ScanResult> {
        let Ok(_guard) = self.scan_gate.try_lock() else {
            return Err(DriverError::Busy {
                target: self.descriptor().id().to_string(),
            });
        };
        debug!(scanner = %self.descriptor().id(), source = %request.source, auto = request.auto, "starting scan");
        self.driver.scan(request).await
    }

    /// Query capabilities.
    ///
    /// # Errors
    /// Returns error if the device is unreachable.
    pub async fn capabilities(&self) -> Result<DriverCapabilities> {
        self.driver.capabilities().await
    }

    /// Query status.
    ///
    /// # Errors
    /// Returns error on transport failure.
    pub async fn status(&self) -> Result<ScannerStatus> {
        self.driver.status().await
    }

    /// Status with failures folded into `Offline`.
    pub async fn status_or_offline(&self) -> ScannerStatus {
        self.driver.status_or_offline().await
    }

    /// Post-delivery housekeeping for a result from this driver.
    ///
    /// # Errors
    /// Returns error if housekeeping fails.
    pub async fn complete_delivery(&self, result: &ScanResult) -> Result<()> {
        self.driver.complete_delivery(result).await
    }

    /// Undo the hand-out of a result that could not be saved.
    pub async fn abandon_delivery(&self, result: &ScanResult) {
        self.driver.abandon_delivery(result).await;
    }
}

impl std::fmt::Debug for DriverHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverHandle")
            .field("scanner", self.descriptor().id())
            .field("scanning", &self.is_scanning())
            .finish()
    }
}

/// Registry of driver factories keyed by protocol, holding the active driver.
///
/// At most one driver is active at a time. Activating a new descriptor swaps
/// the slot; operations already holding the old handle run to completion.
pub struct DriverRegistry {
    factories: HashMap<Protocol, DriverFactory>,
    settings: DriverSettings,
    active: RwLock<Option<DriverHandle>>,
}

impl DriverRegistry {
    /// Create a registry with no factories.
    #[must_use]
    pub fn new(settings: DriverSettings) -> Self {
        Self {
            factories: HashMap::new(),
            settings,
            active: RwLock::new(None),
        }
    }

    /// Create a registry with the eSCL, WSD and folder-watch drivers.
    #[must_use]
    pub fn with_default_drivers(settings: DriverSettings) -> Self {
        let mut registry = Self::new(settings);
        registry.register(
            Protocol::Escl,
            driver_factory(|descriptor, settings| {
                Ok(Arc::new(EsclDriver::new(descriptor.clone(), &settings.jobs)?) as Arc<dyn ScannerDriver>)
            }),
        );
        registry.register(
            Protocol::Wsd,
            driver_factory(|descriptor, settings| {
                Ok(Arc::new(WsdDriver::new(descriptor.clone(), &settings.jobs)?) as Arc<dyn ScannerDriver>)
            }),
        );
        registry.register(
            Protocol::Folder,
            driver_factory(|descriptor, settings| {
                Ok(Arc::new(FolderWatchDriver::new(
                    descriptor.clone(),
                    &settings.folder_watch,
                    settings.jobs.timeout(),
                )) as Arc<dyn ScannerDriver>)
            }),
        );
        info!(count = registry.factories.len(), "registered scanner drivers");
        registry
    }

    /// Register (or replace) the factory for a protocol.
    pub fn register(&mut self, protocol: Protocol, factory: DriverFactory) {
        self.factories.insert(protocol, factory);
    }

    /// Settings passed to factories.
    #[must_use]
    pub fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    /// Whether a factory exists for the protocol.
    #[must_use]
    pub fn supports(&self, protocol: Protocol) -> bool {
        self.factories.contains_key(&protocol)
    }

    /// Build a standalone driver that is not installed as the active one.
    ///
    /// # Errors
    /// Returns [`DriverError::UnsupportedProtocol`] when no factory matches.
    pub fn create(&self, descriptor: &ScannerDescriptor) -> Result<DriverHandle> {
        let factory = self.factories.get(&descriptor.protocol).ok_or_else(|| {
            DriverError::UnsupportedProtocol {
                protocol: descriptor.protocol.to_string(),
            }
        })?;
        let driver = factory(descriptor, &self.settings)?;
        Ok(DriverHandle::new(driver))
    }

    /// Build a driver for the descriptor and make it the active one.
    ///
    /// # Errors
    /// Returns error if no factory matches; the previous driver stays active.
    pub fn activate(&self, descriptor: &ScannerDescriptor) -> Result<DriverHandle> {
        let handle = self.create(descriptor)?;
        Ok(self.install(handle))
    }

    /// Make an already-built driver the active one.
    ///
    /// Used when another component must share the driver instance, such as
    /// the folder-watch task and a folder scanner.
    pub fn install(&self, handle: DriverHandle) -> DriverHandle {
        let previous = self
            .active
            .write()
            .expect("acquire write lock on active driver")
            .replace(handle.clone());
        info!(
            scanner = %handle.descriptor().id(),
            replaced = previous.is_some(),
            "activated scanner driver"
        );
        handle
    }

    /// Clear the active driver, returning it.
    pub fn deactivate(&self) -> Option<DriverHandle> {
        self.active
            .write()
            .expect("acquire write lock on active driver")
            .take()
    }

    /// The active driver, if any.
    #[must_use]
    pub fn active(&self) -> Option<DriverHandle> {
        self.active
            .read()
            .expect("acquire read lock on active driver")
            .clone()
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut protocols: Vec<_> = self.factories.keys().collect();
        protocols.sort();
        f.debug_struct("DriverRegistry")
            .field("protocols", &protocols)
            .field("active", &self.active())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use openscan_core::ScanSource;
    use std::time::Duration;

    struct SlowDriver {
        descriptor: ScannerDescriptor,
    }

    #[async_trait]
    impl ScannerDriver for SlowDriver {
        fn descriptor(&self) -> &ScannerDescriptor {
            &self.descriptor
        }

        async fn capabilities(&self) -> Result<DriverCapabilities> {
            Ok(DriverCapabilities::platen_only("slow", "test"))
        }

        async fn status(&self) -> Result<ScannerStatus> {
            Ok(ScannerStatus::idle())
        }

        async fn scan(&self, request: ScanRequest) -> Result<ScanResult> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ScanResult::new(
                "scan.pdf",
                "application/pdf",
                request.source,
                request.auto,
                b"%PDF".to_vec(),
            ))
        }
    }

    fn slow_registry() -> DriverRegistry {
        let mut registry = DriverRegistry::new(DriverSettings::default());
        registry.register(
            Protocol::Escl,
            driver_factory(|descriptor, _| {
                Ok(Arc::new(SlowDriver {
                    descriptor: descriptor.clone(),
                }) as Arc<dyn ScannerDriver>)
            }),
        );
        registry
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_scan_is_rejected() {
        let registry = slow_registry();
        let handle = registry
            .activate(&ScannerDescriptor::new("10.0.0.2", 80, Protocol::Escl))
            .unwrap();

        let first = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.scan(ScanRequest::new(ScanSource::Platen)).await })
        };
        tokio::task::yield_now().await;
        assert!(handle.is_scanning());

        let second = handle.scan(ScanRequest::automatic(ScanSource::Feeder)).await;
        assert!(matches!(second, Err(DriverError::Busy { .. })));

        let result = first.await.unwrap().unwrap();
        assert_eq!(result.size_bytes, 4);
        assert!(!handle.is_scanning());
    }

    #[test]
    fn test_unsupported_protocol() {
        let registry = slow_registry();
        let err = registry
            .create(&ScannerDescriptor::new("10.0.0.2", 80, Protocol::Wsd))
            .unwrap_err();
        assert!(matches!(err, DriverError::UnsupportedProtocol { .. }));
        assert!(registry.active().is_none());
    }

    #[test]
    fn test_activate_swaps_and_deactivates() {
        let registry = slow_registry();
        let a = ScannerDescriptor::new("10.0.0.2", 80, Protocol::Escl);
        let b = ScannerDescriptor::new("10.0.0.3", 80, Protocol::Escl);

        registry.activate(&a).unwrap();
        let old = registry.active().unwrap();
        registry.activate(&b).unwrap();

        assert_eq!(registry.active().unwrap().descriptor().id(), b.id());
        assert_eq!(old.descriptor().id(), a.id());

        assert!(registry.deactivate().is_some());
        assert!(registry.active().is_none());
    }

    #[test]
    fn test_create_does_not_touch_active() {
        let registry = slow_registry();
        let a = ScannerDescriptor::new("10.0.0.2", 80, Protocol::Escl);
        let b = ScannerDescriptor::new("10.0.0.9", 80, Protocol::Escl);
        registry.activate(&a).unwrap();
        let standalone = registry.create(&b).unwrap();
        assert_eq!(standalone.descriptor().id(), b.id());
        assert_eq!(registry.active().unwrap().descriptor().id(), a.id());
    }

    #[test]
    fn test_default_drivers_registered() {
        let registry = DriverRegistry::with_default_drivers(DriverSettings::default());
        assert!(registry.supports(Protocol::Escl));
        assert!(registry.supports(Protocol::Wsd));
        assert!(registry.supports(Protocol::Folder));
    }
}
