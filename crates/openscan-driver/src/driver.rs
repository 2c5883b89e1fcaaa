//! Core scanner driver trait and capability types.

use crate::error::Result;
use async_trait::async_trait;
use openscan_core::{Protocol, ScanRequest, ScanResult, ScanSource, ScannerDescriptor, ScannerStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Trait every scanner transport implements.
///
/// Implementations must be thread-safe (Send + Sync): the ADF monitor and
/// manual scan requests share one instance. Callers should go through
/// [`DriverHandle`](crate::DriverHandle), which enforces that at most one
/// [`scan`](ScannerDriver::scan) runs per instance.
#[async_trait]
pub trait ScannerDriver: Send + Sync {
    /// Descriptor this driver was built for.
    fn descriptor(&self) -> &ScannerDescriptor;

    /// Protocol tag of this driver.
    fn protocol(&self) -> Protocol {
        self.descriptor().protocol
    }

    /// Query what the device can do.
    ///
    /// # Errors
    /// Returns [`DriverError::Unavailable`](crate::DriverError::Unavailable)
    /// if the device cannot be reached.
    async fn capabilities(&self) -> Result<DriverCapabilities>;

    /// Fetch the current device status.
    ///
    /// # Errors
    /// Returns [`DriverError::Network`](crate::DriverError::Network) on
    /// timeout or refused connection.
    async fn status(&self) -> Result<ScannerStatus>;

    /// Run one scan job and return the document.
    ///
    /// # Errors
    /// Returns a protocol error for malformed responses and a job timeout
    /// when the device does not finish in time.
    async fn scan(&self, request: ScanRequest) -> Result<ScanResult>;

    /// Called once the output router has persisted a result from this driver.
    ///
    /// # Errors
    /// Returns error if post-delivery housekeeping fails.
    async fn complete_delivery(&self, _result: &ScanResult) -> Result<()> {
        Ok(())
    }

    /// Called when a result from this driver could not be saved.
    ///
    /// Drivers that hand out files use it to offer the file again.
    async fn abandon_delivery(&self, _result: &ScanResult) {}

    /// Status with transport failures folded into `Offline`.
    async fn status_or_offline(&self) -> ScannerStatus {
        match self.status().await {
            Ok(status) => status,
            Err(e) => {
                tracing::debug!(scanner = %self.descriptor().id(), "status poll failed: {e}");
                ScannerStatus::offline()
            }
        }
    }

    /// Whether the device answers and is not offline.
    async fn test_connection(&self) -> bool {
        self.status_or_offline().await.is_online()
    }
}

/// What a device reports it can do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverCapabilities {
    /// Human-facing name
    pub display_name: String,
    /// Make and model
    pub model: String,
    /// Input sources
    pub sources: BTreeSet<ScanSource>,
    /// Supported resolutions in DPI
    pub resolutions: Vec<u32>,
    /// Supported document MIME types
    pub formats: Vec<String>,
    /// Supported color modes
    pub color_modes: Vec<String>,
    /// Whether the feeder can scan both sides
    pub duplex: bool,
}

impl DriverCapabilities {
    /// Platen-only capabilities with defaults.
    #[must_use]
    pub fn platen_only(display_name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            model: model.into(),
            sources: BTreeSet::from([ScanSource::Platen]),
            resolutions: vec![300],
            formats: vec!["application/pdf".to_string()],
            color_modes: vec!["RGB24".to_string()],
            duplex: false,
        }
    }

    /// Whether the device has a feeder.
    #[must_use]
    pub fn has_feeder(&self) -> bool {
        self.sources.contains(&ScanSource::Feeder)
    }

    /// Copy sources, model and name into a descriptor.
    #[must_use]
    pub fn apply_to(&self, descriptor: ScannerDescriptor) -> ScannerDescriptor {
        let mut descriptor = descriptor.with_sources(self.sources.iter().copied());
        if !self.model.is_empty() {
            descriptor = descriptor.with_model(&self.model);
        }
        if !self.display_name.is_empty() {
            descriptor = descriptor.with_display_name(&self.display_name);
        }
        descriptor
    }
}
