//! OpenScanHub Core - Foundation crate for the scanner integration layer.
//!
//! This crate provides the shared data model, the failure taxonomy,
//! the persisted configuration record and the retry policy that all other
//! OpenScanHub crates depend on.
//!
//! # Modules
//!
//! - [`error`] - Failure kinds and configuration errors
//! - [`config`] - JSON configuration with platform paths
//! - [`types`] - Scanner descriptors, status, requests and results
//! - [`retry`] - Bounded exponential backoff
//!
//! # Example
//!
//! ```rust
//! use openscan_core::{AppConfig, Protocol, ScannerDescriptor, ScanSource};
//!
//! let config = AppConfig::default();
//! assert!(!config.monitor.enabled);
//!
//! let scanner = ScannerDescriptor::new("192.168.1.50", 80, Protocol::Escl)
//!     .with_sources([ScanSource::Platen, ScanSource::Feeder]);
//! assert!(scanner.has_feeder());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod config;
pub mod error;
pub mod retry;
pub mod types;

// Re-export commonly used types
pub use config::{
    AfterDelivery, AppConfig, DeliveryConfig, DiscoveryConfig, FolderWatchConfig,
    FtpReceiveConfig, HistoryConfig, JobConfig, MonitorConfig, OutputConfig, PaperlessConfig,
    PaperlessMode, ScannerConfig, MAX_DURATION,
};
pub use error::{ConfigError, ConfigResult, ErrorKind};
pub use retry::RetryPolicy;
pub use types::{
    extension_for_mime, AdfState, ColorMode, DeviceState, Protocol, ScanRecord, ScanRequest,
    ScanResult, ScanSettings, ScanSource, ScannerDescriptor, ScannerId, ScannerStatus,
};
