//! OpenScanHub Driver - protocol-polymorphic scanner access.
//!
//! This crate provides the [`ScannerDriver`] contract and its three
//! implementations, plus the registry that turns a protocol tag into a live
//! driver instance.
//!
//! # Features
//!
//! - **eSCL**: AirScan-compatible devices over HTTP/XML
//! - **WSD**: WS-Scan devices over SOAP, located with WS-Discovery
//! - **Folder watch**: a shared directory polled for finished files
//! - **Scan-to-FTP**: [`FtpReceiver`] accepts pushed uploads into a staging
//!   folder that a folder watcher delivers from
//! - **Exclusive scans**: [`DriverHandle`] rejects overlapping scans with
//!   [`DriverError::Busy`]
//!
//! # Example
//!
//! ```rust,no_run
//! use openscan_core::{Protocol, ScanRequest, ScanSource, ScannerDescriptor};
//! use openscan_driver::{DriverRegistry, DriverSettings};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = DriverRegistry::with_default_drivers(DriverSettings::default());
//! let scanner = ScannerDescriptor::new("192.168.1.50", 80, Protocol::Escl);
//!
//! let driver = registry.activate(&scanner)?;
//! let result = driver.scan(ScanRequest::new(ScanSource::Platen)).await?;
//! println!("scanned {} bytes", result.size_bytes);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod driver;
pub mod drivers;
pub mod error;
pub mod http;
pub mod registry;
pub mod ws_discovery;
pub mod xml;

// Re-export commonly used types
pub use driver::{DriverCapabilities, ScannerDriver};
pub use drivers::{DetectedFile, EsclDriver, FolderWatchDriver, FtpReceiver, WsdDriver};
pub use error::{DriverError, Result};
pub use registry::{driver_factory, DriverFactory, DriverHandle, DriverRegistry, DriverSettings};
pub use ws_discovery::ProbeMatch;
