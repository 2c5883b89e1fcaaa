//! OpenScanHub - network scanner hub.
//!
//! [`ScanHub`] is the single entry point a front end drives. It owns the
//! driver registry, the output pipeline and the background tasks, and
//! exposes the operations behind the dashboard and setup wizard.
//!
//! # Operations
//!
//! - [`ScanHub::discover`] / [`ScanHub::probe`] - find scanners
//! - [`ScanHub::status`] - active scanner status, `Offline` on failure
//! - [`ScanHub::scan`] - manual scan, saved and delivered
//! - [`ScanHub::test_scan`] - scan with a candidate, nothing saved
//! - [`ScanHub::history`] - recent scans
//! - [`ScanHub::reconfigure`] - swap scanner and settings, restart the monitor
//! - [`ScanHub::reconfigure_folder_watch`] / [`ScanHub::reconfigure_ftp_receive`] -
//!   restart the folder watcher or the Scan-to-FTP receiver
//!
//! # Example
//!
//! ```rust,no_run
//! use openscan_core::{AppConfig, ScanSource};
//! use openscan_hub::ScanHub;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::load_with_env()?;
//! let hub = ScanHub::start(&config).await?;
//!
//! let outcome = hub.scan(ScanSource::Feeder).await?;
//! println!("saved {}", outcome.report.saved_path.display());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod error;
pub mod hub;

// Re-export commonly used types
pub use error::{ErrorReport, HubError, Result};
pub use hub::{Reconfiguration, ScanHub, ScanOutcome};
