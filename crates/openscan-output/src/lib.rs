//! OpenScanHub Output - where finished scans go.
//!
//! Every scan is first written to the local output folder under a templated
//! name, atomically. When Paperless-NGX delivery is enabled the saved file is
//! then dropped into the consume folder or uploaded through the REST API.
//! A failed delivery never removes the local copy.
//!
//! # Modules
//!
//! - [`naming`] - `{date}`, `{time}` and `{n}` filename patterns
//! - [`writer`] - temp-name-then-rename writes
//! - [`paperless`] - consume-folder and API delivery with retries
//! - [`history`] - bounded in-memory history
//! - [`router`] - the pipeline tying them together
//!
//! # Example
//!
//! ```rust,no_run
//! use openscan_core::{AppConfig, ScanResult, ScanSource};
//! use openscan_output::{OutputRouter, ScanHistory};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::default();
//! let router = OutputRouter::new(
//!     &config.output,
//!     &config.paperless,
//!     &config.delivery,
//!     Arc::new(ScanHistory::new(config.history.limit)),
//! )?;
//!
//! let scan = ScanResult::new("scan.pdf", "application/pdf", ScanSource::Platen, false, b"%PDF".to_vec());
//! let report = router.route(&scan).await?;
//! println!("saved to {}", report.saved_path.display());
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
pub mod history;
pub mod naming;
pub mod paperless;
pub mod router;
pub mod writer;

// Re-export commonly used types
pub use error::{OutputError, Result};
pub use history::ScanHistory;
pub use naming::FilenamePattern;
pub use paperless::{DeliveryReceipt, PaperlessClient};
pub use router::{DeliveryReport, OutputRouter};
pub use writer::write_atomic;
