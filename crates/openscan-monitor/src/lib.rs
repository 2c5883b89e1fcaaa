//! OpenScanHub Monitor - background polling loops.
//!
//! # Features
//!
//! - **ADF monitor**: scans from the feeder as soon as paper is loaded, once
//!   per load, and routes the result as an automatic scan
//! - **Folder watch**: routes files that land in a shared folder
//! - **FTP receive**: serves Scan-to-FTP uploads and routes them through a
//!   folder watch on the staging folder
//!
//! The polling loops run on a fixed interval, never overlap a cycle with itself and
//! stop through the [`MonitorHandle`] returned by `spawn`.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod adf;
pub mod folder;
pub mod ftp;
pub mod handle;
pub mod state;

// Re-export commonly used types
pub use adf::{AdfMonitor, TickOutcome};
pub use folder::FolderWatchTask;
pub use ftp::FtpReceiveTask;
pub use handle::MonitorHandle;
pub use state::MonitorState;
