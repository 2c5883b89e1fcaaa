//! OpenScanHub Discovery - finding scanners on the local network.
//!
//! # Features
//!
//! - **mDNS**: browses `_uscan._tcp` and reads the eSCL TXT record
//! - **WS-Discovery**: multicast Probe, ProbeMatch replies become WSD scanners
//! - **Capabilities**: multicast candidates without a source list are asked
//!   for their model and feeder before they are reported
//! - **Manual probe**: asks one host for eSCL, then WSD, capabilities
//! - **Aggregation**: all strategies run concurrently under one deadline and
//!   results are deduplicated on `(ip, port)`
//!
//! # Example
//!
//! ```rust,no_run
//! use openscan_core::JobConfig;
//! use openscan_discovery::{DiscoveryService, ManualProbeStrategy};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let timeout = Duration::from_secs(5);
//! let jobs = JobConfig::default();
//! let service = DiscoveryService::with_defaults(timeout, &jobs, ManualProbeStrategy::new(jobs.clone()));
//! for scanner in service.discover(timeout).await {
//!     println!("{} ({})", scanner.display_name, scanner.id());
//! }
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod error;
pub mod manual;
pub mod mdns;
pub mod service;
pub mod strategy;
pub mod wsd;

// Re-export commonly used types
pub use error::{DiscoveryError, Result};
pub use manual::{enrich, probe, ManualProbeStrategy};
pub use mdns::MdnsStrategy;
pub use service::DiscoveryService;
pub use strategy::{CandidateSink, DiscoveryStrategy};
pub use wsd::WsDiscoveryStrategy;
