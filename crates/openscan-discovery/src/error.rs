//! Error types for scanner discovery.

use openscan_core::ErrorKind;
use openscan_driver::DriverError;
use thiserror::Error;

/// Errors a single discovery strategy can report.
///
/// These never fail a whole discovery run; the strategy that hit one simply
/// contributes nothing.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// mDNS daemon could not be started or queried
    #[error("mDNS browse failed: {0}")]
    Mdns(String),

    /// Socket-level failure
    #[error("discovery socket error: {0}")]
    Io(#[from] std::io::Error),

    /// Driver construction failed during a probe
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// Strategy task ended abnormally
    #[error("discovery task failed: {0}")]
    Task(String),
}

impl DiscoveryError {
    /// Failure class of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Driver(e) => e.kind(),
            Self::Mdns(_) | Self::Io(_) | Self::Task(_) => ErrorKind::NetworkError,
        }
    }
}

impl From<mdns_sd::Error> for DiscoveryError {
    fn from(err: mdns_sd::Error) -> Self {
        Self::Mdns(err.to_string())
    }
}

/// Result type alias for discovery operations.
pub type Result<T> = std::result::Result<T, DiscoveryError>;
