//! Error types for hub operations.

use openscan_core::{ConfigError, ErrorKind};
use openscan_driver::DriverError;
use openscan_output::OutputError;
use serde::Serialize;
use thiserror::Error;

/// Errors returned by [`ScanHub`](crate::ScanHub) operations.
#[derive(Error, Debug)]
pub enum HubError {
    /// No scanner has been selected yet
    #[error("no active scanner configured")]
    NoActiveScanner,

    /// Driver-level failure during a scan or query
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// Saving or delivering a scan failed
    #[error(transparent)]
    Output(#[from] OutputError),

    /// Stored configuration could not be used
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Paperless connection check failed
    #[error("Paperless check failed: {0}")]
    Paperless(String),
}

impl HubError {
    /// Failure class of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoActiveScanner | Self::Config(_) => ErrorKind::DriverUnavailable,
            Self::Driver(e) => e.kind(),
            Self::Output(e) => e.kind(),
            Self::Paperless(_) => ErrorKind::DeliveryFailure,
        }
    }
}

/// Result type alias for hub operations.
pub type Result<T> = std::result::Result<T, HubError>;

/// Serializable failure for whatever front end drives the hub.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    /// Stable error code (e.g., "DRIVER_BUSY")
    pub code: String,
    /// Human-readable cause
    pub message: String,
    /// Optional context, such as where a scan was saved before delivery failed
    pub details: Option<serde_json::Value>,
}

impl From<&HubError> for ErrorReport {
    fn from(err: &HubError) -> Self {
        let details = match err {
            HubError::Output(OutputError::Delivery { saved_path, .. }) => Some(serde_json::json!({
                "saved_path": saved_path.display().to_string()
            })),
            _ => None,
        };
        Self {
            code: err.kind().code().to_string(),
            message: err.to_string(),
            details,
        }
    }
}

impl From<HubError> for ErrorReport {
    fn from(err: HubError) -> Self {
        Self::from(&err)
    }
}
