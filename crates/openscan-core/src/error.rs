//! Core error types for OpenScanHub.
//!
//! [`ErrorKind`] is the failure taxonomy every subsystem error maps onto.
//! The kind tells callers *what class* of failure happened; the error's
//! `Display` text carries the human-readable cause.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Failure classes reported across the scanner integration layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Connection refused, DNS failure or timeout at transport level
    NetworkError,
    /// Malformed or semantically invalid device response
    ProtocolError,
    /// Device unreachable when fetching capabilities
    DriverUnavailable,
    /// A scan is already running on this driver
    DriverBusy,
    /// Scan job did not finish within its bound
    JobTimeout,
    /// Local persistence failed
    WriteFailure,
    /// Paperless delivery failed after retries
    DeliveryFailure,
    /// Probe or discovery found nothing
    NotFound,
}

impl ErrorKind {
    /// Stable code for UI consumers.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NetworkError => "NETWORK_ERROR",
            Self::ProtocolError => "PROTOCOL_ERROR",
            Self::DriverUnavailable => "DRIVER_UNAVAILABLE",
            Self::DriverBusy => "DRIVER_BUSY",
            Self::JobTimeout => "JOB_TIMEOUT",
            Self::WriteFailure => "WRITE_FAILURE",
            Self::DeliveryFailure => "DELIVERY_FAILURE",
            Self::NotFound => "NOT_FOUND",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to determine config directory path
    #[error("could not determine config directory (platform base directories not available)")]
    NoConfigDir,

    /// Failed to parse or serialize the JSON record
    #[error("failed to parse config JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error reading/writing config
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration value
    #[error("invalid config value for {field}: {reason}")]
    InvalidValue {
        /// Field name
        field: String,
        /// Reason for invalidity
        reason: String,
    },
}

/// Result type alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConfigError::InvalidValue {
            field: "scanner.port".to_string(),
            reason: "must be non-zero".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid config value for scanner.port: must be non-zero"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let err: ConfigError = io_err.into();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_kind_codes() {
        assert_eq!(ErrorKind::DriverBusy.to_string(), "DRIVER_BUSY");
        assert_eq!(ErrorKind::DeliveryFailure.code(), "DELIVERY_FAILURE");
    }
}
