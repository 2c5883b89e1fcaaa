//! Error types for the driver subsystem.

use openscan_core::{ConfigError, ErrorKind};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while talking to a scanner.
#[derive(Error, Debug)]
pub enum DriverError {
    /// Connection refused, DNS failure or request timeout
    #[error("network error talking to {target}: {message}")]
    Network {
        /// Device or URL addressed
        target: String,
        /// Error message
        message: String,
    },

    /// Malformed, unexpected or faulted device response
    #[error("protocol error from {target}: {message}")]
    Protocol {
        /// Device or URL addressed
        target: String,
        /// Error message
        message: String,
    },

    /// Device unreachable when asked for its capabilities
    #[error("scanner {target} unavailable: {message}")]
    Unavailable {
        /// Device addressed
        target: String,
        /// Error message
        message: String,
    },

    /// A scan is already running on this driver instance
    #[error("scanner {target} is busy with another scan")]
    Busy {
        /// Device addressed
        target: String,
    },

    /// The job did not finish within its bound
    #[error("scan job on {target} did not complete within {waited:?}: {message}")]
    JobTimeout {
        /// Device addressed
        target: String,
        /// Time spent before giving up
        waited: Duration,
        /// Last observed problem
        message: String,
    },

    /// No driver registered for a protocol
    #[error("no driver registered for protocol {protocol}")]
    UnsupportedProtocol {
        /// Protocol tag
        protocol: String,
    },

    /// File system error on a watched folder
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path involved
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Invalid scanner configuration
    #[error("invalid scanner configuration: {0}")]
    Config(#[from] ConfigError),
}

impl DriverError {
    /// Failure class of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network { .. } | Self::Io { .. } => ErrorKind::NetworkError,
            Self::Protocol { .. } => ErrorKind::ProtocolError,
            Self::Unavailable { .. } | Self::UnsupportedProtocol { .. } | Self::Config(_) => {
                ErrorKind::DriverUnavailable
            }
            Self::Busy { .. } => ErrorKind::DriverBusy,
            Self::JobTimeout { .. } => ErrorKind::JobTimeout,
        }
    }

    pub(crate) fn protocol(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Protocol {
            target: target.into(),
            message: message.into(),
        }
    }

    pub(crate) fn network(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Network {
            target: target.into(),
            message: message.into(),
        }
    }

    pub(crate) fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for driver operations.
pub type Result<T> = std::result::Result<T, DriverError>;
