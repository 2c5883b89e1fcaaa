//! Error types for output routing.

use openscan_core::ErrorKind;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while saving or delivering a scan.
#[derive(Error, Debug)]
pub enum OutputError {
    /// The local save failed; nothing was delivered.
    #[error("failed to write {}: {source}", path.display())]
    Write {
        /// Destination that could not be written
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The local save succeeded but Paperless delivery did not.
    #[error("saved to {} but Paperless delivery failed: {message}", saved_path.display())]
    Delivery {
        /// Local file, still present
        saved_path: PathBuf,
        /// Cause of the last failed attempt
        message: String,
    },

    /// Paperless settings are unusable
    #[error("invalid Paperless configuration: {0}")]
    Config(String),
}

impl OutputError {
    /// Failure class of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Write { .. } => ErrorKind::WriteFailure,
            Self::Delivery { .. } | Self::Config(_) => ErrorKind::DeliveryFailure,
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for output operations.
pub type Result<T> = std::result::Result<T, OutputError>;
