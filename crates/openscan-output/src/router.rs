//! Routes a finished scan to disk, Paperless and the history.

use crate::error::{OutputError, Result};
use crate::history::ScanHistory;
use crate::naming::{DailySequence, FilenamePattern};
use crate::paperless::{DeliveryReceipt, PaperlessClient};
use crate::writer::write_atomic;
use chrono::NaiveDateTime;
use directories::UserDirs;
use openscan_core::{DeliveryConfig, OutputConfig, PaperlessConfig, ScanRecord, ScanResult};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

const MAX_NAME_ATTEMPTS: u32 = 1000;

/// What happened to a routed scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Where the scan was saved locally
    pub saved_path: PathBuf,
    /// Final filename in the output folder
    pub filename: String,
    /// Paperless receipt, `None` when delivery is disabled
    pub delivery: Option<DeliveryReceipt>,
}

/// Saves scans and hands them on to Paperless.
#[derive(Debug)]
pub struct OutputRouter {
    store: Arc<LocalStore>,
    paperless: Option<PaperlessClient>,
    history: Arc<ScanHistory>,
}

/// Blocking side of the local save: the folder and its naming state.
#[derive(Debug)]
struct LocalStore {
    folder: PathBuf,
    pattern: FilenamePattern,
    sequence: Mutex<DailySequence>,
}

impl OutputRouter {
    /// Build a router from the output and Paperless settings.
    ///
    /// # Errors
    /// Returns error if Paperless delivery is enabled but misconfigured.
    pub fn new(
        output: &OutputConfig,
        paperless: &PaperlessConfig,
        delivery: &DeliveryConfig,
        history: Arc<ScanHistory>,
    ) -> Result<Self> {
        let paperless = PaperlessClient::from_config(paperless, delivery.retry.clone())?;
        Ok(Self {
            store: Arc::new(LocalStore {
                folder: resolve_folder(&output.folder),
                pattern: FilenamePattern::new(&output.filename_pattern),
                sequence: Mutex::new(DailySequence::default()),
            }),
            paperless,
            history,
        })
    }

    /// Destination folder.
    #[must_use]
    pub fn folder(&self) -> &Path {
        &self.store.folder
    }

    /// Shared history this router appends to.
    #[must_use]
    pub fn history(&self) -> &Arc<ScanHistory> {
        &self.history
    }

    /// Paperless client, when delivery is enabled.
    #[must_use]
    pub fn paperless(&self) -> Option<&PaperlessClient> {
        self.paperless.as_ref()
    }

    /// Save, deliver and record one scan.
    ///
    /// A failed save is terminal and nothing is delivered or recorded. A
    /// failed delivery is reported as [`OutputError::Delivery`]; the local
    /// file stays and the history entry carries the delivery error.
    pub async fn route(&self, result: &ScanResult) -> Result<DeliveryReport> {
        let saved_path = self.save_local(result).await.map_err(|e| {
            error!(size = result.size_bytes, "saving scan failed: {e}");
            e
        })?;
        let filename = saved_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        info!(
            path = %saved_path.display(),
            size = result.size_bytes,
            auto = result.auto,
            "saved scan"
        );

        let delivery = match &self.paperless {
            Some(client) => Some(client.deliver(&saved_path, result).await),
            None => None,
        };
        let delivery_error = delivery.as_ref().and_then(|d| d.as_ref().err().cloned());

        self.history.push(ScanRecord {
            filename: filename.clone(),
            timestamp: result.timestamp,
            size_bytes: result.size_bytes,
            source_used: result.source_used,
            auto: result.auto,
            delivery_error,
        });

        match delivery {
            Some(Err(message)) => {
                warn!(path = %saved_path.display(), "Paperless delivery failed: {message}");
                Err(OutputError::Delivery {
                    saved_path,
                    message,
                })
            }
            Some(Ok(receipt)) => Ok(DeliveryReport {
                saved_path,
                filename,
                delivery: Some(receipt),
            }),
            None => Ok(DeliveryReport {
                saved_path,
                filename,
                delivery: None,
            }),
        }
    }

    /// Write the payload under a fresh templated name.
    ///
    /// Directory creation, sequence seeding and the synced write run on the
    /// blocking pool.
    pub async fn save_local(&self, result: &ScanResult) -> Result<PathBuf> {
        let store = Arc::clone(&self.store);
        let at = result.timestamp.naive_local();
        let ext = result.extension();
        let bytes = result.bytes.clone();
        tokio::task::spawn_blocking(move || store.save(at, &ext, &bytes))
            .await
            .map_err(|e| OutputError::write(&self.store.folder, io::Error::other(e)))?
    }
}

impl LocalStore {
    fn save(&self, at: NaiveDateTime, ext: &str, bytes: &[u8]) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.folder).map_err(|e| OutputError::write(&self.folder, e))?;

        if self.pattern.has_sequence() {
            for _ in 0..MAX_NAME_ATTEMPTS {
                let n = self
                    .sequence
                    .lock()
                    .expect("acquire sequence lock")
                    .next(at.date(), &self.folder, &self.pattern);
                let name = format!("{}{ext}", self.pattern.render(at, n));
                if let Some(path) = self.try_write(&name, bytes)? {
                    return Ok(path);
                }
            }
        } else {
            let stem = self.pattern.render(at, 0);
            for attempt in 1..=MAX_NAME_ATTEMPTS {
                let name = if attempt == 1 {
                    format!("{stem}{ext}")
                } else {
                    format!("{stem}_{attempt}{ext}")
                };
                if let Some(path) = self.try_write(&name, bytes)? {
                    return Ok(path);
                }
            }
        }

        Err(OutputError::write(
            &self.folder,
            io::Error::new(io::ErrorKind::AlreadyExists, "no free filename"),
        ))
    }

    /// `Ok(None)` when the name is taken.
    fn try_write(&self, name: &str, bytes: &[u8]) -> Result<Option<PathBuf>> {
        match write_atomic(&self.folder, name, bytes) {
            Ok(path) => Ok(Some(path)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(OutputError::write(self.folder.join(name), e)),
        }
    }
}

/// Output folder; blank means `~/Documents/OpenScanHub`.
fn resolve_folder(folder: &str) -> PathBuf {
    let folder = folder.trim();
    if !folder.is_empty() {
        return PathBuf::from(folder);
    }
    UserDirs::new()
        .and_then(|dirs| dirs.document_dir().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("OpenScanHub")
}
