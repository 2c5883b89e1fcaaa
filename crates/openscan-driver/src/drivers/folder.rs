//! Folder-watch driver: a shared directory stands in for a scanner.
//!
//! Files dropped into the watched folder (for example by a scanner's
//! scan-to-SMB feature) become scan results once their size has been
//! observed unchanged across two consecutive polls.

use crate::driver::{DriverCapabilities, ScannerDriver};
use crate::error::{DriverError, Result};
use async_trait::async_trait;
use openscan_core::{
    AfterDelivery, FolderWatchConfig, ScanRequest, ScanResult, ScanSource, ScannerDescriptor,
    ScannerStatus, MAX_DURATION,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Subdirectory that archived files are moved into.
pub const ARCHIVE_DIR: &str = "processed";

/// A stable file picked up from the watched folder.
#[derive(Debug, Clone)]
pub struct DetectedFile {
    /// Where the file lives in the watched folder
    pub path: PathBuf,
    /// The file as a scan result
    pub result: ScanResult,
}

/// Size and modification time of a file at one poll.
type Signature = (u64, Option<SystemTime>);

#[derive(Debug, Default)]
struct WatchState {
    initialized: bool,
    /// Candidates with the size seen at the previous poll
    pending: HashMap<PathBuf, u64>,
    /// Files already handed out (or present at startup) and their signature
    seen: HashMap<PathBuf, Signature>,
    /// Handed-out files awaiting `complete_delivery`, by filename
    in_flight: HashMap<String, PathBuf>,
    /// Stable files detected but not yet handed out
    queued: VecDeque<DetectedFile>,
}

/// Driver that polls a directory for new files.
#[derive(Debug)]
pub struct FolderWatchDriver {
    descriptor: ScannerDescriptor,
    root: PathBuf,
    extensions: Vec<String>,
    poll_interval: Duration,
    job_timeout: Duration,
    after_delivery: AfterDelivery,
    state: Mutex<WatchState>,
}

impl FolderWatchDriver {
    /// Create a watcher for the folder named by the descriptor.
    #[must_use]
    pub fn new(descriptor: ScannerDescriptor, config: &FolderWatchConfig, job_timeout: Duration) -> Self {
        let root = PathBuf::from(&descriptor.ip);
        let extensions = config
            .extensions
            .iter()
            .map(|e| format!(".{}", e.trim().trim_start_matches('.').to_ascii_lowercase()))
            .collect();
        Self {
            descriptor,
            root,
            extensions,
            poll_interval: config.poll_interval(),
            job_timeout,
            after_delivery: config.after_delivery,
            state: Mutex::new(WatchState::default()),
        }
    }

    /// Create a watcher directly from the folder-watch configuration.
    #[must_use]
    pub fn from_config(config: &FolderWatchConfig, job_timeout: Duration) -> Self {
        Self::new(ScannerDescriptor::folder(&config.watch_folder), config, job_timeout)
    }

    /// Treat files already in the folder as new instead of as a baseline.
    #[must_use]
    pub fn including_existing(mut self) -> Self {
        self.state.get_mut().initialized = true;
        self
    }

    /// Watched directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Poll period.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Run one poll and return every file that became stable, marked `auto`.
    ///
    /// Unless built with [`including_existing`](Self::including_existing),
    /// the first poll only records what is already in the folder.
    ///
    /// # Errors
    /// Returns error if the folder cannot be listed or a file cannot be read.
    pub async fn poll(&self) -> Result<Vec<DetectedFile>> {
        let mut state = self.state.lock().await;
        self.poll_locked(&mut state, true).await?;
        Ok(state.queued.drain(..).collect())
    }

    fn accepts(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        if name.starts_with('.') {
            return false;
        }
        let lower = name.to_ascii_lowercase();
        self.extensions.iter().any(|ext| lower.ends_with(ext.as_str()))
    }

    async fn list(&self) -> Result<Vec<(PathBuf, Signature)>> {
        let root = self.root.display().to_string();
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| DriverError::io(&root, e))?;
        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| DriverError::io(&root, e))?
        {
            let path = entry.path();
            if !self.accepts(&path) {
                continue;
            }
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if meta.is_file() {
                files.push((path, (meta.len(), meta.modified().ok())));
            }
        }
        Ok(files)
    }

    async fn poll_locked(&self, state: &mut WatchState, auto: bool) -> Result<()> {
        let files = self.list().await?;

        if !state.initialized {
            state.seen = files.into_iter().collect();
            state.initialized = true;
            debug!(folder = %self.root.display(), existing = state.seen.len(), "folder watch baseline taken");
            return Ok(());
        }

        let present: HashSet<&PathBuf> = files.iter().map(|(p, _)| p).collect();
        state.pending.retain(|p, _| present.contains(p));
        state.seen.retain(|p, _| present.contains(p));

        let mut stable = Vec::new();
        for (path, signature) in &files {
            if state.seen.get(path) == Some(signature) {
                continue;
            }
            let size = signature.0;
            match state.pending.insert(path.clone(), size) {
                Some(previous) if previous == size && size > 0 => stable.push((path.clone(), *signature)),
                _ => {}
            }
        }

        for (path, signature) in stable {
            state.pending.remove(&path);
            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(file = %path.display(), "cannot read stable file, retrying next poll: {e}");
                    continue;
                }
            };
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let result = ScanResult::new(
                filename.clone(),
                mime_for_path(&path),
                ScanSource::Platen,
                auto,
                bytes,
            );
            info!(file = %path.display(), bytes = result.size_bytes, "new file in watched folder");
            state.seen.insert(path.clone(), signature);
            state.in_flight.insert(filename, path.clone());
            state.queued.push_back(DetectedFile { path, result });
        }
        Ok(())
    }

    async fn archive(&self, path: &Path) -> Result<PathBuf> {
        let dir = self.root.join(ARCHIVE_DIR);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| DriverError::io(dir.display().to_string(), e))?;
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let (stem, ext) = match name.rsplit_once('.') {
            Some((stem, ext)) => (stem.to_string(), format!(".{ext}")),
            None => (name.clone(), String::new()),
        };
        let mut destination = dir.join(&name);
        let mut n = 2;
        while tokio::fs::try_exists(&destination).await.unwrap_or(false) {
            destination = dir.join(format!("{stem}_{n}{ext}"));
            n += 1;
        }
        tokio::fs::rename(path, &destination)
            .await
            .map_err(|e| DriverError::io(path.display().to_string(), e))?;
        Ok(destination)
    }
}

#[async_trait]
impl ScannerDriver for FolderWatchDriver {
    fn descriptor(&self) -> &ScannerDescriptor {
        &self.descriptor
    }

    async fn capabilities(&self) -> Result<DriverCapabilities> {
        Ok(DriverCapabilities::platen_only(
            self.descriptor.display_name.clone(),
            self.descriptor.model.clone(),
        ))
    }

    async fn status(&self) -> Result<ScannerStatus> {
        Ok(ScannerStatus::idle())
    }

    /// Wait for the next stable file, bounded by the job timeout.
    async fn scan(&self, request: ScanRequest) -> Result<ScanResult> {
        let started = Instant::now();
        let deadline = started
            .checked_add(self.job_timeout)
            .unwrap_or(started + MAX_DURATION);
        loop {
            {
                let mut state = self.state.lock().await;
                if state.queued.is_empty() {
                    self.poll_locked(&mut state, request.auto).await?;
                }
                if let Some(found) = state.queued.pop_front() {
                    return Ok(found.result);
                }
            }
            if Instant::now().checked_add(self.poll_interval).map_or(true, |next| next > deadline) {
                return Err(DriverError::JobTimeout {
                    target: self.descriptor.id().to_string(),
                    waited: started.elapsed(),
                    message: format!("no new file appeared in {}", self.root.display()),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn complete_delivery(&self, result: &ScanResult) -> Result<()> {
        let path = {
            let mut state = self.state.lock().await;
            match state.in_flight.remove(&result.filename) {
                Some(path) => {
                    if self.after_delivery != AfterDelivery::Keep {
                        state.seen.remove(&path);
                    }
                    path
                }
                None => return Ok(()),
            }
        };

        match self.after_delivery {
            AfterDelivery::Keep => {}
            AfterDelivery::Delete => {
                tokio::fs::remove_file(&path)
                    .await
                    .map_err(|e| DriverError::io(path.display().to_string(), e))?;
                debug!(file = %path.display(), "deleted delivered file");
            }
            AfterDelivery::Archive => {
                let destination = self.archive(&path).await?;
                debug!(file = %path.display(), to = %destination.display(), "archived delivered file");
            }
        }
        Ok(())
    }

    /// Offer a file again after its save failed.
    ///
    /// The file is queued as already sized once, so the next poll hands it
    /// out again if it has not changed.
    async fn abandon_delivery(&self, result: &ScanResult) {
        let mut state = self.state.lock().await;
        let Some(path) = state.in_flight.remove(&result.filename) else {
            return;
        };
        state.seen.remove(&path);
        state.pending.insert(path.clone(), result.size_bytes);
        debug!(file = %path.display(), "delivery abandoned, file will be retried");
    }
}

/// MIME type for a watched file, by extension.
#[must_use]
pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "tif" | "tiff" => "image/tiff",
        _ => "application/octet-stream",
    }
}
