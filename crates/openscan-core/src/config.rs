//! Configuration management for OpenScanHub.
//!
//! The persisted record is a JSON file (`openscan.json`) in the platform
//! config directory, overridable with `OPENSCAN_CONFIG_DIR`. Missing files
//! and missing sections fall back to defaults.

use crate::error::{ConfigError, ConfigResult};
use crate::retry::RetryPolicy;
use crate::types::{Protocol, ScannerDescriptor, ScanSource};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides the config directory.
pub const CONFIG_DIR_ENV: &str = "OPENSCAN_CONFIG_DIR";

const CONFIG_FILE_NAME: &str = "openscan.json";

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Whether the setup wizard has been completed
    pub wizard_completed: bool,
    /// The selected scanner
    pub scanner: ScannerConfig,
    /// Local output folder and naming
    pub output: OutputConfig,
    /// Paperless-NGX delivery
    pub paperless: PaperlessConfig,
    /// ADF auto-scan monitor
    pub monitor: MonitorConfig,
    /// Shared folder watcher
    pub folder_watch: FolderWatchConfig,
    /// Built-in Scan-to-FTP receiver
    pub ftp_receive: FtpReceiveConfig,
    /// Network discovery
    pub discovery: DiscoveryConfig,
    /// Scan job polling
    pub jobs: JobConfig,
    /// Paperless upload retries
    pub delivery: DeliveryConfig,
    /// Dashboard history
    pub history: HistoryConfig,
}

impl AppConfig {
    /// Load configuration from the default location, falling back to defaults.
    pub fn load() -> ConfigResult<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from an explicit path, falling back to defaults.
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        if path.exists() {
            tracing::debug!("Loading config from {}", path.display());
            let contents = fs::read_to_string(path)?;
            let config = serde_json::from_str(&contents)?;
            Ok(config)
        } else {
            tracing::debug!("Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load configuration with environment variable overrides.
    ///
    /// Supports the following environment variables:
    /// - `OPENSCAN_OUTPUT_FOLDER`: Override the output folder
    /// - `OPENSCAN_MONITOR_ENABLED`: Override monitor enabled status (true/false)
    pub fn load_with_env() -> ConfigResult<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("OPENSCAN_OUTPUT_FOLDER") {
            if !val.is_empty() {
                tracing::debug!("Override output.folder from env: {}", val);
                self.output.folder = val;
            }
        }

        if let Ok(val) = std::env::var("OPENSCAN_MONITOR_ENABLED") {
            if let Ok(enabled) = val.parse() {
                self.monitor.enabled = enabled;
                tracing::debug!("Override monitor.enabled from env: {}", enabled);
            }
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> ConfigResult<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to an explicit path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> ConfigResult<()> {
        let config_dir = path.parent().ok_or_else(|| ConfigError::InvalidValue {
            field: "config_path".to_string(),
            reason: "no parent directory".to_string(),
        })?;

        fs::create_dir_all(config_dir)?;
        tracing::debug!("Saving config to {}", path.display());

        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Path of the configuration file.
    pub fn config_path() -> ConfigResult<PathBuf> {
        if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
            if !dir.is_empty() {
                return Ok(PathBuf::from(dir).join(CONFIG_FILE_NAME));
            }
        }
        let dirs =
            ProjectDirs::from("org", "openscanhub", "openscan").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    /// Descriptor for the configured scanner, if one is selected.
    ///
    /// # Errors
    /// Returns error if the stored protocol tag is unknown.
    pub fn active_descriptor(&self) -> ConfigResult<Option<ScannerDescriptor>> {
        self.scanner.descriptor()
    }
}

/// The selected scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Address (or folder path for the folder protocol)
    pub ip: String,
    /// HTTP port
    pub port: u16,
    /// `escl`, `wsd` or `folder`
    pub protocol: String,
    /// Display name
    pub name: String,
    /// Make and model
    pub model: String,
    /// Whether the device has a feeder
    pub has_feeder: bool,
    /// eSCL root or WSD endpoint path
    pub service_path: String,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            ip: String::new(),
            port: 0,
            protocol: "escl".to_string(),
            name: String::new(),
            model: String::new(),
            has_feeder: false,
            service_path: String::new(),
        }
    }
}

impl ScannerConfig {
    /// Build the descriptor this section describes.
    pub fn descriptor(&self) -> ConfigResult<Option<ScannerDescriptor>> {
        if self.ip.trim().is_empty() {
            return Ok(None);
        }
        let protocol: Protocol = self.protocol.parse()?;
        let mut descriptor = match protocol {
            Protocol::Folder => ScannerDescriptor::folder(self.ip.trim()),
            _ => {
                if self.port == 0 {
                    return Err(ConfigError::InvalidValue {
                        field: "scanner.port".to_string(),
                        reason: "must be non-zero for network scanners".to_string(),
                    });
                }
                ScannerDescriptor::new(self.ip.trim(), self.port, protocol)
            }
        };
        if !self.name.is_empty() {
            descriptor = descriptor.with_display_name(&self.name);
        }
        if !self.model.is_empty() {
            descriptor = descriptor.with_model(&self.model);
        }
        if self.has_feeder && protocol != Protocol::Folder {
            descriptor = descriptor.with_sources([ScanSource::Platen, ScanSource::Feeder]);
        }
        Ok(Some(descriptor.with_service_path(&self.service_path)))
    }

    /// Section content for a descriptor selected during setup.
    #[must_use]
    pub fn from_descriptor(descriptor: &ScannerDescriptor) -> Self {
        Self {
            ip: descriptor.ip.clone(),
            port: descriptor.port,
            protocol: descriptor.protocol.as_str().to_string(),
            name: descriptor.display_name.clone(),
            model: descriptor.model.clone(),
            has_feeder: descriptor.has_feeder(),
            service_path: descriptor.service_path.clone().unwrap_or_default(),
        }
    }
}

/// Local output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Destination folder
    pub folder: String,
    /// Filename pattern with `{date}`, `{time}` and `{n}` tokens
    pub filename_pattern: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            folder: String::new(),
            filename_pattern: "scan_{date}_{time}_{n}".to_string(),
        }
    }
}

/// How scans reach Paperless-NGX.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaperlessMode {
    /// Copy into the consume folder
    #[default]
    Consume,
    /// Upload through the REST API
    Api,
}

/// Paperless-NGX delivery settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaperlessConfig {
    /// Whether delivery is enabled
    pub enabled: bool,
    /// Delivery mode
    pub mode: PaperlessMode,
    /// Consume folder for [`PaperlessMode::Consume`]
    pub consume_folder: String,
    /// Base URL for [`PaperlessMode::Api`]
    pub api_url: String,
    /// API token (never logged)
    pub api_token: String,
    /// Tags attached to uploaded documents
    pub default_tags: Vec<String>,
}

/// ADF auto-scan monitor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Whether the monitor runs
    pub enabled: bool,
    /// Poll period in seconds
    pub interval_seconds: f64,
    /// Delay before re-checking a freshly loaded feeder, in seconds
    pub settle_seconds: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_seconds: 2.0,
            settle_seconds: 1.0,
        }
    }
}

impl MonitorConfig {
    /// Poll period, never below 100 ms.
    #[must_use]
    pub fn interval(&self) -> Duration {
        seconds(self.interval_seconds, Duration::from_millis(100))
    }

    /// Settle delay.
    #[must_use]
    pub fn settle(&self) -> Duration {
        seconds(self.settle_seconds, Duration::ZERO)
    }
}

/// What happens to a watched file once it has been delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AfterDelivery {
    /// Leave the file in place
    Keep,
    /// Delete the file
    #[default]
    Delete,
    /// Move the file into `processed/` under the watch folder
    Archive,
}

/// Folder watcher settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FolderWatchConfig {
    /// Whether the watcher runs
    pub enabled: bool,
    /// Directory to poll
    pub watch_folder: String,
    /// Accepted extensions, lowercase with leading dot
    pub extensions: Vec<String>,
    /// Poll period in seconds
    pub poll_interval_seconds: f64,
    /// Post-delivery action on the original file
    pub after_delivery: AfterDelivery,
}

impl Default for FolderWatchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            watch_folder: String::new(),
            extensions: [".pdf", ".jpg", ".jpeg", ".png", ".tiff", ".tif"]
                .iter()
                .map(ToString::to_string)
                .collect(),
            poll_interval_seconds: 5.0,
            after_delivery: AfterDelivery::Delete,
        }
    }
}

impl FolderWatchConfig {
    /// Poll period, never below 50 ms.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        seconds(self.poll_interval_seconds, Duration::from_millis(50))
    }
}

/// Scan-to-FTP receiver settings.
///
/// Scanners push files to a small FTP server; each upload lands in the
/// staging folder and is routed like a watched-folder file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FtpReceiveConfig {
    /// Whether the receiver runs
    pub enabled: bool,
    /// Control connection port
    pub port: u16,
    /// Login name; blank together with `password` allows anonymous logins
    pub username: String,
    /// Login password
    pub password: String,
    /// Where uploads are staged; blank means the platform data directory
    pub staging_dir: String,
    /// Delete the staged file once it has been saved
    pub delete_after_routing: bool,
    /// First port offered for passive data connections; 0 picks any free port
    pub passive_port_start: u16,
    /// Last port offered for passive data connections
    pub passive_port_end: u16,
}

impl Default for FtpReceiveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 2121,
            username: "scan".to_string(),
            password: "scan".to_string(),
            staging_dir: String::new(),
            delete_after_routing: true,
            passive_port_start: 60_000,
            passive_port_end: 60_099,
        }
    }
}

impl FtpReceiveConfig {
    /// Credentials required to log in, `None` for anonymous access.
    #[must_use]
    pub fn credentials(&self) -> Option<(&str, &str)> {
        if self.username.is_empty() || self.password.is_empty() {
            None
        } else {
            Some((&self.username, &self.password))
        }
    }

    /// Staging directory with the blank default resolved.
    #[must_use]
    pub fn staging_path(&self) -> PathBuf {
        let dir = self.staging_dir.trim();
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
        ProjectDirs::from("org", "openscanhub", "openscan")
            .map_or_else(std::env::temp_dir, |dirs| dirs.data_dir().to_path_buf())
            .join("ftp-staging")
    }

    /// Folder-watch settings that deliver what lands in the staging folder.
    #[must_use]
    pub fn staging_watch(&self) -> FolderWatchConfig {
        FolderWatchConfig {
            enabled: self.enabled,
            watch_folder: self.staging_path().display().to_string(),
            poll_interval_seconds: 1.0,
            after_delivery: if self.delete_after_routing {
                AfterDelivery::Delete
            } else {
                AfterDelivery::Keep
            },
            ..FolderWatchConfig::default()
        }
    }
}

/// Discovery settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Overall discovery timeout in seconds
    pub timeout_seconds: f64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 5.0,
        }
    }
}

impl DiscoveryConfig {
    /// Overall timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        seconds(self.timeout_seconds, Duration::from_millis(100))
    }
}

/// Scan job polling settings shared by the network drivers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Interval between job status polls, in milliseconds
    pub poll_interval_ms: u64,
    /// Bound on a whole scan job, in seconds
    pub timeout_seconds: u64,
    /// Per-request HTTP timeout, in seconds
    pub request_timeout_seconds: u64,
    /// Retries for transient HTTP errors while a job runs
    pub retry: RetryPolicy,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            timeout_seconds: 60,
            request_timeout_seconds: 30,
            retry: RetryPolicy::default(),
        }
    }
}

impl JobConfig {
    /// Poll interval.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }

    /// Whole-job bound.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.max(1)).min(MAX_DURATION)
    }

    /// Per-request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds.max(1)).min(MAX_DURATION)
    }
}

/// Paperless upload retry settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Retry policy for transient upload failures
    pub retry: RetryPolicy,
}

/// Dashboard history settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Most recent entries kept
    pub limit: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { limit: 100 }
    }
}

/// Upper bound for every configured interval and timeout.
pub const MAX_DURATION: Duration = Duration::from_secs(86_400);

/// Seconds from a user-edited value, clamped to `[floor, MAX_DURATION]`.
fn seconds(value: f64, floor: Duration) -> Duration {
    if !(value.is_finite() && value > 0.0) {
        return floor;
    }
    Duration::try_from_secs_f64(value)
        .unwrap_or(MAX_DURATION)
        .clamp(floor, MAX_DURATION)
}
