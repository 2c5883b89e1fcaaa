//! Shared types used across the OpenScanHub crates.
//!
//! This module defines the scanner-facing data model: descriptors produced by
//! discovery, transient status snapshots, scan requests and scan results.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// Transport a scanner is reached through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// eSCL / AirScan over HTTP+XML
    Escl,
    /// WS-Scan over SOAP, located through WS-Discovery
    Wsd,
    /// Shared folder polled for new files
    Folder,
}

impl Protocol {
    /// Lowercase wire/config name of the protocol.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Escl => "escl",
            Self::Wsd => "wsd",
            Self::Folder => "folder",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "escl" | "airscan" => Ok(Self::Escl),
            "wsd" | "ws-scan" => Ok(Self::Wsd),
            "folder" => Ok(Self::Folder),
            other => Err(ConfigError::InvalidValue {
                field: "protocol".to_string(),
                reason: format!("unknown scanner protocol '{other}'"),
            }),
        }
    }
}

/// Physical input a scan is taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ScanSource {
    /// Flatbed glass
    Platen,
    /// Automatic document feeder
    Feeder,
}

impl ScanSource {
    /// eSCL `InputSource` value. Feeder is `Feeder`, never `Adf`.
    #[must_use]
    pub fn escl_name(&self) -> &'static str {
        match self {
            Self::Platen => "Platen",
            Self::Feeder => "Feeder",
        }
    }

    /// WS-Scan `InputSource` value.
    #[must_use]
    pub fn wsd_name(&self) -> &'static str {
        match self {
            Self::Platen => "Platen",
            Self::Feeder => "ADF",
        }
    }
}

impl fmt::Display for ScanSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.escl_name())
    }
}

/// Stable identifier of a scanner, derived from `(ip, port, protocol)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScannerId(String);

impl ScannerId {
    /// Derive the identifier for an address and protocol.
    #[must_use]
    pub fn derive(ip: &str, port: u16, protocol: Protocol) -> Self {
        Self(format!(
            "{}://{}:{}",
            protocol.as_str(),
            ip.trim().to_ascii_lowercase(),
            port
        ))
    }

    /// Get the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScannerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A reachable scanning device (or watched folder).
///
/// Descriptors are immutable once built. Re-probing a device yields a fresh
/// descriptor with the same [`ScannerId`], which replaces the old one.
///
/// For [`Protocol::Folder`] the `ip` field carries the watched directory path
/// and `port` is zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannerDescriptor {
    id: ScannerId,
    /// Human-facing name
    pub display_name: String,
    /// Host address (or folder path for folder watchers)
    pub ip: String,
    /// TCP port of the device's HTTP service
    pub port: u16,
    /// Transport used to talk to the device
    pub protocol: Protocol,
    /// Make and model, empty when unknown
    pub model: String,
    /// Input sources the device offers
    pub sources: BTreeSet<ScanSource>,
    /// Service path on the device (eSCL root or WSD endpoint path)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_path: Option<String>,
}

impl ScannerDescriptor {
    /// Create a descriptor; the id is derived from address and protocol.
    #[must_use]
    pub fn new(ip: impl Into<String>, port: u16, protocol: Protocol) -> Self {
        let ip = ip.into();
        Self {
            id: ScannerId::derive(&ip, port, protocol),
            display_name: format!("Scanner at {ip}"),
            ip,
            port,
            protocol,
            model: String::new(),
            sources: BTreeSet::from([ScanSource::Platen]),
            service_path: None,
        }
    }

    /// Descriptor for a watched folder.
    #[must_use]
    pub fn folder(path: impl Into<String>) -> Self {
        let path = path.into();
        let mut descriptor = Self::new(path.clone(), 0, Protocol::Folder);
        descriptor.display_name = format!("Folder {path}");
        descriptor.model = "Folder watcher".to_string();
        descriptor
    }

    /// Set the display name.
    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    /// Set the model string.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Replace the source set. An empty set means platen-only.
    #[must_use]
    pub fn with_sources(mut self, sources: impl IntoIterator<Item = ScanSource>) -> Self {
        self.sources = sources.into_iter().collect();
        if self.sources.is_empty() {
            self.sources.insert(ScanSource::Platen);
        }
        self
    }

    /// Set the service path (eSCL root or WSD endpoint path).
    #[must_use]
    pub fn with_service_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.service_path = if path.is_empty() { None } else { Some(path) };
        self
    }

    /// Unique identifier.
    #[must_use]
    pub fn id(&self) -> &ScannerId {
        &self.id
    }

    /// `http://ip:port` base URL of the device.
    #[must_use]
    pub fn base_url(&self) -> String {
        if self.ip.contains(':') && !self.ip.starts_with('[') {
            format!("http://[{}]:{}", self.ip, self.port)
        } else {
            format!("http://{}:{}", self.ip, self.port)
        }
    }

    /// Whether the device has an automatic document feeder.
    #[must_use]
    pub fn has_feeder(&self) -> bool {
        self.sources.contains(&ScanSource::Feeder)
    }

    /// Deduplication key used by discovery.
    #[must_use]
    pub fn endpoint(&self) -> (String, u16) {
        (self.ip.trim().to_ascii_lowercase(), self.port)
    }
}

/// Coarse device state as reported by a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DeviceState {
    /// Ready to accept a job
    Idle,
    /// Busy with a job
    Processing,
    /// Unreachable
    #[default]
    Offline,
    /// Reachable but stopped or faulted
    Error,
}

/// State of the automatic document feeder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AdfState {
    /// No paper in the feeder
    Empty,
    /// Paper present
    Loaded,
    /// Not reported or not applicable
    #[default]
    Unknown,
}

/// Transient status snapshot. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ScannerStatus {
    /// Device state
    pub state: DeviceState,
    /// Feeder state, meaningful only when the device has a feeder
    pub adf_state: AdfState,
}

impl ScannerStatus {
    /// Status reported for unreachable devices.
    #[must_use]
    pub fn offline() -> Self {
        Self {
            state: DeviceState::Offline,
            adf_state: AdfState::Unknown,
        }
    }

    /// Idle status without feeder information.
    #[must_use]
    pub fn idle() -> Self {
        Self {
            state: DeviceState::Idle,
            adf_state: AdfState::Unknown,
        }
    }

    /// Whether the device answered at all.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.state != DeviceState::Offline
    }
}

/// Color mode requested in a job ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ColorMode {
    /// 24-bit color
    #[default]
    #[serde(rename = "RGB24")]
    Rgb24,
    /// 8-bit grayscale
    Grayscale8,
    /// 1-bit black and white
    BlackAndWhite1,
}

impl ColorMode {
    /// Protocol name shared by eSCL and WS-Scan.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rgb24 => "RGB24",
            Self::Grayscale8 => "Grayscale8",
            Self::BlackAndWhite1 => "BlackAndWhite1",
        }
    }
}

/// Scan parameters. Unset fields fall back to defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    /// Resolution in DPI
    pub resolution: u32,
    /// Color mode
    pub color_mode: ColorMode,
    /// Requested document MIME type
    pub format: String,
    /// Scan both sides when feeding
    pub duplex: bool,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            resolution: 300,
            color_mode: ColorMode::Rgb24,
            format: "application/pdf".to_string(),
            duplex: false,
        }
    }
}

/// A request to scan, built per call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRequest {
    /// Input source
    pub source: ScanSource,
    /// Ticket parameters
    #[serde(default)]
    pub settings: ScanSettings,
    /// Whether the ADF monitor issued this request
    #[serde(default)]
    pub auto: bool,
}

impl ScanRequest {
    /// Manual request with default settings.
    #[must_use]
    pub fn new(source: ScanSource) -> Self {
        Self {
            source,
            settings: ScanSettings::default(),
            auto: false,
        }
    }

    /// Request issued by the ADF monitor.
    #[must_use]
    pub fn automatic(source: ScanSource) -> Self {
        Self {
            auto: true,
            ..Self::new(source)
        }
    }

    /// Override the ticket settings.
    #[must_use]
    pub fn with_settings(mut self, settings: ScanSettings) -> Self {
        self.settings = settings;
        self
    }
}

/// The output of one scan. Immutable once produced.
#[derive(Clone, PartialEq, Eq)]
pub struct ScanResult {
    /// Name suggested by the producer (carries the file extension)
    pub filename: String,
    /// Payload length
    pub size_bytes: u64,
    /// When the scan completed
    pub timestamp: DateTime<Local>,
    /// Input source used
    pub source_used: ScanSource,
    /// True when triggered without a user action
    pub auto: bool,
    /// MIME type of the payload
    pub content_type: String,
    /// The document payload
    pub bytes: Vec<u8>,
}

impl ScanResult {
    /// Build a result stamped with the current time.
    #[must_use]
    pub fn new(
        filename: impl Into<String>,
        content_type: impl Into<String>,
        source_used: ScanSource,
        auto: bool,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            filename: filename.into(),
            size_bytes: bytes.len() as u64,
            timestamp: Local::now(),
            source_used,
            auto,
            content_type: content_type.into(),
            bytes,
        }
    }

    /// File extension (with leading dot) for the payload.
    #[must_use]
    pub fn extension(&self) -> String {
        if let Some((_, ext)) = self.filename.rsplit_once('.') {
            if !ext.is_empty() && !ext.contains('/') {
                return format!(".{}", ext.to_ascii_lowercase());
            }
        }
        extension_for_mime(&self.content_type).to_string()
    }
}

impl fmt::Debug for ScanResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanResult")
            .field("filename", &self.filename)
            .field("size_bytes", &self.size_bytes)
            .field("timestamp", &self.timestamp)
            .field("source_used", &self.source_used)
            .field("auto", &self.auto)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// File extension for a document MIME type.
#[must_use]
pub fn extension_for_mime(mime: &str) -> &'static str {
    match mime.split(';').next().unwrap_or_default().trim() {
        "image/jpeg" => ".jpg",
        "image/png" => ".png",
        "image/tiff" => ".tiff",
        _ => ".pdf",
    }
}

/// Metadata of a delivered scan, kept in the dashboard history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRecord {
    /// Final filename in the output folder
    pub filename: String,
    /// When the scan completed
    pub timestamp: DateTime<Local>,
    /// Payload length
    pub size_bytes: u64,
    /// Input source used
    pub source_used: ScanSource,
    /// True for monitor/folder-watch triggered scans
    pub auto: bool,
    /// Paperless delivery error, if delivery was attempted and failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_error: Option<String>,
}
