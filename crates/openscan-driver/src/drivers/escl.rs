//! eSCL (AirScan) driver over HTTP/XML.

use crate::driver::{DriverCapabilities, ScannerDriver};
use crate::error::{DriverError, Result};
use crate::http::{absolute_url, build_http_client, content_type, transport_error};
use crate::xml;
use async_trait::async_trait;
use openscan_core::{
    extension_for_mime, AdfState, DeviceState, JobConfig, ScanRequest, ScanResult, ScanSource,
    ScannerDescriptor, ScannerStatus,
};
use reqwest::{Client, StatusCode};
use std::collections::BTreeSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default eSCL root path.
pub const DEFAULT_ROOT: &str = "/eSCL";

const SCAN_NS: &str = "http://schemas.hp.com/imaging/escl/2011/05/03";
const PWG_NS: &str = "http://www.pwg.org/schemas/2010/12/sm";

/// Driver for eSCL / AirScan devices.
pub struct EsclDriver {
    descriptor: ScannerDescriptor,
    client: Client,
    root: String,
    jobs: JobConfig,
}

impl EsclDriver {
    /// Create a driver for the descriptor.
    ///
    /// The eSCL root is the descriptor's service path (from the mDNS `rs`
    /// record) or `/eSCL`.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created.
    pub fn new(descriptor: ScannerDescriptor, jobs: &JobConfig) -> Result<Self> {
        let client = build_http_client(jobs.request_timeout())?;
        let path = descriptor
            .service_path
            .as_deref()
            .map(|p| format!("/{}", p.trim_matches('/')))
            .filter(|p| p.len() > 1)
            .unwrap_or_else(|| DEFAULT_ROOT.to_string());
        let root = format!("{}{}", descriptor.base_url(), path);
        Ok(Self {
            descriptor,
            client,
            root,
            jobs: jobs.clone(),
        })
    }

    /// Absolute URL of the eSCL root.
    #[must_use]
    pub fn root_url(&self) -> &str {
        &self.root
    }

    fn target(&self) -> String {
        self.descriptor.id().to_string()
    }

    fn job_timeout(&self, started: Instant, message: impl Into<String>) -> DriverError {
        DriverError::JobTimeout {
            target: self.target(),
            waited: started.elapsed(),
            message: message.into(),
        }
    }

    /// POST the ticket, retrying while the device reports busy.
    async fn create_job(&self, ticket: String, started: Instant, deadline: Instant) -> Result<String> {
        let url = format!("{}/ScanJobs", self.root);
        let attempts = self.jobs.retry.attempts();
        let mut last_error = String::new();

        for attempt in 0..attempts {
            if Instant::now() >= deadline {
                break;
            }
            let sent = self
                .client
                .post(&url)
                .header(reqwest::header::CONTENT_TYPE, "text/xml")
                .body(ticket.clone())
                .send()
                .await;

            match sent {
                Ok(resp) if resp.status().is_success() => {
                    let location = resp
                        .headers()
                        .get(reqwest::header::LOCATION)
                        .and_then(|v| v.to_str().ok())
                        .map(str::trim)
                        .filter(|v| !v.is_empty())
                        .ok_or_else(|| {
                            DriverError::protocol(self.target(), "scan job created without a Location header")
                        })?;
                    return Ok(absolute_url(&self.descriptor.base_url(), location));
                }
                Ok(resp)
                    if matches!(
                        resp.status(),
                        StatusCode::CONFLICT | StatusCode::SERVICE_UNAVAILABLE
                    ) =>
                {
                    last_error = format!("device busy (HTTP {})", resp.status().as_u16());
                }
                Ok(resp) => {
                    return Err(DriverError::protocol(
                        self.target(),
                        format!("scan job rejected with HTTP {}", resp.status().as_u16()),
                    ));
                }
                Err(e) => last_error = transport_error(&url, &e).to_string(),
            }

            if attempt + 1 < attempts {
                let delay = self.jobs.retry.delay_for(attempt);
                warn!(
                    "Creating scan job on {} failed: {} (attempt {}/{}), retrying in {:?}...",
                    self.descriptor.ip,
                    last_error,
                    attempt + 1,
                    attempts,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
        }

        Err(self.job_timeout(started, format!("could not create scan job: {last_error}")))
    }

    /// Fetch every document page of a job until the device reports no more.
    async fn fetch_pages(
        &self,
        job_url: &str,
        source: ScanSource,
        started: Instant,
        deadline: Instant,
    ) -> Result<(Vec<u8>, Option<String>)> {
        let next = format!("{}/NextDocument", job_url.trim_end_matches('/'));
        let attempts = self.jobs.retry.attempts();
        let mut failures = 0u32;
        let mut payload = Vec::new();
        let mut pages = 0usize;
        let mut mime = None;

        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(self.job_timeout(started, format!("{pages} page(s) received before the deadline")));
            }

            let sent = tokio::time::timeout(deadline - now, self.client.get(&next).send()).await;
            let failure = match sent {
                Err(_) => {
                    return Err(self.job_timeout(started, "document retrieval did not finish"));
                }
                Ok(Err(e)) => transport_error(&next, &e).to_string(),
                Ok(Ok(resp)) => match resp.status() {
                    status if status.is_success() => {
                        let page_type = content_type(resp.headers());
                        let body = resp.bytes().await.map_err(|e| transport_error(&next, &e))?;
                        if body.is_empty() {
                            break;
                        }
                        pages += 1;
                        payload.extend_from_slice(&body);
                        if mime.is_none() {
                            mime = page_type;
                        }
                        failures = 0;
                        debug!(job = %job_url, pages, bytes = body.len(), "received document page");
                        if source == ScanSource::Platen {
                            break;
                        }
                        continue;
                    }
                    StatusCode::NOT_FOUND => {
                        if pages == 0 {
                            return Err(DriverError::protocol(
                                self.target(),
                                format!("job {job_url} has no document"),
                            ));
                        }
                        break;
                    }
                    StatusCode::SERVICE_UNAVAILABLE => {
                        if let Some(state) = self.job_state(job_url).await {
                            if matches!(state.as_str(), "Aborted" | "Canceled") {
                                return Err(DriverError::protocol(
                                    self.target(),
                                    format!("job {job_url} ended as {state}"),
                                ));
                            }
                        }
                        tokio::time::sleep(self.jobs.poll_interval()).await;
                        continue;
                    }
                    status => format!("HTTP {}", status.as_u16()),
                },
            };

            failures += 1;
            if failures >= attempts {
                return Err(self.job_timeout(started, format!("document retrieval kept failing: {failure}")));
            }
            let delay = self.jobs.retry.delay_for(failures - 1);
            warn!(
                "Fetching document from {} failed: {} (attempt {}/{}), retrying in {:?}...",
                next, failure, failures, attempts, delay
            );
            tokio::time::sleep(delay).await;
        }

        Ok((payload, mime))
    }

    /// State of a job as listed in `ScannerStatus`, if the device reports it.
    async fn job_state(&self, job_url: &str) -> Option<String> {
        let body = self.get_status_xml().await.ok()??;
        let job_path = url::Url::parse(job_url)
            .map(|u| u.path().trim_end_matches('/').to_string())
            .unwrap_or_else(|_| job_url.to_string());
        xml::element_blocks(&body, "JobInfo")
            .into_iter()
            .find(|info| {
                xml::element_text(info, "JobUri")
                    .is_some_and(|uri| uri.trim_end_matches('/') == job_path)
            })
            .and_then(|info| xml::element_text(info, "JobState"))
    }

    async fn delete_job(&self, job_url: &str) {
        match self.client.delete(job_url).send().await {
            Ok(resp) => debug!(job = %job_url, status = resp.status().as_u16(), "deleted scan job"),
            Err(e) => debug!(job = %job_url, "best-effort job delete failed: {e}"),
        }
    }

    /// GET ScannerStatus; `Ok(None)` for non-2xx answers.
    async fn get_status_xml(&self) -> Result<Option<String>> {
        let url = format!("{}/ScannerStatus", self.root);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| transport_error(&url, &e))?;
        if !resp.status().is_success() {
            debug!(url = %url, status = resp.status().as_u16(), "status request rejected");
            return Ok(None);
        }
        resp.text()
            .await
            .map(Some)
            .map_err(|e| transport_error(&url, &e))
    }
}

#[async_trait]
impl ScannerDriver for EsclDriver {
    fn descriptor(&self) -> &ScannerDescriptor {
        &self.descriptor
    }

    async fn capabilities(&self) -> Result<DriverCapabilities> {
        let url = format!("{}/ScannerCapabilities", self.root);
        let unavailable = |message: String| DriverError::Unavailable {
            target: self.target(),
            message,
        };

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| unavailable(transport_error(&url, &e).to_string()))?;
        if !resp.status().is_success() {
            return Err(unavailable(format!(
                "capabilities request returned HTTP {}",
                resp.status().as_u16()
            )));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| unavailable(transport_error(&url, &e).to_string()))?;

        parse_capabilities(&body, &self.descriptor)
            .ok_or_else(|| DriverError::protocol(self.target(), "response is not an eSCL ScannerCapabilities document"))
    }

    async fn status(&self) -> Result<ScannerStatus> {
        Ok(self
            .get_status_xml()
            .await?
            .map_or_else(ScannerStatus::offline, |body| parse_status(&body)))
    }

    async fn scan(&self, request: ScanRequest) -> Result<ScanResult> {
        let started = Instant::now();
        let deadline = started + self.jobs.timeout();
        let ticket = scan_ticket(&request);

        let job_url = self.create_job(ticket, started, deadline).await?;
        info!(scanner = %self.descriptor.id(), job = %job_url, source = %request.source, "eSCL scan job created");

        let fetched = self.fetch_pages(&job_url, request.source, started, deadline).await;
        self.delete_job(&job_url).await;
        let (payload, mime) = fetched?;

        if payload.is_empty() {
            return Err(DriverError::protocol(self.target(), "scan finished without any document data"));
        }

        let mime = mime.unwrap_or_else(|| request.settings.format.clone());
        let filename = format!("scan{}", extension_for_mime(&mime));
        info!(scanner = %self.descriptor.id(), bytes = payload.len(), "eSCL scan complete");
        Ok(ScanResult::new(filename, mime, request.source, request.auto, payload))
    }
}

/// Parse a `ScannerCapabilities` document; `None` if it is not one.
#[must_use]
pub fn parse_capabilities(body: &str, descriptor: &ScannerDescriptor) -> Option<DriverCapabilities> {
    let root = xml::element_block(body, "ScannerCapabilities")?;

    let mut sources = BTreeSet::new();
    if xml::has_element(root, "Platen") {
        sources.insert(ScanSource::Platen);
    }
    if xml::has_element(root, "Adf") {
        sources.insert(ScanSource::Feeder);
    }
    if sources.is_empty() {
        sources.insert(ScanSource::Platen);
    }

    let mut resolutions: Vec<u32> = xml::element_texts(root, "XResolution")
        .iter()
        .filter_map(|r| r.parse().ok())
        .collect();
    resolutions.sort_unstable();
    resolutions.dedup();
    if resolutions.is_empty() {
        resolutions.push(300);
    }

    let mut formats = Vec::new();
    for format in xml::element_texts(root, "DocumentFormatExt")
        .into_iter()
        .chain(xml::element_texts(root, "DocumentFormat"))
    {
        if !formats.contains(&format) {
            formats.push(format);
        }
    }
    if formats.is_empty() {
        formats.push("application/pdf".to_string());
    }

    let mut color_modes = Vec::new();
    for mode in xml::element_texts(root, "ColorMode") {
        if !color_modes.contains(&mode) {
            color_modes.push(mode);
        }
    }
    if color_modes.is_empty() {
        color_modes.push("RGB24".to_string());
    }

    let model = xml::element_text(root, "MakeAndModel")
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| descriptor.model.clone());

    Some(DriverCapabilities {
        display_name: descriptor.display_name.clone(),
        model,
        sources,
        resolutions,
        formats,
        color_modes,
        duplex: xml::has_element(root, "AdfDuplexInputCaps"),
    })
}

/// Parse a `ScannerStatus` document. Missing state means offline.
#[must_use]
pub fn parse_status(body: &str) -> ScannerStatus {
    let Some(state) = xml::element_text(body, "State") else {
        return ScannerStatus::offline();
    };
    let state = match state.as_str() {
        "Processing" | "Testing" => DeviceState::Processing,
        "Stopped" | "Down" => DeviceState::Error,
        _ => DeviceState::Idle,
    };
    let adf_state = match xml::element_text(body, "AdfState").as_deref() {
        Some("ScannerAdfLoaded") => AdfState::Loaded,
        Some("ScannerAdfEmpty") => AdfState::Empty,
        _ => AdfState::Unknown,
    };
    ScannerStatus { state, adf_state }
}

/// Build the `ScanSettings` job ticket for a request.
#[must_use]
pub fn scan_ticket(request: &ScanRequest) -> String {
    let settings = &request.settings;
    let format = xml::escape(&settings.format);
    let duplex = if request.source == ScanSource::Feeder {
        format!("\n  <scan:Duplex>{}</scan:Duplex>", settings.duplex)
    } else {
        String::new()
    };
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<scan:ScanSettings xmlns:scan="{SCAN_NS}" xmlns:pwg="{PWG_NS}">
  <pwg:Version>2.0</pwg:Version>
  <pwg:ScanRegions>
    <pwg:ScanRegion>
      <pwg:Height>3300</pwg:Height>
      <pwg:ContentRegionUnits>escl:ThreeHundredthsOfInches</pwg:ContentRegionUnits>
      <pwg:Width>2550</pwg:Width>
      <pwg:XOffset>0</pwg:XOffset>
      <pwg:YOffset>0</pwg:YOffset>
    </pwg:ScanRegion>
  </pwg:ScanRegions>
  <pwg:InputSource>{source}</pwg:InputSource>
  <scan:InputSource>{source}</scan:InputSource>
  <scan:ColorMode>{color}</scan:ColorMode>
  <scan:XResolution>{res}</scan:XResolution>
  <scan:YResolution>{res}</scan:YResolution>
  <pwg:DocumentFormat>{format}</pwg:DocumentFormat>
  <scan:DocumentFormatExt>{format}</scan:DocumentFormatExt>
  <scan:Intent>Document</scan:Intent>{duplex}
</scan:ScanSettings>"#,
        source = request.source.escl_name(),
        color = settings.color_mode.as_str(),
        res = settings.resolution,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use openscan_core::{ColorMode, Protocol, ScanSettings};

    const CAPABILITIES: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<scan:ScannerCapabilities xmlns:scan="http://schemas.hp.com/imaging/escl/2011/05/03" xmlns:pwg="http://www.pwg.org/schemas/2010/12/sm">
  <pwg:Version>2.63</pwg:Version>
  <pwg:MakeAndModel>HP OfficeJet Pro 9010</pwg:MakeAndModel>
  <scan:Platen>
    <scan:PlatenInputCaps>
      <scan:SettingProfiles><scan:SettingProfile>
        <scan:ColorModes><scan:ColorMode>RGB24</scan:ColorMode><scan:ColorMode>Grayscale8</scan:ColorMode></scan:ColorModes>
        <scan:DocumentFormats><pwg:DocumentFormat>application/pdf</pwg:DocumentFormat><scan:DocumentFormatExt>image/jpeg</scan:DocumentFormatExt></scan:DocumentFormats>
        <scan:SupportedResolutions><scan:DiscreteResolutions>
          <scan:DiscreteResolution><scan:XResolution>300</scan:XResolution><scan:YResolution>300</scan:YResolution></scan:DiscreteResolution>
          <scan:DiscreteResolution><scan:XResolution>75</scan:XResolution><scan:YResolution>75</scan:YResolution></scan:DiscreteResolution>
        </scan:DiscreteResolutions></scan:SupportedResolutions>
      </scan:SettingProfile></scan:SettingProfiles>
    </scan:PlatenInputCaps>
  </scan:Platen>
  <scan:Adf>
    <scan:AdfSimplexInputCaps><scan:SettingProfiles><scan:SettingProfile>
      <scan:ColorModes><scan:ColorMode>RGB24</scan:ColorMode></scan:ColorModes>
      <scan:SupportedResolutions><scan:DiscreteResolutions>
        <scan:DiscreteResolution><scan:XResolution>300</scan:XResolution><scan:YResolution>300</scan:YResolution></scan:DiscreteResolution>
      </scan:DiscreteResolutions></scan:SupportedResolutions>
    </scan:SettingProfile></scan:SettingProfiles></scan:AdfSimplexInputCaps>
    <scan:AdfDuplexInputCaps/>
  </scan:Adf>
</scan:ScannerCapabilities>"#;

    fn descriptor() -> ScannerDescriptor {
        ScannerDescriptor::new("192.168.1.50", 80, Protocol::Escl)
    }

    #[test]
    fn test_parse_capabilities() {
        let caps = parse_capabilities(CAPABILITIES, &descriptor()).unwrap();
        assert_eq!(caps.model, "HP OfficeJet Pro 9010");
        assert!(caps.has_feeder());
        assert!(caps.sources.contains(&ScanSource::Platen));
        assert_eq!(caps.resolutions, vec![75, 300]);
        assert_eq!(caps.formats, vec!["image/jpeg", "application/pdf"]);
        assert_eq!(caps.color_modes, vec!["RGB24", "Grayscale8"]);
        assert!(caps.duplex);
    }

    #[test]
    fn test_capabilities_without_feeder_are_platen_only() {
        let body = "<scan:ScannerCapabilities><pwg:Version>2.0</pwg:Version></scan:ScannerCapabilities>";
        let caps = parse_capabilities(body, &descriptor()).unwrap();
        assert_eq!(caps.sources, BTreeSet::from([ScanSource::Platen]));
        assert!(!caps.duplex);
        assert!(parse_capabilities("<html>router login</html>", &descriptor()).is_none());
    }

    #[test]
    fn test_parse_status() {
        let body = "<scan:ScannerStatus><pwg:State>Idle</pwg:State><scan:AdfState>ScannerAdfLoaded</scan:AdfState></scan:ScannerStatus>";
        let status = parse_status(body);
        assert_eq!(status.state, DeviceState::Idle);
        assert_eq!(status.adf_state, AdfState::Loaded);

        let body = "<scan:ScannerStatus><pwg:State>Processing</pwg:State><scan:AdfState>ScannerAdfEmpty</scan:AdfState></scan:ScannerStatus>";
        let status = parse_status(body);
        assert_eq!(status.state, DeviceState::Processing);
        assert_eq!(status.adf_state, AdfState::Empty);

        assert_eq!(parse_status("<nonsense/>"), ScannerStatus::offline());
        assert_eq!(parse_status("<pwg:State>Stopped</pwg:State>").state, DeviceState::Error);
    }

    #[test]
    fn test_ticket_uses_feeder_name() {
        let request = ScanRequest::new(ScanSource::Feeder).with_settings(ScanSettings {
            resolution: 200,
            color_mode: ColorMode::Grayscale8,
            ..ScanSettings::default()
        });
        let ticket = scan_ticket(&request);
        assert!(ticket.contains("<scan:InputSource>Feeder</scan:InputSource>"));
        assert!(!ticket.contains(">Adf<"));
        assert!(ticket.contains("<scan:XResolution>200</scan:XResolution>"));
        assert!(ticket.contains("<scan:ColorMode>Grayscale8</scan:ColorMode>"));
        assert!(ticket.contains("<scan:Duplex>false</scan:Duplex>"));
    }

    #[test]
    fn test_ticket_platen_has_no_duplex() {
        let ticket = scan_ticket(&ScanRequest::new(ScanSource::Platen));
        assert!(ticket.contains("<scan:InputSource>Platen</scan:InputSource>"));
        assert!(!ticket.contains("Duplex"));
    }

    #[test]
    fn test_root_from_service_path() {
        let jobs = JobConfig::default();
        let driver = EsclDriver::new(descriptor(), &jobs).unwrap();
        assert_eq!(driver.root_url(), "http://192.168.1.50:80/eSCL");

        let driver = EsclDriver::new(descriptor().with_service_path("escl/"), &jobs).unwrap();
        assert_eq!(driver.root_url(), "http://192.168.1.50:80/escl");
    }
}
