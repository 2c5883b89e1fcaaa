//! WS-Scan driver: SOAP over HTTP, endpoint located with WS-Discovery.

use crate::driver::{DriverCapabilities, ScannerDriver};
use crate::error::{DriverError, Result};
use crate::http::{build_http_client, transport_error};
use crate::ws_discovery::{self, WS_DISCOVERY_PORT};
use crate::xml;
use async_trait::async_trait;
use openscan_core::{
    extension_for_mime, AdfState, DeviceState, JobConfig, ScanRequest, ScanResult, ScanSource,
    ScannerDescriptor, ScannerStatus,
};
use reqwest::Client;
use std::collections::BTreeSet;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

const SCAN_NS: &str = "http://schemas.microsoft.com/windows/2006/08/wdp/scan";
const ACTION_BASE: &str = "http://schemas.microsoft.com/windows/2006/08/wdp/scan";

/// Path tried when the device does not answer a unicast probe.
pub const FALLBACK_PATH: &str = "/wsd/scan";

const RESOLVE_WINDOW: Duration = Duration::from_secs(2);

/// Where SOAP requests for a device are sent.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Endpoint {
    url: String,
    to: String,
}

/// Decoded answer to a SOAP request.
#[derive(Debug)]
enum SoapReply {
    /// SOAP envelope without a fault
    Envelope(String),
    /// Binary document, possibly unpacked from MTOM
    Document { bytes: Vec<u8>, mime: Option<String> },
    /// SOAP fault
    Fault { code: String, reason: String },
}

/// Driver for WS-Scan devices.
pub struct WsdDriver {
    descriptor: ScannerDescriptor,
    client: Client,
    jobs: JobConfig,
    endpoint: OnceCell<Endpoint>,
}

impl WsdDriver {
    /// Create a driver for the descriptor.
    ///
    /// When the descriptor carries a service path, requests go straight to
    /// it; otherwise the endpoint is resolved with a unicast probe on first use.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created.
    pub fn new(descriptor: ScannerDescriptor, jobs: &JobConfig) -> Result<Self> {
        let client = build_http_client(jobs.request_timeout())?;
        let endpoint = OnceCell::new();
        if let Some(path) = descriptor.service_path.as_deref() {
            let path = format!("/{}", path.trim_start_matches('/'));
            // Cell is fresh; set cannot fail
            let _ = endpoint.set(Endpoint {
                url: format!("{}{path}", descriptor.base_url()),
                to: format!("{}{path}", descriptor.base_url()),
            });
        }
        Ok(Self {
            descriptor,
            client,
            jobs: jobs.clone(),
            endpoint,
        })
    }

    fn target(&self) -> String {
        self.descriptor.id().to_string()
    }

    async fn endpoint(&self) -> &Endpoint {
        self.endpoint
            .get_or_init(|| async {
                let fallback = Endpoint {
                    url: format!("{}{FALLBACK_PATH}", self.descriptor.base_url()),
                    to: format!("urn:uuid:{}", Uuid::new_v4()),
                };
                let Ok(ip) = self.descriptor.ip.parse::<IpAddr>() else {
                    return fallback;
                };
                match ws_discovery::probe(SocketAddr::new(ip, WS_DISCOVERY_PORT), RESOLVE_WINDOW).await {
                    Ok(matches) => matches
                        .into_iter()
                        .find_map(|(found, _)| {
                            let url = found.transfer_url()?.to_string();
                            let to = found.endpoint_reference.clone().unwrap_or_else(|| url.clone());
                            Some(Endpoint { url, to })
                        })
                        .unwrap_or(fallback),
                    Err(e) => {
                        debug!(ip = %self.descriptor.ip, "unicast WS-Discovery probe failed: {e}");
                        fallback
                    }
                }
            })
            .await
    }

    /// Send one SOAP request and decode the reply.
    async fn soap(&self, action: &str, body: &str) -> Result<SoapReply> {
        let endpoint = self.endpoint().await;
        let envelope = envelope(&format!("{ACTION_BASE}/{action}"), &endpoint.to, body);
        let resp = self
            .client
            .post(&endpoint.url)
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/soap+xml; charset=utf-8",
            )
            .body(envelope)
            .send()
            .await
            .map_err(|e| transport_error(&endpoint.url, &e))?;

        let status = resp.status();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| transport_error(&endpoint.url, &e))?;

        let reply = decode_reply(&content_type, &bytes);
        if !status.is_success() && !matches!(reply, SoapReply::Fault { .. }) {
            return Err(DriverError::protocol(
                self.target(),
                format!("{action} returned HTTP {}", status.as_u16()),
            ));
        }
        Ok(reply)
    }

    async fn scanner_elements(&self) -> Result<SoapReply> {
        self.soap("GetScannerElements", GET_SCANNER_ELEMENTS).await
    }

    /// Create the job, retrying transport failures within the deadline.
    async fn create_job(&self, ticket: &str, started: Instant, deadline: Instant) -> Result<(String, String)> {
        let attempts = self.jobs.retry.attempts();
        let mut last_error = String::new();

        for attempt in 0..attempts {
            if Instant::now() >= deadline {
                break;
            }
            match self.soap("CreateScanJob", ticket).await {
                Ok(SoapReply::Envelope(body)) => {
                    let job_id = xml::element_text(&body, "JobId").filter(|v| !v.is_empty());
                    let job_token = xml::element_text(&body, "JobToken").filter(|v| !v.is_empty());
                    return match (job_id, job_token) {
                        (Some(id), Some(token)) => Ok((id, token)),
                        _ => Err(DriverError::protocol(
                            self.target(),
                            "CreateScanJob response carries no JobId/JobToken",
                        )),
                    };
                }
                Ok(SoapReply::Fault { code, reason }) => {
                    return Err(DriverError::protocol(
                        self.target(),
                        format!("CreateScanJob fault {code}: {reason}"),
                    ));
                }
                Ok(SoapReply::Document { .. }) => {
                    return Err(DriverError::protocol(
                        self.target(),
                        "CreateScanJob answered with binary data",
                    ));
                }
                Err(e @ DriverError::Protocol { .. }) => return Err(e),
                Err(e) => last_error = e.to_string(),
            }

            if attempt + 1 < attempts {
                let delay = self.jobs.retry.delay_for(attempt);
                warn!(
                    "Creating WSD scan job on {} failed: {} (attempt {}/{}), retrying in {:?}...",
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

    /// Poll `GetJobElements` until the job leaves its pending states.
    async fn wait_for_job(&self, job_id: &str, started: Instant, deadline: Instant) -> Result<()> {
        let request = get_job_elements(job_id);
        let attempts = self.jobs.retry.attempts();
        let mut failures = 0u32;

        loop {
            if Instant::now() >= deadline {
                return Err(self.job_timeout(started, format!("job {job_id} never left the pending state")));
            }
            match self.soap("GetJobElements", &request).await {
                Ok(SoapReply::Envelope(body)) => {
                    match xml::element_text(&body, "JobState").as_deref() {
                        Some("Aborted" | "Canceled") => {
                            return Err(DriverError::protocol(
                                self.target(),
                                format!("job {job_id} was aborted by the device"),
                            ));
                        }
                        Some("Pending" | "Creating") => {
                            debug!(job = %job_id, "WSD job still pending");
                        }
                        _ => return Ok(()),
                    }
                }
                // Devices that do not implement job queries go straight to retrieval
                Ok(SoapReply::Fault { code, .. }) => {
                    debug!(job = %job_id, code = %code, "GetJobElements not supported");
                    return Ok(());
                }
                Ok(SoapReply::Document { .. }) => return Ok(()),
                Err(e) => {
                    failures += 1;
                    if failures >= attempts {
                        return Err(self.job_timeout(started, format!("job status polling kept failing: {e}")));
                    }
                    warn!("Polling WSD job {} failed: {} (attempt {}/{})", job_id, e, failures, attempts);
                }
            }
            tokio::time::sleep(self.jobs.poll_interval()).await;
        }
    }

    /// Retrieve images until the device reports none are left.
    async fn retrieve_images(
        &self,
        job_id: &str,
        job_token: &str,
        source: ScanSource,
        started: Instant,
        deadline: Instant,
    ) -> Result<(Vec<u8>, Option<String>)> {
        let request = retrieve_image(job_id, job_token);
        let attempts = self.jobs.retry.attempts();
        let mut failures = 0u32;
        let mut payload = Vec::new();
        let mut pages = 0usize;
        let mut mime = None;

        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(self.job_timeout(started, format!("{pages} image(s) retrieved before the deadline")));
            }
            let reply = tokio::time::timeout(deadline - now, self.soap("RetrieveImage", &request))
                .await
                .map_err(|_| self.job_timeout(started, "image retrieval did not finish"))?;

            match reply {
                Ok(SoapReply::Document { bytes, mime: part_mime }) => {
                    pages += 1;
                    payload.extend_from_slice(&bytes);
                    if mime.is_none() {
                        mime = part_mime;
                    }
                    failures = 0;
                    debug!(job = %job_id, pages, bytes = bytes.len(), "retrieved image");
                    if source == ScanSource::Platen {
                        break;
                    }
                    continue;
                }
                Ok(SoapReply::Fault { code, reason }) if is_end_of_images(&code) => {
                    if pages > 0 {
                        break;
                    }
                    debug!(job = %job_id, "no image available yet: {reason}");
                }
                Ok(SoapReply::Fault { code, reason }) => {
                    return Err(DriverError::protocol(
                        self.target(),
                        format!("RetrieveImage fault {code}: {reason}"),
                    ));
                }
                Ok(SoapReply::Envelope(_)) => {
                    return Err(DriverError::protocol(
                        self.target(),
                        "RetrieveImage response carries no image data",
                    ));
                }
                Err(e @ DriverError::Protocol { .. }) => return Err(e),
                Err(e) => {
                    failures += 1;
                    if failures >= attempts {
                        return Err(self.job_timeout(started, format!("image retrieval kept failing: {e}")));
                    }
                    warn!(
                        "Retrieving WSD image for job {} failed: {} (attempt {}/{})",
                        job_id, e, failures, attempts
                    );
                }
            }
            tokio::time::sleep(self.jobs.poll_interval()).await;
        }

        Ok((payload, mime))
    }

    fn job_timeout(&self, started: Instant, message: impl Into<String>) -> DriverError {
        DriverError::JobTimeout {
            target: self.target(),
            waited: started.elapsed(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl ScannerDriver for WsdDriver {
    fn descriptor(&self) -> &ScannerDescriptor {
        &self.descriptor
    }

    async fn capabilities(&self) -> Result<DriverCapabilities> {
        let body = match self.scanner_elements().await {
            Ok(SoapReply::Envelope(body)) => body,
            Ok(SoapReply::Fault { code, reason }) => {
                return Err(DriverError::protocol(
                    self.target(),
                    format!("GetScannerElements fault {code}: {reason}"),
                ));
            }
            Ok(SoapReply::Document { .. }) => {
                return Err(DriverError::protocol(self.target(), "unexpected binary response"));
            }
            Err(e @ (DriverError::Network { .. } | DriverError::Io { .. })) => {
                return Err(DriverError::Unavailable {
                    target: self.target(),
                    message: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        };
        parse_capabilities(&body, &self.descriptor).ok_or_else(|| {
            DriverError::protocol(self.target(), "response is not a GetScannerElements reply")
        })
    }

    async fn status(&self) -> Result<ScannerStatus> {
        match self.scanner_elements().await? {
            SoapReply::Envelope(body) => Ok(parse_status(&body)),
            SoapReply::Fault { code, .. } => {
                debug!(scanner = %self.descriptor.id(), code = %code, "status request faulted");
                Ok(ScannerStatus::offline())
            }
            SoapReply::Document { .. } => Ok(ScannerStatus::offline()),
        }
    }

    async fn scan(&self, request: ScanRequest) -> Result<ScanResult> {
        let started = Instant::now();
        let deadline = started + self.jobs.timeout();

        let (job_id, job_token) = self.create_job(&scan_ticket(&request), started, deadline).await?;
        info!(scanner = %self.descriptor.id(), job = %job_id, source = %request.source, "WSD scan job created");

        self.wait_for_job(&job_id, started, deadline).await?;
        let (payload, mime) = self
            .retrieve_images(&job_id, &job_token, request.source, started, deadline)
            .await?;
        if payload.is_empty() {
            return Err(DriverError::protocol(self.target(), "scan finished without any image data"));
        }

        let mime = mime.unwrap_or_else(|| request.settings.format.clone());
        let filename = format!("scan{}", extension_for_mime(&mime));
        info!(scanner = %self.descriptor.id(), bytes = payload.len(), "WSD scan complete");
        Ok(ScanResult::new(filename, mime, request.source, request.auto, payload))
    }
}

fn is_end_of_images(code: &str) -> bool {
    code.contains("NoImagesAvailable") || code.contains("JobIdNotFound")
}

fn envelope(action: &str, to: &str, body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope" xmlns:a="http://schemas.xmlsoap.org/ws/2004/08/addressing" xmlns:wscn="{SCAN_NS}">
  <s:Header>
    <a:Action>{action}</a:Action>
    <a:MessageID>urn:uuid:{id}</a:MessageID>
    <a:To>{to}</a:To>
    <a:ReplyTo><a:Address>http://schemas.xmlsoap.org/ws/2004/08/addressing/role/anonymous</a:Address></a:ReplyTo>
  </s:Header>
  <s:Body>
    {body}
  </s:Body>
</s:Envelope>"#,
        id = Uuid::new_v4(),
        to = xml::escape(to),
    )
}

const GET_SCANNER_ELEMENTS: &str = r"<wscn:GetScannerElementsRequest>
      <wscn:RequestedElements>
        <wscn:Name>wscn:ScannerDescription</wscn:Name>
        <wscn:Name>wscn:ScannerConfiguration</wscn:Name>
        <wscn:Name>wscn:ScannerStatus</wscn:Name>
      </wscn:RequestedElements>
    </wscn:GetScannerElementsRequest>";

fn get_job_elements(job_id: &str) -> String {
    format!(
        r"<wscn:GetJobElementsRequest>
      <wscn:JobId>{}</wscn:JobId>
      <wscn:RequestedElements><wscn:Name>wscn:JobStatus</wscn:Name></wscn:RequestedElements>
    </wscn:GetJobElementsRequest>",
        xml::escape(job_id)
    )
}

fn retrieve_image(job_id: &str, job_token: &str) -> String {
    format!(
        r"<wscn:RetrieveImageRequest>
      <wscn:JobId>{}</wscn:JobId>
      <wscn:JobToken>{}</wscn:JobToken>
      <wscn:DocumentDescription><wscn:DocumentName>scan</wscn:DocumentName></wscn:DocumentDescription>
    </wscn:RetrieveImageRequest>",
        xml::escape(job_id),
        xml::escape(job_token)
    )
}

/// Build the `CreateScanJobRequest` body for a request.
#[must_use]
pub fn scan_ticket(request: &ScanRequest) -> String {
    let settings = &request.settings;
    let front = media_side("MediaFront", settings.color_mode.as_str(), settings.resolution);
    let back = if request.source == ScanSource::Feeder && settings.duplex {
        media_side("MediaBack", settings.color_mode.as_str(), settings.resolution)
    } else {
        String::new()
    };
    let images = u8::from(request.source == ScanSource::Platen);
    format!(
        r"<wscn:CreateScanJobRequest>
      <wscn:ScanTicket>
        <wscn:JobDescription>
          <wscn:JobName>OpenScanHub Scan</wscn:JobName>
          <wscn:JobOriginatingUserName>openscan</wscn:JobOriginatingUserName>
        </wscn:JobDescription>
        <wscn:DocumentParameters>
          <wscn:Format>{format}</wscn:Format>
          <wscn:ImagesToTransfer>{images}</wscn:ImagesToTransfer>
          <wscn:InputSource>{source}</wscn:InputSource>
          <wscn:InputSize><wscn:DocumentSizeAutoDetect>true</wscn:DocumentSizeAutoDetect></wscn:InputSize>
          <wscn:Scaling><wscn:ScalingWidth>100</wscn:ScalingWidth><wscn:ScalingHeight>100</wscn:ScalingHeight></wscn:Scaling>
          <wscn:MediaSides>{front}{back}</wscn:MediaSides>
        </wscn:DocumentParameters>
      </wscn:ScanTicket>
    </wscn:CreateScanJobRequest>",
        format = xml::escape(&settings.format),
        source = request.source.wsd_name(),
    )
}

fn media_side(side: &str, color: &str, resolution: u32) -> String {
    format!(
        "<wscn:{side}><wscn:ColorProcessing>{color}</wscn:ColorProcessing><wscn:Resolution><wscn:Width>{resolution}</wscn:Width><wscn:Height>{resolution}</wscn:Height></wscn:Resolution></wscn:{side}>"
    )
}

/// Parse a `GetScannerElements` reply into capabilities.
#[must_use]
pub fn parse_capabilities(body: &str, descriptor: &ScannerDescriptor) -> Option<DriverCapabilities> {
    let response = xml::element_block(body, "GetScannerElementsResponse")
        .or_else(|| xml::element_block(body, "ScannerElements"))?;

    let mut sources = BTreeSet::new();
    if xml::has_element(response, "Platen") {
        sources.insert(ScanSource::Platen);
    }
    if xml::has_element(response, "ADF") {
        sources.insert(ScanSource::Feeder);
    }
    if sources.is_empty() {
        sources.insert(ScanSource::Platen);
    }

    let mut resolutions: Vec<u32> = xml::element_blocks(response, "Resolutions")
        .into_iter()
        .flat_map(|block| xml::element_texts(block, "Width"))
        .filter_map(|w| w.parse().ok())
        .collect();
    resolutions.sort_unstable();
    resolutions.dedup();
    if resolutions.is_empty() {
        resolutions.push(300);
    }

    let mut formats = Vec::new();
    for format in xml::element_texts(response, "FormatValue") {
        if !formats.contains(&format) {
            formats.push(format);
        }
    }
    if formats.is_empty() {
        formats.push("application/pdf".to_string());
    }

    let mut color_modes = Vec::new();
    for mode in xml::element_texts(response, "ColorEntry") {
        if !color_modes.contains(&mode) {
            color_modes.push(mode);
        }
    }
    if color_modes.is_empty() {
        color_modes.push("RGB24".to_string());
    }

    let duplex = xml::element_text(response, "ADFSupportsDuplex")
        .is_some_and(|v| v == "true" || v == "1")
        || xml::has_element(response, "ADFBack");

    let model = xml::element_text(response, "ScannerName")
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| descriptor.model.clone());

    Some(DriverCapabilities {
        display_name: descriptor.display_name.clone(),
        model,
        sources,
        resolutions,
        formats,
        color_modes,
        duplex,
    })
}

/// Parse the status part of a `GetScannerElements` reply.
#[must_use]
pub fn parse_status(body: &str) -> ScannerStatus {
    let Some(state) = xml::element_text(body, "ScannerState") else {
        return ScannerStatus::offline();
    };
    let state = match state.as_str() {
        "Processing" => DeviceState::Processing,
        "Stopped" => DeviceState::Error,
        _ => DeviceState::Idle,
    };
    let adf_state = match xml::element_text(body, "AdfState").as_deref() {
        Some("Loaded" | "ScannerAdfLoaded") => AdfState::Loaded,
        Some("Empty" | "ScannerAdfEmpty") => AdfState::Empty,
        _ => AdfState::Unknown,
    };
    ScannerStatus { state, adf_state }
}

/// Decode a SOAP HTTP response by content type.
fn decode_reply(content_type: &str, body: &[u8]) -> SoapReply {
    let lower = content_type.to_ascii_lowercase();
    if lower.starts_with("multipart/related") {
        return match boundary(content_type) {
            Some(boundary) => decode_multipart(&boundary, body),
            None => SoapReply::Fault {
                code: "MalformedMultipart".to_string(),
                reason: "multipart response without boundary".to_string(),
            },
        };
    }
    if lower.contains("xml") || lower.is_empty() {
        let text = String::from_utf8_lossy(body);
        if let Some(fault) = parse_fault(&text) {
            return fault;
        }
        if lower.contains("xml") || text.trim_start().starts_with('<') {
            return SoapReply::Envelope(text.into_owned());
        }
    }
    let mime = content_type
        .split(';')
        .next()
        .map(|m| m.trim().to_ascii_lowercase())
        .filter(|m| !m.is_empty() && m != "application/octet-stream");
    SoapReply::Document {
        bytes: body.to_vec(),
        mime,
    }
}

fn parse_fault(text: &str) -> Option<SoapReply> {
    let fault = xml::element_block(text, "Fault")?;
    let code = xml::element_block(fault, "Subcode")
        .and_then(|sub| xml::element_text(sub, "Value"))
        .or_else(|| xml::element_block(fault, "Code").and_then(|c| xml::element_text(c, "Value")))
        .or_else(|| xml::element_text(fault, "faultcode"))
        .unwrap_or_else(|| "Unknown".to_string());
    let reason = xml::element_block(fault, "Reason")
        .and_then(|r| xml::element_text(r, "Text"))
        .or_else(|| xml::element_text(fault, "faultstring"))
        .unwrap_or_default();
    Some(SoapReply::Fault { code, reason })
}

fn boundary(content_type: &str) -> Option<String> {
    header_params(content_type).into_iter().skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("boundary")
            .then(|| value.trim().trim_matches('"').to_string())
    })
}

/// Split a header value on `;` outside quoted strings.
fn header_params(value: &str) -> Vec<&str> {
    let mut params = Vec::new();
    let mut quoted = false;
    let mut start = 0;
    for (i, c) in value.char_indices() {
        match c {
            '"' => quoted = !quoted,
            ';' if !quoted => {
                params.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    params.push(&value[start..]);
    params
}

/// Unpack an MTOM/XOP response: a fault in the XML part wins, otherwise the
/// first non-XML part is the image.
fn decode_multipart(boundary: &str, body: &[u8]) -> SoapReply {
    let delimiter = format!("--{boundary}");
    let mut document = None;

    for part in split_parts(body, delimiter.as_bytes()) {
        let (headers, content) = match find(part, b"\r\n\r\n") {
            Some(at) => (&part[..at], &part[at + 4..]),
            None => match find(part, b"\n\n") {
                Some(at) => (&part[..at], &part[at + 2..]),
                None => continue,
            },
        };
        let headers = String::from_utf8_lossy(headers).to_ascii_lowercase();
        let part_type = headers
            .lines()
            .find_map(|line| line.trim_start().strip_prefix("content-type:"))
            .map(|v| v.split(';').next().unwrap_or_default().trim().to_string())
            .unwrap_or_default();

        if part_type.contains("xml") {
            if let Some(fault) = parse_fault(&String::from_utf8_lossy(content)) {
                return fault;
            }
        } else if document.is_none() {
            let mime = Some(part_type).filter(|m| !m.is_empty() && m != "application/octet-stream");
            document = Some(SoapReply::Document {
                bytes: content.to_vec(),
                mime,
            });
        }
    }

    document.unwrap_or_else(|| SoapReply::Envelope(String::from_utf8_lossy(body).into_owned()))
}

/// Split a multipart body into raw parts (headers + content, CRLF trimmed).
///
/// A delimiter only counts at the start of a line, so payload bytes that
/// happen to contain it do not cut a part short.
fn split_parts<'a>(body: &'a [u8], delimiter: &[u8]) -> Vec<&'a [u8]> {
    let mut parts = Vec::new();
    let Some(first) = find_delimiter(body, delimiter) else {
        return parts;
    };
    let mut rest = &body[first + delimiter.len()..];
    loop {
        if rest.starts_with(b"--") {
            break;
        }
        let Some(next) = find_delimiter(rest, delimiter) else {
            break;
        };
        let mut part = &rest[..next];
        part = part.strip_prefix(b"\r\n").or_else(|| part.strip_prefix(b"\n")).unwrap_or(part);
        part = part.strip_suffix(b"\r\n").or_else(|| part.strip_suffix(b"\n")).unwrap_or(part);
        parts.push(part);
        rest = &rest[next + delimiter.len()..];
    }
    parts
}

/// First occurrence of `delimiter` at the start of the input or of a line.
fn find_delimiter(haystack: &[u8], delimiter: &[u8]) -> Option<usize> {
    let mut from = 0;
    while let Some(rel) = find(&haystack[from..], delimiter) {
        let at = from + rel;
        if at == 0 || haystack[at - 1] == b'\n' {
            return Some(at);
        }
        from = at + 1;
    }
    None
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
