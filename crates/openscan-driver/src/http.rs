//! HTTP helpers shared by the network drivers.

use crate::error::{DriverError, Result};
use reqwest::header::HeaderMap;
use reqwest::Client;
use std::time::Duration;

/// User agent sent to devices.
pub const USER_AGENT: &str = concat!("OpenScanHub/", env!("CARGO_PKG_VERSION"));

/// Build an HTTP client with the given per-request timeout.
///
/// # Errors
/// Returns error if the HTTP client cannot be created.
pub fn build_http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(5)))
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| DriverError::network("http-client", format!("failed to create HTTP client: {e}")))
}

/// Map a transport-level reqwest failure onto a driver error.
pub(crate) fn transport_error(target: &str, err: &reqwest::Error) -> DriverError {
    if err.is_timeout() {
        DriverError::network(target, format!("request timed out: {err}"))
    } else if err.is_connect() {
        DriverError::network(target, format!("connection failed: {err}"))
    } else if err.is_decode() || err.is_body() {
        DriverError::protocol(target, format!("unreadable response body: {err}"))
    } else {
        DriverError::network(target, err.to_string())
    }
}

/// MIME type of a response, without parameters.
pub(crate) fn content_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or_default().trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
}

/// Resolve a possibly relative `Location` against a base URL.
pub(crate) fn absolute_url(base: &str, location: &str) -> String {
    if location.starts_with("http://") || location.starts_with("https://") {
        return location.to_string();
    }
    match url::Url::parse(base).and_then(|b| b.join(location)) {
        Ok(url) => url.to_string(),
        Err(_) => format!("{}/{}", base.trim_end_matches('/'), location.trim_start_matches('/')),
    }
}
