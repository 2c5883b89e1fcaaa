//! Paperless-NGX delivery: consume-folder drop or REST upload.

use crate::error::{OutputError, Result};
use crate::writer::write_atomic;
use openscan_core::{PaperlessConfig, PaperlessMode, RetryPolicy, ScanResult};
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const UPLOAD_PATH: &str = "/api/documents/post_document/";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_NAME_ATTEMPTS: u32 = 1000;

/// Where a delivered scan ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryReceipt {
    /// Copied into the consume folder
    Consumed(PathBuf),
    /// Accepted by the REST API; carries the consumption task id when returned
    Uploaded {
        /// Task id reported by Paperless
        task_id: Option<String>,
    },
}

/// Outcome of one upload attempt.
enum Attempt {
    Transient(String),
    Fatal(String),
}

/// Delivers scans to a Paperless-NGX instance.
#[derive(Clone)]
pub struct PaperlessClient {
    mode: PaperlessMode,
    consume_folder: PathBuf,
    api_url: String,
    api_token: String,
    tags: Vec<String>,
    retry: RetryPolicy,
    client: reqwest::Client,
}

impl PaperlessClient {
    /// Build a client from settings. Returns `None` when delivery is disabled.
    ///
    /// # Errors
    /// Returns error if the selected mode lacks its destination.
    pub fn from_config(config: &PaperlessConfig, retry: RetryPolicy) -> Result<Option<Self>> {
        if !config.enabled {
            return Ok(None);
        }
        match config.mode {
            PaperlessMode::Consume if config.consume_folder.trim().is_empty() => {
                return Err(OutputError::Config("consume folder is not set".to_string()));
            }
            PaperlessMode::Api if config.api_url.trim().is_empty() => {
                return Err(OutputError::Config("API URL is not set".to_string()));
            }
            PaperlessMode::Api if reqwest::Url::parse(config.api_url.trim()).is_err() => {
                return Err(OutputError::Config(format!(
                    "API URL is not a valid URL: {}",
                    config.api_url
                )));
            }
            _ => {}
        }

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("OpenScanHub/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| OutputError::Config(format!("HTTP client: {e}")))?;

        Ok(Some(Self {
            mode: config.mode,
            consume_folder: PathBuf::from(config.consume_folder.trim()),
            api_url: config.api_url.trim().trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            tags: config.default_tags.clone(),
            retry,
            client,
        }))
    }

    /// Delivery mode.
    #[must_use]
    pub fn mode(&self) -> PaperlessMode {
        self.mode
    }

    /// Deliver a scan that was already saved at `saved`.
    ///
    /// The error string is the cause of the final failed attempt.
    pub async fn deliver(
        &self,
        saved: &Path,
        result: &ScanResult,
    ) -> std::result::Result<DeliveryReceipt, String> {
        let filename = saved
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&result.filename)
            .to_string();
        match self.mode {
            PaperlessMode::Consume => {
                let folder = self.consume_folder.clone();
                let bytes = result.bytes.clone();
                tokio::task::spawn_blocking(move || consume(&folder, &filename, &bytes))
                    .await
                    .map_err(io::Error::other)
                    .and_then(|copied| copied)
                    .map(DeliveryReceipt::Consumed)
                    .map_err(|e| {
                        format!(
                            "copy into {} failed: {e}",
                            self.consume_folder.display()
                        )
                    })
            }
            PaperlessMode::Api => self
                .upload(&filename, result)
                .await
                .map(|task_id| DeliveryReceipt::Uploaded { task_id }),
        }
    }

    async fn upload(
        &self,
        filename: &str,
        result: &ScanResult,
    ) -> std::result::Result<Option<String>, String> {
        let url = format!("{}{UPLOAD_PATH}", self.api_url);
        let url = url.as_str();
        let title = filename
            .rsplit_once('.')
            .map_or(filename, |(stem, _)| stem);

        retry_with_backoff(&self.retry, "Paperless upload", || async move {
            let document = Part::bytes(result.bytes.clone())
                .file_name(filename.to_string())
                .mime_str(&result.content_type)
                .map_err(|e| Attempt::Fatal(format!("invalid content type: {e}")))?;
            let mut form = Form::new()
                .part("document", document)
                .text("title", title.to_string());
            for tag in &self.tags {
                form = form.text("tags", tag.clone());
            }

            let resp = self
                .client
                .post(url)
                .header(reqwest::header::AUTHORIZATION, self.auth_header())
                .multipart(form)
                .send()
                .await
                .map_err(|e| Attempt::Transient(format!("request failed: {e}")))?;

            let status = resp.status();
            if status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                let task_id = body.trim().trim_matches('"').to_string();
                info!(filename, "uploaded scan to Paperless");
                return Ok((!task_id.is_empty()).then_some(task_id));
            }
            let body = resp.text().await.unwrap_or_default();
            let message = format!("HTTP {status}: {}", body.trim());
            if is_transient(status) {
                Err(Attempt::Transient(message))
            } else {
                Err(Attempt::Fatal(message))
            }
        })
        .await
    }

    /// Check the API answers with the configured token.
    ///
    /// Returns the HTTP status on success. Consume mode checks the folder
    /// exists instead.
    pub async fn test_connection(&self) -> std::result::Result<u16, String> {
        if self.mode == PaperlessMode::Consume {
            return if self.consume_folder.is_dir() {
                Ok(200)
            } else {
                Err(format!(
                    "consume folder {} does not exist",
                    self.consume_folder.display()
                ))
            };
        }
        let url = format!("{}/api/", self.api_url);
        let resp = self
            .client
            .get(&url)
            .header(reqwest::header::AUTHORIZATION, self.auth_header())
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = resp.status();
        if status.is_success() {
            Ok(status.as_u16())
        } else {
            Err(format!("HTTP {}", status.as_u16()))
        }
    }

    fn auth_header(&self) -> String {
        format!("Token {}", self.api_token)
    }
}

impl std::fmt::Debug for PaperlessClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaperlessClient")
            .field("mode", &self.mode)
            .field("consume_folder", &self.consume_folder)
            .field("api_url", &self.api_url)
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}

fn is_transient(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

/// Run `task` until it succeeds, fails fatally or the policy is exhausted.
async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    what: &str,
    mut task: F,
) -> std::result::Result<T, String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, Attempt>>,
{
    let attempts = policy.attempts();
    let mut attempt = 1;
    loop {
        match task().await {
            Ok(value) => return Ok(value),
            Err(Attempt::Fatal(message)) => {
                debug!("{what} rejected: {message}");
                return Err(message);
            }
            Err(Attempt::Transient(message)) if attempt >= attempts => {
                return Err(format!("{message} (after {attempts} attempts)"));
            }
            Err(Attempt::Transient(message)) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "{} failed: {} (attempt {}/{}), retrying in {:?}...",
                    what, message, attempt, attempts, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Copy into the consume folder under a free name. Blocking.
fn consume(folder: &Path, filename: &str, bytes: &[u8]) -> io::Result<PathBuf> {
    std::fs::create_dir_all(folder)?;
    let (stem, ext) = match filename.rsplit_once('.') {
        Some((stem, ext)) => (stem, format!(".{ext}")),
        None => (filename, String::new()),
    };
    for attempt in 1..=MAX_NAME_ATTEMPTS {
        let candidate = if attempt == 1 {
            filename.to_string()
        } else {
            format!("{stem}_{attempt}{ext}")
        };
        match write_atomic(folder, &candidate, bytes) {
            Ok(path) => {
                info!(path = %path.display(), "copied scan into Paperless consume folder");
                return Ok(path);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free name for {filename}"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn api_config(url: &str) -> PaperlessConfig {
        PaperlessConfig {
            enabled: true,
            mode: PaperlessMode::Api,
            api_url: url.to_string(),
            api_token: "secret-token".to_string(),
            ..PaperlessConfig::default()
        }
    }

    #[test]
    fn test_disabled_is_none() {
        let client = PaperlessClient::from_config(&PaperlessConfig::default(), RetryPolicy::default());
        assert!(client.unwrap().is_none());
    }

    #[test]
    fn test_missing_destination_is_config_error() {
        let config = PaperlessConfig {
            enabled: true,
            ..PaperlessConfig::default()
        };
        assert!(matches!(
            PaperlessClient::from_config(&config, RetryPolicy::default()),
            Err(OutputError::Config(_))
        ));
        assert!(PaperlessClient::from_config(&api_config("not a url"), RetryPolicy::default()).is_err());
    }

    #[test]
    fn test_debug_hides_token() {
        let client = PaperlessClient::from_config(&api_config("http://paperless.local:8000/"), RetryPolicy::default())
            .unwrap()
            .unwrap();
        let debug = format!("{client:?}");
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("http://paperless.local:8000"));
    }

    #[tokio::test]
    async fn test_retry_succeeds_on_second_attempt() {
        let policy = RetryPolicy::default().with_initial_backoff(Duration::from_millis(1));
        let count = Arc::new(AtomicU32::new(0));
        let result = retry_with_backoff(&policy, "task", || {
            let count = count.clone();
            async move {
                if count.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(Attempt::Transient("flaky".to_string()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_stops_on_fatal() {
        let policy = RetryPolicy::default().with_initial_backoff(Duration::from_millis(1));
        let count = Arc::new(AtomicU32::new(0));
        let result: std::result::Result<(), String> = retry_with_backoff(&policy, "task", || {
            let count = count.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Err(Attempt::Fatal("HTTP 400".to_string()))
            }
        })
        .await;
        assert_eq!(result, Err("HTTP 400".to_string()));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_exhausts_attempts() {
        let policy = RetryPolicy::default().with_initial_backoff(Duration::from_millis(1));
        let count = Arc::new(AtomicU32::new(0));
        let result: std::result::Result<(), String> = retry_with_backoff(&policy, "task", || {
            let count = count.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Err(Attempt::Transient("HTTP 503".to_string()))
            }
        })
        .await;
        assert!(result.unwrap_err().starts_with("HTTP 503"));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
