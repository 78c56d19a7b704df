//! Retrying request executor
//!
//! [`ApiClient`] wraps an [`HttpTransport`] with the booth's retry policy:
//! up to `max_attempts` tries, linear backoff of `retry_delay * attempt`
//! between them, retrying only kinds that [`ApiError::is_retryable`] accepts.
//! Decoding never happens inside the loop, so a body that does not match the
//! expected shape is reported at once.

use crate::endpoint::{build_request, Endpoint, FilePart, HttpRequest, MultipartForm, RequestBody};
use crate::error::{ApiError, ApiResult};
use crate::models::UploadResult;
use crate::transport::HttpTransport;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_USER_AGENT: &str = concat!("FotoXUploader/", env!("CARGO_PKG_VERSION"));

/// Configuration for an [`ApiClient`]
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub base_url: String,
    /// Per-request timeout, independent of the retry budget
    pub timeout: Duration,
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: DEFAULT_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Delay before the attempt following `attempt` (1-indexed)
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(attempt)
}

/// HTTP client with timeout, retry and backoff
pub struct ApiClient<T> {
    transport: Arc<T>,
    base_url: RwLock<String>,
    timeout: Duration,
    max_attempts: u32,
    retry_delay: Duration,
    cancel: CancellationToken,
}

impl<T> std::fmt::Debug for ApiClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("max_attempts", &self.max_attempts)
            .field("retry_delay", &self.retry_delay)
            .finish()
    }
}

impl<T: HttpTransport> ApiClient<T> {
    pub fn new(transport: Arc<T>, config: ClientConfig) -> Self {
        Self {
            transport,
            base_url: RwLock::new(config.base_url),
            timeout: config.timeout,
            max_attempts: config.max_attempts.max(1),
            retry_delay: config.retry_delay,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop retry loops when `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn base_url(&self) -> String {
        match self.base_url.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Point the client at a different backend without rebuilding it
    pub fn set_base_url(&self, base_url: &str) -> ApiResult<()> {
        build_request(base_url, &Endpoint::get(""))?;
        let mut guard = match self.base_url.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        log::info!("Base URL changed from {} to {}", *guard, base_url);
        *guard = base_url.to_string();
        Ok(())
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Builds a request for `endpoint` against the current base URL
    pub fn request(&self, endpoint: &Endpoint) -> ApiResult<HttpRequest> {
        build_request(&self.base_url(), endpoint)
    }

    /// Fetch the raw response body
    pub async fn fetch(&self, endpoint: &Endpoint) -> ApiResult<Bytes> {
        let request = self.request(endpoint)?;
        self.execute(request).await
    }

    /// Fetch and decode a JSON response
    pub async fn fetch_decoded<R: DeserializeOwned>(&self, endpoint: &Endpoint) -> ApiResult<R> {
        let body = self.fetch(endpoint).await?;
        decode(&body)
    }

    /// POST/PUT a JSON body and decode the JSON response
    pub async fn send<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        endpoint: &Endpoint,
        body: &B,
    ) -> ApiResult<R> {
        let body = self.send_raw_json(endpoint, body).await?;
        decode(&body)
    }

    /// Send a JSON body and ignore whatever the server answers with
    pub async fn send_unit<B: Serialize + ?Sized>(&self, endpoint: &Endpoint, body: &B) -> ApiResult<()> {
        self.send_raw_json(endpoint, body).await.map(|_| ())
    }

    /// Send a JSON body and return the raw 2xx response body
    pub async fn send_raw_json<B: Serialize + ?Sized>(&self, endpoint: &Endpoint, body: &B) -> ApiResult<Bytes> {
        let encoded = serde_json::to_vec(body)
            .map_err(|e| ApiError::InvalidRequest(format!("JSON serialize failed: {}", e)))?;
        let request = self
            .request(endpoint)?
            .with_body(RequestBody::Json(Bytes::from(encoded)));
        self.execute(request).await
    }

    /// Multipart upload: every metadata entry becomes a text part, the file is last
    pub async fn upload(
        &self,
        endpoint: &Endpoint,
        file_bytes: Bytes,
        file_name: &str,
        mime_type: &str,
        metadata: &BTreeMap<String, String>,
    ) -> ApiResult<UploadResult> {
        let form = MultipartForm {
            fields: metadata
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            file: FilePart {
                field_name: "file".to_string(),
                file_name: file_name.to_string(),
                mime_type: mime_type.to_string(),
                bytes: file_bytes,
            },
        };
        let request = self
            .request(endpoint)?
            .with_body(RequestBody::Multipart(form));
        let body = self.execute(request).await?;
        if body.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(UploadResult::default());
        }
        decode(&body)
    }

    /// Runs `request` under the retry policy and returns the 2xx body
    pub async fn execute(&self, request: HttpRequest) -> ApiResult<Bytes> {
        let mut last_error = None;

        for attempt in 1..=self.max_attempts {
            if self.cancel.is_cancelled() {
                return Err(ApiError::Cancelled);
            }

            let error = match self.transport.execute(request.clone(), self.timeout).await {
                Ok(response) if response.is_success() => return Ok(response.body),
                Ok(response) if !(100..=599).contains(&response.status) => {
                    ApiError::InvalidResponse(format!("status code {}", response.status))
                }
                Ok(response) => ApiError::Http {
                    status: response.status,
                    message: response.text().unwrap_or_default().to_string(),
                },
                Err(e) => e,
            };

            if !error.is_retryable() {
                log::debug!(
                    "{} {} failed without retry: {}",
                    request.method,
                    request.url,
                    error
                );
                return Err(error);
            }

            if attempt < self.max_attempts {
                let delay = backoff_delay(self.retry_delay, attempt);
                log::warn!(
                    "{} {} failed (attempt {}/{}): {}. Retrying in {:?}...",
                    request.method,
                    request.url,
                    attempt,
                    self.max_attempts,
                    error,
                    delay
                );
                tokio::select! {
                    _ = self.cancel.cancelled() => return Err(ApiError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            } else {
                log::warn!(
                    "{} {} failed after {} attempts: {}",
                    request.method,
                    request.url,
                    attempt,
                    error
                );
            }
            last_error = Some(error);
        }

        Err(last_error.unwrap_or_else(|| ApiError::Unknown("no attempt was made".to_string())))
    }
}

fn decode<R: DeserializeOwned>(body: &[u8]) -> ApiResult<R> {
    serde_json::from_slice(body).map_err(|e| ApiError::Decoding(e.to_string()))
}
