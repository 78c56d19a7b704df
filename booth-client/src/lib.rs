//! # Booth Client
//!
//! HTTP client for the FotoX photobooth backends.
//!
//! This crate provides:
//! - Declarative endpoints and a pure request builder
//! - A retrying client (timeout, linear backoff, retryable/fatal classification)
//! - Typed clients for the Pi REST API and the presign/complete relay
//!
//! ## Retry policy
//!
//! 2xx succeeds. 408, 429, 5xx, timeouts and connectivity failures are retried
//! up to `max_attempts` times with `retry_delay * attempt` between tries; any
//! other status fails at once. Decoding errors are never retried.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use booth_client::{ClientConfig, PiApi, ReqwestTransport};
//! use std::sync::Arc;
//!
//! let transport = Arc::new(ReqwestTransport::new("FotoX/1.0")?);
//! let pi = PiApi::with_transport(transport, ClientConfig::new("http://fotox.local/api"));
//! let events = pi.list_events().await?;
//! ```

pub mod client;
pub mod endpoint;
pub mod error;
pub mod models;
pub mod pi_api;
pub mod transport;
pub mod worker_api;

pub use client::{backoff_delay, ApiClient, ClientConfig, DEFAULT_USER_AGENT};
pub use endpoint::{build_request, Endpoint, HttpRequest, HttpResponse, Method, RequestBody};
pub use error::{ApiError, ApiResult};
pub use models::{
    CompleteRequest, CompleteResponse, CompletedAsset, CreateSessionRequest, EmailRequest, Event,
    PresignRequest, PresignResponse, SessionDescriptor, UploadResult,
};
pub use pi_api::{PiApi, DEFAULT_PI_BASE_URL};
pub use transport::{HttpTransport, ReqwestTransport};
pub use worker_api::{WorkerApi, WORKER_KEY_HEADER};

#[cfg(any(test, feature = "test-util"))]
pub use transport::{RecordedCall, StubTransport};
