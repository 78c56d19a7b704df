//! Client for the booth's primary REST API

use crate::client::{ApiClient, ClientConfig};
use crate::endpoint::Endpoint;
use crate::error::ApiResult;
use crate::models::{CreateSessionRequest, EmailRequest, Event, SessionDescriptor, UploadResult};
use crate::transport::HttpTransport;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Default address of the Pi on the booth network
pub const DEFAULT_PI_BASE_URL: &str = "http://fotox.local/api";

/// Typed access to `/events` and `/sessions`
#[derive(Debug)]
pub struct PiApi<T> {
    client: ApiClient<T>,
}

impl<T: HttpTransport> PiApi<T> {
    pub fn new(client: ApiClient<T>) -> Self {
        Self { client }
    }

    pub fn with_transport(transport: Arc<T>, config: ClientConfig) -> Self {
        Self::new(ApiClient::new(transport, config))
    }

    /// Underlying retrying client, e.g. to change the base URL at runtime
    pub fn client(&self) -> &ApiClient<T> {
        &self.client
    }

    pub async fn list_events(&self) -> ApiResult<Vec<Event>> {
        self.client.fetch_decoded(&Endpoint::get("events")).await
    }

    pub async fn get_event(&self, event_id: &str) -> ApiResult<Event> {
        self.client
            .fetch_decoded(&Endpoint::get(format!("events/{}", event_id)))
            .await
    }

    pub async fn create_session(&self, request: &CreateSessionRequest) -> ApiResult<SessionDescriptor> {
        self.client.send(&Endpoint::post("sessions"), request).await
    }

    /// Upload one asset of a session as multipart form data
    pub async fn upload_asset(
        &self,
        session_id: &str,
        file_bytes: Bytes,
        file_name: &str,
        mime_type: &str,
        metadata: &BTreeMap<String, String>,
    ) -> ApiResult<UploadResult> {
        let endpoint = Endpoint::post(format!("sessions/{}/assets", session_id));
        self.client
            .upload(&endpoint, file_bytes, file_name, mime_type, metadata)
            .await
    }

    /// QR code image pointing at the session's public gallery
    pub async fn session_qr(&self, session_id: &str) -> ApiResult<Bytes> {
        let endpoint =
            Endpoint::get(format!("sessions/{}/qr", session_id)).with_header("Accept", "image/*");
        self.client.fetch(&endpoint).await
    }

    pub async fn send_email(&self, session_id: &str, request: &EmailRequest) -> ApiResult<()> {
        let endpoint = Endpoint::post(format!("sessions/{}/email", session_id));
        self.client.send_unit(&endpoint, request).await
    }
}
