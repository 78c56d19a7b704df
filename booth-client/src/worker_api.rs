//! Client for the presign/complete relay
//!
//! The relay hands out temporary write destinations (`POST /presign`), the
//! booth transfers bytes there directly, and then reports the finished
//! session (`POST /complete`). Every relay call carries a shared secret in
//! [`WORKER_KEY_HEADER`].

use crate::client::{ApiClient, ClientConfig};
use crate::endpoint::{Endpoint, HttpRequest, Method, RequestBody};
use crate::error::{ApiError, ApiResult};
use crate::models::{CompleteRequest, CompleteResponse, PresignRequest, PresignResponse};
use crate::transport::HttpTransport;
use bytes::Bytes;
use std::sync::{Arc, RwLock};
use url::Url;

pub const WORKER_KEY_HEADER: &str = "X-FotoX-Key";

#[derive(Debug)]
pub struct WorkerApi<T> {
    client: ApiClient<T>,
    key: RwLock<Option<String>>,
}

impl<T: HttpTransport> WorkerApi<T> {
    pub fn new(client: ApiClient<T>, key: Option<String>) -> Self {
        Self {
            client,
            key: RwLock::new(key),
        }
    }

    pub fn with_transport(transport: Arc<T>, config: ClientConfig, key: Option<String>) -> Self {
        Self::new(ApiClient::new(transport, config), key)
    }

    pub fn client(&self) -> &ApiClient<T> {
        &self.client
    }

    /// Replace the shared secret, e.g. after the operator re-pairs the booth
    pub fn set_key(&self, key: Option<String>) {
        let mut guard = match self.key.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = key;
    }

    fn require_key(&self) -> ApiResult<String> {
        let guard = match self.key.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match guard.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => Ok(key.to_string()),
            _ => Err(ApiError::UploadFailed("missing worker key".to_string())),
        }
    }

    /// Ask the relay for a presigned destination
    pub async fn presign(&self, request: &PresignRequest) -> ApiResult<PresignResponse> {
        let key = self.require_key()?;
        let endpoint = Endpoint::post("presign").with_header(WORKER_KEY_HEADER, key);
        self.client.send(&endpoint, request).await
    }

    /// Tell the relay that every object of a session has been transferred
    pub async fn complete(&self, request: &CompleteRequest) -> ApiResult<CompleteResponse> {
        let key = self.require_key()?;
        let endpoint = Endpoint::post("complete").with_header(WORKER_KEY_HEADER, key);
        let body = self.client.send_raw_json(&endpoint, request).await?;
        if body.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(CompleteResponse::default());
        }
        serde_json::from_slice(&body).map_err(|e| ApiError::Decoding(e.to_string()))
    }

    /// Transfer bytes to a presigned destination under the same retry policy
    ///
    /// The shared secret is not sent; the signature in the URL authorizes
    /// the write.
    pub async fn transfer(
        &self,
        destination: &PresignResponse,
        bytes: Bytes,
        mime_type: &str,
    ) -> ApiResult<()> {
        let url = Url::parse(&destination.upload_url).map_err(|e| {
            ApiError::InvalidResponse(format!(
                "presigned URL '{}' is invalid: {}",
                destination.upload_url, e
            ))
        })?;
        let method: Method = destination.method.parse()?;

        let mut request = HttpRequest::new(method, url).with_body(RequestBody::Raw {
            bytes,
            content_type: mime_type.to_string(),
        });
        for (name, value) in &destination.headers {
            request.set_header(name, value);
        }

        self.client.execute(request).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::StubTransport;

    fn presign_request() -> PresignRequest {
        PresignRequest {
            session_id: "s1".to_string(),
            event_id: "e1".to_string(),
            asset_id: "a1".to_string(),
            file_name: "a1.jpg".to_string(),
            mime_type: "image/jpeg".to_string(),
            size_bytes: 4,
            key: "events/e1/s1/a1.jpg".to_string(),
        }
    }

    fn relay(stub: Arc<StubTransport>, key: Option<&str>) -> WorkerApi<StubTransport> {
        WorkerApi::with_transport(
            stub,
            ClientConfig::new("https://relay.example.com"),
            key.map(str::to_string),
        )
    }

    #[tokio::test]
    async fn test_presign_without_key_makes_no_call() {
        let stub = Arc::new(StubTransport::always(200, "{}"));

        for key in [None, Some(""), Some("   ")] {
            let result = relay(stub.clone(), key).presign(&presign_request()).await;
            assert!(matches!(result, Err(ApiError::UploadFailed(_))));
        }
        let result = relay(stub.clone(), None)
            .complete(&CompleteRequest {
                session_id: "s1".to_string(),
                event_id: "e1".to_string(),
                assets: Vec::new(),
            })
            .await;
        assert!(matches!(result, Err(ApiError::UploadFailed(_))));

        assert_eq!(stub.call_count(), 0);
    }

    #[tokio::test]
    async fn test_presign_sends_key_header() {
        let stub = Arc::new(StubTransport::always(
            200,
            r#"{"uploadUrl":"https://bucket.example.com/a1.jpg?sig=x","key":"events/e1/s1/a1.jpg"}"#,
        ));
        let response = relay(stub.clone(), Some("secret"))
            .presign(&presign_request())
            .await
            .unwrap();

        assert_eq!(response.key, "events/e1/s1/a1.jpg");
        let request = &stub.calls()[0].request;
        assert_eq!(request.url.as_str(), "https://relay.example.com/presign");
        assert_eq!(request.header(WORKER_KEY_HEADER), Some("secret"));
    }

    #[tokio::test]
    async fn test_relay_error_carries_body_text() {
        let stub = Arc::new(StubTransport::always(403, "bad key"));
        let result = relay(stub, Some("wrong")).presign(&presign_request()).await;

        assert_eq!(
            result,
            Err(ApiError::Http {
                status: 403,
                message: "bad key".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_transfer_uses_presigned_headers_without_key() {
        let stub = Arc::new(StubTransport::always(200, ""));
        let destination = PresignResponse {
            upload_url: "https://bucket.example.com/a1.jpg?sig=x".to_string(),
            method: "PUT".to_string(),
            headers: [("x-amz-acl".to_string(), "private".to_string())].into(),
            key: "events/e1/s1/a1.jpg".to_string(),
            expires_at: None,
        };

        relay(stub.clone(), Some("secret"))
            .transfer(&destination, Bytes::from_static(b"jpeg"), "image/jpeg")
            .await
            .unwrap();

        let request = &stub.calls()[0].request;
        assert_eq!(request.method, Method::Put);
        assert_eq!(request.header("x-amz-acl"), Some("private"));
        assert_eq!(request.header(WORKER_KEY_HEADER), None);
        assert_eq!(request.url.host_str(), Some("bucket.example.com"));
    }
}
