use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Event configured on the booth backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub is_active: bool,
}

/// Body of `POST /sessions`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub session_id: String,
    pub event_id: String,
    /// RFC 3339 capture timestamp
    pub created_at: String,
    pub asset_count: usize,
}

/// Session as known by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDescriptor {
    pub id: String,
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub public_url: Option<String>,
}

/// Acknowledgement of `POST /sessions/{id}/assets`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Body of `POST /sessions/{id}/email`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailRequest {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Body of `POST /presign`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignRequest {
    pub session_id: String,
    pub event_id: String,
    pub asset_id: String,
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    /// Destination path requested by the booth
    pub key: String,
}

fn default_put() -> String {
    "PUT".to_string()
}

/// Temporary write destination issued by the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignResponse {
    pub upload_url: String,
    #[serde(default = "default_put")]
    pub method: String,
    /// Headers the transfer must carry for the signature to match
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Object key the relay will finalize
    pub key: String,
    #[serde(default)]
    pub expires_at: Option<String>,
}

/// One transferred object listed in a complete call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedAsset {
    pub asset_id: String,
    pub key: String,
    pub kind: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub strip_index: u32,
    pub sequence_index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poster_key: Option<String>,
}

/// Body of `POST /complete`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequest {
    pub session_id: String,
    pub event_id: String,
    pub assets: Vec<CompletedAsset>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteResponse {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub public_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presign_response_defaults() {
        let json = r#"{"uploadUrl":"https://r2.example.com/x?sig=1","key":"events/e1/s1/a.jpg"}"#;
        let response: PresignResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.method, "PUT");
        assert!(response.headers.is_empty());
        assert_eq!(response.expires_at, None);
    }

    #[test]
    fn test_email_request_omits_empty_message() {
        let request = EmailRequest {
            email: "guest@example.com".to_string(),
            message: None,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(json, r#"{"email":"guest@example.com"}"#);
    }
}
