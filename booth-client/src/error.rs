//! Error taxonomy shared by every request the client makes.

/// Result type for API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors that can occur while talking to the Pi API or the relay
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApiError {
    /// Base address or path does not form a valid URL
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// Request body could not be serialized
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    /// Response was not a well-formed HTTP response
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    /// Server answered with a non-2xx status
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
    /// Response body did not match the expected shape
    #[error("Decoding error: {0}")]
    Decoding(String),
    /// Generic transport failure
    #[error("Network error: {0}")]
    Network(String),
    #[error("Request timed out")]
    Timeout,
    /// DNS, connect or connection-lost failure
    #[error("Server unreachable")]
    ServerUnreachable,
    /// Upload-specific failure, e.g. missing relay credential
    #[error("Upload failed: {0}")]
    UploadFailed(String),
    /// Retry loop stopped by a shutdown request
    #[error("Request cancelled")]
    Cancelled,
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl ApiError {
    /// Whether re-attempting the same request may succeed without caller intervention
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Http { status, .. } => is_retryable_status(*status),
            ApiError::Network(_) | ApiError::Timeout | ApiError::ServerUnreachable => true,
            ApiError::InvalidConfiguration(_)
            | ApiError::InvalidRequest(_)
            | ApiError::InvalidResponse(_)
            | ApiError::Decoding(_)
            | ApiError::UploadFailed(_)
            | ApiError::Cancelled
            | ApiError::Unknown(_) => false,
        }
    }

    /// True for failures where the booth cannot reach the backend at all
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            ApiError::Timeout | ApiError::ServerUnreachable | ApiError::Network(_)
        )
    }

    /// User-friendly error message for the booth screen
    pub fn user_message(&self) -> String {
        match self {
            ApiError::InvalidConfiguration(_) => {
                "The upload server is not configured correctly.".to_string()
            }
            ApiError::InvalidRequest(_) | ApiError::Decoding(_) | ApiError::InvalidResponse(_) => {
                "Something went wrong talking to the server.".to_string()
            }
            ApiError::Http { status, .. } if (500..=599).contains(status) => {
                "The server had a problem. Please try again.".to_string()
            }
            ApiError::Http { status: 404, .. } => "Not found.".to_string(),
            ApiError::Http { status: 401 | 403, .. } => "Access was denied.".to_string(),
            ApiError::Http { .. } => "The request failed. Please try again.".to_string(),
            ApiError::Network(_) => "Network problem. Please try again.".to_string(),
            ApiError::Timeout => "The server took too long to answer.".to_string(),
            ApiError::ServerUnreachable => "Can't reach the server.".to_string(),
            ApiError::UploadFailed(_) => "Upload failed.".to_string(),
            ApiError::Cancelled => "Upload stopped.".to_string(),
            ApiError::Unknown(_) => "Something went wrong. Please try again.".to_string(),
        }
    }
}

/// 408, 429 and every 5xx status are worth another attempt
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500..=599)
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Decoding(err.to_string())
    }
}
