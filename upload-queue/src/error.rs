use booth_client::ApiError;

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors that can occur while reading, mutating or draining the queue
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Queue file error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Session {0} is already queued")]
    DuplicateSession(String),
    #[error("Session {session_id} contains asset {asset_id} more than once")]
    DuplicateAsset { session_id: String, asset_id: String },
    #[error("Unsupported media file: {0}")]
    UnsupportedFile(String),
    #[error("Upload queue {0} is in use by another uploader process")]
    Locked(String),
    #[error("Session {0} not found")]
    SessionNotFound(String),
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl QueueError {
    /// Flattens the error into the kind observers receive
    pub fn to_api_error(&self) -> ApiError {
        match self {
            QueueError::Api(e) => e.clone(),
            other => ApiError::Unknown(other.to_string()),
        }
    }
}
