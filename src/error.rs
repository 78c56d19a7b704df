use booth_client::ApiError;
use std::fmt;
use upload_queue::QueueError;

/// Central error type of the uploader binary
#[derive(Debug)]
pub enum AppError {
    /// Settings file unreadable or invalid
    Config(String),
    /// Filesystem error
    Filesystem(std::io::Error),
    /// Queue store or worker error
    Queue(QueueError),
    /// Backend request failed
    Api(ApiError),
    /// Invalid command line input
    Validation(String),
    /// Resource not found
    NotFound(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AppError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Filesystem(e) => write!(f, "Filesystem error: {}", e),
            AppError::Queue(e) => write!(f, "Queue error: {}", e),
            AppError::Api(e) => write!(f, "{}", e),
            AppError::Validation(msg) => write!(f, "Validation error: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Filesystem(e)
    }
}

impl From<QueueError> for AppError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::Api(api) => AppError::Api(api),
            QueueError::SessionNotFound(id) => AppError::NotFound(format!("Session {}", id)),
            other => AppError::Queue(other),
        }
    }
}

impl From<ApiError> for AppError {
    fn from(e: ApiError) -> Self {
        AppError::Api(e)
    }
}

impl From<toml::de::Error> for AppError {
    fn from(e: toml::de::Error) -> Self {
        AppError::Config(e.to_string())
    }
}

impl From<toml::ser::Error> for AppError {
    fn from(e: toml::ser::Error) -> Self {
        AppError::Config(e.to_string())
    }
}

/// Messages for the booth operator
impl AppError {
    pub fn user_message(&self) -> String {
        match self {
            AppError::Config(msg) => format!("Please check the uploader settings: {}", msg),
            AppError::Filesystem(_) => {
                "Error accessing files. Please check storage permissions.".to_string()
            }
            AppError::Queue(QueueError::Json(_)) => {
                "The upload queue file is damaged. Please contact support.".to_string()
            }
            AppError::Queue(QueueError::Locked(_)) => {
                "Another uploader is running on this queue. Stop it first.".to_string()
            }
            AppError::Queue(e) => e.to_string(),
            AppError::Api(e) => e.user_message(),
            AppError::Validation(msg) => msg.clone(),
            AppError::NotFound(msg) => format!("{} was not found.", msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_errors_are_unwrapped() {
        let err: AppError = QueueError::Api(ApiError::Timeout).into();
        assert!(matches!(err, AppError::Api(ApiError::Timeout)));

        let err: AppError = QueueError::SessionNotFound("s1".to_string()).into();
        assert_eq!(err.user_message(), "Session s1 was not found.");

        let err: AppError = QueueError::Locked("/data/upload_queue.json".to_string()).into();
        assert!(err.user_message().starts_with("Another uploader is running"));
    }
}
