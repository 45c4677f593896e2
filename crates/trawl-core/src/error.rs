use thiserror::Error;

/// Application-wide error types for trawl.
#[derive(Error, Debug)]
pub enum AppError {
    /// HTTP request failed (non-2xx status or unreadable body).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// The channel backend failed to enqueue, lease, or acknowledge a message.
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// The remote API reported a resource-level failure, or its success flag
    /// was missing or malformed.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Persisting a fetched page failed.
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A blocking wait was interrupted by the cancellation signal.
    #[error("Operation cancelled")]
    Cancelled,

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error is caused by an unreachable collaborator
    /// (fetch target or channel backend) rather than by the data itself.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::NetworkError(_) | AppError::Timeout(_) | AppError::ChannelError(_) => true,
            AppError::HttpError(msg) => {
                msg.contains("HTTP 429") || msg.contains("HTTP 5") || msg.contains("reset")
            }
            _ => false,
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::StorageError(err.to_string())
    }
}
