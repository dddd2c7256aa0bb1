use thiserror::Error;

/// Custom error types for the relay server
#[derive(Debug, Error)]
pub enum RelayError {
    /// Live-session lifecycle errors
    #[error("Teacher {0} is already live")]
    AlreadyLive(String),

    #[error("No live session for teacher {0}")]
    NotLive(String),

    /// Room and connection management errors
    #[error("Room for teacher {0} not found")]
    RoomNotFound(String),

    #[error("Connection {0} not found")]
    ConnectionNotFound(String),

    #[error("Outbound channel closed for connection {0}")]
    ChannelClosed(String),

    /// Signaling errors
    #[error("Invalid signaling message: {0}")]
    InvalidSignalingMessage(String),

    #[error("Failed to serialize message: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    /// Persistence collaborator errors
    #[error("Artifact upload failed: {0}")]
    UploadFailed(String),

    #[error("Session record store failed: {0}")]
    RecordStoreFailed(String),

    /// Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Generic errors
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Convenience type alias for Results using RelayError
pub type Result<T> = std::result::Result<T, RelayError>;

impl RelayError {
    /// Helper to create Internal errors with context
    pub fn internal(msg: impl Into<String>) -> Self {
        RelayError::Internal(msg.into())
    }

    /// Helper to create upload errors
    pub fn upload(msg: impl Into<String>) -> Self {
        RelayError::UploadFailed(msg.into())
    }

    /// Helper to create record store errors
    pub fn record_store(msg: impl Into<String>) -> Self {
        RelayError::RecordStoreFailed(msg.into())
    }
}
