//! Error types for the cloud sync crate.

use solarsync_core::SyncError;
use thiserror::Error;

/// Result type alias for remote client operations.
pub type Result<T> = std::result::Result<T, CloudSyncError>;

/// Errors raised while talking to the remote store.
#[derive(Debug, Error)]
pub enum CloudSyncError {
    /// HTTP client error (connect, timeout, body)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error response from the remote store
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Request could not be built (bad path, header value, ...)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Authentication error (unusable key or token)
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Missing or malformed configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CloudSyncError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// HTTP status if this is an API error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True for availability failures: transport errors, timeouts and
    /// server-side statuses. Everything else is a rejection.
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Api { status, .. } => matches!(*status, 408 | 429 | 500..=599),
            Self::Json(_) | Self::InvalidRequest(_) | Self::Auth(_) | Self::Config(_) => false,
        }
    }

    /// Maps an upload failure onto the engine taxonomy.
    pub fn into_blob_error(self) -> SyncError {
        SyncError::blob_upload(self.to_string())
    }
}

impl From<CloudSyncError> for SyncError {
    fn from(err: CloudSyncError) -> Self {
        if err.is_unavailable() {
            SyncError::remote_call(err.to_string())
        } else {
            SyncError::rejected(err.to_string())
        }
    }
}
