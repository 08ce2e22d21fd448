//! Error types shared across the Solarsync crates.

use thiserror::Error;

/// Result type alias for core and storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error for local storage and sync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Local database failure
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Sync protocol failure
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Caller supplied an invalid write (unknown table, protected column, ...)
    #[error("Invalid input: {0}")]
    Validation(String),
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

/// Local database failures.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Sync failures, following the engine's error taxonomy.
///
/// `TamperLock` is deliberately absent: a locked account is a gating outcome
/// reported by the orchestrator, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Transport or availability failure (network, timeout, 5xx).
    #[error("Remote call failed: {0}")]
    RemoteCallFailed(String),

    /// Business-rule rejection returned by the remote store.
    #[error("Remote rejected request: {0}")]
    RemoteRejected(String),

    /// Blob storage refused or failed an upload.
    #[error("Blob upload failed: {0}")]
    BlobUploadFailed(String),

    /// A local or remote record could not be mapped.
    #[error("Mapping failed for {entity}: {message}")]
    Mapping { entity: String, message: String },

    /// The remote time authority could not be reached.
    #[error("Clock authority unavailable: {0}")]
    ClockAuthorityUnavailable(String),
}

impl SyncError {
    pub fn remote_call(message: impl Into<String>) -> Self {
        Self::RemoteCallFailed(message.into())
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::RemoteRejected(message.into())
    }

    pub fn blob_upload(message: impl Into<String>) -> Self {
        Self::BlobUploadFailed(message.into())
    }

    pub fn mapping(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Mapping {
            entity: entity.into(),
            message: message.into(),
        }
    }

    /// Stable machine-readable code, used in cycle reports.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RemoteCallFailed(_) => "remote_call_failed",
            Self::RemoteRejected(_) => "remote_rejected",
            Self::BlobUploadFailed(_) => "blob_upload_failed",
            Self::Mapping { .. } => "mapping_error",
            Self::ClockAuthorityUnavailable(_) => "clock_authority_unavailable",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_error_converts_into_top_level_error() {
        let err: Error = SyncError::rejected("duplicate license").into();
        assert!(matches!(err, Error::Sync(SyncError::RemoteRejected(_))));
        assert_eq!(
            err.to_string(),
            "Sync error: Remote rejected request: duplicate license"
        );
    }

    #[test]
    fn mapping_error_names_entity() {
        let err = SyncError::mapping("projects", "missing user_uuid");
        assert_eq!(err.code(), "mapping_error");
        assert_eq!(
            err.to_string(),
            "Mapping failed for projects: missing user_uuid"
        );
    }
}
