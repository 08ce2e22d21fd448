//! Storage errors and their conversion into the core error type.

use solarsync_core::errors::{DatabaseError, Error};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(#[from] diesel::ConnectionError),

    #[error("Query failed: {0}")]
    QueryFailed(#[from] diesel::result::Error),

    #[error("Connection pool error: {0}")]
    PoolError(#[from] diesel::r2d2::PoolError),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The writer thread is gone or dropped a reply.
    #[error("Writer unavailable: {0}")]
    WriterUnavailable(String),
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        let db_error = match err {
            StorageError::ConnectionFailed(e) => DatabaseError::ConnectionFailed(e.to_string()),
            StorageError::QueryFailed(diesel::result::Error::NotFound) => {
                DatabaseError::NotFound("Record not found".to_string())
            }
            StorageError::QueryFailed(e) => DatabaseError::QueryFailed(e.to_string()),
            StorageError::PoolError(e) => DatabaseError::ConnectionFailed(e.to_string()),
            StorageError::MigrationFailed(message) => DatabaseError::MigrationFailed(message),
            StorageError::Io(e) => DatabaseError::Internal(e.to_string()),
            StorageError::WriterUnavailable(message) => DatabaseError::Internal(message),
        };
        Error::Database(db_error)
    }
}
