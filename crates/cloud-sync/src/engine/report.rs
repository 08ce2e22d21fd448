//! Structured results returned by the engine. Callers never see raw errors.

use serde::Serialize;
use solarsync_core::sync::SyncEntity;
use solarsync_core::{Error, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Ok,
    Failed,
    /// The account is locked for clock tampering; only pulls ran.
    TamperLock,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Failed => "failed",
            Self::TamperLock => "tamper_lock",
        }
    }
}

/// Stable code for an engine error.
pub fn error_code(err: &Error) -> &'static str {
    match err {
        Error::Sync(sync) => sync.code(),
        Error::Database(_) => "local_storage_error",
        Error::Json(_) => "serialization_error",
        Error::Validation(_) => "validation_error",
    }
}

/// One entity whose push or pull did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityFailure {
    pub entity: String,
    pub code: String,
    pub message: String,
}

impl EntityFailure {
    pub fn new(entity: SyncEntity, err: &Error) -> Self {
        let message = match err {
            Error::Sync(sync) => sync.to_string(),
            other => other.to_string(),
        };
        Self {
            entity: entity.table_name().to_string(),
            code: error_code(err).to_string(),
            message,
        }
    }

    pub fn from_sync(entity: SyncEntity, err: SyncError) -> Self {
        Self::new(entity, &Error::Sync(err))
    }
}

/// Per-run push summary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushReport {
    /// Records acknowledged by the remote store.
    pub pushed: usize,
    /// Entities whose batch came back without confirmation; still dirty.
    pub unconfirmed: Vec<SyncEntity>,
    pub failures: Vec<EntityFailure>,
}

impl PushReport {
    pub fn absorb(&mut self, other: PushReport) {
        self.pushed += other.pushed;
        self.unconfirmed.extend(other.unconfirmed);
        self.failures.extend(other.failures);
    }
}

/// Per-run pull summary. Pull stops at the first failing entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullReport {
    pub pulled: usize,
    pub failure: Option<EntityFailure>,
}

impl PullReport {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

/// Result of one orchestrated call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub status: SyncStatus,
    pub detail: String,
    pub duration_ms: i64,
    pub pushed: usize,
    pub pulled: usize,
    pub failures: Vec<EntityFailure>,
}

impl SyncOutcome {
    pub fn is_ok(&self) -> bool {
        self.status == SyncStatus::Ok
    }
}
