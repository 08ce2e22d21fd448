//! Sync checkpoints: the append-only run log stored in `sync_logs`.

use chrono::{DateTime, TimeZone, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

use super::entity::SyncEntity;
use super::record::{format_timestamp, new_record_uuid, parse_timestamp};

/// Whether a run pulled everything or only changes since a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncKind {
    Full,
    Incremental,
}

impl SyncKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "full" => Some(Self::Full),
            "incremental" => Some(Self::Incremental),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Success,
    Failed,
}

impl CheckpointStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// What a checkpoint covers. Stored in the `table_name` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "entity")]
pub enum CheckpointScope {
    All,
    Entity(SyncEntity),
}

impl CheckpointScope {
    const ALL_MARKER: &'static str = "all";

    pub fn as_column_value(&self) -> &'static str {
        match self {
            Self::All => Self::ALL_MARKER,
            Self::Entity(entity) => entity.table_name(),
        }
    }

    pub fn from_column_value(value: &str) -> Option<Self> {
        if value == Self::ALL_MARKER {
            return Some(Self::All);
        }
        SyncEntity::from_table_name(value).map(Self::Entity)
    }
}

/// One persisted run record. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCheckpoint {
    pub uuid: String,
    pub sync_kind: SyncKind,
    pub scope: CheckpointScope,
    pub status: CheckpointStatus,
    pub actor_uuid: Option<String>,
    pub created_at: String,
}

impl SyncCheckpoint {
    /// Builds a whole-run checkpoint stamped at `at`.
    pub fn for_run(
        sync_kind: SyncKind,
        status: CheckpointStatus,
        actor_uuid: Option<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            uuid: new_record_uuid(),
            sync_kind,
            scope: CheckpointScope::All,
            status,
            actor_uuid,
            created_at: format_timestamp(at),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == CheckpointStatus::Success
    }
}

/// Lower bound used when no successful checkpoint exists.
pub fn checkpoint_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// The `since` bound for the next pull: the `created_at` of the most recent
/// successful checkpoint, or the epoch default.
pub fn pull_lower_bound(last_success: Option<&SyncCheckpoint>) -> DateTime<Utc> {
    match last_success {
        Some(checkpoint) => parse_timestamp(&checkpoint.created_at).unwrap_or_else(|| {
            warn!(
                "[Sync] Checkpoint {} has unreadable created_at '{}', pulling from epoch",
                checkpoint.uuid, checkpoint.created_at
            );
            checkpoint_epoch()
        }),
        None => checkpoint_epoch(),
    }
}

/// A run is a full sync when no prior success bounds the pull.
pub fn sync_kind_for(last_success: Option<&SyncCheckpoint>) -> SyncKind {
    if last_success.is_some() {
        SyncKind::Incremental
    } else {
        SyncKind::Full
    }
}
