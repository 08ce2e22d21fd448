//! Boundaries between the sync engine and its collaborators.
//!
//! Reads are synchronous, writes are async because they are serialized through
//! the storage writer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::checkpoint::SyncCheckpoint;
use super::entitlement::{ActingUser, Entitlement};
use super::entity::SyncEntity;
use super::record::{DirtyAck, LocalAttributeSet, MergeStats, SyncableRecord, WirePayload};
use crate::errors::{Result, SyncError};

/// Local storage handle used by the engine.
#[async_trait]
pub trait LocalSyncStore: Send + Sync {
    /// Records of one entity. Only dirty ones unless `include_clean` is set
    /// (forced full push).
    fn list_records(&self, entity: SyncEntity, include_clean: bool)
        -> Result<Vec<SyncableRecord>>;

    /// Clears `is_dirty` for acknowledged rows whose `dirty_seq` still equals
    /// the observed value. Returns the number of rows cleared.
    async fn clear_dirty(&self, entity: SyncEntity, acks: Vec<DirtyAck>) -> Result<usize>;

    /// Merges pulled records by uuid in a single transaction, never dirtying them.
    async fn merge_remote(
        &self,
        entity: SyncEntity,
        records: Vec<LocalAttributeSet>,
    ) -> Result<MergeStats>;

    fn last_successful_checkpoint(&self) -> Result<Option<SyncCheckpoint>>;

    /// Appends a checkpoint as a dirty `sync_logs` row.
    async fn append_checkpoint(&self, checkpoint: SyncCheckpoint) -> Result<()>;

    /// All checkpoints, newest first.
    fn list_checkpoints(&self) -> Result<Vec<SyncCheckpoint>>;

    fn load_acting_user(&self) -> Result<Option<ActingUser>>;

    fn entitlements_for(&self, user_uuid: &str) -> Result<Vec<Entitlement>>;

    /// Persisted lock: any of the user's subscriptions carries `tampered = 1`.
    fn is_tamper_locked(&self, user_uuid: &str) -> Result<bool>;

    /// Marks the entitlements tampered and logs the session out. Both writes
    /// go through the dirty ledger.
    async fn apply_tamper_verdict(
        &self,
        entitlement_uuids: Vec<String>,
        auth_uuid: String,
    ) -> Result<()>;
}

/// Authenticated remote-call handle.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Bearer token for subsequent calls; `None` falls back to the anon key.
    fn set_access_token(&self, token: Option<String>);

    /// Idempotent upsert keyed on `id`. Returns the applied records.
    async fn upsert_batch(
        &self,
        collection: &str,
        records: Vec<WirePayload>,
    ) -> std::result::Result<Vec<WirePayload>, SyncError>;

    /// Records of `collection` changed strictly after `since`.
    async fn pull_changes(
        &self,
        collection: &str,
        since: DateTime<Utc>,
    ) -> std::result::Result<Vec<WirePayload>, SyncError>;

    /// Remote-authoritative UTC time.
    async fn server_time(&self) -> std::result::Result<DateTime<Utc>, SyncError>;
}

/// Blob storage handle.
#[async_trait]
pub trait BlobUploader: Send + Sync {
    /// Uploads (upserting) and returns the public reference URL.
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> std::result::Result<String, SyncError>;
}
