use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use serde_json::{Map, Value};

use solarsync_core::sync::{
    ActingUser, DirtyAck, Entitlement, LocalAttributeSet, LocalSyncStore, MergeStats,
    SyncCheckpoint, SyncEntity, SyncableRecord,
};
use solarsync_core::Result;

use crate::db::{get_connection, DbPool, WriteHandle};
use crate::{checkpoints, ledger, session};

/// SQLite-backed [`LocalSyncStore`]. Reads use pooled connections; every
/// write goes through the single writer.
pub struct SqliteSyncStore {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl SqliteSyncStore {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }

    /// Creates a record through the dirty ledger and returns its uuid.
    pub async fn create_record(
        &self,
        entity: SyncEntity,
        attributes: Map<String, Value>,
        blobs: BTreeMap<String, Vec<u8>>,
    ) -> Result<String> {
        self.writer
            .exec(move |conn| ledger::insert_local_record(conn, entity, &attributes, &blobs))
            .await
    }

    /// Applies a local edit; the row becomes dirty.
    pub async fn update_record(
        &self,
        entity: SyncEntity,
        uuid: String,
        changes: Map<String, Value>,
        blobs: BTreeMap<String, Vec<u8>>,
    ) -> Result<()> {
        self.writer
            .exec(move |conn| ledger::record_local_write(conn, entity, &uuid, &changes, &blobs))
            .await
    }

    pub async fn delete_record(&self, entity: SyncEntity, uuid: String) -> Result<()> {
        self.writer
            .exec(move |conn| ledger::soft_delete(conn, entity, &uuid))
            .await
    }

    pub fn get_record(&self, entity: SyncEntity, uuid: &str) -> Result<Option<SyncableRecord>> {
        let mut conn = get_connection(&self.pool)?;
        ledger::get_record(&mut conn, entity, uuid)
    }
}

#[async_trait]
impl LocalSyncStore for SqliteSyncStore {
    fn list_records(
        &self,
        entity: SyncEntity,
        include_clean: bool,
    ) -> Result<Vec<SyncableRecord>> {
        let mut conn = get_connection(&self.pool)?;
        ledger::load_records(&mut conn, entity, include_clean)
    }

    async fn clear_dirty(&self, entity: SyncEntity, acks: Vec<DirtyAck>) -> Result<usize> {
        if acks.is_empty() {
            return Ok(0);
        }
        self.writer
            .exec(move |conn| ledger::clear_dirty_observed(conn, entity, &acks))
            .await
    }

    async fn merge_remote(
        &self,
        entity: SyncEntity,
        records: Vec<LocalAttributeSet>,
    ) -> Result<MergeStats> {
        if records.is_empty() {
            return Ok(MergeStats::default());
        }
        let stats = self
            .writer
            .exec(move |conn| ledger::merge_remote_records(conn, entity, &records))
            .await?;
        debug!(
            "[Storage] Merged {}: {} inserted, {} updated",
            entity.table_name(),
            stats.inserted,
            stats.updated
        );
        Ok(stats)
    }

    fn last_successful_checkpoint(&self) -> Result<Option<SyncCheckpoint>> {
        let mut conn = get_connection(&self.pool)?;
        checkpoints::last_successful_checkpoint(&mut conn)
    }

    async fn append_checkpoint(&self, checkpoint: SyncCheckpoint) -> Result<()> {
        self.writer
            .exec(move |conn| checkpoints::append_checkpoint(conn, &checkpoint))
            .await
    }

    fn list_checkpoints(&self) -> Result<Vec<SyncCheckpoint>> {
        let mut conn = get_connection(&self.pool)?;
        checkpoints::list_checkpoints(&mut conn)
    }

    fn load_acting_user(&self) -> Result<Option<ActingUser>> {
        let mut conn = get_connection(&self.pool)?;
        session::load_acting_user(&mut conn)
    }

    fn entitlements_for(&self, user_uuid: &str) -> Result<Vec<Entitlement>> {
        let mut conn = get_connection(&self.pool)?;
        session::entitlements_for(&mut conn, user_uuid)
    }

    fn is_tamper_locked(&self, user_uuid: &str) -> Result<bool> {
        let mut conn = get_connection(&self.pool)?;
        session::is_tamper_locked(&mut conn, user_uuid)
    }

    async fn apply_tamper_verdict(
        &self,
        entitlement_uuids: Vec<String>,
        auth_uuid: String,
    ) -> Result<()> {
        self.writer
            .exec(move |conn| session::apply_tamper_verdict(conn, &entitlement_uuids, &auth_uuid))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{spawn_writer, test_pool};
    use serde_json::json;
    use solarsync_core::DatabaseError;
    use solarsync_core::Error;

    fn attrs(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn dirty_listing_follows_push_acknowledgment() {
        let (_dir, pool) = test_pool();
        let store = SqliteSyncStore::new(pool.clone(), spawn_writer(pool.as_ref().clone()));

        let uuid = store
            .create_record(
                SyncEntity::Customer,
                attrs(json!({ "full_name": "Amna" })),
                BTreeMap::new(),
            )
            .await
            .unwrap();
        let dirty = store.list_records(SyncEntity::Customer, false).unwrap();
        assert_eq!(dirty.len(), 1);

        let cleared = store
            .clear_dirty(SyncEntity::Customer, vec![dirty[0].dirty_ack()])
            .await
            .unwrap();
        assert_eq!(cleared, 1);
        assert!(store.list_records(SyncEntity::Customer, false).unwrap().is_empty());
        assert_eq!(store.list_records(SyncEntity::Customer, true).unwrap().len(), 1);

        store
            .update_record(
                SyncEntity::Customer,
                uuid.clone(),
                attrs(json!({ "email": "amna@example.com" })),
                BTreeMap::new(),
            )
            .await
            .unwrap();
        let record = store.get_record(SyncEntity::Customer, &uuid).unwrap().unwrap();
        assert!(record.is_dirty);
    }

    #[tokio::test]
    async fn failed_merge_rolls_back_the_whole_entity() {
        let (_dir, pool) = test_pool();
        let store = SqliteSyncStore::new(pool.clone(), spawn_writer(pool.as_ref().clone()));

        let good = LocalAttributeSet {
            uuid: "c-good".to_string(),
            attributes: attrs(json!({ "uuid": "c-good", "full_name": "Good" })),
        };
        // `full_name` is NOT NULL; this record aborts the batch.
        let bad = LocalAttributeSet {
            uuid: "c-bad".to_string(),
            attributes: attrs(json!({ "uuid": "c-bad" })),
        };

        let err = store
            .merge_remote(SyncEntity::Customer, vec![good, bad])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Database(DatabaseError::QueryFailed(_))));
        assert!(store.get_record(SyncEntity::Customer, "c-good").unwrap().is_none());
    }

    #[tokio::test]
    async fn deleted_record_stays_listed_for_push() {
        let (_dir, pool) = test_pool();
        let store = SqliteSyncStore::new(pool.clone(), spawn_writer(pool.as_ref().clone()));
        let uuid = store
            .create_record(
                SyncEntity::Organization,
                attrs(json!({ "name": "Sun Co" })),
                BTreeMap::new(),
            )
            .await
            .unwrap();
        store
            .delete_record(SyncEntity::Organization, uuid.clone())
            .await
            .unwrap();

        let dirty = store.list_records(SyncEntity::Organization, false).unwrap();
        assert_eq!(dirty.len(), 1);
        assert!(dirty[0].deleted_at.is_some());
    }
}
