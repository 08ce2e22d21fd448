//! Push engine: sends dirty records entity by entity in dependency order.

use std::collections::HashSet;

use log::{debug, info, warn};
use serde_json::Value;

use solarsync_core::sync::{
    prepare_payload, BlobUploader, DirtyAck, EntityConfig, LocalSyncStore, SyncTransport,
    WirePayload,
};
use solarsync_core::Result;

use super::report::{EntityFailure, PushReport};

/// Which records of an entity are sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushSelection {
    Dirty,
    /// Forced full push: every record, dirty or not.
    All,
}

/// What happened to one entity's batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityPush {
    Nothing,
    Confirmed { sent: usize, cleared: usize },
    /// The remote side answered without applying anything; rows stay dirty.
    Unconfirmed { sent: usize },
}

pub struct PushEngine<'a> {
    store: &'a dyn LocalSyncStore,
    transport: &'a dyn SyncTransport,
    blobs: &'a dyn BlobUploader,
    bucket: &'a str,
}

impl<'a> PushEngine<'a> {
    pub fn new(
        store: &'a dyn LocalSyncStore,
        transport: &'a dyn SyncTransport,
        blobs: &'a dyn BlobUploader,
        bucket: &'a str,
    ) -> Self {
        Self {
            store,
            transport,
            blobs,
            bucket,
        }
    }

    /// Pushes each entity in the given order. A failing entity is recorded
    /// and the loop moves on.
    pub async fn push<I>(&self, configs: I, selection: PushSelection) -> PushReport
    where
        I: IntoIterator<Item = &'static EntityConfig>,
    {
        let mut report = PushReport::default();
        for config in configs {
            match self.push_entity(config, selection).await {
                Ok(EntityPush::Nothing) => {}
                Ok(EntityPush::Confirmed { sent, cleared }) => {
                    info!(
                        "[Push] {}: {} sent, {} cleared",
                        config.local_table, sent, cleared
                    );
                    report.pushed += sent;
                }
                Ok(EntityPush::Unconfirmed { sent }) => {
                    warn!(
                        "[Push] {}: remote applied none of {} records; they stay dirty",
                        config.local_table, sent
                    );
                    report.unconfirmed.push(config.entity);
                }
                Err(err) => {
                    warn!("[Push] {} failed: {}", config.local_table, err);
                    report
                        .failures
                        .push(EntityFailure::new(config.entity, &err));
                }
            }
        }
        report
    }

    /// Maps, uploads blobs for, and upserts one entity's batch. Any mapping
    /// or upload error aborts the whole batch before the upsert.
    pub async fn push_entity(
        &self,
        config: &'static EntityConfig,
        selection: PushSelection,
    ) -> Result<EntityPush> {
        let records = self
            .store
            .list_records(config.entity, selection == PushSelection::All)?;
        if records.is_empty() {
            return Ok(EntityPush::Nothing);
        }
        debug!(
            "[Push] {}: preparing {} records",
            config.local_table,
            records.len()
        );

        let mut batch = Vec::with_capacity(records.len());
        let mut acks = Vec::with_capacity(records.len());
        for record in &records {
            let mut mapped = prepare_payload(config, record)?;
            for blob in std::mem::take(&mut mapped.blobs) {
                let url = self
                    .blobs
                    .upload(self.bucket, &blob.path, blob.bytes, blob.content_type)
                    .await?;
                mapped.resolve_blob(&blob.field, url);
            }
            acks.push(record.dirty_ack());
            batch.push(mapped.payload);
        }

        let sent = batch.len();
        let applied = self
            .transport
            .upsert_batch(config.remote_collection, batch)
            .await?;
        let acks = confirmed_acks(&applied, acks);
        if acks.is_empty() {
            return Ok(EntityPush::Unconfirmed { sent });
        }
        let cleared = self.store.clear_dirty(config.entity, acks).await?;
        Ok(EntityPush::Confirmed { sent, cleared })
    }
}

/// Acks for the records the remote side echoed back by `id`. Anything not
/// echoed stays dirty.
fn confirmed_acks(applied: &[WirePayload], acks: Vec<DirtyAck>) -> Vec<DirtyAck> {
    let ids = applied
        .iter()
        .filter_map(|record| record.get("id").and_then(Value::as_str))
        .collect::<HashSet<_>>();
    acks.into_iter()
        .filter(|ack| ids.contains(ack.uuid.as_str()))
        .collect()
}
