//! In-memory port fakes shared by the engine unit tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};

use solarsync_core::sync::{
    ActingUser, BlobUploader, DirtyAck, Entitlement, LocalAttributeSet, LocalSyncStore,
    MergeStats, SyncCheckpoint, SyncEntity, SyncTransport, SyncableRecord, WirePayload,
};
use solarsync_core::{DatabaseError, Error, Result, SyncError};

pub fn record(uuid: &str, attributes: Value) -> SyncableRecord {
    SyncableRecord {
        id: 1,
        uuid: uuid.to_string(),
        created_at: "2025-01-01T00:00:00.000Z".to_string(),
        updated_at: "2025-01-01T00:00:00.000Z".to_string(),
        deleted_at: None,
        is_dirty: true,
        dirty_seq: 1,
        attributes: attributes.as_object().cloned().unwrap_or_default(),
        blobs: BTreeMap::new(),
    }
}

pub fn wire(value: Value) -> WirePayload {
    value.as_object().cloned().unwrap_or_default()
}

pub fn paid_entitlement(uuid: &str, user_uuid: &str) -> Entitlement {
    Entitlement {
        uuid: uuid.to_string(),
        user_uuid: user_uuid.to_string(),
        status: Some("active".to_string()),
        kind: Some("annual".to_string()),
        tampered: false,
        deleted_at: None,
    }
}

pub fn acting_user() -> ActingUser {
    ActingUser {
        user_uuid: "u-1".to_string(),
        auth_uuid: "a-1".to_string(),
        is_logged_in: true,
        access_token: Some("jwt-1".to_string()),
    }
}

#[derive(Default)]
pub struct FakeStore {
    pub records: Mutex<HashMap<SyncEntity, Vec<SyncableRecord>>>,
    pub checkpoints: Mutex<Vec<SyncCheckpoint>>,
    pub user: Mutex<Option<ActingUser>>,
    pub entitlements: Mutex<Vec<Entitlement>>,
    pub failing_merge: Mutex<Option<SyncEntity>>,
    pub merged: Mutex<Vec<SyncEntity>>,
}

impl FakeStore {
    pub fn with_user() -> Self {
        let store = Self::default();
        *store.user.lock().unwrap() = Some(acting_user());
        store
    }

    pub fn insert(&self, entity: SyncEntity, record: SyncableRecord) {
        self.records
            .lock()
            .unwrap()
            .entry(entity)
            .or_default()
            .push(record);
    }

    pub fn get(&self, entity: SyncEntity, uuid: &str) -> Option<SyncableRecord> {
        self.records
            .lock()
            .unwrap()
            .get(&entity)
            .and_then(|rows| rows.iter().find(|r| r.uuid == uuid).cloned())
    }

    pub fn checkpoints(&self) -> Vec<SyncCheckpoint> {
        self.checkpoints.lock().unwrap().clone()
    }
}

#[async_trait]
impl LocalSyncStore for FakeStore {
    fn list_records(&self, entity: SyncEntity, include_clean: bool) -> Result<Vec<SyncableRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(&entity)
            .map(|rows| {
                rows.iter()
                    .filter(|r| include_clean || r.is_dirty)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn clear_dirty(&self, entity: SyncEntity, acks: Vec<DirtyAck>) -> Result<usize> {
        let mut records = self.records.lock().unwrap();
        let mut cleared = 0;
        for row in records.entry(entity).or_default().iter_mut() {
            if acks
                .iter()
                .any(|ack| ack.uuid == row.uuid && ack.observed_seq == row.dirty_seq && row.is_dirty)
            {
                row.is_dirty = false;
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    async fn merge_remote(
        &self,
        entity: SyncEntity,
        incoming: Vec<LocalAttributeSet>,
    ) -> Result<MergeStats> {
        if *self.failing_merge.lock().unwrap() == Some(entity) {
            return Err(Error::Database(DatabaseError::QueryFailed(
                "NOT NULL constraint failed".to_string(),
            )));
        }
        self.merged.lock().unwrap().push(entity);
        let mut records = self.records.lock().unwrap();
        let rows = records.entry(entity).or_default();
        let mut stats = MergeStats::default();
        for set in incoming {
            let mut attributes = set.attributes.clone();
            attributes.remove("uuid");
            match rows.iter_mut().find(|r| r.uuid == set.uuid) {
                Some(row) => {
                    row.attributes.extend(attributes);
                    row.is_dirty = false;
                    stats.updated += 1;
                }
                None => {
                    let mut row = record(&set.uuid, Value::Object(attributes));
                    row.is_dirty = false;
                    row.dirty_seq = 0;
                    rows.push(row);
                    stats.inserted += 1;
                }
            }
            if entity == SyncEntity::Subscription {
                let tampered = set.attributes.get("tampered").and_then(Value::as_bool);
                if let Some(tampered) = tampered {
                    for entitlement in self.entitlements.lock().unwrap().iter_mut() {
                        if entitlement.uuid == set.uuid {
                            entitlement.tampered = tampered;
                        }
                    }
                }
            }
        }
        Ok(stats)
    }

    fn last_successful_checkpoint(&self) -> Result<Option<SyncCheckpoint>> {
        Ok(self
            .checkpoints
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.is_success())
            .max_by(|a, b| a.created_at.cmp(&b.created_at))
            .cloned())
    }

    async fn append_checkpoint(&self, checkpoint: SyncCheckpoint) -> Result<()> {
        let mut row = record(
            &checkpoint.uuid,
            json!({ "status": checkpoint.status.as_str(), "table_name": "all" }),
        );
        row.created_at = checkpoint.created_at.clone();
        self.insert(SyncEntity::SyncLog, row);
        self.checkpoints.lock().unwrap().push(checkpoint);
        Ok(())
    }

    fn list_checkpoints(&self) -> Result<Vec<SyncCheckpoint>> {
        let mut all = self.checkpoints();
        all.reverse();
        Ok(all)
    }

    fn load_acting_user(&self) -> Result<Option<ActingUser>> {
        Ok(self.user.lock().unwrap().clone())
    }

    fn entitlements_for(&self, user_uuid: &str) -> Result<Vec<Entitlement>> {
        Ok(self
            .entitlements
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.user_uuid == user_uuid)
            .cloned()
            .collect())
    }

    fn is_tamper_locked(&self, user_uuid: &str) -> Result<bool> {
        Ok(self
            .entitlements
            .lock()
            .unwrap()
            .iter()
            .any(|e| e.user_uuid == user_uuid && e.tampered && e.deleted_at.is_none()))
    }

    async fn apply_tamper_verdict(
        &self,
        entitlement_uuids: Vec<String>,
        auth_uuid: String,
    ) -> Result<()> {
        for entitlement in self.entitlements.lock().unwrap().iter_mut() {
            if entitlement_uuids.contains(&entitlement.uuid) {
                entitlement.tampered = true;
            }
        }
        for uuid in &entitlement_uuids {
            let mut row = record(uuid, json!({ "user_uuid": "u-1", "tampered": true }));
            row.dirty_seq = 2;
            self.insert(SyncEntity::Subscription, row);
        }
        let mut session = record(&auth_uuid, json!({ "user_uuid": "u-1", "is_logged_in": false }));
        session.dirty_seq = 2;
        self.insert(SyncEntity::Authentication, session);
        if let Some(user) = self.user.lock().unwrap().as_mut() {
            user.is_logged_in = false;
        }
        Ok(())
    }
}

/// Scripted reply for one upsert call.
#[derive(Debug, Clone)]
pub enum UpsertReply {
    /// Return the batch as applied.
    Echo,
    /// Succeed without confirmation.
    Empty,
    /// Answer with these records instead of the batch.
    Records(Vec<WirePayload>),
    Fail(SyncError),
}

pub struct FakeTransport {
    pub upsert_replies: Mutex<HashMap<String, VecDeque<UpsertReply>>>,
    pub upserts: Mutex<Vec<(String, Vec<WirePayload>)>>,
    pub remote: Mutex<HashMap<String, Vec<WirePayload>>>,
    pub pull_errors: Mutex<HashMap<String, SyncError>>,
    pub pulls: Mutex<Vec<(String, DateTime<Utc>)>>,
    /// `Ok(offset)` answers `now + offset`.
    pub clock: Mutex<std::result::Result<Duration, SyncError>>,
    pub token: Mutex<Option<String>>,
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self {
            upsert_replies: Mutex::default(),
            upserts: Mutex::default(),
            remote: Mutex::default(),
            pull_errors: Mutex::default(),
            pulls: Mutex::default(),
            clock: Mutex::new(Ok(Duration::zero())),
            token: Mutex::default(),
        }
    }
}

impl FakeTransport {
    pub fn script(&self, collection: &str, reply: UpsertReply) {
        self.upsert_replies
            .lock()
            .unwrap()
            .entry(collection.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn serve(&self, collection: &str, records: Vec<WirePayload>) {
        self.remote
            .lock()
            .unwrap()
            .insert(collection.to_string(), records);
    }

    pub fn set_clock(&self, clock: std::result::Result<Duration, SyncError>) {
        *self.clock.lock().unwrap() = clock;
    }

    pub fn upserted_collections(&self) -> Vec<String> {
        self.upserts
            .lock()
            .unwrap()
            .iter()
            .map(|(collection, _)| collection.clone())
            .collect()
    }

    pub fn pulled_collections(&self) -> Vec<String> {
        self.pulls
            .lock()
            .unwrap()
            .iter()
            .map(|(collection, _)| collection.clone())
            .collect()
    }
}

#[async_trait]
impl SyncTransport for FakeTransport {
    fn set_access_token(&self, token: Option<String>) {
        *self.token.lock().unwrap() = token;
    }

    async fn upsert_batch(
        &self,
        collection: &str,
        records: Vec<WirePayload>,
    ) -> std::result::Result<Vec<WirePayload>, SyncError> {
        self.upserts
            .lock()
            .unwrap()
            .push((collection.to_string(), records.clone()));
        let reply = self
            .upsert_replies
            .lock()
            .unwrap()
            .get_mut(collection)
            .and_then(VecDeque::pop_front)
            .unwrap_or(UpsertReply::Echo);
        match reply {
            UpsertReply::Echo => Ok(records),
            UpsertReply::Empty => Ok(Vec::new()),
            UpsertReply::Records(applied) => Ok(applied),
            UpsertReply::Fail(err) => Err(err),
        }
    }

    async fn pull_changes(
        &self,
        collection: &str,
        since: DateTime<Utc>,
    ) -> std::result::Result<Vec<WirePayload>, SyncError> {
        self.pulls
            .lock()
            .unwrap()
            .push((collection.to_string(), since));
        if let Some(err) = self.pull_errors.lock().unwrap().get(collection) {
            return Err(err.clone());
        }
        Ok(self
            .remote
            .lock()
            .unwrap()
            .get(collection)
            .cloned()
            .unwrap_or_default())
    }

    async fn server_time(&self) -> std::result::Result<DateTime<Utc>, SyncError> {
        self.clock
            .lock()
            .unwrap()
            .clone()
            .map(|offset| Utc::now() + offset)
    }
}

#[derive(Default)]
pub struct FakeBlobs {
    pub uploads: Mutex<Vec<(String, String, String)>>,
    pub fail: Mutex<bool>,
}

#[async_trait]
impl BlobUploader for FakeBlobs {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        _bytes: Vec<u8>,
        content_type: &str,
    ) -> std::result::Result<String, SyncError> {
        if *self.fail.lock().unwrap() {
            return Err(SyncError::blob_upload("bucket not found"));
        }
        self.uploads.lock().unwrap().push((
            bucket.to_string(),
            path.to_string(),
            content_type.to_string(),
        ));
        Ok(format!("https://cdn.test/{}/{}", bucket, path))
    }
}
