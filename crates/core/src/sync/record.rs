//! The syncable record contract and the dirty-ledger value types.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

/// Remote wire shape of one record.
pub type WirePayload = Map<String, Value>;

/// Columns that exist only in the local store and never leave it.
///
/// `id` is the process-local surrogate key; `dirty_seq` counts local writes so a
/// push acknowledgment can tell whether the row changed while it was in flight.
pub const LOCAL_ONLY_COLUMNS: [&str; 2] = ["id", "dirty_seq"];

/// Ledger columns every syncable table carries.
pub const LEDGER_COLUMNS: [&str; 7] = [
    "id",
    "uuid",
    "created_at",
    "updated_at",
    "deleted_at",
    "is_dirty",
    "dirty_seq",
];

/// One local row of a synchronizable entity.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncableRecord {
    pub id: i64,
    pub uuid: String,
    pub created_at: String,
    pub updated_at: String,
    pub deleted_at: Option<String>,
    pub is_dirty: bool,
    pub dirty_seq: i64,
    /// Entity-specific column values keyed by local column name.
    pub attributes: Map<String, Value>,
    /// Non-null binary column contents keyed by local column name.
    pub blobs: BTreeMap<String, Vec<u8>>,
}

impl SyncableRecord {
    /// All non-binary local column values, ledger columns included.
    pub fn column_values(&self) -> Map<String, Value> {
        let mut values = Map::new();
        values.insert("id".to_string(), Value::from(self.id));
        values.insert("uuid".to_string(), Value::String(self.uuid.clone()));
        values.insert(
            "created_at".to_string(),
            Value::String(self.created_at.clone()),
        );
        values.insert(
            "updated_at".to_string(),
            Value::String(self.updated_at.clone()),
        );
        values.insert(
            "deleted_at".to_string(),
            self.deleted_at.clone().map(Value::String).unwrap_or(Value::Null),
        );
        values.insert("is_dirty".to_string(), Value::Bool(self.is_dirty));
        values.insert("dirty_seq".to_string(), Value::from(self.dirty_seq));
        for (key, value) in &self.attributes {
            values.insert(key.clone(), value.clone());
        }
        values
    }

    /// The acknowledgment token used to clear this record after a confirmed push.
    pub fn dirty_ack(&self) -> DirtyAck {
        DirtyAck {
            uuid: self.uuid.clone(),
            observed_seq: self.dirty_seq,
        }
    }

    pub fn attribute_str(&self, column: &str) -> Option<&str> {
        self.attributes.get(column).and_then(Value::as_str)
    }
}

/// Identifies a pushed row and the write sequence the push observed.
///
/// The ledger clears `is_dirty` only while `dirty_seq` still equals
/// `observed_seq`; a local edit made during the push keeps the row dirty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DirtyAck {
    pub uuid: String,
    pub observed_seq: i64,
}

/// Attributes produced by reverse mapping, ready for a merge write.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalAttributeSet {
    pub uuid: String,
    pub attributes: Map<String, Value>,
}

/// How a local write interacts with the dirty ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Ordinary local mutation: always marks the row dirty.
    Local,
    /// Incoming pull merge: never marks the row dirty.
    Merge,
}

impl WriteMode {
    pub fn marks_dirty(self) -> bool {
        matches!(self, WriteMode::Local)
    }
}

/// Row counts from merging one entity's pulled records.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub inserted: usize,
    pub updated: usize,
}

impl MergeStats {
    pub fn total(&self) -> usize {
        self.inserted + self.updated
    }
}

/// Canonical local timestamp rendering (RFC 3339, UTC, millisecond precision).
pub fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

/// Fresh shared identifier for a locally created record.
pub fn new_record_uuid() -> String {
    Uuid::new_v4().to_string()
}

/// Parses the ISO-8601 variants produced by the remote store and by older
/// local rows. Offset-less values are taken as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z"] {
        if let Ok(parsed) = DateTime::parse_from_str(value, format) {
            return Some(parsed.with_timezone(&Utc));
        }
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Some(parsed.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|parsed| parsed.and_utc())
}
