//! Payload mapping between the local record shape and the remote wire shape.
//!
//! Mappers are plain functions so each one can be tested without a store or a
//! network. Blob columns are not uploaded here: forward mappers stage them as
//! [`PendingBlob`]s and the push engine resolves each into a public URL.

use log::debug;
use serde_json::{Map, Value};

use super::entity::{EntityConfig, SyncEntity};
use super::record::{
    format_timestamp, parse_timestamp, LocalAttributeSet, SyncableRecord, WirePayload,
    LOCAL_ONLY_COLUMNS,
};
use crate::errors::SyncError;

/// Forward mapper: local record to wire payload.
pub type ForwardMapper = fn(&SyncableRecord) -> Result<MappedPayload, SyncError>;

/// Reverse mapper: wire payload to local attributes.
pub type ReverseMapper = fn(&WirePayload, SyncEntity) -> Result<LocalAttributeSet, SyncError>;

/// Local `*_uuid` references and their remote `*_id` names.
pub const FOREIGN_KEY_RENAMES: [(&str, &str); 8] = [
    ("user_uuid", "user_id"),
    ("customer_uuid", "customer_id"),
    ("project_uuid", "project_id"),
    ("system_config_uuid", "system_config_id"),
    ("invoice_uuid", "invoice_id"),
    ("subscription_uuid", "subscription_id"),
    ("organization_uuid", "organization_id"),
    ("branch_uuid", "branch_id"),
];

/// Temporal fields that do not follow the `*_at` naming.
const EXTRA_TIMESTAMP_FIELDS: [&str; 3] = ["last_active", "expiration_date", "grace_period_end"];

/// Binary content waiting to be uploaded for a mapped payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingBlob {
    /// Payload field that receives the public URL.
    pub field: String,
    /// Deterministic storage path derived from the record uuid.
    pub path: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

/// Result of forward mapping one record.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedPayload {
    pub uuid: String,
    pub payload: WirePayload,
    pub blobs: Vec<PendingBlob>,
}

impl MappedPayload {
    /// Replaces a staged blob field with its uploaded reference URL.
    pub fn resolve_blob(&mut self, field: &str, url: String) {
        self.payload.insert(field.to_string(), Value::String(url));
    }
}

/// Validates required references, applies the entity's forward mapper and
/// strips device-local columns.
pub fn prepare_payload(
    config: &EntityConfig,
    record: &SyncableRecord,
) -> Result<MappedPayload, SyncError> {
    for reference in config.required_refs {
        let present = record
            .attribute_str(reference)
            .map(|value| !value.trim().is_empty())
            .unwrap_or(false);
        if !present {
            return Err(SyncError::mapping(
                config.local_table,
                format!(
                    "record {} is missing required reference '{}'",
                    record.uuid, reference
                ),
            ));
        }
    }

    let mut mapped = (config.forward)(record)?;
    for column in config.local_columns {
        mapped.payload.remove(*column);
    }
    Ok(mapped)
}

/// Generic forward transformation shared by all uniform entities.
pub fn map_generic(record: &SyncableRecord) -> Result<MappedPayload, SyncError> {
    let mut payload = record.column_values();

    for column in LOCAL_ONLY_COLUMNS {
        payload.remove(column);
    }
    if let Some(uuid) = payload.remove("uuid") {
        payload.insert("id".to_string(), uuid);
    }
    for (local, remote) in FOREIGN_KEY_RENAMES {
        if let Some(value) = payload.remove(local) {
            payload.insert(remote.to_string(), value);
        }
    }
    // The remote copy is clean by definition once it is applied.
    payload.insert("is_dirty".to_string(), Value::Bool(false));

    Ok(MappedPayload {
        uuid: record.uuid.clone(),
        payload,
        blobs: Vec::new(),
    })
}

/// Users carry their business logo as a blob.
pub fn map_user(record: &SyncableRecord) -> Result<MappedPayload, SyncError> {
    let mut mapped = map_generic(record)?;
    stage_blob(
        &mut mapped,
        record,
        "business_logo",
        "business_logo",
        format!("user_logos/{}.png", record.uuid),
    );
    Ok(mapped)
}

/// Documents are filed by type; the uploaded URL lands in `file_path`.
pub fn map_document(record: &SyncableRecord) -> Result<MappedPayload, SyncError> {
    let mut mapped = map_generic(record)?;
    if record.blobs.contains_key("file_blob") {
        let file_name = record
            .attribute_str("file_name")
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| {
                SyncError::mapping(
                    "documents",
                    format!("document {} has content but no file_name", record.uuid),
                )
            })?;
        let folder = if record.attribute_str("doc_type") == Some("Invoice") {
            "documents/invoices"
        } else {
            "documents/project_breakdowns"
        };
        let path = format!("{}/{}_{}", folder, record.uuid, file_name);
        stage_blob(&mut mapped, record, "file_blob", "file_path", path);
    }
    Ok(mapped)
}

/// Subscription payments carry a transaction screenshot.
pub fn map_subscription_payment(record: &SyncableRecord) -> Result<MappedPayload, SyncError> {
    let mut mapped = map_generic(record)?;
    stage_blob(
        &mut mapped,
        record,
        "trx_screenshot",
        "trx_screenshot",
        format!("payment_screenshots/{}.png", record.uuid),
    );
    Ok(mapped)
}

fn stage_blob(
    mapped: &mut MappedPayload,
    record: &SyncableRecord,
    column: &str,
    remote_field: &str,
    path: String,
) {
    if let Some(bytes) = record.blobs.get(column) {
        mapped.blobs.push(PendingBlob {
            field: remote_field.to_string(),
            content_type: content_type_for_path(&path),
            path,
            bytes: bytes.clone(),
        });
    }
}

/// Content type for a blob destination path.
pub fn content_type_for_path(path: &str) -> &'static str {
    let extension = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase());
    match extension.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// Local name of a remote reference field, if it is one.
pub fn local_reference_name(remote_field: &str) -> Option<&'static str> {
    FOREIGN_KEY_RENAMES
        .iter()
        .find(|(_, remote)| *remote == remote_field)
        .map(|(local, _)| *local)
}

fn is_timestamp_field(field: &str) -> bool {
    field.ends_with("_at") || EXTRA_TIMESTAMP_FIELDS.contains(&field)
}

fn normalize_timestamp(
    config: &EntityConfig,
    field: &str,
    value: &Value,
) -> Result<Value, SyncError> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::String(raw) => parse_timestamp(raw)
            .map(|parsed| Value::String(format_timestamp(parsed)))
            .ok_or_else(|| {
                SyncError::mapping(
                    config.local_table,
                    format!("field '{}' has unparseable timestamp '{}'", field, raw),
                )
            }),
        other => Err(SyncError::mapping(
            config.local_table,
            format!("field '{}' expected a timestamp, got {}", field, other),
        )),
    }
}

/// Generic reverse transformation.
///
/// Blob reference fields are dropped: pulled records never re-download blob
/// content, so a merge leaves local binary columns untouched.
pub fn reverse_generic(
    payload: &WirePayload,
    entity: SyncEntity,
) -> Result<LocalAttributeSet, SyncError> {
    let config = entity.config();
    let uuid = match payload.get("id") {
        Some(Value::String(value)) if !value.trim().is_empty() => value.clone(),
        _ => {
            return Err(SyncError::mapping(
                config.local_table,
                "remote record has no shared identifier 'id'",
            ))
        }
    };

    let mut attributes = Map::new();
    for (key, value) in payload {
        let key = key.as_str();
        if key == "is_dirty" || LOCAL_ONLY_COLUMNS.contains(&key) {
            continue;
        }
        if config
            .blob_fields
            .iter()
            .any(|field| field.remote_field == key || field.column == key)
        {
            debug!(
                "[Pull] Skipping blob reference '{}' for {} {}",
                key, config.local_table, uuid
            );
            continue;
        }
        if config.local_columns.contains(&key) {
            continue;
        }

        let local_key = local_reference_name(key).unwrap_or(key);
        let local_value = if is_timestamp_field(local_key) {
            normalize_timestamp(config, local_key, value)?
        } else {
            value.clone()
        };
        attributes.insert(local_key.to_string(), local_value);
    }
    attributes.insert("uuid".to_string(), Value::String(uuid.clone()));

    Ok(LocalAttributeSet { uuid, attributes })
}
