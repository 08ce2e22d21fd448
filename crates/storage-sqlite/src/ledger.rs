//! Dirty ledger: the only write path for syncable tables.
//!
//! Every syncable table shares the ledger columns, so rows are accessed
//! generically with raw SQL built from the table's PRAGMA column list. Local
//! writes always mark the row dirty and bump `dirty_seq`; merge writes never
//! do. Protected columns are outside ordinary local writes.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, OnceLock};

use diesel::prelude::*;
use diesel::sql_types::{BigInt, Binary, Text};
use log::debug;
use serde_json::{Map, Value};

use solarsync_core::errors::{DatabaseError, Error, Result};
use solarsync_core::sync::{
    new_record_uuid, now_timestamp, DirtyAck, LocalAttributeSet, MergeStats, SyncEntity,
    SyncableRecord, WriteMode, LEDGER_COLUMNS, SYNC_TABLES,
};

use crate::errors::StorageError;

/// Security verdict columns: set only by the clock gate, cleared only by a merge.
pub const PROTECTED_COLUMNS: [&str; 1] = ["tampered"];

/// Storage class derived from a column's declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Integer,
    Real,
    Boolean,
    Json,
    Blob,
}

impl ColumnKind {
    fn from_declared_type(declared: &str) -> Self {
        let declared = declared.to_ascii_uppercase();
        if declared.contains("BOOL") {
            ColumnKind::Boolean
        } else if declared.contains("JSON") {
            ColumnKind::Json
        } else if declared.contains("BLOB") {
            ColumnKind::Blob
        } else if declared.contains("INT") {
            ColumnKind::Integer
        } else if declared.contains("REAL") || declared.contains("FLOA") || declared.contains("DOUB")
        {
            ColumnKind::Real
        } else {
            ColumnKind::Text
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableColumn {
    pub name: String,
    pub kind: ColumnKind,
}

#[derive(QueryableByName)]
struct PragmaColumnRow {
    #[diesel(sql_type = Text)]
    name: String,
    #[diesel(sql_type = Text)]
    declared_type: String,
}

#[derive(QueryableByName)]
struct RecordRow {
    #[diesel(sql_type = Text)]
    record: String,
}

#[derive(QueryableByName)]
struct BlobRow {
    #[diesel(sql_type = Text)]
    uuid: String,
    #[diesel(sql_type = Binary)]
    content: Vec<u8>,
}

#[derive(QueryableByName)]
struct CountRow {
    #[diesel(sql_type = BigInt)]
    c: i64,
}

pub fn validate_sync_table(table: &str) -> Result<()> {
    if SYNC_TABLES.contains(&table) {
        return Ok(());
    }
    Err(Error::Database(DatabaseError::Internal(format!(
        "Unsupported sync table '{}'",
        table
    ))))
}

fn table_columns_cache() -> &'static Mutex<HashMap<String, Arc<Vec<TableColumn>>>> {
    static CACHE: OnceLock<Mutex<HashMap<String, Arc<Vec<TableColumn>>>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

fn poisoned_cache() -> Error {
    Error::Database(DatabaseError::Internal(
        "Ledger column cache is poisoned".to_string(),
    ))
}

pub(crate) fn escape_sqlite_str(value: &str) -> String {
    value.replace('\'', "''")
}

pub(crate) fn quote_identifier(value: &str) -> String {
    format!("`{}`", value.replace('`', "``"))
}

/// Column list of a syncable table, cached per table name.
pub fn table_columns(conn: &mut SqliteConnection, table: &str) -> Result<Arc<Vec<TableColumn>>> {
    validate_sync_table(table)?;
    {
        let cache = table_columns_cache().lock().map_err(|_| poisoned_cache())?;
        if let Some(columns) = cache.get(table) {
            return Ok(Arc::clone(columns));
        }
    }

    let sql = format!(
        "SELECT name, type AS declared_type FROM pragma_table_info('{}')",
        escape_sqlite_str(table)
    );
    let columns = diesel::sql_query(sql)
        .load::<PragmaColumnRow>(conn)
        .map_err(StorageError::from)?
        .into_iter()
        .map(|row| TableColumn {
            kind: ColumnKind::from_declared_type(&row.declared_type),
            name: row.name,
        })
        .collect::<Vec<_>>();
    if columns.is_empty() {
        return Err(Error::Database(DatabaseError::Internal(format!(
            "Sync table '{}' does not exist",
            table
        ))));
    }

    let columns = Arc::new(columns);
    let mut cache = table_columns_cache().lock().map_err(|_| poisoned_cache())?;
    cache.insert(table.to_string(), Arc::clone(&columns));
    Ok(columns)
}

fn find_column<'a>(columns: &'a [TableColumn], name: &str) -> Option<&'a TableColumn> {
    columns.iter().find(|column| column.name == name)
}

fn json_value_to_sql_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(v) => {
            if *v {
                "1".to_string()
            } else {
                "0".to_string()
            }
        }
        Value::Number(v) => v.to_string(),
        Value::String(v) => format!("'{}'", escape_sqlite_str(v)),
        Value::Array(_) | Value::Object(_) => {
            format!(
                "'{}'",
                escape_sqlite_str(&serde_json::to_string(value).unwrap_or_default())
            )
        }
    }
}

fn blob_literal(bytes: &[u8]) -> String {
    let hex = bytes
        .iter()
        .map(|byte| format!("{:02x}", byte))
        .collect::<String>();
    format!("X'{}'", hex)
}

/// SQL literal for `value` in a column of the given kind.
fn column_literal(table: &str, column: &TableColumn, value: &Value) -> Result<String> {
    match (column.kind, value) {
        (_, Value::Null) => Ok("NULL".to_string()),
        (ColumnKind::Boolean, Value::Bool(_)) => Ok(json_value_to_sql_literal(value)),
        (ColumnKind::Boolean, Value::Number(n)) => {
            Ok(if n.as_i64() == Some(0) { "0" } else { "1" }.to_string())
        }
        (ColumnKind::Boolean, Value::String(s)) => match s.as_str() {
            "true" | "1" => Ok("1".to_string()),
            "false" | "0" => Ok("0".to_string()),
            _ => Err(invalid_value(table, &column.name, value)),
        },
        (ColumnKind::Boolean, _) => Err(invalid_value(table, &column.name, value)),
        (ColumnKind::Json, _) => Ok(format!(
            "'{}'",
            escape_sqlite_str(&serde_json::to_string(value)?)
        )),
        (ColumnKind::Blob, _) => Err(Error::validation(format!(
            "Column '{}.{}' is binary; pass its content as bytes",
            table, column.name
        ))),
        _ => Ok(json_value_to_sql_literal(value)),
    }
}

fn invalid_value(table: &str, column: &str, value: &Value) -> Error {
    Error::validation(format!(
        "Value {} is not valid for column '{}.{}'",
        value, table, column
    ))
}

/// `(quoted column, literal)` pairs for a local write. Ledger and protected
/// columns are rejected.
fn local_assignments(
    conn: &mut SqliteConnection,
    table: &str,
    attributes: &Map<String, Value>,
    blobs: &BTreeMap<String, Vec<u8>>,
) -> Result<Vec<(String, String)>> {
    let columns = table_columns(conn, table)?;
    let mut assignments = Vec::with_capacity(attributes.len() + blobs.len());

    for (name, value) in attributes {
        if LEDGER_COLUMNS.contains(&name.as_str()) {
            return Err(Error::validation(format!(
                "Column '{}' is managed by the sync ledger",
                name
            )));
        }
        if PROTECTED_COLUMNS.contains(&name.as_str()) {
            return Err(Error::validation(format!(
                "Column '{}.{}' cannot be written locally",
                table, name
            )));
        }
        let column = find_column(&columns, name).ok_or_else(|| {
            Error::validation(format!("Unknown column '{}' for table '{}'", name, table))
        })?;
        assignments.push((quote_identifier(name), column_literal(table, column, value)?));
    }

    for (name, bytes) in blobs {
        match find_column(&columns, name) {
            Some(column) if column.kind == ColumnKind::Blob => {
                assignments.push((quote_identifier(name), blob_literal(bytes)));
            }
            _ => {
                return Err(Error::validation(format!(
                    "'{}' is not a binary column of '{}'",
                    name, table
                )))
            }
        }
    }

    Ok(assignments)
}

/// Ledger side effects of a write in the given mode.
fn ledger_assignments(mode: WriteMode, now: &str) -> Vec<String> {
    if mode.marks_dirty() {
        vec![
            format!("`updated_at` = '{}'", escape_sqlite_str(now)),
            "`is_dirty` = 1".to_string(),
            "`dirty_seq` = `dirty_seq` + 1".to_string(),
        ]
    } else {
        vec!["`is_dirty` = 0".to_string()]
    }
}

/// Inserts a locally created record and returns its new uuid.
pub fn insert_local_record(
    conn: &mut SqliteConnection,
    entity: SyncEntity,
    attributes: &Map<String, Value>,
    blobs: &BTreeMap<String, Vec<u8>>,
) -> Result<String> {
    let table = entity.table_name();
    let mut assignments = local_assignments(conn, table, attributes, blobs)?;
    let uuid = new_record_uuid();
    let now = now_timestamp();

    assignments.push((quote_identifier("uuid"), format!("'{}'", escape_sqlite_str(&uuid))));
    assignments.push((quote_identifier("created_at"), format!("'{}'", now)));
    assignments.push((quote_identifier("updated_at"), format!("'{}'", now)));
    assignments.push((quote_identifier("is_dirty"), "1".to_string()));
    assignments.push((quote_identifier("dirty_seq"), "1".to_string()));

    let (columns, values): (Vec<_>, Vec<_>) = assignments.into_iter().unzip();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_identifier(table),
        columns.join(", "),
        values.join(", ")
    );
    diesel::sql_query(sql)
        .execute(conn)
        .map_err(StorageError::from)?;

    debug!("[Storage] Created {} {}", table, uuid);
    Ok(uuid)
}

fn update_local_row(
    conn: &mut SqliteConnection,
    table: &str,
    uuid: &str,
    mut assignments: Vec<String>,
) -> Result<()> {
    assignments.extend(ledger_assignments(WriteMode::Local, &now_timestamp()));
    let sql = format!(
        "UPDATE {} SET {} WHERE `uuid` = '{}'",
        quote_identifier(table),
        assignments.join(", "),
        escape_sqlite_str(uuid)
    );
    let updated = diesel::sql_query(sql)
        .execute(conn)
        .map_err(StorageError::from)?;
    if updated == 0 {
        return Err(Error::Database(DatabaseError::NotFound(format!(
            "{} {}",
            table, uuid
        ))));
    }
    Ok(())
}

/// Applies a local mutation. Always marks the row dirty, refreshes
/// `updated_at` and bumps `dirty_seq`.
pub fn record_local_write(
    conn: &mut SqliteConnection,
    entity: SyncEntity,
    uuid: &str,
    changes: &Map<String, Value>,
    blobs: &BTreeMap<String, Vec<u8>>,
) -> Result<()> {
    let table = entity.table_name();
    let assignments = local_assignments(conn, table, changes, blobs)?
        .into_iter()
        .map(|(column, literal)| format!("{} = {}", column, literal))
        .collect::<Vec<_>>();
    if assignments.is_empty() {
        return Ok(());
    }
    update_local_row(conn, table, uuid, assignments)
}

/// Soft delete: stamps `deleted_at` through the ledger so the deletion syncs.
pub fn soft_delete(conn: &mut SqliteConnection, entity: SyncEntity, uuid: &str) -> Result<()> {
    let table = entity.table_name();
    validate_sync_table(table)?;
    let assignment = format!("`deleted_at` = '{}'", now_timestamp());
    update_local_row(conn, table, uuid, vec![assignment])
}

/// Sets the tamper verdict on a subscription. There is no local way to clear it.
pub fn mark_tampered(conn: &mut SqliteConnection, subscription_uuid: &str) -> Result<()> {
    update_local_row(
        conn,
        SyncEntity::Subscription.table_name(),
        subscription_uuid,
        vec!["`tampered` = 1".to_string()],
    )
}

/// Clears `is_dirty` on acknowledged rows still at the observed `dirty_seq`.
/// A row edited after it was collected for push stays dirty.
pub fn clear_dirty_observed(
    conn: &mut SqliteConnection,
    entity: SyncEntity,
    acks: &[DirtyAck],
) -> Result<usize> {
    let table = entity.table_name();
    validate_sync_table(table)?;

    let mut cleared = 0;
    for ack in acks {
        let sql = format!(
            "UPDATE {} SET `is_dirty` = 0 WHERE `uuid` = '{}' AND `dirty_seq` = {} AND `is_dirty` = 1",
            quote_identifier(table),
            escape_sqlite_str(&ack.uuid),
            ack.observed_seq
        );
        let updated = diesel::sql_query(sql)
            .execute(conn)
            .map_err(StorageError::from)?;
        if updated == 0 {
            debug!(
                "[Storage] {} {} changed during push, keeping it dirty",
                table, ack.uuid
            );
        }
        cleared += updated;
    }
    Ok(cleared)
}

fn row_exists(conn: &mut SqliteConnection, table: &str, uuid: &str) -> Result<bool> {
    let sql = format!(
        "SELECT COUNT(*) AS c FROM {} WHERE `uuid` = '{}'",
        quote_identifier(table),
        escape_sqlite_str(uuid)
    );
    let row = diesel::sql_query(sql)
        .get_result::<CountRow>(conn)
        .map_err(StorageError::from)?;
    Ok(row.c > 0)
}

/// Merges pulled records by uuid: update when present, insert when absent.
///
/// Merge writes never mark rows dirty and leave `dirty_seq` alone. Local
/// binary columns are never overwritten, and remote fields with no local
/// column are dropped.
pub fn merge_remote_records(
    conn: &mut SqliteConnection,
    entity: SyncEntity,
    records: &[LocalAttributeSet],
) -> Result<MergeStats> {
    let table = entity.table_name();
    let columns = table_columns(conn, table)?;
    let mut stats = MergeStats::default();

    for record in records {
        let exists = row_exists(conn, table, &record.uuid)?;

        let mut fields: Vec<(String, String)> = Vec::new();
        for (name, value) in &record.attributes {
            if matches!(name.as_str(), "id" | "uuid" | "is_dirty" | "dirty_seq") {
                continue;
            }
            let Some(column) = find_column(&columns, name) else {
                debug!("[Storage] Dropping remote field '{}' for {}", name, table);
                continue;
            };
            if column.kind == ColumnKind::Blob {
                continue;
            }
            fields.push((name.clone(), column_literal(table, column, value)?));
        }

        if !exists {
            let now = format!("'{}'", now_timestamp());
            for required in ["created_at", "updated_at"] {
                match fields.iter_mut().find(|(name, _)| name == required) {
                    Some((_, literal)) if literal == "NULL" => *literal = now.clone(),
                    Some(_) => {}
                    None => fields.push((required.to_string(), now.clone())),
                }
            }
        }

        let mut insert_columns = vec![quote_identifier("uuid")];
        let mut insert_values = vec![format!("'{}'", escape_sqlite_str(&record.uuid))];
        for (name, literal) in &fields {
            insert_columns.push(quote_identifier(name));
            insert_values.push(literal.clone());
        }
        insert_columns.push(quote_identifier("is_dirty"));
        insert_values.push("0".to_string());
        insert_columns.push(quote_identifier("dirty_seq"));
        insert_values.push("0".to_string());

        let mut updates = fields
            .iter()
            .map(|(name, _)| {
                let quoted = quote_identifier(name);
                format!("{quoted}=excluded.{quoted}")
            })
            .collect::<Vec<_>>();
        updates.extend(ledger_assignments(WriteMode::Merge, ""));

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT(`uuid`) DO UPDATE SET {}",
            quote_identifier(table),
            insert_columns.join(", "),
            insert_values.join(", "),
            updates.join(", ")
        );
        diesel::sql_query(sql)
            .execute(conn)
            .map_err(StorageError::from)?;

        if exists {
            stats.updated += 1;
        } else {
            stats.inserted += 1;
        }
    }

    Ok(stats)
}

fn select_records(
    conn: &mut SqliteConnection,
    table: &str,
    where_clause: &str,
) -> Result<Vec<SyncableRecord>> {
    let columns = table_columns(conn, table)?;

    let pairs = columns
        .iter()
        .filter(|column| column.kind != ColumnKind::Blob)
        .map(|column| {
            let quoted = quote_identifier(&column.name);
            let expr = if column.kind == ColumnKind::Json {
                format!("CASE WHEN json_valid({quoted}) THEN json({quoted}) ELSE {quoted} END")
            } else {
                quoted
            };
            format!("'{}', {}", escape_sqlite_str(&column.name), expr)
        })
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT json_object({}) AS record FROM {} WHERE {} ORDER BY `id`",
        pairs,
        quote_identifier(table),
        where_clause
    );
    let rows = diesel::sql_query(sql)
        .load::<RecordRow>(conn)
        .map_err(StorageError::from)?;

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let mut values: Map<String, Value> = serde_json::from_str(&row.record)?;
        for column in columns.iter().filter(|c| c.kind == ColumnKind::Boolean) {
            if let Some(value) = values.get_mut(&column.name) {
                if let Some(flag) = value.as_i64() {
                    *value = Value::Bool(flag != 0);
                }
            }
        }
        records.push(record_from_values(table, values)?);
    }

    let mut blobs_by_uuid: HashMap<String, BTreeMap<String, Vec<u8>>> = HashMap::new();
    for column in columns.iter().filter(|c| c.kind == ColumnKind::Blob) {
        let sql = format!(
            "SELECT `uuid`, {col} AS content FROM {} WHERE ({}) AND {col} IS NOT NULL",
            quote_identifier(table),
            where_clause,
            col = quote_identifier(&column.name)
        );
        let blob_rows = diesel::sql_query(sql)
            .load::<BlobRow>(conn)
            .map_err(StorageError::from)?;
        for blob in blob_rows {
            blobs_by_uuid
                .entry(blob.uuid)
                .or_default()
                .insert(column.name.clone(), blob.content);
        }
    }
    for record in &mut records {
        if let Some(blobs) = blobs_by_uuid.remove(&record.uuid) {
            record.blobs = blobs;
        }
    }

    Ok(records)
}

fn take_string(values: &mut Map<String, Value>, column: &str) -> Option<String> {
    match values.remove(column) {
        Some(Value::String(value)) => Some(value),
        _ => None,
    }
}

fn record_from_values(table: &str, mut values: Map<String, Value>) -> Result<SyncableRecord> {
    let malformed = |column: &str| {
        Error::Database(DatabaseError::Internal(format!(
            "Row in '{}' has malformed ledger column '{}'",
            table, column
        )))
    };

    let id = values
        .remove("id")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| malformed("id"))?;
    let uuid = take_string(&mut values, "uuid").ok_or_else(|| malformed("uuid"))?;
    let created_at = take_string(&mut values, "created_at").unwrap_or_default();
    let updated_at = take_string(&mut values, "updated_at").unwrap_or_default();
    let deleted_at = take_string(&mut values, "deleted_at");
    let is_dirty = values
        .remove("is_dirty")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let dirty_seq = values
        .remove("dirty_seq")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);

    Ok(SyncableRecord {
        id,
        uuid,
        created_at,
        updated_at,
        deleted_at,
        is_dirty,
        dirty_seq,
        attributes: values,
        blobs: BTreeMap::new(),
    })
}

/// Records of one entity: dirty only, or every row when `include_clean`.
pub fn load_records(
    conn: &mut SqliteConnection,
    entity: SyncEntity,
    include_clean: bool,
) -> Result<Vec<SyncableRecord>> {
    let where_clause = if include_clean { "1 = 1" } else { "`is_dirty` = 1" };
    select_records(conn, entity.table_name(), where_clause)
}

pub fn get_record(
    conn: &mut SqliteConnection,
    entity: SyncEntity,
    uuid: &str,
) -> Result<Option<SyncableRecord>> {
    let where_clause = format!("`uuid` = '{}'", escape_sqlite_str(uuid));
    Ok(select_records(conn, entity.table_name(), &where_clause)?
        .into_iter()
        .next())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{get_connection, test_pool};
    use serde_json::json;

    fn attrs(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    fn no_blobs() -> BTreeMap<String, Vec<u8>> {
        BTreeMap::new()
    }

    #[test]
    fn local_insert_is_dirty_with_fresh_uuid() {
        let (_dir, pool) = test_pool();
        let mut conn = get_connection(&pool).unwrap();

        let uuid = insert_local_record(
            &mut conn,
            SyncEntity::Customer,
            &attrs(json!({ "full_name": "Amna", "user_uuid": "u-1" })),
            &no_blobs(),
        )
        .unwrap();

        let record = get_record(&mut conn, SyncEntity::Customer, &uuid)
            .unwrap()
            .expect("record");
        assert!(record.is_dirty);
        assert_eq!(record.dirty_seq, 1);
        assert_eq!(record.attribute_str("full_name"), Some("Amna"));
        assert_eq!(record.attribute_str("user_uuid"), Some("u-1"));
        assert!(record.deleted_at.is_none());
        assert!(!record.created_at.is_empty());
    }

    #[test]
    fn local_write_re_dirties_a_clean_row() {
        let (_dir, pool) = test_pool();
        let mut conn = get_connection(&pool).unwrap();
        let uuid = insert_local_record(
            &mut conn,
            SyncEntity::Customer,
            &attrs(json!({ "full_name": "Amna" })),
            &no_blobs(),
        )
        .unwrap();
        let record = get_record(&mut conn, SyncEntity::Customer, &uuid)
            .unwrap()
            .unwrap();
        clear_dirty_observed(&mut conn, SyncEntity::Customer, &[record.dirty_ack()]).unwrap();

        record_local_write(
            &mut conn,
            SyncEntity::Customer,
            &uuid,
            &attrs(json!({ "phone_number": "0300" })),
            &no_blobs(),
        )
        .unwrap();

        let record = get_record(&mut conn, SyncEntity::Customer, &uuid)
            .unwrap()
            .unwrap();
        assert!(record.is_dirty);
        assert_eq!(record.dirty_seq, 2);
        assert_eq!(record.attribute_str("phone_number"), Some("0300"));
    }

    #[test]
    fn stale_acknowledgment_keeps_row_dirty() {
        let (_dir, pool) = test_pool();
        let mut conn = get_connection(&pool).unwrap();
        let uuid = insert_local_record(
            &mut conn,
            SyncEntity::Project,
            &attrs(json!({ "user_uuid": "u-1", "status": "draft" })),
            &no_blobs(),
        )
        .unwrap();
        let observed = get_record(&mut conn, SyncEntity::Project, &uuid)
            .unwrap()
            .unwrap()
            .dirty_ack();

        // Edit lands while the push is in flight.
        record_local_write(
            &mut conn,
            SyncEntity::Project,
            &uuid,
            &attrs(json!({ "status": "executed" })),
            &no_blobs(),
        )
        .unwrap();

        let cleared = clear_dirty_observed(&mut conn, SyncEntity::Project, &[observed]).unwrap();
        assert_eq!(cleared, 0);
        let record = get_record(&mut conn, SyncEntity::Project, &uuid)
            .unwrap()
            .unwrap();
        assert!(record.is_dirty);
    }

    #[test]
    fn ledger_and_protected_columns_are_not_locally_writable() {
        let (_dir, pool) = test_pool();
        let mut conn = get_connection(&pool).unwrap();
        let uuid = insert_local_record(
            &mut conn,
            SyncEntity::Subscription,
            &attrs(json!({ "user_uuid": "u-1", "status": "active", "type": "annual" })),
            &no_blobs(),
        )
        .unwrap();

        for changes in [
            json!({ "is_dirty": false }),
            json!({ "uuid": "other" }),
            json!({ "tampered": false }),
        ] {
            let err = record_local_write(
                &mut conn,
                SyncEntity::Subscription,
                &uuid,
                &attrs(changes),
                &no_blobs(),
            )
            .unwrap_err();
            assert!(matches!(err, Error::Validation(_)));
        }
    }

    #[test]
    fn tamper_flag_is_set_locally_and_cleared_only_by_merge() {
        let (_dir, pool) = test_pool();
        let mut conn = get_connection(&pool).unwrap();
        let uuid = insert_local_record(
            &mut conn,
            SyncEntity::Subscription,
            &attrs(json!({ "user_uuid": "u-1", "status": "active", "type": "annual" })),
            &no_blobs(),
        )
        .unwrap();

        mark_tampered(&mut conn, &uuid).unwrap();
        let record = get_record(&mut conn, SyncEntity::Subscription, &uuid)
            .unwrap()
            .unwrap();
        assert_eq!(record.attributes["tampered"], json!(true));
        assert!(record.is_dirty);

        merge_remote_records(
            &mut conn,
            SyncEntity::Subscription,
            &[LocalAttributeSet {
                uuid: uuid.clone(),
                attributes: attrs(json!({ "uuid": uuid, "tampered": false })),
            }],
        )
        .unwrap();
        let record = get_record(&mut conn, SyncEntity::Subscription, &uuid)
            .unwrap()
            .unwrap();
        assert_eq!(record.attributes["tampered"], json!(false));
        assert!(!record.is_dirty);
    }

    #[test]
    fn merge_inserts_unknown_uuid_as_clean_row() {
        let (_dir, pool) = test_pool();
        let mut conn = get_connection(&pool).unwrap();

        let stats = merge_remote_records(
            &mut conn,
            SyncEntity::Customer,
            &[LocalAttributeSet {
                uuid: "c-remote".to_string(),
                attributes: attrs(json!({
                    "uuid": "c-remote",
                    "full_name": "Bilal",
                    "created_at": "2025-02-01T00:00:00.000Z",
                    "updated_at": "2025-02-02T00:00:00.000Z",
                    "remote_only_column": 5
                })),
            }],
        )
        .unwrap();
        assert_eq!(stats, MergeStats { inserted: 1, updated: 0 });

        let record = get_record(&mut conn, SyncEntity::Customer, "c-remote")
            .unwrap()
            .expect("inserted");
        assert!(!record.is_dirty);
        assert_eq!(record.dirty_seq, 0);
        assert_eq!(record.updated_at, "2025-02-02T00:00:00.000Z");
        assert!(!record.attributes.contains_key("remote_only_column"));
    }

    #[test]
    fn merge_overwrites_dirty_row_without_re_dirtying() {
        let (_dir, pool) = test_pool();
        let mut conn = get_connection(&pool).unwrap();
        let uuid = insert_local_record(
            &mut conn,
            SyncEntity::Appliance,
            &attrs(json!({ "project_uuid": "p-1", "appliance_name": "Fan", "qty": 1 })),
            &no_blobs(),
        )
        .unwrap();

        let stats = merge_remote_records(
            &mut conn,
            SyncEntity::Appliance,
            &[LocalAttributeSet {
                uuid: uuid.clone(),
                attributes: attrs(json!({
                    "uuid": uuid,
                    "project_uuid": "p-1",
                    "appliance_name": "Ceiling fan",
                    "qty": 3,
                    "wattage": 75.5
                })),
            }],
        )
        .unwrap();
        assert_eq!(stats.updated, 1);

        let record = get_record(&mut conn, SyncEntity::Appliance, &uuid)
            .unwrap()
            .unwrap();
        assert!(!record.is_dirty);
        assert_eq!(record.dirty_seq, 1);
        assert_eq!(record.attributes["appliance_name"], json!("Ceiling fan"));
        assert_eq!(record.attributes["qty"], json!(3));
        assert_eq!(record.attributes["wattage"], json!(75.5));
    }

    #[test]
    fn blobs_and_json_columns_survive_the_round_trip() {
        let (_dir, pool) = test_pool();
        let mut conn = get_connection(&pool).unwrap();
        let mut blobs = BTreeMap::new();
        blobs.insert("business_logo".to_string(), vec![0x89, 0x50, 0x4e, 0x47]);
        let user = insert_local_record(
            &mut conn,
            SyncEntity::User,
            &attrs(json!({ "username": "sami", "email": "s@example.com" })),
            &blobs,
        )
        .unwrap();
        let config = insert_local_record(
            &mut conn,
            SyncEntity::SystemConfiguration,
            &attrs(json!({ "config_items": [{ "panel": "540W", "qty": 4 }] })),
            &no_blobs(),
        )
        .unwrap();

        let user = get_record(&mut conn, SyncEntity::User, &user)
            .unwrap()
            .unwrap();
        assert_eq!(user.blobs["business_logo"], vec![0x89, 0x50, 0x4e, 0x47]);
        assert!(!user.attributes.contains_key("business_logo"));

        let config = get_record(&mut conn, SyncEntity::SystemConfiguration, &config)
            .unwrap()
            .unwrap();
        assert_eq!(
            config.attributes["config_items"],
            json!([{ "panel": "540W", "qty": 4 }])
        );

        // A merge never touches the local blob.
        merge_remote_records(
            &mut conn,
            SyncEntity::User,
            &[LocalAttributeSet {
                uuid: user.uuid.clone(),
                attributes: attrs(json!({ "uuid": user.uuid, "username": "sami-r" })),
            }],
        )
        .unwrap();
        let user = get_record(&mut conn, SyncEntity::User, &user.uuid)
            .unwrap()
            .unwrap();
        assert_eq!(user.blobs["business_logo"].len(), 4);
    }

    #[test]
    fn soft_delete_is_a_dirty_write() {
        let (_dir, pool) = test_pool();
        let mut conn = get_connection(&pool).unwrap();
        let uuid = insert_local_record(
            &mut conn,
            SyncEntity::Organization,
            &attrs(json!({ "name": "Sun Co" })),
            &no_blobs(),
        )
        .unwrap();

        soft_delete(&mut conn, SyncEntity::Organization, &uuid).unwrap();
        let record = get_record(&mut conn, SyncEntity::Organization, &uuid)
            .unwrap()
            .unwrap();
        assert!(record.deleted_at.is_some());
        assert_eq!(record.dirty_seq, 2);
        assert_eq!(load_records(&mut conn, SyncEntity::Organization, false).unwrap().len(), 1);
    }

    #[test]
    fn missing_row_is_not_found() {
        let (_dir, pool) = test_pool();
        let mut conn = get_connection(&pool).unwrap();
        let err = soft_delete(&mut conn, SyncEntity::Organization, "nope").unwrap_err();
        assert!(matches!(err, Error::Database(DatabaseError::NotFound(_))));
    }

    #[test]
    fn declared_types_map_to_column_kinds() {
        assert_eq!(ColumnKind::from_declared_type("BOOLEAN"), ColumnKind::Boolean);
        assert_eq!(ColumnKind::from_declared_type("json"), ColumnKind::Json);
        assert_eq!(ColumnKind::from_declared_type("INTEGER"), ColumnKind::Integer);
        assert_eq!(ColumnKind::from_declared_type("REAL"), ColumnKind::Real);
        assert_eq!(ColumnKind::from_declared_type("BLOB"), ColumnKind::Blob);
        assert_eq!(ColumnKind::from_declared_type("TEXT"), ColumnKind::Text);
    }
}
