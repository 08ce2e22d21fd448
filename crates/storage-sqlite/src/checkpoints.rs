//! Checkpoint log persisted in `sync_logs`.

use diesel::prelude::*;

use solarsync_core::errors::{DatabaseError, Error, Result};
use solarsync_core::sync::{CheckpointScope, CheckpointStatus, SyncCheckpoint, SyncKind};

use crate::errors::StorageError;
use crate::schema::sync_logs;

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::sync_logs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SyncLogDB {
    pub uuid: String,
    pub sync_type: String,
    pub table_name: String,
    pub status: String,
    pub user_uuid: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub deleted_at: Option<String>,
    pub is_dirty: bool,
    pub dirty_seq: i64,
}

impl From<&SyncCheckpoint> for SyncLogDB {
    fn from(checkpoint: &SyncCheckpoint) -> Self {
        SyncLogDB {
            uuid: checkpoint.uuid.clone(),
            sync_type: checkpoint.sync_kind.as_str().to_string(),
            table_name: checkpoint.scope.as_column_value().to_string(),
            status: checkpoint.status.as_str().to_string(),
            user_uuid: checkpoint.actor_uuid.clone(),
            created_at: checkpoint.created_at.clone(),
            updated_at: checkpoint.created_at.clone(),
            deleted_at: None,
            // New checkpoints are pushed like any other local write.
            is_dirty: true,
            dirty_seq: 1,
        }
    }
}

impl TryFrom<SyncLogDB> for SyncCheckpoint {
    type Error = Error;

    fn try_from(row: SyncLogDB) -> Result<Self> {
        let unreadable = |column: &str, value: &str| {
            Error::Database(DatabaseError::Internal(format!(
                "sync_logs {} has unreadable {} '{}'",
                row.uuid, column, value
            )))
        };
        let sync_kind =
            SyncKind::parse(&row.sync_type).ok_or_else(|| unreadable("sync_type", &row.sync_type))?;
        let scope = CheckpointScope::from_column_value(&row.table_name)
            .ok_or_else(|| unreadable("table_name", &row.table_name))?;
        let status =
            CheckpointStatus::parse(&row.status).ok_or_else(|| unreadable("status", &row.status))?;

        Ok(SyncCheckpoint {
            uuid: row.uuid,
            sync_kind,
            scope,
            status,
            actor_uuid: row.user_uuid,
            created_at: row.created_at,
        })
    }
}

pub fn append_checkpoint(conn: &mut SqliteConnection, checkpoint: &SyncCheckpoint) -> Result<()> {
    diesel::insert_into(sync_logs::table)
        .values(SyncLogDB::from(checkpoint))
        .execute(conn)
        .map_err(StorageError::from)?;
    Ok(())
}

/// Most recent successful whole-run checkpoint.
pub fn last_successful_checkpoint(conn: &mut SqliteConnection) -> Result<Option<SyncCheckpoint>> {
    let row = sync_logs::table
        .filter(sync_logs::status.eq(CheckpointStatus::Success.as_str()))
        .filter(sync_logs::table_name.eq(CheckpointScope::All.as_column_value()))
        .filter(sync_logs::deleted_at.is_null())
        .order((sync_logs::created_at.desc(), sync_logs::id.desc()))
        .select(SyncLogDB::as_select())
        .first::<SyncLogDB>(conn)
        .optional()
        .map_err(StorageError::from)?;
    row.map(SyncCheckpoint::try_from).transpose()
}

/// Every checkpoint, newest first.
pub fn list_checkpoints(conn: &mut SqliteConnection) -> Result<Vec<SyncCheckpoint>> {
    sync_logs::table
        .filter(sync_logs::deleted_at.is_null())
        .order((sync_logs::created_at.desc(), sync_logs::id.desc()))
        .select(SyncLogDB::as_select())
        .load::<SyncLogDB>(conn)
        .map_err(StorageError::from)?
        .into_iter()
        .map(SyncCheckpoint::try_from)
        .collect()
}
