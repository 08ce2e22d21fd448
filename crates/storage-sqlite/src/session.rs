//! Acting-user resolution, entitlements and the persisted tamper lock.

use diesel::prelude::*;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use solarsync_core::sync::{ActingUser, Entitlement, SyncEntity};
use solarsync_core::Result;

use crate::errors::StorageError;
use crate::ledger::{mark_tampered, record_local_write};
use crate::schema::{authentications, subscriptions};

#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = crate::schema::authentications)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SessionRowDB {
    pub uuid: String,
    pub user_uuid: Option<String>,
    pub current_jwt: Option<String>,
    pub is_logged_in: bool,
    pub last_active: Option<String>,
}

#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = crate::schema::subscriptions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct EntitlementDB {
    pub uuid: String,
    pub user_uuid: Option<String>,
    pub status: Option<String>,
    pub kind: Option<String>,
    pub tampered: bool,
    pub deleted_at: Option<String>,
}

impl SessionRowDB {
    fn into_acting_user(self) -> Option<ActingUser> {
        let user_uuid = self.user_uuid?;
        Some(ActingUser {
            user_uuid,
            auth_uuid: self.uuid,
            is_logged_in: self.is_logged_in,
            access_token: self.current_jwt.filter(|token| !token.trim().is_empty()),
        })
    }
}

impl From<EntitlementDB> for Entitlement {
    fn from(row: EntitlementDB) -> Self {
        Entitlement {
            uuid: row.uuid,
            user_uuid: row.user_uuid.unwrap_or_default(),
            status: row.status,
            kind: row.kind,
            tampered: row.tampered,
            deleted_at: row.deleted_at,
        }
    }
}

/// The logged-in session with the latest activity; when nobody is logged in,
/// the most recently active session, so a locked-out device still knows whose
/// data it holds.
pub fn load_acting_user(conn: &mut SqliteConnection) -> Result<Option<ActingUser>> {
    let logged_in = authentications::table
        .filter(authentications::deleted_at.is_null())
        .filter(authentications::user_uuid.is_not_null())
        .filter(authentications::is_logged_in.eq(true))
        .order((
            authentications::last_active.desc(),
            authentications::updated_at.desc(),
        ))
        .select(SessionRowDB::as_select())
        .first::<SessionRowDB>(conn)
        .optional()
        .map_err(StorageError::from)?;
    if let Some(row) = logged_in {
        return Ok(row.into_acting_user());
    }

    let latest = authentications::table
        .filter(authentications::deleted_at.is_null())
        .filter(authentications::user_uuid.is_not_null())
        .order((
            authentications::last_active.desc(),
            authentications::updated_at.desc(),
        ))
        .select(SessionRowDB::as_select())
        .first::<SessionRowDB>(conn)
        .optional()
        .map_err(StorageError::from)?;
    Ok(latest.and_then(SessionRowDB::into_acting_user))
}

pub fn entitlements_for(conn: &mut SqliteConnection, user_uuid: &str) -> Result<Vec<Entitlement>> {
    let rows = subscriptions::table
        .filter(subscriptions::user_uuid.eq(user_uuid))
        .order(subscriptions::updated_at.desc())
        .select(EntitlementDB::as_select())
        .load::<EntitlementDB>(conn)
        .map_err(StorageError::from)?;
    Ok(rows.into_iter().map(Entitlement::from).collect())
}

pub fn is_tamper_locked(conn: &mut SqliteConnection, user_uuid: &str) -> Result<bool> {
    let locked = subscriptions::table
        .filter(subscriptions::user_uuid.eq(user_uuid))
        .filter(subscriptions::deleted_at.is_null())
        .filter(subscriptions::tampered.eq(true))
        .count()
        .get_result::<i64>(conn)
        .map_err(StorageError::from)?;
    Ok(locked > 0)
}

/// Marks every given subscription tampered and logs the session out. Both
/// rows become dirty so the verdict is pushed.
pub fn apply_tamper_verdict(
    conn: &mut SqliteConnection,
    entitlement_uuids: &[String],
    auth_uuid: &str,
) -> Result<()> {
    for uuid in entitlement_uuids {
        mark_tampered(conn, uuid)?;
    }

    let mut logout = Map::new();
    logout.insert("is_logged_in".to_string(), Value::Bool(false));
    record_local_write(
        conn,
        SyncEntity::Authentication,
        auth_uuid,
        &logout,
        &BTreeMap::new(),
    )
}
