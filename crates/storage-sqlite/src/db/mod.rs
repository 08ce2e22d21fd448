//! Database bootstrap: file location, connection pool, migrations and the
//! single writer.

pub mod write_actor;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use log::info;

use solarsync_core::Result;

use crate::errors::StorageError;

pub use write_actor::{spawn_writer, WriteHandle};

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;
pub type DbConnection = PooledConnection<ConnectionManager<SqliteConnection>>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

const POOL_SIZE: u32 = 8;

/// Pragmas applied to every pooled connection.
#[derive(Debug)]
struct ConnectionOptions;

impl CustomizeConnection<SqliteConnection, r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> std::result::Result<(), r2d2::Error> {
        conn.batch_execute(
            "PRAGMA journal_mode = WAL; \
             PRAGMA busy_timeout = 5000; \
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(r2d2::Error::QueryError)
    }
}

/// Ensures the parent directory of the database file exists and returns the
/// path to use.
pub fn init(db_path: &str) -> Result<String> {
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(StorageError::from)?;
        }
    }
    info!("[Storage] Using database at {}", db_path);
    Ok(db_path.to_string())
}

pub fn create_pool(db_path: &str) -> Result<Arc<DbPool>> {
    let manager = ConnectionManager::<SqliteConnection>::new(db_path);
    let pool = Pool::builder()
        .max_size(POOL_SIZE)
        .connection_customizer(Box::new(ConnectionOptions))
        .build(manager)
        .map_err(StorageError::from)?;
    Ok(Arc::new(pool))
}

/// Read connection from the pool. Writes go through [`WriteHandle`].
pub fn get_connection(pool: &DbPool) -> Result<DbConnection> {
    Ok(pool.get().map_err(StorageError::from)?)
}

pub fn run_migrations(db_path: &str) -> Result<()> {
    let mut conn = SqliteConnection::establish(db_path).map_err(StorageError::from)?;
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(|e| StorageError::MigrationFailed(e.to_string()))?;
    if !applied.is_empty() {
        info!("[Storage] Applied {} migration(s)", applied.len());
    }
    Ok(())
}

/// Migrated database in a fresh temp directory. Keep the `TempDir` alive for
/// the duration of the test.
#[cfg(test)]
pub(crate) fn test_pool() -> (tempfile::TempDir, Arc<DbPool>) {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = init(&dir.path().join("local_data.db").to_string_lossy()).expect("init");
    run_migrations(&db_path).expect("migrate");
    let pool = create_pool(&db_path).expect("pool");
    (dir, pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use diesel::sql_types::BigInt;
    use tempfile::tempdir;

    #[derive(QueryableByName)]
    struct CountRow {
        #[diesel(sql_type = BigInt)]
        c: i64,
    }

    #[test]
    fn migrations_create_every_sync_table() {
        let dir = tempdir().expect("tempdir");
        let db_path = dir.path().join("nested/local_data.db");
        let db_path = init(&db_path.to_string_lossy()).expect("init");
        run_migrations(&db_path).expect("migrate");
        // Second run is a no-op.
        run_migrations(&db_path).expect("migrate again");

        let pool = create_pool(&db_path).expect("pool");
        let mut conn = get_connection(&pool).expect("conn");
        for table in solarsync_core::sync::SYNC_TABLES {
            let row = diesel::sql_query(format!(
                "SELECT COUNT(*) AS c FROM sqlite_master WHERE type = 'table' AND name = '{}'",
                table
            ))
            .get_result::<CountRow>(&mut conn)
            .expect("count");
            assert_eq!(row.c, 1, "missing table {table}");
        }
    }
}
