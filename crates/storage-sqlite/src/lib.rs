//! SQLite storage for Solarsync: the local database, the dirty ledger write
//! path and the [`SqliteSyncStore`] implementation of the sync store port.

pub mod checkpoints;
pub mod db;
pub mod errors;
pub mod ledger;
pub mod schema;
pub mod session;

mod sync_store;

pub use db::{create_pool, get_connection, init, run_migrations, spawn_writer, DbPool, WriteHandle};
pub use errors::StorageError;
pub use sync_store::SqliteSyncStore;
