use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use solarsync_cloud_sync::{SupabaseSyncClient, SyncEngine};
use solarsync_storage_sqlite::{create_pool, init, run_migrations, spawn_writer, SqliteSyncStore};

use crate::api;
use crate::config::ServerConfig;

pub struct AppState {
    pub engine: SyncEngine,
}

/// Opens the local database and wires the engine to the remote client.
pub fn build_state(config: &ServerConfig) -> anyhow::Result<Arc<AppState>> {
    let db_path = init(&config.db_path)
        .with_context(|| format!("Failed to prepare database at {}", config.db_path))?;
    run_migrations(&db_path).context("Failed to run migrations")?;
    let pool = create_pool(&db_path).context("Failed to open connection pool")?;
    let writer = spawn_writer(pool.as_ref().clone());
    let store = Arc::new(SqliteSyncStore::new(pool, writer));

    let client = Arc::new(SupabaseSyncClient::new(config.cloud.clone()));
    let engine = SyncEngine::new(store, client.clone(), client, config.cloud.bucket.clone());
    tracing::info!("Database ready at {}", db_path);

    Ok(Arc::new(AppState { engine }))
}

pub fn app(state: Arc<AppState>) -> Router {
    api::router().with_state(state)
}
