//! Sync endpoints: one orchestrated cycle, the forced full push and the
//! checkpoint listing.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use solarsync_cloud_sync::{SyncOutcome, SyncStatus};
use solarsync_core::sync::SyncCheckpoint;
use tracing::{info, warn};

use crate::error::ApiResult;
use crate::main_lib::AppState;

fn outcome_response(outcome: SyncOutcome) -> (StatusCode, Json<SyncOutcome>) {
    let status = match outcome.status {
        SyncStatus::Ok | SyncStatus::TamperLock => StatusCode::OK,
        SyncStatus::Failed => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(outcome))
}

async fn run_sync(State(state): State<Arc<AppState>>) -> (StatusCode, Json<SyncOutcome>) {
    let outcome = state.engine.run_cycle().await;
    match outcome.status {
        SyncStatus::Failed => warn!("Sync failed: {}", outcome.detail),
        _ => info!(
            "Sync finished with {} in {}ms",
            outcome.status.as_str(),
            outcome.duration_ms
        ),
    }
    outcome_response(outcome)
}

async fn push_everything(State(state): State<Arc<AppState>>) -> (StatusCode, Json<SyncOutcome>) {
    let outcome = state.engine.push_everything().await;
    info!(
        "Forced push finished with {}: {} records",
        outcome.status.as_str(),
        outcome.pushed
    );
    outcome_response(outcome)
}

async fn list_checkpoints(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<SyncCheckpoint>>> {
    Ok(Json(state.engine.list_checkpoints()?))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sync", post(run_sync))
        .route("/sync/push", post(push_everything))
        .route("/sync/checkpoints", get(list_checkpoints))
}
