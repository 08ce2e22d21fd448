//! Local HTTP sidecar exposing the sync engine.

mod api;
mod config;
mod error;
mod main_lib;

use tracing_subscriber::EnvFilter;

use crate::config::ServerConfig;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", err);
    }
    tracing::info!("Shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = ServerConfig::from_env()?;
    let state = main_lib::build_state(&config)?;
    let app = main_lib::app(state);

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!("Solarsync listening on {}", config.listen_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
