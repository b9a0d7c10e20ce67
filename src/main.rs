//! Previsit service binary: configuration, logging, schema migration, and
//! the trigger API server.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use previsit::api;
use previsit::config::ServiceConfig;
use previsit::db;
use previsit::state::AppState;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServiceConfig::from_env();
    tracing::info!(
        version = previsit::config::APP_VERSION,
        db = %config.db_path.display(),
        bind = %config.bind_addr,
        "Starting previsit"
    );

    // Open once at startup so migrations run before the first trigger.
    if let Err(e) = db::open_database(&config.db_path) {
        tracing::error!(error = %e, "Failed to open database");
        std::process::exit(1);
    }

    let state = Arc::new(AppState::new(config));
    let mut server = match api::start_server(state).await {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start server");
            std::process::exit(1);
        }
    };

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutting down");
    server.shutdown();
}
