//! HTTP server lifecycle.
//!
//! Bind → spawn background task → return a handle with a shutdown channel.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::api::router::app_router;
use crate::state::AppState;

/// Handle to a running server.
pub struct ServerHandle {
    pub addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl ServerHandle {
    /// Shut down the server gracefully. Idempotent.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            tracing::info!("Server shutdown signal sent");
        }
    }
}

/// Start the trigger API server on the configured bind address.
pub async fn start_server(state: Arc<AppState>) -> Result<ServerHandle, String> {
    let listener = tokio::net::TcpListener::bind(state.config.bind_addr)
        .await
        .map_err(|e| format!("Failed to bind {}: {e}", state.config.bind_addr))?;

    let addr = listener
        .local_addr()
        .map_err(|e| format!("Failed to read server address: {e}"))?;

    let app = app_router(state);
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        let shutdown_signal = async move {
            let _ = shutdown_rx.await;
            tracing::info!("Server received shutdown signal");
        };

        tracing::info!(%addr, "Trigger API server started");

        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
        {
            tracing::error!("Server error: {e}");
        }

        tracing::info!("Trigger API server stopped");
    });

    Ok(ServerHandle {
        addr,
        shutdown_tx: Some(shutdown_tx),
    })
}
