//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::ProvisionError;
use crate::server::handlers::{
    cancel_handler, health_handler, last_run_handler, next_handler, retry_handler, state_handler,
    version_handler,
};
use crate::server::state::ServerState;

/// Build the status API router
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Deployment
        .route("/deployment/state", get(state_handler))
        .route("/deployment/next", get(next_handler))
        .route("/deployment/last-run", get(last_run_handler))
        .route("/deployment/retry", post(retry_handler))
        .route("/deployment/cancel", post(cancel_handler))
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), ProvisionError>>, ProvisionError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting status server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| ProvisionError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| ProvisionError::ServerError(e.to_string()))
    });

    Ok(handle)
}
