//! HTTP request handlers

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use tracing::{error, info};

use crate::deploy::orchestrator::{Progress, RunReport};
use crate::deploy::queue::NextOperation;
use crate::errors::ProvisionError;
use crate::models::operation::{DeploymentState, Operation};
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "provisioner".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    Json(version_info())
}

/// Deployment state response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateResponse {
    pub progress: Progress,
    pub state: DeploymentState,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_operation: Option<String>,
}

/// Full deployment state with progress
pub async fn state_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<impl IntoResponse, StatusCode> {
    let progress = state.orchestrator.progress().await.map_err(status_code)?;
    let snapshot = state
        .orchestrator
        .snapshot()
        .await
        .ok_or(StatusCode::SERVICE_UNAVAILABLE)?;

    Ok(Json(StateResponse {
        progress,
        state: snapshot,
        active_operation: state.orchestrator.active_operation(),
    }))
}

/// Next operation response
#[derive(Debug, Serialize)]
pub struct NextResponse {
    /// `ready`, `blocked` or `complete`
    pub status: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<Operation>,
}

/// Next runnable operation handler
pub async fn next_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<impl IntoResponse, StatusCode> {
    let next = state.orchestrator.next_operation().await.map_err(status_code)?;

    let (status, operation) = match next {
        NextOperation::Ready(op) => ("ready", Some(op)),
        NextOperation::Blocked(op) => ("blocked", Some(op)),
        NextOperation::Complete => ("complete", None),
    };

    Ok(Json(NextResponse {
        status: status.to_string(),
        operation,
    }))
}

/// Most recent execution report
pub async fn last_run_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<RunReport>, StatusCode> {
    state
        .orchestrator
        .last_run()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

/// Retry response
#[derive(Debug, Serialize)]
pub struct RetryResponse {
    pub retried: Vec<String>,
}

/// Return failed operations to pending and resume the queue
pub async fn retry_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<impl IntoResponse, StatusCode> {
    let retried = state.orchestrator.retry_failed().await.map_err(status_code)?;
    info!("Retry requested, {} operations reset", retried.len());

    state.resume.notify_one();
    Ok(Json(RetryResponse { retried }))
}

/// Cancel response
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

/// Cancel the running execution, returning once its state is persisted
pub async fn cancel_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let cancelled = state.orchestrator.cancel().await;
    Json(CancelResponse { cancelled })
}

fn status_code(err: ProvisionError) -> StatusCode {
    match err {
        ProvisionError::ExecutionInProgress(_) => StatusCode::CONFLICT,
        ProvisionError::ValidationError(_) => StatusCode::SERVICE_UNAVAILABLE,
        ProvisionError::StorageUnavailable(_) => StatusCode::BAD_GATEWAY,
        e => {
            error!("Request failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
