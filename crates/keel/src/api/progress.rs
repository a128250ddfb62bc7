//! Progress and artifact endpoints
//!
//! Read-only views of the run hosted by this process, polled by remote
//! operators while the run is in flight and used to collect results afterwards.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::header,
    response::IntoResponse,
};
use tracing::debug;

use keel_api::{DeliverableInfo, ProgressStatus};

use crate::api::error::AppError;
use crate::state::AppState;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

/// Current progress snapshot
#[utoipa::path(
    get,
    path = "/progress",
    tag = "progress",
    responses((status = 200, description = "Progress of the run", body = ProgressStatus))
)]
pub async fn progress(State(state): State<Arc<AppState>>) -> Json<ProgressStatus> {
    Json(state.progress.snapshot())
}

/// Raw contents of the run's log file
///
/// # Errors
/// Returns `AppError` if the log file cannot be read
#[utoipa::path(
    get,
    path = "/logs",
    tag = "progress",
    responses(
        (status = 200, description = "Log file contents", content_type = "text/plain"),
        (status = 500, description = "Log file unreadable", body = crate::api::ApiError)
    )
)]
pub async fn logs(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    let body = tokio::fs::read(&state.log_file)
        .await
        .map_err(|e| AppError::internal(format!("reading {}: {e}", state.log_file.display())))?;
    Ok(([(header::CONTENT_TYPE, TEXT_PLAIN)], body))
}

/// Kubeconfig of the permanent cluster
///
/// # Errors
/// Returns `AppError` with status 500 while the file is missing or empty
#[utoipa::path(
    get,
    path = "/kubeconfig",
    tag = "progress",
    responses(
        (status = 200, description = "Kubeconfig contents", content_type = "text/plain"),
        (status = 500, description = "No kubeconfig yet", body = crate::api::ApiError)
    )
)]
pub async fn kubeconfig(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    let body = tokio::fs::read(&state.kubeconfig).await.unwrap_or_default();
    if body.is_empty() {
        debug!(path = %state.kubeconfig.display(), "kubeconfig requested before it exists");
        return Err(AppError::internal("kubeconfig not available yet"));
    }
    Ok(([(header::CONTENT_TYPE, TEXT_PLAIN)], body))
}

/// Artifacts registered by the run
#[utoipa::path(
    get,
    path = "/deliverables",
    tag = "progress",
    responses((status = 200, description = "Registered artifacts", body = Vec<DeliverableInfo>))
)]
pub async fn deliverables(State(state): State<Arc<AppState>>) -> Json<Vec<DeliverableInfo>> {
    let list = state
        .progress
        .deliverable_names()
        .into_iter()
        .map(|name| DeliverableInfo {
            url: format!("/deliverables/{name}"),
            name,
        })
        .collect();
    Json(list)
}

/// Download one artifact
///
/// # Errors
/// Returns `AppError` if the name is unknown or the file cannot be read
#[utoipa::path(
    get,
    path = "/deliverables/{name}",
    tag = "progress",
    params(("name" = String, Path, description = "Deliverable name")),
    responses(
        (status = 200, description = "Artifact contents", content_type = "application/octet-stream"),
        (status = 404, description = "Unknown deliverable", body = crate::api::ApiError)
    )
)]
pub async fn deliverable(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let path = state
        .progress
        .deliverable(&name)
        .ok_or_else(|| AppError::not_found(format!("no deliverable named {name}")))?;
    let body = tokio::fs::read(&path)
        .await
        .map_err(|e| AppError::internal(format!("reading {}: {e}", path.display())))?;
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], body))
}
