//! Request handlers for the control surface.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;

use super::{
    error::ApiError,
    models::{SettingsUpdate, WorkerView},
    state::AppState,
};
use crate::worker::WorkerId;

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// GET /workers
pub async fn list_workers(State(state): State<AppState>) -> impl IntoResponse {
    let workers: Vec<WorkerView> = state
        .scheduler
        .list()
        .await
        .into_iter()
        .map(WorkerView::from)
        .collect();
    Json(workers)
}

/// POST /workers/{id}/start
pub async fn start_worker(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if state.scheduler.start_now(WorkerId::from(id.clone())).await {
        Ok(StatusCode::ACCEPTED)
    } else {
        Err(ApiError::NotFound(format!("worker {id}")))
    }
}

/// POST /workers/{id}/cancel
pub async fn cancel_worker(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if state.scheduler.cancel(WorkerId::from(id.clone())).await {
        Ok(StatusCode::ACCEPTED)
    } else {
        Err(ApiError::NotFound(format!("worker {id}")))
    }
}

/// DELETE /workers/{id}
pub async fn delete_worker(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if state.scheduler.delete(WorkerId::from(id.clone())).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("worker {id}")))
    }
}

/// GET /settings
pub async fn get_settings(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.config.snapshot().as_ref().clone())
}

/// PUT /settings
///
/// Applies a partial overlay onto the current snapshot; the merged result
/// only becomes active if it validates as a whole.
pub async fn put_settings(
    State(state): State<AppState>,
    Json(update): Json<SettingsUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let merged = update.merge_onto(state.config.snapshot().as_ref().clone());
    state.config.swap(merged)?;
    Ok(Json(state.config.snapshot().as_ref().clone()))
}

/// GET /metrics
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}
