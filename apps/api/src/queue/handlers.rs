use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::optimization::UnitRequest;
use crate::models::profile::{SubjectId, TargetId};
use crate::queue::{BatchStatus, BatchSubmission, CancelOutcome, QueueMetrics, UnitSnapshot};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct SubmitBatchRequest {
    pub subject_ids: Vec<SubjectId>,
    pub target_id: TargetId,
    /// Derived from the posting content when omitted.
    #[serde(default)]
    pub target_version: Option<String>,
}

#[derive(Serialize)]
pub struct RetryResponse {
    pub unit_id: Uuid,
}

/// POST /api/v1/batches
pub async fn handle_submit_batch(
    State(state): State<AppState>,
    Json(req): Json<SubmitBatchRequest>,
) -> Result<(StatusCode, Json<BatchSubmission>), AppError> {
    if req.subject_ids.is_empty() {
        return Err(AppError::Validation("subject_ids must not be empty".into()));
    }

    let target = state
        .profiles
        .target(req.target_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("target {}", req.target_id)))?;

    let subjects = state.profiles.subjects(&req.subject_ids).await?;
    let missing: Vec<SubjectId> = req
        .subject_ids
        .iter()
        .copied()
        .filter(|id| !subjects.iter().any(|s| s.id == *id))
        .collect();
    if !missing.is_empty() {
        return Err(AppError::NotFound(format!("subjects {missing:?}")));
    }

    let version = req
        .target_version
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| target.content_version());

    let requests = subjects
        .into_iter()
        .map(|subject| UnitRequest::new(subject, target.clone(), Some(version.clone())))
        .collect();

    let submission = state.queue.submit_batch(requests)?;
    Ok((StatusCode::ACCEPTED, Json(submission)))
}

/// GET /api/v1/batches/:id
pub async fn handle_get_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> Result<Json<BatchStatus>, AppError> {
    Ok(Json(state.queue.get_batch_status(batch_id)?))
}

/// POST /api/v1/batches/:id/cancel
pub async fn handle_cancel_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> Result<Json<CancelOutcome>, AppError> {
    Ok(Json(state.queue.cancel_batch(batch_id).await?))
}

/// GET /api/v1/units/:id
pub async fn handle_get_unit(
    State(state): State<AppState>,
    Path(unit_id): Path<Uuid>,
) -> Result<Json<UnitSnapshot>, AppError> {
    Ok(Json(state.queue.get_unit_status(unit_id)?))
}

/// POST /api/v1/units/:id/retry
pub async fn handle_retry_unit(
    State(state): State<AppState>,
    Path(unit_id): Path<Uuid>,
) -> Result<(StatusCode, Json<RetryResponse>), AppError> {
    let unit_id = state.queue.retry_unit(unit_id)?;
    Ok((StatusCode::ACCEPTED, Json(RetryResponse { unit_id })))
}

/// GET /api/v1/metrics
pub async fn handle_metrics(State(state): State<AppState>) -> Json<QueueMetrics> {
    Json(state.queue.metrics())
}
