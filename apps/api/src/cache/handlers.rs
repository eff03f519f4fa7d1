use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::cache::CacheStats;
use crate::models::profile::{SubjectId, TargetId};
use crate::state::AppState;

/// GET /api/v1/cache/stats
pub async fn handle_cache_stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.cache.stats().await)
}

/// DELETE /api/v1/cache/:subject_id/:target_id
/// Drops every cached version for the pair.
pub async fn handle_invalidate(
    State(state): State<AppState>,
    Path((subject_id, target_id)): Path<(SubjectId, TargetId)>,
) -> StatusCode {
    state.cache.invalidate(subject_id, target_id).await;
    StatusCode::NO_CONTENT
}
