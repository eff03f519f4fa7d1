use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::state::AppState;
use crate::suggestions::external::parse_candidates;
use crate::suggestions::{ApplyOutcome, Suggestion, SuggestionSummary};

#[derive(Deserialize)]
pub struct AnalyzeRequest {
    pub original_text: String,
    #[serde(default)]
    pub target_text: String,
    /// Raw backend analysis to merge, if the caller already has one.
    #[serde(default)]
    pub external_response: Option<String>,
}

#[derive(Serialize)]
pub struct AnalyzeResponse {
    pub suggestions: Vec<Suggestion>,
    pub summary: SuggestionSummary,
}

#[derive(Deserialize)]
pub struct ApplyRequest {
    pub text: String,
    pub suggestions: Vec<Suggestion>,
    pub accepted_ids: Vec<String>,
}

/// POST /api/v1/suggestions/analyze
pub async fn handle_analyze(
    State(state): State<AppState>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Json<AnalyzeResponse>, AppError> {
    if req.original_text.trim().is_empty() {
        return Err(AppError::Validation("original_text must not be empty".into()));
    }

    let external = req
        .external_response
        .as_deref()
        .map(|raw| parse_candidates(raw, &req.original_text, &req.target_text))
        .unwrap_or_default();

    let suggestions = state
        .engine
        .analyze(&req.original_text, &req.target_text, &external);
    let summary = SuggestionSummary::of(&suggestions);
    Ok(Json(AnalyzeResponse {
        suggestions,
        summary,
    }))
}

/// POST /api/v1/suggestions/apply
pub async fn handle_apply(
    State(state): State<AppState>,
    Json(req): Json<ApplyRequest>,
) -> Result<Json<ApplyOutcome>, AppError> {
    Ok(Json(state.engine.apply(
        &req.text,
        &req.suggestions,
        &req.accepted_ids,
    )))
}
