pub mod health;

use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::cache::handlers as cache;
use crate::queue::handlers as queue;
use crate::state::AppState;
use crate::suggestions::handlers as suggestions;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Batches and units
        .route("/api/v1/batches", post(queue::handle_submit_batch))
        .route("/api/v1/batches/:id", get(queue::handle_get_batch))
        .route(
            "/api/v1/batches/:id/cancel",
            post(queue::handle_cancel_batch),
        )
        .route("/api/v1/units/:id", get(queue::handle_get_unit))
        .route("/api/v1/units/:id/retry", post(queue::handle_retry_unit))
        .route("/api/v1/metrics", get(queue::handle_metrics))
        // Result cache
        .route("/api/v1/cache/stats", get(cache::handle_cache_stats))
        .route(
            "/api/v1/cache/:subject_id/:target_id",
            delete(cache::handle_invalidate),
        )
        // Suggestions on ad-hoc text
        .route(
            "/api/v1/suggestions/analyze",
            post(suggestions::handle_analyze),
        )
        .route("/api/v1/suggestions/apply", post(suggestions::handle_apply))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::cache::InMemoryCache;
    use crate::config::PipelineConfig;
    use crate::models::optimization::tests::sample_result;
    use crate::models::optimization::UnitRequest;
    use crate::models::profile::{SubjectProfile, TargetPosting};
    use crate::profiles::StaticProfiles;
    use crate::queue::ledger::NoopLedger;
    use crate::queue::JobQueue;
    use crate::suggestions::SuggestionEngine;
    use crate::worker::{UnitOutcome, UnitRunner, WorkerPool};

    struct EchoRunner;

    #[async_trait]
    impl UnitRunner for EchoRunner {
        async fn run(&self, request: &UnitRequest) -> UnitOutcome {
            Ok(sample_result(request.subject_id(), request.target_id()))
        }
    }

    fn app() -> Router {
        let config = PipelineConfig::default();
        let cache = Arc::new(InMemoryCache::new(config.cache_ttl));
        let pool = WorkerPool::new(Arc::new(EchoRunner), 2, Duration::from_secs(5));
        let queue = JobQueue::new(cache.clone(), Arc::new(pool), Arc::new(NoopLedger), &config);

        let profiles = StaticProfiles {
            subjects: (1..=3)
                .map(|id| SubjectProfile {
                    id,
                    name: format!("Subject {id}"),
                    ..Default::default()
                })
                .collect(),
            targets: vec![TargetPosting {
                id: 10,
                title: "Backend Engineer".to_string(),
                description: "Python".to_string(),
                ..Default::default()
            }],
        };

        build_router(AppState {
            queue: Arc::new(queue),
            cache,
            profiles: Arc::new(profiles),
            engine: SuggestionEngine::new(),
        })
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(&app(), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service"], "tailor-api");
    }

    #[tokio::test]
    async fn test_submit_and_poll_batch() {
        let app = app();
        let (status, body) = send(
            &app,
            "POST",
            "/api/v1/batches",
            Some(json!({"subject_ids": [1, 2, 3], "target_id": 10})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["unit_ids"].as_array().unwrap().len(), 3);

        let batch_uri = format!("/api/v1/batches/{}", body["batch_id"].as_str().unwrap());
        let mut batch = Value::Null;
        for _ in 0..100 {
            let (status, current) = send(&app, "GET", &batch_uri, None).await;
            assert_eq!(status, StatusCode::OK);
            batch = current;
            if batch["complete"] == true {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(batch["succeeded"], 3);
        assert_eq!(batch["total"], 3);

        let unit_id = body["unit_ids"][0].as_str().unwrap();
        let (status, unit) = send(&app, "GET", &format!("/api/v1/units/{unit_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(unit["status"], "succeeded");

        // Succeeded units are not retryable.
        let (status, _) = send(
            &app,
            "POST",
            &format!("/api/v1/units/{unit_id}/retry"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_unknown_target_and_subjects_are_404() {
        let app = app();
        let (status, _) = send(
            &app,
            "POST",
            "/api/v1/batches",
            Some(json!({"subject_ids": [1], "target_id": 99})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(
            &app,
            "POST",
            "/api/v1/batches",
            Some(json!({"subject_ids": [1, 42], "target_id": 10})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_empty_subject_list_is_rejected() {
        let (status, _) = send(
            &app(),
            "POST",
            "/api/v1/batches",
            Some(json!({"subject_ids": [], "target_id": 10})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_batch_is_404() {
        let uri = format!("/api/v1/batches/{}", uuid::Uuid::new_v4());
        let (status, _) = send(&app(), "GET", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cache_stats_and_invalidate() {
        let app = app();
        let (status, body) = send(&app, "GET", "/api/v1/cache/stats", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["backend"], "memory");
        assert_eq!(body["active_entries"], 0);

        let (status, _) = send(&app, "DELETE", "/api/v1/cache/1/10", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_analyze_and_apply_suggestions() {
        let app = app();
        let (status, body) = send(
            &app,
            "POST",
            "/api/v1/suggestions/analyze",
            Some(json!({
                "original_text": "EXPERIENCE\n• Worked on the billing service",
                "target_text": "Backend engineer"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let suggestions = body["suggestions"].clone();
        assert!(!suggestions.as_array().unwrap().is_empty());
        let first_id = suggestions[0]["id"].clone();

        let (status, applied) = send(
            &app,
            "POST",
            "/api/v1/suggestions/apply",
            Some(json!({
                "text": "EXPERIENCE\n• Worked on the billing service",
                "suggestions": suggestions,
                "accepted_ids": [first_id]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(applied["applied"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let (status, body) = send(&app(), "GET", "/api/v1/metrics", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["units"], 0);
    }
}
