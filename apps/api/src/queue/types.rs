use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::cache::CacheKey;
use crate::config::PipelineConfig;
use crate::errors::OptimizationError;
use crate::models::optimization::{OptimizationResult, UnitRequest};
use crate::models::profile::{SubjectId, TargetId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Queued,
    Processing,
    Succeeded,
    Failed,
}

impl UnitStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UnitStatus::Succeeded | UnitStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UnitStatus::Queued => "queued",
            UnitStatus::Processing => "processing",
            UnitStatus::Succeeded => "succeeded",
            UnitStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("batch must contain at least one unit")]
    EmptyBatch,

    #[error("unknown batch {0}")]
    UnknownBatch(Uuid),

    #[error("unknown unit {0}")]
    UnknownUnit(Uuid),

    #[error("unit {0} is {1} and cannot be retried")]
    NotRetryable(Uuid, &'static str),
}

/// Exponential backoff owned by the queue: `base * 2^(attempt-1)`, capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .map_or(self.cap, |d| d.min(self.cap))
    }
}

impl From<&PipelineConfig> for RetryPolicy {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base: config.retry_base,
            cap: config.retry_max,
        }
    }
}

/// One finished attempt, kept across explicit retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub error: Option<OptimizationError>,
    pub finished_at: DateTime<Utc>,
}

/// Queue-owned state of one unit.
#[derive(Debug, Clone)]
pub(crate) struct UnitRecord {
    pub id: Uuid,
    pub request: UnitRequest,
    pub key: CacheKey,
    pub status: UnitStatus,
    pub result: Option<OptimizationResult>,
    pub error: Option<OptimizationError>,
    pub attempt_count: u32,
    pub cache_hit: bool,
    /// Bumped by explicit retry; a driver holding an older epoch stops.
    pub epoch: u64,
    pub batches: Vec<Uuid>,
    pub history: Vec<AttemptRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl UnitRecord {
    pub fn new(id: Uuid, request: UnitRequest, batch_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id,
            key: request.cache_key(),
            request,
            status: UnitStatus::Queued,
            result: None,
            error: None,
            attempt_count: 0,
            cache_hit: false,
            epoch: 0,
            batches: vec![batch_id],
            history: Vec::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn snapshot(&self) -> UnitSnapshot {
        UnitSnapshot {
            unit_id: self.id,
            subject_id: self.request.subject_id(),
            target_id: self.request.target_id(),
            target_version: self.request.target_version.clone(),
            status: self.status,
            attempt_count: self.attempt_count,
            cache_hit: self.cache_hit,
            result: self.result.clone(),
            error: self.error.clone(),
            history: self.history.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct BatchRecord {
    pub unit_ids: Vec<Uuid>,
    pub cancelled: bool,
}

// ────────────────────────────────────────────────────────────────────────────
// Views returned to callers
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSnapshot {
    pub unit_id: Uuid,
    pub subject_id: SubjectId,
    pub target_id: TargetId,
    pub target_version: Option<String>,
    pub status: UnitStatus,
    pub attempt_count: u32,
    pub cache_hit: bool,
    pub result: Option<OptimizationResult>,
    pub error: Option<OptimizationError>,
    pub history: Vec<AttemptRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSubmission {
    pub batch_id: Uuid,
    pub unit_ids: Vec<Uuid>,
}

/// Computed from unit states on every call; never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchStatus {
    pub batch_id: Uuid,
    pub total: usize,
    pub queued: usize,
    pub processing: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cached: usize,
    pub cancelled: bool,
    /// `succeeded + failed == total`.
    pub complete: bool,
    pub results: Vec<UnitSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOutcome {
    pub batch_id: Uuid,
    pub cancelled_units: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueMetrics {
    pub units: usize,
    pub queued: usize,
    pub processing: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub in_flight: usize,
    pub batches: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub mean_processing_ms: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_then_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base: Duration::from_secs(1),
            cap: Duration::from_secs(5),
        };
        let delays: Vec<u64> = (1..=5).map(|a| policy.delay_for(a).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 5, 5]);
    }

    #[test]
    fn test_backoff_is_strictly_increasing_below_cap() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base: Duration::from_millis(1000),
            cap: Duration::from_millis(60_000),
        };
        assert!(policy.delay_for(1) < policy.delay_for(2));
        assert!(policy.delay_for(2) < policy.delay_for(3));
    }

    #[test]
    fn test_backoff_survives_huge_attempt_numbers() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base: Duration::from_secs(1),
            cap: Duration::from_secs(60),
        };
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_terminal_states() {
        assert!(UnitStatus::Succeeded.is_terminal());
        assert!(UnitStatus::Failed.is_terminal());
        assert!(!UnitStatus::Processing.is_terminal());
        assert!(!UnitStatus::Queued.is_terminal());
    }
}
