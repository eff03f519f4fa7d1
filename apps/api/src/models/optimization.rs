use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::CacheKey;
use crate::models::profile::{SubjectId, SubjectProfile, TargetId, TargetPosting};
use crate::suggestions::{Suggestion, SuggestionSummary};
use crate::worker::scoring::MatchReport;

/// Input for one optimization unit: one subject against one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitRequest {
    pub subject: SubjectProfile,
    pub target: TargetPosting,
    #[serde(default)]
    pub target_version: Option<String>,
}

impl UnitRequest {
    pub fn new(
        subject: SubjectProfile,
        target: TargetPosting,
        target_version: Option<String>,
    ) -> Self {
        Self {
            subject,
            target,
            target_version,
        }
    }

    pub fn subject_id(&self) -> SubjectId {
        self.subject.id
    }

    pub fn target_id(&self) -> TargetId {
        self.target.id
    }

    pub fn version(&self) -> Option<&str> {
        self.target_version.as_deref()
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(self.subject_id(), self.target_id(), self.version())
    }
}

/// Composed output of one unit. This is the cache payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub subject_id: SubjectId,
    pub target_id: TargetId,
    pub target_version: Option<String>,
    pub original_text: String,
    pub optimized_text: String,
    pub match_score: MatchReport,
    pub suggestions: Vec<Suggestion>,
    pub summary: SuggestionSummary,
    pub generated_at: DateTime<Utc>,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    /// Deterministic payload for cache and queue tests.
    pub(crate) fn sample_result(subject_id: SubjectId, target_id: TargetId) -> OptimizationResult {
        OptimizationResult {
            subject_id,
            target_id,
            target_version: None,
            original_text: "Worked on the backend".to_string(),
            optimized_text: "Developed the backend".to_string(),
            match_score: MatchReport {
                score: 70.0,
                matched_requirements: vec!["Python".to_string()],
                missing_requirements: vec!["Docker".to_string()],
                recommendation: "Good match.".to_string(),
            },
            suggestions: vec![],
            summary: SuggestionSummary::default(),
            generated_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_cache_key_uses_version() {
        let request = UnitRequest::new(
            SubjectProfile {
                id: 3,
                ..Default::default()
            },
            TargetPosting {
                id: 9,
                ..Default::default()
            },
            Some("abc".to_string()),
        );
        assert_eq!(request.cache_key().as_str(), "opt:3:9:abc");
    }

    #[test]
    fn test_result_survives_json() {
        let result = sample_result(1, 2);
        let json = serde_json::to_string(&result).unwrap();
        let back: OptimizationResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
    }
}
