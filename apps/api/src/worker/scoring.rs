//! Match scoring: pluggable, trait-based scorer that measures a subject profile
//! against a target posting.
//!
//! Default: `KeywordMatchScorer` (deterministic, no backend call).
//! The optimizer holds an `Arc<dyn MatchScorer>`, so backends swap at startup.

use serde::{Deserialize, Serialize};

use crate::models::profile::{SubjectProfile, TargetPosting};

const SKILLS_WEIGHT: f32 = 40.0;
const EXPERIENCE_WEIGHT: f32 = 30.0;
const TITLE_WEIGHT: f32 = 30.0;

// ────────────────────────────────────────────────────────────────────────────
// Output
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchReport {
    /// 0.0 – 100.0, one decimal.
    pub score: f32,
    pub matched_requirements: Vec<String>,
    pub missing_requirements: Vec<String>,
    pub recommendation: String,
}

// ────────────────────────────────────────────────────────────────────────────
// Trait
// ────────────────────────────────────────────────────────────────────────────

pub trait MatchScorer: Send + Sync {
    fn score(&self, subject: &SubjectProfile, target: &TargetPosting) -> MatchReport;
}

// ────────────────────────────────────────────────────────────────────────────
// KeywordMatchScorer
// ────────────────────────────────────────────────────────────────────────────

/// Keyword scorer.
///
/// Algorithm:
/// 1. Skills: share of requirements mentioned by any subject skill, × 40
/// 2. Experience: min(total_years / required_years, 1) × 30 (15 when the posting
///    states no requirement)
/// 3. Title: 30 when any experience title contains the target title or vice versa
/// 4. Sum, cap at 100, round to one decimal
pub struct KeywordMatchScorer;

impl MatchScorer for KeywordMatchScorer {
    fn score(&self, subject: &SubjectProfile, target: &TargetPosting) -> MatchReport {
        compute_keyword_match(subject, target)
    }
}

fn compute_keyword_match(subject: &SubjectProfile, target: &TargetPosting) -> MatchReport {
    let skills: Vec<String> = subject.skills.iter().map(|s| s.to_lowercase()).collect();

    let (matched, missing): (Vec<String>, Vec<String>) = target
        .requirements
        .iter()
        .cloned()
        .partition(|req| requirement_covered(&skills, &req.to_lowercase()));

    let skills_points = if target.requirements.is_empty() {
        0.0
    } else {
        matched.len() as f32 / target.requirements.len() as f32 * SKILLS_WEIGHT
    };

    let experience_points = if target.required_years > 0.0 {
        (subject.total_years() / target.required_years).min(1.0) * EXPERIENCE_WEIGHT
    } else {
        EXPERIENCE_WEIGHT / 2.0
    };

    let title_points = if title_matches(subject, target) {
        TITLE_WEIGHT
    } else {
        0.0
    };

    let raw = (skills_points + experience_points + title_points).min(100.0);
    let score = (raw * 10.0).round() / 10.0;

    let recommendation = build_recommendation(score, &missing);
    MatchReport {
        score,
        matched_requirements: matched,
        missing_requirements: missing,
        recommendation,
    }
}

fn requirement_covered(skills: &[String], requirement: &str) -> bool {
    skills.iter().any(|skill| {
        !skill.is_empty()
            && (requirement.contains(skill.as_str()) || skill.contains(requirement))
    })
}

fn title_matches(subject: &SubjectProfile, target: &TargetPosting) -> bool {
    let wanted = target.title.trim().to_lowercase();
    if wanted.is_empty() {
        return false;
    }
    subject.experience.iter().any(|item| {
        let held = item.title.trim().to_lowercase();
        !held.is_empty() && (held.contains(&wanted) || wanted.contains(&held))
    })
}

fn build_recommendation(score: f32, missing: &[String]) -> String {
    let top_gaps: Vec<&str> = missing.iter().take(3).map(String::as_str).collect();

    if score >= 80.0 {
        "Strong match. The profile covers the key requirements.".to_string()
    } else if score >= 50.0 {
        if top_gaps.is_empty() {
            format!("Moderate match ({score}/100). Strengthen experience detail.")
        } else {
            format!(
                "Moderate match ({score}/100). Consider highlighting: {}.",
                top_gaps.join(", ")
            )
        }
    } else {
        format!(
            "Low match ({score}/100). Significant gaps: {}.",
            if top_gaps.is_empty() {
                "experience and title".to_string()
            } else {
                top_gaps.join(", ")
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::profile::ExperienceItem;

    fn subject(skills: &[&str], title: &str, years: f32) -> SubjectProfile {
        SubjectProfile {
            id: 1,
            name: "Ada".to_string(),
            skills: skills.iter().map(|s| s.to_string()).collect(),
            experience: vec![ExperienceItem {
                title: title.to_string(),
                company: "Acme".to_string(),
                years,
                description: None,
            }],
            ..Default::default()
        }
    }

    fn target(requirements: &[&str], title: &str, years: f32) -> TargetPosting {
        TargetPosting {
            id: 2,
            title: title.to_string(),
            description: "Build services".to_string(),
            requirements: requirements.iter().map(|s| s.to_string()).collect(),
            required_years: years,
            ..Default::default()
        }
    }

    #[test]
    fn test_perfect_match_scores_100() {
        let report = KeywordMatchScorer.score(
            &subject(&["Python", "Docker"], "Backend Engineer", 5.0),
            &target(&["Python", "Docker"], "Backend Engineer", 3.0),
        );
        assert_eq!(report.score, 100.0);
        assert!(report.missing_requirements.is_empty());
        assert!(report.recommendation.contains("Strong match"));
    }

    #[test]
    fn test_partial_skills_and_years() {
        let report = KeywordMatchScorer.score(
            &subject(&["Python"], "Data Analyst", 1.0),
            &target(&["Python", "Docker", "Kubernetes"], "Backend Engineer", 3.0),
        );
        // 1/3 × 40 + 1/3 × 30 + 0 = 23.33 → 23.3
        assert_eq!(report.score, 23.3);
        assert_eq!(report.matched_requirements, vec!["Python"]);
        assert_eq!(report.missing_requirements, vec!["Docker", "Kubernetes"]);
        assert!(report.recommendation.contains("Docker"));
    }

    #[test]
    fn test_no_required_years_gives_half_credit() {
        let report = KeywordMatchScorer.score(
            &subject(&[], "Cook", 0.0),
            &target(&[], "Backend Engineer", 0.0),
        );
        assert_eq!(report.score, 15.0);
    }

    #[test]
    fn test_title_containment_either_way() {
        let report = KeywordMatchScorer.score(
            &subject(&[], "Senior Backend Engineer", 0.0),
            &target(&[], "Backend Engineer", 0.0),
        );
        assert_eq!(report.score, 45.0);
    }

    #[test]
    fn test_score_is_capped() {
        let report = KeywordMatchScorer.score(
            &subject(&["rust"], "Engineer", 40.0),
            &target(&["Rust"], "Engineer", 1.0),
        );
        assert!(report.score <= 100.0);
    }
}
