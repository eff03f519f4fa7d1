//! Suggestion Engine: ranked, de-duplicated edit suggestions for a resume.
//!
//! Two sources feed one list. Local detectors (`detectors`) scan the text line
//! by line; external candidates (`external`) come from the analysis backend.
//! `SuggestionEngine` merges, de-duplicates and ranks them, and applies
//! accepted suggestions to a text buffer.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub mod detectors;
pub mod engine;
pub mod external;
pub mod handlers;

pub use self::engine::{ApplyOutcome, SuggestionEngine};

pub const HIGH_THRESHOLD: f32 = 0.9;
pub const MEDIUM_THRESHOLD: f32 = 0.5;

// ────────────────────────────────────────────────────────────────────────────
// Classification
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionCategory {
    VerbUpgrade,
    Quantification,
    StarTransformation,
    IndustryTerminology,
    RedundancyFix,
    ImpactAmplification,
    AchievementExtraction,
    GrammarFix,
    FillerRemoval,
    Formatting,
}

impl SuggestionCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuggestionCategory::VerbUpgrade => "verb_upgrade",
            SuggestionCategory::Quantification => "quantification",
            SuggestionCategory::StarTransformation => "star_transformation",
            SuggestionCategory::IndustryTerminology => "industry_terminology",
            SuggestionCategory::RedundancyFix => "redundancy_fix",
            SuggestionCategory::ImpactAmplification => "impact_amplification",
            SuggestionCategory::AchievementExtraction => "achievement_extraction",
            SuggestionCategory::GrammarFix => "grammar_fix",
            SuggestionCategory::FillerRemoval => "filler_removal",
            SuggestionCategory::Formatting => "formatting",
        }
    }
}

impl fmt::Display for SuggestionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SuggestionCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace([' ', '-'], "_");
        let category = match normalized.as_str() {
            "verb_upgrade" => SuggestionCategory::VerbUpgrade,
            "quantification" => SuggestionCategory::Quantification,
            "star_transformation" => SuggestionCategory::StarTransformation,
            "industry_terminology" => SuggestionCategory::IndustryTerminology,
            "redundancy_fix" => SuggestionCategory::RedundancyFix,
            "impact_amplification" => SuggestionCategory::ImpactAmplification,
            "achievement_extraction" => SuggestionCategory::AchievementExtraction,
            "grammar_fix" => SuggestionCategory::GrammarFix,
            "filler_removal" => SuggestionCategory::FillerRemoval,
            "formatting" => SuggestionCategory::Formatting,
            other => return Err(format!("unknown suggestion category '{other}'")),
        };
        Ok(category)
    }
}

/// HIGH is safe to auto-apply, MEDIUM needs explicit acceptance, NEEDS_INFO
/// carries concrete alternatives the user picks from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfidenceTier {
    High,
    Medium,
    NeedsInfo,
}

impl ConfidenceTier {
    pub fn from_score(score: f32) -> Self {
        if score >= HIGH_THRESHOLD {
            ConfidenceTier::High
        } else if score >= MEDIUM_THRESHOLD {
            ConfidenceTier::Medium
        } else {
            ConfidenceTier::NeedsInfo
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionSource {
    Local,
    External,
}

/// Where in the document a suggestion applies. `line` is zero-based.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocationHint {
    pub line: Option<usize>,
    pub section: Option<String>,
}

impl LocationHint {
    pub fn at(line: usize, section: impl Into<String>) -> Self {
        Self {
            line: Some(line),
            section: Some(section.into()),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Suggestion
// ────────────────────────────────────────────────────────────────────────────

/// One proposed edit. Immutable once produced; applying it yields a new buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub id: String,
    pub category: SuggestionCategory,
    pub tier: ConfidenceTier,
    pub original_text: String,
    pub suggested_text: String,
    pub confidence_score: f32,
    pub impact_score: u8,
    pub reasoning: String,
    pub location: LocationHint,
    #[serde(default)]
    pub alternatives: Vec<String>,
    #[serde(default)]
    pub estimated_value: Option<String>,
    pub source: SuggestionSource,
}

impl Suggestion {
    /// Builds a local suggestion. Score is clamped to [0, 1], impact to [1, 5];
    /// the tier and id are derived, never supplied.
    pub fn new(
        category: SuggestionCategory,
        original_text: impl Into<String>,
        suggested_text: impl Into<String>,
        confidence_score: f32,
        impact_score: u8,
        reasoning: impl Into<String>,
        location: LocationHint,
    ) -> Self {
        let original_text = original_text.into();
        let confidence_score = if confidence_score.is_nan() {
            0.0
        } else {
            confidence_score.clamp(0.0, 1.0)
        };
        Self {
            id: suggestion_id(category, &location, &original_text),
            category,
            tier: ConfidenceTier::from_score(confidence_score),
            original_text,
            suggested_text: suggested_text.into(),
            confidence_score,
            impact_score: impact_score.clamp(1, 5),
            reasoning: reasoning.into(),
            location,
            alternatives: Vec::new(),
            estimated_value: None,
            source: SuggestionSource::Local,
        }
    }

    pub fn with_alternatives(mut self, alternatives: Vec<String>) -> Self {
        self.alternatives = alternatives;
        self
    }

    pub fn with_estimated_value(mut self, value: impl Into<String>) -> Self {
        self.estimated_value = Some(value.into());
        self
    }

    pub fn from_source(mut self, source: SuggestionSource) -> Self {
        self.source = source;
        self
    }

    /// The identity used for de-duplication.
    pub fn merge_key(&self) -> (SuggestionCategory, &str, &LocationHint) {
        (self.category, self.original_text.as_str(), &self.location)
    }
}

/// `<category>-<10 hex chars>` over (category, line, section, original text).
/// Local and external suggestions share this scheme, so equal merge keys
/// always mean equal ids.
pub fn suggestion_id(
    category: SuggestionCategory,
    location: &LocationHint,
    original_text: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(category.as_str().as_bytes());
    hasher.update([0u8]);
    if let Some(line) = location.line {
        hasher.update(line.to_le_bytes());
    }
    hasher.update([0u8]);
    if let Some(section) = &location.section {
        hasher.update(section.as_bytes());
    }
    hasher.update([0u8]);
    hasher.update(original_text.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{}-{}", category.as_str(), &digest[..10])
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestionSummary {
    pub total: usize,
    pub high: usize,
    pub medium: usize,
    pub needs_info: usize,
    /// Suggestions safe to apply without review: the HIGH tier.
    #[serde(default)]
    pub auto_applied: usize,
}

impl SuggestionSummary {
    pub fn of(suggestions: &[Suggestion]) -> Self {
        suggestions
            .iter()
            .fold(SuggestionSummary::default(), |mut acc, s| {
                acc.total += 1;
                match s.tier {
                    ConfidenceTier::High => {
                        acc.high += 1;
                        acc.auto_applied += 1;
                    }
                    ConfidenceTier::Medium => acc.medium += 1,
                    ConfidenceTier::NeedsInfo => acc.needs_info += 1,
                }
                acc
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_thresholds() {
        assert_eq!(ConfidenceTier::from_score(0.95), ConfidenceTier::High);
        assert_eq!(ConfidenceTier::from_score(0.9), ConfidenceTier::High);
        assert_eq!(ConfidenceTier::from_score(0.89), ConfidenceTier::Medium);
        assert_eq!(ConfidenceTier::from_score(0.5), ConfidenceTier::Medium);
        assert_eq!(ConfidenceTier::from_score(0.49), ConfidenceTier::NeedsInfo);
    }

    #[test]
    fn test_tier_wire_format() {
        let json = serde_json::to_string(&ConfidenceTier::NeedsInfo).unwrap();
        assert_eq!(json, "\"NEEDS_INFO\"");
    }

    #[test]
    fn test_new_clamps_and_derives_tier() {
        let s = Suggestion::new(
            SuggestionCategory::VerbUpgrade,
            "did",
            "Completed",
            1.7,
            9,
            "",
            LocationHint::default(),
        );
        assert_eq!(s.confidence_score, 1.0);
        assert_eq!(s.impact_score, 5);
        assert_eq!(s.tier, ConfidenceTier::High);
    }

    #[test]
    fn test_id_depends_on_location() {
        let a = suggestion_id(
            SuggestionCategory::VerbUpgrade,
            &LocationHint::at(1, "EXPERIENCE"),
            "did",
        );
        let b = suggestion_id(
            SuggestionCategory::VerbUpgrade,
            &LocationHint::at(1, "PROJECTS"),
            "did",
        );
        assert_ne!(a, b);
        assert!(a.starts_with("verb_upgrade-"));
        assert_eq!(a.len(), "verb_upgrade-".len() + 10);
    }

    #[test]
    fn test_category_parse_is_lenient() {
        assert_eq!(
            "Verb Upgrade".parse::<SuggestionCategory>(),
            Ok(SuggestionCategory::VerbUpgrade)
        );
        assert!("rewrite".parse::<SuggestionCategory>().is_err());
    }

    #[test]
    fn test_summary_counts_tiers() {
        let mk = |score| {
            Suggestion::new(
                SuggestionCategory::ImpactAmplification,
                format!("x{score}"),
                "y",
                score,
                3,
                "",
                LocationHint::default(),
            )
        };
        let summary = SuggestionSummary::of(&[mk(0.95), mk(0.7), mk(0.6), mk(0.2)]);
        assert_eq!(
            summary,
            SuggestionSummary {
                total: 4,
                high: 1,
                medium: 2,
                needs_info: 1,
                auto_applied: 1,
            }
        );
    }

    #[test]
    fn test_summary_reads_payloads_without_auto_applied() {
        let summary: SuggestionSummary =
            serde_json::from_str(r#"{"total": 2, "high": 2, "medium": 0, "needs_info": 0}"#)
                .unwrap();
        assert_eq!(summary.auto_applied, 0);
        assert_eq!(summary.high, 2);
    }
}
