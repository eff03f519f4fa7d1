//! Parsing of backend-supplied suggestion candidates.
//!
//! Accepted shapes, tried in order: `{"suggestions": [...]}`, a bare array,
//! the outermost `{...}` embedded in prose, and finally lines of the form
//! `"original" -> "suggested"`. Anything else yields no candidates.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use super::detectors::{detect_section, QuantityKind, RoleLevel};
use super::{ConfidenceTier, LocationHint, Suggestion, SuggestionCategory, SuggestionSource};
use crate::llm_client::strip_json_fences;

const FALLBACK_SCORE: f32 = 0.6;
const DEFAULT_SCORE: f32 = 0.7;
const DEFAULT_IMPACT: u8 = 3;
const MAX_ALTERNATIVES: usize = 3;

static ARROW_LINE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#""([^"]+)"\s*(?:->|→|=>)\s*"([^"]+)""#).ok());

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    suggestions: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    original_text: String,
    #[serde(default)]
    suggested_text: String,
    #[serde(default, alias = "confidence")]
    confidence_score: Option<f64>,
    #[serde(default)]
    impact_score: Option<f64>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default, alias = "line")]
    line_number: Option<usize>,
    #[serde(default)]
    section: Option<String>,
    #[serde(default)]
    alternatives: Vec<String>,
    #[serde(default)]
    estimated_value: Option<String>,
}

/// Parses a backend response into suggestions located in `original_text`.
/// `target_text` sets the seniority used to fill missing alternatives.
pub fn parse_candidates(response: &str, original_text: &str, target_text: &str) -> Vec<Suggestion> {
    let lines: Vec<&str> = original_text.lines().collect();
    let level = RoleLevel::infer(target_text);

    let candidates = match decode(response) {
        Some(candidates) => candidates,
        None => {
            let fallback = parse_arrow_lines(response);
            if fallback.is_empty() && !response.trim().is_empty() {
                warn!("Backend analysis was not parseable; using local suggestions only");
            }
            fallback
        }
    };

    let suggestions: Vec<Suggestion> = candidates
        .into_iter()
        .filter_map(|c| into_suggestion(c, &lines, level))
        .collect();
    debug!("Parsed {} external suggestion candidates", suggestions.len());
    suggestions
}

fn decode(response: &str) -> Option<Vec<Candidate>> {
    let text = strip_json_fences(response);
    if let Ok(envelope) = serde_json::from_str::<Envelope>(text) {
        return Some(envelope.suggestions);
    }
    if let Ok(list) = serde_json::from_str::<Vec<Candidate>>(text) {
        return Some(list);
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Envelope>(&text[start..=end])
        .ok()
        .map(|e| e.suggestions)
}

fn parse_arrow_lines(response: &str) -> Vec<Candidate> {
    let Some(re) = ARROW_LINE.as_ref() else {
        return Vec::new();
    };
    response
        .lines()
        .filter_map(|line| re.captures(line))
        .map(|caps| Candidate {
            category: None,
            original_text: caps[1].to_string(),
            suggested_text: caps[2].to_string(),
            confidence_score: Some(f64::from(FALLBACK_SCORE)),
            impact_score: None,
            reasoning: None,
            line_number: None,
            section: None,
            alternatives: Vec::new(),
            estimated_value: None,
        })
        .collect()
}

fn into_suggestion(c: Candidate, lines: &[&str], level: RoleLevel) -> Option<Suggestion> {
    let original = c.original_text.trim();
    let suggested = c.suggested_text.trim();
    if original.is_empty() || suggested.is_empty() || original == suggested {
        return None;
    }

    let category = c
        .category
        .as_deref()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(SuggestionCategory::ImpactAmplification);

    let score = c.confidence_score.map_or(DEFAULT_SCORE, |s| s as f32);
    let impact = c
        .impact_score
        .map_or(DEFAULT_IMPACT, |i| i.round().clamp(1.0, 5.0) as u8);

    // Trust a reported line only when the text is actually on it.
    let line = c
        .line_number
        .filter(|&n| lines.get(n).is_some_and(|l| l.contains(original)))
        .or_else(|| lines.iter().position(|l| l.contains(original)));
    let section = c
        .section
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .or_else(|| line.map(|n| detect_section(lines, n)));

    let reasoning = c
        .reasoning
        .unwrap_or_else(|| "Suggested by the analysis backend".to_string());

    let mut suggestion = Suggestion::new(
        category,
        original,
        suggested,
        score,
        impact,
        reasoning,
        LocationHint { line, section },
    )
    .from_source(SuggestionSource::External);

    let mut alternatives = c.alternatives;
    if suggestion.tier == ConfidenceTier::NeedsInfo {
        if alternatives.len() < 2 {
            alternatives = QuantityKind::TeamSize
                .options(level)
                .iter()
                .map(|o| o.to_string())
                .collect();
        }
        alternatives.truncate(MAX_ALTERNATIVES);
    }
    let estimated = c
        .estimated_value
        .or_else(|| match suggestion.tier {
            ConfidenceTier::NeedsInfo => alternatives.get(1).cloned(),
            _ => None,
        });

    suggestion = suggestion.with_alternatives(alternatives);
    if let Some(value) = estimated {
        suggestion = suggestion.with_estimated_value(value);
    }
    Some(suggestion)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESUME: &str = "EXPERIENCE\nWorked on the backend\nShipped features";

    #[test]
    fn test_parses_fenced_envelope() {
        let response = r#"```json
{"suggestions": [{"category": "verb_upgrade", "original_text": "Worked on", "suggested_text": "Developed", "confidence": 0.95, "impact_score": 3}]}
```"#;
        let parsed = parse_candidates(response, RESUME, "");
        assert_eq!(parsed.len(), 1);
        let s = &parsed[0];
        assert_eq!(s.category, SuggestionCategory::VerbUpgrade);
        assert_eq!(s.tier, ConfidenceTier::High);
        assert_eq!(s.location.line, Some(1));
        assert_eq!(s.location.section.as_deref(), Some("EXPERIENCE"));
        assert_eq!(s.source, SuggestionSource::External);
    }

    #[test]
    fn test_parses_envelope_embedded_in_prose() {
        let response = r#"Here you go: {"suggestions": [{"original_text": "Shipped", "suggested_text": "Launched"}]} hope it helps"#;
        let parsed = parse_candidates(response, RESUME, "");
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].category, SuggestionCategory::ImpactAmplification);
        assert_eq!(parsed[0].location.line, Some(2));
    }

    #[test]
    fn test_arrow_line_fallback() {
        let response = "Try these:\n\"Shipped features\" -> \"Shipped 12 features\"\nnothing else";
        let parsed = parse_candidates(response, RESUME, "");
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].confidence_score, 0.6);
        assert_eq!(parsed[0].tier, ConfidenceTier::Medium);
    }

    #[test]
    fn test_scores_clamped() {
        let response = r#"{"suggestions": [{"original_text": "Shipped", "suggested_text": "Launched", "confidence": 3.0, "impact_score": 12}]}"#;
        let parsed = parse_candidates(response, RESUME, "");
        assert_eq!(parsed[0].confidence_score, 1.0);
        assert_eq!(parsed[0].impact_score, 5);
    }

    #[test]
    fn test_needs_info_alternatives_are_filled_and_truncated() {
        let response = r#"{"suggestions": [
            {"category": "quantification", "original_text": "the backend", "suggested_text": "the backend for N users", "confidence": 0.3},
            {"category": "quantification", "original_text": "features", "suggested_text": "N features", "confidence": 0.2, "alternatives": ["1", "2", "3", "4"]}
        ]}"#;
        let parsed = parse_candidates(response, RESUME, "");
        assert_eq!(parsed[0].alternatives, vec!["2", "4", "6+"]);
        assert_eq!(parsed[0].estimated_value.as_deref(), Some("4"));
        assert_eq!(parsed[1].alternatives, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_wrong_line_number_is_corrected() {
        let response = r#"[{"original_text": "Shipped", "suggested_text": "Launched", "line_number": 0}]"#;
        let parsed = parse_candidates(response, RESUME, "");
        assert_eq!(parsed[0].location.line, Some(2));
    }

    #[test]
    fn test_garbage_yields_nothing() {
        assert!(parse_candidates("no idea", RESUME, "").is_empty());
        assert!(parse_candidates("", RESUME, "").is_empty());
    }
}
