use std::collections::HashMap;
use std::ops::Range;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{detectors, LocationHint, Suggestion, SuggestionCategory};

/// Result of applying accepted suggestions. `skipped` holds ids whose original
/// text was no longer present verbatim, plus ids that were never produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyOutcome {
    pub text: String,
    pub applied: Vec<String>,
    pub skipped: Vec<String>,
}

/// Stateless. Safe to share across workers.
#[derive(Debug, Clone, Copy, Default)]
pub struct SuggestionEngine;

impl SuggestionEngine {
    pub fn new() -> Self {
        Self
    }

    /// Local detector output followed by `external`, de-duplicated and ranked.
    pub fn analyze(
        &self,
        original_text: &str,
        target_text: &str,
        external: &[Suggestion],
    ) -> Vec<Suggestion> {
        let mut all = detectors::run_all(original_text, target_text);
        let local = all.len();
        all.extend(external.iter().cloned());

        let mut merged = dedupe(all);
        rank(&mut merged);
        debug!(
            "Suggestion engine: {local} local + {} external → {} ranked",
            external.len(),
            merged.len()
        );
        merged
    }

    /// Applies accepted suggestions in the order given. Each replaces a single
    /// occurrence, preferring its hinted line; stale or unknown ids are skipped.
    pub fn apply(
        &self,
        text: &str,
        suggestions: &[Suggestion],
        accepted_ids: &[String],
    ) -> ApplyOutcome {
        let by_id: HashMap<&str, &Suggestion> =
            suggestions.iter().map(|s| (s.id.as_str(), s)).collect();

        let mut buffer = text.to_string();
        let mut applied = Vec::new();
        let mut skipped = Vec::new();

        for id in accepted_ids {
            let Some(suggestion) = by_id.get(id.as_str()) else {
                skipped.push(id.clone());
                continue;
            };
            match locate(&buffer, suggestion) {
                Some(range) => {
                    buffer.replace_range(range, &suggestion.suggested_text);
                    applied.push(id.clone());
                }
                None => skipped.push(id.clone()),
            }
        }

        ApplyOutcome {
            text: buffer,
            applied,
            skipped,
        }
    }
}

/// Keeps the first-seen position of each merge key; a later duplicate replaces
/// it only with a strictly higher confidence score.
pub fn dedupe(suggestions: Vec<Suggestion>) -> Vec<Suggestion> {
    let mut index: HashMap<(SuggestionCategory, String, LocationHint), usize> = HashMap::new();
    let mut out: Vec<Suggestion> = Vec::with_capacity(suggestions.len());

    for suggestion in suggestions {
        let (category, original, location) = suggestion.merge_key();
        let key = (category, original.to_string(), location.clone());
        match index.get(&key) {
            Some(&pos) => {
                if suggestion.confidence_score > out[pos].confidence_score {
                    out[pos] = suggestion;
                }
            }
            None => {
                index.insert(key, out.len());
                out.push(suggestion);
            }
        }
    }
    out
}

/// Stable: impact descending, then confidence descending.
pub fn rank(suggestions: &mut [Suggestion]) {
    suggestions.sort_by(|a, b| {
        b.impact_score
            .cmp(&a.impact_score)
            .then_with(|| b.confidence_score.total_cmp(&a.confidence_score))
    });
}

/// Byte range of the text to replace. A hint pointing at an existing line
/// confines the search to that line; otherwise the first occurrence anywhere.
fn locate(buffer: &str, suggestion: &Suggestion) -> Option<Range<usize>> {
    let needle = suggestion.original_text.as_str();
    if needle.is_empty() {
        return None;
    }

    if let Some(line_range) = suggestion.location.line.and_then(|n| line_span(buffer, n)) {
        let offset = buffer[line_range.clone()].find(needle)?;
        let start = line_range.start + offset;
        return Some(start..start + needle.len());
    }

    buffer
        .find(needle)
        .map(|start| start..start + needle.len())
}

fn line_span(buffer: &str, line: usize) -> Option<Range<usize>> {
    let mut start = 0;
    for (idx, segment) in buffer.split('\n').enumerate() {
        if idx == line {
            return Some(start..start + segment.len());
        }
        start += segment.len() + 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suggestions::ConfidenceTier;

    fn suggestion(original: &str, score: f32, impact: u8) -> Suggestion {
        Suggestion::new(
            SuggestionCategory::ImpactAmplification,
            original,
            format!("{original}!"),
            score,
            impact,
            "",
            LocationHint::default(),
        )
    }

    #[test]
    fn test_worked_on_the_backend_scenario() {
        let engine = SuggestionEngine::new();
        let ranked = engine.analyze("Worked on the backend", "Python, Docker", &[]);

        let verb = ranked
            .iter()
            .find(|s| s.category == SuggestionCategory::VerbUpgrade)
            .unwrap();
        assert_eq!(verb.tier, ConfidenceTier::High);
        assert_eq!(verb.original_text, "Worked on");
        assert_eq!(verb.suggested_text, "Developed");

        let quant = ranked
            .iter()
            .find(|s| s.category == SuggestionCategory::Quantification)
            .unwrap();
        assert_eq!(quant.tier, ConfidenceTier::NeedsInfo);
        assert_eq!(quant.original_text, "the backend");
        assert_eq!(quant.alternatives, vec!["2", "4", "6+"]);

        // impact 5 ranks above impact 3
        assert_eq!(ranked[0].category, SuggestionCategory::Quantification);

        let ids = vec![verb.id.clone(), quant.id.clone()];
        let outcome = engine.apply("Worked on the backend", &ranked, &ids);
        assert_eq!(outcome.text, "Developed the backend with a team of 4");
        assert_eq!(outcome.applied.len(), 2);
        assert!(outcome.skipped.is_empty());
    }

    #[test]
    fn test_dedupe_keeps_higher_score_at_first_position() {
        let merged = dedupe(vec![
            suggestion("a", 0.6, 3),
            suggestion("b", 0.7, 3),
            suggestion("a", 0.8, 3),
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].original_text, "a");
        assert_eq!(merged[0].confidence_score, 0.8);
        assert_eq!(merged[1].original_text, "b");
    }

    #[test]
    fn test_dedupe_keeps_first_on_equal_score() {
        let first =
            suggestion("a", 0.7, 3).from_source(crate::suggestions::SuggestionSource::Local);
        let second =
            suggestion("a", 0.7, 3).from_source(crate::suggestions::SuggestionSource::External);
        let merged = dedupe(vec![first.clone(), second]);
        assert_eq!(merged, vec![first]);
    }

    #[test]
    fn test_same_text_in_different_sections_is_not_merged() {
        let mk = |section: &str| {
            Suggestion::new(
                SuggestionCategory::VerbUpgrade,
                "did",
                "Completed",
                0.95,
                3,
                "",
                LocationHint::at(1, section),
            )
        };
        assert_eq!(dedupe(vec![mk("EXPERIENCE"), mk("PROJECTS")]).len(), 2);
    }

    #[test]
    fn test_rank_is_stable_on_ties() {
        let mut list = vec![
            suggestion("first", 0.7, 3),
            suggestion("top", 0.7, 5),
            suggestion("second", 0.7, 3),
            suggestion("third", 0.7, 3),
            suggestion("confident", 0.9, 3),
        ];
        rank(&mut list);
        let order: Vec<&str> = list.iter().map(|s| s.original_text.as_str()).collect();
        assert_eq!(order, vec!["top", "confident", "first", "second", "third"]);
    }

    #[test]
    fn test_apply_skips_stale_suggestion_without_touching_text() {
        let engine = SuggestionEngine::new();
        let stale = suggestion("Led migrations", 0.7, 3);
        let outcome = engine.apply("Ran migrations", &[stale.clone()], &[stale.id.clone()]);
        assert_eq!(outcome.text, "Ran migrations");
        assert_eq!(outcome.skipped, vec![stale.id]);
        assert!(outcome.applied.is_empty());
    }

    #[test]
    fn test_apply_unknown_id_is_skipped() {
        let outcome = SuggestionEngine::new().apply("text", &[], &["nope".to_string()]);
        assert_eq!(outcome.skipped, vec!["nope"]);
        assert_eq!(outcome.text, "text");
    }

    #[test]
    fn test_apply_prefers_hinted_line() {
        let text = "did a\ndid b";
        let s = Suggestion::new(
            SuggestionCategory::VerbUpgrade,
            "did",
            "Completed",
            0.95,
            3,
            "",
            LocationHint::at(1, "UNKNOWN"),
        );
        let outcome = SuggestionEngine::new().apply(text, &[s.clone()], &[s.id]);
        assert_eq!(outcome.text, "did a\nCompleted b");
    }

    #[test]
    fn test_apply_skips_when_hinted_line_was_edited() {
        let s = Suggestion::new(
            SuggestionCategory::VerbUpgrade,
            "did",
            "Completed",
            0.95,
            3,
            "",
            LocationHint::at(1, "UNKNOWN"),
        );
        let outcome =
            SuggestionEngine::new().apply("did a\nwrote b", &[s.clone()], &[s.id.clone()]);
        assert_eq!(outcome.text, "did a\nwrote b");
        assert!(outcome.applied.is_empty());
        assert_eq!(outcome.skipped, vec![s.id]);
    }

    #[test]
    fn test_apply_hint_past_end_searches_whole_text() {
        let s = Suggestion::new(
            SuggestionCategory::VerbUpgrade,
            "did",
            "Completed",
            0.95,
            3,
            "",
            LocationHint::at(9, "UNKNOWN"),
        );
        let outcome = SuggestionEngine::new().apply("wrote a\ndid b", &[s.clone()], &[s.id]);
        assert_eq!(outcome.text, "wrote a\nCompleted b");
    }

    #[test]
    fn test_apply_replaces_single_occurrence() {
        let s = suggestion("x", 0.7, 3);
        let outcome = SuggestionEngine::new().apply("x x x", &[s.clone()], &[s.id]);
        assert_eq!(outcome.text, "x! x x");
    }
}
