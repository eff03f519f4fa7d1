//! Local heuristic detectors. Each is a pure function over line-scanned text
//! with a fixed confidence score, so the same input always yields the same
//! suggestions.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use super::{LocationHint, Suggestion, SuggestionCategory};

const WEAK_VERB_SCORE: f32 = 0.95;
const FILLER_SCORE: f32 = 0.98;
const REDUNDANCY_SCORE: f32 = 0.75;
const QUANTIFICATION_SCORE: f32 = 0.4;

const SECTIONS: [&str; 5] = ["SUMMARY", "EXPERIENCE", "EDUCATION", "SKILLS", "PROJECTS"];
const SECTION_LOOKBACK: usize = 10;
const REDUNDANCY_LIMIT: usize = 3;
const BULLETS: [char; 3] = ['•', '-', '*'];

fn compile_regex(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(regex) => regex,
        Err(_compile_err) => match Regex::new(r"$^") {
            Ok(fallback) => fallback,
            Err(fallback_err) => panic!("hardcoded fallback regex must compile: {fallback_err}"),
        },
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tables
// ────────────────────────────────────────────────────────────────────────────

struct WeakVerb {
    pattern: Regex,
    phrase: &'static str,
    /// (context word, upgrade when the line mentions it)
    contextual: Option<(&'static str, &'static str)>,
    fallback: &'static str,
}

fn weak_verb(
    phrase: &'static str,
    contextual: Option<(&'static str, &'static str)>,
    fallback: &'static str,
) -> WeakVerb {
    WeakVerb {
        pattern: compile_regex(&format!(r"(?i)\b{}\b", regex::escape(phrase))),
        phrase,
        contextual,
        fallback,
    }
}

static WEAK_VERBS: LazyLock<Vec<WeakVerb>> = LazyLock::new(|| {
    vec![
        weak_verb("worked on", None, "Developed"),
        weak_verb("handled", Some(("team", "Managed")), "Processed"),
        weak_verb("did", Some(("project", "Executed")), "Completed"),
        weak_verb("made", Some(("feature", "Created")), "Built"),
        weak_verb("helped", Some(("team", "Supported")), "Facilitated"),
        weak_verb("assisted", Some(("team", "Collaborated with")), "Supported"),
        weak_verb("responsible for", None, "Led"),
        weak_verb("tasked with", None, "Delivered"),
    ]
});

// "contributed to" is not filler.
const FILLER_PHRASES: [&str; 6] = [
    "duties included",
    "in charge of",
    "involved in",
    "participated in",
    "part of",
    "member of",
];

static FILLER_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    FILLER_PHRASES
        .iter()
        .map(|phrase| {
            (
                *phrase,
                compile_regex(&format!(r"(?i)\b{}\b\s*", regex::escape(phrase))),
            )
        })
        .collect()
});

static DIGIT: LazyLock<Regex> = LazyLock::new(|| compile_regex(r"\d"));

const VERB_FAMILIES: [&[&str]; 6] = [
    &["developed", "engineered", "architected", "built", "created", "designed", "implemented"],
    &["led", "managed", "directed", "orchestrated", "spearheaded", "headed", "oversaw"],
    &["optimized", "enhanced", "improved", "streamlined", "refined", "upgraded", "accelerated"],
    &["analyzed", "evaluated", "assessed", "diagnosed", "investigated", "researched"],
    &["collaborated", "partnered", "coordinated", "facilitated", "unified"],
    &["achieved", "delivered", "generated", "increased", "reduced", "saved", "boosted"],
];

const EXTRA_ALTERNATIVES: [(&str, &[&str]); 1] = [(
    "implementing",
    &["deploying", "integrating", "launching", "introducing", "building"],
)];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleLevel {
    Junior,
    Mid,
    Senior,
    Lead,
}

impl RoleLevel {
    /// Seniority implied by the target text. Checked in order, first hit wins.
    pub fn infer(target_text: &str) -> Self {
        let lower = target_text.to_lowercase();
        let mentions = |words: &[&str]| words.iter().any(|w| lower.contains(w));
        if mentions(&["junior", "entry", "associate", "intern"]) {
            RoleLevel::Junior
        } else if mentions(&["senior", "sr.", "lead", "principal", "staff"]) {
            RoleLevel::Senior
        } else if mentions(&["manager", "director", "head", "chief"]) {
            RoleLevel::Lead
        } else {
            RoleLevel::Mid
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantityKind {
    TeamSize,
    Percentage,
    UserScale,
}

impl QuantityKind {
    /// Conservative, moderate, ambitious.
    pub fn options(self, level: RoleLevel) -> [&'static str; 3] {
        use RoleLevel::*;
        match (self, level) {
            (QuantityKind::TeamSize, Junior) => ["1", "2", "3+"],
            (QuantityKind::TeamSize, Mid) => ["2", "4", "6+"],
            (QuantityKind::TeamSize, Senior) => ["4", "6", "8+"],
            (QuantityKind::TeamSize, Lead) => ["6", "10", "12+"],
            (QuantityKind::Percentage, Junior) => ["10%", "15%", "20+%"],
            (QuantityKind::Percentage, Mid) => ["15%", "25%", "35+%"],
            (QuantityKind::Percentage, Senior) => ["25%", "35%", "50+%"],
            (QuantityKind::Percentage, Lead) => ["30%", "45%", "60+%"],
            (QuantityKind::UserScale, Junior) => ["1K", "5K", "10K+"],
            (QuantityKind::UserScale, Mid) => ["10K", "50K", "100K+"],
            (QuantityKind::UserScale, Senior) => ["100K", "500K", "1M+"],
            (QuantityKind::UserScale, Lead) => ["1M", "5M", "10M+"],
        }
    }

    fn phrase(self, object: &str, value: &str) -> String {
        match self {
            QuantityKind::TeamSize => format!("{object} with a team of {value}"),
            QuantityKind::Percentage => format!("{object} by {value}"),
            QuantityKind::UserScale => format!("{object} for {value} users"),
        }
    }

    fn label(self) -> &'static str {
        match self {
            QuantityKind::TeamSize => "team size",
            QuantityKind::Percentage => "a percentage",
            QuantityKind::UserScale => "user scale",
        }
    }
}

const ACTION_PHRASES: [(&str, QuantityKind); 14] = [
    ("worked on", QuantityKind::TeamSize),
    ("managed", QuantityKind::TeamSize),
    ("led", QuantityKind::TeamSize),
    ("developed", QuantityKind::TeamSize),
    ("built", QuantityKind::TeamSize),
    ("created", QuantityKind::TeamSize),
    ("designed", QuantityKind::TeamSize),
    ("implemented", QuantityKind::TeamSize),
    ("delivered", QuantityKind::TeamSize),
    ("improved", QuantityKind::Percentage),
    ("increased", QuantityKind::Percentage),
    ("reduced", QuantityKind::Percentage),
    ("optimized", QuantityKind::Percentage),
    ("served", QuantityKind::UserScale),
];

// ────────────────────────────────────────────────────────────────────────────
// Shared helpers
// ────────────────────────────────────────────────────────────────────────────

/// Nearest preceding section header, the line itself included.
pub fn detect_section(lines: &[&str], idx: usize) -> String {
    if lines.is_empty() {
        return "UNKNOWN".to_string();
    }
    let start = idx.saturating_sub(SECTION_LOOKBACK - 1);
    for i in (start..=idx.min(lines.len() - 1)).rev() {
        let upper = lines[i].trim().trim_end_matches(':').to_uppercase();
        if let Some(section) = SECTIONS.iter().find(|s| upper.starts_with(**s)) {
            return section.to_string();
        }
    }
    "UNKNOWN".to_string()
}

/// Matches the capitalisation of `like`'s first letter.
fn match_case(word: &str, like: &str) -> String {
    let upper = like.chars().next().is_some_and(char::is_uppercase);
    let mut chars = word.chars();
    match chars.next() {
        Some(first) if upper => first.to_uppercase().chain(chars).collect(),
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Strips a leading bullet marker; returns (marker present, rest).
fn strip_bullet(line: &str) -> (bool, &str) {
    let trimmed = line.trim_start();
    match trimmed.strip_prefix(BULLETS) {
        Some(rest) => (true, rest.trim_start()),
        None => (false, trimmed),
    }
}

fn location(lines: &[&str], idx: usize) -> LocationHint {
    LocationHint::at(idx, detect_section(lines, idx))
}

// ────────────────────────────────────────────────────────────────────────────
// Detectors
// ────────────────────────────────────────────────────────────────────────────

/// One suggestion per weak verb per line, on its first occurrence.
pub fn detect_weak_verbs(lines: &[&str]) -> Vec<Suggestion> {
    let mut out = Vec::new();
    for (idx, line) in lines.iter().enumerate() {
        let lower = line.to_lowercase();
        for verb in WEAK_VERBS.iter() {
            let Some(found) = verb.pattern.find(line) else {
                continue;
            };
            let upgrade = match verb.contextual {
                Some((context, upgrade)) if lower.contains(context) => upgrade,
                _ => verb.fallback,
            };
            let original = found.as_str();
            out.push(Suggestion::new(
                SuggestionCategory::VerbUpgrade,
                original,
                match_case(upgrade, original),
                WEAK_VERB_SCORE,
                3,
                format!("Replace weak phrase \"{}\" with a stronger action verb", verb.phrase),
                location(lines, idx),
            ));
        }
    }
    out
}

/// Flags lines containing filler phrases; the whole line is rewritten with
/// every filler removed and its indentation kept.
pub fn detect_filler_phrases(lines: &[&str]) -> Vec<Suggestion> {
    let mut out = Vec::new();
    for (idx, line) in lines.iter().enumerate() {
        let found: Vec<&str> = FILLER_PATTERNS
            .iter()
            .filter(|(_, re)| re.is_match(line))
            .map(|(phrase, _)| *phrase)
            .collect();
        if found.is_empty() {
            continue;
        }

        let indent_len = line.len() - line.trim_start().len();
        let (indent, body) = line.split_at(indent_len);
        let mut cleaned = body.to_string();
        for (_, re) in FILLER_PATTERNS.iter() {
            cleaned = re.replace_all(&cleaned, "").into_owned();
        }
        let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
        let (_, content) = strip_bullet(&cleaned);
        if content.is_empty() || cleaned == body.trim_end() {
            continue;
        }

        out.push(Suggestion::new(
            SuggestionCategory::FillerRemoval,
            *line,
            format!("{indent}{cleaned}"),
            FILLER_SCORE,
            2,
            format!("Remove filler phrasing ({}) for more direct language", found.join(", ")),
            location(lines, idx),
        ));
    }
    out
}

/// A bullet verb (ending in -ed or -ing) used more than three times gets one
/// suggestion on its last occurrence.
pub fn detect_redundancy(lines: &[&str]) -> Vec<Suggestion> {
    // verb → (count, last line, verb as written there); order of first use kept
    let mut order: Vec<String> = Vec::new();
    let mut seen: HashMap<String, (usize, usize, String)> = HashMap::new();

    for (idx, line) in lines.iter().enumerate() {
        let (is_bullet, rest) = strip_bullet(line);
        if !is_bullet {
            continue;
        }
        let Some(first) = rest.split_whitespace().next() else {
            continue;
        };
        let written = first.trim_matches(|c: char| !c.is_alphanumeric());
        let verb = written.to_lowercase();
        if !(verb.ends_with("ed") || verb.ends_with("ing")) {
            continue;
        }
        let entry = seen.entry(verb.clone()).or_insert_with(|| {
            order.push(verb.clone());
            (0, idx, written.to_string())
        });
        entry.0 += 1;
        entry.1 = idx;
        entry.2 = written.to_string();
    }

    order
        .into_iter()
        .filter_map(|verb| {
            let (count, last_idx, written) = seen.remove(&verb)?;
            if count <= REDUNDANCY_LIMIT {
                return None;
            }
            let alternatives: Vec<String> = verb_alternatives(&verb)
                .into_iter()
                .take(5)
                .map(|alt| match_case(alt, &written))
                .collect();
            let first_alt = alternatives.first()?.clone();
            let preview = alternatives
                .iter()
                .take(3)
                .cloned()
                .collect::<Vec<_>>()
                .join(", ");
            Some(
                Suggestion::new(
                    SuggestionCategory::RedundancyFix,
                    written,
                    first_alt,
                    REDUNDANCY_SCORE,
                    2,
                    format!("\"{verb}\" opens {count} bullets. Consider varying with: {preview}"),
                    location(lines, last_idx),
                )
                .with_alternatives(alternatives),
            )
        })
        .collect()
}

fn verb_alternatives(verb: &str) -> Vec<&'static str> {
    if let Some(family) = VERB_FAMILIES.iter().find(|family| family.contains(&verb)) {
        return family.iter().copied().filter(|v| *v != verb).collect();
    }
    EXTRA_ALTERNATIVES
        .iter()
        .find(|(v, _)| *v == verb)
        .map(|(_, alts)| alts.to_vec())
        .unwrap_or_default()
}

/// Content lines without numbers that open with an action phrase. The object
/// of the phrase becomes the original text; options come from the target's
/// seniority.
pub fn detect_missing_quantification(lines: &[&str], target_text: &str) -> Vec<Suggestion> {
    let level = RoleLevel::infer(target_text);
    let mut out = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        if DIGIT.is_match(line) {
            continue;
        }
        let (_, content) = strip_bullet(line);
        let lower = content.to_lowercase();

        let Some((phrase, kind)) = ACTION_PHRASES.iter().find(|(phrase, _)| {
            lower
                .strip_prefix(phrase)
                .is_some_and(|rest| rest.starts_with(char::is_whitespace))
        }) else {
            continue;
        };

        let Some(rest) = content.get(phrase.len()..) else {
            continue;
        };
        let object = rest
            .trim()
            .trim_end_matches(['.', ';', ','])
            .trim_end();
        if object.is_empty() {
            continue;
        }

        let options = kind.options(level);
        let moderate = options[1];
        out.push(
            Suggestion::new(
                SuggestionCategory::Quantification,
                object,
                kind.phrase(object, moderate),
                QUANTIFICATION_SCORE,
                5,
                format!("Add {} to show the scale of this work", kind.label()),
                location(lines, idx),
            )
            .with_alternatives(options.iter().map(|o| o.to_string()).collect())
            .with_estimated_value(moderate),
        );
    }
    out
}

/// Every local detector, in a fixed order.
pub fn run_all(original_text: &str, target_text: &str) -> Vec<Suggestion> {
    let lines: Vec<&str> = original_text.lines().collect();
    let mut out = detect_weak_verbs(&lines);
    out.extend(detect_redundancy(&lines));
    out.extend(detect_filler_phrases(&lines));
    out.extend(detect_missing_quantification(&lines, target_text));
    out
}
