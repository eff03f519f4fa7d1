use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use super::scoring::MatchScorer;
use super::{UnitOutcome, UnitRunner};
use crate::errors::OptimizationError;
use crate::llm_client::{prompts, TextGenerator};
use crate::models::optimization::{OptimizationResult, UnitRequest};
use crate::models::profile::{SubjectProfile, TargetPosting};
use crate::suggestions::external::parse_candidates;
use crate::suggestions::{SuggestionEngine, SuggestionSummary};

/// Executes one unit: render, generate, suggest, score, compose.
pub struct Optimizer {
    generator: Arc<dyn TextGenerator>,
    engine: SuggestionEngine,
    scorer: Arc<dyn MatchScorer>,
}

impl Optimizer {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        engine: SuggestionEngine,
        scorer: Arc<dyn MatchScorer>,
    ) -> Self {
        Self {
            generator,
            engine,
            scorer,
        }
    }
}

#[async_trait]
impl UnitRunner for Optimizer {
    async fn run(&self, request: &UnitRequest) -> UnitOutcome {
        validate_target(&request.target)?;
        let original_text = render_subject_text(&request.subject)?;
        let job_text = request.target.job_text();

        let optimized_text = self
            .generator
            .generate(
                prompts::OPTIMIZE_SYSTEM,
                &prompts::optimize_prompt(&original_text, &job_text),
            )
            .await?;

        // A failed analysis degrades to local suggestions; it does not fail the unit.
        let external = match self.generator.analyze(&original_text, &job_text).await {
            Ok(raw) => parse_candidates(&raw, &original_text, &job_text),
            Err(e) => {
                warn!(
                    "Analysis for subject {} failed, using local suggestions only: {e}",
                    request.subject_id()
                );
                Vec::new()
            }
        };

        let suggestions = self.engine.analyze(&original_text, &job_text, &external);
        let summary = SuggestionSummary::of(&suggestions);
        let match_score = self.scorer.score(&request.subject, &request.target);

        debug!(
            "Unit {}/{} composed: {} suggestions, match {}",
            request.subject_id(),
            request.target_id(),
            summary.total,
            match_score.score
        );

        Ok(OptimizationResult {
            subject_id: request.subject_id(),
            target_id: request.target_id(),
            target_version: request.target_version.clone(),
            original_text,
            optimized_text,
            match_score,
            suggestions,
            summary,
            generated_at: Utc::now(),
        })
    }
}

pub fn validate_target(target: &TargetPosting) -> Result<(), OptimizationError> {
    let has_requirements = target.requirements.iter().any(|r| !r.trim().is_empty());
    if target.description.trim().is_empty() && !has_requirements {
        return Err(OptimizationError::PermanentInput(format!(
            "target {} has no description or requirements",
            target.id
        )));
    }
    Ok(())
}

/// Plain-text resume built from structured input. Empty sections are omitted.
pub fn render_subject_text(profile: &SubjectProfile) -> Result<String, OptimizationError> {
    let mut sections: Vec<String> = Vec::new();

    let contact: Vec<&str> = [
        Some(profile.name.as_str()),
        profile.email.as_deref(),
        profile.phone.as_deref(),
    ]
    .into_iter()
    .flatten()
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .collect();
    if !contact.is_empty() {
        sections.push(contact.join("\n"));
    }

    let mut experience = String::new();
    for item in &profile.experience {
        let title = item.title.trim();
        let company = item.company.trim();
        let header = match (title.is_empty(), company.is_empty()) {
            (false, false) => Some(format!("{title} at {company}")),
            (false, true) => Some(title.to_string()),
            (true, false) => Some(company.to_string()),
            (true, true) => None,
        };
        if let Some(header) = header {
            if item.years > 0.0 {
                let _ = writeln!(experience, "{header} ({} years)", format_years(item.years));
            } else {
                let _ = writeln!(experience, "{header}");
            }
        }
        for line in item
            .description
            .as_deref()
            .unwrap_or_default()
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
        {
            if line.starts_with(['•', '-', '*']) {
                let _ = writeln!(experience, "{line}");
            } else {
                let _ = writeln!(experience, "• {line}");
            }
        }
    }
    if !experience.is_empty() {
        sections.push(format!("EXPERIENCE\n{}", experience.trim_end()));
    }

    let skills: Vec<&str> = profile
        .skills
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();
    if !skills.is_empty() {
        sections.push(format!("SKILLS\n{}", skills.join(", ")));
    }

    if let Some(edu) = &profile.education {
        let mut line = [edu.degree.trim(), edu.university.trim()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" - ");
        if let Some(year) = edu.year.as_deref().map(str::trim).filter(|y| !y.is_empty()) {
            if line.is_empty() {
                line = year.to_string();
            } else {
                let _ = write!(line, " ({year})");
            }
        }
        if !line.is_empty() {
            sections.push(format!("EDUCATION\n{line}"));
        }
    }

    let has_body = sections.len() > usize::from(!contact.is_empty());
    let free_text = profile
        .resume_text
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(free) = free_text {
        sections.push(free.to_string());
    }

    if profile.name.trim().is_empty() && !has_body && free_text.is_none() {
        return Err(OptimizationError::PermanentInput(format!(
            "subject {} has no name and no resume content",
            profile.id
        )));
    }

    Ok(sections.join("\n\n"))
}

fn format_years(years: f32) -> String {
    if years.fract() == 0.0 {
        format!("{years:.0}")
    } else {
        format!("{years:.1}")
    }
}
