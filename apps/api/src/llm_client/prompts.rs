// Prompt text for the two backend calls a unit makes.

/// System prompt fragment that enforces JSON-only output.
pub const JSON_ONLY_SYSTEM: &str = "You are a precise, structured assistant. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

pub const OPTIMIZE_SYSTEM: &str = "You are an expert resume writer. \
    Rewrite the resume so it targets the job posting. \
    Keep every fact truthful: never invent employers, titles, dates or numbers. \
    Use strong action verbs and the posting's terminology where the resume supports it. \
    Return only the rewritten resume as plain text.";

pub const ANALYSIS_SYSTEM: &str = JSON_ONLY_SYSTEM;

pub fn optimize_prompt(resume_text: &str, job_text: &str) -> String {
    format!("RESUME:\n{resume_text}\n\nJOB POSTING:\n{job_text}\n\nRewrite the resume for this posting.")
}

pub fn analysis_prompt(resume_text: &str, job_text: &str) -> String {
    format!(
        r#"Analyze this resume against the job posting and list concrete edits.

RESUME:
{resume_text}

JOB POSTING:
{job_text}

For each edit give the exact original phrase, the improved phrase, a confidence
between 0.0 and 1.0, an impact score from 1 to 5, a short reason, the zero-based
line number and the section. Categories: verb_upgrade, quantification,
star_transformation, industry_terminology, redundancy_fix, impact_amplification,
achievement_extraction, grammar_fix, filler_removal, formatting.
When a number cannot be inferred, use confidence below 0.5 and give three
alternatives (conservative, moderate, ambitious).

Respond with:
{{"suggestions": [{{"category": "verb_upgrade", "original_text": "worked on", "suggested_text": "developed", "confidence": 0.95, "impact_score": 3, "reasoning": "Stronger action verb", "line_number": 4, "section": "EXPERIENCE", "alternatives": []}}]}}"#
    )
}
