use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::FromRow;

pub type SubjectId = i64;
pub type TargetId = i64;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperienceItem {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub years: f32,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Education {
    #[serde(default)]
    pub degree: String,
    #[serde(default)]
    pub university: String,
    #[serde(default)]
    pub year: Option<String>,
}

/// A candidate profile. Immutable input for the duration of one unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubjectProfile {
    pub id: SubjectId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub experience: Vec<ExperienceItem>,
    #[serde(default)]
    pub education: Option<Education>,
    /// Free-text resume body, appended after the structured sections.
    #[serde(default)]
    pub resume_text: Option<String>,
}

impl SubjectProfile {
    pub fn total_years(&self) -> f32 {
        self.experience.iter().map(|e| e.years.max(0.0)).sum()
    }
}

/// A job posting the subject is optimized against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetPosting {
    pub id: TargetId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub required_years: f32,
}

impl TargetPosting {
    /// Description plus requirements, as sent to the backend.
    pub fn job_text(&self) -> String {
        if self.requirements.is_empty() {
            return self.description.clone();
        }
        format!(
            "{}\n\nRequirements:\n{}",
            self.description,
            self.requirements.join("\n")
        )
    }

    /// Content-derived version tag over description and requirements: editing
    /// either changes the tag, which changes the cache key, so stale results
    /// are never served. The title is not part of it.
    pub fn content_version(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.description.as_bytes());
        for req in &self.requirements {
            hasher.update([0u8]);
            hasher.update(req.as_bytes());
        }
        let digest = hex::encode(hasher.finalize());
        digest[..16].to_string()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Database rows
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, FromRow)]
pub struct CandidateRow {
    pub id: i64,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub experience: Option<Value>,
    pub skills: Option<Value>,
    pub education: Option<Value>,
    pub resume_text: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct JobPostingRow {
    pub id: i64,
    pub title: String,
    pub company: Option<String>,
    pub description: String,
    pub requirements: Option<Value>,
    pub required_years: Option<f64>,
}

impl From<CandidateRow> for SubjectProfile {
    fn from(row: CandidateRow) -> Self {
        let mut resume_text = row.resume_text;
        let experience = match row.experience {
            Some(Value::Array(items)) => items.into_iter().filter_map(experience_item).collect(),
            // Legacy rows store experience as prose; keep it as free text.
            Some(Value::String(s)) if !s.trim().is_empty() => {
                resume_text = Some(match resume_text {
                    Some(existing) => format!("{s}\n{existing}"),
                    None => s,
                });
                Vec::new()
            }
            _ => Vec::new(),
        };

        SubjectProfile {
            id: row.id,
            name: row.name,
            email: row.email,
            phone: row.phone,
            skills: string_list(row.skills),
            experience,
            education: row
                .education
                .and_then(|v| serde_json::from_value::<Education>(v).ok()),
            resume_text,
        }
    }
}

impl From<JobPostingRow> for TargetPosting {
    fn from(row: JobPostingRow) -> Self {
        TargetPosting {
            id: row.id,
            title: row.title,
            company: row.company,
            description: row.description,
            requirements: string_list(row.requirements),
            required_years: row.required_years.unwrap_or(0.0) as f32,
        }
    }
}

fn experience_item(value: Value) -> Option<ExperienceItem> {
    match value {
        Value::String(s) => Some(ExperienceItem {
            description: Some(s),
            ..Default::default()
        }),
        other => serde_json::from_value(other).ok(),
    }
}

/// Accepts `["a", "b"]`, `[{"skill": "a"}]` or `"a, b"`.
fn string_list(value: Option<Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s),
                Value::Object(map) => map
                    .get("skill")
                    .or_else(|| map.get("name"))
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
                _ => None,
            })
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) => s
            .split([',', '\n'])
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn posting() -> TargetPosting {
        TargetPosting {
            id: 7,
            title: "Backend Engineer".to_string(),
            description: "Build services".to_string(),
            requirements: vec!["Python".to_string(), "Docker".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_content_version_is_stable() {
        assert_eq!(posting().content_version(), posting().content_version());
        assert_eq!(posting().content_version().len(), 16);
    }

    #[test]
    fn test_content_version_changes_when_posting_edited() {
        let mut edited = posting();
        edited.requirements.push("Kubernetes".to_string());
        assert_ne!(posting().content_version(), edited.content_version());
    }

    #[test]
    fn test_content_version_ignores_title() {
        let mut renamed = posting();
        renamed.title = "Platform Engineer".to_string();
        assert_eq!(posting().content_version(), renamed.content_version());

        let mut described = posting();
        described.description = "Build and run services".to_string();
        assert_ne!(posting().content_version(), described.content_version());
    }

    #[test]
    fn test_candidate_row_accepts_mixed_json_shapes() {
        let row = CandidateRow {
            id: 1,
            name: "Ada".to_string(),
            email: None,
            phone: None,
            experience: Some(json!([
                {"title": "Engineer", "company": "Acme", "years": 3},
                "Volunteer tutor"
            ])),
            skills: Some(json!([{"skill": "Rust"}, "Python", ""])),
            education: Some(json!({"degree": "BSc", "university": "MIT"})),
            resume_text: None,
        };
        let profile = SubjectProfile::from(row);
        assert_eq!(profile.experience.len(), 2);
        assert_eq!(profile.experience[0].company, "Acme");
        assert_eq!(profile.skills, vec!["Rust", "Python"]);
        assert!((profile.total_years() - 3.0).abs() < f32::EPSILON);
        assert_eq!(profile.education.as_ref().unwrap().degree, "BSc");
    }

    #[test]
    fn test_prose_experience_moves_into_resume_text() {
        let row = CandidateRow {
            id: 2,
            name: "Lin".to_string(),
            email: None,
            phone: None,
            experience: Some(json!("Five years building APIs")),
            skills: Some(json!("Go, SQL")),
            education: None,
            resume_text: Some("Open source maintainer".to_string()),
        };
        let profile = SubjectProfile::from(row);
        assert!(profile.experience.is_empty());
        assert_eq!(profile.skills, vec!["Go", "SQL"]);
        assert_eq!(
            profile.resume_text.as_deref(),
            Some("Five years building APIs\nOpen source maintainer")
        );
    }
}
