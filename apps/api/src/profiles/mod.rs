//! Loads subject profiles and target postings for batch submission.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::models::profile::{
    CandidateRow, JobPostingRow, SubjectId, SubjectProfile, TargetId, TargetPosting,
};

#[async_trait]
pub trait ProfileSource: Send + Sync {
    /// Profiles for the ids that exist. Missing ids are simply absent.
    async fn subjects(&self, ids: &[SubjectId]) -> Result<Vec<SubjectProfile>, sqlx::Error>;

    async fn target(&self, id: TargetId) -> Result<Option<TargetPosting>, sqlx::Error>;
}

pub struct PgProfileSource {
    db: PgPool,
}

impl PgProfileSource {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ProfileSource for PgProfileSource {
    async fn subjects(&self, ids: &[SubjectId]) -> Result<Vec<SubjectProfile>, sqlx::Error> {
        let rows = sqlx::query_as::<_, CandidateRow>(
            r#"
            SELECT id, name, email, phone, experience, skills, education, resume_text
            FROM candidates
            WHERE id = ANY($1)
            ORDER BY id
            "#,
        )
        .bind(ids)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(SubjectProfile::from).collect())
    }

    async fn target(&self, id: TargetId) -> Result<Option<TargetPosting>, sqlx::Error> {
        let row = sqlx::query_as::<_, JobPostingRow>(
            r#"
            SELECT id, title, company, description, requirements, required_years
            FROM job_postings
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(TargetPosting::from))
    }
}

/// Fixed in-memory profiles for router tests.
#[cfg(test)]
#[derive(Default)]
pub struct StaticProfiles {
    pub subjects: Vec<SubjectProfile>,
    pub targets: Vec<TargetPosting>,
}

#[cfg(test)]
#[async_trait]
impl ProfileSource for StaticProfiles {
    async fn subjects(&self, ids: &[SubjectId]) -> Result<Vec<SubjectProfile>, sqlx::Error> {
        Ok(self
            .subjects
            .iter()
            .filter(|s| ids.contains(&s.id))
            .cloned()
            .collect())
    }

    async fn target(&self, id: TargetId) -> Result<Option<TargetPosting>, sqlx::Error> {
        Ok(self.targets.iter().find(|t| t.id == id).cloned())
    }
}
