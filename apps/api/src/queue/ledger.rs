//! Durable record of unit transitions, one row per unit keyed by `unit_id`.
//!
//! The in-memory queue remains the source of truth while the process lives;
//! the ledger keeps a queryable trail after it exits. Rows a dead process left
//! unfinished are closed as failed at startup, since no driver survives to
//! move them on.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::types::{UnitSnapshot, UnitStatus};
use crate::cache::CacheKey;

#[async_trait]
pub trait UnitLedger: Send + Sync {
    async fn record(&self, batch_id: Uuid, unit: &UnitSnapshot) -> Result<(), sqlx::Error>;
}

pub struct PgUnitLedger {
    db: PgPool,
}

pub const ABANDONED_ERROR: &str = "abandoned: service stopped before the unit finished";

impl PgUnitLedger {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Fails every row still queued or processing. Call before accepting work.
    pub async fn fail_abandoned(&self) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE optimization_units
            SET status = $1, error = $2, updated_at = NOW(), completed_at = NOW()
            WHERE status = ANY($3)
            "#,
        )
        .bind(UnitStatus::Failed.as_str())
        .bind(ABANDONED_ERROR)
        .bind(unfinished_statuses())
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected())
    }
}

fn unfinished_statuses() -> Vec<&'static str> {
    [
        UnitStatus::Queued,
        UnitStatus::Processing,
        UnitStatus::Succeeded,
        UnitStatus::Failed,
    ]
    .into_iter()
    .filter(|status| !status.is_terminal())
    .map(|status| status.as_str())
    .collect()
}

#[async_trait]
impl UnitLedger for PgUnitLedger {
    async fn record(&self, batch_id: Uuid, unit: &UnitSnapshot) -> Result<(), sqlx::Error> {
        let result_ref = unit.result.as_ref().map(|_| {
            CacheKey::new(unit.subject_id, unit.target_id, unit.target_version.as_deref())
                .to_string()
        });
        let error = unit.error.as_ref().map(|e| e.to_string());

        sqlx::query(
            r#"
            INSERT INTO optimization_units
                (unit_id, batch_id, subject_id, target_id, target_version, status,
                 attempt_count, result_ref, error, created_at, updated_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (unit_id) DO UPDATE SET
                status = EXCLUDED.status,
                attempt_count = EXCLUDED.attempt_count,
                result_ref = EXCLUDED.result_ref,
                error = EXCLUDED.error,
                updated_at = EXCLUDED.updated_at,
                completed_at = EXCLUDED.completed_at
            "#,
        )
        .bind(unit.unit_id)
        .bind(batch_id)
        .bind(unit.subject_id)
        .bind(unit.target_id)
        .bind(unit.target_version.as_deref())
        .bind(unit.status.as_str())
        .bind(unit.attempt_count as i32)
        .bind(result_ref)
        .bind(error)
        .bind(unit.created_at)
        .bind(unit.updated_at)
        .bind(unit.completed_at)
        .execute(&self.db)
        .await?;

        Ok(())
    }
}

/// Discards every record.
#[cfg(test)]
pub struct NoopLedger;

#[cfg(test)]
#[async_trait]
impl UnitLedger for NoopLedger {
    async fn record(&self, _batch_id: Uuid, _unit: &UnitSnapshot) -> Result<(), sqlx::Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_non_terminal_rows_are_abandoned() {
        assert_eq!(unfinished_statuses(), vec!["queued", "processing"]);
    }
}
