use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

/// Creates and returns a PostgreSQL connection pool.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    info!("Connecting to PostgreSQL...");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    info!("PostgreSQL connection pool established");
    Ok(pool)
}

/// Creates the unit ledger table if it is missing. Profile tables are owned
/// by the upstream application and only read here.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS optimization_units (
            unit_id        UUID PRIMARY KEY,
            batch_id       UUID NOT NULL,
            subject_id     BIGINT NOT NULL,
            target_id      BIGINT NOT NULL,
            target_version TEXT,
            status         TEXT NOT NULL,
            attempt_count  INTEGER NOT NULL DEFAULT 0,
            result_ref     TEXT,
            error          TEXT,
            created_at     TIMESTAMPTZ NOT NULL,
            updated_at     TIMESTAMPTZ NOT NULL,
            completed_at   TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS optimization_units_batch_idx ON optimization_units (batch_id)",
    )
    .execute(pool)
    .await?;

    info!("Ledger schema ready");
    Ok(())
}
