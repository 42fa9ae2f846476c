//! Postgres-backed job status store
//!
//! Keeps job state in a single `pbk_job_status` table so several engine
//! processes can share it. Expired rows are invisible to `get` and removed
//! by [`PgStatusStore::purge_expired`].

use super::JobStatusStore;
use anyhow::Context;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS pbk_job_status (
    key        TEXT PRIMARY KEY,
    value      JSONB NOT NULL,
    expires_at TIMESTAMPTZ NOT NULL
)
"#;

#[derive(Debug, Clone)]
pub struct PgStatusStore {
    pool: PgPool,
}

impl PgStatusStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .context("Failed to connect to job status database")?;
        Ok(Self::new(pool))
    }

    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        sqlx::query(CREATE_TABLE)
            .execute(&self.pool)
            .await
            .context("Failed to create pbk_job_status table")?;
        Ok(())
    }

    /// Delete expired rows; returns how many were removed.
    pub async fn purge_expired(&self) -> anyhow::Result<u64> {
        let result = sqlx::query("DELETE FROM pbk_job_status WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await
            .context("Failed to purge expired job status rows")?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl JobStatusStore for PgStatusStore {
    async fn set(&self, key: &str, value: serde_json::Value, ttl: Duration) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pbk_job_status (key, value, expires_at)
            VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
            ON CONFLICT (key) DO UPDATE
            SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(key)
        .bind(&value)
        .bind(ttl.as_secs_f64())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to write job status key {key}"))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
        sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT value FROM pbk_job_status WHERE key = $1 AND expires_at > NOW()",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("Failed to read job status key {key}"))
    }
}
