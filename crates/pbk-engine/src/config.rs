//! Engine configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Defaults
// ============================================================================

/// Records fetched per batch for document-style reads.
pub const DEFAULT_DOCUMENT_BATCH_SIZE: usize = 500;

/// Records fetched per batch for bulk tabular reads.
pub const DEFAULT_TABULAR_BATCH_SIZE: usize = 5000;

/// Rows per multi-row `INSERT` in SQL archives.
pub const DEFAULT_SQL_ROWS_PER_STATEMENT: usize = 100;

/// Dependency exploration depth cap.
pub const DEFAULT_MAX_DEPENDENCY_DEPTH: usize = 10;

/// Hard ceiling on a single job (4 hours).
pub const DEFAULT_JOB_TIMEOUT_SECS: u64 = 4 * 60 * 60;

/// Extra lifetime of job status entries beyond the job timeout (2 hours).
pub const DEFAULT_STATUS_TTL_MARGIN_SECS: u64 = 2 * 60 * 60;

/// Artifacts above this size are handed off by one-time download (10 MiB).
pub const DEFAULT_INLINE_ARTIFACT_LIMIT_BYTES: u64 = 10 * 1024 * 1024;

/// Entities with more rows than this report percentage progress.
pub const DEFAULT_LARGE_ENTITY_ROWS: u64 = 10_000;

pub const DEFAULT_ARTIFACT_DIR: &str = "./artifacts";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub document_batch_size: usize,
    pub tabular_batch_size: usize,
    pub sql_rows_per_statement: usize,
    pub max_dependency_depth: usize,
    pub job_timeout_secs: u64,
    pub status_ttl_margin_secs: u64,
    pub artifact_dir: PathBuf,
    pub inline_artifact_limit_bytes: u64,
    pub large_entity_rows: u64,
    /// When set, job status lives in Postgres instead of process memory
    pub status_database_url: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            document_batch_size: DEFAULT_DOCUMENT_BATCH_SIZE,
            tabular_batch_size: DEFAULT_TABULAR_BATCH_SIZE,
            sql_rows_per_statement: DEFAULT_SQL_ROWS_PER_STATEMENT,
            max_dependency_depth: DEFAULT_MAX_DEPENDENCY_DEPTH,
            job_timeout_secs: DEFAULT_JOB_TIMEOUT_SECS,
            status_ttl_margin_secs: DEFAULT_STATUS_TTL_MARGIN_SECS,
            artifact_dir: PathBuf::from(DEFAULT_ARTIFACT_DIR),
            inline_artifact_limit_bytes: DEFAULT_INLINE_ARTIFACT_LIMIT_BYTES,
            large_entity_rows: DEFAULT_LARGE_ENTITY_ROWS,
            status_database_url: None,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl EngineConfig {
    /// Load configuration from `.env`, `PBK_*` variables and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = EngineConfig {
            document_batch_size: env_or("PBK_DOCUMENT_BATCH_SIZE", DEFAULT_DOCUMENT_BATCH_SIZE),
            tabular_batch_size: env_or("PBK_TABULAR_BATCH_SIZE", DEFAULT_TABULAR_BATCH_SIZE),
            sql_rows_per_statement: env_or(
                "PBK_SQL_ROWS_PER_STATEMENT",
                DEFAULT_SQL_ROWS_PER_STATEMENT,
            ),
            max_dependency_depth: env_or("PBK_MAX_DEPENDENCY_DEPTH", DEFAULT_MAX_DEPENDENCY_DEPTH),
            job_timeout_secs: env_or("PBK_JOB_TIMEOUT_SECS", DEFAULT_JOB_TIMEOUT_SECS),
            status_ttl_margin_secs: env_or(
                "PBK_STATUS_TTL_MARGIN_SECS",
                DEFAULT_STATUS_TTL_MARGIN_SECS,
            ),
            artifact_dir: std::env::var("PBK_ARTIFACT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_ARTIFACT_DIR)),
            inline_artifact_limit_bytes: env_or(
                "PBK_INLINE_ARTIFACT_LIMIT_BYTES",
                DEFAULT_INLINE_ARTIFACT_LIMIT_BYTES,
            ),
            large_entity_rows: env_or("PBK_LARGE_ENTITY_ROWS", DEFAULT_LARGE_ENTITY_ROWS),
            status_database_url: std::env::var("PBK_STATUS_DATABASE_URL")
                .ok()
                .filter(|s| !s.is_empty()),
        };

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.document_batch_size == 0 || self.tabular_batch_size == 0 {
            anyhow::bail!("Batch sizes must be greater than 0");
        }

        if self.sql_rows_per_statement == 0 {
            anyhow::bail!("SQL rows per statement must be greater than 0");
        }

        if self.job_timeout_secs == 0 {
            anyhow::bail!("Job timeout must be greater than 0");
        }

        if self.status_ttl_margin_secs == 0 {
            anyhow::bail!("Status TTL margin must be greater than 0 so job status outlives the job");
        }

        if self.artifact_dir.as_os_str().is_empty() {
            anyhow::bail!("Artifact directory cannot be empty");
        }

        Ok(())
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    /// Ceiling handed to the task executor. Slightly longer than the job's
    /// own timeout so the job gets to record its failure first.
    pub fn executor_timeout(&self) -> Duration {
        self.job_timeout() + Duration::from_secs(60)
    }

    /// Lifetime of job status entries: executor ceiling plus the margin.
    pub fn status_ttl(&self) -> Duration {
        self.executor_timeout() + Duration::from_secs(self.status_ttl_margin_secs)
    }
}
