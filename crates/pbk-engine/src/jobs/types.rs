//! Job, per-entity status and request/result types

use crate::archive::ArchiveFormat;
use crate::restore::RestoreLog;
use crate::transform::TransformRules;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Export,
    Import,
}

impl JobKind {
    pub fn as_str(&self) -> &str {
        match self {
            JobKind::Export => "export",
            JobKind::Import => "import",
        }
    }
}

/// Job lifecycle: queued -> running -> completed | failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl From<String> for JobStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "running" => JobStatus::Running,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            _ => JobStatus::Queued,
        }
    }
}

/// How the finished artifact reaches the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "delivery", rename_all = "snake_case")]
pub enum ArtifactDelivery {
    /// Small artifacts travel base64-encoded inside the job record
    Inline { content_base64: String },
    /// Large artifacts are fetched once with this token
    Download { token: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportResult {
    pub file_name: String,
    pub format: ArchiveFormat,
    /// Private location of the artifact
    pub path: PathBuf,
    pub size_bytes: u64,
    pub sha256: String,
    pub artifact: ArtifactDelivery,
    pub total_entities: usize,
    pub total_records: u64,
    pub failed_entities: Vec<String>,
    pub files_bundled: usize,
    /// Export order; dependencies come first
    pub order: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub archive: PathBuf,
    pub log: RestoreLog,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobResult {
    Export(ExportResult),
    Import(ImportResult),
}

/// The unit of asynchronous work, as stored under `pbk:job:<id>`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    pub status: JobStatus,
    pub progress_message: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub result: Option<JobResult>,
}

impl Job {
    pub fn new(kind: JobKind, created_by: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            status: JobStatus::Queued,
            progress_message: "Queued".to_string(),
            created_by: created_by.into(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
            result: None,
        }
    }

    pub fn export_result(&self) -> Option<&ExportResult> {
        match &self.result {
            Some(JobResult::Export(result)) => Some(result),
            _ => None,
        }
    }

    pub fn import_result(&self) -> Option<&ImportResult> {
        match &self.result {
            Some(JobResult::Import(result)) => Some(result),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityState {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl EntityState {
    pub fn as_str(&self) -> &str {
        match self {
            EntityState::Pending => "pending",
            EntityState::Processing => "processing",
            EntityState::Completed => "completed",
            EntityState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EntityState::Completed | EntityState::Failed)
    }
}

/// One row of a job's per-entity status table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityStatus {
    pub entity_type: String,
    pub status: EntityState,
    pub size_estimate: u64,
    pub record_count: u64,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl EntityStatus {
    pub fn pending(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            status: EntityState::Pending,
            size_estimate: 0,
            record_count: 0,
            error: None,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRequest {
    pub entity_types: Vec<String>,
    #[serde(default)]
    pub format: ArchiveFormat,
    #[serde(default)]
    pub include_files: bool,
    /// Pull in every transitive link target as well
    #[serde(default)]
    pub include_dependencies: bool,
    #[serde(default)]
    pub transform: TransformRules,
    pub created_by: String,
}

impl ExportRequest {
    pub fn new(entity_types: Vec<String>, format: ArchiveFormat, created_by: impl Into<String>) -> Self {
        Self {
            entity_types,
            format,
            include_files: false,
            include_dependencies: false,
            transform: TransformRules::default(),
            created_by: created_by.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRequest {
    pub archive: PathBuf,
    /// Restrict the restore to these types; `None` restores everything
    #[serde(default)]
    pub selected: Option<Vec<String>>,
    #[serde(default)]
    pub transform: TransformRules,
    #[serde(default = "default_true")]
    pub restore_files: bool,
    pub created_by: String,
}

fn default_true() -> bool {
    true
}

impl ImportRequest {
    pub fn new(archive: impl Into<PathBuf>, created_by: impl Into<String>) -> Self {
        Self {
            archive: archive.into(),
            selected: None,
            transform: TransformRules::default(),
            restore_files: true,
            created_by: created_by.into(),
        }
    }
}
