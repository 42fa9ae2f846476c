//! Engine error taxonomy
//!
//! Variants map onto four severities:
//!
//! 1. configuration problems ([`EngineError::Configuration`]), raised
//!    synchronously before any job exists
//! 2. per-entity failures (metadata, schema, datastore), caught by the job
//!    loop and recorded on the entity's status row
//! 3. per-record failures, which are only logged and counted and so never
//!    appear as an `EngineError` at all
//! 4. job-fatal failures, caught by the job boundary and written to the job
//!    record as `failed`

use thiserror::Error;

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid request: {0}")]
    Configuration(String),

    #[error("Entity type not found: {0}")]
    EntityNotFound(String),

    #[error("Metadata lookup failed for {entity_type}: {message}")]
    Metadata { entity_type: String, message: String },

    #[error("Datastore error for {entity_type}: {message}")]
    Datastore { entity_type: String, message: String },

    #[error("Schema creation failed for {entity_type}: {message}")]
    Schema { entity_type: String, message: String },

    #[error("Job status store error: {0}")]
    StatusStore(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Download token is unknown or was already used")]
    DownloadUnavailable,

    #[error("Job failed: {0}")]
    Job(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Common(#[from] pbk_common::PbkError),
}

impl EngineError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn archive(msg: impl Into<String>) -> Self {
        Self::Archive(msg.into())
    }

    pub fn metadata(entity_type: &str, err: impl std::fmt::Display) -> Self {
        Self::Metadata {
            entity_type: entity_type.to_string(),
            message: err.to_string(),
        }
    }

    pub fn datastore(entity_type: &str, err: impl std::fmt::Display) -> Self {
        Self::Datastore {
            entity_type: entity_type.to_string(),
            message: err.to_string(),
        }
    }

    pub fn schema(entity_type: &str, err: impl std::fmt::Display) -> Self {
        Self::Schema {
            entity_type: entity_type.to_string(),
            message: err.to_string(),
        }
    }

    pub fn status_store(err: impl std::fmt::Display) -> Self {
        Self::StatusStore(err.to_string())
    }

    /// True for errors the caller caused, as opposed to the environment.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}
