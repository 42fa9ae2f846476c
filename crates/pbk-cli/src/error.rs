//! Error types for the pbk CLI
//!
//! Messages are user-facing and say what to check next.

use pbk_engine::EngineError;
use thiserror::Error;

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Error, Debug)]
pub enum CliError {
    /// The catalogue snapshot could not be read or written
    #[error("Catalogue error: {0}. Check the --catalog path (or PBK_CATALOG).")]
    Catalog(String),

    /// Engine configuration or request was rejected
    #[error("{0}")]
    Engine(#[from] EngineError),

    /// The submitted job ended in `failed`
    #[error("Job {id} failed: {message}")]
    JobFailed { id: uuid::Uuid, message: String },

    /// Argument that clap cannot validate on its own
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}. Check your PBK_* environment variables or .env file.")]
    Config(String),

    #[error("File operation failed: {0}. Check file permissions and disk space.")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse JSON: {0}. Check the file syntax.")]
    JsonParse(#[from] serde_json::Error),
}

impl CliError {
    pub fn catalog(err: impl std::fmt::Display) -> Self {
        Self::Catalog(err.to_string())
    }

    pub fn config(err: impl std::fmt::Display) -> Self {
        Self::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_errors_keep_their_message() {
        let err: CliError = EngineError::configuration("no entity types selected").into();
        assert_eq!(err.to_string(), "Invalid request: no entity types selected");
    }
}
