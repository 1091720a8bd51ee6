// crates/server-jobs/src/error.rs
use cvsum_core::{EngineError, ExtractionError, ValidationError};
use thiserror::Error;

/// Errors surfaced to callers of the job system.
///
/// Extraction and engine errors only reach a caller through the synchronous
/// path; inside a job they become the job's `Failed` message.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Job system is shutting down.")]
    ShuttingDown,
}

impl JobError {
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound(id.into())
    }
}
