//! Typed errors for the research pipeline.
//!
//! Uses `thiserror` for library errors (not `anyhow`) so the server can map
//! each failure to a distinct response.

use thiserror::Error;

use crate::types::job::JobStatus;
use crate::types::source::SourceType;

/// Errors that can occur during pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Storage operation failed
    #[error("storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Job not found in store
    #[error("job not found: {job_id}")]
    JobNotFound { job_id: String },

    /// Status change would move a job backwards or out of a terminal state
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    /// Submission failed validation
    #[error("invalid job: {reason}")]
    InvalidJob { reason: String },

    /// Debug step does not exist for the analysis
    #[error("step not found: {analysis_id}/{step_name}")]
    StepNotFound {
        analysis_id: String,
        step_name: String,
    },

    /// Source worker call failed
    #[error("{source_type} worker error: {message}")]
    Worker {
        source_type: SourceType,
        message: String,
    },

    /// Bounded call exceeded its deadline
    #[error("timed out after {seconds}s: {operation}")]
    Timeout { operation: String, seconds: u64 },

    /// Report generation failed
    #[error("report generation failed: {0}")]
    Report(String),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// Wrap any error as a storage failure.
    pub fn storage(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        PipelineError::Storage(err.into())
    }

    /// Build a worker error for the given source.
    pub fn worker(source_type: SourceType, message: impl Into<String>) -> Self {
        PipelineError::Worker {
            source_type,
            message: message.into(),
        }
    }

    /// Build a validation error.
    pub fn invalid_job(reason: impl Into<String>) -> Self {
        PipelineError::InvalidJob {
            reason: reason.into(),
        }
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        PipelineError::Storage(Box::new(err))
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
