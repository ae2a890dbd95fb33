//! Error types for dmk-hd

use dmk_common::resilience::ResilienceError;
use std::time::Duration;
use thiserror::Error;

use crate::services::{AnalysisError, ParseError, SourceError};

/// Pipeline error type
///
/// Per-file errors are recorded in the scan report and never abort a batch; only a failure
/// to list the scan root is returned from a scan.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// File source error that was not retried
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Document could not be parsed
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Analysis parameters rejected
    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    /// Bytes do not look like a danmaku export
    #[error("Not a danmaku document: {0}")]
    NotDanmaku(String),

    /// Circuit breaker is open for the file source
    #[error("File source temporarily unavailable, retry after {retry_after:?}")]
    TemporarilyUnavailable { retry_after: Duration },

    /// Every attempt against the file source failed
    #[error("All {attempts} attempts exhausted. Last error: {last_error}")]
    RetryExhausted {
        attempts: u32,
        last_error: SourceError,
    },

    /// Scan was cancelled
    #[error("Scan cancelled")]
    Cancelled,

    /// Blocking worker panicked or was aborted
    #[error("Worker task failed: {0}")]
    Join(String),
}

impl From<ResilienceError<SourceError>> for PipelineError {
    fn from(err: ResilienceError<SourceError>) -> Self {
        match err {
            ResilienceError::TemporarilyUnavailable { retry_after } => {
                PipelineError::TemporarilyUnavailable { retry_after }
            }
            ResilienceError::RetryExhausted {
                attempts,
                last_error,
            } => PipelineError::RetryExhausted {
                attempts,
                last_error,
            },
            ResilienceError::Failed(e) => PipelineError::Source(e),
            ResilienceError::Cancelled { .. } => PipelineError::Cancelled,
        }
    }
}

impl From<tokio::task::JoinError> for PipelineError {
    fn from(err: tokio::task::JoinError) -> Self {
        PipelineError::Join(err.to_string())
    }
}

/// Convenience Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
