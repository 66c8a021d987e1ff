//! Error types for the worker layer

use thiserror::Error;

/// Worker-related errors
#[derive(Error, Debug, Clone)]
pub enum WorkerError {
    /// Health check failed
    #[error("Health check failed for worker {url}: {reason}")]
    HealthCheckFailed { url: String, reason: String },

    /// Worker URL already registered
    #[error("Worker already registered: {url}")]
    DuplicateWorker { url: String },
}

/// Result type for worker operations
pub type WorkerResult<T> = Result<T, WorkerError>;
