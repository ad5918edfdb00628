//! Queue error types.

use thiserror::Error;
use vconv_models::JobId;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Job queue is full (capacity {capacity})")]
    Full { capacity: usize },

    #[error("Job queue is closed")]
    Closed,

    #[error("Job {0} is already queued or running")]
    Duplicate(JobId),

    #[error("Invalid job descriptor: {0}")]
    Invalid(String),
}

impl QueueError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }

    /// Whether resubmitting the same job later could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Full { .. } | Self::Duplicate(_))
    }
}
