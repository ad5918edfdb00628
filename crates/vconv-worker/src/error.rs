//! Worker error types.
//!
//! Pipeline failures are qualified by the stage that raised them; the
//! display string is what ends up in `JobStatus::error`.

use std::time::Duration;

use thiserror::Error;
use vconv_media::MediaError;
use vconv_models::TemplateError;
use vconv_queue::QueueError;
use vconv_storage::StorageError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    /// Unknown or unusable job template
    #[error("{0}")]
    Template(#[from] TemplateError),

    #[error("failed to download source file: {0}")]
    Download(#[source] StorageError),

    #[error("source file validation failed: {0}")]
    Validation(String),

    #[error("transcoding failed: {0}")]
    Encoding(#[source] MediaError),

    #[error("failed to upload output files: {0}")]
    Upload(#[source] StorageError),

    #[error("notification failed: {0}")]
    Notification(String),

    #[error("job timed out after {0:?}")]
    TimedOut(Duration),

    #[error("job cancelled: service shutting down")]
    Cancelled,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn notification(msg: impl Into<String>) -> Self {
        Self::Notification(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Pipeline stage the error belongs to, for logs and metric labels.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Template(_) | Self::ConfigError(_) => "configuration",
            Self::Download(_) => "download",
            Self::Validation(_) => "validation",
            Self::Encoding(_) => "encoding",
            Self::Upload(_) | Self::Storage(_) => "upload",
            Self::Notification(_) => "notification",
            Self::TimedOut(_) => "timeout",
            Self::Cancelled => "cancelled",
            Self::Queue(_) => "queue",
            Self::Io(_) => "io",
        }
    }

    /// Whether the job was stopped from outside rather than failing on its own.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::TimedOut(_) | Self::Cancelled)
    }
}
