//! Model-level error types.

use thiserror::Error;

use crate::job::JobState;

/// Result type for template operations.
pub type TemplateResult<T> = Result<T, TemplateError>;

/// Errors raised while loading or resolving job templates.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Job template '{0}' not found")]
    NotFound(String),

    #[error("Output '{output}' declares no profiles")]
    NoProfiles { output: String },

    #[error("Failed to parse template catalog: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Failed to read template catalog: {0}")]
    Io(#[from] std::io::Error),
}

/// A job status change that would move the state machine backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid job state transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: JobState,
    pub to: JobState,
}

/// Source type tag that no storage backend understands.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported source type: {0}")]
pub struct UnknownSourceType(pub String);
