//! Conversion job definitions.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::error::{InvalidTransition, UnknownSourceType};

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a job's source file lives. Selects the download backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum SourceType {
    Local,
    #[serde(alias = "https")]
    Http,
    AzureBlob,
    S3,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Local => "local",
            SourceType::Http => "http",
            SourceType::AzureBlob => "azure-blob",
            SourceType::S3 => "s3",
        }
    }
}

impl FromStr for SourceType {
    type Err = UnknownSourceType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(SourceType::Local),
            "http" | "https" => Ok(SourceType::Http),
            "azure-blob" => Ok(SourceType::AzureBlob),
            "s3" => Ok(SourceType::S3),
            other => Err(UnknownSourceType(other.to_string())),
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source file configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
pub struct SourceConfig {
    /// Location of the source, interpreted by the backend for `source_type`
    #[validate(length(min = 1))]
    pub uri: String,

    #[serde(rename = "type")]
    pub source_type: SourceType,

    /// Optional content checksum (`sha256:<hex>` or bare hex)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl SourceConfig {
    pub fn new(uri: impl Into<String>, source_type: SourceType) -> Self {
        Self {
            uri: uri.into(),
            source_type,
            checksum: None,
        }
    }
}

/// Job lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Job is waiting in queue
    #[default]
    Pending,
    /// Job is being processed by a worker
    Processing,
    /// Job completed successfully
    Completed,
    /// Job failed
    Failed,
    /// Job was dropped from the queue before a worker picked it up
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }

    /// Forward-only transition table.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Pending, JobState::Processing)
                | (JobState::Pending, JobState::Cancelled)
                | (JobState::Processing, JobState::Completed)
                | (JobState::Processing, JobState::Failed)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current status of a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub state: JobState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// 0.0 to 1.0
    #[serde(default)]
    pub progress: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobStatus {
    /// Fresh pending status with a message.
    pub fn pending(message: impl Into<String>) -> Self {
        Self {
            state: JobState::Pending,
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    fn transition(&mut self, next: JobState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Enter `processing` and stamp `started_at`.
    pub fn start(&mut self) -> Result<(), InvalidTransition> {
        self.transition(JobState::Processing)?;
        self.started_at = Some(Utc::now());
        self.message = Some("Processing started".to_string());
        Ok(())
    }

    /// Record progress. Values are clamped to [0, 1]; lower values than the
    /// current one and updates outside `processing` are ignored.
    pub fn set_progress(&mut self, progress: f64) -> bool {
        if self.state != JobState::Processing || progress.is_nan() {
            return false;
        }
        let progress = progress.clamp(0.0, 1.0);
        if progress <= self.progress {
            return false;
        }
        self.progress = progress;
        true
    }

    pub fn complete(&mut self) -> Result<(), InvalidTransition> {
        self.transition(JobState::Completed)?;
        self.progress = 1.0;
        self.message = Some("Conversion completed successfully".to_string());
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), InvalidTransition> {
        self.transition(JobState::Failed)?;
        self.error = Some(error.into());
        self.message = Some("Conversion failed".to_string());
        Ok(())
    }

    pub fn cancel(&mut self, reason: impl Into<String>) -> Result<(), InvalidTransition> {
        self.transition(JobState::Cancelled)?;
        self.message = Some(reason.into());
        Ok(())
    }
}

/// A video conversion job as submitted by an event source.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Unique job ID
    #[serde(rename = "jobId")]
    pub id: JobId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    #[validate(length(min = 1))]
    pub video_id: String,

    /// Name of the job template to apply
    #[validate(length(min = 1))]
    pub template: String,

    #[validate(nested)]
    pub source: SourceConfig,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub status: JobStatus,
}

impl Job {
    /// Create a new job with a random ID.
    pub fn new(
        video_id: impl Into<String>,
        template: impl Into<String>,
        source: SourceConfig,
    ) -> Self {
        Self {
            id: JobId::new(),
            correlation_id: None,
            video_id: video_id.into(),
            template: template.into(),
            source,
            metadata: HashMap::new(),
            created_at: Utc::now(),
            status: JobStatus::default(),
        }
    }

    pub fn with_id(mut self, id: JobId) -> Self {
        self.id = id;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
