//! Outbound webhook payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::{Job, JobId, JobState};

/// One uploaded file, as reported to the webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifiedFile {
    pub destination: String,
    pub url: String,
    pub size: u64,
    pub checksum: String,
}

/// Body POSTed to a template's webhook when a job ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobNotification {
    pub job_id: JobId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub video_id: String,
    pub template: String,
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub outputs: Vec<NotifiedFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobNotification {
    /// Snapshot of a job that reached a terminal state.
    pub fn from_job(job: &Job, outputs: Vec<NotifiedFile>) -> Self {
        Self {
            job_id: job.id.clone(),
            correlation_id: job.correlation_id.clone(),
            video_id: job.video_id.clone(),
            template: job.template.clone(),
            state: job.status.state,
            error: job.status.error.clone(),
            outputs,
            completed_at: job.status.completed_at,
        }
    }
}
