//! Structured job logging utilities.
//!
//! Every log line of a job carries its id, video id and template so a single
//! job can be followed through the pipeline in aggregated logs.

use std::time::Duration;

use tracing::{error, info, warn, Span};
use vconv_models::Job;

/// Job logger for structured logging with consistent formatting.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    video_id: String,
    template: String,
}

impl JobLogger {
    pub fn new(job: &Job) -> Self {
        Self {
            job_id: job.id.to_string(),
            video_id: job.video_id.clone(),
            template: job.template.clone(),
        }
    }

    pub fn log_start(&self, source_uri: &str, source_type: &str) {
        info!(
            job_id = %self.job_id,
            video_id = %self.video_id,
            template = %self.template,
            source_uri = %source_uri,
            source_type = %source_type,
            "Job started"
        );
    }

    /// A pipeline stage finished.
    pub fn log_stage(&self, stage: &str, elapsed: Duration) {
        info!(
            job_id = %self.job_id,
            stage = %stage,
            elapsed_ms = elapsed.as_millis() as u64,
            "Job stage completed"
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(job_id = %self.job_id, "Job warning: {}", message);
    }

    pub fn log_failure(&self, stage: &str, message: &str) {
        error!(
            job_id = %self.job_id,
            video_id = %self.video_id,
            stage = %stage,
            "Job failed: {}", message
        );
    }

    pub fn log_completion(&self, files: usize, elapsed: Duration) {
        info!(
            job_id = %self.job_id,
            video_id = %self.video_id,
            files,
            elapsed_ms = elapsed.as_millis() as u64,
            "Job completed"
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Span wrapping a whole job execution.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            video_id = %self.video_id,
            template = %self.template
        )
    }
}
