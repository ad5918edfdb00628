//! Prometheus metrics for the worker.

use std::net::{Ipv4Addr, SocketAddr};

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{WorkerError, WorkerResult};

/// Install the Prometheus recorder with an HTTP scrape endpoint on `port`.
pub fn init_metrics(port: u16) -> WorkerResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
        .install()
        .map_err(|e| WorkerError::config_error(format!("metrics exporter: {}", e)))
}

/// Metric names as constants for consistency.
pub mod names {
    // Queue metrics
    pub const JOBS_SUBMITTED_TOTAL: &str = "vconv_jobs_submitted_total";
    pub const JOBS_REJECTED_TOTAL: &str = "vconv_jobs_rejected_total";
    pub const QUEUE_LENGTH: &str = "vconv_queue_length";

    // Job outcome metrics
    pub const JOBS_IN_FLIGHT: &str = "vconv_jobs_in_flight";
    pub const JOBS_COMPLETED_TOTAL: &str = "vconv_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "vconv_jobs_failed_total";
    pub const JOBS_CANCELLED_TOTAL: &str = "vconv_jobs_cancelled_total";
    pub const JOB_DURATION_SECONDS: &str = "vconv_job_duration_seconds";

    // Processing metrics
    pub const STAGE_DURATION_SECONDS: &str = "vconv_stage_duration_seconds";
    pub const TRANSCODE_DURATION_SECONDS: &str = "vconv_transcode_duration_seconds";
    pub const OUTPUT_BYTES_TOTAL: &str = "vconv_output_bytes_total";
    pub const NOTIFICATIONS_FAILED_TOTAL: &str = "vconv_notifications_failed_total";
}

pub fn record_job_submitted() {
    counter!(names::JOBS_SUBMITTED_TOTAL).increment(1);
}

/// `reason` is one of `full`, `duplicate`, `closed`, `invalid`.
pub fn record_job_rejected(reason: &'static str) {
    counter!(names::JOBS_REJECTED_TOTAL, "reason" => reason).increment(1);
}

pub fn set_queue_length(length: usize) {
    gauge!(names::QUEUE_LENGTH).set(length as f64);
}

pub fn job_started() {
    gauge!(names::JOBS_IN_FLIGHT).increment(1.0);
}

pub fn job_finished() {
    gauge!(names::JOBS_IN_FLIGHT).decrement(1.0);
}

pub fn record_job_completed(template: &str, duration_secs: f64) {
    let labels = [("template", template.to_string())];
    counter!(names::JOBS_COMPLETED_TOTAL, &labels).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_job_failed(stage: &'static str) {
    counter!(names::JOBS_FAILED_TOTAL, "stage" => stage).increment(1);
}

pub fn record_job_cancelled() {
    counter!(names::JOBS_CANCELLED_TOTAL).increment(1);
}

pub fn record_stage_duration(stage: &'static str, duration_secs: f64) {
    histogram!(names::STAGE_DURATION_SECONDS, "stage" => stage).record(duration_secs);
}

pub fn record_transcode_duration(template: &str, duration_secs: f64) {
    let labels = [("template", template.to_string())];
    histogram!(names::TRANSCODE_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_output_bytes(backend: &'static str, bytes: u64) {
    counter!(names::OUTPUT_BYTES_TOTAL, "backend" => backend).increment(bytes);
}

pub fn record_notification_failed() {
    counter!(names::NOTIFICATIONS_FAILED_TOTAL).increment(1);
}
