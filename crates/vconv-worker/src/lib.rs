//! Video conversion worker.
//!
//! This crate provides:
//! - Job executor running download, validation, transcode and upload
//! - Fixed-size worker pool over the in-memory job queue
//! - Completion/failure webhooks
//! - Graceful shutdown

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod notify;
pub mod pool;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::{destination_prefix, JobExecutor};
pub use logging::JobLogger;
pub use notify::WebhookNotifier;
pub use pool::WorkerPool;
