//! Bounded in-memory job queue.
//!
//! This crate provides:
//! - Non-blocking admission into a fixed-capacity FIFO
//! - Duplicate-id rejection while a job is queued or in flight
//! - [`JobHandle`], the shared view of a job's live status

pub mod error;
pub mod handle;
pub mod queue;

pub use error::{QueueError, QueueResult};
pub use handle::JobHandle;
pub use queue::JobQueue;
