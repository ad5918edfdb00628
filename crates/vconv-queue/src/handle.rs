//! Shared, live view of a submitted job.

use std::sync::Arc;

use tokio::sync::watch;
use vconv_models::{InvalidTransition, Job, JobId, JobStatus};

pub const QUEUED_MESSAGE: &str = "Job queued for processing";

/// Cheap to clone. The descriptor is fixed at submission; only the status
/// changes, and every change is published to subscribers.
#[derive(Debug, Clone)]
pub struct JobHandle {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    job: Job,
    status: watch::Sender<JobStatus>,
}

impl JobHandle {
    /// Wrap `job`, resetting its status to pending.
    pub fn new(mut job: Job) -> Self {
        let status = JobStatus::pending(QUEUED_MESSAGE);
        job.status = status.clone();
        let (tx, _) = watch::channel(status);
        Self {
            inner: Arc::new(Inner { job, status: tx }),
        }
    }

    pub fn id(&self) -> &JobId {
        &self.inner.job.id
    }

    /// The descriptor as submitted. Its `status` field is the initial one;
    /// use [`status`](Self::status) or [`snapshot`](Self::snapshot) for the
    /// current state.
    pub fn job(&self) -> &Job {
        &self.inner.job
    }

    pub fn status(&self) -> JobStatus {
        self.inner.status.borrow().clone()
    }

    pub fn progress(&self) -> f64 {
        self.inner.status.borrow().progress
    }

    pub fn is_terminal(&self) -> bool {
        self.inner.status.borrow().is_terminal()
    }

    /// The descriptor with its current status.
    pub fn snapshot(&self) -> Job {
        let mut job = self.inner.job.clone();
        job.status = self.status();
        job
    }

    pub fn subscribe(&self) -> watch::Receiver<JobStatus> {
        self.inner.status.subscribe()
    }

    /// Resolve once the job reaches a terminal state.
    pub async fn wait_terminal(&self) -> JobStatus {
        let mut rx = self.subscribe();
        let status = match rx.wait_for(JobStatus::is_terminal).await {
            Ok(status) => status.clone(),
            // the sender lives in `self`, so this is unreachable in practice
            Err(_) => self.status(),
        };
        status
    }

    pub fn start(&self) -> Result<(), InvalidTransition> {
        self.apply(JobStatus::start)
    }

    /// Returns whether the stored progress moved.
    pub fn set_progress(&self, progress: f64) -> bool {
        self.inner
            .status
            .send_if_modified(|status| status.set_progress(progress))
    }

    pub fn complete(&self) -> Result<(), InvalidTransition> {
        self.apply(JobStatus::complete)
    }

    pub fn fail(&self, error: impl Into<String>) -> Result<(), InvalidTransition> {
        let error = error.into();
        self.apply(move |status| status.fail(error))
    }

    pub fn cancel(&self, reason: impl Into<String>) -> Result<(), InvalidTransition> {
        let reason = reason.into();
        self.apply(move |status| status.cancel(reason))
    }

    fn apply<F>(&self, f: F) -> Result<(), InvalidTransition>
    where
        F: FnOnce(&mut JobStatus) -> Result<(), InvalidTransition>,
    {
        let mut outcome = Ok(());
        self.inner.status.send_if_modified(|status| {
            outcome = f(status);
            outcome.is_ok()
        });
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vconv_models::{JobState, SourceConfig, SourceType};

    fn handle() -> JobHandle {
        JobHandle::new(Job::new(
            "video-1",
            "default",
            SourceConfig::new("sample.mp4", SourceType::Local),
        ))
    }

    #[test]
    fn test_new_handle_is_pending() {
        let handle = handle();
        let status = handle.status();
        assert_eq!(status.state, JobState::Pending);
        assert_eq!(status.message.as_deref(), Some(QUEUED_MESSAGE));
        assert_eq!(handle.job().status, status);
    }

    #[test]
    fn test_invalid_transition_leaves_status_unchanged() {
        let handle = handle();
        let before = handle.status();
        assert!(handle.complete().is_err());
        assert_eq!(handle.status(), before);
    }

    #[test]
    fn test_progress_is_monotone() {
        let handle = handle();
        assert!(!handle.set_progress(0.5));
        handle.start().unwrap();
        assert!(handle.set_progress(0.5));
        assert!(!handle.set_progress(0.2));
        assert!(handle.set_progress(3.0));
        assert_eq!(handle.progress(), 1.0);
    }

    #[tokio::test]
    async fn test_wait_terminal_sees_failure() {
        let handle = handle();
        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.wait_terminal().await })
        };

        handle.start().unwrap();
        handle.fail("Download failed: boom").unwrap();

        let status = waiter.await.unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert_eq!(status.error.as_deref(), Some("Download failed: boom"));
        assert!(status.completed_at.is_some());
        assert_eq!(handle.snapshot().status, status);
    }
}
