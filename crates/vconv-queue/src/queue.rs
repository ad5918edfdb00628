//! Fixed-capacity FIFO of job handles.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tracing::{debug, info, warn};
use validator::Validate;
use vconv_models::{Job, JobId};

use crate::error::{QueueError, QueueResult};
use crate::handle::JobHandle;

/// Job queue shared by submitters and workers.
///
/// Submission never waits: a full queue is reported immediately. A job id is
/// held from submission until its job reaches a terminal state (or is
/// [`release`](Self::release)d), so the same id cannot be queued twice while
/// an earlier job with it is still pending or running.
#[derive(Debug)]
pub struct JobQueue {
    capacity: usize,
    tx: Mutex<Option<mpsc::Sender<JobHandle>>>,
    rx: tokio::sync::Mutex<mpsc::Receiver<JobHandle>>,
    active: Mutex<HashMap<JobId, JobHandle>>,
}

impl JobQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            capacity,
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Validate `job`, reset it to pending and enqueue it.
    pub fn submit(&self, job: Job) -> QueueResult<JobHandle> {
        validate_descriptor(&job)?;

        let tx_guard = lock(&self.tx);
        let tx = tx_guard.as_ref().ok_or(QueueError::Closed)?;

        let mut active = lock(&self.active);
        if active.get(&job.id).is_some_and(|held| !held.is_terminal()) {
            warn!(job_id = %job.id, "Duplicate job rejected");
            return Err(QueueError::Duplicate(job.id));
        }

        let handle = JobHandle::new(job);
        active.insert(handle.id().clone(), handle.clone());
        drop(active);
        match tx.try_send(handle.clone()) {
            Ok(()) => {
                debug!(job_id = %handle.id(), "Job queued");
                Ok(handle)
            }
            Err(e) => {
                lock(&self.active).remove(handle.id());
                match e {
                    TrySendError::Full(_) => {
                        warn!(job_id = %handle.id(), capacity = self.capacity, "Job queue full");
                        Err(QueueError::Full {
                            capacity: self.capacity,
                        })
                    }
                    TrySendError::Closed(_) => Err(QueueError::Closed),
                }
            }
        }
    }

    /// Next job in FIFO order; `None` once the queue is closed and empty.
    pub async fn recv(&self) -> Option<JobHandle> {
        self.rx.lock().await.recv().await
    }

    /// Forget a finished job's id so it may be submitted again.
    pub fn release(&self, id: &JobId) {
        lock(&self.active).remove(id);
    }

    /// Refuse further submissions. Already queued jobs stay receivable.
    pub fn close(&self) {
        if lock(&self.tx).take().is_some() {
            info!("Job queue closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.tx).is_none()
    }

    /// Remove and return every job still waiting, releasing their ids.
    pub async fn drain(&self) -> Vec<JobHandle> {
        let mut rx = self.rx.lock().await;
        let mut drained = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(handle) => drained.push(handle),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        drop(rx);

        let mut active = lock(&self.active);
        for handle in &drained {
            active.remove(handle.id());
        }
        drained
    }

    /// Jobs waiting to be picked up.
    pub fn len(&self) -> usize {
        match lock(&self.tx).as_ref() {
            Some(tx) => self.capacity - tx.capacity(),
            None => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids currently queued or running.
    pub fn active_count(&self) -> usize {
        lock(&self.active)
            .values()
            .filter(|handle| !handle.is_terminal())
            .count()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Reject descriptors missing the fields a worker needs.
fn validate_descriptor(job: &Job) -> QueueResult<()> {
    if job.id.is_empty() {
        return Err(QueueError::invalid("jobId is required"));
    }
    // the id names the job's scratch directory and its default upload prefix
    if !is_safe_job_id(job.id.as_str()) {
        return Err(QueueError::invalid(format!(
            "jobId {:?} must contain only letters, digits, '.', '_' or '-' and must not start with '.'",
            job.id.as_str()
        )));
    }
    job.validate()
        .map_err(|e| QueueError::invalid(format!("job {}: {}", job.id, e)))
}

fn is_safe_job_id(id: &str) -> bool {
    !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}
