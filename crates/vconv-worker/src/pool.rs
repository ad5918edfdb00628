//! Fixed-size worker pool draining the in-memory job queue.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use vconv_media::wait_cancelled;
use vconv_models::{Job, JobId, JobState};
use vconv_queue::{JobHandle, JobQueue, QueueError, QueueResult};

use crate::config::WorkerConfig;
use crate::error::WorkerError;
use crate::executor::JobExecutor;
use crate::metrics;

/// Status message of queued jobs dropped at shutdown.
pub const SHUTDOWN_MESSAGE: &str = "Job cancelled: service shutting down";

const PANIC_MESSAGE: &str = "internal error: job execution panicked";

/// How long a finished job stays queryable before the pool forgets it.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(3600);

/// Runs up to `pool_size` jobs at once. Submission never blocks.
pub struct WorkerPool {
    executor: Arc<JobExecutor>,
    queue: Arc<JobQueue>,
    registry: RwLock<HashMap<JobId, JobHandle>>,
    pool_size: usize,
    shutdown_grace: Duration,
    retention: Duration,
}

impl WorkerPool {
    pub fn new(executor: JobExecutor, pool_size: usize, shutdown_grace: Duration) -> Self {
        let pool_size = pool_size.max(1);
        Self {
            executor: Arc::new(executor),
            queue: Arc::new(JobQueue::new(pool_size * 2)),
            registry: RwLock::new(HashMap::new()),
            pool_size,
            shutdown_grace,
            retention: DEFAULT_RETENTION,
        }
    }

    /// Keep finished jobs in the registry for `retention` after they end.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn from_config(executor: JobExecutor, config: &WorkerConfig) -> Self {
        Self::new(executor, config.max_concurrent_jobs, config.shutdown_timeout)
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn executor(&self) -> &JobExecutor {
        &self.executor
    }

    /// Enqueue `job`. Fails immediately when the queue is full or closed, the
    /// id is already queued or running, or the descriptor is incomplete.
    pub fn submit(&self, job: Job) -> QueueResult<JobHandle> {
        let handle = match self.queue.submit(job) {
            Ok(handle) => handle,
            Err(e) => {
                metrics::record_job_rejected(rejection_reason(&e));
                warn!("Job rejected: {}", e);
                return Err(e);
            }
        };

        self.registry_write()
            .insert(handle.id().clone(), handle.clone());
        metrics::record_job_submitted();
        metrics::set_queue_length(self.queue.len());
        info!(
            job_id = %handle.id(),
            video_id = %handle.job().video_id,
            template = %handle.job().template,
            "Job queued"
        );
        Ok(handle)
    }

    pub fn job(&self, id: &JobId) -> Option<JobHandle> {
        self.registry_read().get(id).cloned()
    }

    pub fn jobs(&self) -> Vec<JobHandle> {
        self.registry_read().values().cloned().collect()
    }

    /// Forget jobs that reached a terminal state. Returns how many were removed.
    pub fn prune_finished(&self) -> usize {
        let mut registry = self.registry_write();
        let before = registry.len();
        registry.retain(|_, handle| !handle.is_terminal());
        before - registry.len()
    }

    /// Forget jobs that finished more than the retention period ago.
    pub fn prune_expired(&self) -> usize {
        let now = chrono::Utc::now();
        let mut registry = self.registry_write();
        let before = registry.len();
        registry.retain(|_, handle| {
            let status = handle.status();
            match status.completed_at {
                Some(at) if status.state.is_terminal() => now
                    .signed_duration_since(at)
                    .to_std()
                    .map_or(true, |age| age < self.retention),
                _ => true,
            }
        });
        before - registry.len()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Run the workers until `shutdown` flips to `true`, then wind down.
    ///
    /// Finished jobs are pruned from the registry once their retention
    /// expires. On shutdown queued jobs are cancelled and in-flight jobs get
    /// the shutdown grace period to stop. Whatever is still running after
    /// that is aborted.
    pub async fn start(&self, shutdown: watch::Receiver<bool>) {
        info!(workers = self.pool_size, "Starting worker pool");

        let mut workers = JoinSet::new();
        for worker_id in 0..self.pool_size {
            workers.spawn(worker_loop(
                worker_id,
                Arc::clone(&self.executor),
                Arc::clone(&self.queue),
                shutdown.clone(),
            ));
        }

        let mut prune = tokio::time::interval(prune_interval(self.retention));
        prune.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut signal = Some(shutdown);
        loop {
            tokio::select! {
                _ = wait_cancelled(&mut signal) => break,
                _ = prune.tick() => {
                    let pruned = self.prune_expired();
                    if pruned > 0 {
                        debug!(pruned, "Pruned finished jobs");
                    }
                }
            }
        }
        info!("Shutdown signal received, stopping worker pool");

        self.queue.close();
        let dropped = self.queue.drain().await;
        for handle in &dropped {
            if handle.cancel(SHUTDOWN_MESSAGE).is_ok() {
                metrics::record_job_cancelled();
            }
        }
        if !dropped.is_empty() {
            info!(count = dropped.len(), "Cancelled queued jobs");
        }
        metrics::set_queue_length(0);

        let joined = tokio::time::timeout(self.shutdown_grace, async {
            while let Some(joined) = workers.join_next().await {
                if let Err(e) = joined {
                    error!("Worker task failed: {}", e);
                }
            }
        })
        .await;

        if joined.is_err() {
            warn!(
                grace = ?self.shutdown_grace,
                "Workers still busy after shutdown grace period; aborting them"
            );
            // Dropping a job future drops its encoder child, which kills it
            workers.shutdown().await;
            self.fail_abandoned().await;
        }

        info!("Worker pool stopped");
    }

    /// Fail jobs whose worker was aborted mid-run and remove their workspaces.
    async fn fail_abandoned(&self) {
        let message = WorkerError::Cancelled.to_string();
        let abandoned: Vec<JobHandle> = self
            .registry_read()
            .values()
            .filter(|handle| handle.status().state == JobState::Processing)
            .cloned()
            .collect();

        for handle in abandoned {
            if handle.fail(message.clone()).is_ok() {
                metrics::record_job_failed(WorkerError::Cancelled.stage());
                metrics::job_finished();
            }
            self.queue.release(handle.id());

            let Ok(workspace) = self.executor.workspace(handle.job()) else {
                continue;
            };
            if let Err(e) = tokio::fs::remove_dir_all(&workspace).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(job_id = %handle.id(), "Failed to remove workspace: {}", e);
                }
            }
        }
    }

    fn registry_read(&self) -> RwLockReadGuard<'_, HashMap<JobId, JobHandle>> {
        self.registry.read().unwrap_or_else(|e| e.into_inner())
    }

    fn registry_write(&self) -> RwLockWriteGuard<'_, HashMap<JobId, JobHandle>> {
        self.registry.write().unwrap_or_else(|e| e.into_inner())
    }
}

async fn worker_loop(
    worker_id: usize,
    executor: Arc<JobExecutor>,
    queue: Arc<JobQueue>,
    shutdown: watch::Receiver<bool>,
) {
    debug!(worker_id, "Worker started");
    loop {
        let mut signal = Some(shutdown.clone());
        let handle = tokio::select! {
            biased;
            _ = wait_cancelled(&mut signal) => break,
            next = queue.recv() => match next {
                Some(handle) => handle,
                None => break,
            },
        };

        if *shutdown.borrow() {
            if handle.cancel(SHUTDOWN_MESSAGE).is_ok() {
                metrics::record_job_cancelled();
            }
            queue.release(handle.id());
            break;
        }
        metrics::set_queue_length(queue.len());

        let run = AssertUnwindSafe(executor.execute(&handle, shutdown.clone()))
            .catch_unwind()
            .await;
        if run.is_err() {
            error!(worker_id, job_id = %handle.id(), "Job execution panicked");
            if handle.fail(PANIC_MESSAGE).is_ok() {
                metrics::record_job_failed("panic");
                metrics::job_finished();
            }
        }
        queue.release(handle.id());
    }
    debug!(worker_id, "Worker stopped");
}

fn prune_interval(retention: Duration) -> Duration {
    (retention / 2).clamp(Duration::from_millis(100), Duration::from_secs(60))
}

fn rejection_reason(err: &QueueError) -> &'static str {
    match err {
        QueueError::Full { .. } => "full",
        QueueError::Duplicate(_) => "duplicate",
        QueueError::Closed => "closed",
        QueueError::Invalid(_) => "invalid",
    }
}
