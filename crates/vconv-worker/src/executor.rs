//! Single-job pipeline: download, validate, transcode, upload, clean up,
//! notify.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, info, warn, Instrument};
use vconv_media::{progress_channel, sha256_file, wait_cancelled, TranscodeRequest, Transcoder};
use vconv_models::utils::normalize_sha256;
use vconv_models::{
    Job, JobNotification, JobState, JobTemplate, NotifiedFile, TemplateCatalog, TranscodeResult,
};
use vconv_queue::JobHandle;
use vconv_storage::{output_backend, source_backend, StorageBackend, StorageSettings, UploadItem};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::notify::WebhookNotifier;

/// Upload prefix used when an output declares no destination.
pub const DEFAULT_DESTINATION: &str = "{jobId}/{outputName}";

/// How long an interrupted pipeline gets to stop its encoder before it is
/// dropped.
const INTERRUPT_GRACE: Duration = Duration::from_secs(5);

const OUTPUTS_DIR: &str = "outputs";

/// Runs jobs end to end. Shared by every worker of a pool.
pub struct JobExecutor {
    templates: Arc<TemplateCatalog>,
    transcoder: Transcoder,
    output: Arc<dyn StorageBackend>,
    storage: StorageSettings,
    notifier: WebhookNotifier,
    temp_dir: PathBuf,
    max_source_bytes: Option<u64>,
    job_timeout: Duration,
}

impl JobExecutor {
    pub fn new(
        config: &WorkerConfig,
        templates: TemplateCatalog,
        output: Arc<dyn StorageBackend>,
    ) -> WorkerResult<Self> {
        Ok(Self {
            templates: Arc::new(templates),
            transcoder: Transcoder::new(config.transcoder.clone()),
            output,
            storage: config.storage.clone(),
            notifier: WebhookNotifier::new()?,
            temp_dir: config.temp_dir.clone(),
            max_source_bytes: config.max_source_bytes(),
            job_timeout: config.job_timeout,
        })
    }

    /// Build the output backend from `config.storage`, then the executor.
    pub async fn from_config(config: &WorkerConfig, templates: TemplateCatalog) -> WorkerResult<Self> {
        let output = output_backend(&config.storage).await?;
        Self::new(config, templates, output)
    }

    pub fn transcoder(&self) -> &Transcoder {
        &self.transcoder
    }

    pub fn templates(&self) -> &TemplateCatalog {
        &self.templates
    }

    pub fn output_backend(&self) -> &Arc<dyn StorageBackend> {
        &self.output
    }

    /// Override the source size ceiling. `None` disables it.
    pub fn with_max_source_bytes(mut self, max: Option<u64>) -> Self {
        self.max_source_bytes = max;
        self
    }

    /// Per-job directory under the temp dir. The job id must be a single
    /// plain path component, since the directory is removed after the job.
    pub fn workspace(&self, job: &Job) -> WorkerResult<PathBuf> {
        let mut components = Path::new(job.id.as_str()).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) => Ok(self.temp_dir.join(name)),
            _ => Err(WorkerError::validation(format!(
                "jobId {:?} cannot be used as a workspace directory",
                job.id.as_str()
            ))),
        }
    }

    /// Run `handle`'s job to a terminal state.
    ///
    /// Never returns an error: every failure is recorded in the job status.
    /// `shutdown` flipping to `true` stops the job the same way its timeout
    /// does.
    pub async fn execute(&self, handle: &JobHandle, shutdown: watch::Receiver<bool>) {
        let logger = JobLogger::new(handle.job());
        let span = logger.create_span();
        self.execute_inner(handle, &logger, shutdown)
            .instrument(span)
            .await
    }

    async fn execute_inner(
        &self,
        handle: &JobHandle,
        logger: &JobLogger,
        shutdown: watch::Receiver<bool>,
    ) {
        let job = handle.job();
        if let Err(e) = handle.start() {
            logger.log_warning(&format!("not starting job: {}", e));
            return;
        }
        logger.log_start(&job.source.uri, job.source.source_type.as_str());
        metrics::job_started();
        let started = Instant::now();

        let template = match self.templates.get(&job.template) {
            Ok(template) => template,
            Err(e) => {
                let err = WorkerError::from(e);
                self.finish_failed(handle, logger, &err);
                metrics::job_finished();
                return;
            }
        };

        let workspace = match self.workspace(job) {
            Ok(workspace) => workspace,
            Err(err) => {
                self.finish_failed(handle, logger, &err);
                metrics::job_finished();
                return;
            }
        };
        let outcome = self
            .run_bounded(handle, logger, &template, &workspace, shutdown)
            .await;

        cleanup_workspace(&workspace).await;

        match &outcome {
            Ok(files) => {
                if let Err(e) = handle.complete() {
                    logger.log_warning(&format!("could not mark job completed: {}", e));
                }
                metrics::record_job_completed(&job.template, started.elapsed().as_secs_f64());
                logger.log_completion(files.len(), started.elapsed());
            }
            Err(err) => self.finish_failed(handle, logger, err),
        }
        metrics::job_finished();

        let files = outcome.unwrap_or_default();
        self.send_notification(handle, logger, &template, files).await;
    }

    fn finish_failed(&self, handle: &JobHandle, logger: &JobLogger, err: &WorkerError) {
        let message = err.to_string();
        logger.log_failure(err.stage(), &message);
        if let Err(e) = handle.fail(message) {
            logger.log_warning(&format!("could not mark job failed: {}", e));
        }
        metrics::record_job_failed(err.stage());
    }

    /// Run the pipeline under the job deadline and the service shutdown signal.
    async fn run_bounded(
        &self,
        handle: &JobHandle,
        logger: &JobLogger,
        template: &JobTemplate,
        workspace: &Path,
        shutdown: watch::Receiver<bool>,
    ) -> WorkerResult<Vec<NotifiedFile>> {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let pipeline = self.run_pipeline(handle, logger, template, workspace, cancel_rx);
        tokio::pin!(pipeline);

        let deadline = tokio::time::sleep(self.job_timeout);
        tokio::pin!(deadline);
        let mut shutdown = Some(shutdown);

        let interrupt = tokio::select! {
            result = &mut pipeline => return result,
            _ = &mut deadline => WorkerError::TimedOut(self.job_timeout),
            _ = wait_cancelled(&mut shutdown) => WorkerError::Cancelled,
        };

        // Let the transcoder kill and reap its encoder before giving up on it
        let _ = cancel_tx.send(true);
        if tokio::time::timeout(INTERRUPT_GRACE, &mut pipeline).await.is_err() {
            logger.log_warning("pipeline did not stop after interruption; dropping it");
        }
        Err(interrupt)
    }

    async fn run_pipeline(
        &self,
        handle: &JobHandle,
        logger: &JobLogger,
        template: &JobTemplate,
        workspace: &Path,
        cancel: watch::Receiver<bool>,
    ) -> WorkerResult<Vec<NotifiedFile>> {
        let job = handle.job();

        let stage = Instant::now();
        let source = self.download(job, workspace).await?;
        finish_stage(logger, "download", stage);

        let stage = Instant::now();
        let source_bytes = self.validate_source(&source, job.source.checksum.as_deref()).await?;
        debug!(job_id = %job.id, bytes = source_bytes, "Source validated");
        finish_stage(logger, "validation", stage);

        let stage = Instant::now();
        let result = self
            .transcode(handle, template, &source, &workspace.join(OUTPUTS_DIR), cancel)
            .await?;
        metrics::record_transcode_duration(&job.template, stage.elapsed().as_secs_f64());
        finish_stage(logger, "encoding", stage);

        let stage = Instant::now();
        let files = self.upload(job, template, &result).await?;
        finish_stage(logger, "upload", stage);

        Ok(files)
    }

    async fn download(&self, job: &Job, workspace: &Path) -> WorkerResult<PathBuf> {
        let backend = source_backend(job.source.source_type, &self.storage)
            .await
            .map_err(WorkerError::Download)?;
        tokio::fs::create_dir_all(workspace).await?;
        backend
            .download(&job.source.uri, workspace)
            .await
            .map_err(WorkerError::Download)
    }

    /// Check the downloaded source exists, is non-empty, fits the size ceiling
    /// and matches the declared checksum. Returns its size.
    async fn validate_source(&self, path: &Path, checksum: Option<&str>) -> WorkerResult<u64> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| WorkerError::validation(format!("cannot access source file: {}", e)))?;

        let size = metadata.len();
        if size == 0 {
            return Err(WorkerError::validation("source file is empty"));
        }
        if let Some(max) = self.max_source_bytes {
            if size > max {
                return Err(WorkerError::validation(format!(
                    "source file size exceeds maximum allowed ({})",
                    format_size_limit(max)
                )));
            }
        }

        if let Some(declared) = checksum.map(str::trim).filter(|c| !c.is_empty()) {
            let expected = normalize_sha256(declared).ok_or_else(|| {
                WorkerError::validation(format!("unsupported checksum format: {}", declared))
            })?;
            let actual = sha256_file(path)
                .await
                .map_err(|e| WorkerError::validation(e.to_string()))?;
            if actual != expected {
                return Err(WorkerError::validation(format!(
                    "checksum mismatch: expected {}, got {}",
                    expected, actual
                )));
            }
        }

        Ok(size)
    }

    async fn transcode(
        &self,
        handle: &JobHandle,
        template: &JobTemplate,
        source: &Path,
        output_root: &Path,
        cancel: watch::Receiver<bool>,
    ) -> WorkerResult<TranscodeResult> {
        let (progress_tx, mut progress_rx) = progress_channel();
        let request = TranscodeRequest {
            job_id: handle.id().as_str(),
            input: source,
            output_root,
            template,
            progress: Some(progress_tx),
            cancel: Some(cancel),
        };

        // The sender lives inside the transcode future, so the consumer ends
        // when the transcode does.
        let consume = async {
            while let Some(event) = progress_rx.recv().await {
                if handle.set_progress(event.fraction) {
                    debug!(
                        output = %event.output_name,
                        profile = %event.profile_name,
                        pass = event.pass + 1,
                        passes = event.total_passes,
                        frame = event.frame,
                        speed = event.speed,
                        progress = %format!("{:.2}%", event.fraction * 100.0),
                        "Conversion progress"
                    );
                }
            }
        };

        let (result, ()) = tokio::join!(self.transcoder.transcode(request), consume);
        result.map_err(WorkerError::Encoding)
    }

    /// Upload every produced file as one all-or-nothing batch.
    async fn upload(
        &self,
        job: &Job,
        template: &JobTemplate,
        result: &TranscodeResult,
    ) -> WorkerResult<Vec<NotifiedFile>> {
        let mut items = Vec::with_capacity(result.file_count());
        let mut files = Vec::with_capacity(result.file_count());

        for output in &result.outputs {
            let declared = template
                .outputs
                .iter()
                .find(|spec| spec.name == output.name)
                .and_then(|spec| spec.destination.as_deref());
            let prefix = destination_prefix(declared, job, &output.name);

            for file in &output.files {
                let relative = file
                    .path
                    .strip_prefix(&output.directory)
                    .unwrap_or(file.path.as_path());
                let key = object_key(&prefix, relative);
                items.push(UploadItem::new(file.path.clone(), key.clone()));
                files.push(NotifiedFile {
                    url: self.output.public_url(&key).map_err(WorkerError::Upload)?,
                    destination: key,
                    size: file.size,
                    checksum: file.checksum.clone(),
                });
            }
        }

        self.output
            .upload_batch(&items)
            .await
            .map_err(WorkerError::Upload)?;

        let bytes: u64 = files.iter().map(|f| f.size).sum();
        metrics::record_output_bytes(self.output.type_name(), bytes);
        info!(
            job_id = %job.id,
            backend = self.output.type_name(),
            files = files.len(),
            bytes,
            "Uploaded outputs"
        );
        Ok(files)
    }

    async fn send_notification(
        &self,
        handle: &JobHandle,
        logger: &JobLogger,
        template: &JobTemplate,
        files: Vec<NotifiedFile>,
    ) {
        let status = handle.status();
        let Some(url) = template.notifications.target(status.state == JobState::Completed) else {
            debug!(job_id = %handle.id(), "No webhook for this outcome");
            return;
        };

        let payload = JobNotification::from_job(&handle.snapshot(), files);
        if let Err(e) = self.notifier.notify(url, &payload).await {
            metrics::record_notification_failed();
            logger.log_warning(&e.to_string());
        }
    }
}

fn finish_stage(logger: &JobLogger, stage: &'static str, started: Instant) {
    let elapsed = started.elapsed();
    metrics::record_stage_duration(stage, elapsed.as_secs_f64());
    logger.log_stage(stage, elapsed);
}

/// Expand an output's destination template. Supports `{jobId}`, `{videoId}`,
/// `{template}` and `{outputName}`.
pub fn destination_prefix(declared: Option<&str>, job: &Job, output_name: &str) -> String {
    let template = declared
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .unwrap_or(DEFAULT_DESTINATION);
    template
        .replace("{jobId}", job.id.as_str())
        .replace("{videoId}", &job.video_id)
        .replace("{template}", &job.template)
        .replace("{outputName}", output_name)
        .trim_matches('/')
        .to_string()
}

/// `prefix/relative` with `/` separators whatever the host platform uses.
fn object_key(prefix: &str, relative: &Path) -> String {
    let relative = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    if prefix.is_empty() {
        relative
    } else {
        format!("{}/{}", prefix, relative)
    }
}

fn format_size_limit(bytes: u64) -> String {
    const GIB: u64 = 1024 * 1024 * 1024;
    if bytes >= GIB && bytes % GIB == 0 {
        format!("{}GB", bytes / GIB)
    } else {
        format!("{} bytes", bytes)
    }
}

async fn cleanup_workspace(workspace: &Path) {
    match tokio::fs::remove_dir_all(workspace).await {
        Ok(()) => debug!(path = %workspace.display(), "Removed job workspace"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %workspace.display(), "Failed to clean up job workspace: {}", e),
    }
}
