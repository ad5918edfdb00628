//! Executor and pool tests against stub encoder/prober scripts.

#![cfg(unix)]

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::watch;
use tokio_test::{assert_err, assert_ok};
use vconv_media::TranscoderConfig;
use vconv_models::{
    builtin_profile, Job, JobId, JobState, JobTemplate, NotificationSettings, OutputSpec,
    PackageKind, SourceConfig, SourceType, TemplateCatalog, BUILTIN_PROFILE_NAMES,
};
use vconv_queue::{JobHandle, QueueError};
use vconv_storage::{
    LocalStorage, StorageBackend, StorageError, StorageKind, StorageResult, StorageSettings,
};
use vconv_worker::{JobExecutor, WorkerConfig, WorkerPool};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PROBE_SCRIPT: &str = r#"#!/bin/sh
cat <<'JSON'
{"streams":[{"codec_type":"video","codec_name":"h264","width":1920,"height":1080,"r_frame_rate":"30/1"},{"codec_type":"audio","codec_name":"aac"}],"format":{"format_name":"mov,mp4","duration":"10.0","size":"4000","bit_rate":"3200"}}
JSON
"#;

/// Writes two segments for HLS invocations, otherwise a single output file.
const ENCODER_SCRIPT: &str = r#"#!/bin/sh
out=""
seg=""
prev=""
for arg in "$@"; do
  if [ "$prev" = "-hls_segment_filename" ]; then seg="$arg"; fi
  prev="$arg"
  out="$arg"
done
for f in 0 150 300; do
  echo "frame=$f" >&2
  echo "progress=continue" >&2
done
echo "progress=end" >&2
if [ -n "$seg" ]; then
  printf 'segment-a' > "$(printf "$seg" 0)"
  printf 'segment-b' > "$(printf "$seg" 1)"
  printf '#EXTM3U\n' > "$out"
else
  printf 'progressive-bytes' > "$out"
fi
"#;

/// Records its pid in the temp root (three levels above the output
/// directory, outside the job workspace), then hangs.
const HANGING_ENCODER_SCRIPT: &str = r#"#!/bin/sh
for arg in "$@"; do out="$arg"; done
echo $$ > "$(dirname "$out")/../../../encoder.pid.tmp"
mv "$(dirname "$out")/../../../encoder.pid.tmp" "$(dirname "$out")/../../../encoder.pid"
echo "frame=1" >&2
echo "progress=continue" >&2
exec sleep 30
"#;

struct Stubs {
    _dir: TempDir,
    probe: PathBuf,
    encoder: PathBuf,
    hanging: PathBuf,
}

/// Scripts are written once, before any test spawns a child.
fn stubs() -> &'static Stubs {
    static STUBS: OnceLock<Stubs> = OnceLock::new();
    STUBS.get_or_init(|| {
        let dir = tempfile::tempdir().unwrap();
        let write = |name: &str, body: &str| {
            let path = dir.path().join(name);
            std::fs::write(&path, body).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        };
        Stubs {
            probe: write("ffprobe", PROBE_SCRIPT),
            encoder: write("ffmpeg", ENCODER_SCRIPT),
            hanging: write("ffmpeg-hanging", HANGING_ENCODER_SCRIPT),
            _dir: dir,
        }
    })
}

struct Env {
    root: TempDir,
}

impl Env {
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("work")).unwrap();
        std::fs::create_dir_all(root.path().join("inputs")).unwrap();
        Self { root }
    }

    fn temp_dir(&self) -> PathBuf {
        self.root.path().join("work")
    }

    fn outputs(&self) -> PathBuf {
        self.root.path().join("published")
    }

    fn config(&self, encoder: &Path) -> WorkerConfig {
        WorkerConfig {
            max_concurrent_jobs: 1,
            job_timeout: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(10),
            temp_dir: self.temp_dir(),
            outputs_dir: self.outputs(),
            transcoder: TranscoderConfig {
                ffmpeg_path: encoder.to_path_buf(),
                ffprobe_path: stubs().probe.clone(),
                default_preset: Some("veryfast".into()),
                default_hwaccel: None,
            },
            storage: StorageSettings {
                kind: StorageKind::Local,
                local_path: self.outputs(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn executor(&self, config: &WorkerConfig, templates: Vec<(&str, JobTemplate)>) -> JobExecutor {
        self.executor_with(config, templates, Arc::new(LocalStorage::new(self.outputs())))
    }

    fn executor_with(
        &self,
        config: &WorkerConfig,
        templates: Vec<(&str, JobTemplate)>,
        output: Arc<dyn StorageBackend>,
    ) -> JobExecutor {
        let catalog = TemplateCatalog::new(
            templates
                .into_iter()
                .map(|(name, template)| (name.to_string(), template))
                .collect::<HashMap<_, _>>(),
        );
        JobExecutor::new(config, catalog, output).unwrap()
    }

    fn source(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.root.path().join("inputs").join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn workspace(&self, id: &str) -> PathBuf {
        self.temp_dir().join(id)
    }
}

/// Local backend whose second upload fails.
struct FlakyOutput {
    inner: LocalStorage,
    uploads: AtomicUsize,
}

#[async_trait]
impl StorageBackend for FlakyOutput {
    async fn download(&self, uri: &str, workspace: &Path) -> StorageResult<PathBuf> {
        self.inner.download(uri, workspace).await
    }

    async fn upload(&self, local: &Path, destination: &str) -> StorageResult<()> {
        if self.uploads.fetch_add(1, Ordering::SeqCst) == 1 {
            return Err(StorageError::UploadFailed(format!("{destination}: disk quota exceeded")));
        }
        self.inner.upload(local, destination).await
    }

    async fn delete(&self, destination: &str) -> StorageResult<()> {
        self.inner.delete(destination).await
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.inner.list(prefix).await
    }

    fn public_url(&self, destination: &str) -> StorageResult<String> {
        self.inner.public_url(destination)
    }

    fn type_name(&self) -> &'static str {
        "flaky"
    }
}

fn output(name: &str, package: PackageKind) -> OutputSpec {
    OutputSpec {
        name: name.into(),
        package,
        profiles: vec![],
        profile: None,
        segment_length_s: 0,
        container: None,
        destination: None,
    }
}

fn progressive_template(profile: &str) -> JobTemplate {
    JobTemplate {
        outputs: vec![OutputSpec {
            profile: Some(profile.into()),
            ..output("mp4", PackageKind::Progressive)
        }],
        ..Default::default()
    }
}

fn job(id: &str, template: &str, source: &Path) -> Job {
    Job::new(
        format!("video-{id}"),
        template,
        SourceConfig::new(source.display().to_string(), SourceType::Local),
    )
    .with_id(JobId::from_string(id))
}

/// Run one job to completion with a shutdown signal that never fires.
async fn run(executor: &JobExecutor, job: Job) -> JobHandle {
    let handle = JobHandle::new(job);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    executor.execute(&handle, shutdown_rx).await;
    handle
}

#[tokio::test]
async fn test_local_job_end_to_end() {
    let env = Env::new();
    let config = env.config(&stubs().encoder);
    let executor = env.executor(&config, vec![("default", progressive_template("720p"))]);
    let source = env.source("clip.mp4", b"not really a video");

    let handle = run(&executor, job("job-e2e", "default", &source)).await;
    let status = handle.status();

    assert_eq!(status.state, JobState::Completed, "{:?}", status.error);
    assert_eq!(status.progress, 1.0);
    assert_eq!(status.message.as_deref(), Some("Conversion completed successfully"));
    assert!(status.started_at.is_some());
    assert!(status.completed_at.is_some());
    assert!(status.error.is_none());

    let published = env.outputs().join("job-e2e/mp4/720p.mp4");
    assert_eq!(std::fs::read(&published).unwrap(), b"progressive-bytes");
    assert!(!env.workspace("job-e2e").exists());
}

#[tokio::test]
async fn test_missing_local_source_fails_without_workspace() {
    let env = Env::new();
    let config = env.config(&stubs().encoder);
    let executor = env.executor(&config, vec![("default", progressive_template("720p"))]);
    let missing = env.root.path().join("inputs/nope.mp4");

    let handle = run(&executor, job("job-missing", "default", &missing)).await;
    let status = handle.status();

    assert_eq!(status.state, JobState::Failed);
    let error = status.error.unwrap_or_default();
    assert!(error.starts_with("failed to download source file"), "{error}");
    assert!(status.completed_at.is_some());
    assert!(!env.workspace("job-missing").exists());
    assert!(!env.outputs().join("job-missing").exists());
}

#[tokio::test]
async fn test_unknown_template_fails() {
    let env = Env::new();
    let config = env.config(&stubs().encoder);
    let executor = env.executor(&config, vec![("default", progressive_template("720p"))]);
    let source = env.source("clip.mp4", b"bytes");

    let handle = run(&executor, job("job-tpl", "does-not-exist", &source)).await;
    let status = handle.status();

    assert_eq!(status.state, JobState::Failed);
    assert_eq!(
        status.error.as_deref(),
        Some("Job template 'does-not-exist' not found")
    );
}

#[tokio::test]
async fn test_checksum_mismatch_fails_validation() {
    let env = Env::new();
    let config = env.config(&stubs().encoder);
    let executor = env.executor(&config, vec![("default", progressive_template("720p"))]);
    let source = env.source("clip.mp4", b"bytes");

    let mut job = job("job-sum", "default", &source);
    job.source.checksum = Some(format!("sha256:{}", "0".repeat(64)));
    let handle = run(&executor, job).await;
    let status = handle.status();

    assert_eq!(status.state, JobState::Failed);
    let error = status.error.unwrap_or_default();
    assert!(
        error.starts_with("source file validation failed: checksum mismatch"),
        "{error}"
    );
    assert!(!env.workspace("job-sum").exists());
}

#[tokio::test]
async fn test_empty_source_fails_validation() {
    let env = Env::new();
    let config = env.config(&stubs().encoder);
    let executor = env.executor(&config, vec![("default", progressive_template("720p"))]);
    let source = env.source("empty.mp4", b"");

    let handle = run(&executor, job("job-empty", "default", &source)).await;

    assert_eq!(
        handle.status().error.as_deref(),
        Some("source file validation failed: source file is empty")
    );
}

#[tokio::test]
async fn test_ladder_and_progressive_scenario() {
    let env = Env::new();
    let config = env.config(&stubs().encoder);
    let ladder = BUILTIN_PROFILE_NAMES
        .iter()
        .map(|n| builtin_profile(n).unwrap())
        .collect();
    let template = JobTemplate {
        outputs: vec![
            OutputSpec {
                profiles: ladder,
                segment_length_s: 4,
                ..output("hls", PackageKind::Segmented)
            },
            OutputSpec {
                profile: Some("720p".into()),
                destination: Some("videos/{videoId}/{outputName}".into()),
                ..output("mp4_720p", PackageKind::Progressive)
            },
            OutputSpec {
                profile: Some("1080p".into()),
                ..output("mp4_1080p", PackageKind::Progressive)
            },
        ],
        ..Default::default()
    };
    let executor = env.executor(&config, vec![("full", template)]);
    let source = env.source("clip.mov", b"not really a video");

    let handle = run(&executor, job("job-full", "full", &source)).await;
    let status = handle.status();
    assert_eq!(status.state, JobState::Completed, "{:?}", status.error);

    let hls = env.outputs().join("job-full/hls");
    let master = std::fs::read_to_string(hls.join("master.m3u8")).unwrap();
    assert_eq!(master.matches("#EXT-X-STREAM-INF").count(), 5);
    for profile in BUILTIN_PROFILE_NAMES {
        assert!(hls.join(format!("{profile}/{profile}.m3u8")).is_file());
        assert!(hls.join(format!("{profile}/{profile}_000.ts")).is_file());
    }

    assert!(env.outputs().join("videos/video-job-full/mp4_720p/720p.mp4").is_file());
    assert!(env.outputs().join("job-full/mp4_1080p/1080p.mp4").is_file());
    assert!(!env.workspace("job-full").exists());
}

#[tokio::test]
async fn test_webhook_sent_on_completion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/done"))
        .and(body_partial_json(serde_json::json!({
            "jobId": "job-hook",
            "videoId": "video-job-hook",
            "state": "completed"
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let env = Env::new();
    let config = env.config(&stubs().encoder);
    let template = JobTemplate {
        notifications: NotificationSettings {
            webhook_url: Some(format!("{}/hooks/done", server.uri())),
            on_complete: true,
            on_failure: false,
        },
        ..progressive_template("480p")
    };
    let executor = env.executor(&config, vec![("hooked", template)]);
    let source = env.source("clip.mp4", b"bytes");

    let handle = run(&executor, job("job-hook", "hooked", &source)).await;
    assert_eq!(handle.status().state, JobState::Completed);
}

#[tokio::test]
async fn test_failed_webhook_does_not_fail_job() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let env = Env::new();
    let config = env.config(&stubs().encoder);
    let template = JobTemplate {
        notifications: NotificationSettings {
            webhook_url: Some(server.uri()),
            on_complete: true,
            on_failure: true,
        },
        ..progressive_template("480p")
    };
    let executor = env.executor(&config, vec![("hooked", template)]);
    let source = env.source("clip.mp4", b"bytes");

    let handle = run(&executor, job("job-hook-503", "hooked", &source)).await;
    assert_eq!(handle.status().state, JobState::Completed);
}

#[tokio::test]
async fn test_job_timeout_kills_encoder() {
    let env = Env::new();
    let mut config = env.config(&stubs().hanging);
    config.job_timeout = Duration::from_secs(5);
    let executor = Arc::new(env.executor(&config, vec![("default", progressive_template("240p"))]));
    let source = env.source("clip.mp4", b"bytes");

    let handle = JobHandle::new(job("job-slow", "default", &source));
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let execution = tokio::spawn({
        let executor = Arc::clone(&executor);
        let handle = handle.clone();
        async move { executor.execute(&handle, shutdown_rx).await }
    });

    // the encoder must have started before the deadline for the kill to be checked
    let pid_file = env.temp_dir().join("encoder.pid");
    wait_for_file(&pid_file).await;
    assert_eq!(handle.status().state, JobState::Processing);

    tokio::time::timeout(Duration::from_secs(20), execution)
        .await
        .unwrap()
        .unwrap();
    let status = handle.status();

    assert_eq!(status.state, JobState::Failed);
    assert_eq!(status.error.as_deref(), Some("job timed out after 5s"));
    assert!(!env.workspace("job-slow").exists());
    assert_encoder_dead(&pid_file);
}

#[tokio::test]
async fn test_upload_failure_fails_job_after_encode() {
    let env = Env::new();
    let config = env.config(&stubs().encoder);
    let template = JobTemplate {
        outputs: vec![
            OutputSpec {
                profile: Some("720p".into()),
                ..output("mp4_720p", PackageKind::Progressive)
            },
            OutputSpec {
                profile: Some("480p".into()),
                ..output("mp4_480p", PackageKind::Progressive)
            },
        ],
        ..Default::default()
    };
    let flaky = Arc::new(FlakyOutput {
        inner: LocalStorage::new(env.outputs()),
        uploads: AtomicUsize::new(0),
    });
    let executor = env.executor_with(&config, vec![("two", template)], flaky.clone());
    let source = env.source("clip.mp4", b"bytes");

    let handle = run(&executor, job("job-upload", "two", &source)).await;
    let status = handle.status();

    assert_eq!(status.state, JobState::Failed);
    let error = status.error.unwrap_or_default();
    assert!(error.starts_with("failed to upload output files"), "{error}");
    assert_eq!(flaky.uploads.load(Ordering::SeqCst), 2);
    assert!(status.completed_at.is_some());
    assert!(!env.workspace("job-upload").exists());
}

#[tokio::test]
async fn test_oversized_source_fails_validation() {
    let env = Env::new();
    let config = env.config(&stubs().encoder);
    let executor = env
        .executor(&config, vec![("default", progressive_template("720p"))])
        .with_max_source_bytes(Some(8));
    let source = env.source("big.mp4", b"nine bytes");

    let handle = run(&executor, job("job-big", "default", &source)).await;
    let status = handle.status();

    assert_eq!(status.state, JobState::Failed);
    assert_eq!(
        status.error.as_deref(),
        Some("source file validation failed: source file size exceeds maximum allowed (8 bytes)")
    );
    assert!(!env.workspace("job-big").exists());
    assert!(!env.outputs().join("job-big").exists());

    // exactly at the ceiling is allowed
    let source = env.source("fits.mp4", b"8 bytes!");
    let handle = run(&executor, job("job-fits", "default", &source)).await;
    assert_eq!(handle.status().state, JobState::Completed, "{:?}", handle.status().error);
}

#[tokio::test]
async fn test_job_id_cannot_escape_temp_dir() {
    let env = Env::new();
    let config = env.config(&stubs().encoder);
    let executor = env.executor(&config, vec![("default", progressive_template("720p"))]);
    let missing = env.root.path().join("inputs/nope.mp4");

    // sibling of the temp dir that a "../victim" workspace would resolve to
    let victim = env.root.path().join("victim");
    std::fs::create_dir_all(&victim).unwrap();
    std::fs::write(victim.join("precious.txt"), b"keep me").unwrap();

    let handle = run(&executor, job("../victim", "default", &missing)).await;
    let status = handle.status();

    assert_eq!(status.state, JobState::Failed);
    let error = status.error.unwrap_or_default();
    assert!(error.contains("cannot be used as a workspace directory"), "{error}");
    assert_eq!(std::fs::read(victim.join("precious.txt")).unwrap(), b"keep me");

    for id in ["..", "/abs", "a/b", ""] {
        let job = job(id, "default", &missing);
        assert_err!(executor.workspace(&job), "{id:?} accepted");
    }
    let job = job("job-ok", "default", &missing);
    assert_eq!(assert_ok!(executor.workspace(&job)), env.workspace("job-ok"));
}

#[tokio::test]
async fn test_pool_rejects_path_like_job_ids() {
    let env = Env::new();
    let config = env.config(&stubs().encoder);
    let executor = env.executor(&config, vec![("default", progressive_template("720p"))]);
    let source = env.source("clip.mp4", b"bytes");
    let pool = WorkerPool::from_config(executor, &config);

    let err = assert_err!(pool.submit(job("../victim", "default", &source)));
    assert!(matches!(err, QueueError::Invalid(_)), "{err}");
    assert!(pool.jobs().is_empty());
    assert_eq!(pool.queue_len(), 0);
}

#[tokio::test]
async fn test_full_queue_rejects_synchronously() {
    let env = Env::new();
    let config = env.config(&stubs().encoder);
    let executor = env.executor(&config, vec![("default", progressive_template("720p"))]);
    let source = env.source("clip.mp4", b"bytes");
    let pool = WorkerPool::from_config(executor, &config);

    assert_ok!(pool.submit(job("job-q1", "default", &source)));
    assert_ok!(pool.submit(job("job-q2", "default", &source)));

    assert!(matches!(
        pool.submit(job("job-q1", "default", &source)),
        Err(QueueError::Duplicate(_))
    ));
    assert!(matches!(
        pool.submit(job("job-q3", "default", &source)),
        Err(QueueError::Full { capacity: 2 })
    ));
    assert_eq!(pool.queue_len(), 2);
    assert_eq!(
        pool.job(&JobId::from_string("job-q1")).unwrap().status().state,
        JobState::Pending
    );
}

#[tokio::test]
async fn test_pool_runs_submitted_jobs() {
    let env = Env::new();
    let mut config = env.config(&stubs().encoder);
    config.max_concurrent_jobs = 2;
    let executor = env.executor(&config, vec![("default", progressive_template("360p"))]);
    let source = env.source("clip.mp4", b"bytes");
    let pool = Arc::new(WorkerPool::from_config(executor, &config));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = tokio::spawn({
        let pool = Arc::clone(&pool);
        async move { pool.start(shutdown_rx).await }
    });

    let handles: Vec<JobHandle> = ["job-p1", "job-p2", "job-p3"]
        .iter()
        .map(|id| pool.submit(job(id, "default", &source)).unwrap())
        .collect();

    for handle in &handles {
        let status = tokio::time::timeout(Duration::from_secs(20), handle.wait_terminal())
            .await
            .unwrap();
        assert_eq!(status.state, JobState::Completed, "{:?}", status.error);
    }
    for id in ["job-p1", "job-p2", "job-p3"] {
        assert!(env.outputs().join(format!("{id}/mp4/360p.mp4")).is_file());
    }

    // Finished ids can be submitted again
    let again = pool.submit(job("job-p1", "default", &source)).unwrap();
    tokio::time::timeout(Duration::from_secs(20), again.wait_terminal())
        .await
        .unwrap();

    assert_eq!(pool.prune_finished(), 3);
    assert!(pool.jobs().is_empty());

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(20), runner)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_shutdown_mid_encode_kills_encoder() {
    let env = Env::new();
    let config = env.config(&stubs().hanging);
    let executor = env.executor(&config, vec![("default", progressive_template("240p"))]);
    let source = env.source("clip.mp4", b"bytes");
    let pool = Arc::new(WorkerPool::from_config(executor, &config));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = tokio::spawn({
        let pool = Arc::clone(&pool);
        async move { pool.start(shutdown_rx).await }
    });

    let running = pool.submit(job("job-running", "default", &source)).unwrap();
    let queued = pool.submit(job("job-queued", "default", &source)).unwrap();

    let pid_file = env.temp_dir().join("encoder.pid");
    wait_for_file(&pid_file).await;

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(20), runner)
        .await
        .unwrap()
        .unwrap();

    assert_encoder_dead(&pid_file);

    let status = running.status();
    assert_eq!(status.state, JobState::Failed);
    assert_eq!(
        status.error.as_deref(),
        Some("job cancelled: service shutting down")
    );
    assert!(!env.workspace("job-running").exists());

    let status = queued.status();
    assert_eq!(status.state, JobState::Cancelled);
    assert_eq!(
        status.message.as_deref(),
        Some("Job cancelled: service shutting down")
    );

    assert!(matches!(
        pool.submit(job("job-late", "default", &source)),
        Err(QueueError::Closed)
    ));
}

#[tokio::test]
async fn test_pool_forgets_jobs_after_retention() {
    let env = Env::new();
    let config = env.config(&stubs().encoder);
    let executor = env.executor(&config, vec![("default", progressive_template("360p"))]);
    let source = env.source("clip.mp4", b"bytes");
    let pool = Arc::new(
        WorkerPool::from_config(executor, &config).with_retention(Duration::from_millis(200)),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = tokio::spawn({
        let pool = Arc::clone(&pool);
        async move { pool.start(shutdown_rx).await }
    });

    let handle = assert_ok!(pool.submit(job("job-retained", "default", &source)));
    let status = tokio::time::timeout(Duration::from_secs(20), handle.wait_terminal())
        .await
        .unwrap();
    assert_eq!(status.state, JobState::Completed, "{:?}", status.error);

    tokio::time::timeout(Duration::from_secs(10), async {
        while pool.job(handle.id()).is_some() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .unwrap();
    assert!(pool.jobs().is_empty());

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(20), runner)
        .await
        .unwrap()
        .unwrap();
}

async fn wait_for_file(path: &Path) {
    tokio::time::timeout(Duration::from_secs(20), async {
        while !path.exists() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();
}

fn assert_encoder_dead(pid_file: &Path) {
    let pid = std::fs::read_to_string(pid_file).unwrap();
    let alive = std::process::Command::new("kill")
        .args(["-0", pid.trim()])
        .status()
        .unwrap()
        .success();
    assert!(!alive, "encoder process {pid} survived");
}
