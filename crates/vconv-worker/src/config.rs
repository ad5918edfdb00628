//! Worker configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use vconv_media::TranscoderConfig;
use vconv_models::TemplateCatalog;
use vconv_storage::{AzureBlobSettings, S3Settings, StorageKind, StorageSettings};

use crate::error::{WorkerError, WorkerResult};

const GIB: u64 = 1024 * 1024 * 1024;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Worker tasks in the pool; the queue holds twice as many jobs
    pub max_concurrent_jobs: usize,
    /// Per-job deadline, download through upload
    pub job_timeout: Duration,
    /// How long shutdown waits for running jobs before aborting them
    pub shutdown_timeout: Duration,
    /// Job workspaces live under `temp_dir/<job id>`
    pub temp_dir: PathBuf,
    pub outputs_dir: PathBuf,
    /// Largest accepted source, in GiB; 0 disables the check
    pub max_source_gb: u64,
    pub transcoder: TranscoderConfig,
    pub storage: StorageSettings,
    pub templates_path: Option<PathBuf>,
    /// Inline catalog JSON, used when no path is set
    pub templates_json: Option<String>,
    pub metrics_port: Option<u16>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let outputs_dir = PathBuf::from("/tmp/video-converter/outputs");
        Self {
            max_concurrent_jobs: 2,
            job_timeout: Duration::from_secs(3600), // 1 hour
            shutdown_timeout: Duration::from_secs(30),
            temp_dir: PathBuf::from("/tmp/video-converter"),
            outputs_dir: outputs_dir.clone(),
            max_source_gb: 10,
            transcoder: TranscoderConfig {
                default_preset: Some("fast".to_string()),
                ..Default::default()
            },
            storage: StorageSettings {
                kind: StorageKind::Local,
                local_path: outputs_dir,
                ..Default::default()
            },
            templates_path: None,
            templates_json: None,
            metrics_port: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> WorkerResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from any key/value source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> WorkerResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let parse = |key: &str| get(key).and_then(|v| v.parse::<u64>().ok());

        let defaults = Self::default();
        let outputs_dir = get("WORKER_OUTPUTS_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.outputs_dir);

        let kind = match get("STORAGE_TYPE") {
            Some(tag) => StorageKind::from_str(&tag)?,
            None => StorageKind::Local,
        };

        Ok(Self {
            max_concurrent_jobs: parse("WORKER_MAX_JOBS")
                .map(|n| n as usize)
                .unwrap_or(defaults.max_concurrent_jobs),
            job_timeout: parse("WORKER_JOB_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.job_timeout),
            shutdown_timeout: parse("WORKER_SHUTDOWN_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_timeout),
            temp_dir: get("WORKER_TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.temp_dir),
            max_source_gb: parse("WORKER_MAX_SOURCE_GB").unwrap_or(defaults.max_source_gb),
            transcoder: TranscoderConfig {
                ffmpeg_path: get("FFMPEG_BINARY_PATH")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.transcoder.ffmpeg_path),
                ffprobe_path: get("FFMPEG_PROBE_PATH")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.transcoder.ffprobe_path),
                default_preset: get("FFMPEG_DEFAULT_PRESET").or(defaults.transcoder.default_preset),
                default_hwaccel: get("FFMPEG_HARDWARE_ACCEL"),
            },
            storage: StorageSettings {
                kind,
                local_path: get("STORAGE_LOCAL_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| outputs_dir.clone()),
                azure: AzureBlobSettings {
                    account: get("AZURE_STORAGE_ACCOUNT").unwrap_or_default(),
                    container: get("AZURE_STORAGE_CONTAINER").unwrap_or_default(),
                    sas_token: get("AZURE_STORAGE_SAS_TOKEN"),
                    endpoint_suffix: get("AZURE_STORAGE_ENDPOINT_SUFFIX"),
                    endpoint: get("AZURE_STORAGE_ENDPOINT"),
                },
                s3: S3Settings {
                    bucket: get("S3_BUCKET").unwrap_or_default(),
                    region: get("S3_REGION"),
                    endpoint_url: get("S3_ENDPOINT_URL"),
                    access_key_id: get("S3_ACCESS_KEY_ID"),
                    secret_access_key: get("S3_SECRET_ACCESS_KEY"),
                    public_base_url: get("S3_PUBLIC_BASE_URL"),
                },
            },
            outputs_dir,
            templates_path: get("JOB_TEMPLATES_PATH").map(PathBuf::from),
            templates_json: get("JOB_TEMPLATES"),
            metrics_port: get("METRICS_PORT").and_then(|v| v.parse().ok()),
        })
    }

    pub fn validate(&self) -> WorkerResult<()> {
        if self.max_concurrent_jobs == 0 {
            return Err(WorkerError::config_error(
                "WORKER_MAX_JOBS must be positive",
            ));
        }
        if self.job_timeout.is_zero() {
            return Err(WorkerError::config_error(
                "WORKER_JOB_TIMEOUT must be positive",
            ));
        }
        self.storage.validate()?;
        Ok(())
    }

    pub fn queue_capacity(&self) -> usize {
        self.max_concurrent_jobs * 2
    }

    /// Source size ceiling in bytes; `None` when unlimited.
    pub fn max_source_bytes(&self) -> Option<u64> {
        (self.max_source_gb > 0).then(|| self.max_source_gb.saturating_mul(GIB))
    }

    /// Load and validate the template catalog from `JOB_TEMPLATES_PATH`, or
    /// from inline `JOB_TEMPLATES` JSON.
    pub fn load_templates(&self) -> WorkerResult<TemplateCatalog> {
        let catalog = match (&self.templates_path, &self.templates_json) {
            (Some(path), _) => TemplateCatalog::from_json_file(path)?,
            (None, Some(json)) => TemplateCatalog::from_json_str(json)?,
            (None, None) => {
                return Err(WorkerError::config_error(
                    "no job templates configured (set JOB_TEMPLATES_PATH or JOB_TEMPLATES)",
                ))
            }
        };
        if catalog.is_empty() {
            return Err(WorkerError::config_error("job template catalog is empty"));
        }
        catalog.validate()?;
        Ok(catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> WorkerResult<WorkerConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.max_concurrent_jobs, 2);
        assert_eq!(config.queue_capacity(), 4);
        assert_eq!(config.job_timeout, Duration::from_secs(3600));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
        assert_eq!(config.temp_dir, PathBuf::from("/tmp/video-converter"));
        assert_eq!(config.storage.kind, StorageKind::Local);
        assert_eq!(config.storage.local_path, config.outputs_dir);
        assert_eq!(config.transcoder.default_preset.as_deref(), Some("fast"));
        assert_eq!(config.max_source_bytes(), Some(10 * GIB));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("WORKER_MAX_JOBS", "6"),
            ("WORKER_JOB_TIMEOUT", "90"),
            ("WORKER_MAX_SOURCE_GB", "0"),
            ("FFMPEG_BINARY_PATH", "/opt/ffmpeg/bin/ffmpeg"),
            ("FFMPEG_HARDWARE_ACCEL", "cuda"),
            ("STORAGE_TYPE", "s3"),
            ("S3_BUCKET", "renditions"),
            ("METRICS_PORT", "9100"),
            ("WORKER_TEMP_DIR", "  "),
        ])
        .unwrap();

        assert_eq!(config.queue_capacity(), 12);
        assert_eq!(config.job_timeout, Duration::from_secs(90));
        assert_eq!(config.max_source_bytes(), None);
        assert_eq!(config.transcoder.ffmpeg_path, PathBuf::from("/opt/ffmpeg/bin/ffmpeg"));
        assert_eq!(config.transcoder.default_hwaccel.as_deref(), Some("cuda"));
        assert_eq!(config.storage.kind, StorageKind::S3);
        assert_eq!(config.storage.s3.bucket, "renditions");
        assert_eq!(config.metrics_port, Some(9100));
        // blank values fall back to defaults
        assert_eq!(config.temp_dir, PathBuf::from("/tmp/video-converter"));
    }

    #[test]
    fn test_validate_rejects_zero_pool() {
        let config = config(&[("WORKER_MAX_JOBS", "0")]).unwrap();
        assert!(matches!(config.validate(), Err(WorkerError::ConfigError(_))));
    }

    #[test]
    fn test_unknown_storage_type() {
        assert!(config(&[("STORAGE_TYPE", "gcs")]).is_err());
    }

    #[test]
    fn test_load_inline_templates() {
        let config = config(&[(
            "JOB_TEMPLATES",
            r#"{"job_templates": {"default": {"outputs": [{"name": "mp4", "package": "mp4", "profile": "720p"}]}}}"#,
        )])
        .unwrap();
        let catalog = config.load_templates().unwrap();
        assert!(catalog.contains("default"));

        let missing = WorkerConfig::default();
        assert!(missing.load_templates().is_err());
    }
}
