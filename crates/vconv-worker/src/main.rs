//! Video conversion worker binary.
//!
//! Usage: `vconv-worker [JOB_FILE...]`. Each file holds one JSON job
//! descriptor; the worker processes them and keeps running until Ctrl-C.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vconv_models::Job;
use vconv_worker::{metrics, JobExecutor, WorkerConfig, WorkerPool};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    dotenvy::dotenv().ok();
    init_tracing()?;

    info!("Starting vconv-worker");

    let config = WorkerConfig::from_env()?;
    config.validate()?;
    info!("Worker config: {:?}", config);

    if let Some(port) = config.metrics_port {
        metrics::init_metrics(port)?;
        info!(port, "Prometheus metrics exporter listening");
    }

    let templates = config.load_templates()?;
    info!(templates = ?templates.names(), "Loaded job templates");

    let executor = JobExecutor::from_config(&config, templates).await?;
    if let Err(e) = executor.transcoder().check_binaries() {
        warn!("Encoder binaries not usable, jobs will fail: {}", e);
    }

    let pool = Arc::new(WorkerPool::from_config(executor, &config));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = tokio::spawn({
        let pool = Arc::clone(&pool);
        async move { pool.start(shutdown_rx).await }
    });

    for path in std::env::args().skip(1) {
        match load_job(Path::new(&path)).await {
            Ok(job) => {
                if let Err(e) = pool.submit(job) {
                    error!(file = %path, "Failed to submit job: {}", e);
                }
            }
            Err(e) => error!(file = %path, "Failed to load job descriptor: {:#}", e),
        }
    }

    tokio::signal::ctrl_c().await.ok();
    info!("Received shutdown signal");
    let _ = shutdown_tx.send(true);

    if let Err(e) = runner.await {
        error!("Worker pool task failed: {}", e);
    }

    for handle in pool.jobs() {
        let status = handle.status();
        info!(
            job_id = %handle.id(),
            state = %status.state,
            error = status.error.as_deref().unwrap_or(""),
            "Final job status"
        );
    }

    info!("Worker shutdown complete");
    Ok(())
}

/// Colored output for dev, JSON when `LOG_FORMAT=json`.
fn init_tracing() -> anyhow::Result<()> {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("vconv=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
    Ok(())
}

async fn load_job(path: &Path) -> anyhow::Result<Job> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}
