use std::path::Path;

use vconv_worker::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = WorkerConfig::from_env()?;

    println!(
        "worker-selfcheck: starting with temp_dir={}",
        config.temp_dir.display()
    );
    config.validate()?;
    ensure_dir(&config.temp_dir).await?;

    vconv_media::Transcoder::new(config.transcoder.clone())
        .check_binaries()
        .map_err(|e| anyhow::anyhow!("encoder not available: {}", e))?;
    println!("worker-selfcheck: encoder binaries ok");

    println!(
        "worker-selfcheck: storage backend {}",
        config.storage.kind
    );

    let templates = config.load_templates()?;
    println!(
        "worker-selfcheck: {} job template(s): {}",
        templates.len(),
        templates.names().join(", ")
    );

    println!("worker-selfcheck: ok");
    Ok(())
}

async fn ensure_dir<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    tokio::fs::create_dir_all(path).await?;
    Ok(())
}
