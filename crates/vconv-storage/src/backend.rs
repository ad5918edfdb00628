//! The storage backend trait and helpers shared by its implementations.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{StorageError, StorageResult};

/// Extension used when neither the URI nor the response says what a source is.
pub const DEFAULT_SOURCE_EXTENSION: &str = ".mp4";

/// One file of a batch upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadItem {
    pub source: PathBuf,
    /// Backend-relative destination key, `/`-separated
    pub destination: String,
}

impl UploadItem {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }
}

#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Fetch `uri` into `workspace/source<ext>` and return that path.
    async fn download(&self, uri: &str, workspace: &Path) -> StorageResult<PathBuf>;

    async fn upload(&self, local: &Path, destination: &str) -> StorageResult<()>;

    /// Upload every item in order. The first failure aborts the batch.
    async fn upload_batch(&self, items: &[UploadItem]) -> StorageResult<()> {
        for item in items {
            self.upload(&item.source, &item.destination)
                .await
                .map_err(|cause| StorageError::BatchUpload {
                    source_path: item.source.clone(),
                    destination: item.destination.clone(),
                    cause: Box::new(cause),
                })?;
        }
        debug!(backend = self.type_name(), files = items.len(), "Batch upload complete");
        Ok(())
    }

    async fn delete(&self, destination: &str) -> StorageResult<()>;

    /// Destination keys under `prefix`.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// URL a consumer can fetch `destination` from.
    fn public_url(&self, destination: &str) -> StorageResult<String>;

    fn type_name(&self) -> &'static str;
}

/// Workspace path for a downloaded source with extension `ext` (including the dot).
pub fn source_path(workspace: &Path, ext: &str) -> PathBuf {
    workspace.join(format!("source{}", ext))
}

/// Reject keys that would escape the backend root.
pub fn validate_key(destination: &str) -> StorageResult<&str> {
    let key = destination.trim_start_matches('/');
    if key.is_empty() || key.split('/').any(|part| part == "..") {
        return Err(StorageError::InvalidKey(destination.to_string()));
    }
    Ok(key)
}

/// Stream a successful HTTP response body into `path`; returns bytes written.
pub(crate) async fn write_response_to_file(
    response: reqwest::Response,
    path: &Path,
) -> StorageResult<u64> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut file = tokio::fs::File::create(path).await?;
    let mut written = 0u64;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

/// Anonymous GET of `url` into `path`.
pub(crate) async fn fetch_to_file(
    client: &reqwest::Client,
    url: &str,
    path: &Path,
) -> StorageResult<(u64, Option<String>)> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(StorageError::not_found(url));
    }
    if !status.is_success() {
        return Err(StorageError::download_failed(format!(
            "GET {} returned {}",
            url, status
        )));
    }
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let written = write_response_to_file(response, path).await?;
    Ok((written, content_type))
}
