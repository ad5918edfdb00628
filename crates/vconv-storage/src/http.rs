//! Read-only HTTP(S) source backend.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;
use vconv_models::utils::{extension_for_content_type, extension_from_uri};

use crate::backend::{
    source_path, write_response_to_file, StorageBackend, DEFAULT_SOURCE_EXTENSION,
};
use crate::error::{StorageError, StorageResult};

pub const USER_AGENT: &str = "video-converter-service/1.0";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct HttpStorage {
    client: reqwest::Client,
}

impl HttpStorage {
    pub fn new() -> StorageResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| StorageError::config_error(format!("HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StorageBackend for HttpStorage {
    async fn download(&self, uri: &str, workspace: &Path) -> StorageResult<PathBuf> {
        let url = url::Url::parse(uri).map_err(|e| StorageError::InvalidUri(format!("{}: {}", uri, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(StorageError::InvalidUri(format!("{} is not an HTTP URL", uri)));
        }

        let response = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(StorageError::not_found(uri));
        }
        if !status.is_success() {
            return Err(StorageError::download_failed(format!(
                "HTTP request failed with status {}",
                status
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let ext = extension_from_uri(uri)
            .or_else(|| {
                content_type
                    .as_deref()
                    .and_then(extension_for_content_type)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| DEFAULT_SOURCE_EXTENSION.to_string());

        let target = source_path(workspace, &ext);
        let bytes = write_response_to_file(response, &target).await?;

        info!(
            source = %uri,
            target = %target.display(),
            bytes,
            content_type = content_type.as_deref().unwrap_or(""),
            "Downloaded HTTP source"
        );
        Ok(target)
    }

    async fn upload(&self, _local: &Path, _destination: &str) -> StorageResult<()> {
        Err(StorageError::unsupported(self.type_name(), "upload"))
    }

    async fn upload_batch(&self, _items: &[crate::backend::UploadItem]) -> StorageResult<()> {
        Err(StorageError::unsupported(self.type_name(), "upload"))
    }

    async fn delete(&self, _destination: &str) -> StorageResult<()> {
        Err(StorageError::unsupported(self.type_name(), "delete"))
    }

    async fn list(&self, _prefix: &str) -> StorageResult<Vec<String>> {
        Err(StorageError::unsupported(self.type_name(), "list"))
    }

    /// The destination of an HTTP "object" is its URL.
    fn public_url(&self, destination: &str) -> StorageResult<String> {
        Ok(destination.to_string())
    }

    fn type_name(&self) -> &'static str {
        "http"
    }
}
