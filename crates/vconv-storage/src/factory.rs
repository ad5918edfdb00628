//! Backend selection by type tag.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use vconv_models::SourceType;

use crate::azure::{AzureBlobSettings, AzureBlobStorage};
use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use crate::http::HttpStorage;
use crate::local::LocalStorage;
use crate::s3::{S3Settings, S3Storage};

/// Output storage type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StorageKind {
    #[default]
    Local,
    AzureBlob,
    S3,
}

impl StorageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::AzureBlob => "azure-blob",
            Self::S3 => "s3",
        }
    }
}

impl FromStr for StorageKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "azure-blob" | "azure" => Ok(Self::AzureBlob),
            "s3" => Ok(Self::S3),
            other => Err(StorageError::config_error(format!(
                "unsupported storage type: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings for every backend; `kind` picks the output backend.
#[derive(Debug, Clone, Default)]
pub struct StorageSettings {
    pub kind: StorageKind,
    /// Root of the local output backend
    pub local_path: PathBuf,
    pub azure: AzureBlobSettings,
    pub s3: S3Settings,
}

impl StorageSettings {
    /// Check that the selected output backend has what it needs.
    pub fn validate(&self) -> StorageResult<()> {
        match self.kind {
            StorageKind::Local if self.local_path.as_os_str().is_empty() => Err(
                StorageError::config_error("STORAGE_LOCAL_PATH is required for local storage"),
            ),
            StorageKind::AzureBlob
                if self.azure.account.is_empty() && self.azure.endpoint.is_none() =>
            {
                Err(StorageError::config_error(
                    "AZURE_STORAGE_ACCOUNT is required for blob storage",
                ))
            }
            StorageKind::AzureBlob if self.azure.container.is_empty() => Err(
                StorageError::config_error("AZURE_STORAGE_CONTAINER is required for blob storage"),
            ),
            StorageKind::AzureBlob if self.azure.sas_token.is_none() => Err(
                StorageError::config_error("AZURE_STORAGE_SAS_TOKEN is required for blob uploads"),
            ),
            StorageKind::S3 if self.s3.bucket.is_empty() => Err(StorageError::config_error(
                "S3_BUCKET is required for S3 storage",
            )),
            _ => Ok(()),
        }
    }
}

/// Backend that receives conversion outputs.
pub async fn output_backend(settings: &StorageSettings) -> StorageResult<Arc<dyn StorageBackend>> {
    settings.validate()?;
    let backend: Arc<dyn StorageBackend> = match settings.kind {
        StorageKind::Local => Arc::new(LocalStorage::new(settings.local_path.clone())),
        StorageKind::AzureBlob => Arc::new(AzureBlobStorage::new(&settings.azure)?),
        StorageKind::S3 => Arc::new(S3Storage::new(&settings.s3).await?),
    };
    Ok(backend)
}

/// Backend that fetches a source of type `source_type`, independent of the
/// configured output backend.
pub async fn source_backend(
    source_type: SourceType,
    settings: &StorageSettings,
) -> StorageResult<Arc<dyn StorageBackend>> {
    let backend: Arc<dyn StorageBackend> = match source_type {
        SourceType::Local => Arc::new(LocalStorage::new(settings.local_path.clone())),
        SourceType::Http => Arc::new(HttpStorage::new()?),
        SourceType::AzureBlob => Arc::new(AzureBlobStorage::new(&AzureBlobSettings {
            // the container comes from the source URL
            container: String::new(),
            ..settings.azure.clone()
        })?),
        SourceType::S3 => Arc::new(S3Storage::new(&settings.s3).await?),
    };
    Ok(backend)
}
