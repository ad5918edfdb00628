//! Local filesystem backend.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::backend::{source_path, validate_key, StorageBackend, DEFAULT_SOURCE_EXTENSION};
use crate::error::{StorageError, StorageResult};

/// Files under a base directory. Downloads accept any local path or `file://` URI.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn resolve(&self, destination: &str) -> StorageResult<PathBuf> {
        Ok(self.base_path.join(validate_key(destination)?))
    }
}

#[async_trait]
impl StorageBackend for LocalStorage {
    async fn download(&self, uri: &str, workspace: &Path) -> StorageResult<PathBuf> {
        let local = Path::new(uri.strip_prefix("file://").unwrap_or(uri));

        let metadata = match tokio::fs::metadata(local).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::not_found(local.display().to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        if !metadata.is_file() {
            return Err(StorageError::download_failed(format!(
                "{} is not a regular file",
                local.display()
            )));
        }

        let ext = local
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e))
            .unwrap_or_else(|| DEFAULT_SOURCE_EXTENSION.to_string());
        let target = source_path(workspace, &ext);

        tokio::fs::create_dir_all(workspace).await?;
        let bytes = tokio::fs::copy(local, &target).await?;

        info!(
            source = %local.display(),
            target = %target.display(),
            bytes,
            "Copied local source"
        );
        Ok(target)
    }

    async fn upload(&self, local: &Path, destination: &str) -> StorageResult<()> {
        let target = self.resolve(destination)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::copy(local, &target).await.map_err(|e| {
            StorageError::upload_failed(format!("{} -> {}: {}", local.display(), target.display(), e))
        })?;

        debug!("Uploaded {} to {}", local.display(), target.display());
        Ok(())
    }

    async fn delete(&self, destination: &str) -> StorageResult<()> {
        let target = self.resolve(destination)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => {
                debug!("Deleted {}", target.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::delete_failed(e.to_string())),
        }
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let base = self.base_path.clone();
        let root = base.join(prefix.trim_start_matches('/'));

        tokio::task::spawn_blocking(move || -> StorageResult<Vec<String>> {
            if !root.exists() {
                return Ok(Vec::new());
            }
            let mut files = Vec::new();
            for entry in WalkDir::new(&root).sort_by_file_name() {
                let entry = entry.map_err(|e| StorageError::ListFailed(e.to_string()))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let relative = entry
                    .path()
                    .strip_prefix(&base)
                    .map_err(|e| StorageError::ListFailed(e.to_string()))?;
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                files.push(key);
            }
            Ok(files)
        })
        .await
        .map_err(|e| StorageError::ListFailed(e.to_string()))?
    }

    fn public_url(&self, destination: &str) -> StorageResult<String> {
        let target = self.resolve(destination)?;
        let absolute = if target.is_absolute() {
            target
        } else {
            std::env::current_dir()?.join(target)
        };
        Ok(format!("file://{}", absolute.to_string_lossy().replace('\\', "/")))
    }

    fn type_name(&self) -> &'static str {
        "local"
    }
}
