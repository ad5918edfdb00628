//! Stat, hash and classify produced files.

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use vconv_models::utils::mime_type_for_path;
use vconv_models::OutputFile;

use crate::error::{MediaError, MediaResult};

const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Lowercase hex SHA-256 of the whole file.
pub async fn sha256_file(path: impl AsRef<Path>) -> MediaResult<String> {
    let mut file = tokio::fs::File::open(path.as_ref()).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BUFFER_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

pub async fn finalize_file(path: impl AsRef<Path>) -> MediaResult<OutputFile> {
    let path = path.as_ref();
    let metadata = tokio::fs::metadata(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => MediaError::FileNotFound(path.to_path_buf()),
        _ => MediaError::Io(e),
    })?;

    Ok(OutputFile {
        path: path.to_path_buf(),
        size: metadata.len(),
        checksum: sha256_file(path).await?,
        mime_type: mime_type_for_path(path).to_string(),
    })
}
