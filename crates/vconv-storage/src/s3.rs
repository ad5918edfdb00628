//! S3-compatible object storage backend.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use url::Url;
use vconv_models::utils::{extension_from_uri, mime_type_for_path};

use crate::backend::{
    fetch_to_file, source_path, validate_key, StorageBackend, DEFAULT_SOURCE_EXTENSION,
};
use crate::error::{StorageError, StorageResult};

pub const DEFAULT_REGION: &str = "us-east-1";

#[derive(Clone, Default)]
pub struct S3Settings {
    /// Output bucket; sources name their own bucket in the URI
    pub bucket: String,
    pub region: Option<String>,
    /// Custom S3 API endpoint (MinIO, R2, tests); enables path-style addressing
    pub endpoint_url: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Base URL published for uploaded objects (CDN in front of the bucket)
    pub public_base_url: Option<String>,
}

impl S3Settings {
    pub fn region(&self) -> &str {
        self.region
            .as_deref()
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_REGION)
    }
}

impl fmt::Debug for S3Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Settings")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint_url", &self.endpoint_url)
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .field("public_base_url", &self.public_base_url)
            .finish()
    }
}

#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    http: reqwest::Client,
    bucket: String,
    region: String,
    endpoint_url: Option<String>,
    public_base_url: Option<String>,
}

impl S3Storage {
    /// Build a client from static keys when both are set, otherwise from the
    /// default AWS credential chain.
    pub async fn new(settings: &S3Settings) -> StorageResult<Self> {
        let region = settings.region().to_string();
        let endpoint_url = settings
            .endpoint_url
            .as_deref()
            .filter(|e| !e.is_empty())
            .map(|e| e.trim_end_matches('/').to_string());

        let static_keys = match (&settings.access_key_id, &settings.secret_access_key) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => {
                Some(Credentials::new(id, secret, None, None, "vconv-static"))
            }
            _ => None,
        };

        let mut builder = match static_keys {
            Some(credentials) => Builder::new()
                .behavior_version(BehaviorVersion::latest())
                .region(Region::new(region.clone()))
                .credentials_provider(credentials),
            None => {
                let shared = aws_config::defaults(BehaviorVersion::latest())
                    .region(Region::new(region.clone()))
                    .load()
                    .await;
                Builder::from(&shared)
            }
        };
        if let Some(endpoint) = &endpoint_url {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        let client = Client::from_conf(builder.build());

        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| StorageError::config_error(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            http,
            bucket: settings.bucket.clone(),
            region,
            endpoint_url,
            public_base_url: settings
                .public_base_url
                .as_deref()
                .filter(|u| !u.is_empty())
                .map(|u| u.trim_end_matches('/').to_string()),
        })
    }

    fn require_bucket(&self) -> StorageResult<&str> {
        if self.bucket.is_empty() {
            return Err(StorageError::config_error(
                "S3_BUCKET is required for S3 output storage",
            ));
        }
        Ok(&self.bucket)
    }

    /// Anonymous URL for `bucket/key`.
    fn object_url(&self, bucket: &str, key: &str) -> String {
        match &self.endpoint_url {
            Some(endpoint) => format!("{}/{}/{}", endpoint, bucket, key),
            None => format!("https://{}.s3.{}.amazonaws.com/{}", bucket, self.region, key),
        }
    }

    async fn get_object_to_file(&self, bucket: &str, key: &str, target: &Path) -> StorageResult<u64> {
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().map(|s| s.is_no_such_key()).unwrap_or(false) {
                    StorageError::not_found(format!("s3://{}/{}", bucket, key))
                } else {
                    StorageError::AwsSdk(e.to_string())
                }
            })?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(target).await?;
        let mut body = response.body;
        let mut written = 0u64;
        while let Some(chunk) = body
            .try_next()
            .await
            .map_err(|e| StorageError::download_failed(e.to_string()))?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }
}

/// Split an S3 URI into `(bucket, key)`.
///
/// Accepts `s3://bucket/key`, virtual-hosted
/// `https://bucket.s3.region.amazonaws.com/key` and path-style
/// `https://s3.region.amazonaws.com/bucket/key`.
pub fn parse_s3_uri(uri: &str) -> StorageResult<(String, String)> {
    let invalid = |why: &str| StorageError::InvalidUri(format!("{}: {}", uri, why));

    if let Some(rest) = uri.strip_prefix("s3://") {
        return match rest.split_once('/') {
            Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => {
                Ok((bucket.to_string(), key.to_string()))
            }
            _ => Err(invalid("expected s3://<bucket>/<key>")),
        };
    }

    let url = Url::parse(uri).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("unsupported scheme"));
    }
    let host = url.host_str().ok_or_else(|| invalid("missing host"))?;
    let path = url.path().trim_start_matches('/');

    if host.starts_with("s3.") || host.starts_with("s3-") {
        return match path.split_once('/') {
            Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => {
                Ok((bucket.to_string(), key.to_string()))
            }
            _ => Err(invalid("expected /<bucket>/<key>")),
        };
    }

    let bucket = host
        .find(".s3.")
        .or_else(|| host.find(".s3-"))
        .map(|i| &host[..i])
        .filter(|b| !b.is_empty())
        .ok_or_else(|| invalid("not an S3 host"))?;
    if path.is_empty() {
        return Err(invalid("missing object key"));
    }
    Ok((bucket.to_string(), path.to_string()))
}

#[async_trait]
impl StorageBackend for S3Storage {
    async fn download(&self, uri: &str, workspace: &Path) -> StorageResult<PathBuf> {
        let (bucket, key) = parse_s3_uri(uri)?;
        let ext = extension_from_uri(&key).unwrap_or_else(|| DEFAULT_SOURCE_EXTENSION.to_string());
        let target = source_path(workspace, &ext);

        debug!(bucket = %bucket, key = %key, "Downloading S3 object");

        match self.get_object_to_file(&bucket, &key, &target).await {
            Ok(bytes) => {
                info!(bucket = %bucket, key = %key, bytes, "Downloaded S3 object");
                return Ok(target);
            }
            Err(e) => warn!(bucket = %bucket, key = %key, "Authenticated S3 download failed, trying public access: {}", e),
        }

        let public = if uri.starts_with("s3://") {
            self.object_url(&bucket, &key)
        } else {
            uri.to_string()
        };
        let (bytes, _) = fetch_to_file(&self.http, &public, &target).await?;
        info!(url = %public, bytes, "Downloaded public S3 object");
        Ok(target)
    }

    async fn upload(&self, local: &Path, destination: &str) -> StorageResult<()> {
        let bucket = self.require_bucket()?;
        let key = validate_key(destination)?;

        let body = ByteStream::from_path(local)
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .content_type(mime_type_for_path(local))
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        debug!("Uploaded {} to s3://{}/{}", local.display(), bucket, key);
        Ok(())
    }

    async fn delete(&self, destination: &str) -> StorageResult<()> {
        let bucket = self.require_bucket()?;
        let key = validate_key(destination)?;

        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::delete_failed(e.to_string()))?;

        debug!("Deleted s3://{}/{}", bucket, key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let bucket = self.require_bucket()?;
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix.trim_start_matches('/'));

            if let Some(token) = continuation_token {
                request = request.continuation_token(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| StorageError::ListFailed(e.to_string()))?;

            keys.extend(response.contents().iter().filter_map(|o| o.key().map(str::to_string)));

            if response.is_truncated() == Some(true) {
                continuation_token = response.next_continuation_token;
            } else {
                break;
            }
        }

        Ok(keys)
    }

    fn public_url(&self, destination: &str) -> StorageResult<String> {
        let key = validate_key(destination)?;
        if let Some(base) = &self.public_base_url {
            return Ok(format!("{}/{}", base, key));
        }
        Ok(self.object_url(self.require_bucket()?, key))
    }

    fn type_name(&self) -> &'static str {
        "s3"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn static_settings(endpoint: Option<String>) -> S3Settings {
        S3Settings {
            bucket: "renditions".into(),
            region: Some("eu-west-1".into()),
            endpoint_url: endpoint,
            access_key_id: Some("AKIDEXAMPLE".into()),
            secret_access_key: Some("secret".into()),
            public_base_url: None,
        }
    }

    #[test]
    fn test_parse_s3_uri_forms() {
        assert_eq!(
            parse_s3_uri("s3://media/in/clip.mp4").unwrap(),
            ("media".to_string(), "in/clip.mp4".to_string())
        );
        assert_eq!(
            parse_s3_uri("https://media.s3.us-west-2.amazonaws.com/in/clip.mp4").unwrap(),
            ("media".to_string(), "in/clip.mp4".to_string())
        );
        assert_eq!(
            parse_s3_uri("https://s3.us-west-2.amazonaws.com/media/in/clip.mp4").unwrap(),
            ("media".to_string(), "in/clip.mp4".to_string())
        );
        assert!(parse_s3_uri("s3://media").is_err());
        assert!(parse_s3_uri("https://example.com/in/clip.mp4").is_err());
    }

    #[test]
    fn test_settings_debug_redacts_secret() {
        let rendered = format!("{:?}", static_settings(None));
        assert!(!rendered.contains("\"secret\""));
        assert!(rendered.contains("<redacted>"));
    }

    #[tokio::test]
    async fn test_public_url_forms() {
        let storage = S3Storage::new(&static_settings(None)).await.unwrap();
        assert_eq!(
            storage.public_url("job/hls/master.m3u8").unwrap(),
            "https://renditions.s3.eu-west-1.amazonaws.com/job/hls/master.m3u8"
        );

        let mut settings = static_settings(None);
        settings.public_base_url = Some("https://cdn.example.com/".into());
        let storage = S3Storage::new(&settings).await.unwrap();
        assert_eq!(
            storage.public_url("job/a.mp4").unwrap(),
            "https://cdn.example.com/job/a.mp4"
        );
    }

    #[tokio::test]
    async fn test_download_falls_back_to_anonymous_get() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/media/in/clip.mov"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/media/in/clip.mov"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"anon".to_vec()))
            .mount(&server)
            .await;

        let storage = S3Storage::new(&static_settings(Some(server.uri()))).await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = storage
            .download("s3://media/in/clip.mov", dir.path())
            .await
            .unwrap();

        assert_eq!(path, dir.path().join("source.mov"));
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"anon");
    }
}
