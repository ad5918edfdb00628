//! Blob storage backend over the Azure Blob REST API.
//!
//! Requests are authorized with a SAS token when one is configured. Source
//! downloads fall back to anonymous reads so public containers work without
//! credentials.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use regex::Regex;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};
use url::Url;
use vconv_models::utils::{extension_from_uri, mime_type_for_path};

use crate::backend::{
    fetch_to_file, source_path, validate_key, StorageBackend, DEFAULT_SOURCE_EXTENSION,
};
use crate::error::{StorageError, StorageResult};

pub const DEFAULT_ENDPOINT_SUFFIX: &str = "core.windows.net";
const API_VERSION: &str = "2021-12-02";

#[derive(Clone, Default)]
pub struct AzureBlobSettings {
    pub account: String,
    pub container: String,
    /// Shared access signature, with or without the leading `?`
    pub sas_token: Option<String>,
    pub endpoint_suffix: Option<String>,
    /// Full service URL overriding `https://{account}.blob.{suffix}` (emulators, tests)
    pub endpoint: Option<String>,
}

impl fmt::Debug for AzureBlobSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureBlobSettings")
            .field("account", &self.account)
            .field("container", &self.container)
            .field("sas_token", &self.sas_token.as_ref().map(|_| "<redacted>"))
            .field("endpoint_suffix", &self.endpoint_suffix)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct AzureBlobStorage {
    client: reqwest::Client,
    /// `None` when neither an account nor an endpoint is configured; such a
    /// client can still read public blobs by URL.
    service_url: Option<String>,
    container: String,
    sas_token: Option<String>,
}

impl AzureBlobStorage {
    pub fn new(settings: &AzureBlobSettings) -> StorageResult<Self> {
        let service_url = match settings.endpoint.as_deref().filter(|e| !e.is_empty()) {
            Some(endpoint) => Some(endpoint.trim_end_matches('/').to_string()),
            None if settings.account.is_empty() => None,
            None => {
                let suffix = settings
                    .endpoint_suffix
                    .as_deref()
                    .filter(|s| !s.is_empty())
                    .unwrap_or(DEFAULT_ENDPOINT_SUFFIX);
                Some(format!("https://{}.blob.{}", settings.account, suffix))
            }
        };

        let sas_token = settings
            .sas_token
            .as_deref()
            .map(|t| t.trim().trim_start_matches('?').to_string())
            .filter(|t| !t.is_empty());

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| StorageError::config_error(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            service_url,
            container: settings.container.clone(),
            sas_token,
        })
    }

    pub fn has_credentials(&self) -> bool {
        self.sas_token.is_some()
    }

    fn container_url(&self) -> StorageResult<Url> {
        let service_url = self.service_url.as_deref().ok_or_else(|| {
            StorageError::config_error("AZURE_STORAGE_ACCOUNT is required for blob storage")
        })?;
        if self.container.is_empty() {
            return Err(StorageError::config_error(
                "AZURE_STORAGE_CONTAINER is required for blob uploads",
            ));
        }
        Url::parse(&format!("{}/{}", service_url, self.container))
            .map_err(|e| StorageError::InvalidUri(e.to_string()))
    }

    fn blob_url(&self, destination: &str) -> StorageResult<Url> {
        let key = validate_key(destination)?;
        let mut url = self.container_url()?;
        url.path_segments_mut()
            .map_err(|_| StorageError::InvalidUri(destination.to_string()))?
            .extend(key.split('/'));
        Ok(url)
    }

    /// Append the SAS token to `url`'s query string.
    fn authorize(&self, mut url: Url) -> Url {
        if let Some(sas) = &self.sas_token {
            let query = match url.query() {
                Some(existing) if !existing.is_empty() => format!("{}&{}", existing, sas),
                _ => sas.clone(),
            };
            url.set_query(Some(&query));
        }
        url
    }

    fn require_credentials(&self, operation: &str) -> StorageResult<()> {
        if self.sas_token.is_none() {
            return Err(StorageError::config_error(format!(
                "blob {} requires AZURE_STORAGE_SAS_TOKEN",
                operation
            )));
        }
        Ok(())
    }
}

/// Split a blob URL into `(container, blob name)`.
pub fn parse_blob_url(uri: &str) -> StorageResult<(String, String)> {
    let url = Url::parse(uri).map_err(|e| StorageError::InvalidUri(format!("{}: {}", uri, e)))?;
    if url.host_str().is_none() {
        return Err(StorageError::InvalidUri(format!("{}: missing host", uri)));
    }
    let path = url.path().trim_matches('/');
    match path.split_once('/') {
        Some((container, blob)) if !container.is_empty() && !blob.is_empty() => {
            Ok((container.to_string(), blob.to_string()))
        }
        _ => Err(StorageError::InvalidUri(format!(
            "{}: expected /<container>/<blob>",
            uri
        ))),
    }
}

#[async_trait]
impl StorageBackend for AzureBlobStorage {
    async fn download(&self, uri: &str, workspace: &Path) -> StorageResult<PathBuf> {
        let (container, blob) = parse_blob_url(uri)?;
        let ext = extension_from_uri(&blob).unwrap_or_else(|| DEFAULT_SOURCE_EXTENSION.to_string());
        let target = source_path(workspace, &ext);

        debug!(container = %container, blob = %blob, "Downloading blob");

        if self.has_credentials() {
            let public = Url::parse(uri).map_err(|e| StorageError::InvalidUri(e.to_string()))?;
            let authorized = self.authorize(public);
            match fetch_to_file(&self.client, authorized.as_str(), &target).await {
                Ok((bytes, _)) => {
                    info!(blob = %blob, target = %target.display(), bytes, "Downloaded blob");
                    return Ok(target);
                }
                Err(e) => warn!(blob = %blob, "Authenticated blob download failed, trying public access: {}", e),
            }
        }

        let (bytes, _) = fetch_to_file(&self.client, uri, &target).await?;
        info!(blob = %blob, target = %target.display(), bytes, "Downloaded public blob");
        Ok(target)
    }

    async fn upload(&self, local: &Path, destination: &str) -> StorageResult<()> {
        self.require_credentials("upload")?;
        let url = self.authorize(self.blob_url(destination)?);

        let file = tokio::fs::File::open(local).await?;
        let length = file.metadata().await?.len();
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));

        let response = self
            .client
            .put(url)
            .header("x-ms-blob-type", "BlockBlob")
            .header("x-ms-version", API_VERSION)
            .header(reqwest::header::CONTENT_TYPE, mime_type_for_path(local))
            .header(reqwest::header::CONTENT_LENGTH, length)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(StorageError::upload_failed(format!(
                "PUT {} returned {}: {}",
                destination, status, detail
            )));
        }

        debug!("Uploaded {} to blob {}", local.display(), destination);
        Ok(())
    }

    async fn delete(&self, destination: &str) -> StorageResult<()> {
        self.require_credentials("delete")?;
        let url = self.authorize(self.blob_url(destination)?);

        let response = self
            .client
            .delete(url)
            .header("x-ms-version", API_VERSION)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() || status == reqwest::StatusCode::NOT_FOUND {
            debug!("Deleted blob {}", destination);
            return Ok(());
        }
        Err(StorageError::delete_failed(format!(
            "DELETE {} returned {}",
            destination, status
        )))
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.require_credentials("list")?;

        let mut names = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let mut url = self.container_url()?;
            {
                let mut query = url.query_pairs_mut();
                query
                    .append_pair("restype", "container")
                    .append_pair("comp", "list")
                    .append_pair("prefix", prefix.trim_start_matches('/'));
                if let Some(marker) = &marker {
                    query.append_pair("marker", marker);
                }
            }

            let response = self
                .client
                .get(self.authorize(url))
                .header("x-ms-version", API_VERSION)
                .send()
                .await?;
            let status = response.status();
            let body = response.text().await?;
            if !status.is_success() {
                return Err(StorageError::ListFailed(format!(
                    "list returned {}: {}",
                    status, body
                )));
            }

            let page = parse_list_page(&body)?;
            names.extend(page.names);
            match page.next_marker {
                Some(next) => marker = Some(next),
                None => break,
            }
        }

        Ok(names)
    }

    fn public_url(&self, destination: &str) -> StorageResult<String> {
        Ok(self.blob_url(destination)?.to_string())
    }

    fn type_name(&self) -> &'static str {
        "azure-blob"
    }
}

struct ListPage {
    names: Vec<String>,
    next_marker: Option<String>,
}

/// Pull blob names and the continuation marker out of a List Blobs response.
fn parse_list_page(xml: &str) -> StorageResult<ListPage> {
    let name_re = Regex::new(r"<Blob>\s*<Name>([^<]*)</Name>")
        .map_err(|e| StorageError::ListFailed(e.to_string()))?;
    let marker_re = Regex::new(r"<NextMarker>([^<]+)</NextMarker>")
        .map_err(|e| StorageError::ListFailed(e.to_string()))?;

    let names = name_re
        .captures_iter(xml)
        .map(|c| unescape_xml(&c[1]))
        .collect();
    let next_marker = marker_re
        .captures(xml)
        .map(|c| unescape_xml(c[1].trim()))
        .filter(|m| !m.is_empty());

    Ok(ListPage { names, next_marker })
}

fn unescape_xml(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(endpoint: &str, sas: Option<&str>) -> AzureBlobSettings {
        AzureBlobSettings {
            account: "acct".into(),
            container: "media".into(),
            sas_token: sas.map(str::to_string),
            endpoint_suffix: None,
            endpoint: Some(endpoint.to_string()),
        }
    }

    #[test]
    fn test_parse_blob_url() {
        let (container, blob) =
            parse_blob_url("https://acct.blob.core.windows.net/uploads/2024/in.mp4").unwrap();
        assert_eq!(container, "uploads");
        assert_eq!(blob, "2024/in.mp4");
        assert!(parse_blob_url("https://acct.blob.core.windows.net/only-container").is_err());
    }

    #[test]
    fn test_public_url_uses_account_host() {
        let storage = AzureBlobStorage::new(&AzureBlobSettings {
            account: "acct".into(),
            container: "out".into(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(
            storage.public_url("job/hls/master.m3u8").unwrap(),
            "https://acct.blob.core.windows.net/out/job/hls/master.m3u8"
        );
    }

    #[test]
    fn test_settings_debug_redacts_token() {
        let rendered = format!("{:?}", settings("http://x", Some("sig=secret")));
        assert!(!rendered.contains("secret"));
    }

    #[test]
    fn test_parse_list_page() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?>
            <EnumerationResults ContainerName="media">
              <Blobs>
                <Blob><Name>job/a&amp;b.ts</Name><Properties/></Blob>
                <Blob><Name>job/master.m3u8</Name></Blob>
              </Blobs>
              <NextMarker>page-2</NextMarker>
            </EnumerationResults>"#;
        let page = parse_list_page(xml).unwrap();
        assert_eq!(page.names, vec!["job/a&b.ts", "job/master.m3u8"]);
        assert_eq!(page.next_marker.as_deref(), Some("page-2"));

        let last = parse_list_page("<EnumerationResults><Blobs/><NextMarker /></EnumerationResults>").unwrap();
        assert!(last.next_marker.is_none());
    }

    #[tokio::test]
    async fn test_download_falls_back_to_public_access() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/uploads/in.mov"))
            .and(query_param("sig", "abc"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/uploads/in.mov"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"public".to_vec()))
            .mount(&server)
            .await;

        let storage = AzureBlobStorage::new(&settings(&server.uri(), Some("?sv=1&sig=abc"))).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = storage
            .download(&format!("{}/uploads/in.mov", server.uri()), dir.path())
            .await
            .unwrap();

        assert_eq!(path, dir.path().join("source.mov"));
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"public");
    }

    #[tokio::test]
    async fn test_upload_puts_block_blob() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/media/job-1/hls/master.m3u8"))
            .and(header("x-ms-blob-type", "BlockBlob"))
            .and(header("content-type", "application/vnd.apple.mpegurl"))
            .and(query_param("sig", "abc"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("master.m3u8");
        tokio::fs::write(&file, b"#EXTM3U\n").await.unwrap();

        let storage = AzureBlobStorage::new(&settings(&server.uri(), Some("sig=abc"))).unwrap();
        storage.upload(&file, "job-1/hls/master.m3u8").await.unwrap();
    }

    #[tokio::test]
    async fn test_upload_without_credentials_is_a_config_error() {
        let storage = AzureBlobStorage::new(&settings("http://127.0.0.1:9", None)).unwrap();
        let err = storage
            .upload(Path::new("/tmp/none.mp4"), "x.mp4")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::ConfigError(_)));
    }

    #[tokio::test]
    async fn test_list_follows_markers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/media"))
            .and(query_param("comp", "list"))
            .and(query_param("marker", "m2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<EnumerationResults><Blobs><Blob><Name>job/b.ts</Name></Blob></Blobs><NextMarker/></EnumerationResults>",
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/media"))
            .and(query_param("comp", "list"))
            .and(query_param("prefix", "job"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<EnumerationResults><Blobs><Blob><Name>job/a.ts</Name></Blob></Blobs><NextMarker>m2</NextMarker></EnumerationResults>",
            ))
            .mount(&server)
            .await;

        let storage = AzureBlobStorage::new(&settings(&server.uri(), Some("sig=abc"))).unwrap();
        let names = storage.list("job").await.unwrap();
        assert_eq!(names, vec!["job/a.ts", "job/b.ts"]);
    }
}
