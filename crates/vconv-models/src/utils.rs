//! MIME type and file extension helpers.

use std::path::Path;

/// MIME type for a container name or extension (without the dot).
pub fn container_mime(container: &str) -> &'static str {
    match container.trim_start_matches('.').to_ascii_lowercase().as_str() {
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "mkv" => "video/x-matroska",
        "m3u8" => "application/vnd.apple.mpegurl",
        "ts" => "video/mp2t",
        _ => "application/octet-stream",
    }
}

/// MIME type for a produced file, from its extension.
pub fn mime_type_for_path(path: &Path) -> &'static str {
    path.extension()
        .and_then(|e| e.to_str())
        .map(container_mime)
        .unwrap_or("application/octet-stream")
}

/// File extension (with dot) for a video `Content-Type` header value.
pub fn extension_for_content_type(content_type: &str) -> Option<&'static str> {
    let essence = content_type.split(';').next().unwrap_or("").trim();
    match essence.to_ascii_lowercase().as_str() {
        "video/mp4" => Some(".mp4"),
        "video/quicktime" => Some(".mov"),
        "video/x-msvideo" => Some(".avi"),
        "video/webm" => Some(".webm"),
        "video/x-matroska" => Some(".mkv"),
        _ => None,
    }
}

/// Extension (with dot) of the last path segment of a URI, ignoring any query
/// string or fragment.
pub fn extension_from_uri(uri: &str) -> Option<String> {
    let path = uri.split(['?', '#']).next().unwrap_or(uri);
    let segment = path.rsplit('/').next().unwrap_or(path);
    let ext = Path::new(segment).extension()?.to_str()?;
    if ext.is_empty() || ext.len() > 5 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(format!(".{}", ext.to_ascii_lowercase()))
}

/// Normalize a checksum declaration (`sha256:<hex>` or bare hex) to lowercase
/// hex. Returns `None` for other algorithms or malformed digests.
pub fn normalize_sha256(declared: &str) -> Option<String> {
    let declared = declared.trim();
    let hex = match declared.split_once(':') {
        Some((algo, hex)) if algo.eq_ignore_ascii_case("sha256") => hex,
        Some(_) => return None,
        None => declared,
    };
    if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(hex.to_ascii_lowercase())
}
