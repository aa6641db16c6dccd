//! File relay
//! Path normalization for pluginfile URLs and streaming of upstream bodies

use axum::body::Body;
use axum::http::{header, HeaderName, StatusCode};
use axum::response::Response;

use crate::error::ProxyError;
use crate::proxy::dispatcher::normalize_base_url;

const OCTET_STREAM: &str = "application/octet-stream";

/// Caching behaviour of a relayed file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Session-authenticated fetch, cacheable for an hour
    Shared,
    /// One-time token fetch, never cached
    NoStore,
}

/// Leading slash, and token-authenticated `webservice/pluginfile.php`
/// instead of the cookie-authenticated `pluginfile.php`
pub fn normalize_file_path(path: &str) -> String {
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };

    if path.contains("/pluginfile.php") && !path.contains("/webservice/pluginfile.php") {
        path.replace("/pluginfile.php", "/webservice/pluginfile.php")
    } else {
        path
    }
}

/// Path captured by `/files/*path`. Bare resource paths such as
/// `123/mod_resource/content/1/a.pdf` are placed under the pluginfile script.
pub fn expand_session_path(path: &str) -> String {
    let path = path.trim_start_matches('/');
    let bare = !path.ends_with(".php")
        && !path.contains("/pluginfile.php")
        && !path.starts_with("pluginfile.php")
        && !path.starts_with("webservice/pluginfile.php")
        && !path.contains("/webservice/");

    if bare {
        normalize_file_path(&format!("webservice/pluginfile.php/{}", path))
    } else {
        normalize_file_path(path)
    }
}

pub fn file_url(base_url: &str, path: &str) -> String {
    format!("{}{}", normalize_base_url(base_url), normalize_file_path(path))
}

/// Upstream content type unless missing or generic, then the extension
pub fn guess_content_type(path: &str, upstream: Option<&str>) -> String {
    if let Some(ct) = upstream.map(str::trim) {
        if !ct.is_empty() && !ct.starts_with(OCTET_STREAM) {
            return ct.to_string();
        }
    }

    let file_name = path.rsplit('/').next().unwrap_or(path);
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "ppt" => "application/vnd.ms-powerpoint",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "odt" => "application/vnd.oasis.opendocument.text",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "text/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "zip" => "application/zip",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "ico" => "image/vnd.microsoft.icon",
        "mp3" => "audio/mpeg",
        "wav" => "audio/x-wav",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        _ => OCTET_STREAM,
    }
    .to_string()
}

/// Stream an upstream file back to the client
pub fn relay_response(
    upstream: reqwest::Response,
    path: &str,
    policy: CachePolicy,
) -> Result<Response, ProxyError> {
    let upstream_headers = upstream.headers().clone();
    let upstream_ct = upstream_headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());

    let content_type = guess_content_type(path, upstream_ct);

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::X_CONTENT_TYPE_OPTIONS, "nosniff");

    let forwarded: Vec<HeaderName> = match policy {
        CachePolicy::Shared => {
            builder = builder.header(header::CACHE_CONTROL, "public, max-age=3600");
            vec![header::CONTENT_LENGTH, header::LAST_MODIFIED, header::ETAG]
        }
        CachePolicy::NoStore => {
            builder = builder
                .header(header::CACHE_CONTROL, "no-store, no-cache, must-revalidate")
                .header(header::PRAGMA, "no-cache");
            vec![header::CONTENT_LENGTH, header::CONTENT_DISPOSITION]
        }
    };

    for name in forwarded {
        if let Some(value) = upstream_headers.get(&name).filter(|v| !v.is_empty()) {
            builder = builder.header(name, value.clone());
        }
    }

    builder
        .body(Body::from_stream(upstream.bytes_stream()))
        .map_err(|e| ProxyError::Internal(format!("Failed to build file response: {}", e)))
}
