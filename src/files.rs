//! Static file serving for tenant content

use crate::router::{full, HttpResponse};
use hyper::header::{ALLOW, CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use hyper::{Method, Response, StatusCode};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Common content types
pub mod mime {
    pub const HTML: &str = "text/html; charset=utf-8";
    pub const PLAIN: &str = "text/plain; charset=utf-8";
    pub const CSS: &str = "text/css; charset=utf-8";
    pub const JAVASCRIPT: &str = "text/javascript; charset=utf-8";
    pub const JSON: &str = "application/json";
    pub const OCTET_STREAM: &str = "application/octet-stream";

    /// Guess a content type from a file name
    pub fn from_path(path: &str) -> &'static str {
        let ext = path
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "html" | "htm" => HTML,
            "css" => CSS,
            "js" | "mjs" => JAVASCRIPT,
            "json" | "map" => JSON,
            "txt" | "md" => PLAIN,
            "xml" => "application/xml",
            "rss" => "application/rss+xml",
            "atom" => "application/atom+xml",
            "pdf" => "application/pdf",
            "wasm" => "application/wasm",
            "png" => "image/png",
            "jpg" | "jpeg" => "image/jpeg",
            "gif" => "image/gif",
            "webp" => "image/webp",
            "avif" => "image/avif",
            "svg" => "image/svg+xml",
            "ico" => "image/x-icon",
            "mp3" => "audio/mpeg",
            "mp4" => "video/mp4",
            "webm" => "video/webm",
            "woff" => "font/woff",
            "woff2" => "font/woff2",
            "ttf" => "font/ttf",
            "otf" => "font/otf",
            _ => OCTET_STREAM,
        }
    }
}

/// Result of resolving a request path against a serve root
#[derive(Debug, PartialEq, Eq)]
pub enum Resolved {
    File(PathBuf),
    /// A directory requested without a trailing slash
    Redirect(String),
    NotFound,
}

/// Percent-decode a request path. Invalid encodings yield `None`.
pub fn decode_path(path: &str) -> Option<String> {
    urlencoding::decode(path).ok().map(|p| p.into_owned())
}

/// Map a request path to a file under `root`.
///
/// Paths that contain `..` or that escape `root` through symlinks are not found.
pub async fn resolve(request_path: &str, root: &Path) -> Resolved {
    let Some(decoded) = decode_path(request_path) else {
        return Resolved::NotFound;
    };
    if decoded.split('/').any(|segment| segment == "..") {
        return Resolved::NotFound;
    }

    let relative = decoded.trim_start_matches('/');
    let local = root.join(relative);

    let (Ok(canonical), Ok(root_canonical)) = (
        tokio::fs::canonicalize(&local).await,
        tokio::fs::canonicalize(root).await,
    ) else {
        return Resolved::NotFound;
    };
    if !canonical.starts_with(&root_canonical) {
        debug!(path = %request_path, "Rejected path outside serve root");
        return Resolved::NotFound;
    }

    let Ok(metadata) = tokio::fs::metadata(&canonical).await else {
        return Resolved::NotFound;
    };
    if metadata.is_file() {
        return Resolved::File(canonical);
    }
    if metadata.is_dir() {
        if !request_path.ends_with('/') {
            // Relative to the current directory so `//docs` cannot become a
            // protocol-relative location
            let name = request_path.rsplit('/').next().unwrap_or_default();
            return Resolved::Redirect(format!("./{name}/"));
        }
        let index = canonical.join("index.html");
        if tokio::fs::metadata(&index)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
        {
            return Resolved::File(index);
        }
    }
    Resolved::NotFound
}

/// Serve `request_path` from `root`. Only GET and HEAD are allowed.
pub async fn serve(method: &Method, request_path: &str, root: &Path) -> HttpResponse {
    if method != Method::GET && method != Method::HEAD {
        return Response::builder()
            .status(StatusCode::METHOD_NOT_ALLOWED)
            .header(ALLOW, "GET, HEAD")
            .header(CONTENT_TYPE, mime::PLAIN)
            .body(full("405 method not allowed\n"))
            .expect("valid response with static headers");
    }

    match resolve(request_path, root).await {
        Resolved::File(path) => match tokio::fs::read(&path).await {
            Ok(content) => {
                let content_type = mime::from_path(&path.to_string_lossy());
                respond(method, StatusCode::OK, content_type, content)
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Failed to read file");
                not_found()
            }
        },
        Resolved::Redirect(location) => Response::builder()
            .status(StatusCode::MOVED_PERMANENTLY)
            .header(LOCATION, location)
            .body(full(""))
            .unwrap_or_else(|_| not_found()),
        Resolved::NotFound => not_found(),
    }
}

/// Body-less for HEAD, with the length the GET would have returned
pub fn respond(
    method: &Method,
    status: StatusCode,
    content_type: &str,
    content: impl Into<hyper::body::Bytes>,
) -> HttpResponse {
    let content = content.into();
    let length = content.len();
    let body = if method == Method::HEAD {
        full(hyper::body::Bytes::new())
    } else {
        full(content)
    };
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, content_type)
        .header(CONTENT_LENGTH, length)
        .body(body)
        .expect("valid response with StatusCode enum and static headers")
}

pub fn not_found() -> HttpResponse {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header(CONTENT_TYPE, mime::PLAIN)
        .body(full("404 page not found\n"))
        .expect("valid response with StatusCode enum and static headers")
}
