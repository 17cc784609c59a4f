// ABOUTME: Read-only file endpoint serving a directory tree under a route prefix
// ABOUTME: Rejects traversal, sets content type and cache headers, answers conditional GETs
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 txlog contributors

use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::Request;
use axum::response::Response;
use chrono::{DateTime, Utc};
use http::header::{
    CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH,
    LAST_MODIFIED,
};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use tracing::{debug, error};
use txlog_core::constants::http::STATIC_CACHE_CONTROL;
use txlog_core::ErrorCode;

use super::handler::{method_not_allowed, request_context, Endpoint};
use super::params::PathParams;
use super::reply::error_response;
use crate::transaction::{self, Transaction};

/// Path parameter the mount pattern captures
pub(crate) const FILEPATH_PARAM: &str = "filepath";

const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Serves files below `root`
#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
    method: Method,
}

impl StaticFiles {
    /// Serve the tree rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            method: Method::GET,
        }
    }

    /// Directory being served
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `relative` below the root, refusing anything that could escape it
    fn resolve(&self, relative: &str) -> Option<PathBuf> {
        if relative.contains('\\') || relative.contains('\0') {
            return None;
        }
        let mut path = self.root.clone();
        for segment in relative.split('/') {
            match segment {
                "" | "." => {}
                ".." => return None,
                segment => path.push(segment),
            }
        }
        Some(path)
    }
}

/// MIME type by file extension
fn content_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("webp") => "image/webp",
        Some("ico") => "image/x-icon",
        Some("bmp") => "image/bmp",
        Some("tif" | "tiff") => "image/tiff",
        _ => "application/octet-stream",
    }
}

fn entity_tag(size: u64, modified: SystemTime) -> String {
    let nanos = modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("\"{size:x}-{nanos:x}\"")
}

fn not_modified(headers: &HeaderMap, etag: &str, modified: DateTime<Utc>) -> bool {
    if let Some(candidates) = headers.get(IF_NONE_MATCH).and_then(|v| v.to_str().ok()) {
        return candidates
            .split(',')
            .map(str::trim)
            .any(|candidate| candidate == "*" || candidate.trim_start_matches("W/") == etag);
    }
    headers
        .get(IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok())
        .and_then(|since| DateTime::parse_from_rfc2822(since).ok())
        .is_some_and(|since| modified.timestamp() <= since.timestamp())
}

fn fail(txn: Option<&Transaction>, code: ErrorCode) -> Response {
    if let Some(txn) = txn {
        txn.mark_business_error();
    }
    error_response(code)
}

fn io_failure(txn: Option<&Transaction>, path: &Path, err: &io::Error) -> Response {
    if err.kind() == io::ErrorKind::NotFound {
        return fail(txn, ErrorCode::NotFound);
    }
    error!(path = %path.display(), error = %err, "failed to read static file");
    if let Some(txn) = txn {
        txn.notice_error(err);
    }
    error_response(ErrorCode::InternalError)
}

#[async_trait]
impl Endpoint for StaticFiles {
    fn method(&self) -> &Method {
        &self.method
    }

    async fn call(&self, request: Request) -> Response {
        let (parts, _body) = request.into_parts();
        let txn = transaction::from_context(&request_context(&parts));
        if parts.method != self.method {
            return method_not_allowed(txn.as_ref());
        }

        let relative = parts
            .extensions
            .get::<PathParams>()
            .and_then(|params| params.get(FILEPATH_PARAM))
            .unwrap_or_default();
        let Some(path) = self.resolve(relative) else {
            debug!(path = relative, "rejected static file path");
            return fail(txn.as_ref(), ErrorCode::InvalidPath);
        };

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) => return io_failure(txn.as_ref(), &path, &e),
        };
        if metadata.is_dir() {
            return fail(txn.as_ref(), ErrorCode::Forbidden);
        }

        let modified_at = metadata.modified().unwrap_or(UNIX_EPOCH);
        let modified: DateTime<Utc> = modified_at.into();
        let etag = entity_tag(metadata.len(), modified_at);
        let last_modified = modified.format(HTTP_DATE_FORMAT).to_string();

        let mut response = if not_modified(&parts.headers, &etag, modified) {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::NOT_MODIFIED;
            response
        } else {
            let contents = match tokio::fs::read(&path).await {
                Ok(contents) => contents,
                Err(e) => return io_failure(txn.as_ref(), &path, &e),
            };
            let mut response = Response::new(Body::from(contents));
            let headers = response.headers_mut();
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type(&path)));
            headers.insert(CONTENT_LENGTH, HeaderValue::from(metadata.len()));
            response
        };

        let headers = response.headers_mut();
        headers.insert(CACHE_CONTROL, HeaderValue::from_static(STATIC_CACHE_CONTROL));
        if let Ok(value) = HeaderValue::from_str(&etag) {
            headers.insert(ETAG, value);
        }
        if let Ok(value) = HeaderValue::from_str(&last_modified) {
            headers.insert(LAST_MODIFIED, value);
        }
        response
    }
}
