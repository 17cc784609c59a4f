// ABOUTME: Multipart upload endpoint persisting file parts to a destination directory
// ABOUTME: Enforces a whole-body size limit and records text fields plus file metadata
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 txlog contributors

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::Request;
use axum::response::Response;
use http::header::CONTENT_TYPE;
use http::Method;
use multer::{Constraints, Multipart, SizeLimit};
use serde::Serialize;
use serde_json::json;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{error, warn};
use txlog_core::constants::http::DEFAULT_MAX_UPLOAD_BYTES;
use txlog_core::ErrorCode;

use super::handler::{enrich_context, method_not_allowed, request_context, Endpoint};
use super::reply::{error_response, write_outcome, HandlerError, Reply};
use crate::context::Context;
use crate::transaction::{self, Payload, Transaction};

/// One file part written to disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadedFile {
    /// Form field the file was sent under
    pub field: String,
    /// Sanitized client filename
    pub filename: String,
    /// Bytes written
    pub size: u64,
    /// Declared content type of the part
    pub content_type: Option<String>,
    /// Location of the stored file
    pub path: PathBuf,
}

/// Files persisted for one request, in arrival order
pub type UploadedFiles = Vec<UploadedFile>;

/// Text fields of a multipart form; names may repeat
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormValues {
    values: Vec<(String, String)>,
}

impl FormValues {
    /// First value of `name`
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Every value of `name` in order
    #[must_use]
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.values
            .iter()
            .filter(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
            .collect()
    }

    /// All name/value pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn push(&mut self, name: String, value: String) {
        self.values.push((name, value));
    }

    fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (name, value) in &self.values {
            match map.get_mut(name) {
                Some(serde_json::Value::Array(existing)) => existing.push(json!(value)),
                Some(existing) => *existing = json!([existing.take(), value]),
                None => {
                    map.insert(name.clone(), json!(value));
                }
            }
        }
        serde_json::Value::Object(map)
    }
}

/// Final path component of a client filename with unsafe characters removed
fn sanitize_filename(raw: &str) -> String {
    let last = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = last
        .chars()
        .filter(|c| !c.is_control() && *c != '/' && *c != '\\')
        .collect();
    match cleaned.trim() {
        "" | "." | ".." => "upload".to_owned(),
        name => name.to_owned(),
    }
}

fn stored_name(filename: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("{nanos}_{filename}")
}

async fn create_file(path: &Path) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o640);
    options.open(path).await
}

enum UploadFailure {
    Parse(multer::Error),
    Write(std::io::Error),
}

struct ParsedForm {
    files: UploadedFiles,
    values: FormValues,
}

/// Handler receiving multipart uploads
///
/// File parts are streamed to `<dir>/<epoch-nanos>_<filename>`; text parts are
/// collected into [`FormValues`]. The user function sees both once the whole
/// body has been consumed.
pub struct UploadHandler<Resp, F> {
    method: Method,
    dir: PathBuf,
    max_size: u64,
    f: F,
    _marker: PhantomData<fn() -> Resp>,
}

impl<Resp, F> UploadHandler<Resp, F> {
    /// Accept uploads on `method`, storing files under `dir`
    pub fn new(method: Method, dir: impl Into<PathBuf>, f: F) -> Self {
        Self {
            method,
            dir: dir.into(),
            max_size: DEFAULT_MAX_UPLOAD_BYTES as u64,
            f,
            _marker: PhantomData,
        }
    }

    /// Limit for the whole multipart body
    #[must_use]
    pub const fn with_max_size(mut self, bytes: u64) -> Self {
        self.max_size = bytes;
        self
    }

    async fn parse(&self, boundary: String, body: Body) -> Result<ParsedForm, UploadFailure> {
        let mut form = ParsedForm {
            files: Vec::new(),
            values: FormValues::default(),
        };
        match self.read_parts(boundary, body, &mut form).await {
            Ok(()) => Ok(form),
            Err(failure) => {
                remove_files(&form.files).await;
                Err(failure)
            }
        }
    }

    async fn read_parts(
        &self,
        boundary: String,
        body: Body,
        form: &mut ParsedForm,
    ) -> Result<(), UploadFailure> {
        let constraints =
            Constraints::new().size_limit(SizeLimit::new().whole_stream(self.max_size));
        let mut multipart =
            Multipart::with_constraints(body.into_data_stream(), boundary, constraints);

        while let Some(mut field) = multipart.next_field().await.map_err(UploadFailure::Parse)? {
            let name = field.name().unwrap_or_default().to_owned();
            let Some(client_name) = field.file_name().map(sanitize_filename) else {
                let value = field.text().await.map_err(UploadFailure::Parse)?;
                form.values.push(name, value);
                continue;
            };

            let path = self.dir.join(stored_name(&client_name));
            let content_type = field.content_type().map(ToString::to_string);
            let mut file = create_file(&path).await.map_err(UploadFailure::Write)?;
            // Registered before copying so a partial file is removed on failure
            form.files.push(UploadedFile {
                field: name,
                filename: client_name,
                size: 0,
                content_type,
                path,
            });
            let mut size = 0_u64;
            while let Some(chunk) = field.chunk().await.map_err(UploadFailure::Parse)? {
                file.write_all(&chunk).await.map_err(UploadFailure::Write)?;
                size += chunk.len() as u64;
            }
            file.flush().await.map_err(UploadFailure::Write)?;
            if let Some(stored) = form.files.last_mut() {
                stored.size = size;
            }
        }
        Ok(())
    }
}

async fn remove_files(files: &[UploadedFile]) {
    for file in files {
        if let Err(e) = tokio::fs::remove_file(&file.path).await {
            warn!(path = %file.path.display(), error = %e, "failed to remove partial upload");
        }
    }
}

impl<Resp, F> fmt::Debug for UploadHandler<Resp, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadHandler")
            .field("method", &self.method)
            .field("dir", &self.dir)
            .field("max_size", &self.max_size)
            .finish_non_exhaustive()
    }
}

fn reject(txn: Option<&Transaction>, code: ErrorCode) -> Response {
    if let Some(txn) = txn {
        txn.mark_business_error();
    }
    error_response(code)
}

#[async_trait]
impl<Resp, F, Fut> Endpoint for UploadHandler<Resp, F>
where
    Resp: Serialize + Send + 'static,
    F: Fn(Context, UploadedFiles, FormValues) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Reply<Resp>, HandlerError>> + Send + 'static,
{
    fn method(&self) -> &Method {
        &self.method
    }

    async fn call(&self, request: Request) -> Response {
        let (parts, body) = request.into_parts();
        let ctx = request_context(&parts);
        let txn = transaction::from_context(&ctx);
        if parts.method != self.method {
            return method_not_allowed(txn.as_ref());
        }

        let boundary = parts
            .headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| multer::parse_boundary(value).ok());
        let Some(boundary) = boundary else {
            warn!("upload request is not multipart/form-data");
            return reject(txn.as_ref(), ErrorCode::BadRequest);
        };

        let form = match self.parse(boundary, body).await {
            Ok(form) => form,
            Err(UploadFailure::Parse(e)) => {
                warn!(error = %e, "failed to parse multipart body");
                let code = if matches!(
                    e,
                    multer::Error::StreamSizeExceeded { .. } | multer::Error::FieldSizeExceeded { .. }
                ) {
                    ErrorCode::PayloadTooLarge
                } else {
                    ErrorCode::BadRequest
                };
                return reject(txn.as_ref(), code);
            }
            Err(UploadFailure::Write(e)) => {
                error!(dir = %self.dir.display(), error = %e, "failed to store uploaded file");
                if let Some(txn) = &txn {
                    txn.notice_error(&e);
                }
                return error_response(ErrorCode::InternalError);
            }
        };

        if let Some(txn) = &txn {
            txn.set_request_body(Payload::Json(json!({
                "fields": form.values.to_json(),
                "files": form.files,
            })));
        }

        let ctx = enrich_context(&ctx, &parts);
        let outcome = Context::scope(ctx.clone(), (self.f)(ctx, form.files, form.values)).await;
        write_outcome(outcome, txn.as_ref())
    }
}
