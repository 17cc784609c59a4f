// ABOUTME: Axum middleware opening one HTTP transaction per inbound request
// ABOUTME: Resolves the trace id, captures request and response, catches handler panics
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 txlog contributors

//! Inbound HTTP adapter.
//!
//! Install with `axum::middleware::from_fn_with_state(app, trace_request)`.
//! Each request gets a transaction named `"<METHOD> <path>"`. The trace id is
//! taken from the configured header when `via_header` is set, otherwise from
//! the context already attached to the request (or the task-scoped one), and
//! is generated when neither carries one. The response always echoes the trace
//! id in the configured header.

use std::panic::AssertUnwindSafe;

use axum::body::{Body, HttpBody};
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use futures_util::FutureExt;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderName, HeaderValue};
use tracing::{error, warn};
use txlog_core::constants::http::MAX_JSON_BODY_BYTES;
use txlog_core::{Classification, ErrorCode};

use crate::application::Application;
use crate::context::Context;
use crate::errors::panic_message;
use crate::server::error_response;
use crate::transaction::{header_pairs, CapturedError, Payload, RequestInfo, Transaction};

/// Context carrying the trace id found in `headers`, layered on `base`
#[must_use]
pub fn extract(app: &Application, headers: &HeaderMap, base: &Context) -> Context {
    let trace = app.trace_config();
    match header_trace_id(headers, &trace.header) {
        Some(trace_id) => base.with_trace_id(&trace.key, trace_id),
        None => base.clone(),
    }
}

/// Write the trace id of `ctx` into `headers`
pub fn inject(app: &Application, ctx: &Context, headers: &mut HeaderMap) {
    let trace = app.trace_config();
    let trace_id = crate::transaction::from_context(ctx)
        .map(|txn| txn.trace_id().to_owned())
        .or_else(|| ctx.trace_id(&trace.key).map(str::to_owned));
    if let Some(trace_id) = trace_id {
        insert_header(headers, &trace.header, &trace_id);
    }
}

fn header_trace_id(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}

pub(crate) fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) {
    match (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(value),
    ) {
        (Ok(name), Ok(value)) => {
            headers.insert(name, value);
        }
        _ => warn!(header = name, "trace header name or value is not valid HTTP"),
    }
}

fn is_multipart(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.to_ascii_lowercase().starts_with("multipart/"))
}

fn is_textual(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| {
            let value = value.to_ascii_lowercase();
            value.starts_with("application/json") || value.starts_with("text/")
        })
}

/// Textual, bounded and not an event stream: safe to buffer for the record
fn is_capturable(headers: &HeaderMap, body: &Body) -> bool {
    let event_stream = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.to_ascii_lowercase().starts_with("text/event-stream"));
    let bounded = body
        .size_hint()
        .upper()
        .is_some_and(|upper| upper <= MAX_JSON_BODY_BYTES as u64);
    is_textual(headers) && !event_stream && bounded
}

/// Transaction middleware for axum routers
pub async fn trace_request(
    State(app): State<Application>,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();
    let base = parts
        .extensions
        .get::<Context>()
        .cloned()
        .or_else(Context::current)
        .unwrap_or_default();
    let trace = app.trace_config();
    let inherited = if trace.via_header {
        header_trace_id(&parts.headers, &trace.header)
    } else {
        base.trace_id(&trace.key).map(str::to_owned)
    };

    let txn = app.start_http(
        inherited.as_deref(),
        format!("{} {}", parts.method, parts.uri.path()),
    );
    txn.set_request(RequestInfo::from_parts(&parts));

    // Multipart bodies stream through; the upload handler records their fields
    let body = if is_multipart(&parts.headers) {
        body
    } else {
        match axum::body::to_bytes(body, MAX_JSON_BODY_BYTES).await {
            Ok(bytes) => {
                if !bytes.is_empty() {
                    txn.set_request_body(Payload::from_bytes(&bytes));
                }
                Body::from(bytes)
            }
            Err(e) => {
                warn!(trace_id = %txn.trace_id(), error = %e, "failed to read request body");
                txn.mark_business_error();
                return finish(&txn, error_response(ErrorCode::PayloadTooLarge)).await;
            }
        }
    };

    let ctx = txn.to_context(&base);
    parts.extensions.insert(ctx.clone());
    let request = Request::from_parts(parts, body);

    let response = match AssertUnwindSafe(Context::scope(ctx, next.run(request)))
        .catch_unwind()
        .await
    {
        Ok(response) => response,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(trace_id = %txn.trace_id(), panic = %message, "request handler panicked");
            txn.notice_internal(format!("panic: {message}"));
            error_response(ErrorCode::InternalError)
        }
    };
    finish(&txn, response).await
}

/// Record the response on `txn`, echo the trace header and end the transaction
async fn finish(txn: &Transaction, response: Response) -> Response {
    let (mut parts, body) = response.into_parts();
    let status = parts.status;

    let body = if is_capturable(&parts.headers, &body) {
        match axum::body::to_bytes(body, MAX_JSON_BODY_BYTES).await {
            Ok(bytes) => {
                txn.set_response_body(Payload::from_bytes(&bytes));
                Body::from(bytes)
            }
            Err(e) => {
                error!(trace_id = %txn.trace_id(), error = %e, "failed to buffer response body");
                txn.notice_internal(format!("failed to buffer response body: {e}"));
                parts.status = http::StatusCode::INTERNAL_SERVER_ERROR;
                Body::empty()
            }
        }
    } else {
        let length = parts
            .headers
            .get(http::header::CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<usize>().ok())
            .or_else(|| {
                body.size_hint()
                    .exact()
                    .and_then(|exact| usize::try_from(exact).ok())
            })
            .unwrap_or_default();
        if length > 0 {
            txn.set_response_body(Payload::Binary(length));
        }
        body
    };

    if status.is_server_error() && txn.classification() == Classification::None {
        txn.classify(
            Classification::Infrastructure,
            Some(CapturedError::new(format!("HTTP {}", status.as_u16()))),
        );
    }

    insert_header(
        &mut parts.headers,
        &txn.application().trace_config().header,
        txn.trace_id(),
    );
    txn.set_response(parts.status.as_u16(), header_pairs(&parts.headers));
    txn.end();
    Response::from_parts(parts, body)
}
