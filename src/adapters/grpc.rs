// ABOUTME: Tower layer opening a transaction per gRPC call over plain http types
// ABOUTME: Reads and echoes the trace id in metadata and classifies by grpc-status
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 txlog contributors

//! gRPC adapter.
//!
//! gRPC servers built on `tower` (tonic among them) accept
//! `http::Request<B>` and return `http::Response<B>`, so the adapter is a
//! plain [`tower::Layer`]. Metadata keys are lowercase header names; the trace
//! header is looked up and echoed in that form.
//!
//! Only `grpc-status` values present in the response headers (trailers-only
//! responses) are classified. Client-caused codes count as business errors,
//! every other non-zero code as infrastructure.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::task::{Context as TaskContext, Poll};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use http::HeaderMap;
use tower::{Layer, Service};
use tracing::error;
use txlog_core::Classification;

use super::http_server::insert_header;
use crate::application::Application;
use crate::context::Context;
use crate::errors::panic_message;
use crate::transaction::{header_pairs, CapturedError, RequestInfo, TransactionKind};

/// `INVALID_ARGUMENT`, `NOT_FOUND`, `ALREADY_EXISTS`, `PERMISSION_DENIED`,
/// `FAILED_PRECONDITION`, `OUT_OF_RANGE`, `UNAUTHENTICATED`
const CLIENT_CODES: [u32; 7] = [3, 5, 6, 7, 9, 11, 16];

fn metadata_key(app: &Application) -> String {
    app.trace_config().header.to_ascii_lowercase()
}

/// Context carrying the trace id found in `metadata`, layered on `base`
#[must_use]
pub fn extract(app: &Application, metadata: &HeaderMap, base: &Context) -> Context {
    let key = metadata_key(app);
    metadata
        .get(key.as_str())
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map_or_else(
            || base.clone(),
            |trace_id| base.with_trace_id(&app.trace_config().key, trace_id),
        )
}

/// Write the trace id of `ctx` into outgoing `metadata`
pub fn inject(app: &Application, ctx: &Context, metadata: &mut HeaderMap) {
    let trace_id = crate::transaction::from_context(ctx)
        .map(|txn| txn.trace_id().to_owned())
        .or_else(|| ctx.trace_id(&app.trace_config().key).map(str::to_owned));
    if let Some(trace_id) = trace_id {
        insert_header(metadata, &metadata_key(app), &trace_id);
    }
}

fn grpc_status(headers: &HeaderMap) -> Option<u32> {
    headers
        .get("grpc-status")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

/// Layer producing [`GrpcTrace`]
#[derive(Debug, Clone)]
pub struct GrpcTraceLayer {
    app: Application,
}

impl GrpcTraceLayer {
    /// Trace calls into `app`
    #[must_use]
    pub const fn new(app: Application) -> Self {
        Self { app }
    }
}

impl<S> Layer<S> for GrpcTraceLayer {
    type Service = GrpcTrace<S>;

    fn layer(&self, inner: S) -> Self::Service {
        GrpcTrace {
            inner,
            app: self.app.clone(),
        }
    }
}

/// Service wrapping each call in a transaction
#[derive(Debug, Clone)]
pub struct GrpcTrace<S> {
    inner: S,
    app: Application,
}

impl<S, ReqBody, ResBody> Service<http::Request<ReqBody>> for GrpcTrace<S>
where
    S: Service<http::Request<ReqBody>, Response = http::Response<ResBody>>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
    S::Error: fmt::Display,
    ReqBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: http::Request<ReqBody>) -> Self::Future {
        let (mut parts, body) = request.into_parts();
        let base = parts
            .extensions
            .get::<Context>()
            .cloned()
            .or_else(Context::current)
            .unwrap_or_default();
        let trace = self.app.trace_config();
        let inherited = if trace.via_header {
            parts
                .headers
                .get(metadata_key(&self.app).as_str())
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned)
        } else {
            base.trace_id(&trace.key).map(str::to_owned)
        };

        let txn = self.app.start_traced(
            inherited.as_deref(),
            parts.uri.path(),
            TransactionKind::Other,
        );
        txn.set_request(RequestInfo::from_parts(&parts));
        let ctx = txn.to_context(&base);
        parts.extensions.insert(ctx.clone());
        let request = http::Request::from_parts(parts, body);

        // The instance that was polled ready handles the call
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let key = metadata_key(&self.app);

        Box::pin(async move {
            let outcome = AssertUnwindSafe(Context::scope(ctx, inner.call(request)))
                .catch_unwind()
                .await;
            let result = match outcome {
                Ok(result) => result,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!(trace_id = %txn.trace_id(), panic = %message, "gRPC handler panicked");
                    txn.notice_internal(format!("panic: {message}"));
                    txn.end();
                    std::panic::resume_unwind(payload);
                }
            };

            match result {
                Ok(mut response) => {
                    match grpc_status(response.headers()) {
                        None | Some(0) => {}
                        Some(code) if CLIENT_CODES.contains(&code) => txn.classify(
                            Classification::Business,
                            Some(CapturedError::new(format!("grpc-status {code}"))),
                        ),
                        Some(code) => txn.classify(
                            Classification::Infrastructure,
                            Some(CapturedError::new(format!("grpc-status {code}"))),
                        ),
                    }
                    insert_header(response.headers_mut(), &key, txn.trace_id());
                    txn.set_response(response.status().as_u16(), header_pairs(response.headers()));
                    txn.end();
                    Ok(response)
                }
                Err(e) => {
                    error!(trace_id = %txn.trace_id(), error = %e, "gRPC service failed");
                    txn.classify(
                        Classification::Infrastructure,
                        Some(CapturedError::new(e.to_string())),
                    );
                    txn.end();
                    Err(e)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::MemorySink;
    use std::convert::Infallible;
    use std::future::{ready, Ready};
    use tower::ServiceExt;

    #[derive(Clone)]
    struct StatusService(&'static str);

    impl Service<http::Request<String>> for StatusService {
        type Response = http::Response<String>;
        type Error = Infallible;
        type Future = Ready<Result<Self::Response, Infallible>>;

        fn poll_ready(&mut self, _cx: &mut TaskContext<'_>) -> Poll<Result<(), Infallible>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _request: http::Request<String>) -> Self::Future {
            ready(Ok(http::Response::builder()
                .header("grpc-status", self.0)
                .body(String::new())
                .unwrap()))
        }
    }

    fn reply_with_status(code: &'static str) -> StatusService {
        StatusService(code)
    }

    #[tokio::test]
    async fn metadata_trace_id_is_inherited_and_echoed() {
        let sink = MemorySink::new();
        let app = Application::builder("grpc")
            .trace_config(crate::application::TraceConfig {
                via_header: true,
                ..Default::default()
            })
            .sink(sink.clone())
            .build();
        let service = GrpcTraceLayer::new(app).layer(reply_with_status("0"));
        let request = http::Request::builder()
            .uri("/pkg.Users/Get")
            .header("x-trace-id", "abc")
            .body(String::new())
            .unwrap();

        let response = service.oneshot(request).await.unwrap();
        assert_eq!(response.headers()["x-trace-id"], "abc");
        let records = sink.transactions();
        assert_eq!(records[0].trace_id, "abc");
        assert_eq!(records[0].name, "/pkg.Users/Get");
        assert_eq!(records[0].kind, TransactionKind::Other);
        assert_eq!(records[0].error_kind, Classification::None);
    }

    #[tokio::test]
    async fn status_codes_classify_transaction() {
        for (code, expected) in [
            ("5", Classification::Business),
            ("14", Classification::Infrastructure),
        ] {
            let sink = MemorySink::new();
            let app = Application::builder("grpc").sink(sink.clone()).build();
            let service = GrpcTraceLayer::new(app).layer(reply_with_status(code));
            let request = http::Request::builder()
                .uri("/pkg.Users/Get")
                .body(String::new())
                .unwrap();
            service.oneshot(request).await.unwrap();
            assert_eq!(sink.transactions()[0].error_kind, expected);
        }
    }

    #[test]
    fn metadata_round_trip() {
        let app = Application::builder("grpc").build();
        let ctx = Context::new().with_trace_id(&app.trace_config().key, "t-1");
        let mut metadata = HeaderMap::new();
        inject(&app, &ctx, &mut metadata);
        assert!(metadata.contains_key("x-trace-id"));
        let back = extract(&app, &metadata, &Context::new());
        assert_eq!(back.trace_id(&app.trace_config().key), Some("t-1"));
    }
}
