// ABOUTME: Outbound HTTP client that propagates the trace id and records API segments
// ABOUTME: Wraps reqwest so every call is timed and attached to the active transaction
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 txlog contributors

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use tracing::warn;
use txlog_core::Classification;

use super::http_server::inject;
use crate::application::Application;
use crate::context::Context;
use crate::transaction::{self, CapturedError, Payload, Segment};

/// Buffered response of a traced call
#[derive(Debug, Clone)]
pub struct CapturedResponse {
    /// Response status
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Full body
    pub body: Bytes,
}

impl CapturedResponse {
    /// Decode the body as JSON
    ///
    /// # Errors
    ///
    /// Returns the decode error when the body is not valid JSON for `T`
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// HTTP client bound to an application
#[derive(Debug, Clone)]
pub struct TracedClient {
    client: reqwest::Client,
    app: Application,
}

impl TracedClient {
    /// Client with reqwest defaults
    #[must_use]
    pub fn new(app: Application) -> Self {
        Self::with_client(app, reqwest::Client::new())
    }

    /// Wrap an existing reqwest client
    #[must_use]
    pub const fn with_client(app: Application, client: reqwest::Client) -> Self {
        Self { client, app }
    }

    /// Underlying reqwest client, for building requests
    #[must_use]
    pub const fn client(&self) -> &reqwest::Client {
        &self.client
    }

    fn open_segment(&self, ctx: &Context, request: &reqwest::Request) -> Option<Segment> {
        let txn = transaction::from_context(ctx)?;
        let url = request.url();
        let name = format!(
            "{} {}{}",
            request.method(),
            url.host_str().unwrap_or_default(),
            url.path()
        );
        let segment = txn.add_outbound_api(name, None);
        let body = request
            .body()
            .and_then(reqwest::Body::as_bytes)
            .map_or(Payload::Empty, Payload::from_bytes);
        segment.set_api_request(request.method().as_str(), url.as_str(), body);
        Some(segment)
    }

    /// Send `request` with the trace header of `ctx`
    ///
    /// The response body is left unread; its status is recorded on the
    /// segment.
    ///
    /// # Errors
    ///
    /// Returns the reqwest error when the request cannot be sent
    pub async fn execute(
        &self,
        ctx: &Context,
        mut request: reqwest::Request,
    ) -> Result<reqwest::Response, reqwest::Error> {
        inject(&self.app, ctx, request.headers_mut());
        let segment = self.open_segment(ctx, &request);
        let result = self.client.execute(request).await;
        if let Some(segment) = &segment {
            match &result {
                Ok(response) => record_status(segment, response.status(), Payload::Empty),
                Err(e) => {
                    warn!(error = %e, "outbound request failed");
                    segment.notice_error(e);
                }
            }
            segment.end();
        }
        result
    }

    /// Send `request` and buffer the response body onto the segment
    ///
    /// # Errors
    ///
    /// Returns the reqwest error when sending or reading the body fails
    pub async fn fetch(
        &self,
        ctx: &Context,
        mut request: reqwest::Request,
    ) -> Result<CapturedResponse, reqwest::Error> {
        inject(&self.app, ctx, request.headers_mut());
        let segment = self.open_segment(ctx, &request);
        let result = async {
            let response = self.client.execute(request).await?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.bytes().await?;
            Ok::<_, reqwest::Error>(CapturedResponse {
                status,
                headers,
                body,
            })
        }
        .await;

        if let Some(segment) = &segment {
            match &result {
                Ok(captured) => {
                    record_status(segment, captured.status, Payload::from_bytes(&captured.body));
                }
                Err(e) => {
                    warn!(error = %e, "outbound request failed");
                    segment.notice_error(e);
                }
            }
            segment.end();
        }
        result
    }
}

fn record_status(segment: &Segment, status: StatusCode, body: Payload) {
    segment.set_api_response(status.as_u16(), body);
    if status.is_server_error() {
        segment.classify(
            Classification::Infrastructure,
            Some(CapturedError::new(format!("HTTP {}", status.as_u16()))),
        );
    }
}
