// ABOUTME: Handler outcomes: success replies and the closed set of handler errors
// ABOUTME: Serializes outcomes to JSON responses and classifies the active transaction
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 txlog contributors

use std::fmt;

use axum::body::Body;
use axum::response::Response;
use http::{header, HeaderValue, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, warn};
use txlog_core::constants::http::CONTENT_TYPE_JSON;
use txlog_core::{Classification, ErrorCode, ErrorEnvelope};

use crate::transaction::{CapturedError, Payload, Transaction};

/// Successful handler outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply<T> {
    /// 200 with `T` as JSON
    Ok(T),
    /// Explicit status with `T` as JSON
    WithStatus(StatusCode, T),
    /// 204 without a body
    NoContent,
}

impl<T> Reply<T> {
    /// 200 with `value`
    pub const fn ok(value: T) -> Self {
        Self::Ok(value)
    }

    /// 201 with `value`
    pub const fn created(value: T) -> Self {
        Self::WithStatus(StatusCode::CREATED, value)
    }

    /// Status of the response this reply produces
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Ok(_) => StatusCode::OK,
            Self::WithStatus(status, _) => *status,
            Self::NoContent => StatusCode::NO_CONTENT,
        }
    }
}

/// Error whose body is written verbatim as JSON
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseError {
    status: StatusCode,
    body: Value,
}

impl ResponseError {
    /// Error with any serializable body
    pub fn new<T: Serialize + ?Sized>(status: StatusCode, body: &T) -> Self {
        let body = serde_json::to_value(body).unwrap_or_else(|e| {
            Value::String(format!("<unserializable error body: {e}>"))
        });
        Self { status, body }
    }

    /// Response status
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Body written to the client
    #[must_use]
    pub const fn body(&self) -> &Value {
        &self.body
    }
}

impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "response error {}: {}", self.status.as_u16(), self.body)
    }
}

impl std::error::Error for ResponseError {}

/// Error written as the conventional envelope from code, title and description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomError {
    /// Response status
    pub status: StatusCode,
    /// Application error code
    pub code: String,
    /// Short title
    pub title: String,
    /// Longer description
    pub desc: String,
}

impl CustomError {
    /// Build a custom error
    pub fn new(
        status: StatusCode,
        code: impl Into<String>,
        title: impl Into<String>,
        desc: impl Into<String>,
    ) -> Self {
        Self {
            status,
            code: code.into(),
            title: title.into(),
            desc: desc.into(),
        }
    }

    /// Envelope written to the client
    #[must_use]
    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope::new(self.code.clone(), self.title.clone(), self.desc.clone())
    }
}

impl fmt::Display for CustomError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.code, self.title, self.desc)
    }
}

impl std::error::Error for CustomError {}

/// Failure returned by a handler
#[derive(Debug)]
pub enum HandlerError {
    /// Status plus a body written verbatim
    Response(ResponseError),
    /// Status plus the conventional envelope
    Custom(CustomError),
    /// Anything else; answered with 500 and a canned envelope
    Unknown(anyhow::Error),
}

impl HandlerError {
    /// Shorthand for [`HandlerError::Response`]
    pub fn response<T: Serialize + ?Sized>(status: StatusCode, body: &T) -> Self {
        Self::Response(ResponseError::new(status, body))
    }

    /// Shorthand for [`HandlerError::Unknown`]
    pub fn unknown<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Unknown(anyhow::Error::new(error))
    }

    /// Status of the response this error produces
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Response(error) => error.status,
            Self::Custom(error) => error.status,
            Self::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn captured(&self) -> CapturedError {
        match self {
            Self::Response(error) => {
                CapturedError::new(error.to_string()).with_payload(error.body.clone())
            }
            Self::Custom(error) => CapturedError::from_error(error),
            Self::Unknown(error) => CapturedError::from_anyhow(error),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Response(error) => error.fmt(f),
            Self::Custom(error) => error.fmt(f),
            Self::Unknown(error) => write!(f, "unknown error: {error}"),
        }
    }
}

impl From<ResponseError> for HandlerError {
    fn from(error: ResponseError) -> Self {
        Self::Response(error)
    }
}

impl From<CustomError> for HandlerError {
    fn from(error: CustomError) -> Self {
        Self::Custom(error)
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(error: anyhow::Error) -> Self {
        Self::Unknown(error)
    }
}

/// JSON response with the given status and body bytes
pub(crate) fn json_response(status: StatusCode, body: Vec<u8>) -> Response {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(CONTENT_TYPE_JSON),
    );
    response
}

/// Envelope response for a framework error code
pub(crate) fn error_response(code: ErrorCode) -> Response {
    envelope_response(
        StatusCode::from_u16(code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        &ErrorEnvelope::from_code(code),
    )
}

pub(crate) fn envelope_response(status: StatusCode, envelope: &ErrorEnvelope) -> Response {
    json_response(status, envelope.to_bytes())
}

fn empty_response(status: StatusCode) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}

/// Turn a handler outcome into a response, classifying `txn` on failure
pub(crate) fn write_outcome<T: Serialize>(
    outcome: Result<Reply<T>, HandlerError>,
    txn: Option<&Transaction>,
) -> Response {
    match outcome {
        Ok(reply) => write_reply(reply, txn),
        Err(error) => write_error(error, txn),
    }
}

fn write_reply<T: Serialize>(reply: Reply<T>, txn: Option<&Transaction>) -> Response {
    let status = reply.status();
    let value = match reply {
        Reply::Ok(value) | Reply::WithStatus(_, value) => value,
        Reply::NoContent => return empty_response(StatusCode::NO_CONTENT),
    };
    match serde_json::to_vec(&value) {
        Ok(body) if body == b"null" => empty_response(StatusCode::NO_CONTENT),
        Ok(body) => json_response(status, body),
        Err(e) => {
            error!(error = %e, "failed to serialize handler response");
            if let Some(txn) = txn {
                txn.notice_internal(format!("failed to serialize response: {e}"));
            }
            error_response(ErrorCode::InternalError)
        }
    }
}

fn write_error(error: HandlerError, txn: Option<&Transaction>) -> Response {
    let status = error.status();
    if let Some(txn) = txn {
        let classification = if status.is_server_error() || matches!(error, HandlerError::Unknown(_)) {
            Classification::Infrastructure
        } else {
            Classification::Business
        };
        txn.classify(classification, Some(error.captured()));
    }

    match error {
        HandlerError::Response(error) => {
            warn!(status = status.as_u16(), "handler returned response error");
            let body = serde_json::to_vec(&error.body).unwrap_or_else(|_| b"null".to_vec());
            json_response(status, body)
        }
        HandlerError::Custom(error) => {
            warn!(status = status.as_u16(), code = %error.code, "handler returned custom error");
            envelope_response(status, &error.envelope())
        }
        HandlerError::Unknown(error) => {
            error!(error = %error, "handler returned unknown error");
            error_response(ErrorCode::Unknown)
        }
    }
}

/// Body of a buffered JSON response as a transaction payload
pub(crate) fn payload_of(body: &[u8]) -> Payload {
    Payload::from_bytes(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn with_status_writes_status_and_body() {
        let response = write_outcome(Ok(Reply::WithStatus(StatusCode::CREATED, json!({"x": 1}))), None);
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/json"
        );
        assert_eq!(body_json(response).await, json!({"x": 1}));
    }

    #[tokio::test]
    async fn unit_reply_is_no_content() {
        let response = write_outcome(Ok(Reply::Ok(())), None);
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(response.headers().get(header::CONTENT_TYPE).is_none());
    }

    #[tokio::test]
    async fn custom_error_uses_envelope() {
        let error = CustomError::new(StatusCode::CONFLICT, "DUP", "Conflict", "already exists");
        let response = write_outcome::<()>(Err(error.into()), None);
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(
            body_json(response).await,
            json!({"status": false, "code": "DUP", "message": {"title": "Conflict", "desc": "already exists"}, "data": null})
        );
    }

    #[tokio::test]
    async fn unknown_error_is_canned_500() {
        let response = write_outcome::<()>(Err(anyhow::anyhow!("boom").into()), None);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["message"]["desc"], "unknown error");
        assert_eq!(body["code"], "500");
    }
}
