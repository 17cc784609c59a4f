// ABOUTME: JSON error envelope and framework error codes for HTTP failures
// ABOUTME: Maps pipeline failures to status codes and the conventional envelope shape
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 txlog contributors

//! # Error envelope
//!
//! Every error written by the HTTP pipeline is JSON. Framework-generated errors
//! and legacy custom errors share one envelope:
//!
//! ```json
//! {"status": false, "code": "500", "message": {"title": "...", "desc": "..."}, "data": null}
//! ```

use serde::{Deserialize, Serialize};

/// Error codes produced by the framework itself (not by user handlers)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Request body could not be decoded
    BadRequest,
    /// Request path resolves outside the served root
    InvalidPath,
    /// Resource exists but may not be served
    Forbidden,
    /// No route or file matched
    NotFound,
    /// Route exists for a different method
    MethodNotAllowed,
    /// Upload exceeded the configured size
    PayloadTooLarge,
    /// Filesystem or serialization failure
    InternalError,
    /// Handler returned an error of an unrecognized kind
    Unknown,
}

impl ErrorCode {
    /// Get the HTTP status code for this error
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self {
            Self::BadRequest | Self::InvalidPath | Self::PayloadTooLarge => 400,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::MethodNotAllowed => 405,
            Self::InternalError | Self::Unknown => 500,
        }
    }

    /// Short title placed in the envelope
    #[must_use]
    pub const fn title(self) -> &'static str {
        match self {
            Self::BadRequest | Self::InvalidPath | Self::PayloadTooLarge => "Bad Request",
            Self::Forbidden => "Forbidden",
            Self::NotFound => "Not Found",
            Self::MethodNotAllowed => "Method Not Allowed",
            Self::InternalError | Self::Unknown => "Internal Server Error",
        }
    }

    /// Get a user-friendly description of this error
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::BadRequest => "invalid request body",
            Self::InvalidPath => "invalid file path",
            Self::Forbidden => "directory listing is not allowed",
            Self::NotFound => "the requested resource was not found",
            Self::MethodNotAllowed => "method not allowed for this resource",
            Self::PayloadTooLarge => "request body too large",
            Self::InternalError => "an internal server error occurred",
            Self::Unknown => "unknown error",
        }
    }
}

/// Title and description pair nested in the envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Short title
    pub title: String,
    /// Longer description
    pub desc: String,
}

/// Conventional JSON error body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Always `false` for errors
    pub status: bool,
    /// Error code as a string (HTTP status for framework errors)
    pub code: String,
    /// Title and description
    pub message: ErrorMessage,
    /// Always `null` for errors
    pub data: serde_json::Value,
}

impl ErrorEnvelope {
    /// Build an envelope from explicit parts
    #[must_use]
    pub fn new(code: impl Into<String>, title: impl Into<String>, desc: impl Into<String>) -> Self {
        Self {
            status: false,
            code: code.into(),
            message: ErrorMessage {
                title: title.into(),
                desc: desc.into(),
            },
            data: serde_json::Value::Null,
        }
    }

    /// Envelope for a framework error code
    #[must_use]
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code.http_status().to_string(), code.title(), code.description())
    }

    /// Envelope for a framework error code with a custom description
    #[must_use]
    pub fn with_description(code: ErrorCode, desc: impl Into<String>) -> Self {
        Self::new(code.http_status().to_string(), code.title(), desc)
    }

    /// Serialize to bytes; the envelope only contains strings so this cannot fail
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_else(|_| b"{\"status\":false}".to_vec())
    }
}

#[cfg(feature = "http-response")]
impl axum::response::IntoResponse for ErrorEnvelope {
    fn into_response(self) -> axum::response::Response {
        let status = self
            .code
            .parse::<u16>()
            .ok()
            .and_then(|code| http::StatusCode::from_u16(code).ok())
            .unwrap_or(http::StatusCode::INTERNAL_SERVER_ERROR);
        (status, axum::Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_http_status() {
        assert_eq!(ErrorCode::BadRequest.http_status(), 400);
        assert_eq!(ErrorCode::Forbidden.http_status(), 403);
        assert_eq!(ErrorCode::NotFound.http_status(), 404);
        assert_eq!(ErrorCode::MethodNotAllowed.http_status(), 405);
        assert_eq!(ErrorCode::Unknown.http_status(), 500);
    }

    #[test]
    fn test_envelope_serialization_shape() {
        let envelope = ErrorEnvelope::from_code(ErrorCode::Unknown);
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "status": false,
                "code": "500",
                "message": {"title": "Internal Server Error", "desc": "unknown error"},
                "data": null
            })
        );
    }
}
