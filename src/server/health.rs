// ABOUTME: Built-in liveness endpoint answered before routing
// ABOUTME: GET on the configured path returns 200 with an empty body
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 txlog contributors

use axum::body::Body;
use axum::response::Response;
use http::{Method, StatusCode};
use txlog_core::constants::http::DEFAULT_HEALTH_PATH;
use txlog_core::ErrorCode;

use super::reply::error_response;

/// Health check configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheck {
    path: Option<String>,
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self {
            path: Some(DEFAULT_HEALTH_PATH.to_owned()),
        }
    }
}

impl HealthCheck {
    /// Health check served at `path`
    #[must_use]
    pub fn at(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// No health endpoint
    #[must_use]
    pub const fn disabled() -> Self {
        Self { path: None }
    }

    /// Served path, if enabled
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Response for a request to `path`, or `None` when it is not the health path
    pub(crate) fn respond(&self, method: &Method, path: &str) -> Option<Response> {
        if self.path.as_deref() != Some(path) {
            return None;
        }
        if *method != Method::GET {
            return Some(error_response(ErrorCode::MethodNotAllowed));
        }
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::OK;
        Some(response)
    }
}
