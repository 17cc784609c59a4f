// ABOUTME: CORS middleware answering preflight requests and tagging allowed origins
// ABOUTME: Wraps tower-http's CorsLayer around the rest of the middleware chain
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 txlog contributors

use std::convert::Infallible;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::Request;
use axum::response::Response;
use http::header::{HeaderName, ORIGIN};
use http::{HeaderValue, Method};
use tower::{service_fn, Layer, ServiceExt};
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};

use super::middleware::{Middleware, Next};

/// Cross-Origin Resource Sharing policy
///
/// Preflight requests are answered by the CORS layer with the negotiated
/// headers; the handler never runs. Other requests from an allowed origin get
/// `Access-Control-Allow-Origin` on their response. Requests without an
/// `Origin` header pass through untouched.
///
/// ```
/// use std::time::Duration;
/// use txlog::server::Cors;
///
/// let cors = Cors::new()
///     .allow_origins(["https://app.example.com"])
///     .allow_credentials(true)
///     .max_age(Duration::from_secs(600));
/// # let _ = cors;
/// ```
#[derive(Debug, Clone)]
#[must_use]
pub struct Cors {
    allow_origins: Vec<String>,
    allow_methods: Vec<Method>,
    allow_headers: Vec<String>,
    allow_credentials: bool,
    max_age: Option<Duration>,
    layer: OnceLock<CorsLayer>,
}

impl Default for Cors {
    fn default() -> Self {
        Self {
            allow_origins: vec!["*".to_owned()],
            allow_methods: vec![
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
                Method::PATCH,
            ],
            allow_headers: vec![
                "content-type".to_owned(),
                "authorization".to_owned(),
                "x-requested-with".to_owned(),
                "accept".to_owned(),
                "origin".to_owned(),
            ],
            allow_credentials: false,
            max_age: None,
            layer: OnceLock::new(),
        }
    }
}

impl Cors {
    /// Any origin, common methods and headers, no credentials
    pub fn new() -> Self {
        Self::default()
    }

    /// Policy from a comma-separated origin list; empty or `*` allows any origin
    pub fn from_origin_list(origins: &str) -> Self {
        let parsed: Vec<String> = origins
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_owned)
            .collect();
        if parsed.is_empty() {
            Self::new()
        } else {
            Self::new().allow_origins(parsed)
        }
    }

    /// Replace the allowed origins; `*` allows any
    pub fn allow_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allow_origins = origins.into_iter().map(Into::into).collect();
        self.layer = OnceLock::new();
        self
    }

    /// Replace the allowed methods
    pub fn allow_methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.allow_methods = methods.into_iter().collect();
        self.layer = OnceLock::new();
        self
    }

    /// Replace the allowed request headers; `*` echoes what the client asks for
    pub fn allow_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allow_headers = headers.into_iter().map(Into::into).collect();
        self.layer = OnceLock::new();
        self
    }

    /// Allow cookies and authorization headers on cross-origin requests
    pub fn allow_credentials(mut self, allow: bool) -> Self {
        self.allow_credentials = allow;
        self.layer = OnceLock::new();
        self
    }

    /// How long browsers may cache a preflight answer
    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self.layer = OnceLock::new();
        self
    }

    fn allow_origin(&self) -> AllowOrigin {
        if self.allow_origins.iter().any(|origin| origin == "*") {
            // A literal `*` cannot be combined with credentials
            return if self.allow_credentials {
                AllowOrigin::mirror_request()
            } else {
                AllowOrigin::any()
            };
        }
        let origins: Vec<HeaderValue> = self
            .allow_origins
            .iter()
            .filter_map(|origin| HeaderValue::from_str(origin).ok())
            .collect();
        AllowOrigin::list(origins)
    }

    fn allow_header_names(&self) -> AllowHeaders {
        if self.allow_headers.iter().any(|header| header == "*") {
            return AllowHeaders::mirror_request();
        }
        let names: Vec<HeaderName> = self
            .allow_headers
            .iter()
            .filter_map(|header| HeaderName::from_bytes(header.as_bytes()).ok())
            .collect();
        AllowHeaders::list(names)
    }

    fn layer(&self) -> &CorsLayer {
        self.layer.get_or_init(|| {
            let mut layer = CorsLayer::new()
                .allow_origin(self.allow_origin())
                .allow_methods(self.allow_methods.clone())
                .allow_headers(self.allow_header_names())
                .allow_credentials(self.allow_credentials)
                .vary([ORIGIN]);
            if let Some(max_age) = self.max_age {
                layer = layer.max_age(max_age);
            }
            layer
        })
    }
}

#[async_trait]
impl Middleware for Cors {
    async fn handle(&self, request: Request, next: Next) -> Response {
        if !request.headers().contains_key(ORIGIN) {
            return next.run(request).await;
        }
        let rest = service_fn(move |request: Request| {
            let next = next.clone();
            async move { Ok::<_, Infallible>(next.run(request).await) }
        });
        match self.layer().layer(rest).oneshot(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::middleware::{run_chain, Terminal};
    use axum::body::Body;
    use futures_util::FutureExt;
    use http::header::{
        ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_ORIGIN,
        ACCESS_CONTROL_REQUEST_METHOD,
    };
    use http::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_terminal(calls: &Arc<AtomicUsize>) -> Terminal {
        let calls = Arc::clone(calls);
        Arc::new(move |_request| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Response::new(Body::from("ok")) }.boxed()
        })
    }

    async fn send(cors: Cors, request: Request, calls: &Arc<AtomicUsize>) -> Response {
        let layers: Arc<[Arc<dyn Middleware>]> = vec![Arc::new(cors) as Arc<dyn Middleware>].into();
        run_chain(layers, counting_terminal(calls), request).await
    }

    fn request(method: Method, origin: Option<&str>) -> Request {
        let mut builder = http::Request::builder().method(method).uri("/data");
        if let Some(origin) = origin {
            builder = builder.header(ORIGIN, origin);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn wildcard_without_credentials_answers_star() {
        let calls = Arc::new(AtomicUsize::new(0));
        let response = send(Cors::new(), request(Method::GET, Some("https://a.example")), &calls).await;
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn wildcard_with_credentials_echoes_origin() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cors = Cors::new().allow_credentials(true);
        let response = send(cors, request(Method::GET, Some("https://a.example")), &calls).await;
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "https://a.example");
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
    }

    #[tokio::test]
    async fn origin_list_filters_unknown_origins() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cors = Cors::from_origin_list("https://a.example, https://b.example");
        let known = send(cors.clone(), request(Method::GET, Some("https://b.example")), &calls).await;
        assert_eq!(known.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "https://b.example");

        let unknown = send(cors, request(Method::GET, Some("https://evil.example")), &calls).await;
        assert!(unknown.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn preflight_never_reaches_the_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut preflight = request(Method::OPTIONS, Some("https://a.example"));
        preflight
            .headers_mut()
            .insert(ACCESS_CONTROL_REQUEST_METHOD, HeaderValue::from_static("POST"));
        let response = send(Cors::new(), preflight, &calls).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn requests_without_origin_pass_through() {
        let calls = Arc::new(AtomicUsize::new(0));
        let response = send(Cors::new(), request(Method::GET, None), &calls).await;
        assert!(response.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
