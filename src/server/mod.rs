// ABOUTME: HTTP server builder: routes, middleware, health check, timeouts and serving
// ABOUTME: Produces an axum Router wrapped by the transaction adapter, plain or TLS
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 txlog contributors

//! # Typed HTTP pipeline
//!
//! [`Server`] collects routes and middleware and turns them into an
//! [`axum::Router`]. Every request is wrapped by
//! [`crate::adapters::http_server::trace_request`], so handlers always run
//! inside a transaction whose context they receive as their first argument.
//!
//! ```no_run
//! use serde::{Deserialize, Serialize};
//! use tokio_util::sync::CancellationToken;
//! use txlog::config::ServerConfig;
//! use txlog::server::{HandlerError, Reply, Server};
//! use txlog::{Application, Context};
//!
//! #[derive(Default, Deserialize, Serialize)]
//! struct NewUser {
//!     name: String,
//! }
//!
//! #[derive(Serialize)]
//! struct Created {
//!     id: u64,
//!     name: String,
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let app = Application::builder("users").build();
//! let server = Server::new(app).post("/users", |_ctx: Context, user: NewUser| async move {
//!     Ok::<_, HandlerError>(Reply::created(Created { id: 1, name: user.name }))
//! });
//! server
//!     .serve(&ServerConfig::default(), CancellationToken::new())
//!     .await?;
//! # Ok(())
//! # }
//! ```

/// Cross-origin resource sharing middleware
pub mod cors;
/// Typed JSON handlers and the endpoint trait
pub mod handler;
/// Liveness endpoint
pub mod health;
/// Middleware chain
pub mod middleware;
/// Query, path and request-head values exposed to handlers
pub mod params;
/// Query string binding
pub mod query;
/// Handler outcomes and error responses
pub mod reply;
/// Path patterns and the route table
pub mod router;
/// Static file serving
pub mod static_files;
mod tls;
/// Multipart uploads
pub mod upload;

pub use cors::Cors;
pub use handler::{Endpoint, Handler};
pub use health::HealthCheck;
pub use middleware::{from_fn, FnMiddleware, Middleware, Next};
pub use params::{PathParams, QueryParams, RequestHead};
pub use query::bind_query;
pub use reply::{CustomError, HandlerError, Reply, ResponseError};
pub use router::{RouteError, RoutePattern};
pub use static_files::StaticFiles;
pub use upload::{FormValues, UploadHandler, UploadedFile, UploadedFiles};

pub(crate) use reply::error_response;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Request;
use axum::response::Response;
use axum::Router;
use futures_util::FutureExt;
use http::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::timeout::{RequestBodyTimeoutLayer, TimeoutLayer};
use tracing::{debug, info};
use txlog_core::ErrorCode;

use crate::adapters::http_server::trace_request;
use crate::application::Application;
use crate::config::{ServerConfig, TlsConfig};
use crate::errors::ServeError;
use crate::transaction;
use middleware::{run_chain, Terminal};
use router::{Route, RouteTable};
use static_files::FILEPATH_PARAM;

/// HTTP server builder
#[must_use]
pub struct Server {
    app: Application,
    routes: RouteTable,
    middleware: Vec<Arc<dyn Middleware>>,
    health: HealthCheck,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

impl Server {
    /// Empty server for `app` with the default health check
    pub fn new(app: Application) -> Self {
        Self {
            app,
            routes: RouteTable::default(),
            middleware: Vec::new(),
            health: HealthCheck::default(),
            read_timeout: None,
            write_timeout: None,
        }
    }

    fn typed<Req, Resp, F, Fut>(self, method: Method, path: &str, f: F) -> Self
    where
        Req: DeserializeOwned + Serialize + Default + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(crate::Context, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply<Resp>, HandlerError>> + Send + 'static,
    {
        self.handle(path, Handler::new(method, f))
    }

    /// Register a `GET` handler
    ///
    /// # Panics
    ///
    /// Panics when `path` is not a valid route pattern.
    pub fn get<Req, Resp, F, Fut>(self, path: &str, f: F) -> Self
    where
        Req: DeserializeOwned + Serialize + Default + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(crate::Context, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply<Resp>, HandlerError>> + Send + 'static,
    {
        self.typed(Method::GET, path, f)
    }

    /// Register a `POST` handler
    ///
    /// # Panics
    ///
    /// Panics when `path` is not a valid route pattern.
    pub fn post<Req, Resp, F, Fut>(self, path: &str, f: F) -> Self
    where
        Req: DeserializeOwned + Serialize + Default + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(crate::Context, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply<Resp>, HandlerError>> + Send + 'static,
    {
        self.typed(Method::POST, path, f)
    }

    /// Register a `PUT` handler
    ///
    /// # Panics
    ///
    /// Panics when `path` is not a valid route pattern.
    pub fn put<Req, Resp, F, Fut>(self, path: &str, f: F) -> Self
    where
        Req: DeserializeOwned + Serialize + Default + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(crate::Context, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply<Resp>, HandlerError>> + Send + 'static,
    {
        self.typed(Method::PUT, path, f)
    }

    /// Register a `PATCH` handler
    ///
    /// # Panics
    ///
    /// Panics when `path` is not a valid route pattern.
    pub fn patch<Req, Resp, F, Fut>(self, path: &str, f: F) -> Self
    where
        Req: DeserializeOwned + Serialize + Default + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(crate::Context, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply<Resp>, HandlerError>> + Send + 'static,
    {
        self.typed(Method::PATCH, path, f)
    }

    /// Register a `DELETE` handler
    ///
    /// # Panics
    ///
    /// Panics when `path` is not a valid route pattern.
    pub fn delete<Req, Resp, F, Fut>(self, path: &str, f: F) -> Self
    where
        Req: DeserializeOwned + Serialize + Default + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(crate::Context, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply<Resp>, HandlerError>> + Send + 'static,
    {
        self.typed(Method::DELETE, path, f)
    }

    /// Register any endpoint
    ///
    /// # Panics
    ///
    /// Panics when `path` is not a valid route pattern.
    pub fn handle(self, path: &str, endpoint: impl Endpoint) -> Self {
        self.handle_with(path, endpoint, Vec::new())
    }

    /// Register an endpoint wrapped by its own middleware
    ///
    /// Handler middleware runs inside the server middleware, outermost first.
    ///
    /// # Panics
    ///
    /// Panics when `path` is not a valid route pattern.
    #[allow(clippy::panic)]
    pub fn handle_with(
        self,
        path: &str,
        endpoint: impl Endpoint,
        middleware: Vec<Arc<dyn Middleware>>,
    ) -> Self {
        match self.try_handle_with(path, endpoint, middleware) {
            Ok(server) => server,
            Err(e) => panic!("invalid route pattern {path:?}: {e}"),
        }
    }

    /// Register an endpoint, reporting an invalid pattern instead of panicking
    ///
    /// # Errors
    ///
    /// Returns [`RouteError`] when `path` cannot be parsed.
    pub fn try_handle_with(
        mut self,
        path: &str,
        endpoint: impl Endpoint,
        middleware: Vec<Arc<dyn Middleware>>,
    ) -> Result<Self, RouteError> {
        let pattern = RoutePattern::parse(path)?;
        self.routes.push(Route {
            pattern,
            endpoint: Arc::new(endpoint),
            middleware: middleware.into(),
        });
        Ok(self)
    }

    /// Add server-level middleware; the first registered runs outermost
    pub fn middleware(mut self, middleware: impl Middleware) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Serve files under `root` at `{prefix}/...`
    ///
    /// # Panics
    ///
    /// Panics when `prefix` produces an invalid route pattern.
    pub fn static_files(self, prefix: &str, root: impl Into<PathBuf>) -> Self {
        let pattern = format!("{}/{{{FILEPATH_PARAM}:.+}}", prefix.trim_end_matches('/'));
        self.handle(&pattern, StaticFiles::new(root))
    }

    /// Replace the health check configuration
    pub fn health(mut self, health: HealthCheck) -> Self {
        self.health = health;
        self
    }

    /// Maximum time to receive the request body
    pub const fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Maximum time to produce the response
    pub const fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }

    /// Apply the timeouts from `config`
    pub fn with_config(mut self, config: &ServerConfig) -> Self {
        if let Some(timeout) = config.read_timeout {
            self.read_timeout = Some(timeout);
        }
        if let Some(timeout) = config.write_timeout {
            self.write_timeout = Some(timeout);
        }
        self
    }

    /// Number of registered routes
    #[must_use]
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Build the router: dispatcher, write timeout, transaction adapter, read timeout
    pub fn into_router(self) -> Router {
        let dispatcher = Arc::new(Dispatcher {
            app: self.app.clone(),
            routes: self.routes,
            middleware: self.middleware.into(),
            health: self.health,
        });

        let mut router = Router::new().fallback(move |request: Request| {
            let dispatcher = Arc::clone(&dispatcher);
            async move { dispatcher.dispatch(request).await }
        });
        if let Some(timeout) = self.write_timeout {
            router = router.layer(TimeoutLayer::with_status_code(
                StatusCode::REQUEST_TIMEOUT,
                timeout,
            ));
        }
        router = router.layer(axum::middleware::from_fn_with_state(
            self.app,
            trace_request,
        ));
        if let Some(timeout) = self.read_timeout {
            router = router.layer(RequestBodyTimeoutLayer::new(timeout));
        }
        router
    }

    /// Bind `config.addr()` and serve until `shutdown` is cancelled
    ///
    /// # Errors
    ///
    /// Returns [`ServeError`] when the address cannot be bound, the TLS
    /// material is invalid, or the accept loop fails.
    pub async fn serve(
        self,
        config: &ServerConfig,
        shutdown: CancellationToken,
    ) -> Result<(), ServeError> {
        let addr = config.addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServeError::Bind { addr, source })?;
        self.with_config(config)
            .serve_listener(listener, config.tls.as_ref(), shutdown)
            .await
    }

    /// Serve on an already bound listener until `shutdown` is cancelled
    ///
    /// # Errors
    ///
    /// Returns [`ServeError`] when the TLS material is invalid or the accept
    /// loop fails.
    pub async fn serve_listener(
        self,
        listener: TcpListener,
        tls: Option<&TlsConfig>,
        shutdown: CancellationToken,
    ) -> Result<(), ServeError> {
        let local = listener.local_addr()?;
        let app_name = self.app.name().to_owned();
        let router = self.into_router();
        info!(app = %app_name, addr = %local, tls = tls.is_some(), "HTTP server listening");

        match tls {
            Some(tls) => tls::serve_tls(listener, router, tls, shutdown).await,
            None => {
                axum::serve(listener, router)
                    .with_graceful_shutdown(shutdown.cancelled_owned())
                    .await?;
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("app", &self.app.name())
            .field("routes", &self.routes.len())
            .field("middleware", &self.middleware.len())
            .field("health", &self.health)
            .finish_non_exhaustive()
    }
}

struct Dispatcher {
    app: Application,
    routes: RouteTable,
    middleware: Arc<[Arc<dyn Middleware>]>,
    health: HealthCheck,
}

impl Dispatcher {
    async fn dispatch(self: Arc<Self>, request: Request) -> Response {
        if self.middleware.is_empty() {
            return self.route(request).await;
        }
        let this = Arc::clone(&self);
        let terminal: Terminal = Arc::new(move |request| {
            let this = Arc::clone(&this);
            async move { this.route(request).await }.boxed()
        });
        run_chain(Arc::clone(&self.middleware), terminal, request).await
    }

    async fn route(&self, mut request: Request) -> Response {
        if let Some(response) = self.health.respond(request.method(), request.uri().path()) {
            return response;
        }

        let path = request.uri().path().to_owned();
        let Some((route, params)) = self.routes.find(request.method(), &path) else {
            return self.not_found(&request);
        };
        request.extensions_mut().insert(params);
        let endpoint = Arc::clone(&route.endpoint);
        if route.middleware.is_empty() {
            return endpoint.call(request).await;
        }
        let terminal: Terminal = Arc::new(move |request| {
            let endpoint = Arc::clone(&endpoint);
            async move { endpoint.call(request).await }.boxed()
        });
        run_chain(Arc::clone(&route.middleware), terminal, request).await
    }

    fn not_found(&self, request: &Request) -> Response {
        if self.app.debug() {
            debug!(
                method = %request.method(),
                path = request.uri().path(),
                query = request.uri().query().unwrap_or_default(),
                "no route matched"
            );
        }
        if let Some(txn) = request
            .extensions()
            .get::<crate::Context>()
            .and_then(transaction::from_context)
        {
            txn.mark_business_error();
        }
        error_response(ErrorCode::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "invalid route pattern")]
    fn bad_pattern_panics_at_registration() {
        let app = Application::builder("svc").build();
        let _ = Server::new(app).handle("/x/{id:[}", StaticFiles::new("/tmp"));
    }

    #[test]
    fn static_mount_pattern() {
        let app = Application::builder("svc").build();
        let server = Server::new(app)
            .static_files("/assets/", "/srv")
            .static_files("", "/srv");
        assert_eq!(server.route_count(), 2);
        let (route, params) = server.routes.find(&Method::GET, "/assets/img/a.png").unwrap();
        assert_eq!(route.pattern.as_str(), "/assets/{filepath:.+}");
        assert_eq!(params.get("filepath"), Some("img/a.png"));
    }
}
