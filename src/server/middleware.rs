// ABOUTME: Middleware chain for the HTTP dispatcher and individual handlers
// ABOUTME: Each layer receives the request and a `Next` that runs the remaining layers
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 txlog contributors

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::Request;
use axum::response::Response;
use futures_util::future::BoxFuture;

/// One layer around a request handler
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    /// Handle `request`, calling `next.run` to continue the chain
    async fn handle(&self, request: Request, next: Next) -> Response;
}

pub(crate) type Terminal = Arc<dyn Fn(Request) -> BoxFuture<'static, Response> + Send + Sync>;

/// Remainder of a middleware chain
#[derive(Clone)]
pub struct Next {
    layers: Arc<[Arc<dyn Middleware>]>,
    index: usize,
    terminal: Terminal,
}

impl Next {
    pub(crate) fn new(layers: Arc<[Arc<dyn Middleware>]>, terminal: Terminal) -> Self {
        Self {
            layers,
            index: 0,
            terminal,
        }
    }

    /// Run the remaining layers and then the handler
    pub async fn run(mut self, request: Request) -> Response {
        match self.layers.get(self.index).cloned() {
            Some(layer) => {
                self.index += 1;
                layer.handle(request, self).await
            }
            None => (self.terminal)(request).await,
        }
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("remaining", &(self.layers.len() - self.index))
            .finish_non_exhaustive()
    }
}

/// Middleware built from an async closure
pub struct FnMiddleware<F> {
    f: F,
}

/// Wrap `f` as a [`Middleware`]
///
/// ```
/// use txlog::server::{from_fn, Next};
/// use axum::extract::Request;
///
/// let tag = from_fn(|request: Request, next: Next| async move {
///     let mut response = next.run(request).await;
///     response
///         .headers_mut()
///         .insert("x-served-by", http::HeaderValue::from_static("txlog"));
///     response
/// });
/// # let _ = tag;
/// ```
pub const fn from_fn<F, Fut>(f: F) -> FnMiddleware<F>
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    FnMiddleware { f }
}

#[async_trait]
impl<F, Fut> Middleware for FnMiddleware<F>
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    async fn handle(&self, request: Request, next: Next) -> Response {
        (self.f)(request, next).await
    }
}

/// Run `request` through `layers` and then `terminal`
pub(crate) async fn run_chain(
    layers: Arc<[Arc<dyn Middleware>]>,
    terminal: Terminal,
    request: Request,
) -> Response {
    Next::new(layers, terminal).run(request).await
}
