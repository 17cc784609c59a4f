// ABOUTME: Typed request handlers: method guard, JSON decode, context enrichment, reply encoding
// ABOUTME: Defines the Endpoint trait every routable handler implements
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 txlog contributors

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use axum::extract::Request;
use axum::response::Response;
use http::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;
use txlog_core::constants::http::MAX_JSON_BODY_BYTES;
use txlog_core::ErrorCode;

use super::params::{PathParams, QueryParams, RequestHead};
use super::reply::{error_response, write_outcome, HandlerError, Reply};
use crate::context::Context;
use crate::transaction::{self, Transaction};

/// Anything the router can dispatch to
#[async_trait]
pub trait Endpoint: Send + Sync + 'static {
    /// Method this endpoint answers
    fn method(&self) -> &Method;

    /// Produce the response for `request`
    async fn call(&self, request: Request) -> Response;
}

/// Handler decoding a JSON `Req`, calling `F` and encoding its `Reply<Resp>`
pub struct Handler<Req, Resp, F> {
    method: Method,
    f: F,
    _marker: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp, F> Handler<Req, Resp, F> {
    /// Bind `f` to `method`
    pub const fn new(method: Method, f: F) -> Self {
        Self {
            method,
            f,
            _marker: PhantomData,
        }
    }
}

impl<Req, Resp, F> fmt::Debug for Handler<Req, Resp, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("method", &self.method)
            .field("request", &std::any::type_name::<Req>())
            .field("response", &std::any::type_name::<Resp>())
            .finish_non_exhaustive()
    }
}

/// Context installed by the server adapter, or the task-scoped one
pub(crate) fn request_context(parts: &http::request::Parts) -> Context {
    parts
        .extensions
        .get::<Context>()
        .cloned()
        .unwrap_or_else(Context::current_or_default)
}

/// Add query params, path params and the request head to `ctx`
pub(crate) fn enrich_context(ctx: &Context, parts: &http::request::Parts) -> Context {
    ctx.with_value(QueryParams::parse(parts.uri.query().unwrap_or_default()))
        .with_value(
            parts
                .extensions
                .get::<PathParams>()
                .cloned()
                .unwrap_or_default(),
        )
        .with_value(RequestHead::from_parts(parts))
}

/// 405 answered before the user function runs
pub(crate) fn method_not_allowed(txn: Option<&Transaction>) -> Response {
    if let Some(txn) = txn {
        txn.mark_business_error();
    }
    error_response(ErrorCode::MethodNotAllowed)
}

#[async_trait]
impl<Req, Resp, F, Fut> Endpoint for Handler<Req, Resp, F>
where
    Req: DeserializeOwned + Serialize + Default + Send + 'static,
    Resp: Serialize + Send + 'static,
    F: Fn(Context, Req) -> Fut + Send + Sync + 'static,
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

        let bytes = match axum::body::to_bytes(body, MAX_JSON_BODY_BYTES).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "failed to read request body");
                return bad_request(txn.as_ref());
            }
        };
        let payload = if bytes.iter().all(u8::is_ascii_whitespace) {
            Req::default()
        } else {
            match decode_over_default::<Req>(&bytes) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(error = %e, "failed to decode request body");
                    return bad_request(txn.as_ref());
                }
            }
        };

        let ctx = enrich_context(&ctx, &parts);
        let outcome = Context::scope(ctx.clone(), (self.f)(ctx, payload)).await;
        write_outcome(outcome, txn.as_ref())
    }
}

/// Decode `bytes` on top of `T::default()`
///
/// Fields absent from the body, or sent as `null`, keep their default value.
/// Nested objects are overlaid the same way.
fn decode_over_default<T>(bytes: &[u8]) -> Result<T, serde_json::Error>
where
    T: DeserializeOwned + Serialize + Default,
{
    let body: Value = serde_json::from_slice(bytes)?;
    let mut merged = serde_json::to_value(T::default())?;
    overlay(&mut merged, body);
    serde_json::from_value(merged)
}

fn overlay(base: &mut Value, body: Value) {
    match (base, body) {
        (Value::Object(base), Value::Object(body)) => {
            for (key, value) in body {
                match base.get_mut(&key) {
                    Some(_) if value.is_null() => {}
                    Some(slot) => overlay(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, body) => *base = body,
    }
}

fn bad_request(txn: Option<&Transaction>) -> Response {
    if let Some(txn) = txn {
        txn.mark_business_error();
    }
    error_response(ErrorCode::BadRequest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http::StatusCode;
    use serde::Deserialize;
    use serde_json::{json, Value};

    #[derive(Debug, Default, Deserialize, Serialize)]
    struct Greet {
        name: String,
    }

    #[derive(Debug, Deserialize, Serialize, PartialEq)]
    struct Limits {
        page: u32,
        size: u32,
    }

    impl Default for Limits {
        fn default() -> Self {
            Self { page: 1, size: 20 }
        }
    }

    #[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
    struct Listing {
        owner: String,
        limits: Limits,
        tags: Vec<String>,
    }

    fn greeter() -> impl Endpoint {
        Handler::new(Method::POST, |ctx: Context, req: Greet| async move {
            let shout = ctx
                .value::<QueryParams>()
                .and_then(|q| q.get("shout"))
                .is_some();
            let name = if req.name.is_empty() { "anonymous".to_owned() } else { req.name };
            Ok::<_, HandlerError>(Reply::Ok(json!({ "hello": name, "shout": shout })))
        })
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn decodes_body_and_sees_query() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/greet?shout=1")
            .body(Body::from(r#"{"name":"ana"}"#))
            .unwrap();
        let response = greeter().call(request).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"hello": "ana", "shout": true}));
    }

    #[tokio::test]
    async fn empty_body_uses_default() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/greet")
            .body(Body::empty())
            .unwrap();
        let response = greeter().call(request).await;
        assert_eq!(body_json(response).await["hello"], "anonymous");
    }

    #[tokio::test]
    async fn partial_body_reaches_handler_with_defaults() {
        let handler = Handler::new(Method::POST, |_ctx: Context, req: Listing| async move {
            Ok::<_, HandlerError>(Reply::Ok(json!({
                "owner": req.owner,
                "page": req.limits.page,
                "size": req.limits.size,
                "tags": req.tags,
            })))
        });
        let request = Request::builder()
            .method(Method::POST)
            .uri("/listing")
            .body(Body::from(r#"{"owner":"ana","limits":{"size":5}}"#))
            .unwrap();
        let response = handler.call(request).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({"owner": "ana", "page": 1, "size": 5, "tags": []})
        );
    }

    #[test]
    fn null_fields_keep_their_default() {
        let listing: Listing =
            decode_over_default(br#"{"owner":null,"limits":null,"tags":["a"]}"#).unwrap();
        assert_eq!(
            listing,
            Listing {
                owner: String::new(),
                limits: Limits::default(),
                tags: vec!["a".to_owned()],
            }
        );
    }

    #[test]
    fn mistyped_field_still_fails() {
        assert!(decode_over_default::<Listing>(br#"{"owner":7}"#).is_err());
        assert!(decode_over_default::<Listing>(b"[1,2]").is_err());
    }

    #[tokio::test]
    async fn wrong_method_is_405() {
        let request = Request::builder()
            .method(Method::GET)
            .uri("/greet")
            .body(Body::empty())
            .unwrap();
        let response = greeter().call(request).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn malformed_body_is_fixed_400() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/greet")
            .body(Body::from("{not json"))
            .unwrap();
        let response = greeter().call(request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await,
            json!({"status": false, "code": "400", "message": {"title": "Bad Request", "desc": "invalid request body"}, "data": null})
        );
    }
}
