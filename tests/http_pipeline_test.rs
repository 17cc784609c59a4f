// ABOUTME: Integration tests for the typed HTTP handler pipeline
// ABOUTME: Routing, decoding, reply and error encoding, middleware order and transaction records
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 txlog contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod helpers;

use std::sync::Arc;

use axum::extract::Request;
use axum::http::{Method, StatusCode};
use helpers::axum_test::AxumTestRequest;
use helpers::{recording_app, single_transaction};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use txlog::application::TraceConfig;
use txlog::server::{
    from_fn, CustomError, Handler, HandlerError, HealthCheck, Middleware, Next, PathParams,
    Reply, RequestHead,
};
use txlog::transaction::{RecordLevel, TransactionKind};
use txlog::txlog_core::{Classification, MaskKind, MaskingConfig};
use txlog::{Application, Context, Server};

#[derive(Debug, Default, Deserialize, Serialize)]
struct CreateUser {
    name: String,
    email: String,
}

#[derive(Debug, Serialize)]
struct User {
    id: u32,
    name: String,
}

fn users_server(app: Application) -> Server {
    Server::new(app)
        .post("/users", |_ctx: Context, req: CreateUser| async move {
            if req.email.is_empty() {
                return Err(HandlerError::response(
                    StatusCode::UNPROCESSABLE_ENTITY,
                    &json!({"field": "email", "error": "required"}),
                ));
            }
            Ok(Reply::created(User { id: 1, name: req.name }))
        })
        .get("/users/{id:[0-9]+}", |ctx: Context, _req: ()| async move {
            let id = ctx
                .value::<PathParams>()
                .and_then(|params| params.get("id"))
                .unwrap_or_default()
                .to_owned();
            Ok(Reply::Ok(json!({ "id": id })))
        })
        .delete("/users/{id}", |_ctx: Context, _req: ()| async {
            Ok::<_, HandlerError>(Reply::<()>::NoContent)
        })
}

#[tokio::test]
async fn test_post_decodes_body_and_returns_status() {
    let (app, sink) = recording_app("users");
    let router = users_server(app).into_router();

    let response = AxumTestRequest::post("/users")
        .json(&json!({"name": "ana", "email": "ana@example.com"}))
        .send(router)
        .await
        .assert_status(StatusCode::CREATED);
    assert_eq!(response.header("content-type"), Some("application/json"));
    assert_eq!(response.json::<Value>(), json!({"id": 1, "name": "ana"}));

    let record = single_transaction(&sink);
    assert_eq!(record.kind, TransactionKind::Http);
    assert_eq!(record.name, "POST /users");
    assert_eq!(record.status, Some(201));
    assert_eq!(record.level, RecordLevel::Info);
    assert_eq!(record.request_body["email"], "ana@example.com");
}

#[tokio::test]
async fn test_malformed_body_is_fixed_envelope() {
    let (app, sink) = recording_app("users");
    let response = AxumTestRequest::post("/users")
        .header("content-type", "application/json")
        .body("{\"name\": ")
        .send(users_server(app).into_router())
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(
        response.json::<Value>(),
        json!({
            "status": false,
            "code": "400",
            "message": {"title": "Bad Request", "desc": "invalid request body"},
            "data": null
        })
    );
    assert_eq!(single_transaction(&sink).error_kind, Classification::Business);
}

#[tokio::test]
async fn test_response_error_body_is_verbatim() {
    let (app, sink) = recording_app("users");
    let response = AxumTestRequest::post("/users")
        .json(&json!({"name": "ana"}))
        .send(users_server(app).into_router())
        .await
        .assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        response.json::<Value>(),
        json!({"field": "email", "error": "required"})
    );
    let record = single_transaction(&sink);
    assert_eq!(record.error_kind, Classification::Business);
    assert_eq!(record.level, RecordLevel::Warn);
    assert_eq!(record.message, "business error");
}

#[tokio::test]
async fn test_path_params_and_regex_segments() {
    let (app, _sink) = recording_app("users");
    let router = users_server(app).into_router();

    let response = AxumTestRequest::get("/users/42").send(router.clone()).await;
    assert_eq!(response.status(), 200);
    assert_eq!(response.json::<Value>()["id"], "42");

    // The regex route does not match; the delete route matches by path only
    AxumTestRequest::get("/users/abc")
        .send(router)
        .await
        .assert_status(StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_method_mismatch_answers_405_without_invoking() {
    let calls = Arc::new(Mutex::new(0_u32));
    let counter = Arc::clone(&calls);
    let (app, _sink) = recording_app("svc");
    let router = Server::new(app)
        .post("/jobs", move |_ctx: Context, _req: ()| {
            let counter = Arc::clone(&counter);
            async move {
                *counter.lock() += 1;
                Ok::<_, HandlerError>(Reply::Ok(json!({"queued": true})))
            }
        })
        .into_router();

    let response = AxumTestRequest::get("/jobs")
        .send(router)
        .await
        .assert_status(StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.json::<Value>()["code"], "405");
    assert_eq!(*calls.lock(), 0);
}

#[tokio::test]
async fn test_same_path_dispatches_by_method() {
    let (app, _sink) = recording_app("svc");
    let router = Server::new(app)
        .get("/items", |_ctx: Context, _req: ()| async {
            Ok::<_, HandlerError>(Reply::Ok(json!("list")))
        })
        .post("/items", |_ctx: Context, _req: ()| async {
            Ok::<_, HandlerError>(Reply::Ok(json!("create")))
        })
        .into_router();

    let listed = AxumTestRequest::get("/items").send(router.clone()).await;
    assert_eq!(listed.json::<Value>(), json!("list"));
    let created = AxumTestRequest::post("/items").send(router).await;
    assert_eq!(created.json::<Value>(), json!("create"));
}

#[tokio::test]
async fn test_no_content_reply() {
    let (app, _sink) = recording_app("users");
    let response = AxumTestRequest::delete("/users/9")
        .send(users_server(app).into_router())
        .await
        .assert_status(StatusCode::NO_CONTENT);
    assert!(response.bytes().is_empty());
    assert_eq!(response.header("content-type"), None);
}

#[tokio::test]
async fn test_custom_and_unknown_errors() {
    let (app, sink) = recording_app("svc");
    let router = Server::new(app)
        .get("/conflict", |_ctx: Context, _req: ()| async {
            Err::<Reply<()>, _>(HandlerError::from(CustomError::new(
                StatusCode::CONFLICT,
                "USR-409",
                "Conflict",
                "user already exists",
            )))
        })
        .get("/broken", |_ctx: Context, _req: ()| async {
            Err::<Reply<()>, _>(HandlerError::from(anyhow::anyhow!("database unreachable")))
        })
        .into_router();

    let conflict = AxumTestRequest::get("/conflict")
        .send(router.clone())
        .await
        .assert_status(StatusCode::CONFLICT);
    assert_eq!(
        conflict.json::<Value>(),
        json!({
            "status": false,
            "code": "USR-409",
            "message": {"title": "Conflict", "desc": "user already exists"},
            "data": null
        })
    );

    let broken = AxumTestRequest::get("/broken")
        .send(router)
        .await
        .assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let body = broken.json::<Value>();
    assert_eq!(body["code"], "500");
    assert_eq!(body["message"]["desc"], "unknown error");

    let records = sink.transactions();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].error_kind, Classification::Business);
    assert_eq!(records[1].error_kind, Classification::Infrastructure);
    assert_eq!(records[1].level, RecordLevel::Error);
    assert_eq!(records[1].message, "internal server error");
    assert_eq!(
        records[1].error.as_ref().unwrap().message,
        "database unreachable"
    );
}

#[tokio::test]
async fn test_not_found_envelope() {
    let sink = txlog::transaction::MemorySink::new();
    let app = Application::builder("svc").debug(true).sink(sink.clone()).build();
    let response = AxumTestRequest::get("/nowhere?x=1")
        .send(Server::new(app).into_router())
        .await
        .assert_status(StatusCode::NOT_FOUND);
    let body = response.json::<Value>();
    assert_eq!(body["status"], false);
    assert_eq!(body["code"], "404");
    assert_eq!(single_transaction(&sink).error_kind, Classification::Business);
}

#[tokio::test]
async fn test_health_check_defaults_and_overrides() {
    let (app, _sink) = recording_app("svc");
    let router = Server::new(app.clone()).into_router();
    let ok = AxumTestRequest::get("/health").send(router.clone()).await;
    assert_eq!(ok.status(), 200);
    assert!(ok.bytes().is_empty());
    AxumTestRequest::post("/health")
        .send(router)
        .await
        .assert_status(StatusCode::METHOD_NOT_ALLOWED);

    let custom = Server::new(app.clone())
        .health(HealthCheck::at("/livez"))
        .into_router();
    AxumTestRequest::get("/livez")
        .send(custom.clone())
        .await
        .assert_status(StatusCode::OK);
    AxumTestRequest::get("/health")
        .send(custom)
        .await
        .assert_status(StatusCode::NOT_FOUND);

    let disabled = Server::new(app).health(HealthCheck::disabled()).into_router();
    AxumTestRequest::get("/health")
        .send(disabled)
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> impl Middleware {
    let log = Arc::clone(log);
    from_fn(move |request: Request, next: Next| {
        let log = Arc::clone(&log);
        async move {
            log.lock().push(name);
            let response = next.run(request).await;
            log.lock().push(name);
            response
        }
    })
}

#[tokio::test]
async fn test_server_middleware_wraps_handler_middleware() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let inner_log = Arc::clone(&log);
    let (app, _sink) = recording_app("svc");
    let handler = Handler::new(Method::GET, move |_ctx: Context, _req: ()| {
        let log = Arc::clone(&inner_log);
        async move {
            log.lock().push("handler");
            Ok::<_, HandlerError>(Reply::Ok(json!({"ok": true})))
        }
    });
    let route: Arc<dyn Middleware> = Arc::new(recorder(&log, "route"));
    let router = Server::new(app)
        .middleware(recorder(&log, "outer"))
        .middleware(recorder(&log, "inner"))
        .handle_with("/mw", handler, vec![route])
        .into_router();

    AxumTestRequest::get("/mw")
        .send(router)
        .await
        .assert_status(StatusCode::OK);
    assert_eq!(
        *log.lock(),
        vec!["outer", "inner", "route", "handler", "route", "inner", "outer"]
    );
}

#[tokio::test]
async fn test_request_head_and_query_reach_the_handler() {
    let (app, _sink) = recording_app("svc");
    let router = Server::new(app)
        .get("/echo", |ctx: Context, _req: ()| async move {
            let head = ctx.value::<RequestHead>().unwrap();
            let agent = head
                .headers
                .get("user-agent")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_owned();
            let page = ctx
                .value::<txlog::server::QueryParams>()
                .and_then(|q| q.get("page"))
                .unwrap_or_default()
                .to_owned();
            Ok::<_, HandlerError>(Reply::Ok(json!({"agent": agent, "page": page})))
        })
        .into_router();

    let response = AxumTestRequest::get("/echo?page=3")
        .header("user-agent", "curl/8.5")
        .send(router)
        .await;
    assert_eq!(
        response.json::<Value>(),
        json!({"agent": "curl/8.5", "page": "3"})
    );
}

#[tokio::test]
async fn test_trace_header_is_echoed_and_inherited_when_configured() {
    let sink = txlog::transaction::MemorySink::new();
    let app = Application::builder("svc")
        .trace_config(TraceConfig {
            via_header: true,
            ..TraceConfig::default()
        })
        .sink(sink.clone())
        .build();
    let router = Server::new(app.clone())
        .get("/trace", |ctx: Context, _req: ()| async move {
            let txn = txlog::transaction::from_context(&ctx).unwrap();
            Ok::<_, HandlerError>(Reply::Ok(json!({"trace": txn.trace_id()})))
        })
        .into_router();

    let response = AxumTestRequest::get("/trace")
        .header("X-Trace-Id", "abc-123")
        .send(router)
        .await;
    assert_eq!(response.header("x-trace-id"), Some("abc-123"));
    assert_eq!(response.json::<Value>()["trace"], "abc-123");
    assert_eq!(single_transaction(&sink).trace_id, "abc-123");

    // Without via_header the inbound header is ignored and a fresh id is generated
    let (plain, plain_sink) = recording_app("svc");
    let response = AxumTestRequest::get("/health")
        .header("X-Trace-Id", "abc-123")
        .send(Server::new(plain).into_router())
        .await;
    let echoed = response.header("x-trace-id").unwrap().to_owned();
    assert_ne!(echoed, "abc-123");
    assert_eq!(echoed.len(), 32);
    assert_eq!(single_transaction(&plain_sink).trace_id, echoed);
}

#[tokio::test]
async fn test_request_body_is_masked_in_record() {
    let sink = txlog::transaction::MemorySink::new();
    let app = Application::builder("svc")
        .masking_rule(MaskingConfig::field("email", MaskKind::Email).show(2, 2))
        .masking_rule(MaskingConfig::json_path("$.card.number", MaskKind::Partial).show(0, 4))
        .sink(sink.clone())
        .build();
    let router = Server::new(app)
        .post("/pay", |_ctx: Context, _req: Value| async {
            Ok::<_, HandlerError>(Reply::Ok(json!({"paid": true})))
        })
        .into_router();

    AxumTestRequest::post("/pay")
        .json(&json!({
            "email": "ana.banana@example.com",
            "card": {"number": "4111111111111111"},
            "amount": 10
        }))
        .send(router)
        .await
        .assert_status(StatusCode::OK);

    let record = single_transaction(&sink);
    assert_eq!(record.request_body["email"], "an*******na@example.com");
    assert_eq!(record.request_body["card"]["number"], "************1111");
    assert_eq!(record.request_body["amount"], 10);
    assert_eq!(record.response_body, json!({"paid": true}));
}

#[tokio::test]
async fn test_handler_panic_becomes_internal_500() {
    let (app, sink) = recording_app("svc");
    let router = Server::new(app)
        .get("/panic", |_ctx: Context, _req: ()| async {
            if true {
                panic!("handler exploded");
            }
            Ok::<_, HandlerError>(Reply::Ok(json!(null)))
        })
        .into_router();

    AxumTestRequest::get("/panic")
        .send(router)
        .await
        .assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let record = single_transaction(&sink);
    assert_eq!(record.error_kind, Classification::Internal);
    assert!(record
        .error
        .as_ref()
        .unwrap()
        .message
        .contains("handler exploded"));
}
