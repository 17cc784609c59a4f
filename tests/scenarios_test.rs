// ABOUTME: End-to-end scenarios over the HTTP pipeline, static files and uploads
// ABOUTME: Each case drives a full router and checks the response and the emitted record
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 txlog contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod helpers;

use axum::http::{Method, StatusCode};
use helpers::axum_test::AxumTestRequest;
use helpers::{recording_app, single_transaction};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tempfile::TempDir;
use txlog::server::{bind_query, FormValues, HandlerError, Reply, UploadHandler, UploadedFiles};
use txlog::transaction::{RecordLevel, TransactionKind};
use txlog::txlog_core::masking::{email_mask, partial_mask};
use txlog::txlog_core::Classification;
use txlog::{Context, Server};

#[derive(Debug, Default, Deserialize, Serialize)]
struct Register {
    name: String,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct CreateUser {
    name: String,
    email: String,
    age: u32,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct ProcessOrder {
    order_id: String,
    customer_id: String,
    amount: f64,
    payment_type: String,
}

fn demo_server(app: txlog::Application) -> axum::Router {
    Server::new(app)
        .post("/register", |_ctx: Context, req: Register| async move {
            Ok::<_, HandlerError>(Reply::Ok(json!({ "message": format!("Hello {}", req.name) })))
        })
        .post("/validation/create-user", |_ctx: Context, req: CreateUser| async move {
            if req.name.trim().is_empty() {
                return Err(HandlerError::response(
                    StatusCode::BAD_REQUEST,
                    &json!({
                        "code": "VIRB01001",
                        "message": "Name field is required and cannot be empty",
                        "data": null,
                    }),
                ));
            }
            Ok(Reply::Ok(json!({ "name": req.name, "email": req.email, "age": req.age })))
        })
        .post("/customv2/process-order", |_ctx: Context, req: ProcessOrder| async move {
            if req.customer_id == "blocked_customer" {
                return Err(HandlerError::response(
                    StatusCode::UNPROCESSABLE_ENTITY,
                    &json!({
                        "type": "business_error",
                        "code": "CUSTOMER_BLOCKED",
                        "message": format!("customer {} cannot place orders", req.customer_id),
                        "data": { "order_id": req.order_id },
                    }),
                ));
            }
            Ok(Reply::Ok(json!({
                "order_id": req.order_id,
                "amount": req.amount,
                "payment_type": req.payment_type,
            })))
        })
        .into_router()
}

#[tokio::test]
async fn test_http_success_scenario() {
    let (app, sink) = recording_app("demo");
    let response = AxumTestRequest::post("/register")
        .json(&json!({"name": "Ana"}))
        .send(demo_server(app))
        .await
        .assert_status(StatusCode::OK);
    assert_eq!(response.json::<Value>(), json!({"message": "Hello Ana"}));

    let record = single_transaction(&sink);
    assert_eq!(record.name, "POST /register");
    assert_eq!(record.kind, TransactionKind::Http);
    assert_eq!(record.method.as_deref(), Some("POST"));
    assert_eq!(record.status, Some(200));
    assert_eq!(record.level, RecordLevel::Info);
    assert_eq!(record.message, "transaction completed");
}

#[tokio::test]
async fn test_http_validation_error_scenario() {
    let (app, sink) = recording_app("demo");
    let response = AxumTestRequest::post("/validation/create-user")
        .json(&json!({"name": "", "email": "a@b.c", "age": 25}))
        .send(demo_server(app))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(
        response.json::<Value>(),
        json!({
            "code": "VIRB01001",
            "message": "Name field is required and cannot be empty",
            "data": null
        })
    );
    assert_eq!(single_transaction(&sink).error_kind, Classification::Business);
}

#[tokio::test]
async fn test_http_missing_fields_reach_validation() {
    let (app, sink) = recording_app("demo");
    let response = AxumTestRequest::post("/validation/create-user")
        .json(&json!({"email": "a@b.c"}))
        .send(demo_server(app))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["code"], "VIRB01001");
    assert_eq!(single_transaction(&sink).error_kind, Classification::Business);
}

#[tokio::test]
async fn test_http_custom_business_error_scenario() {
    let (app, sink) = recording_app("demo");
    let response = AxumTestRequest::post("/customv2/process-order")
        .json(&json!({
            "order_id": "ORD1",
            "customer_id": "blocked_customer",
            "amount": 100.5,
            "payment_type": "credit_card"
        }))
        .send(demo_server(app))
        .await
        .assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = response.json();
    assert_eq!(body["type"], "business_error");
    assert_eq!(body["code"], "CUSTOMER_BLOCKED");
    assert_eq!(single_transaction(&sink).level, RecordLevel::Warn);
}

#[tokio::test]
async fn test_static_missing_file_scenario() {
    let root = TempDir::new().unwrap();
    let (app, _sink) = recording_app("demo");
    let router = Server::new(app).static_files("/images", root.path()).into_router();
    AxumTestRequest::get("/images/nope.jpg")
        .send(router)
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_upload_happy_path_scenario() {
    let dir = TempDir::new().unwrap();
    let (app, _sink) = recording_app("demo");
    let handler = UploadHandler::new(
        Method::POST,
        dir.path(),
        |_ctx: Context, files: UploadedFiles, _values: FormValues| async move {
            Ok::<_, HandlerError>(Reply::Ok(json!({ "files": files })))
        },
    );
    let router = Server::new(app).handle("/upload", handler).into_router();

    let boundary = "scenario-boundary";
    let body = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"file\"; filename=\"hello.txt\"\r\n\
         Content-Type: text/plain\r\n\r\n\
         hello!\n\r\n\
         --{boundary}--\r\n"
    );
    let response = AxumTestRequest::post("/upload")
        .header(
            "content-type",
            &format!("multipart/form-data; boundary={boundary}"),
        )
        .body(body)
        .send(router)
        .await
        .assert_status(StatusCode::OK);

    let body: Value = response.json();
    let files = body["files"].as_array().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0]["size"], 7);
    assert_eq!(files[0]["filename"], "hello.txt");

    let stored: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    assert_eq!(stored.len(), 1);
    let name = stored[0].file_name().unwrap().to_string_lossy().into_owned();
    let (stamp, rest) = name.split_once('_').unwrap();
    assert!(stamp.chars().all(|c| c.is_ascii_digit()));
    assert_eq!(rest, "hello.txt");
    assert_eq!(std::fs::read(&stored[0]).unwrap(), b"hello!\n");
}

#[test]
fn test_idempotent_end_emits_one_record() {
    let (app, sink) = recording_app("demo");
    let txn = app.start("nightly-report", TransactionKind::Other);
    assert_eq!(txn.end(), Some(RecordLevel::Info));
    assert_eq!(txn.end(), None);
    assert_eq!(txn.end(), None);

    let record = single_transaction(&sink);
    assert_eq!(record.name, "nightly-report");
    assert_eq!(record.trace_id, txn.trace_id());
}

#[test]
fn test_mask_examples() {
    assert_eq!(partial_mask("abcdefgh", 2, 2), "ab****gh");
    assert_eq!(email_mask("ana.banana@example.com", 2, 2), "an*******na@example.com");
    let short = email_mask("a@x.y", 2, 2);
    let (user, domain) = short.rsplit_once('@').unwrap();
    assert_eq!(domain, "x.y");
    assert!(!user.contains('@'));
}

#[derive(Debug, Default, Deserialize)]
struct Person {
    #[serde(rename = "n")]
    name: String,
    #[serde(rename = "a")]
    age: i32,
}

#[test]
fn test_query_binding_never_fails() {
    let bob: Person = bind_query("n=bob&a=7");
    assert_eq!((bob.name.as_str(), bob.age), ("bob", 7));

    let blank: Person = bind_query("a=notanumber");
    assert_eq!((blank.name.as_str(), blank.age), ("", 0));
}
