// ABOUTME: Integration tests for static files, multipart uploads, CORS and query binding
// ABOUTME: Exercises the endpoints through a full router with temporary directories
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 txlog contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod helpers;

use std::time::Duration;

use axum::http::{Method, StatusCode};
use helpers::axum_test::AxumTestRequest;
use helpers::{recording_app, single_transaction};
use serde::Deserialize;
use serde_json::{json, Value};
use tempfile::TempDir;
use txlog::server::{
    Cors, FormValues, HandlerError, QueryParams, Reply, UploadHandler, UploadedFiles,
};
use txlog::txlog_core::{Classification, MaskKind, MaskingConfig};
use txlog::{Application, Context, Server};

const BOUNDARY: &str = "txlog-boundary";

fn multipart_body(parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, filename, content) in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match filename {
            Some(filename) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
                     Content-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
            ),
        }
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn multipart_request(uri: &str, body: Vec<u8>) -> AxumTestRequest {
    AxumTestRequest::post(uri)
        .header(
            "content-type",
            &format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(body)
}

fn stored_files(dir: &TempDir) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

fn static_server(app: Application, root: &TempDir) -> axum::Router {
    Server::new(app).static_files("/assets", root.path()).into_router()
}

#[tokio::test]
async fn test_static_file_served_with_cache_headers() {
    let root = TempDir::new().unwrap();
    std::fs::create_dir(root.path().join("img")).unwrap();
    std::fs::write(root.path().join("img/logo.png"), b"\x89PNG-bytes").unwrap();
    let (app, _sink) = recording_app("files");
    let router = static_server(app, &root);

    let response = AxumTestRequest::get("/assets/img/logo.png")
        .send(router.clone())
        .await
        .assert_status(StatusCode::OK);
    assert_eq!(response.bytes(), b"\x89PNG-bytes");
    assert_eq!(response.header("content-type"), Some("image/png"));
    assert_eq!(response.header("cache-control"), Some("public, max-age=86400"));
    let etag = response.header("etag").unwrap().to_owned();
    assert!(response.header("last-modified").is_some());

    let cached = AxumTestRequest::get("/assets/img/logo.png")
        .header("if-none-match", &etag)
        .send(router)
        .await
        .assert_status(StatusCode::NOT_MODIFIED);
    assert!(cached.bytes().is_empty());
}

#[tokio::test]
async fn test_static_refuses_traversal_directories_and_missing() {
    let root = TempDir::new().unwrap();
    std::fs::create_dir(root.path().join("docs")).unwrap();
    let (app, sink) = recording_app("files");
    let router = static_server(app, &root);

    let traversal = AxumTestRequest::get("/assets/../secret.txt")
        .send(router.clone())
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(traversal.json::<Value>()["message"]["desc"], "invalid file path");

    AxumTestRequest::get("/assets/docs")
        .send(router.clone())
        .await
        .assert_status(StatusCode::FORBIDDEN);
    AxumTestRequest::get("/assets/missing.gif")
        .send(router.clone())
        .await
        .assert_status(StatusCode::NOT_FOUND);
    AxumTestRequest::post("/assets/docs")
        .send(router)
        .await
        .assert_status(StatusCode::METHOD_NOT_ALLOWED);

    assert!(sink
        .transactions()
        .iter()
        .all(|record| record.error_kind == Classification::Business));
}

fn upload_server(app: Application, dir: &TempDir, max_size: u64) -> axum::Router {
    let handler = UploadHandler::new(
        Method::POST,
        dir.path(),
        |_ctx: Context, files: UploadedFiles, values: FormValues| async move {
            let names: Vec<_> = files.iter().map(|f| f.filename.clone()).collect();
            let sizes: Vec<_> = files.iter().map(|f| f.size).collect();
            Ok::<_, HandlerError>(Reply::Ok(json!({
                "files": names,
                "sizes": sizes,
                "title": values.get("title"),
                "tags": values.get_all("tag"),
            })))
        },
    )
    .with_max_size(max_size);
    Server::new(app).handle("/upload", handler).into_router()
}

#[tokio::test]
async fn test_upload_stores_files_and_records_fields() {
    let dir = TempDir::new().unwrap();
    let sink = txlog::transaction::MemorySink::new();
    let app = Application::builder("files")
        .masking_rule(MaskingConfig::field("secret", MaskKind::Full))
        .sink(sink.clone())
        .build();
    let body = multipart_body(&[
        ("title", None, b"holiday".as_slice()),
        ("tag", None, b"sea".as_slice()),
        ("tag", None, b"sun".as_slice()),
        ("secret", None, b"hunter2".as_slice()),
        ("photo", Some("../../beach.png"), b"0123456789".as_slice()),
    ]);

    let response = multipart_request("/upload", body)
        .send(upload_server(app, &dir, 1024 * 1024))
        .await
        .assert_status(StatusCode::OK);
    assert_eq!(
        response.json::<Value>(),
        json!({"files": ["beach.png"], "sizes": [10], "title": "holiday", "tags": ["sea", "sun"]})
    );

    let stored = stored_files(&dir);
    assert_eq!(stored.len(), 1);
    assert!(stored[0].ends_with("_beach.png"));
    let contents = std::fs::read(dir.path().join(&stored[0])).unwrap();
    assert_eq!(contents, b"0123456789".as_slice());

    let record = single_transaction(&sink);
    let fields = &record.request_body["fields"];
    assert_eq!(fields["title"], "holiday");
    assert_eq!(fields["tag"], json!(["sea", "sun"]));
    assert_ne!(fields["secret"], "hunter2");
    assert_eq!(record.request_body["files"][0]["filename"], "beach.png");
    assert_eq!(record.request_body["files"][0]["size"], 10);
}

#[tokio::test]
async fn test_upload_over_limit_is_rejected_and_cleaned_up() {
    let dir = TempDir::new().unwrap();
    let (app, sink) = recording_app("files");
    let body = multipart_body(&[("blob", Some("big.bin"), vec![b'x'; 4096].as_slice())]);

    let response = multipart_request("/upload", body)
        .send(upload_server(app, &dir, 512))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(
        response.json::<Value>()["message"]["desc"],
        "request body too large"
    );
    assert!(stored_files(&dir).is_empty());
    assert_eq!(single_transaction(&sink).error_kind, Classification::Business);
}

#[tokio::test]
async fn test_upload_requires_multipart() {
    let dir = TempDir::new().unwrap();
    let (app, _sink) = recording_app("files");
    AxumTestRequest::post("/upload")
        .json(&json!({"not": "multipart"}))
        .send(upload_server(app, &dir, 1024))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    assert!(stored_files(&dir).is_empty());
}

fn cors_server(cors: Cors) -> axum::Router {
    let (app, _sink) = recording_app("cors");
    Server::new(app)
        .middleware(cors)
        .get("/data", |_ctx: Context, _req: ()| async {
            Ok::<_, HandlerError>(Reply::Ok(json!({"data": 1})))
        })
        .into_router()
}

#[tokio::test]
async fn test_cors_preflight_is_answered_without_handler() {
    let router = cors_server(
        Cors::from_origin_list("https://app.example, https://admin.example")
            .max_age(Duration::from_secs(600)),
    );
    let response = AxumTestRequest::options("/data")
        .header("origin", "https://admin.example")
        .header("access-control-request-method", "GET")
        .send(router.clone())
        .await
        .assert_status(StatusCode::OK);
    assert_eq!(
        response.header("access-control-allow-origin"),
        Some("https://admin.example")
    );
    let methods: Vec<&str> = response
        .header("access-control-allow-methods")
        .unwrap()
        .split(',')
        .map(str::trim)
        .collect();
    assert_eq!(methods, ["GET", "POST", "PUT", "DELETE", "OPTIONS", "PATCH"]);
    assert_eq!(response.header("access-control-max-age"), Some("600"));
    assert!(response.bytes().is_empty());

    let denied = AxumTestRequest::options("/data")
        .header("origin", "https://evil.example")
        .header("access-control-request-method", "GET")
        .send(router)
        .await;
    assert_eq!(denied.status(), 200);
    assert_eq!(denied.header("access-control-allow-origin"), None);
}

#[tokio::test]
async fn test_cors_tags_simple_requests() {
    let router = cors_server(Cors::new());
    let response = AxumTestRequest::get("/data")
        .header("origin", "https://anywhere.example")
        .send(router.clone())
        .await
        .assert_status(StatusCode::OK);
    assert_eq!(response.header("access-control-allow-origin"), Some("*"));
    assert!(response
        .header("vary")
        .is_some_and(|vary| vary.eq_ignore_ascii_case("origin")));

    let same_origin = AxumTestRequest::get("/data").send(router).await;
    assert_eq!(same_origin.header("access-control-allow-origin"), None);

    let credentialed = cors_server(Cors::new().allow_credentials(true));
    let response = AxumTestRequest::get("/data")
        .header("origin", "https://anywhere.example")
        .send(credentialed)
        .await;
    assert_eq!(
        response.header("access-control-allow-origin"),
        Some("https://anywhere.example")
    );
    assert_eq!(response.header("access-control-allow-credentials"), Some("true"));
}

#[derive(Debug, Default, Deserialize)]
struct Search {
    q: String,
    page: u32,
    #[serde(rename = "tag")]
    tags: Vec<String>,
    exact: bool,
    limit: Option<u32>,
}

#[tokio::test]
async fn test_query_binding_inside_handler_is_lenient() {
    let (app, _sink) = recording_app("search");
    let router = Server::new(app)
        .get("/search", |ctx: Context, _req: ()| async move {
            let search: Search = ctx
                .value::<QueryParams>()
                .map(QueryParams::bind)
                .unwrap_or_default();
            Ok::<_, HandlerError>(Reply::Ok(json!({
                "q": search.q,
                "page": search.page,
                "tags": search.tags,
                "exact": search.exact,
                "limit": search.limit,
            })))
        })
        .into_router();

    let response = AxumTestRequest::get("/search?q=rust%20lang&page=two&tag=a&tag=b&exact=1")
        .send(router)
        .await
        .assert_status(StatusCode::OK);
    assert_eq!(
        response.json::<Value>(),
        json!({"q": "rust lang", "page": 0, "tags": ["a", "b"], "exact": true, "limit": null})
    );
}
