// ABOUTME: Shared helpers for the integration test suites
// ABOUTME: Router request builder plus applications wired to an in-memory record sink
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 txlog contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, dead_code)]

pub mod axum_test;

use txlog::transaction::{MemorySink, TransactionRecord};
use txlog::Application;

/// Application recording into a fresh [`MemorySink`]
pub fn recording_app(name: &str) -> (Application, MemorySink) {
    let sink = MemorySink::new();
    let app = Application::builder(name).sink(sink.clone()).build();
    (app, sink)
}

/// The only transaction record in `sink`
pub fn single_transaction(sink: &MemorySink) -> TransactionRecord {
    let mut records = sink.transactions();
    assert_eq!(records.len(), 1, "expected one transaction, got {records:#?}");
    records.remove(0)
}
