// ABOUTME: Library entry point for the txlog transaction logging toolkit
// ABOUTME: Transactions, context propagation, HTTP pipeline and resilient messaging
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 txlog contributors

#![deny(unsafe_code)]

//! # txlog
//!
//! Transaction-scoped logging and tracing. Every unit of externally triggered
//! work opens a [`transaction::Transaction`], carries its trace id through a
//! [`Context`], collects child segments (database queries, outbound calls,
//! consumer handlers) and emits exactly one structured record when it ends.
//!
//! ## Features
//!
//! - **Masking**: field-name and JSONPath rules applied to every captured payload
//! - **HTTP**: typed handlers over axum with CORS, health, upload and static files
//! - **Adapters**: inbound and outbound HTTP, gRPC metadata, AMQP correlation ids
//! - **Messaging**: multi-channel subscriptions with de-duplication and bounded retry
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use txlog::transaction::TransactionKind;
//! use txlog::{Application, Context};
//!
//! let app = Application::builder("billing").service("invoices").build();
//! let txn = app.start("nightly-close", TransactionKind::Other);
//! let ctx = txn.to_context(&Context::new());
//!
//! let query = txn.add_database("invoices", "SELECT id FROM invoices WHERE open");
//! query.end();
//!
//! assert!(txlog::transaction::from_context(&ctx).is_some());
//! txn.end();
//! ```

/// Transport adapters opening transactions and moving trace ids
pub mod adapters;

/// Process-wide application settings and transaction factory
pub mod application;

/// Environment configuration loaders
pub mod config;

/// Immutable in-process context values
pub mod context;

/// Error types for every subsystem
pub mod errors;

/// `tracing` subscriber setup
pub mod logging;

/// Broker abstraction, subscribe runtime and publisher
pub mod messaging;

/// Typed HTTP handler pipeline
pub mod server;

/// Transactions, segments, records and sinks
pub mod transaction;

pub use application::{generate_trace_id, Application, ApplicationBuilder, TraceConfig};
pub use context::{Context, TraceKey};
pub use server::Server;
pub use transaction::{Segment, Transaction};

/// Foundation types (masking, classification, envelopes)
pub use txlog_core;
