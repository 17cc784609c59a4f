// ABOUTME: Integration adapters binding transactions to transports
// ABOUTME: Inbound and outbound HTTP, gRPC metadata and AMQP correlation ids
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 txlog contributors

//! Transport adapters.
//!
//! Each adapter opens (or joins) a transaction for work that crosses a process
//! boundary and moves the trace id between the transport and [`crate::Context`].

/// AMQP correlation id conversions
pub mod amqp;
/// gRPC tower layer
pub mod grpc;
/// Outbound HTTP client
pub mod http_client;
/// Inbound HTTP middleware
pub mod http_server;

pub use grpc::{GrpcTrace, GrpcTraceLayer};
pub use http_client::{CapturedResponse, TracedClient};
pub use http_server::trace_request;
