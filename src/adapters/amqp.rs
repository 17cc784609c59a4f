// ABOUTME: Conversions between AMQP correlation ids and the in-process context
// ABOUTME: Used by the subscribe runtime on delivery and by the publisher on send
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 txlog contributors

use crate::application::{generate_trace_id, Application};
use crate::context::Context;
use crate::transaction;

/// Context carrying `correlation_id` as its trace id, layered on `base`
#[must_use]
pub fn context_from_correlation(
    app: &Application,
    correlation_id: Option<&str>,
    base: &Context,
) -> Context {
    match correlation_id.map(str::trim).filter(|id| !id.is_empty()) {
        Some(id) => base.with_trace_id(&app.trace_config().key, id),
        None => base.clone(),
    }
}

/// Correlation id for an outgoing message
///
/// The trace id of the transaction bound to `ctx` wins, then the context
/// trace id; a fresh id is generated when neither exists.
#[must_use]
pub fn correlation_id(app: &Application, ctx: &Context) -> String {
    transaction::from_context(ctx)
        .map(|txn| txn.trace_id().to_owned())
        .or_else(|| ctx.trace_id(&app.trace_config().key).map(str::to_owned))
        .unwrap_or_else(generate_trace_id)
}
