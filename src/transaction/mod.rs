// ABOUTME: Transaction lifecycle: identity, captured request/response, classification, emission
// ABOUTME: One transaction per externally triggered unit of work, emitting exactly one record
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 txlog contributors

//! # Transactions
//!
//! A [`Transaction`] is the record-in-progress for one externally triggered
//! unit of work. Handles are cheap to clone and share one state behind a
//! mutex. [`Transaction::end`] emits exactly one record to the application's
//! sink; after that every mutator is a no-op.
//!
//! Child operations are recorded as [`Segment`]s. Segments are stored in the
//! transaction (arena style) and addressed by index, so a segment never holds
//! more than a handle to its parent.

mod record;
mod segment;
mod sink;

pub use record::{
    CapturedError, ErrorRecord, LogRecord, Payload, RecordLevel, SegmentDetail, SegmentEntry,
    SegmentKind, SegmentRecord, TransactionKind, TransactionRecord,
};
pub use segment::Segment;
pub use sink::{JsonLineSink, MemorySink, RecordSink, TracingSink};

use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use txlog_core::{masking::mask_headers, Classification};

use crate::application::Application;
use crate::context::Context;
use segment::{SegmentData, SegmentState};

/// Request details captured by an adapter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestInfo {
    /// Request method
    pub method: String,
    /// Full request URL or path with query
    pub url: String,
    /// Host the request was addressed to
    pub host: String,
    /// Raw headers; filtered by the allow-list on emission
    pub headers: Vec<(String, String)>,
}

impl RequestInfo {
    /// Capture method, URI, host and headers from request parts
    #[must_use]
    pub fn from_parts(parts: &http::request::Parts) -> Self {
        let host = parts
            .uri
            .host()
            .map(str::to_owned)
            .or_else(|| {
                parts
                    .headers
                    .get(http::header::HOST)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_owned)
            })
            .unwrap_or_default();
        Self {
            method: parts.method.to_string(),
            url: parts.uri.to_string(),
            host,
            headers: header_pairs(&parts.headers),
        }
    }
}

/// Flatten a header map into name/value pairs, skipping non-UTF-8 values
#[must_use]
pub fn header_pairs(headers: &http::HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_owned(), value.to_owned()))
        })
        .collect()
}

#[derive(Debug, Default)]
struct ResponseInfo {
    status: Option<u16>,
    headers: Vec<(String, String)>,
}

struct TransactionState {
    request: Option<RequestInfo>,
    request_body: Payload,
    response: ResponseInfo,
    response_body: Payload,
    classification: Classification,
    error: Option<CapturedError>,
    segments: Vec<SegmentState>,
    end_seq: u64,
    ended: bool,
}

struct Inner {
    app: Application,
    trace_id: String,
    name: String,
    kind: TransactionKind,
    start: Instant,
    started_at: DateTime<Utc>,
    state: Mutex<TransactionState>,
}

/// Handle to one unit of work
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<Inner>,
}

#[derive(Clone)]
struct TransactionSlot(Transaction);

/// Transaction bound to `ctx`, if any
#[must_use]
pub fn from_context(ctx: &Context) -> Option<Transaction> {
    ctx.value::<TransactionSlot>().map(|slot| slot.0.clone())
}

/// Transaction bound to the task-scoped context, if any
#[must_use]
pub fn current() -> Option<Transaction> {
    Context::current().as_ref().and_then(from_context)
}

impl Transaction {
    pub(crate) fn new(
        app: Application,
        trace_id: String,
        name: String,
        kind: TransactionKind,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                app,
                trace_id,
                name,
                kind,
                start: Instant::now(),
                started_at: Utc::now(),
                state: Mutex::new(TransactionState {
                    request: None,
                    request_body: Payload::Empty,
                    response: ResponseInfo::default(),
                    response_body: Payload::Empty,
                    classification: Classification::None,
                    error: None,
                    segments: Vec::new(),
                    end_seq: 0,
                    ended: false,
                }),
            }),
        }
    }

    /// Trace identifier
    #[must_use]
    pub fn trace_id(&self) -> &str {
        &self.inner.trace_id
    }

    /// Route or topic name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Trigger kind
    #[must_use]
    pub fn kind(&self) -> TransactionKind {
        self.inner.kind
    }

    /// Owning application
    #[must_use]
    pub fn application(&self) -> &Application {
        &self.inner.app
    }

    /// Most severe classification recorded so far
    #[must_use]
    pub fn classification(&self) -> Classification {
        self.inner.state.lock().classification
    }

    /// Whether [`Transaction::end`] has run
    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.inner.state.lock().ended
    }

    /// Child context carrying the trace id and this transaction
    #[must_use]
    pub fn to_context(&self, ctx: &Context) -> Context {
        ctx.with_trace_id(&self.inner.app.trace_config().key, self.inner.trace_id.clone())
            .with_value(TransactionSlot(self.clone()))
    }

    /// Record the request snapshot
    pub fn set_request(&self, request: RequestInfo) {
        self.mutate(|state| state.request = Some(request));
    }

    /// Record the request body
    pub fn set_request_body(&self, body: impl Into<Payload>) {
        let body = body.into();
        self.mutate(|state| state.request_body = body);
    }

    /// Record the response status and headers
    pub fn set_response(&self, status: u16, headers: Vec<(String, String)>) {
        self.mutate(|state| {
            state.response = ResponseInfo {
                status: Some(status),
                headers,
            };
        });
    }

    /// Record the response body
    pub fn set_response_body(&self, body: impl Into<Payload>) {
        let body = body.into();
        self.mutate(|state| state.response_body = body);
    }

    /// Record an infrastructure failure
    pub fn notice_error(&self, error: &(dyn StdError + 'static)) {
        self.classify(
            Classification::Infrastructure,
            Some(CapturedError::from_error(error)),
        );
    }

    /// Record an infrastructure failure carried as `anyhow::Error`
    pub fn notice_anyhow(&self, error: &anyhow::Error) {
        self.classify(
            Classification::Infrastructure,
            Some(CapturedError::from_anyhow(error)),
        );
    }

    /// Record an unexpected defect such as a panic
    pub fn notice_internal(&self, message: impl Into<String>) {
        self.classify(
            Classification::Internal,
            Some(CapturedError::new(message)),
        );
    }

    /// Mark the unit as rejected by domain rules
    pub fn mark_business_error(&self) {
        self.classify(Classification::Business, None);
    }

    /// Mark the unit as rejected by domain rules, keeping the error
    pub fn set_business_error(&self, error: &(dyn StdError + 'static)) {
        self.classify(
            Classification::Business,
            Some(CapturedError::from_error(error)),
        );
    }

    /// Escalate the classification and keep the error of the most severe outcome
    pub fn classify(&self, classification: Classification, error: Option<CapturedError>) {
        self.mutate(|state| {
            if classification >= state.classification && error.is_some() {
                state.error = error;
            }
            state.classification = state.classification.escalate(classification);
        });
    }

    /// Open a database segment
    #[must_use]
    pub fn add_database(&self, table: impl Into<String>, query: impl Into<String>) -> Segment {
        let table = table.into();
        let name = table.clone();
        self.add_segment(
            SegmentKind::Database,
            name,
            None,
            SegmentData::Database {
                table,
                query: query.into(),
            },
        )
    }

    /// Open an outbound API segment, optionally back-dated to `start`
    #[must_use]
    pub fn add_outbound_api(&self, name: impl Into<String>, start: Option<Instant>) -> Segment {
        self.add_segment(
            SegmentKind::Api,
            name.into(),
            start,
            SegmentData::Api {
                method: None,
                url: None,
                status: None,
                request_body: Payload::Empty,
                response_body: Payload::Empty,
            },
        )
    }

    /// Open a free-form segment
    #[must_use]
    pub fn add_other(&self, name: impl Into<String>, extras: Map<String, Value>) -> Segment {
        self.add_segment(
            SegmentKind::Other,
            name.into(),
            None,
            SegmentData::Extras(extras),
        )
    }

    /// Open a segment describing one consumer handler's outcome
    #[must_use]
    pub fn add_consumer_detail(
        &self,
        name: impl Into<String>,
        extras: Map<String, Value>,
    ) -> Segment {
        self.add_segment(
            SegmentKind::ConsumerDetail,
            name.into(),
            None,
            SegmentData::Extras(extras),
        )
    }

    fn add_segment(
        &self,
        kind: SegmentKind,
        name: String,
        start: Option<Instant>,
        data: SegmentData,
    ) -> Segment {
        let now = Instant::now();
        let start = start.filter(|start| *start <= now).unwrap_or(now);
        let started_at = Utc::now()
            - chrono::Duration::from_std(now - start).unwrap_or_else(|_| chrono::Duration::zero());
        let mut state = self.inner.state.lock();
        let index = state.segments.len();
        // Segments opened after the end are detached and never emitted
        let detached = state.ended;
        state
            .segments
            .push(SegmentState::new(kind, name, start, started_at, data, detached));
        drop(state);
        Segment::new(self.clone(), index)
    }

    /// Emit the record and make the transaction read-only.
    ///
    /// Returns the level the record was emitted at, or `None` when the
    /// transaction had already ended.
    pub fn end(&self) -> Option<RecordLevel> {
        let split = self.inner.app.split_level();
        let (record, flushed) = {
            let mut guard = self.inner.state.lock();
            if guard.ended {
                return None;
            }
            let state = &mut *guard;
            state.ended = true;
            // Flush segments the caller never ended
            for segment in &mut state.segments {
                if !segment.is_ended() && !segment.is_detached() {
                    state.end_seq += 1;
                    segment.finish(state.end_seq);
                }
            }
            let flushed = if split {
                self.drain_split_segments(state)
            } else {
                Vec::new()
            };
            (self.build_record(state), flushed)
        };

        let sink = self.inner.app.sink();
        for entry in flushed {
            sink.emit(&LogRecord::Segment(entry));
        }
        let level = record.level;
        sink.emit(&LogRecord::Transaction(record));
        Some(level)
    }

    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut TransactionStateView<'_>) -> R) -> R {
        let mut state = self.inner.state.lock();
        let state = &mut *state;
        let mut view = TransactionStateView {
            ended: state.ended,
            end_seq: &mut state.end_seq,
            segments: &mut state.segments,
        };
        f(&mut view)
    }

    pub(crate) fn segment_entry(&self, segment: &SegmentState) -> SegmentEntry {
        SegmentEntry {
            trace_id: self.inner.trace_id.clone(),
            transaction: self.inner.name.clone(),
            segment: segment.render(self.inner.app.masker()),
        }
    }

    fn mutate(&self, f: impl FnOnce(&mut TransactionState)) {
        let mut state = self.inner.state.lock();
        if !state.ended {
            f(&mut state);
        }
    }

    fn drain_split_segments(&self, state: &mut TransactionState) -> Vec<SegmentEntry> {
        let mut pending: Vec<&mut SegmentState> = state
            .segments
            .iter_mut()
            .filter(|segment| !segment.is_emitted() && !segment.is_detached())
            .collect();
        pending.sort_by_key(|segment| segment.end_seq());
        pending
            .into_iter()
            .map(|segment| {
                segment.mark_emitted();
                self.segment_entry(segment)
            })
            .collect()
    }

    fn build_record(&self, state: &TransactionState) -> TransactionRecord {
        let app = &self.inner.app;
        let masker = app.masker();
        let level = RecordLevel::for_classification(state.classification);

        let mut folded: Vec<&SegmentState> = state
            .segments
            .iter()
            .filter(|segment| !segment.is_emitted() && !segment.is_detached())
            .collect();
        folded.sort_by_key(|segment| segment.end_seq());

        let request = state.request.as_ref();
        TransactionRecord {
            trace_id: self.inner.trace_id.clone(),
            name: self.inner.name.clone(),
            kind: self.inner.kind,
            app: app.name().to_owned(),
            service: app.service().to_owned(),
            tags: app.tags().to_vec(),
            start: self.inner.started_at,
            latency_ms: self.inner.start.elapsed().as_secs_f64() * 1000.0,
            method: request.map(|r| r.method.clone()),
            url: request.map(|r| r.url.clone()),
            host: request.map(|r| r.host.clone()).filter(|h| !h.is_empty()),
            status: state.response.status,
            request_headers: surface_headers(app, request.map_or(&[][..], |r| &r.headers)),
            response_headers: surface_headers(app, &state.response.headers),
            request_body: state.request_body.render(masker),
            response_body: state.response_body.render(masker),
            error_kind: state.classification,
            error: state.error.as_ref().map(|error| error.render(masker)),
            level,
            message: level.message().to_owned(),
            segments: folded.into_iter().map(|segment| segment.render(masker)).collect(),
        }
    }
}

/// Mutable view of the segment arena handed to [`Segment`]
pub(crate) struct TransactionStateView<'a> {
    pub(crate) ended: bool,
    pub(crate) end_seq: &'a mut u64,
    pub(crate) segments: &'a mut Vec<SegmentState>,
}

fn surface_headers(app: &Application, headers: &[(String, String)]) -> BTreeMap<String, String> {
    if app.debug() {
        return mask_headers(headers.iter().map(|(n, v)| (n.as_str(), v.as_str())))
            .into_iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value))
            .collect();
    }
    headers
        .iter()
        .filter(|(name, _)| app.header_allowed(name))
        .map(|(name, value)| (name.to_ascii_lowercase(), value.clone()))
        .collect()
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("trace_id", &self.inner.trace_id)
            .field("name", &self.inner.name)
            .field("kind", &self.inner.kind)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io;

    fn app(sink: &MemorySink) -> Application {
        Application::builder("billing")
            .service("api")
            .sink(sink.clone())
            .build()
    }

    #[test]
    fn end_is_idempotent() {
        let sink = MemorySink::new();
        let txn = app(&sink).start("job", TransactionKind::Other);
        assert_eq!(txn.end(), Some(RecordLevel::Info));
        assert_eq!(txn.end(), None);
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn mutators_are_ignored_after_end() {
        let sink = MemorySink::new();
        let txn = app(&sink).start("job", TransactionKind::Other);
        txn.end();
        txn.notice_internal("late");
        txn.set_response(500, Vec::new());
        assert_eq!(txn.classification(), Classification::None);
        assert_eq!(sink.transactions()[0].status, None);
    }

    #[test]
    fn most_severe_classification_wins() {
        let sink = MemorySink::new();
        let txn = app(&sink).start("job", TransactionKind::Other);
        txn.notice_error(&io::Error::other("db down"));
        txn.mark_business_error();
        assert_eq!(txn.end(), Some(RecordLevel::Error));
        let record = &sink.transactions()[0];
        assert_eq!(record.error_kind, Classification::Infrastructure);
        assert_eq!(record.error.as_ref().unwrap().message, "db down");
        assert_eq!(record.message, "internal server error");
    }

    #[test]
    fn business_error_is_warn() {
        let sink = MemorySink::new();
        let txn = app(&sink).start("job", TransactionKind::Other);
        txn.mark_business_error();
        assert_eq!(txn.end(), Some(RecordLevel::Warn));
        assert_eq!(sink.transactions()[0].message, "business error");
    }

    #[test]
    fn request_snapshot_is_last_write_wins() {
        let sink = MemorySink::new();
        let txn = app(&sink).start("job", TransactionKind::Other);
        txn.set_request_body(json!({"a": 1}));
        txn.set_request_body(json!({"a": 2}));
        txn.end();
        assert_eq!(sink.transactions()[0].request_body, json!({"a": 2}));
    }

    #[test]
    fn context_round_trip() {
        let sink = MemorySink::new();
        let app = app(&sink);
        let txn = app.start("job", TransactionKind::Other);
        let ctx = txn.to_context(&Context::new());
        let found = from_context(&ctx).unwrap();
        assert_eq!(found.trace_id(), txn.trace_id());
        assert_eq!(ctx.trace_id(&app.trace_config().key), Some(txn.trace_id()));
        assert!(from_context(&Context::new()).is_none());
    }
}
