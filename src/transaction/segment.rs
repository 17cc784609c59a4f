// ABOUTME: Child segments recording database, outbound API and free-form operations
// ABOUTME: Segments live in their parent's arena and are addressed by index
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 txlog contributors

use std::error::Error as StdError;
use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use txlog_core::{Classification, Masker};

use super::record::{CapturedError, Payload, SegmentDetail, SegmentKind, SegmentRecord};
use super::Transaction;

pub(super) enum SegmentData {
    Database {
        table: String,
        query: String,
    },
    Api {
        method: Option<String>,
        url: Option<String>,
        status: Option<u16>,
        request_body: Payload,
        response_body: Payload,
    },
    Extras(Map<String, Value>),
}

pub(crate) struct SegmentState {
    kind: SegmentKind,
    name: String,
    start: Instant,
    started_at: DateTime<Utc>,
    data: SegmentData,
    classification: Classification,
    error: Option<CapturedError>,
    latency: Option<Duration>,
    end_seq: Option<u64>,
    emitted: bool,
    detached: bool,
}

impl SegmentState {
    pub(super) fn new(
        kind: SegmentKind,
        name: String,
        start: Instant,
        started_at: DateTime<Utc>,
        data: SegmentData,
        detached: bool,
    ) -> Self {
        Self {
            kind,
            name,
            start,
            started_at,
            data,
            classification: Classification::None,
            error: None,
            latency: None,
            end_seq: None,
            emitted: false,
            detached,
        }
    }

    pub(super) const fn is_ended(&self) -> bool {
        self.end_seq.is_some()
    }

    pub(super) const fn is_emitted(&self) -> bool {
        self.emitted
    }

    pub(super) const fn is_detached(&self) -> bool {
        self.detached
    }

    pub(super) fn end_seq(&self) -> u64 {
        self.end_seq.unwrap_or(u64::MAX)
    }

    pub(super) fn mark_emitted(&mut self) {
        self.emitted = true;
    }

    pub(super) fn finish(&mut self, seq: u64) {
        self.latency = Some(self.start.elapsed());
        self.end_seq = Some(seq);
    }

    pub(super) fn render(&self, masker: &Masker) -> SegmentRecord {
        let detail = match &self.data {
            SegmentData::Database { table, query } => SegmentDetail::Database {
                table: table.clone(),
                query: query.clone(),
            },
            SegmentData::Api {
                method,
                url,
                status,
                request_body,
                response_body,
            } => SegmentDetail::Api {
                method: method.clone(),
                url: url.clone(),
                status: *status,
                request_body: request_body.render(masker),
                response_body: response_body.render(masker),
            },
            SegmentData::Extras(extras) => match masker.mask(&Value::Object(extras.clone())) {
                Value::Object(masked) => SegmentDetail::Extras(masked),
                _ => SegmentDetail::Extras(Map::new()),
            },
        };
        SegmentRecord {
            name: self.name.clone(),
            kind: self.kind,
            start: self.started_at,
            latency_ms: self.latency.unwrap_or_default().as_secs_f64() * 1000.0,
            error_kind: self.classification,
            error: self.error.as_ref().map(|error| error.render(masker)),
            detail,
        }
    }
}

/// Handle to a child operation of a [`Transaction`].
///
/// Mutators are no-ops once the segment or its parent has ended.
#[derive(Clone)]
pub struct Segment {
    txn: Transaction,
    index: usize,
}

impl Segment {
    pub(super) const fn new(txn: Transaction, index: usize) -> Self {
        Self { txn, index }
    }

    /// Parent transaction
    #[must_use]
    pub const fn transaction(&self) -> &Transaction {
        &self.txn
    }

    /// Record the outbound request
    pub fn set_api_request(
        &self,
        method: impl Into<String>,
        url: impl Into<String>,
        body: impl Into<Payload>,
    ) {
        let (new_method, new_url, new_body) = (method.into(), url.into(), body.into());
        self.mutate(|state| {
            if let SegmentData::Api {
                method,
                url,
                request_body,
                ..
            } = &mut state.data
            {
                *method = Some(new_method);
                *url = Some(new_url);
                *request_body = new_body;
            }
        });
    }

    /// Record the outbound response
    pub fn set_api_response(&self, status: u16, body: impl Into<Payload>) {
        let new_body = body.into();
        self.mutate(|state| {
            if let SegmentData::Api {
                status: slot,
                response_body,
                ..
            } = &mut state.data
            {
                *slot = Some(status);
                *response_body = new_body;
            }
        });
    }

    /// Add a free-form field to an `other` or `consumer_detail` segment
    pub fn insert_extra(&self, key: impl Into<String>, value: Value) {
        let key = key.into();
        self.mutate(|state| {
            if let SegmentData::Extras(extras) = &mut state.data {
                extras.insert(key, value);
            }
        });
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

    /// Mark the operation as rejected by domain rules
    pub fn set_business_error(&self, error: &(dyn StdError + 'static)) {
        self.classify(
            Classification::Business,
            Some(CapturedError::from_error(error)),
        );
    }

    /// Escalate the segment classification
    pub fn classify(&self, classification: Classification, error: Option<CapturedError>) {
        self.mutate(|state| {
            if classification >= state.classification && error.is_some() {
                state.error = error;
            }
            state.classification = state.classification.escalate(classification);
        });
    }

    /// Close the segment.
    ///
    /// Returns `false` when the segment or its parent had already ended.
    pub fn end(&self) -> bool {
        let split = self.txn.application().split_level();
        let entry = self.txn.with_state(|view| {
            if view.ended {
                return None;
            }
            let state = view.segments.get_mut(self.index)?;
            if state.is_ended() || state.is_detached() {
                return None;
            }
            *view.end_seq += 1;
            state.finish(*view.end_seq);
            if split {
                state.mark_emitted();
                Some(Some(self.txn.segment_entry(state)))
            } else {
                Some(None)
            }
        });
        match entry {
            Some(Some(entry)) => {
                self.txn
                    .application()
                    .sink()
                    .emit(&super::LogRecord::Segment(entry));
                true
            }
            Some(None) => true,
            None => false,
        }
    }

    fn mutate(&self, f: impl FnOnce(&mut SegmentState)) {
        self.txn.with_state(|view| {
            if view.ended {
                return;
            }
            if let Some(state) = view.segments.get_mut(self.index) {
                if !state.is_ended() && !state.is_detached() {
                    f(state);
                }
            }
        });
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("trace_id", &self.txn.trace_id())
            .field("index", &self.index)
            .finish()
    }
}
