// ABOUTME: Structured records emitted when transactions and segments end
// ABOUTME: Payload capture, error capture and level selection for emitted records
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 txlog contributors

use std::collections::BTreeMap;
use std::error::Error as StdError;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use txlog_core::{Classification, Masker};

/// What triggered a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Inbound HTTP request
    Http,
    /// Message delivered by a broker
    Consumer,
    /// Anything else (jobs, CLI runs, gRPC calls)
    Other,
}

impl TransactionKind {
    /// Lowercase name used in records
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Consumer => "consumer",
            Self::Other => "other",
        }
    }
}

/// What a segment measured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    /// Database statement
    Database,
    /// Outbound API call
    Api,
    /// Free-form child operation
    Other,
    /// Outcome of one consumer handler
    ConsumerDetail,
}

/// Level a record is emitted at
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordLevel {
    /// Completed without error
    Info,
    /// Business error
    Warn,
    /// Infrastructure or internal error
    Error,
}

impl RecordLevel {
    /// Level for an outcome classification
    #[must_use]
    pub const fn for_classification(classification: Classification) -> Self {
        match classification {
            Classification::None => Self::Info,
            Classification::Business => Self::Warn,
            Classification::Infrastructure | Classification::Internal => Self::Error,
        }
    }

    /// Canned message attached to records at this level
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::Info => "transaction completed",
            Self::Warn => "business error",
            Self::Error => "internal server error",
        }
    }
}

/// A captured request or response body
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Payload {
    /// Nothing captured
    #[default]
    Empty,
    /// Structured JSON, subject to every masking rule
    Json(Value),
    /// Non-JSON text, recorded as-is
    Text(String),
    /// Binary content, only its length is recorded
    Binary(usize),
}

impl Payload {
    /// Capture any serializable value as JSON
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Self {
        serde_json::to_value(value)
            .map_or_else(|e| Self::Text(format!("<unserializable: {e}>")), Self::Json)
    }

    /// Capture raw bytes, preferring JSON, then UTF-8 text
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        if bytes.is_empty() {
            return Self::Empty;
        }
        if let Ok(value) = serde_json::from_slice::<Value>(bytes) {
            return Self::Json(value);
        }
        std::str::from_utf8(bytes).map_or(Self::Binary(bytes.len()), |text| {
            Self::Text(text.to_owned())
        })
    }

    /// Whether nothing was captured
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub(crate) fn render(&self, masker: &Masker) -> Value {
        match self {
            Self::Empty => Value::Null,
            Self::Json(value) => masker.mask(value),
            Self::Text(text) => Value::String(text.clone()),
            Self::Binary(len) => json!({ "binary": true, "bytes": len }),
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        if text.is_empty() {
            Self::Empty
        } else {
            Self::Text(text)
        }
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::from(text.to_owned())
    }
}

/// An error captured on a transaction or segment
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedError {
    /// Top-level message
    pub message: String,
    /// Cause chain, outermost first
    pub stack: Vec<String>,
    /// Structured details, masked on emission
    pub payload: Option<Value>,
}

impl CapturedError {
    /// Error with only a message
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: Vec::new(),
            payload: None,
        }
    }

    /// Capture a standard error and its source chain
    #[must_use]
    pub fn from_error<E>(error: &E) -> Self
    where
        E: StdError + ?Sized,
    {
        let mut stack = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            stack.push(cause.to_string());
            source = cause.source();
        }
        Self {
            message: error.to_string(),
            stack,
            payload: None,
        }
    }

    /// Capture an `anyhow` error and its context chain
    #[must_use]
    pub fn from_anyhow(error: &anyhow::Error) -> Self {
        Self {
            message: error.to_string(),
            stack: error.chain().skip(1).map(ToString::to_string).collect(),
            payload: None,
        }
    }

    /// Attach structured details
    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub(crate) fn render(&self, masker: &Masker) -> ErrorRecord {
        ErrorRecord {
            message: self.message.clone(),
            stack: self.stack.clone(),
            payload: self.payload.as_ref().map(|payload| masker.mask(payload)),
        }
    }
}

/// Error details as emitted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Top-level message
    pub message: String,
    /// Cause chain
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stack: Vec<String>,
    /// Masked structured details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

/// Kind-specific segment fields as emitted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentDetail {
    /// Database statement
    Database {
        /// Table name
        table: String,
        /// Statement text
        query: String,
    },
    /// Outbound call
    Api {
        /// HTTP method
        method: Option<String>,
        /// Target URL
        url: Option<String>,
        /// Response status
        status: Option<u16>,
        /// Masked request body
        request_body: Value,
        /// Masked response body
        response_body: Value,
    },
    /// Free-form extras (masked)
    Extras(Map<String, Value>),
}

/// One segment as emitted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentRecord {
    /// Segment name
    pub name: String,
    /// Segment kind
    pub kind: SegmentKind,
    /// Wall-clock start
    pub start: DateTime<Utc>,
    /// Duration in milliseconds
    pub latency_ms: f64,
    /// Outcome classification
    pub error_kind: Classification,
    /// Captured error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
    /// Kind-specific fields
    pub detail: SegmentDetail,
}

/// One transaction as emitted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Trace identifier
    pub trace_id: String,
    /// Route or topic name
    pub name: String,
    /// Trigger kind
    pub kind: TransactionKind,
    /// Application name
    pub app: String,
    /// Service tag
    pub service: String,
    /// Free labels
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Wall-clock start
    pub start: DateTime<Utc>,
    /// Duration in milliseconds
    pub latency_ms: f64,
    /// Request method
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Request URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Request host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Response status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Surfaced request headers
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub request_headers: BTreeMap<String, String>,
    /// Surfaced response headers
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub response_headers: BTreeMap<String, String>,
    /// Masked request body
    pub request_body: Value,
    /// Masked response body
    pub response_body: Value,
    /// Outcome classification
    pub error_kind: Classification,
    /// Captured error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
    /// Emission level
    pub level: RecordLevel,
    /// Level message
    pub message: String,
    /// Folded segments in end order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub segments: Vec<SegmentRecord>,
}

/// A segment emitted on its own when split-level output is enabled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentEntry {
    /// Parent trace identifier
    pub trace_id: String,
    /// Parent transaction name
    pub transaction: String,
    /// The segment
    #[serde(flatten)]
    pub segment: SegmentRecord,
}

/// Anything handed to a [`super::RecordSink`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum LogRecord {
    /// A finished transaction
    Transaction(TransactionRecord),
    /// A finished segment (split-level output only)
    Segment(SegmentEntry),
}

impl LogRecord {
    /// Level the record should be written at
    #[must_use]
    pub const fn level(&self) -> RecordLevel {
        match self {
            Self::Transaction(record) => record.level,
            Self::Segment(entry) => RecordLevel::for_classification(entry.segment.error_kind),
        }
    }

    /// Trace identifier of the owning transaction
    #[must_use]
    pub fn trace_id(&self) -> &str {
        match self {
            Self::Transaction(record) => &record.trace_id,
            Self::Segment(entry) => &entry.trace_id,
        }
    }

    /// The transaction record, if this is one
    #[must_use]
    pub const fn as_transaction(&self) -> Option<&TransactionRecord> {
        match self {
            Self::Transaction(record) => Some(record),
            Self::Segment(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn payload_from_bytes_prefers_json() {
        assert_eq!(Payload::from_bytes(b""), Payload::Empty);
        assert_eq!(
            Payload::from_bytes(br#"{"a":1}"#),
            Payload::Json(json!({"a": 1}))
        );
        assert_eq!(
            Payload::from_bytes(b"a=1&b=2"),
            Payload::Text("a=1&b=2".into())
        );
        assert_eq!(Payload::from_bytes(&[0xff, 0xfe, 0x00]), Payload::Binary(3));
    }

    #[test]
    fn captured_error_keeps_cause_chain() {
        let inner = io::Error::other("disk full");
        let outer = anyhow::Error::new(inner).context("write failed");
        let captured = CapturedError::from_anyhow(&outer);
        assert_eq!(captured.message, "write failed");
        assert_eq!(captured.stack, vec!["disk full".to_owned()]);
    }

    #[test]
    fn level_follows_classification() {
        assert_eq!(
            RecordLevel::for_classification(Classification::None),
            RecordLevel::Info
        );
        assert_eq!(
            RecordLevel::for_classification(Classification::Business),
            RecordLevel::Warn
        );
        assert_eq!(
            RecordLevel::for_classification(Classification::Internal),
            RecordLevel::Error
        );
        assert_eq!(RecordLevel::Error.message(), "internal server error");
    }
}
