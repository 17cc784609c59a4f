// ABOUTME: Destinations for emitted transaction and segment records
// ABOUTME: Tracing-backed default sink, line-atomic JSON writer sink, and in-memory test sink
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 txlog contributors

//! Record sinks.
//!
//! ```text
//! Transaction::end() ──► RecordSink::emit(&LogRecord)
//!                           ├─► TracingSink  (default, routed by the tracing subscriber)
//!                           ├─► JsonLineSink (any io::Write, e.g. a rotating file)
//!                           └─► MemorySink   (testing)
//! ```
//!
//! Sinks are shared by every transaction in the process and must be safe to
//! call concurrently. A record is always written as one unit.

use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info, warn};

use super::record::{LogRecord, RecordLevel, SegmentEntry, TransactionRecord};

/// Destination for emitted records
pub trait RecordSink: Send + Sync + 'static {
    /// Write one record
    fn emit(&self, record: &LogRecord);
}

/// Forwards each record to `tracing` as one event at the record's level
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl RecordSink for TracingSink {
    fn emit(&self, record: &LogRecord) {
        let body = match serde_json::to_string(record) {
            Ok(body) => body,
            Err(e) => {
                error!(error = %e, trace_id = %record.trace_id(), "failed to serialize log record");
                return;
            }
        };
        let (name, message) = match record {
            LogRecord::Transaction(txn) => (txn.name.as_str(), txn.message.as_str()),
            LogRecord::Segment(entry) => (entry.segment.name.as_str(), "segment completed"),
        };
        match record.level() {
            RecordLevel::Info => {
                info!(target: "txlog::record", trace_id = %record.trace_id(), record_name = name, record = %body, "{message}");
            }
            RecordLevel::Warn => {
                warn!(target: "txlog::record", trace_id = %record.trace_id(), record_name = name, record = %body, "{message}");
            }
            RecordLevel::Error => {
                error!(target: "txlog::record", trace_id = %record.trace_id(), record_name = name, record = %body, "{message}");
            }
        }
    }
}

/// Writes each record as one JSON line to the wrapped writer
pub struct JsonLineSink<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send + 'static> JsonLineSink<W> {
    /// Wrap a writer
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Recover the writer
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W: Write + Send + 'static> RecordSink for JsonLineSink<W> {
    fn emit(&self, record: &LogRecord) {
        let mut line = match serde_json::to_vec(record) {
            Ok(line) => line,
            Err(e) => {
                error!(error = %e, trace_id = %record.trace_id(), "failed to serialize log record");
                return;
            }
        };
        line.push(b'\n');

        let mut writer = self.writer.lock();
        if let Err(e) = writer.write_all(&line).and_then(|()| writer.flush()) {
            error!(error = %e, trace_id = %record.trace_id(), "failed to write log record");
        }
    }
}

/// Keeps records in memory; clones share the same storage
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl MemorySink {
    /// Empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record emitted so far
    #[must_use]
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    /// Transaction records emitted so far
    #[must_use]
    pub fn transactions(&self) -> Vec<TransactionRecord> {
        self.records
            .lock()
            .iter()
            .filter_map(|record| record.as_transaction().cloned())
            .collect()
    }

    /// Segment records emitted on their own
    #[must_use]
    pub fn segments(&self) -> Vec<SegmentEntry> {
        self.records
            .lock()
            .iter()
            .filter_map(|record| match record {
                LogRecord::Segment(entry) => Some(entry.clone()),
                LogRecord::Transaction(_) => None,
            })
            .collect()
    }

    /// Number of records emitted so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether nothing was emitted
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Drop every stored record
    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl RecordSink for MemorySink {
    fn emit(&self, record: &LogRecord) {
        self.records.lock().push(record.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::record::SegmentKind;
    use crate::transaction::record::{SegmentDetail, SegmentRecord};
    use chrono::Utc;
    use txlog_core::Classification;

    fn segment_entry() -> LogRecord {
        LogRecord::Segment(SegmentEntry {
            trace_id: "t-1".into(),
            transaction: "job".into(),
            segment: SegmentRecord {
                name: "users".into(),
                kind: SegmentKind::Database,
                start: Utc::now(),
                latency_ms: 1.0,
                error_kind: Classification::None,
                error: None,
                detail: SegmentDetail::Database {
                    table: "users".into(),
                    query: "SELECT 1".into(),
                },
            },
        })
    }

    #[test]
    fn json_line_sink_writes_one_line_per_record() {
        let sink = JsonLineSink::new(Vec::new());
        sink.emit(&segment_entry());
        sink.emit(&segment_entry());
        let output = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["record"], "segment");
        assert_eq!(parsed["trace_id"], "t-1");
        assert_eq!(parsed["detail"]["database"]["table"], "users");
    }

    #[test]
    fn memory_sink_clones_share_storage() {
        let sink = MemorySink::new();
        let handle = sink.clone();
        sink.emit(&segment_entry());
        assert_eq!(handle.len(), 1);
        assert_eq!(handle.segments().len(), 1);
        assert!(handle.transactions().is_empty());
        handle.clear();
        assert!(sink.is_empty());
    }
}
