// ABOUTME: Process-wide application configuration and transaction factory
// ABOUTME: Holds naming, trace transport, masking rules, header allow-list and the record sink
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 txlog contributors

//! The [`Application`] is built once at startup and read-only afterwards.
//! Every transaction keeps a handle to it, so the handle is a cheap `Arc`
//! clone.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, OnceLock};

use txlog_core::constants::trace;
use txlog_core::{Masker, MaskingConfig};

use crate::context::TraceKey;
use crate::transaction::{RecordSink, TracingSink, Transaction, TransactionKind};

static GLOBAL: OnceLock<Application> = OnceLock::new();

/// Generate a fresh 128-bit trace identifier as 32 lowercase hex characters
#[must_use]
pub fn generate_trace_id() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}

/// How the trace identifier is carried
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceConfig {
    /// Context slot holding the trace id
    pub key: TraceKey,
    /// Header carrying the trace id across processes
    pub header: String,
    /// Read the inbound trace id from the header instead of the context
    pub via_header: bool,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            key: TraceKey::default(),
            header: trace::DEFAULT_HEADER.to_owned(),
            via_header: false,
        }
    }
}

struct AppInner {
    name: String,
    service: String,
    tags: Vec<String>,
    debug: bool,
    split_level: bool,
    trace: TraceConfig,
    masker: Masker,
    header_allow_list: HashSet<String>,
    sink: Arc<dyn RecordSink>,
}

/// Shared, immutable application configuration
#[derive(Clone)]
pub struct Application {
    inner: Arc<AppInner>,
}

impl Application {
    /// Start building an application named `name`
    #[must_use]
    pub fn builder(name: impl Into<String>) -> ApplicationBuilder {
        ApplicationBuilder::new(name)
    }

    /// Install as the process-global application.
    ///
    /// # Errors
    ///
    /// Returns the application back when one was already installed
    pub fn install(self) -> Result<(), Self> {
        GLOBAL.set(self)
    }

    /// The process-global application, if installed
    #[must_use]
    pub fn global() -> Option<&'static Self> {
        GLOBAL.get()
    }

    /// Application name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Service tag
    #[must_use]
    pub fn service(&self) -> &str {
        &self.inner.service
    }

    /// Free labels
    #[must_use]
    pub fn tags(&self) -> &[String] {
        &self.inner.tags
    }

    /// Debug flag: surfaces every header and logs unmatched routes
    #[must_use]
    pub fn debug(&self) -> bool {
        self.inner.debug
    }

    /// Emit segments as their own records
    #[must_use]
    pub fn split_level(&self) -> bool {
        self.inner.split_level
    }

    /// Trace transport configuration
    #[must_use]
    pub fn trace_config(&self) -> &TraceConfig {
        &self.inner.trace
    }

    /// Compiled masking rules
    #[must_use]
    pub fn masker(&self) -> &Masker {
        &self.inner.masker
    }

    /// Record sink shared by every transaction
    #[must_use]
    pub fn sink(&self) -> &Arc<dyn RecordSink> {
        &self.inner.sink
    }

    /// Whether the header `name` is surfaced in records
    #[must_use]
    pub fn header_allowed(&self, name: &str) -> bool {
        self.inner.debug
            || self
                .inner
                .header_allow_list
                .contains(&name.to_ascii_lowercase())
    }

    /// Open a transaction with a fresh trace id
    #[must_use]
    pub fn start(&self, name: impl Into<String>, kind: TransactionKind) -> Transaction {
        Transaction::new(self.clone(), generate_trace_id(), name.into(), kind)
    }

    /// Open a transaction of `kind`, inheriting `trace_id` when it is not blank
    #[must_use]
    pub fn start_traced(
        &self,
        trace_id: Option<&str>,
        name: impl Into<String>,
        kind: TransactionKind,
    ) -> Transaction {
        let trace_id = trace_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map_or_else(generate_trace_id, str::to_owned);
        Transaction::new(self.clone(), trace_id, name.into(), kind)
    }

    /// Open an HTTP transaction, inheriting `trace_id` when it is not blank
    #[must_use]
    pub fn start_http(&self, trace_id: Option<&str>, name: impl Into<String>) -> Transaction {
        self.start_traced(trace_id, name, TransactionKind::Http)
    }

    /// Open a consumer transaction; the correlation id doubles as trace id
    #[must_use]
    pub fn start_consumer(&self, correlation_id: &str) -> Transaction {
        self.start_consumer_for("consumer", correlation_id)
    }

    /// Open a consumer transaction named after `topic`
    #[must_use]
    pub fn start_consumer_for(&self, topic: impl Into<String>, correlation_id: &str) -> Transaction {
        let trace_id = if correlation_id.trim().is_empty() {
            generate_trace_id()
        } else {
            correlation_id.to_owned()
        };
        Transaction::new(self.clone(), trace_id, topic.into(), TransactionKind::Consumer)
    }
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application")
            .field("name", &self.inner.name)
            .field("service", &self.inner.service)
            .field("debug", &self.inner.debug)
            .field("split_level", &self.inner.split_level)
            .field("trace", &self.inner.trace)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Application`]
#[must_use]
pub struct ApplicationBuilder {
    name: String,
    service: String,
    tags: Vec<String>,
    debug: bool,
    split_level: bool,
    trace: TraceConfig,
    masking: Vec<MaskingConfig>,
    header_allow_list: Vec<String>,
    sink: Option<Arc<dyn RecordSink>>,
}

impl ApplicationBuilder {
    fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            service: name.clone(),
            name,
            tags: Vec::new(),
            debug: false,
            split_level: false,
            trace: TraceConfig::default(),
            masking: Vec::new(),
            header_allow_list: Vec::new(),
            sink: None,
        }
    }

    /// Service tag (defaults to the application name)
    pub fn service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }

    /// Add a free label
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Enable debug output
    pub const fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Emit segments as their own records
    pub const fn split_level(mut self, split_level: bool) -> Self {
        self.split_level = split_level;
        self
    }

    /// Replace the trace transport configuration
    pub fn trace_config(mut self, trace: TraceConfig) -> Self {
        self.trace = trace;
        self
    }

    /// Add a masking rule; rules are evaluated in insertion order
    pub fn masking_rule(mut self, rule: MaskingConfig) -> Self {
        self.masking.push(rule);
        self
    }

    /// Add several masking rules
    pub fn masking_rules(mut self, rules: impl IntoIterator<Item = MaskingConfig>) -> Self {
        self.masking.extend(rules);
        self
    }

    /// Surface the header `name` in records (case-insensitive)
    pub fn allow_header(mut self, name: impl Into<String>) -> Self {
        self.header_allow_list.push(name.into());
        self
    }

    /// Record sink (defaults to [`TracingSink`])
    pub fn sink<S: RecordSink>(mut self, sink: S) -> Self {
        self.sink = Some(Arc::new(sink));
        self
    }

    /// Record sink already shared elsewhere
    pub fn shared_sink(mut self, sink: Arc<dyn RecordSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Freeze the configuration
    pub fn build(self) -> Application {
        Application {
            inner: Arc::new(AppInner {
                name: self.name,
                service: self.service,
                tags: self.tags,
                debug: self.debug,
                split_level: self.split_level,
                trace: self.trace,
                masker: Masker::new(self.masking),
                header_allow_list: self
                    .header_allow_list
                    .iter()
                    .map(|name| name.trim().to_ascii_lowercase())
                    .collect(),
                sink: self.sink.unwrap_or_else(|| Arc::new(TracingSink)),
            }),
        }
    }
}
