// ABOUTME: Core types for the txlog transaction logging toolkit
// ABOUTME: Foundation crate with masking, error classification, envelopes, and constants
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 txlog contributors

#![deny(unsafe_code)]

//! # txlog core
//!
//! Foundation crate shared by the `txlog` runtime. It is designed to change
//! infrequently so the runtime crate benefits from incremental compilation.
//!
//! ## Modules
//!
//! - **masking**: structural redaction of JSON payloads by field name and `JSONPath`
//! - **classification**: error classification driving log level selection
//! - **envelope**: the JSON error envelope written on HTTP failures
//! - **constants**: defaults shared by every component

/// Structural masking of sensitive string fields
pub mod masking;

/// Error classification for transactions and segments
pub mod classification;

/// JSON error envelope and framework error codes
pub mod envelope;

/// Toolkit-wide constants and defaults
pub mod constants;

pub use classification::Classification;
pub use envelope::{ErrorCode, ErrorEnvelope, ErrorMessage};
pub use masking::{MaskKind, Masker, MaskingConfig, Selector};
