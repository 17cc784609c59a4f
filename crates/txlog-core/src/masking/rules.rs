// ABOUTME: Masking rule configuration with field-name and JSONPath selectors
// ABOUTME: Deserializable rule definitions loaded from application configuration
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 txlog contributors

use serde::{Deserialize, Serialize};

use super::strategies::{email_mask, full_mask, partial_mask};

/// How a matched string is rewritten
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskKind {
    /// Whole value replaced with the redaction token
    Full,
    /// Leading and trailing characters kept, interior hidden
    Partial,
    /// Username partially hidden, domain kept
    Email,
}

/// Which fields a rule applies to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selector {
    /// Object keys containing this pattern, compared case-insensitively
    Field(String),
    /// `JSONPath` expression evaluated against JSON payloads
    JsonPath(String),
}

/// One masking rule.
///
/// ```
/// use txlog_core::masking::{MaskKind, MaskingConfig};
///
/// let rule: MaskingConfig = serde_json::from_str(
///     r#"{"selector": {"field": "email"}, "kind": "email", "show_first": 2, "show_last": 2}"#,
/// ).unwrap();
/// assert_eq!(rule.kind, MaskKind::Email);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskingConfig {
    /// Field selector
    pub selector: Selector,
    /// Masking strategy
    pub kind: MaskKind,
    /// Leading characters kept by partial and email masks
    #[serde(default)]
    pub show_first: usize,
    /// Trailing characters kept by partial and email masks
    #[serde(default)]
    pub show_last: usize,
}

impl MaskingConfig {
    /// Rule matching object keys that contain `pattern`
    #[must_use]
    pub fn field(pattern: impl Into<String>, kind: MaskKind) -> Self {
        Self {
            selector: Selector::Field(pattern.into()),
            kind,
            show_first: 0,
            show_last: 0,
        }
    }

    /// Rule matching the nodes selected by a `JSONPath` expression
    #[must_use]
    pub fn json_path(expr: impl Into<String>, kind: MaskKind) -> Self {
        Self {
            selector: Selector::JsonPath(expr.into()),
            kind,
            show_first: 0,
            show_last: 0,
        }
    }

    /// Set the number of leading and trailing characters left visible
    #[must_use]
    pub const fn show(mut self, first: usize, last: usize) -> Self {
        self.show_first = first;
        self.show_last = last;
        self
    }

    /// Apply this rule's strategy to a single string
    #[must_use]
    pub fn apply(&self, value: &str) -> String {
        match self.kind {
            MaskKind::Full => full_mask(value),
            MaskKind::Partial => partial_mask(value, self.show_first, self.show_last),
            MaskKind::Email => email_mask(value, self.show_first, self.show_last),
        }
    }
}
