// ABOUTME: Structural masking engine for request and response payloads
// ABOUTME: Applies ordered field-name and JSONPath rules to a deep copy of a JSON value
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 txlog contributors

//! Structural masking for log payloads
//!
//! This module provides:
//! - Ordered masking rules selected by field name or `JSONPath`
//! - Full, partial and email masking strategies
//! - HTTP header redaction for debug output
//!
//! Rules are evaluated in order and the first rule that selects a string leaf
//! decides how it is masked. Only strings are rewritten: numbers, booleans and
//! nulls keep their value, and the caller's value is never mutated.
//!
//! ## Usage
//!
//! ```rust
//! use serde_json::json;
//! use txlog_core::masking::{MaskKind, Masker, MaskingConfig};
//!
//! let masker = Masker::new(vec![
//!     MaskingConfig::field("password", MaskKind::Full),
//!     MaskingConfig::json_path("$.user.email", MaskKind::Email).show(2, 2),
//! ]);
//! let masked = masker.mask(&json!({
//!     "password": "hunter2",
//!     "user": {"email": "ana.banana@example.com", "age": 30}
//! }));
//! assert_eq!(masked["password"], "*******");
//! assert_eq!(masked["user"]["email"], "an*******na@example.com");
//! assert_eq!(masked["user"]["age"], 30);
//! ```
//!
//! Masking re-walks the whole document, so it costs O(size) extra work and is
//! only applied when a record is emitted.

mod jsonpath;
mod rules;
mod strategies;

pub use jsonpath::{JsonPath, JsonPathError, PathElem};
pub use rules::{MaskKind, MaskingConfig, Selector};
pub use strategies::{email_mask, full_mask, mask_headers, partial_mask};

use regex::{Regex, RegexBuilder};
use serde_json::Value;
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Clone)]
enum CompiledSelector {
    Field(Regex),
    JsonPath(JsonPath),
    Inert,
}

#[derive(Debug, Clone)]
struct CompiledRule {
    config: MaskingConfig,
    selector: CompiledSelector,
}

/// Ordered, pre-compiled set of masking rules
#[derive(Debug, Clone, Default)]
pub struct Masker {
    rules: Vec<CompiledRule>,
}

impl Masker {
    /// Compile a rule set. Selectors that fail to compile are kept as no-ops.
    #[must_use]
    pub fn new(configs: Vec<MaskingConfig>) -> Self {
        let rules = configs
            .into_iter()
            .map(|config| {
                let selector = compile(&config.selector);
                CompiledRule { config, selector }
            })
            .collect();
        Self { rules }
    }

    /// Whether no rule is configured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// The rules in evaluation order
    pub fn rules(&self) -> impl Iterator<Item = &MaskingConfig> {
        self.rules.iter().map(|rule| &rule.config)
    }

    /// Return a masked deep copy of `value`
    #[must_use]
    pub fn mask(&self, value: &Value) -> Value {
        let mut masked = value.clone();
        if self.rules.is_empty() {
            return masked;
        }

        let selections: Vec<Option<HashSet<Vec<PathElem>>>> = self
            .rules
            .iter()
            .map(|rule| match &rule.selector {
                CompiledSelector::JsonPath(path) => Some(path.select(value).into_iter().collect()),
                CompiledSelector::Field(_) | CompiledSelector::Inert => None,
            })
            .collect();

        let mut path = Vec::new();
        self.rewrite(&mut masked, &mut path, &selections);
        masked
    }

    /// Mask a raw string leaf reached through `key`, using field rules only.
    ///
    /// Used for payloads that are not JSON documents, such as form fields.
    #[must_use]
    pub fn mask_field(&self, key: &str, value: &str) -> String {
        self.rules
            .iter()
            .find(|rule| matches!(&rule.selector, CompiledSelector::Field(re) if re.is_match(key)))
            .map_or_else(|| value.to_owned(), |rule| rule.config.apply(value))
    }

    fn rewrite(
        &self,
        node: &mut Value,
        path: &mut Vec<PathElem>,
        selections: &[Option<HashSet<Vec<PathElem>>>],
    ) {
        match node {
            Value::String(text) => {
                if let Some(rule) = self.rule_for(path, selections) {
                    *text = rule.config.apply(text);
                }
            }
            Value::Array(items) => {
                for (index, item) in items.iter_mut().enumerate() {
                    path.push(PathElem::Index(index));
                    self.rewrite(item, path, selections);
                    path.pop();
                }
            }
            Value::Object(map) => {
                for (key, child) in map.iter_mut() {
                    path.push(PathElem::Key(key.clone()));
                    self.rewrite(child, path, selections);
                    path.pop();
                }
            }
            Value::Null | Value::Bool(_) | Value::Number(_) => {}
        }
    }

    fn rule_for(
        &self,
        path: &[PathElem],
        selections: &[Option<HashSet<Vec<PathElem>>>],
    ) -> Option<&CompiledRule> {
        self.rules
            .iter()
            .zip(selections)
            .find(|(rule, selected)| match (&rule.selector, selected) {
                (CompiledSelector::Field(pattern), _) => path
                    .iter()
                    .any(|elem| matches!(elem, PathElem::Key(key) if pattern.is_match(key))),
                (CompiledSelector::JsonPath(_), Some(selected)) => {
                    (0..=path.len()).any(|depth| selected.contains(&path[..depth]))
                }
                _ => false,
            })
            .map(|(rule, _)| rule)
    }
}

fn compile(selector: &Selector) -> CompiledSelector {
    match selector {
        Selector::Field(pattern) if pattern.trim().is_empty() => CompiledSelector::Inert,
        Selector::Field(pattern) => RegexBuilder::new(&regex::escape(pattern.trim()))
            .case_insensitive(true)
            .build()
            .map_or_else(
                |error| {
                    debug!(%error, pattern = %pattern, "masking field pattern ignored");
                    CompiledSelector::Inert
                },
                CompiledSelector::Field,
            ),
        Selector::JsonPath(expr) => JsonPath::parse(expr).map_or_else(
            |error| {
                debug!(%error, expr = %expr, "masking JSONPath ignored");
                CompiledSelector::Inert
            },
            CompiledSelector::JsonPath,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn first_matching_rule_wins_across_selector_kinds() {
        let masker = Masker::new(vec![
            MaskingConfig::json_path("$.card.number", MaskKind::Partial).show(2, 2),
            MaskingConfig::field("number", MaskKind::Full),
        ]);
        let masked = masker.mask(&json!({
            "card": {"number": "4111222233334444"},
            "phone": {"number": "5550100"}
        }));
        assert_eq!(masked["card"]["number"], "41************44");
        assert_eq!(masked["phone"]["number"], full_mask("5550100"));

        let reversed = Masker::new(vec![
            MaskingConfig::field("number", MaskKind::Full),
            MaskingConfig::json_path("$.card.number", MaskKind::Partial).show(2, 2),
        ]);
        let masked = reversed.mask(&json!({"card": {"number": "4111222233334444"}}));
        assert_eq!(masked["card"]["number"], full_mask("4111222233334444"));
    }

    #[test]
    fn field_names_match_case_insensitively() {
        let masker = Masker::new(vec![MaskingConfig::field("password", MaskKind::Full)]);
        let masked = masker.mask(&json!({
            "Password": "a",
            "user_PASSWORD_hash": "b",
            "login": "ana"
        }));
        assert_eq!(masked["Password"], full_mask("a"));
        assert_eq!(masked["user_PASSWORD_hash"], full_mask("b"));
        assert_eq!(masked["login"], "ana");
        assert_eq!(masker.mask_field("PassWord", "s3cret"), full_mask("s3cret"));
    }

    #[test]
    fn only_string_leaves_are_rewritten() {
        let masker = Masker::new(vec![
            MaskingConfig::field("secret", MaskKind::Full),
            MaskingConfig::json_path("$.pin", MaskKind::Full),
        ]);
        let input = json!({
            "secret": {"count": 3, "enabled": true, "missing": null, "tags": ["x", 7]},
            "pin": 1234
        });
        let masked = masker.mask(&input);
        assert_eq!(masked["secret"]["count"], 3);
        assert_eq!(masked["secret"]["enabled"], true);
        assert_eq!(masked["secret"]["missing"], Value::Null);
        assert_eq!(masked["secret"]["tags"], json!([full_mask("x"), 7]));
        assert_eq!(masked["pin"], 1234);
    }

    #[test]
    fn input_value_is_left_untouched() {
        let masker = Masker::new(vec![MaskingConfig::field("token", MaskKind::Full)]);
        let input = json!({"token": "abc", "nested": [{"token": "def"}]});
        let before = input.clone();
        let masked = masker.mask(&input);
        assert_eq!(input, before);
        assert_ne!(masked, input);
    }

    #[test]
    fn unusable_selectors_mask_nothing() {
        let masker = Masker::new(vec![
            MaskingConfig::json_path("user.email", MaskKind::Full),
            MaskingConfig::json_path("$.cards[", MaskKind::Full),
            MaskingConfig::field("   ", MaskKind::Full),
        ]);
        assert!(!masker.is_empty());
        assert_eq!(masker.rules().count(), 3);
        let input = json!({"user": {"email": "ana@example.com"}, "cards": ["4111"]});
        assert_eq!(masker.mask(&input), input);
        assert_eq!(masker.mask_field("email", "ana@example.com"), "ana@example.com");
    }
}
