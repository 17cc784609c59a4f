// ABOUTME: Minimal JSONPath compiler and evaluator used by masking rules
// ABOUTME: Supports child, index, wildcard, quoted-key, and recursive-descent steps
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 txlog contributors

//! A small `JSONPath` subset sufficient for selecting fields to mask:
//!
//! | Syntax | Meaning |
//! |--------|---------|
//! | `$` | the root |
//! | `.name`, `['name']` | object member |
//! | `[3]`, `[-1]` | array element (negative counts from the end) |
//! | `.*`, `[*]` | every member or element |
//! | `..name`, `..*` | recursive descent |
//!
//! Evaluation returns the concrete locations of the selected nodes so the
//! caller can rewrite them on a copy of the document.

use serde_json::Value;
use thiserror::Error;

/// One step in a concrete location inside a JSON document
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathElem {
    /// Object member
    Key(String),
    /// Array element
    Index(usize),
}

/// Error raised when an expression falls outside the supported subset
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid JSONPath expression at byte {position}: {reason}")]
pub struct JsonPathError {
    /// Byte offset of the offending character
    pub position: usize,
    /// What was expected
    pub reason: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Child(String),
    Index(i64),
    Wildcard,
    Descendant(String),
    DescendantWildcard,
}

/// Compiled `JSONPath` expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPath {
    steps: Vec<Step>,
}

impl JsonPath {
    /// Compile an expression.
    ///
    /// # Errors
    ///
    /// Returns [`JsonPathError`] when the expression does not start with `$`
    /// or uses syntax outside the supported subset.
    pub fn parse(expr: &str) -> Result<Self, JsonPathError> {
        Parser::new(expr.trim()).parse()
    }

    /// Locations of every node selected in `root`
    #[must_use]
    pub fn select(&self, root: &Value) -> Vec<Vec<PathElem>> {
        let mut current: Vec<(Vec<PathElem>, &Value)> = vec![(Vec::new(), root)];
        for step in &self.steps {
            let mut next = Vec::new();
            for (path, node) in &current {
                let node = *node;
                match step {
                    Step::Child(name) => {
                        if let Some(child) = node.as_object().and_then(|map| map.get(name)) {
                            next.push((extend(path, PathElem::Key(name.clone())), child));
                        }
                    }
                    Step::Index(index) => {
                        if let Some(items) = node.as_array() {
                            if let Some(position) = resolve_index(*index, items.len()) {
                                next.push((extend(path, PathElem::Index(position)), &items[position]));
                            }
                        }
                    }
                    Step::Wildcard => push_children(path, node, &mut next),
                    Step::Descendant(name) => collect_descendants(path, node, Some(name), &mut next),
                    Step::DescendantWildcard => collect_descendants(path, node, None, &mut next),
                }
            }
            current = next;
        }
        current.into_iter().map(|(path, _)| path).collect()
    }
}

fn extend(path: &[PathElem], elem: PathElem) -> Vec<PathElem> {
    let mut extended = Vec::with_capacity(path.len() + 1);
    extended.extend_from_slice(path);
    extended.push(elem);
    extended
}

fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let resolved = if index < 0 { len + index } else { index };
    if (0..len).contains(&resolved) {
        usize::try_from(resolved).ok()
    } else {
        None
    }
}

fn push_children<'v>(path: &[PathElem], node: &'v Value, out: &mut Vec<(Vec<PathElem>, &'v Value)>) {
    match node {
        Value::Object(map) => {
            for (key, child) in map {
                out.push((extend(path, PathElem::Key(key.clone())), child));
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                out.push((extend(path, PathElem::Index(index)), child));
            }
        }
        _ => {}
    }
}

fn collect_descendants<'v>(
    path: &[PathElem],
    node: &'v Value,
    name: Option<&String>,
    out: &mut Vec<(Vec<PathElem>, &'v Value)>,
) {
    match node {
        Value::Object(map) => {
            for (key, child) in map {
                let child_path = extend(path, PathElem::Key(key.clone()));
                if name.is_none_or(|wanted| wanted == key) {
                    out.push((child_path.clone(), child));
                }
                collect_descendants(&child_path, child, name, out);
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                let child_path = extend(path, PathElem::Index(index));
                if name.is_none() {
                    out.push((child_path.clone(), child));
                }
                collect_descendants(&child_path, child, name, out);
            }
        }
        _ => {}
    }
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    const fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn error(&self, reason: &'static str) -> JsonPathError {
        JsonPathError {
            position: self.pos,
            reason,
        }
    }

    fn parse(mut self) -> Result<JsonPath, JsonPathError> {
        if self.bump() != Some('$') {
            return Err(self.error("expression must start with '$'"));
        }
        let mut steps = Vec::new();
        while let Some(ch) = self.peek() {
            match ch {
                '.' => {
                    self.bump();
                    if self.peek() == Some('.') {
                        self.bump();
                        steps.push(self.descendant()?);
                    } else if self.peek() == Some('*') {
                        self.bump();
                        steps.push(Step::Wildcard);
                    } else {
                        steps.push(Step::Child(self.identifier()?));
                    }
                }
                '[' => {
                    self.bump();
                    steps.push(self.bracket()?);
                }
                _ => return Err(self.error("expected '.' or '['")),
            }
        }
        Ok(JsonPath { steps })
    }

    fn descendant(&mut self) -> Result<Step, JsonPathError> {
        match self.peek() {
            Some('*') => {
                self.bump();
                Ok(Step::DescendantWildcard)
            }
            Some('[') => {
                self.bump();
                match self.bracket()? {
                    Step::Child(name) => Ok(Step::Descendant(name)),
                    Step::Wildcard => Ok(Step::DescendantWildcard),
                    _ => Err(self.error("recursive descent supports names and '*' only")),
                }
            }
            _ => Ok(Step::Descendant(self.identifier()?)),
        }
    }

    fn identifier(&mut self) -> Result<String, JsonPathError> {
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if ch == '.' || ch == '[' {
                break;
            }
            self.bump();
        }
        if self.pos == start {
            return Err(self.error("expected a member name"));
        }
        Ok(self.input[start..self.pos].to_owned())
    }

    fn bracket(&mut self) -> Result<Step, JsonPathError> {
        let step = match self.peek() {
            Some('*') => {
                self.bump();
                Step::Wildcard
            }
            Some(quote @ ('\'' | '"')) => {
                self.bump();
                let start = self.pos;
                while let Some(ch) = self.peek() {
                    if ch == quote {
                        break;
                    }
                    self.bump();
                }
                let name = self.input[start..self.pos].to_owned();
                if self.bump() != Some(quote) {
                    return Err(self.error("unterminated quoted member name"));
                }
                Step::Child(name)
            }
            Some(_) => {
                let start = self.pos;
                while let Some(ch) = self.peek() {
                    if ch == ']' {
                        break;
                    }
                    self.bump();
                }
                let index = self.input[start..self.pos]
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| self.error("expected an array index"))?;
                Step::Index(index)
            }
            None => return Err(self.error("unexpected end of expression")),
        };
        if self.bump() != Some(']') {
            return Err(self.error("expected ']'"));
        }
        Ok(step)
    }
}
