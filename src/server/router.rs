// ABOUTME: Path-pattern routing with named and regex-constrained parameters
// ABOUTME: Routes are tried in registration order; a method match beats an earlier path-only match
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 txlog contributors

//! Route patterns.
//!
//! | Pattern            | Matches                                       |
//! |--------------------|-----------------------------------------------|
//! | `/users`           | the literal path                              |
//! | `/users/{id}`      | one non-empty segment, captured as `id`       |
//! | `/users/{id:[0-9]+}` | one segment matching the regex              |
//! | `/files/{path:.+}` | the rest of the path (regex able to match `/`) |
//!
//! Captured values are percent-decoded.

use std::collections::HashMap;
use std::sync::Arc;

use http::Method;
use regex::Regex;
use thiserror::Error;

use super::handler::Endpoint;
use super::middleware::Middleware;
use super::params::PathParams;

/// Invalid route pattern
#[derive(Debug, Error)]
pub enum RouteError {
    /// Parameter regex failed to compile
    #[error("invalid regex in route pattern {pattern}: {source}")]
    InvalidRegex {
        /// Offending pattern
        pattern: String,
        /// Compilation error
        #[source]
        source: regex::Error,
    },
    /// A parameter able to match `/` must be the final segment
    #[error("catch-all parameter must be the last segment of {0}")]
    CatchAllNotLast(String),
    /// Braces do not balance or a parameter has no name
    #[error("malformed route pattern {0}")]
    Malformed(String),
}

#[derive(Debug)]
enum PatternSegment {
    Literal(String),
    Param { name: String, regex: Option<Regex> },
    CatchAll { name: String, regex: Regex },
}

/// Compiled route pattern
#[derive(Debug)]
pub struct RoutePattern {
    raw: String,
    segments: Vec<PatternSegment>,
}

impl RoutePattern {
    /// Compile `pattern`
    ///
    /// # Errors
    ///
    /// Returns [`RouteError`] when a parameter regex does not compile, braces
    /// are unbalanced, or a catch-all parameter is not last
    pub fn parse(pattern: &str) -> Result<Self, RouteError> {
        let raw_segments = split_pattern(pattern)?;
        let last = raw_segments.len().saturating_sub(1);
        let mut segments = Vec::with_capacity(raw_segments.len());
        for (position, raw) in raw_segments.into_iter().enumerate() {
            let segment = parse_segment(pattern, &raw)?;
            if matches!(segment, PatternSegment::CatchAll { .. }) && position != last {
                return Err(RouteError::CatchAllNotLast(pattern.to_owned()));
            }
            segments.push(segment);
        }
        Ok(Self {
            raw: pattern.to_owned(),
            segments,
        })
    }

    /// Pattern as registered
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Match `path`, returning the captured parameters
    #[must_use]
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let parts: Vec<&str> = path.strip_prefix('/').unwrap_or(path).split('/').collect();
        let mut params = HashMap::new();
        for (index, segment) in self.segments.iter().enumerate() {
            match segment {
                PatternSegment::Literal(literal) => {
                    if parts.get(index) != Some(&literal.as_str()) {
                        return None;
                    }
                }
                PatternSegment::Param { name, regex } => {
                    let value = decode(parts.get(index)?)?;
                    if value.is_empty() || regex.as_ref().is_some_and(|re| !re.is_match(&value)) {
                        return None;
                    }
                    params.insert(name.clone(), value);
                }
                PatternSegment::CatchAll { name, regex } => {
                    let rest = parts.get(index..)?.join("/");
                    let value = decode(&rest)?;
                    if value.is_empty() || !regex.is_match(&value) {
                        return None;
                    }
                    params.insert(name.clone(), value);
                    return Some(params);
                }
            }
        }
        (parts.len() == self.segments.len()).then_some(params)
    }
}

fn decode(raw: &str) -> Option<String> {
    urlencoding::decode(raw).ok().map(std::borrow::Cow::into_owned)
}

/// Split on `/` outside of braces
fn split_pattern(pattern: &str) -> Result<Vec<String>, RouteError> {
    let trimmed = pattern.strip_prefix('/').unwrap_or(pattern);
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    for c in trimmed.chars() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| RouteError::Malformed(pattern.to_owned()))?;
            }
            '/' if depth == 0 => {
                segments.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    if depth != 0 {
        return Err(RouteError::Malformed(pattern.to_owned()));
    }
    segments.push(current);
    Ok(segments)
}

fn parse_segment(pattern: &str, raw: &str) -> Result<PatternSegment, RouteError> {
    let Some(inner) = raw.strip_prefix('{').and_then(|s| s.strip_suffix('}')) else {
        return Ok(PatternSegment::Literal(raw.to_owned()));
    };
    let (name, expr) = match inner.split_once(':') {
        Some((name, expr)) => (name.trim(), Some(expr)),
        None => (inner.trim(), None),
    };
    if name.is_empty() {
        return Err(RouteError::Malformed(pattern.to_owned()));
    }
    let Some(expr) = expr else {
        return Ok(PatternSegment::Param {
            name: name.to_owned(),
            regex: None,
        });
    };
    let regex = Regex::new(&format!("^(?:{expr})$")).map_err(|source| RouteError::InvalidRegex {
        pattern: pattern.to_owned(),
        source,
    })?;
    if regex.is_match("a/b") {
        Ok(PatternSegment::CatchAll {
            name: name.to_owned(),
            regex,
        })
    } else {
        Ok(PatternSegment::Param {
            name: name.to_owned(),
            regex: Some(regex),
        })
    }
}

pub(crate) struct Route {
    pub(crate) pattern: RoutePattern,
    pub(crate) endpoint: Arc<dyn Endpoint>,
    pub(crate) middleware: Arc<[Arc<dyn Middleware>]>,
}

/// Ordered route table
#[derive(Default)]
pub(crate) struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub(crate) fn push(&mut self, route: Route) {
        self.routes.push(route);
    }

    pub(crate) fn len(&self) -> usize {
        self.routes.len()
    }

    /// First route whose path and method match, else the first path match
    pub(crate) fn find(&self, method: &Method, path: &str) -> Option<(&Route, PathParams)> {
        let mut fallback = None;
        for route in &self.routes {
            let Some(params) = route.pattern.matches(path) else {
                continue;
            };
            if route.endpoint.method() == method {
                return Some((route, PathParams::from_map(params)));
            }
            if fallback.is_none() {
                fallback = Some((route, PathParams::from_map(params)));
            }
        }
        fallback
    }
}
