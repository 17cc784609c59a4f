// ABOUTME: Request-derived values placed in the handler context
// ABOUTME: Query parameters, path parameters and the request head
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 txlog contributors

use std::collections::HashMap;

use http::{HeaderMap, Method, Uri};
use serde::de::DeserializeOwned;

use super::query::bind_pairs;

/// Decoded query string; keys may repeat
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    /// Decode a raw query string (without the leading `?`)
    #[must_use]
    pub fn parse(query: &str) -> Self {
        Self {
            pairs: url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect(),
        }
    }

    /// First value of `key`
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Every value of `key` in order
    #[must_use]
    pub fn get_all(&self, key: &str) -> Vec<&str> {
        self.pairs
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Raw decoded pairs
    #[must_use]
    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    /// Bind into a struct; see [`super::bind_query`]
    #[must_use]
    pub fn bind<T: DeserializeOwned + Default>(&self) -> T {
        bind_pairs(&self.pairs)
    }
}

/// Values captured by `{name}` route segments
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams(HashMap<String, String>);

impl PathParams {
    pub(crate) fn from_map(map: HashMap<String, String>) -> Self {
        Self(map)
    }

    /// Captured value of `name`
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Number of captured values
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether nothing was captured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Method, URI and headers of the request being handled
#[derive(Debug, Clone)]
pub struct RequestHead {
    /// Request method
    pub method: Method,
    /// Request URI
    pub uri: Uri,
    /// Request headers
    pub headers: HeaderMap,
}

impl RequestHead {
    pub(crate) fn from_parts(parts: &http::request::Parts) -> Self {
        Self {
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            headers: parts.headers.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_params_keep_repeats_and_decode() {
        let params = QueryParams::parse("tag=a&tag=b%20c&name=x+y");
        assert_eq!(params.get("tag"), Some("a"));
        assert_eq!(params.get_all("tag"), vec!["a", "b c"]);
        assert_eq!(params.get("name"), Some("x y"));
        assert_eq!(params.get("missing"), None);
    }
}
