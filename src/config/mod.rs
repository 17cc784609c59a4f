// ABOUTME: Environment-driven configuration for the HTTP server, subscriptions and the application
// ABOUTME: Shared parsing helpers for booleans, durations and comma-separated lists
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 txlog contributors

//! Configuration loading.
//!
//! Every loader reads the process environment once and reports the offending
//! variable name when a value cannot be parsed.

/// Application identity, trace transport and masking rules
pub mod application;
/// HTTP server listen address, timeouts and TLS material
pub mod environment;
/// Subscription runtime tuning
pub mod subscribe;

pub use application::ApplicationConfig;
pub use environment::{ServerConfig, TlsConfig, TlsSource};
pub use subscribe::SubscribeConfig;

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

/// Parse the textual boolean forms `true/false`, `1/0`, `on/off`, `yes/no`
#[must_use]
pub fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "on" | "yes"
    )
}

/// Parse a duration such as `250ms`, `5s`, `10m`, `1h` or bare seconds
///
/// # Errors
///
/// Returns an error when the number or the unit is not recognized
pub fn parse_duration(value: &str) -> Result<Duration> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(split);
    let amount: u64 = number
        .parse()
        .with_context(|| format!("invalid duration '{value}'"))?;
    match unit.trim() {
        "" | "s" => Ok(Duration::from_secs(amount)),
        "ms" => Ok(Duration::from_millis(amount)),
        "m" => Ok(Duration::from_secs(amount * 60)),
        "h" => Ok(Duration::from_secs(amount * 60 * 60)),
        other => Err(anyhow!("invalid duration unit '{other}' in '{value}'")),
    }
}

/// Split a comma-separated list, dropping blanks
#[must_use]
pub fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Get environment variable or default value
fn env_var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env::var(key).map_or(Ok(default), |raw| {
        raw.trim()
            .parse()
            .with_context(|| format!("Invalid {key} value"))
    })
}

fn env_duration(key: &str, default: Duration) -> Result<Duration> {
    env::var(key).map_or(Ok(default), |raw| {
        parse_duration(&raw).with_context(|| format!("Invalid {key} value"))
    })
}

/// Unset, blank or zero durations mean "no limit"
fn env_optional_duration(key: &str) -> Result<Option<Duration>> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => parse_duration(&raw)
            .with_context(|| format!("Invalid {key} value"))
            .map(|d| Some(d).filter(|d| !d.is_zero())),
        _ => Ok(None),
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key).map_or(default, |raw| parse_bool(&raw))
}
