// ABOUTME: Application identity, trace transport, header allow-list and masking rules from env
// ABOUTME: Produces an ApplicationBuilder so callers can still inject the record sink
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 txlog contributors

use std::env;

use anyhow::{Context, Result};
use txlog_core::constants::trace;
use txlog_core::MaskingConfig;

use super::{env_bool, env_var_or, parse_list};
use crate::application::{Application, ApplicationBuilder, TraceConfig};
use crate::context::TraceKey;

/// Application settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Service tag
    pub service: String,
    /// Free labels
    pub tags: Vec<String>,
    /// Surface every header and log unmatched routes
    pub debug: bool,
    /// Emit segments as their own records
    pub split_level: bool,
    /// Trace transport
    pub trace: TraceConfig,
    /// Headers surfaced in records
    pub header_allow_list: Vec<String>,
    /// Ordered masking rules
    pub masking: Vec<MaskingConfig>,
}

impl ApplicationConfig {
    /// Load configuration from environment variables
    ///
    /// `LOG_MASKING_RULES` holds a JSON array of masking rules, e.g.
    /// `[{"selector": {"field": "password"}, "kind": "full"}]`.
    ///
    /// # Errors
    ///
    /// Returns an error when `LOG_MASKING_RULES` is not a valid rule array
    pub fn from_env() -> Result<Self> {
        let name = env_var_or("APP_NAME", "txlog");
        let masking = match env::var("LOG_MASKING_RULES") {
            Ok(raw) if !raw.trim().is_empty() => serde_json::from_str::<Vec<MaskingConfig>>(&raw)
                .context("Invalid LOG_MASKING_RULES value")?,
            _ => Vec::new(),
        };

        Ok(Self {
            service: env_var_or("APP_SERVICE", &name),
            name,
            tags: parse_list(&env_var_or("APP_TAGS", "")),
            debug: env_bool("APP_DEBUG", false),
            split_level: env_bool("LOG_SPLIT_LEVEL", false),
            trace: TraceConfig {
                key: TraceKey::new(env_var_or("TRACE_ID_KEY", trace::DEFAULT_CONTEXT_KEY)),
                header: env_var_or("TRACE_ID_HEADER", trace::DEFAULT_HEADER),
                via_header: env_bool("TRACE_ID_VIA_HEADER", false),
            },
            header_allow_list: parse_list(&env_var_or("LOG_HEADER_ALLOW_LIST", "")),
            masking,
        })
    }

    /// Builder seeded with these settings
    #[must_use]
    pub fn into_builder(self) -> ApplicationBuilder {
        let builder = Application::builder(self.name)
            .service(self.service)
            .debug(self.debug)
            .split_level(self.split_level)
            .trace_config(self.trace)
            .masking_rules(self.masking);
        let builder = self.tags.into_iter().fold(builder, ApplicationBuilder::tag);
        self.header_allow_list
            .into_iter()
            .fold(builder, ApplicationBuilder::allow_header)
    }
}
