// ABOUTME: Error types for the server, broker, publish and subscribe subsystems
// ABOUTME: Re-exports the framework error codes and JSON envelope from txlog-core
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 txlog contributors

//! # Error handling
//!
//! Each subsystem has its own `thiserror` enum. Opaque user failures
//! (handler and consumer errors) travel as [`anyhow::Error`] and are only
//! inspected for their message and cause chain when a transaction records
//! them.
//!
//! Outcome severity is tracked separately by [`Classification`], which decides
//! the level of the emitted transaction record.

use std::any::Any;
use std::fmt;
use std::io;
use std::net::SocketAddr;

use thiserror::Error;

pub use txlog_core::{Classification, ErrorCode, ErrorEnvelope, ErrorMessage};

/// Failures reported by a message broker implementation
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    /// Dialing the broker failed
    #[error("broker connection failed: {0}")]
    Connect(String),
    /// Opening or configuring a channel failed
    #[error("broker channel error: {0}")]
    Channel(String),
    /// Exchange or queue declaration failed
    #[error("declare failed for {name}: {reason}")]
    Declare {
        /// Exchange or queue name
        name: String,
        /// Broker-supplied reason
        reason: String,
    },
    /// Publishing a message failed
    #[error("publish to exchange {exchange} failed: {reason}")]
    Publish {
        /// Target exchange
        exchange: String,
        /// Broker-supplied reason
        reason: String,
    },
    /// Acknowledging or rejecting a delivery failed
    #[error("acknowledgement failed: {0}")]
    Acknowledge(String),
    /// The connection or channel was closed
    #[error("broker connection closed")]
    Closed,
}

/// A single failed validation rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Field that failed validation
    pub field: String,
    /// Human readable reason
    pub message: String,
}

/// Payload validation failures collected by [`crate::messaging::Validate`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Error)]
pub struct ValidationErrors {
    /// Every rule that failed, in declaration order
    pub errors: Vec<FieldError>,
}

impl ValidationErrors {
    /// Empty collection
    #[must_use]
    pub const fn new() -> Self {
        Self { errors: Vec::new() }
    }

    /// Record a failed rule
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Whether no rule failed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// `Ok(())` when empty, otherwise `Err(self)`
    ///
    /// # Errors
    ///
    /// Returns the collected failures when at least one rule failed
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("validation failed")?;
        for (index, error) in self.errors.iter().enumerate() {
            let sep = if index == 0 { ": " } else { "; " };
            write!(f, "{sep}{} {}", error.field, error.message)?;
        }
        Ok(())
    }
}

/// Failures of [`crate::messaging::Publisher::publish`]
#[derive(Debug, Error)]
pub enum PublishError {
    /// The payload failed its own validation rules; nothing was published
    #[error(transparent)]
    Validation(#[from] ValidationErrors),
    /// The payload could not be encoded as JSON
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
    /// The broker rejected a step of the publish
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Failures that stop a subscription before it starts consuming
#[derive(Debug, Error)]
pub enum SubscribeError {
    /// The subscription was started without any handler
    #[error("no handlers registered for queue {0}")]
    NoHandlers(String),
    /// The queue or exchange name is empty
    #[error("queue and exchange names must not be empty")]
    MissingTopology,
}

/// Failure returned by a message handler
///
/// `Domain` failures are rejections by business rules and are never retried.
/// `Infrastructure` failures requeue the delivery until the retry budget of
/// its correlation id is spent.
#[derive(Debug, Error)]
pub enum ConsumeError {
    /// The message was understood and rejected
    #[error("domain error: {0}")]
    Domain(#[source] anyhow::Error),
    /// A dependency failed; the delivery may succeed later
    #[error("infrastructure error: {0}")]
    Infrastructure(#[source] anyhow::Error),
}

impl ConsumeError {
    /// Domain failure from any error
    pub fn domain(error: impl Into<anyhow::Error>) -> Self {
        Self::Domain(error.into())
    }

    /// Infrastructure failure from any error
    pub fn infrastructure(error: impl Into<anyhow::Error>) -> Self {
        Self::Infrastructure(error.into())
    }

    /// Whether the failure should be retried
    #[must_use]
    pub const fn is_infrastructure(&self) -> bool {
        matches!(self, Self::Infrastructure(_))
    }

    /// Underlying error
    #[must_use]
    pub const fn inner(&self) -> &anyhow::Error {
        match self {
            Self::Domain(error) | Self::Infrastructure(error) => error,
        }
    }
}

/// Failures of [`crate::server::Server::serve`]
#[derive(Debug, Error)]
pub enum ServeError {
    /// The listening socket could not be bound
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address
        addr: SocketAddr,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },
    /// Certificates or keys could not be loaded
    #[error("TLS configuration error: {0}")]
    Tls(String),
    /// The server loop failed
    #[error("server I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Message carried by a caught panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic with non-string payload".to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_display_lists_fields() {
        let mut errors = ValidationErrors::new();
        errors.add("name", "is required");
        errors.add("age", "must be positive");
        assert_eq!(
            errors.to_string(),
            "validation failed: name is required; age must be positive"
        );
        assert!(errors.into_result().is_err());
        assert!(ValidationErrors::new().into_result().is_ok());
    }

    #[test]
    fn publish_error_wraps_broker_error() {
        let error = PublishError::from(BrokerError::Closed);
        assert_eq!(error.to_string(), "broker connection closed");
    }

    #[test]
    fn panic_message_reads_str_and_string_payloads() {
        let payload = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let code = 7;
        let payload = std::panic::catch_unwind(|| panic!("code {code}")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "code 7");
    }
}
