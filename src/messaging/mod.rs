// ABOUTME: Message-driven work: broker abstraction, subscribe runtime and publish path
// ABOUTME: In-process MemoryBroker always available; LapinBroker behind the `amqp` feature
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 txlog contributors

//! Messaging.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use serde::Deserialize;
//! use tokio_util::sync::CancellationToken;
//! use txlog::config::SubscribeConfig;
//! use txlog::errors::ConsumeError;
//! use txlog::messaging::{handler_fn, MemoryBroker, SubscribeRuntime, Subscription};
//! use txlog::Application;
//!
//! #[derive(Deserialize)]
//! struct OrderPlaced {
//!     id: String,
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let app = Application::builder("orders").build();
//! let runtime = SubscribeRuntime::new(app, Arc::new(MemoryBroker::new()), SubscribeConfig::default());
//! let subscription = Subscription::new("orders.placed", "orders").handler(
//!     "audit",
//!     handler_fn(|_ctx, order: OrderPlaced| async move {
//!         if order.id.is_empty() {
//!             return Err(ConsumeError::domain(anyhow::anyhow!("missing id")));
//!         }
//!         Ok(())
//!     }),
//! );
//! runtime.run(subscription, CancellationToken::new()).await?;
//! # Ok(())
//! # }
//! ```

/// Broker, connection, channel and acknowledgement traits
pub mod broker;
/// AMQP broker over lapin
#[cfg(feature = "amqp")]
pub mod lapin_broker;
/// Retry accounting per correlation id
pub mod ledger;
/// In-process broker
pub mod memory;
/// Publisher
pub mod publish;
/// Subscribe runtime
pub mod subscribe;
/// Payload validation
pub mod validate;

pub use broker::{Acknowledger, Broker, BrokerChannel, BrokerConnection, Delivery, OutboundMessage};
#[cfg(feature = "amqp")]
pub use lapin_broker::LapinBroker;
pub use ledger::RetryLedger;
pub use memory::{BrokerEvent, MemoryBroker, PublishedMessage, SettleOutcome, Settlement};
pub use publish::Publisher;
pub use subscribe::{handler_fn, FnHandler, MessageHandler, SubscribeRuntime, Subscription};
pub use validate::Validate;
