// ABOUTME: Broker abstraction: connections, channels, topology, consume and publish
// ABOUTME: Implemented in-process by MemoryBroker and over AMQP by LapinBroker
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 txlog contributors

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use txlog_core::constants::http::CONTENT_TYPE_JSON;
use txlog_core::constants::messaging::DELIVERY_MODE_PERSISTENT;

use crate::errors::BrokerError;

/// Dials broker connections
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Open a new connection
    async fn connect(&self) -> Result<Box<dyn BrokerConnection>, BrokerError>;
}

/// One live broker connection
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Open a channel on this connection
    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>, BrokerError>;

    /// Resolves when the broker closes the connection
    async fn closed(&self);

    /// Close the connection
    async fn close(&self) -> Result<(), BrokerError>;
}

/// One channel: topology, consuming and publishing
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Declare a durable direct exchange
    async fn declare_exchange(&self, name: &str) -> Result<(), BrokerError>;

    /// Declare a durable, non-exclusive queue
    async fn declare_queue(&self, name: &str) -> Result<(), BrokerError>;

    /// Bind `queue` to `exchange` with `routing_key`
    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError>;

    /// Limit unacknowledged deliveries on this channel
    async fn set_prefetch(&self, count: u16) -> Result<(), BrokerError>;

    /// Consume `queue` with manual acknowledgement
    async fn consume(
        &self,
        queue: &str,
    ) -> Result<BoxStream<'static, Result<Delivery, BrokerError>>, BrokerError>;

    /// Publish one message
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: OutboundMessage,
    ) -> Result<(), BrokerError>;

    /// Close the channel
    async fn close(&self) -> Result<(), BrokerError>;
}

/// Settles one delivery
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Positive acknowledgement
    async fn ack(&self) -> Result<(), BrokerError>;

    /// Negative acknowledgement, optionally requeueing
    async fn nack(&self, requeue: bool) -> Result<(), BrokerError>;
}

/// A consumed message
pub struct Delivery {
    /// Queue the message was consumed from
    pub queue: String,
    /// Exchange it was published to
    pub exchange: String,
    /// Routing key it was published with
    pub routing_key: String,
    /// Correlation id property, when present
    pub correlation_id: Option<String>,
    /// Raw body
    pub body: Vec<u8>,
    acker: Arc<dyn Acknowledger>,
}

impl Delivery {
    /// Assemble a delivery settled through `acker`
    #[must_use]
    pub fn new(
        queue: impl Into<String>,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        correlation_id: Option<String>,
        body: Vec<u8>,
        acker: Arc<dyn Acknowledger>,
    ) -> Self {
        Self {
            queue: queue.into(),
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            correlation_id,
            body,
            acker,
        }
    }

    /// Acknowledge the delivery
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Acknowledge`] when the broker rejects it
    pub async fn ack(&self) -> Result<(), BrokerError> {
        self.acker.ack().await
    }

    /// Reject the delivery
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Acknowledge`] when the broker rejects it
    pub async fn nack(&self, requeue: bool) -> Result<(), BrokerError> {
        self.acker.nack(requeue).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("queue", &self.queue)
            .field("exchange", &self.exchange)
            .field("routing_key", &self.routing_key)
            .field("correlation_id", &self.correlation_id)
            .field("body_len", &self.body.len())
            .finish_non_exhaustive()
    }
}

/// A message to publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Encoded body
    pub body: Vec<u8>,
    /// Content type property
    pub content_type: String,
    /// Correlation id property
    pub correlation_id: Option<String>,
    /// Delivery mode; 2 is persistent
    pub delivery_mode: u8,
}

impl OutboundMessage {
    /// Persistent JSON message
    #[must_use]
    pub fn json(body: Vec<u8>, correlation_id: impl Into<String>) -> Self {
        Self {
            body,
            content_type: CONTENT_TYPE_JSON.to_owned(),
            correlation_id: Some(correlation_id.into()),
            delivery_mode: DELIVERY_MODE_PERSISTENT,
        }
    }
}
