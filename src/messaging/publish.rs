// ABOUTME: Publish path: validate, declare the exchange, marshal and send with a correlation id
// ABOUTME: Each publish is recorded as an `other` segment on the caller's transaction
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 txlog contributors

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::broker::{Broker, BrokerChannel, BrokerConnection, OutboundMessage};
use super::validate::Validate;
use crate::adapters::amqp::correlation_id;
use crate::application::Application;
use crate::context::Context;
use crate::errors::PublishError;
use crate::transaction;

/// Publishes JSON messages to direct exchanges
#[derive(Clone)]
pub struct Publisher {
    app: Application,
    broker: Arc<dyn Broker>,
}

impl Publisher {
    /// Publisher dialing `broker` per message
    #[must_use]
    pub fn new(app: Application, broker: Arc<dyn Broker>) -> Self {
        Self { app, broker }
    }

    /// Publish `payload` to `exchange`, routed by the exchange name.
    ///
    /// The exchange is declared on the publishing channel before the message
    /// is sent. The correlation id is the trace id of the transaction bound to
    /// `ctx`, else the context trace id, else a fresh id. When `ctx` carries a
    /// transaction the publish is recorded as an `other` segment named after
    /// the exchange.
    ///
    /// # Errors
    ///
    /// - [`PublishError::Validation`] when the payload rejects itself; nothing is sent
    /// - [`PublishError::Encode`] when the payload cannot be serialized
    /// - [`PublishError::Broker`] when any broker step fails
    pub async fn publish<T>(
        &self,
        ctx: &Context,
        exchange: &str,
        payload: &T,
    ) -> Result<(), PublishError>
    where
        T: Serialize + Validate + ?Sized,
    {
        payload.validate()?;
        let connection = self.broker.connect().await?;
        let result = self.publish_on(connection.as_ref(), ctx, exchange, payload).await;
        if let Err(error) = connection.close().await {
            debug!(exchange, error = %error, "publisher connection close failed");
        }
        result
    }

    async fn publish_on<T>(
        &self,
        connection: &dyn BrokerConnection,
        ctx: &Context,
        exchange: &str,
        payload: &T,
    ) -> Result<(), PublishError>
    where
        T: Serialize + ?Sized,
    {
        let channel = connection.open_channel().await?;
        let result = self.send(channel.as_ref(), ctx, exchange, payload).await;
        if let Err(error) = channel.close().await {
            debug!(exchange, error = %error, "publisher channel close failed");
        }
        result
    }

    async fn send<T>(
        &self,
        channel: &dyn BrokerChannel,
        ctx: &Context,
        exchange: &str,
        payload: &T,
    ) -> Result<(), PublishError>
    where
        T: Serialize + ?Sized,
    {
        channel.declare_exchange(exchange).await?;
        let body = serde_json::to_vec(payload)?;
        let correlation_id = correlation_id(&self.app, ctx);
        let segment = transaction::from_context(ctx).map(|txn| {
            txn.add_other(exchange, segment_extras(exchange, &correlation_id, &body))
        });

        let message = OutboundMessage::json(body, correlation_id.as_str());
        let result = channel.publish(exchange, exchange, message).await;
        match &result {
            Ok(()) => debug!(exchange, correlation_id = %correlation_id, "message published"),
            Err(error) => {
                warn!(
                    exchange,
                    correlation_id = %correlation_id,
                    error = %error,
                    "publish failed"
                );
                if let Some(segment) = &segment {
                    segment.notice_error(error);
                }
            }
        }
        if let Some(segment) = &segment {
            segment.end();
        }
        result.map_err(PublishError::from)
    }
}

fn segment_extras(exchange: &str, correlation_id: &str, body: &[u8]) -> Map<String, Value> {
    let mut extras = Map::new();
    extras.insert("exchange".to_owned(), json!(exchange));
    extras.insert("routing_key".to_owned(), json!(exchange));
    extras.insert("correlation_id".to_owned(), json!(correlation_id));
    let body = serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()));
    extras.insert("body".to_owned(), body);
    extras
}

impl fmt::Debug for Publisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("app", &self.app.name())
            .finish_non_exhaustive()
    }
}
