// ABOUTME: Resilient subscription runtime: connect, fan out channels, dispatch deliveries
// ABOUTME: De-duplicates by correlation id and requeues infrastructure failures within a budget
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 txlog contributors

//! # Subscribe runtime
//!
//! A [`SubscribeRuntime`] owns one broker, one [`RetryLedger`] and the
//! [`SubscribeConfig`] it was built with. [`SubscribeRuntime::run`] drives a
//! single [`Subscription`] until its cancellation token fires:
//!
//! 1. dial the broker, sleeping `reconnect_delay` between failed attempts;
//! 2. open up to ten channels, each declaring the exchange and queue, binding
//!    them with the exchange name as routing key and consuming with manual ack;
//! 3. spawn one task per delivery; redial when the broker closes the connection.
//!
//! Every delivery opens a consumer transaction whose trace id is the message
//! correlation id. Handlers are invoked in registration order, each recorded as
//! a `consumer_detail` segment.

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{select_all, BoxStream};
use futures_util::{FutureExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::broker::{Broker, BrokerChannel, BrokerConnection, Delivery};
use super::ledger::RetryLedger;
use crate::adapters::amqp::context_from_correlation;
use crate::application::{generate_trace_id, Application};
use crate::config::SubscribeConfig;
use crate::context::Context;
use crate::errors::{panic_message, BrokerError, Classification, ConsumeError, SubscribeError};
use crate::transaction::{CapturedError, Payload, Segment, Transaction};

/// Typed consumer of one message shape
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Shape the delivery body is decoded into
    type Message: DeserializeOwned + Send;

    /// Process one decoded message.
    ///
    /// # Errors
    ///
    /// [`ConsumeError::Domain`] rejects the message for good;
    /// [`ConsumeError::Infrastructure`] asks for a redelivery.
    async fn handle(&self, ctx: Context, message: Self::Message) -> Result<(), ConsumeError>;
}

/// [`MessageHandler`] backed by an async closure
pub struct FnHandler<M, F> {
    f: F,
    _message: PhantomData<fn() -> M>,
}

/// Wrap `f` as a [`MessageHandler`] for messages of type `M`
pub fn handler_fn<M, F, Fut>(f: F) -> FnHandler<M, F>
where
    M: DeserializeOwned + Send + 'static,
    F: Fn(Context, M) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ConsumeError>> + Send + 'static,
{
    FnHandler {
        f,
        _message: PhantomData,
    }
}

#[async_trait]
impl<M, F, Fut> MessageHandler for FnHandler<M, F>
where
    M: DeserializeOwned + Send + 'static,
    F: Fn(Context, M) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ConsumeError>> + Send + 'static,
{
    type Message = M;

    async fn handle(&self, ctx: Context, message: M) -> Result<(), ConsumeError> {
        (self.f)(ctx, message).await
    }
}

enum HandlerOutcome {
    Handled,
    Undecodable(serde_json::Error),
    Failed(ConsumeError),
    Panicked(String),
}

#[async_trait]
trait ErasedHandler: Send + Sync {
    async fn dispatch(&self, ctx: Context, body: &[u8]) -> HandlerOutcome;
}

struct Typed<H>(H);

#[async_trait]
impl<H: MessageHandler> ErasedHandler for Typed<H> {
    async fn dispatch(&self, ctx: Context, body: &[u8]) -> HandlerOutcome {
        let message = match serde_json::from_slice::<H::Message>(body) {
            Ok(message) => message,
            Err(error) => return HandlerOutcome::Undecodable(error),
        };
        let call = Context::scope(ctx.clone(), self.0.handle(ctx, message));
        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(())) => HandlerOutcome::Handled,
            Ok(Err(error)) => HandlerOutcome::Failed(error),
            Err(payload) => HandlerOutcome::Panicked(panic_message(payload.as_ref())),
        }
    }
}

struct NamedHandler {
    name: String,
    handler: Arc<dyn ErasedHandler>,
}

/// A queue bound to an exchange plus the handlers fed from it
pub struct Subscription {
    queue: String,
    exchange: String,
    handlers: Vec<NamedHandler>,
}

impl Subscription {
    /// Consume `queue`, bound to the direct `exchange`
    #[must_use]
    pub fn new(queue: impl Into<String>, exchange: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            exchange: exchange.into(),
            handlers: Vec::new(),
        }
    }

    /// Append a handler; handlers run in registration order
    #[must_use]
    pub fn handler<H: MessageHandler>(mut self, name: impl Into<String>, handler: H) -> Self {
        self.handlers.push(NamedHandler {
            name: name.into(),
            handler: Arc::new(Typed(handler)),
        });
        self
    }

    /// Queue name
    #[must_use]
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Exchange name, also used as routing key
    #[must_use]
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    fn check(&self) -> Result<(), SubscribeError> {
        if self.queue.trim().is_empty() || self.exchange.trim().is_empty() {
            return Err(SubscribeError::MissingTopology);
        }
        if self.handlers.is_empty() {
            return Err(SubscribeError::NoHandlers(self.queue.clone()));
        }
        Ok(())
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.handlers.iter().map(|h| h.name.as_str()).collect();
        f.debug_struct("Subscription")
            .field("queue", &self.queue)
            .field("exchange", &self.exchange)
            .field("handlers", &names)
            .finish()
    }
}

/// Drives subscriptions against one broker
pub struct SubscribeRuntime {
    app: Application,
    broker: Arc<dyn Broker>,
    config: SubscribeConfig,
    ledger: Arc<RetryLedger>,
}

enum SessionEnd {
    Stopped,
    Lost,
}

type DeliveryStream = BoxStream<'static, Result<Delivery, BrokerError>>;

impl SubscribeRuntime {
    /// Runtime with a fresh retry ledger
    #[must_use]
    pub fn new(app: Application, broker: Arc<dyn Broker>, config: SubscribeConfig) -> Self {
        Self {
            app,
            broker,
            config,
            ledger: Arc::new(RetryLedger::new()),
        }
    }

    /// Retry ledger shared by every delivery of this runtime
    #[must_use]
    pub const fn ledger(&self) -> &Arc<RetryLedger> {
        &self.ledger
    }

    /// Settings in use
    #[must_use]
    pub const fn config(&self) -> &SubscribeConfig {
        &self.config
    }

    /// Consume `subscription` until `token` is cancelled.
    ///
    /// Broker failures never end the loop; they trigger a redial after
    /// `reconnect_delay`. On cancellation in-flight deliveries are awaited
    /// before the connection is closed.
    ///
    /// # Errors
    ///
    /// Returns [`SubscribeError`] when the subscription has no handlers or an
    /// empty queue or exchange name.
    pub async fn run(
        &self,
        subscription: Subscription,
        token: CancellationToken,
    ) -> Result<(), SubscribeError> {
        subscription.check()?;
        let worker = Arc::new(Worker {
            app: self.app.clone(),
            ledger: Arc::clone(&self.ledger),
            max_retry: self.config.max_retry,
            retry_delay: self.config.retry_delay,
            subscription,
        });
        let eviction_token = token.child_token();
        let eviction = tokio::spawn(
            Arc::clone(&self.ledger)
                .run_eviction(self.config.refresh_delay, eviction_token.clone()),
        );
        let tracker = TaskTracker::new();

        loop {
            match self.session(&worker, &tracker, &token).await {
                SessionEnd::Stopped => break,
                SessionEnd::Lost => {
                    tokio::select! {
                        () = token.cancelled() => break,
                        () = tokio::time::sleep(self.config.reconnect_delay) => {}
                    }
                }
            }
        }

        tracker.close();
        tracker.wait().await;
        eviction_token.cancel();
        if let Err(error) = eviction.await {
            warn!(error = %error, "retry ledger eviction task failed");
        }
        info!(queue = %worker.subscription.queue, "subscription stopped");
        Ok(())
    }

    async fn session(
        &self,
        worker: &Arc<Worker>,
        tracker: &TaskTracker,
        token: &CancellationToken,
    ) -> SessionEnd {
        let queue = worker.subscription.queue.as_str();
        let connection = tokio::select! {
            () = token.cancelled() => return SessionEnd::Stopped,
            result = self.broker.connect() => match result {
                Ok(connection) => connection,
                Err(error) => {
                    warn!(queue, error = %error, "broker connect failed");
                    return SessionEnd::Lost;
                }
            },
        };

        let (channels, streams) =
            match self.open_channels(connection.as_ref(), &worker.subscription).await {
                Ok(opened) => opened,
                Err(error) => {
                    warn!(queue, error = %error, "channel setup failed");
                    close_connection(connection.as_ref()).await;
                    return SessionEnd::Lost;
                }
            };
        info!(
            queue,
            exchange = %worker.subscription.exchange,
            channels = channels.len(),
            "subscription consuming"
        );

        let mut deliveries = select_all(streams);
        let end = loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break SessionEnd::Stopped,
                () = connection.closed() => {
                    warn!(queue, "broker connection closed");
                    break SessionEnd::Lost;
                }
                next = deliveries.next() => match next {
                    Some(Ok(delivery)) => {
                        tracker.spawn(Arc::clone(worker).process(delivery));
                    }
                    Some(Err(error)) => {
                        warn!(queue, error = %error, "delivery stream failed");
                        break SessionEnd::Lost;
                    }
                    None => {
                        warn!(queue, "delivery streams ended");
                        break SessionEnd::Lost;
                    }
                },
            }
        };

        if matches!(end, SessionEnd::Stopped) {
            // Settle in-flight work while the connection can still carry acks
            tracker.close();
            tracker.wait().await;
        }
        for channel in &channels {
            if let Err(error) = channel.close().await {
                debug!(queue, error = %error, "channel close failed");
            }
        }
        close_connection(connection.as_ref()).await;
        drop(deliveries);
        end
    }

    async fn open_channels(
        &self,
        connection: &dyn BrokerConnection,
        subscription: &Subscription,
    ) -> Result<(Vec<Box<dyn BrokerChannel>>, Vec<DeliveryStream>), BrokerError> {
        let count = self.config.effective_channels();
        let mut channels = Vec::with_capacity(count);
        let mut streams = Vec::with_capacity(count);
        for _ in 0..count {
            let channel = connection.open_channel().await?;
            channel.declare_exchange(&subscription.exchange).await?;
            channel.declare_queue(&subscription.queue).await?;
            channel
                .bind_queue(
                    &subscription.queue,
                    &subscription.exchange,
                    &subscription.exchange,
                )
                .await?;
            channel.set_prefetch(self.config.prefetch).await?;
            streams.push(channel.consume(&subscription.queue).await?);
            channels.push(channel);
        }
        Ok((channels, streams))
    }
}

impl fmt::Debug for SubscribeRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscribeRuntime")
            .field("app", &self.app.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

async fn close_connection(connection: &dyn BrokerConnection) {
    if let Err(error) = connection.close().await {
        debug!(error = %error, "connection close failed");
    }
}

struct Worker {
    app: Application,
    ledger: Arc<RetryLedger>,
    max_retry: u32,
    retry_delay: Duration,
    subscription: Subscription,
}

impl Worker {
    async fn process(self: Arc<Self>, delivery: Delivery) {
        let supplied = delivery
            .correlation_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_owned);
        let retryable = supplied.is_some();
        let correlation_id = supplied.unwrap_or_else(generate_trace_id);

        if !self.ledger.mark_seen(&correlation_id) {
            debug!(
                queue = %delivery.queue,
                correlation_id = %correlation_id,
                "duplicate delivery dropped"
            );
            settle(&delivery, &correlation_id, Settle::Ack).await;
            return;
        }

        let txn = self
            .app
            .start_consumer_for(delivery.queue.as_str(), &correlation_id);
        txn.set_request_body(Payload::from_bytes(&delivery.body));
        let base = context_from_correlation(&self.app, Some(&correlation_id), &Context::new());
        let ctx = txn.to_context(&base);

        let mut infrastructure = false;
        for handler in &self.subscription.handlers {
            let segment =
                txn.add_consumer_detail(handler.name.as_str(), self.extras(&delivery));
            let outcome = handler.handler.dispatch(ctx.clone(), &delivery.body).await;
            infrastructure |=
                record_outcome(&txn, &segment, &handler.name, &correlation_id, outcome);
            segment.end();
        }

        let decision = if infrastructure {
            self.retry_decision(&delivery, &correlation_id, retryable).await
        } else {
            Settle::Ack
        };
        settle(&delivery, &correlation_id, decision).await;
        txn.end();
    }

    async fn retry_decision(
        &self,
        delivery: &Delivery,
        correlation_id: &str,
        retryable: bool,
    ) -> Settle {
        if !retryable {
            warn!(
                queue = %delivery.queue,
                "delivery without correlation id is not retried"
            );
            return Settle::Ack;
        }
        if let Some(attempt) = self.ledger.register_retry(correlation_id, self.max_retry) {
            warn!(
                queue = %delivery.queue,
                correlation_id = %correlation_id,
                attempt,
                max_retry = self.max_retry,
                "requeueing delivery"
            );
            tokio::time::sleep(self.retry_delay).await;
            // Duplicates arriving during the delay are still dropped
            self.ledger.release_seen(correlation_id);
            Settle::Requeue
        } else {
            error!(
                queue = %delivery.queue,
                correlation_id,
                max_retry = self.max_retry,
                "retry budget exhausted, dropping delivery"
            );
            Settle::Ack
        }
    }

    fn extras(&self, delivery: &Delivery) -> Map<String, Value> {
        let mut extras = Map::new();
        extras.insert("queue".to_owned(), json!(delivery.queue));
        extras.insert("exchange".to_owned(), json!(self.subscription.exchange));
        extras.insert("routing_key".to_owned(), json!(delivery.routing_key));
        extras
    }
}

/// Record one handler outcome; returns whether it calls for a retry
fn record_outcome(
    txn: &Transaction,
    segment: &Segment,
    handler: &str,
    correlation_id: &str,
    outcome: HandlerOutcome,
) -> bool {
    match outcome {
        HandlerOutcome::Handled => false,
        HandlerOutcome::Undecodable(error) => {
            warn!(handler, correlation_id, error = %error, "message decode failed");
            segment.insert_extra("decode_error", json!(error.to_string()));
            false
        }
        HandlerOutcome::Failed(ConsumeError::Domain(error)) => {
            warn!(handler, correlation_id, error = %error, "handler rejected message");
            let captured = CapturedError::from_anyhow(&error);
            segment.classify(Classification::Business, Some(captured.clone()));
            txn.classify(Classification::Business, Some(captured));
            false
        }
        HandlerOutcome::Failed(ConsumeError::Infrastructure(error)) => {
            error!(handler, correlation_id, error = %error, "handler failed");
            segment.notice_anyhow(&error);
            txn.notice_anyhow(&error);
            true
        }
        HandlerOutcome::Panicked(message) => {
            error!(handler, correlation_id, panic = %message, "handler panicked");
            segment.classify(
                Classification::Internal,
                Some(CapturedError::new(message.clone())),
            );
            txn.notice_internal(message);
            true
        }
    }
}

#[derive(Clone, Copy)]
enum Settle {
    Ack,
    Requeue,
}

async fn settle(delivery: &Delivery, correlation_id: &str, decision: Settle) {
    let result = match decision {
        Settle::Ack => delivery.ack().await,
        Settle::Requeue => delivery.nack(true).await,
    };
    if let Err(error) = result {
        warn!(
            queue = %delivery.queue,
            correlation_id,
            error = %error,
            "delivery settlement failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Ping {
        n: i64,
    }

    #[test]
    fn subscription_requires_handlers_and_names() {
        let empty = Subscription::new("q", "ex");
        assert!(matches!(empty.check(), Err(SubscribeError::NoHandlers(q)) if q == "q"));

        let handler = handler_fn(|_ctx, _msg: Ping| async { Ok(()) });
        let blank = Subscription::new(" ", "ex").handler("h", handler);
        assert!(matches!(blank.check(), Err(SubscribeError::MissingTopology)));
    }

    #[tokio::test]
    async fn typed_dispatch_reports_each_outcome() {
        let handler = Typed(handler_fn(|_ctx, msg: Ping| async move {
            match msg.n {
                0 => Ok(()),
                1 => Err(ConsumeError::domain(anyhow::anyhow!("rejected"))),
                2 => Err(ConsumeError::infrastructure(anyhow::anyhow!("db down"))),
                _ => panic!("unexpected {}", msg.n),
            }
        }));
        let ctx = Context::new();
        assert!(matches!(
            handler.dispatch(ctx.clone(), br#"{"n":0}"#).await,
            HandlerOutcome::Handled
        ));
        assert!(matches!(
            handler.dispatch(ctx.clone(), br#"{"n":1}"#).await,
            HandlerOutcome::Failed(ConsumeError::Domain(_))
        ));
        assert!(matches!(
            handler.dispatch(ctx.clone(), br#"{"n":2}"#).await,
            HandlerOutcome::Failed(ConsumeError::Infrastructure(_))
        ));
        assert!(matches!(
            handler.dispatch(ctx.clone(), b"not json").await,
            HandlerOutcome::Undecodable(_)
        ));
        match handler.dispatch(ctx, br#"{"n":9}"#).await {
            HandlerOutcome::Panicked(message) => assert_eq!(message, "unexpected 9"),
            _ => panic!("expected a caught panic"),
        }
    }
}
