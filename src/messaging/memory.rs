// ABOUTME: In-process broker with direct exchanges, durable queues and competing consumers
// ABOUTME: Records publishes, settlements and topology events, and can inject connection faults
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 txlog contributors

//! In-memory broker.
//!
//! Queues hand messages to their consumers round-robin, honouring each
//! consumer's prefetch. A message stays in flight until it is settled; when
//! its consumer goes away (channel or connection closed) it is requeued at the
//! front, as a real broker would.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::broker::{
    Acknowledger, Broker, BrokerChannel, BrokerConnection, Delivery, OutboundMessage,
};
use crate::errors::BrokerError;

/// Topology and traffic events in the order the broker saw them
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    /// An exchange was declared
    DeclareExchange(String),
    /// A queue was declared
    DeclareQueue(String),
    /// A queue was bound
    Bind {
        /// Queue name
        queue: String,
        /// Exchange name
        exchange: String,
        /// Binding key
        routing_key: String,
    },
    /// A message was published
    Publish {
        /// Target exchange
        exchange: String,
        /// Routing key
        routing_key: String,
    },
}

/// A message accepted by an exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    /// Target exchange
    pub exchange: String,
    /// Routing key
    pub routing_key: String,
    /// Message body and properties
    pub message: OutboundMessage,
}

/// How a delivery was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    /// Acknowledged
    Ack,
    /// Rejected
    Nack {
        /// Whether it went back on the queue
        requeue: bool,
    },
}

/// One settlement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    /// Queue the delivery came from
    pub queue: String,
    /// Correlation id of the message
    pub correlation_id: Option<String>,
    /// Outcome
    pub outcome: SettleOutcome,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    exchange: String,
    routing_key: String,
    correlation_id: Option<String>,
    body: Vec<u8>,
}

struct ConsumerSlot {
    id: u64,
    connection: u64,
    prefetch: u16,
    sender: mpsc::UnboundedSender<Delivery>,
    in_flight: HashMap<u64, StoredMessage>,
}

impl ConsumerSlot {
    fn has_capacity(&self) -> bool {
        self.prefetch == 0 || self.in_flight.len() < usize::from(self.prefetch)
    }
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<StoredMessage>,
    consumers: Vec<ConsumerSlot>,
    next_consumer: usize,
}

struct Binding {
    queue: String,
    exchange: String,
    routing_key: String,
}

#[derive(Default)]
struct State {
    exchanges: HashSet<String>,
    queues: HashMap<String, QueueState>,
    bindings: Vec<Binding>,
    published: Vec<PublishedMessage>,
    settlements: Vec<Settlement>,
    events: Vec<BrokerEvent>,
    connections: HashMap<u64, CancellationToken>,
    failing_connects: usize,
    connect_attempts: usize,
    next_id: u64,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-process [`Broker`]; clones share one broker
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<State>>,
}

impl MemoryBroker {
    /// Empty broker
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` connection attempts fail
    pub fn fail_next_connects(&self, count: usize) {
        self.state.lock().failing_connects = count;
    }

    /// Connection attempts so far, failed ones included
    #[must_use]
    pub fn connect_attempts(&self) -> usize {
        self.state.lock().connect_attempts
    }

    /// Live connections
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.state.lock().connections.len()
    }

    /// Close every live connection as if the broker went away
    pub fn close_connections(&self) {
        let mut state = self.state.lock();
        let ids: Vec<u64> = state.connections.keys().copied().collect();
        for id in ids {
            drop_connection(&self.state, &mut state, id);
        }
    }

    /// Publish without a connection, as another producer would
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Publish`] when `exchange` was never declared
    pub fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: OutboundMessage,
    ) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        route_message(&self.state, &mut state, exchange, routing_key, message)
    }

    /// Messages accepted by exchanges, in order
    #[must_use]
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state.lock().published.clone()
    }

    /// Settlements, in order
    #[must_use]
    pub fn settlements(&self) -> Vec<Settlement> {
        self.state.lock().settlements.clone()
    }

    /// Topology and publish events, in order
    #[must_use]
    pub fn events(&self) -> Vec<BrokerEvent> {
        self.state.lock().events.clone()
    }

    /// Whether `name` was declared
    #[must_use]
    pub fn has_exchange(&self, name: &str) -> bool {
        self.state.lock().exchanges.contains(name)
    }

    /// Messages waiting in `queue`
    #[must_use]
    pub fn queue_depth(&self, queue: &str) -> usize {
        self.state
            .lock()
            .queues
            .get(queue)
            .map_or(0, |q| q.ready.len())
    }

    /// Delivered but unsettled messages of `queue`
    #[must_use]
    pub fn unacked(&self, queue: &str) -> usize {
        self.state.lock().queues.get(queue).map_or(0, |q| {
            q.consumers.iter().map(|c| c.in_flight.len()).sum()
        })
    }

    /// Consumers attached to `queue`
    #[must_use]
    pub fn consumer_count(&self, queue: &str) -> usize {
        self.state
            .lock()
            .queues
            .get(queue)
            .map_or(0, |q| q.consumers.len())
    }
}

impl std::fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryBroker")
            .field("exchanges", &state.exchanges.len())
            .field("queues", &state.queues.len())
            .field("connections", &state.connections.len())
            .finish_non_exhaustive()
    }
}

fn route_message(
    shared: &Arc<Mutex<State>>,
    state: &mut State,
    exchange: &str,
    routing_key: &str,
    message: OutboundMessage,
) -> Result<(), BrokerError> {
    if !state.exchanges.contains(exchange) {
        return Err(BrokerError::Publish {
            exchange: exchange.to_owned(),
            reason: "exchange not found".to_owned(),
        });
    }
    state.events.push(BrokerEvent::Publish {
        exchange: exchange.to_owned(),
        routing_key: routing_key.to_owned(),
    });
    let targets: Vec<String> = state
        .bindings
        .iter()
        .filter(|b| b.exchange == exchange && b.routing_key == routing_key)
        .map(|b| b.queue.clone())
        .collect();
    let stored = StoredMessage {
        exchange: exchange.to_owned(),
        routing_key: routing_key.to_owned(),
        correlation_id: message.correlation_id.clone(),
        body: message.body.clone(),
    };
    state.published.push(PublishedMessage {
        exchange: exchange.to_owned(),
        routing_key: routing_key.to_owned(),
        message,
    });
    for queue in targets {
        if let Some(q) = state.queues.get_mut(&queue) {
            q.ready.push_back(stored.clone());
        }
        pump(shared, state, &queue);
    }
    Ok(())
}

/// Hand ready messages of `queue` to consumers with spare prefetch
fn pump(shared: &Arc<Mutex<State>>, state: &mut State, queue: &str) {
    let State {
        queues, next_id, ..
    } = state;
    let Some(q) = queues.get_mut(queue) else {
        return;
    };
    while !q.ready.is_empty() && !q.consumers.is_empty() {
        let count = q.consumers.len();
        let start = q.next_consumer;
        let Some(offset) = (0..count)
            .map(|i| (start + i) % count)
            .find(|&i| q.consumers[i].has_capacity())
        else {
            break;
        };
        q.next_consumer = (offset + 1) % count;
        let Some(message) = q.ready.pop_front() else {
            break;
        };
        *next_id += 1;
        let tag = *next_id;
        let consumer = &mut q.consumers[offset];
        let delivery = Delivery::new(
            queue,
            message.exchange.clone(),
            message.routing_key.clone(),
            message.correlation_id.clone(),
            message.body.clone(),
            Arc::new(MemoryAcker {
                state: Arc::clone(shared),
                queue: queue.to_owned(),
                consumer: consumer.id,
                tag,
            }),
        );
        if consumer.sender.send(delivery).is_ok() {
            consumer.in_flight.insert(tag, message);
        } else {
            // Receiver dropped: forget the consumer and retry the message elsewhere
            let gone = q.consumers.remove(offset);
            for (_, pending) in gone.in_flight {
                q.ready.push_front(pending);
            }
            q.ready.push_front(message);
            q.next_consumer = 0;
        }
    }
}

fn remove_consumer(shared: &Arc<Mutex<State>>, state: &mut State, queue: &str, consumer: u64) {
    if let Some(q) = state.queues.get_mut(queue) {
        if let Some(position) = q.consumers.iter().position(|c| c.id == consumer) {
            let gone = q.consumers.remove(position);
            for (_, pending) in gone.in_flight {
                q.ready.push_front(pending);
            }
            q.next_consumer = 0;
        }
    }
    pump(shared, state, queue);
}

fn drop_connection(shared: &Arc<Mutex<State>>, state: &mut State, connection: u64) {
    if let Some(token) = state.connections.remove(&connection) {
        token.cancel();
    }
    let mut affected = Vec::new();
    for (name, q) in &mut state.queues {
        let (gone, kept): (Vec<_>, Vec<_>) = q
            .consumers
            .drain(..)
            .partition(|c| c.connection == connection);
        q.consumers = kept;
        if gone.is_empty() {
            continue;
        }
        q.next_consumer = 0;
        for consumer in gone {
            for (_, pending) in consumer.in_flight {
                q.ready.push_front(pending);
            }
        }
        affected.push(name.clone());
    }
    // Requeued messages may go to consumers on other connections
    for queue in affected {
        pump(shared, state, &queue);
    }
}

struct MemoryAcker {
    state: Arc<Mutex<State>>,
    queue: String,
    consumer: u64,
    tag: u64,
}

impl MemoryAcker {
    fn settle(&self, outcome: SettleOutcome) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        let message = state
            .queues
            .get_mut(&self.queue)
            .and_then(|q| q.consumers.iter_mut().find(|c| c.id == self.consumer))
            .and_then(|c| c.in_flight.remove(&self.tag))
            .ok_or_else(|| {
                BrokerError::Acknowledge(format!(
                    "delivery {} on {} is not in flight",
                    self.tag, self.queue
                ))
            })?;
        state.settlements.push(Settlement {
            queue: self.queue.clone(),
            correlation_id: message.correlation_id.clone(),
            outcome,
        });
        if outcome == (SettleOutcome::Nack { requeue: true }) {
            if let Some(q) = state.queues.get_mut(&self.queue) {
                q.ready.push_front(message);
            }
        }
        pump(&self.state, &mut state, &self.queue);
        Ok(())
    }
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.settle(SettleOutcome::Ack)
    }

    async fn nack(&self, requeue: bool) -> Result<(), BrokerError> {
        self.settle(SettleOutcome::Nack { requeue })
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn connect(&self) -> Result<Box<dyn BrokerConnection>, BrokerError> {
        let mut state = self.state.lock();
        state.connect_attempts += 1;
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(BrokerError::Connect("connection refused".to_owned()));
        }
        let id = state.next_id();
        let token = CancellationToken::new();
        state.connections.insert(id, token.clone());
        debug!(connection = id, "memory broker connection opened");
        Ok(Box::new(MemoryConnection {
            state: Arc::clone(&self.state),
            id,
            token,
        }))
    }
}

struct MemoryConnection {
    state: Arc<Mutex<State>>,
    id: u64,
    token: CancellationToken,
}

#[async_trait]
impl BrokerConnection for MemoryConnection {
    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>, BrokerError> {
        if self.token.is_cancelled() {
            return Err(BrokerError::Closed);
        }
        Ok(Box::new(MemoryChannel {
            state: Arc::clone(&self.state),
            connection: self.id,
            token: self.token.child_token(),
            prefetch: Mutex::new(0),
            consumers: Mutex::new(Vec::new()),
        }))
    }

    async fn closed(&self) {
        self.token.cancelled().await;
    }

    async fn close(&self) -> Result<(), BrokerError> {
        drop_connection(&self.state, &mut self.state.lock(), self.id);
        Ok(())
    }
}

struct MemoryChannel {
    state: Arc<Mutex<State>>,
    connection: u64,
    token: CancellationToken,
    prefetch: Mutex<u16>,
    consumers: Mutex<Vec<(String, u64)>>,
}

impl MemoryChannel {
    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.token.is_cancelled() {
            Err(BrokerError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn declare_exchange(&self, name: &str) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        state.exchanges.insert(name.to_owned());
        state.events.push(BrokerEvent::DeclareExchange(name.to_owned()));
        Ok(())
    }

    async fn declare_queue(&self, name: &str) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        state.queues.entry(name.to_owned()).or_default();
        state.events.push(BrokerEvent::DeclareQueue(name.to_owned()));
        Ok(())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        if !state.exchanges.contains(exchange) || !state.queues.contains_key(queue) {
            return Err(BrokerError::Declare {
                name: queue.to_owned(),
                reason: format!("cannot bind to undeclared exchange {exchange}"),
            });
        }
        let exists = state.bindings.iter().any(|b| {
            b.queue == queue && b.exchange == exchange && b.routing_key == routing_key
        });
        if !exists {
            state.bindings.push(Binding {
                queue: queue.to_owned(),
                exchange: exchange.to_owned(),
                routing_key: routing_key.to_owned(),
            });
        }
        state.events.push(BrokerEvent::Bind {
            queue: queue.to_owned(),
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
        });
        Ok(())
    }

    async fn set_prefetch(&self, count: u16) -> Result<(), BrokerError> {
        self.ensure_open()?;
        *self.prefetch.lock() = count;
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
    ) -> Result<BoxStream<'static, Result<Delivery, BrokerError>>, BrokerError> {
        self.ensure_open()?;
        let (sender, receiver) = mpsc::unbounded_channel();
        {
            let mut state = self.state.lock();
            let id = state.next_id();
            let Some(q) = state.queues.get_mut(queue) else {
                return Err(BrokerError::Channel(format!("queue {queue} not found")));
            };
            q.consumers.push(ConsumerSlot {
                id,
                connection: self.connection,
                prefetch: *self.prefetch.lock(),
                sender,
                in_flight: HashMap::new(),
            });
            self.consumers.lock().push((queue.to_owned(), id));
            pump(&self.state, &mut state, queue);
        }
        let deliveries = stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|delivery| (Ok(delivery), receiver))
        });
        Ok(deliveries.boxed())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: OutboundMessage,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        route_message(&self.state, &mut state, exchange, routing_key, message)
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.token.cancel();
        let consumers = std::mem::take(&mut *self.consumers.lock());
        let mut state = self.state.lock();
        for (queue, id) in consumers {
            remove_consumer(&self.state, &mut state, &queue, id);
        }
        Ok(())
    }
}
