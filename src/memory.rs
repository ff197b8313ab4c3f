// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # In-Memory Broker
//!
//! A process-local stand-in for RabbitMQ, implementing the channel, exchange and queue
//! contracts. Exchanges route by exact routing key, queues are FIFO, nacked messages
//! go back to the head of their queue, and queues declared with a dead-letter exchange
//! dead-letter rejected or expired messages with an `x-death` record the way the broker
//! does. Message TTLs are not timed; call [`MemoryBroker::expire`] to expire a queue.

use crate::{
    channel::{Channel, ChannelFactory},
    consumer::landfill::{AMQP_HEADERS_ROUTING_KEYS, AMQP_HEADERS_X_DEATH},
    errors::AmqpError,
    exchange::{Exchange, ExchangeFactory},
    headers::{HeaderValue, Headers},
    message::{Message, Options},
    queue::{Queue, QueueDefinition, QueueFactory},
    received::{Acknowledger, ReceivedMessage},
};
use async_trait::async_trait;
use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};
use tokio::{sync::Notify, time::Instant};
use tracing::{debug, warn};

const DEATH_REASON_EXPIRED: &str = "expired";
const DEATH_REASON_REJECTED: &str = "rejected";

#[derive(Debug, Clone)]
struct Envelope {
    message: Message,
    exchange: String,
    routing_key: String,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Envelope>,
    dead_letter_exchange: Option<String>,
    dead_letter_routing_key: Option<String>,
}

struct Binding {
    exchange: String,
    routing_key: String,
    queue: String,
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, QueueState>,
    bindings: Vec<Binding>,
    unacked: HashMap<u64, (String, Envelope)>,
    next_tag: u64,
    published: Vec<PublishedMessage>,
}

/// A message as it was handed to an exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub message: Message,
}

/// Shared broker state.
///
/// Every publish is also recorded in a journal that is kept until it is drained with
/// [`MemoryBroker::take_published`], so long-lived brokers should drain it regularly.
#[derive(Default)]
pub struct MemoryBroker {
    state: Mutex<BrokerState>,
    notify: Notify,
}

impl MemoryBroker {
    pub fn new() -> Arc<MemoryBroker> {
        Arc::new(MemoryBroker::default())
    }

    /// Declares a queue with its dead-letter settings and bindings. Redeclaring keeps
    /// the queued messages.
    pub fn declare_queue(&self, def: &QueueDefinition) -> Result<(), AmqpError> {
        let mut state = self.state()?;

        let queue = state.queues.entry(def.name.clone()).or_default();
        queue.dead_letter_exchange = def.dead_letter_exchange.clone();
        queue.dead_letter_routing_key = def.dead_letter_routing_key.clone();

        for binding in def.bindings() {
            let exists = state.bindings.iter().any(|b| {
                b.queue == def.name
                    && b.exchange == binding.exchange_name()
                    && b.routing_key == binding.key()
            });

            if !exists {
                state.bindings.push(Binding {
                    exchange: binding.exchange_name().to_owned(),
                    routing_key: binding.key().to_owned(),
                    queue: def.name.clone(),
                });
            }
        }

        debug!("queue: {} was created", def.name);
        Ok(())
    }

    /// Routes `message` to every queue bound to `exchange` with `routing_key`. The
    /// default exchange `""` routes to the queue named by the routing key.
    pub fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: &Message,
    ) -> Result<(), AmqpError> {
        let mut state = self.state()?;

        state.published.push(PublishedMessage {
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            message: message.clone(),
        });

        Self::route(
            &mut state,
            Envelope {
                message: message.clone(),
                exchange: exchange.to_owned(),
                routing_key: routing_key.to_owned(),
            },
        );
        drop(state);

        self.notify.notify_waiters();
        Ok(())
    }

    /// Dead-letters every ready message of `queue` as if its TTL had elapsed, returning
    /// how many were moved.
    pub fn expire(&self, queue: &str) -> Result<usize, AmqpError> {
        let mut state = self.state()?;

        let ready: Vec<Envelope> = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| AmqpError::NotFound(queue.to_owned()))?
            .ready
            .drain(..)
            .collect();
        let expired = ready.len();

        for envelope in ready {
            Self::dead_letter(&mut state, queue, envelope, DEATH_REASON_EXPIRED);
        }
        drop(state);

        debug!(queue, expired, "queue expired");
        self.notify.notify_waiters();
        Ok(expired)
    }

    /// Number of ready messages in `queue`.
    pub fn depth(&self, queue: &str) -> Result<usize, AmqpError> {
        let state = self.state()?;

        state
            .queues
            .get(queue)
            .map(|q| q.ready.len())
            .ok_or_else(|| AmqpError::NotFound(queue.to_owned()))
    }

    /// Number of delivered messages awaiting an answer.
    pub fn unacked(&self) -> Result<usize, AmqpError> {
        Ok(self.state()?.unacked.len())
    }

    /// Every message handed to an exchange since the journal was last drained, in
    /// publish order.
    pub fn published(&self) -> Result<Vec<PublishedMessage>, AmqpError> {
        Ok(self.state()?.published.clone())
    }

    /// Drains the publish journal.
    pub fn take_published(&self) -> Result<Vec<PublishedMessage>, AmqpError> {
        Ok(std::mem::take(&mut self.state()?.published))
    }

    fn state(&self) -> Result<MutexGuard<'_, BrokerState>, AmqpError> {
        self.state.lock().map_err(|_| AmqpError::InternalError)
    }

    fn route(state: &mut BrokerState, envelope: Envelope) {
        let targets: Vec<String> = if envelope.exchange.is_empty() {
            vec![envelope.routing_key.clone()]
        } else {
            state
                .bindings
                .iter()
                .filter(|b| {
                    b.exchange == envelope.exchange && b.routing_key == envelope.routing_key
                })
                .map(|b| b.queue.clone())
                .collect()
        };

        let mut routed = false;
        for target in targets {
            if let Some(queue) = state.queues.get_mut(&target) {
                queue.ready.push_back(envelope.clone());
                routed = true;
            }
        }

        if !routed {
            warn!(
                exchange = envelope.exchange,
                routing_key = envelope.routing_key,
                "unroutable message dropped"
            );
        }
    }

    fn dead_letter(state: &mut BrokerState, queue: &str, envelope: Envelope, reason: &str) {
        let (exchange, routing_key) = match state.queues.get(queue) {
            Some(QueueState {
                dead_letter_exchange: Some(exchange),
                dead_letter_routing_key,
                ..
            }) => (
                exchange.clone(),
                dead_letter_routing_key
                    .clone()
                    .unwrap_or_else(|| envelope.routing_key.clone()),
            ),
            _ => {
                debug!(queue, reason, "message discarded");
                return;
            }
        };

        let headers = envelope.message.headers();
        let deaths = record_death(headers, queue, reason, &envelope);

        let message = Message::from_parts(
            envelope.message.payload().clone(),
            Some(Options::new(envelope.message.options().persistent(), 0)),
            Some(headers.with(AMQP_HEADERS_X_DEATH, deaths)),
            Some(envelope.message.identifier().clone()),
        );

        Self::route(
            state,
            Envelope {
                message,
                exchange,
                routing_key,
            },
        );
    }

    fn pop(self: &Arc<Self>, queue: &str) -> Result<Option<ReceivedMessage>, AmqpError> {
        let mut state = self.state()?;

        let envelope = match state.queues.get_mut(queue) {
            Some(q) => q.ready.pop_front(),
            None => return Err(AmqpError::NotFound(queue.to_owned())),
        };

        let Some(envelope) = envelope else {
            return Ok(None);
        };

        state.next_tag += 1;
        let delivery_tag = state.next_tag;
        state
            .unacked
            .insert(delivery_tag, (queue.to_owned(), envelope.clone()));

        Ok(Some(ReceivedMessage::new(
            envelope.message,
            delivery_tag,
            envelope.routing_key,
            envelope.exchange,
            Arc::new(MemoryAcknowledger {
                broker: self.clone(),
            }),
        )))
    }
}

/// Prepends a death record for `queue` and `reason`, or bumps the count of the
/// existing one and moves it to the front.
fn record_death(headers: &Headers, queue: &str, reason: &str, envelope: &Envelope) -> HeaderValue {
    let mut deaths: Vec<HeaderValue> = headers
        .get(AMQP_HEADERS_X_DEATH)
        .and_then(|deaths| deaths.as_array())
        .map(|deaths| deaths.to_vec())
        .unwrap_or_default();

    let same = |death: &HeaderValue| {
        death.as_table().is_some_and(|record| {
            record.get("queue").and_then(|v| v.as_str()) == Some(queue)
                && record.get("reason").and_then(|v| v.as_str()) == Some(reason)
        })
    };

    let count = match deaths.iter().position(same) {
        Some(index) => {
            let previous = deaths.remove(index);
            previous
                .as_table()
                .and_then(|record| record.get("count"))
                .and_then(|count| count.as_i64())
                .unwrap_or(0)
                + 1
        }
        None => 1,
    };

    let record: Headers = [
        ("count", HeaderValue::Int(count)),
        ("reason", HeaderValue::from(reason)),
        ("queue", HeaderValue::from(queue)),
        ("exchange", HeaderValue::from(envelope.exchange.as_str())),
        (
            AMQP_HEADERS_ROUTING_KEYS,
            HeaderValue::Array(vec![HeaderValue::from(envelope.routing_key.as_str())]),
        ),
    ]
    .into_iter()
    .collect();

    deaths.insert(0, HeaderValue::Table(record));
    HeaderValue::Array(deaths)
}

struct MemoryAcknowledger {
    broker: Arc<MemoryBroker>,
}

#[async_trait]
impl Acknowledger for MemoryAcknowledger {
    async fn ack(&self, delivery_tag: u64) -> Result<(), AmqpError> {
        let mut state = self.broker.state()?;

        state
            .unacked
            .remove(&delivery_tag)
            .map(|_| ())
            .ok_or(AmqpError::AckMessageError {})
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError> {
        let mut state = self.broker.state()?;

        let (queue, envelope) = state
            .unacked
            .remove(&delivery_tag)
            .ok_or(AmqpError::NackMessageError {})?;

        if requeue {
            if let Some(q) = state.queues.get_mut(&queue) {
                q.ready.push_front(envelope);
            }
        } else {
            MemoryBroker::dead_letter(&mut state, &queue, envelope, DEATH_REASON_REJECTED);
        }
        drop(state);

        self.broker.notify.notify_waiters();
        Ok(())
    }
}

/// Transaction and qos calls seen by a [`MemoryChannel`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub started: usize,
    pub committed: usize,
    pub rolled_back: usize,
    pub prefetch_count: Option<u16>,
}

/// A channel recording the calls made on it. Clones share the record.
#[derive(Clone, Default)]
pub struct MemoryChannel {
    stats: Arc<Mutex<ChannelStats>>,
}

impl MemoryChannel {
    pub fn new() -> MemoryChannel {
        MemoryChannel::default()
    }

    pub fn stats(&self) -> Result<ChannelStats, AmqpError> {
        self.stats
            .lock()
            .map(|stats| *stats)
            .map_err(|_| AmqpError::InternalError)
    }

    fn record<F: FnOnce(&mut ChannelStats)>(&self, update: F) -> Result<(), AmqpError> {
        let mut stats = self.stats.lock().map_err(|_| AmqpError::InternalError)?;
        update(&mut stats);
        Ok(())
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn start_transaction(&self) -> Result<(), AmqpError> {
        self.record(|stats| stats.started += 1)
    }

    async fn commit_transaction(&self) -> Result<(), AmqpError> {
        self.record(|stats| stats.committed += 1)
    }

    async fn rollback_transaction(&self) -> Result<(), AmqpError> {
        self.record(|stats| stats.rolled_back += 1)
    }

    async fn set_prefetch_count(&self, count: u16) -> Result<(), AmqpError> {
        self.record(|stats| stats.prefetch_count = Some(count))
    }
}

#[async_trait]
impl ChannelFactory for MemoryChannel {
    async fn create(&self) -> Result<Arc<dyn Channel>, AmqpError> {
        Ok(Arc::new(self.clone()))
    }
}

/// An exchange of a [`MemoryBroker`]; it is its own factory.
#[derive(Clone)]
pub struct MemoryExchange {
    broker: Arc<MemoryBroker>,
    name: String,
}

impl MemoryExchange {
    pub fn new(broker: Arc<MemoryBroker>, name: &str) -> MemoryExchange {
        MemoryExchange {
            broker,
            name: name.to_owned(),
        }
    }
}

#[async_trait]
impl Exchange for MemoryExchange {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn publish(&self, message: &Message, routing_key: &str) -> Result<(), AmqpError> {
        self.broker.publish(&self.name, routing_key, message)
    }
}

#[async_trait]
impl ExchangeFactory for MemoryExchange {
    async fn create(&self) -> Result<Arc<dyn Exchange>, AmqpError> {
        Ok(Arc::new(self.clone()))
    }
}

/// A queue of a [`MemoryBroker`].
pub struct MemoryQueue {
    broker: Arc<MemoryBroker>,
    name: String,
    channel: MemoryChannel,
}

#[async_trait]
impl Queue for MemoryQueue {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn channel(&self) -> Arc<dyn Channel> {
        Arc::new(self.channel.clone())
    }

    async fn receive(&self, timeout: Duration) -> Result<Option<ReceivedMessage>, AmqpError> {
        let deadline = Instant::now() + timeout;

        loop {
            let notified = self.broker.notify.notified();

            if let Some(message) = self.broker.pop(&self.name)? {
                return Ok(Some(message));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }
}

/// Declares its queue on the broker on first use.
pub struct MemoryQueueFactory {
    broker: Arc<MemoryBroker>,
    definition: QueueDefinition,
    channel: MemoryChannel,
}

impl MemoryQueueFactory {
    pub fn new(broker: Arc<MemoryBroker>, definition: QueueDefinition) -> MemoryQueueFactory {
        MemoryQueueFactory {
            broker,
            definition,
            channel: MemoryChannel::new(),
        }
    }

    /// The channel handed out by the created queues.
    pub fn channel(&self) -> MemoryChannel {
        self.channel.clone()
    }
}

#[async_trait]
impl QueueFactory for MemoryQueueFactory {
    async fn create(&self) -> Result<Arc<dyn Queue>, AmqpError> {
        self.broker.declare_queue(&self.definition)?;

        Ok(Arc::new(MemoryQueue {
            broker: self.broker.clone(),
            name: self.definition.name.clone(),
            channel: self.channel.clone(),
        }))
    }
}
