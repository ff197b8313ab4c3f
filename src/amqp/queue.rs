// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Lapin Queues
//!
//! Queues declared and bound from a [`QueueDefinition`], consumed one delivery at a
//! time and answered through their [`Acknowledger`].

use crate::{
    amqp::{channel::LapinChannel, convert},
    channel::Channel,
    consumer::tag::{ConsumerTagGenerator, EmptyConsumerTagGenerator},
    errors::AmqpError,
    queue::{Queue, QueueDefinition, QueueFactory},
    received::{Acknowledger, ReceivedMessage},
};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    message::Delivery,
    options::{BasicConsumeOptions, QueueBindOptions, QueueDeclareOptions},
    types::{AMQPValue, FieldTable, LongInt, LongString, ShortString},
    Consumer,
};
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, error};

/// Constant for the header field used to specify a dead letter exchange
pub const AMQP_HEADERS_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";
/// Constant for the header field used to specify a dead letter routing key
pub const AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY: &str = "x-dead-letter-routing-key";
/// Constant for the header field used to specify message TTL
pub const AMQP_HEADERS_MESSAGE_TTL: &str = "x-message-ttl";
/// Constant for the header field used to specify maximum queue length
pub const AMQP_HEADERS_MAX_LENGTH: &str = "x-max-length";
/// Constant for the header field used to specify maximum queue size in bytes
pub const AMQP_HEADERS_MAX_LENGTH_BYTES: &str = "x-max-length-bytes";

struct LapinAcknowledger {
    channel: Arc<LapinChannel>,
}

#[async_trait]
impl Acknowledger for LapinAcknowledger {
    async fn ack(&self, delivery_tag: u64) -> Result<(), AmqpError> {
        self.channel.ack(delivery_tag).await
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError> {
        self.channel.nack(delivery_tag, requeue).await
    }
}

/// A declared queue.
///
/// The broker consumer is registered on the first `receive`, after the caller had the
/// chance to configure the prefetch count of the channel.
pub struct LapinQueue {
    channel: Arc<LapinChannel>,
    name: String,
    consumer_tag: String,
    consumer: Mutex<Option<Consumer>>,
    acknowledger: Arc<dyn Acknowledger>,
}

impl LapinQueue {
    async fn consume(&self) -> Result<Consumer, AmqpError> {
        debug!(queue = self.name, tag = self.consumer_tag, "starting consumer");

        self.channel
            .inner()
            .basic_consume(
                &self.name,
                &self.consumer_tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: false,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), queue = self.name, "failure to consume");
                AmqpError::ConsumerError(err.to_string())
            })
    }

    fn received(&self, delivery: Delivery) -> ReceivedMessage {
        let Delivery {
            delivery_tag,
            exchange,
            routing_key,
            properties,
            data,
            ..
        } = delivery;

        ReceivedMessage::new(
            convert::message(data, &properties),
            delivery_tag,
            routing_key.as_str(),
            exchange.as_str(),
            self.acknowledger.clone(),
        )
    }
}

#[async_trait]
impl Queue for LapinQueue {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn channel(&self) -> Arc<dyn Channel> {
        self.channel.clone()
    }

    async fn receive(&self, timeout: Duration) -> Result<Option<ReceivedMessage>, AmqpError> {
        let mut guard = self.consumer.lock().await;

        if guard.is_none() {
            *guard = Some(self.consume().await?);
        }
        let consumer = guard.as_mut().ok_or(AmqpError::InternalError)?;

        match tokio::time::timeout(timeout, consumer.next()).await {
            Err(_) => Ok(None),
            Ok(None) => {
                error!(queue = self.name, "consumer stream closed");
                Err(AmqpError::ConsumerError(format!(
                    "consumer of `{}` was closed",
                    self.name
                )))
            }
            Ok(Some(Err(err))) => {
                error!(error = err.to_string(), queue = self.name, "error receiving msg");
                Err(AmqpError::ConsumerError(err.to_string()))
            }
            Ok(Some(Ok(delivery))) => Ok(Some(self.received(delivery))),
        }
    }
}

/// Declares a queue and its bindings from its definition on first use.
pub struct LapinQueueFactory {
    channel: Arc<LapinChannel>,
    definition: QueueDefinition,
    tag_generator: Arc<dyn ConsumerTagGenerator>,
    queue: OnceCell<Arc<LapinQueue>>,
}

impl LapinQueueFactory {
    pub fn new(channel: Arc<LapinChannel>, definition: QueueDefinition) -> LapinQueueFactory {
        LapinQueueFactory {
            channel,
            definition,
            tag_generator: Arc::new(EmptyConsumerTagGenerator),
            queue: OnceCell::new(),
        }
    }

    pub fn with_tag_generator(mut self, tag_generator: Arc<dyn ConsumerTagGenerator>) -> Self {
        self.tag_generator = tag_generator;
        self
    }

    fn arguments(&self) -> FieldTable {
        let def = &self.definition;
        let mut queue_args = BTreeMap::new();

        if let Some(ttl) = def.ttl {
            queue_args.insert(
                ShortString::from(AMQP_HEADERS_MESSAGE_TTL),
                AMQPValue::LongInt(LongInt::from(ttl)),
            );
        }

        if let Some(max_length) = def.max_length {
            queue_args.insert(
                ShortString::from(AMQP_HEADERS_MAX_LENGTH),
                AMQPValue::LongInt(LongInt::from(max_length)),
            );
        }

        if let Some(max_length_bytes) = def.max_length_bytes {
            queue_args.insert(
                ShortString::from(AMQP_HEADERS_MAX_LENGTH_BYTES),
                AMQPValue::LongInt(LongInt::from(max_length_bytes)),
            );
        }

        if let Some(exchange) = &def.dead_letter_exchange {
            queue_args.insert(
                ShortString::from(AMQP_HEADERS_DEAD_LETTER_EXCHANGE),
                AMQPValue::LongString(LongString::from(exchange.as_str())),
            );
        }

        if let Some(routing_key) = &def.dead_letter_routing_key {
            queue_args.insert(
                ShortString::from(AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY),
                AMQPValue::LongString(LongString::from(routing_key.as_str())),
            );
        }

        FieldTable::from(queue_args)
    }

    async fn declare(&self) -> Result<Arc<LapinQueue>, AmqpError> {
        let def = &self.definition;
        debug!("creating queue: {}", def.name);

        match self
            .channel
            .inner()
            .queue_declare(
                &def.name,
                QueueDeclareOptions {
                    passive: def.passive,
                    durable: def.durable,
                    exclusive: def.exclusive,
                    auto_delete: def.delete,
                    nowait: def.no_wait,
                },
                self.arguments(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to declare the queue");
                Err(AmqpError::DeclareQueueError(def.name.clone()))
            }
            _ => {
                debug!("queue: {} was created", def.name);
                Ok(())
            }
        }?;

        for binding in def.bindings() {
            debug!(
                "binding queue: {} to the exchange: {} with the key: {}",
                def.name,
                binding.exchange_name(),
                binding.key()
            );

            match self
                .channel
                .inner()
                .queue_bind(
                    &def.name,
                    binding.exchange_name(),
                    binding.key(),
                    QueueBindOptions { nowait: false },
                    FieldTable::default(),
                )
                .await
            {
                Err(err) => {
                    error!(error = err.to_string(), "error to bind queue to exchange");

                    Err(AmqpError::BindingExchangeToQueueError(
                        binding.exchange_name().to_owned(),
                        def.name.clone(),
                    ))
                }
                _ => Ok(()),
            }?;
        }

        Ok(Arc::new(LapinQueue {
            channel: self.channel.clone(),
            name: def.name.clone(),
            consumer_tag: self.tag_generator.generate(),
            consumer: Mutex::new(None),
            acknowledger: Arc::new(LapinAcknowledger {
                channel: self.channel.clone(),
            }),
        }))
    }
}

#[async_trait]
impl QueueFactory for LapinQueueFactory {
    async fn create(&self) -> Result<Arc<dyn Queue>, AmqpError> {
        let queue: Arc<dyn Queue> = self
            .queue
            .get_or_try_init(|| self.declare())
            .await?
            .clone();

        Ok(queue)
    }
}
