// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queues
//!
//! This module provides the queue capability consumed by the spool consumer, the
//! factory that declares and hands out queues, and the builders used to describe a
//! queue and its bindings to a backend. It includes the landfill layout: a queue with
//! a message TTL that dead-letters expired messages back for retry processing.

use crate::{channel::Channel, errors::AmqpError, received::ReceivedMessage};
use async_trait::async_trait;
use std::{sync::Arc, time::Duration};

/// Reads deliveries from a queue.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Queue: Send + Sync {
    fn name(&self) -> String;

    /// The channel the queue consumes on.
    fn channel(&self) -> Arc<dyn Channel>;

    /// Waits up to `timeout` for the next delivery; `None` when nothing arrived.
    async fn receive(&self, timeout: Duration) -> Result<Option<ReceivedMessage>, AmqpError>;
}

/// Declares a queue on first use and returns it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueueFactory: Send + Sync {
    async fn create(&self) -> Result<Arc<dyn Queue>, AmqpError>;
}

/// Definition of a queue with its configuration parameters.
///
/// Supports standard queue options as well as message TTL, max length and
/// dead-lettering, which together build the landfill layout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueDefinition {
    pub(crate) name: String,
    pub(crate) durable: bool,
    pub(crate) delete: bool,
    pub(crate) exclusive: bool,
    pub(crate) passive: bool,
    pub(crate) no_wait: bool,
    pub(crate) ttl: Option<i32>,
    pub(crate) max_length: Option<i32>,
    pub(crate) max_length_bytes: Option<i32>,
    pub(crate) dead_letter_exchange: Option<String>,
    pub(crate) dead_letter_routing_key: Option<String>,
    pub(crate) bindings: Vec<QueueBinding>,
}

impl QueueDefinition {
    /// Creates a new queue definition with standard settings (non-durable,
    /// non-exclusive, no arguments, no bindings).
    pub fn new(name: &str) -> QueueDefinition {
        QueueDefinition {
            name: name.to_owned(),
            ..QueueDefinition::default()
        }
    }

    /// Describes a landfill queue.
    ///
    /// Messages published to `exchange` with `routing_key` wait `ttl` milliseconds in
    /// this queue and are then dead-lettered to the same exchange with
    /// `expired_routing_key`, where the expired-message handler picks them up.
    pub fn landfill(
        name: &str,
        exchange: &str,
        routing_key: &str,
        ttl: i32,
        expired_routing_key: &str,
    ) -> QueueDefinition {
        QueueDefinition::new(name)
            .durable()
            .ttl(ttl)
            .dead_letter(exchange, expired_routing_key)
            .bind(QueueBinding::new(exchange).routing_key(routing_key))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Makes the queue durable, persisting across broker restarts.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Sets the queue to auto-delete when no longer used.
    pub fn delete(mut self) -> Self {
        self.delete = true;
        self
    }

    /// Makes the queue exclusive to the connection.
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    pub fn passive(mut self) -> Self {
        self.passive = true;
        self
    }

    /// Sets the message Time-To-Live (TTL) for the queue, in milliseconds.
    pub fn ttl(mut self, ttl: i32) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Sets the maximum number of messages the queue can hold.
    pub fn max_length(mut self, max: i32) -> Self {
        self.max_length = Some(max);
        self
    }

    /// Sets the maximum size in bytes the queue can hold.
    pub fn max_length_bytes(mut self, max_bytes: i32) -> Self {
        self.max_length_bytes = Some(max_bytes);
        self
    }

    /// Routes rejected, expired and overflowing messages to `exchange` with
    /// `routing_key`.
    pub fn dead_letter(mut self, exchange: &str, routing_key: &str) -> Self {
        self.dead_letter_exchange = Some(exchange.to_owned());
        self.dead_letter_routing_key = Some(routing_key.to_owned());
        self
    }

    pub fn bind(mut self, binding: QueueBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    pub fn bindings(&self) -> &[QueueBinding] {
        &self.bindings
    }
}

/// Binding of a queue to an exchange with a routing key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueBinding {
    pub(crate) exchange_name: String,
    pub(crate) routing_key: String,
}

impl QueueBinding {
    /// Creates a binding to `exchange` with an empty routing key.
    pub fn new(exchange: &str) -> QueueBinding {
        QueueBinding {
            exchange_name: exchange.to_owned(),
            routing_key: String::new(),
        }
    }

    pub fn routing_key(mut self, key: &str) -> Self {
        self.routing_key = key.to_owned();
        self
    }

    pub fn exchange_name(&self) -> &str {
        &self.exchange_name
    }

    pub fn key(&self) -> &str {
        &self.routing_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn landfill_dead_letters_back_to_the_exchange() {
        let def = QueueDefinition::landfill("delay.5s", "delay", "landfill.5s", 5000, "expired");

        assert_eq!(def.ttl, Some(5000));
        assert!(def.durable);
        assert_eq!(def.dead_letter_exchange.as_deref(), Some("delay"));
        assert_eq!(def.dead_letter_routing_key.as_deref(), Some("expired"));
        assert_eq!(
            def.bindings(),
            &[QueueBinding::new("delay").routing_key("landfill.5s")]
        );
    }
}
