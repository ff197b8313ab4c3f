// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Exchanges
//!
//! This module provides the exchange capability consumed by publishers, the factory
//! that declares and hands out exchanges, and the builder used to describe an exchange
//! to a backend.

use crate::{errors::AmqpError, headers::HeaderValue, message::Message};
use async_trait::async_trait;
use std::{collections::BTreeMap, sync::Arc};

/// Constant for the argument used to specify the delayed exchange type
pub const AMQP_HEADERS_DELAYED_EXCHANGE_TYPE: &str = "x-delayed-type";

/// Represents the types of exchanges available in the broker.
///
/// - Direct: Routes messages to queues based on an exact match of routing keys
/// - Fanout: Broadcasts messages to all bound queues regardless of routing keys
/// - Topic: Routes messages based on wildcard pattern matching of routing keys
/// - Headers: Routes based on message header values instead of routing keys
/// - XMessageDelayed: Extension for delayed message delivery (plugin required)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ExchangeKind {
    #[default]
    Direct,
    Fanout,
    Topic,
    Headers,
    XMessageDelayed,
}

/// Sends messages to a named exchange.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Exchange: Send + Sync {
    fn name(&self) -> String;

    /// Publishes the message body, properties, headers and identifier with the given
    /// routing key. Transport failures surface as [`AmqpError::PublishFailure`].
    async fn publish(&self, message: &Message, routing_key: &str) -> Result<(), AmqpError>;
}

/// Declares an exchange on first use and returns it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeFactory: Send + Sync {
    async fn create(&self) -> Result<Arc<dyn Exchange>, AmqpError>;
}

/// Definition of an exchange with its configuration parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeDefinition {
    pub(crate) name: String,
    pub(crate) kind: ExchangeKind,
    pub(crate) delete: bool,
    pub(crate) durable: bool,
    pub(crate) passive: bool,
    pub(crate) internal: bool,
    pub(crate) no_wait: bool,
    pub(crate) params: BTreeMap<String, HeaderValue>,
}

impl ExchangeDefinition {
    /// Creates a new direct exchange definition with default parameters.
    pub fn new(name: &str) -> ExchangeDefinition {
        ExchangeDefinition {
            name: name.to_owned(),
            kind: ExchangeKind::Direct,
            delete: false,
            durable: false,
            passive: false,
            internal: false,
            no_wait: false,
            params: BTreeMap::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(mut self, kind: ExchangeKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn direct(mut self) -> Self {
        self.kind = ExchangeKind::Direct;
        self
    }

    pub fn fanout(mut self) -> Self {
        self.kind = ExchangeKind::Fanout;
        self
    }

    pub fn topic(mut self) -> Self {
        self.kind = ExchangeKind::Topic;
        self
    }

    /// Creates a delayed direct exchange.
    ///
    /// This requires the x-delayed-message plugin to be installed on the broker.
    pub fn direct_delayed(mut self) -> Self {
        self.kind = ExchangeKind::XMessageDelayed;
        self.params.insert(
            AMQP_HEADERS_DELAYED_EXCHANGE_TYPE.to_owned(),
            HeaderValue::from("direct"),
        );
        self
    }

    /// Adds a single argument to the exchange.
    pub fn param(mut self, key: &str, value: HeaderValue) -> Self {
        self.params.insert(key.to_owned(), value);
        self
    }

    /// Sets the exchange to auto-delete when no longer used.
    pub fn delete(mut self) -> Self {
        self.delete = true;
        self
    }

    /// Makes the exchange durable, persisting across broker restarts.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Makes the exchange passive, checking for existence without creating it.
    pub fn passive(mut self) -> Self {
        self.passive = true;
        self
    }

    /// Makes the exchange internal, preventing direct publishing.
    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }

    pub fn no_wait(mut self) -> Self {
        self.no_wait = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delayed_exchange_carries_its_routing_type() {
        let def = ExchangeDefinition::new("delay").direct_delayed().durable();

        assert_eq!(def.kind, ExchangeKind::XMessageDelayed);
        assert!(def.durable);
        assert_eq!(
            def.params.get(AMQP_HEADERS_DELAYED_EXCHANGE_TYPE),
            Some(&HeaderValue::from("direct"))
        );
    }
}
