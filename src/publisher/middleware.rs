// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Publisher Middlewares
//!
//! An ordered chain of behaviors wrapped around the exchange publish. Each middleware
//! receives the message, the routing key and a [`Next`] continuation holding the rest
//! of the chain; calling it continues delivery, returning without calling it drops
//! the message silently.

use crate::{errors::AmqpError, exchange::Exchange, message::Message, otel};
use async_trait::async_trait;
use opentelemetry::Context;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// A link of the publisher chain.
#[async_trait]
pub trait PublisherMiddleware: Send + Sync {
    async fn handle(
        &self,
        message: Message,
        routing_key: String,
        next: Next<'_>,
    ) -> Result<(), AmqpError>;
}

/// The remainder of the chain, ending with the exchange publish.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    middlewares: &'a [Arc<dyn PublisherMiddleware>],
    exchange: &'a dyn Exchange,
}

impl<'a> Next<'a> {
    pub async fn run(self, message: Message, routing_key: String) -> Result<(), AmqpError> {
        match self.middlewares.split_first() {
            Some((middleware, rest)) => {
                let next = Next {
                    middlewares: rest,
                    exchange: self.exchange,
                };
                middleware.handle(message, routing_key, next).await
            }
            None => self.exchange.publish(&message, &routing_key).await,
        }
    }
}

/// The configured middleware chain of a publisher.
#[derive(Clone, Default)]
pub struct PublisherMiddlewares {
    middlewares: Vec<Arc<dyn PublisherMiddleware>>,
}

impl PublisherMiddlewares {
    pub fn new() -> Self {
        PublisherMiddlewares::default()
    }

    /// Appends a middleware; middlewares run in the order they were added.
    pub fn with(mut self, middleware: Arc<dyn PublisherMiddleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    /// Builds the continuation for one publish call, terminating in `exchange`.
    pub fn executable<'a>(&'a self, exchange: &'a dyn Exchange) -> Next<'a> {
        Next {
            middlewares: &self.middlewares,
            exchange,
        }
    }
}

/// Logs every publish before and after the rest of the chain runs.
pub struct LoggingMiddleware;

#[async_trait]
impl PublisherMiddleware for LoggingMiddleware {
    async fn handle(
        &self,
        message: Message,
        routing_key: String,
        next: Next<'_>,
    ) -> Result<(), AmqpError> {
        let message_id = message.identifier().message_id().unwrap_or_default().to_owned();
        debug!(message_id, routing_key, "publishing message");

        next.run(message, routing_key).await?;

        debug!(message_id, "message published");
        Ok(())
    }
}

/// Assigns a random message id to messages that don't carry one.
pub struct MessageIdMiddleware;

#[async_trait]
impl PublisherMiddleware for MessageIdMiddleware {
    async fn handle(
        &self,
        message: Message,
        routing_key: String,
        next: Next<'_>,
    ) -> Result<(), AmqpError> {
        if message.identifier().message_id().is_some() {
            return next.run(message, routing_key).await;
        }

        let identifier = message
            .identifier()
            .with_message_id(Uuid::new_v4().to_string());

        next.run(message.with_identifier(identifier), routing_key)
            .await
    }
}

/// Injects the current OpenTelemetry context into the message headers.
pub struct TraceContextMiddleware;

#[async_trait]
impl PublisherMiddleware for TraceContextMiddleware {
    async fn handle(
        &self,
        message: Message,
        routing_key: String,
        next: Next<'_>,
    ) -> Result<(), AmqpError> {
        let headers = otel::inject(&Context::current(), message.headers());

        next.run(message.with_headers(headers), routing_key).await
    }
}
