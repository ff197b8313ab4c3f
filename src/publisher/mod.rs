// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Publisher
//!
//! This module provides the `Publisher` trait and its exchange-backed implementation.
//! Every publish runs through the configured middleware chain before reaching the
//! exchange, so cross-cutting behavior (logging, message ids, trace propagation,
//! filtering) stays out of the transport.

pub mod middleware;

use crate::{
    errors::AmqpError,
    exchange::ExchangeFactory,
    message::{DelayMessage, Message},
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::error;

pub use middleware::{
    LoggingMiddleware, MessageIdMiddleware, Next, PublisherMiddleware, PublisherMiddlewares,
    TraceContextMiddleware,
};

/// Publishes messages with a routing key.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, message: Message, routing_key: &str) -> Result<(), AmqpError>;
}

/// Publisher sending to the exchange produced by an exchange factory.
pub struct ExchangePublisher {
    exchange_factory: Arc<dyn ExchangeFactory>,
    middlewares: PublisherMiddlewares,
}

impl ExchangePublisher {
    pub fn new(
        exchange_factory: Arc<dyn ExchangeFactory>,
        middlewares: PublisherMiddlewares,
    ) -> Arc<ExchangePublisher> {
        Arc::new(ExchangePublisher {
            exchange_factory,
            middlewares,
        })
    }
}

#[async_trait]
impl Publisher for ExchangePublisher {
    /// Runs the message through the middleware chain and publishes it.
    ///
    /// A middleware that does not call its continuation drops the message without an
    /// error.
    async fn publish(&self, message: Message, routing_key: &str) -> Result<(), AmqpError> {
        let exchange = self.exchange_factory.create().await?;

        self.middlewares
            .executable(exchange.as_ref())
            .run(message, routing_key.to_owned())
            .await
            .inspect_err(|err| {
                error!(
                    error = err.to_string(),
                    exchange = exchange.name(),
                    routing_key,
                    "error publishing message"
                )
            })
    }
}

/// Publishes [`DelayMessage`]s into the landfill with its routing key.
pub struct DelayPublisher {
    publisher: Arc<dyn Publisher>,
    landfill_routing_key: String,
}

impl DelayPublisher {
    /// `publisher` must send to the delay exchange the landfill queue is bound to.
    pub fn new(publisher: Arc<dyn Publisher>, landfill_routing_key: &str) -> DelayPublisher {
        DelayPublisher {
            publisher,
            landfill_routing_key: landfill_routing_key.to_owned(),
        }
    }

    pub async fn publish(&self, message: DelayMessage) -> Result<(), AmqpError> {
        self.publisher
            .publish(message.into_message(), &self.landfill_routing_key)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        exchange::{Exchange, MockExchange, MockExchangeFactory},
        headers::HeaderValue,
        message::{Payload, HEADER_RETRY_COUNTER, HEADER_ROUTING_KEY},
    };
    use std::sync::Mutex;

    fn factory_with(exchange: MockExchange) -> Arc<MockExchangeFactory> {
        let exchange: Arc<dyn Exchange> = Arc::new(exchange);
        let mut factory = MockExchangeFactory::new();
        factory
            .expect_create()
            .returning(move || Ok(exchange.clone()));
        Arc::new(factory)
    }

    struct Discard;

    #[async_trait]
    impl PublisherMiddleware for Discard {
        async fn handle(
            &self,
            _message: Message,
            _routing_key: String,
            _next: Next<'_>,
        ) -> Result<(), AmqpError> {
            Ok(())
        }
    }

    struct Prefix(&'static str, Arc<Mutex<Vec<&'static str>>>);

    #[async_trait]
    impl PublisherMiddleware for Prefix {
        async fn handle(
            &self,
            message: Message,
            routing_key: String,
            next: Next<'_>,
        ) -> Result<(), AmqpError> {
            self.1.lock().unwrap().push(self.0);
            next.run(message, format!("{}.{}", self.0, routing_key)).await
        }
    }

    #[tokio::test]
    async fn publish_reaches_the_exchange_once() {
        let mut exchange = MockExchange::new();
        exchange.expect_name().returning(|| "events".to_owned());
        exchange
            .expect_publish()
            .withf(|message, key| {
                key == "foo.bar" && *message == Message::new(Payload::new("some"))
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let publisher =
            ExchangePublisher::new(factory_with(exchange), PublisherMiddlewares::new());

        publisher
            .publish(Message::new(Payload::new("some")), "foo.bar")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn middlewares_run_in_order_and_rewrite_the_routing_key() {
        let calls = Arc::new(Mutex::new(vec![]));
        let mut exchange = MockExchange::new();
        exchange.expect_name().returning(|| "events".to_owned());
        exchange
            .expect_publish()
            .withf(|_, key| key == "b.a.key")
            .times(1)
            .returning(|_, _| Ok(()));

        let middlewares = PublisherMiddlewares::new()
            .with(Arc::new(Prefix("a", calls.clone())))
            .with(Arc::new(Prefix("b", calls.clone())));
        let publisher = ExchangePublisher::new(factory_with(exchange), middlewares);

        publisher
            .publish(Message::new(Payload::new("x")), "key")
            .await
            .unwrap();

        assert_eq!(*calls.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn middleware_without_next_drops_the_message() {
        let mut exchange = MockExchange::new();
        exchange.expect_name().returning(|| "events".to_owned());
        exchange.expect_publish().never();

        let publisher = ExchangePublisher::new(
            factory_with(exchange),
            PublisherMiddlewares::new().with(Arc::new(Discard)),
        );

        assert!(publisher
            .publish(Message::new(Payload::new("x")), "key")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn transport_failure_is_propagated() {
        let mut exchange = MockExchange::new();
        exchange.expect_name().returning(|| "events".to_owned());
        exchange
            .expect_publish()
            .returning(|_, _| Err(AmqpError::PublishFailure("connection reset".to_owned())));

        let publisher =
            ExchangePublisher::new(factory_with(exchange), PublisherMiddlewares::new());

        assert_eq!(
            publisher.publish(Message::new(Payload::new("x")), "key").await,
            Err(AmqpError::PublishFailure("connection reset".to_owned()))
        );
    }

    #[tokio::test]
    async fn delay_publisher_uses_the_landfill_routing_key() {
        let mut inner = MockPublisher::new();
        inner
            .expect_publish()
            .withf(|_, key| key == "landfill")
            .times(1)
            .returning(|message, _| {
                assert_eq!(
                    message.headers().get(HEADER_ROUTING_KEY),
                    Some(&HeaderValue::from("order.created"))
                );
                assert_eq!(
                    message.headers().get(HEADER_RETRY_COUNTER),
                    Some(&HeaderValue::Int(2))
                );
                Ok(())
            });

        let delay = DelayPublisher::new(Arc::new(inner), "landfill");
        let message = DelayMessage::new(
            Message::new(Payload::new("x")),
            "orders",
            "order.created",
            2,
        );

        delay.publish(message).await.unwrap();
    }
}
