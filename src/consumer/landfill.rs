// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Landfill Retry Handler
//!
//! Delayed retries without a scheduler. A message published to the delay exchange with
//! the landfill routing key waits in a queue with a message TTL; when it expires the
//! broker dead-letters it, adding an `x-death` record, and it lands on the queue this
//! handler consumes.
//!
//! The retry state travels in the headers: `retry-counter` holds the remaining passes,
//! `publisher-key` and `routing-key` the final destination. While passes remain the
//! message goes back to the landfill, afterwards it is delivered to its destination
//! without the retry headers.

use crate::{
    consumer::handler::MessageHandler,
    errors::AmqpError,
    headers::Headers,
    message::{Message, HEADER_PUBLISHER_KEY, HEADER_RETRY_COUNTER, HEADER_ROUTING_KEY},
    publisher::Publisher,
    received::ReceivedMessage,
    registry::PublisherRegistry,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Constant for the x-death header used in the broker's dead-lettering mechanism
pub const AMQP_HEADERS_X_DEATH: &str = "x-death";
/// Constant for the routing keys field of an x-death record
pub const AMQP_HEADERS_ROUTING_KEYS: &str = "routing-keys";

/// What happens to a message whose retry handling failed.
#[derive(Clone, Default)]
pub enum FallbackPolicy {
    /// Re-raise the error; the consumer requeues the delivery.
    #[default]
    Propagate,
    /// Publish the original message to a fallback destination and treat the failure as
    /// handled.
    Publish {
        publisher: Arc<dyn Publisher>,
        routing_key: String,
    },
}

/// Handles messages expired from the landfill.
pub struct ExpiredMessageHandler {
    publisher_registry: Arc<PublisherRegistry>,
    delay_publisher: Arc<dyn Publisher>,
    landfill_routing_key: String,
    fallback: FallbackPolicy,
}

impl ExpiredMessageHandler {
    /// `delay_publisher` must publish to the exchange the landfill queue is bound to
    /// with `landfill_routing_key`.
    pub fn new(
        publisher_registry: Arc<PublisherRegistry>,
        delay_publisher: Arc<dyn Publisher>,
        landfill_routing_key: &str,
    ) -> ExpiredMessageHandler {
        ExpiredMessageHandler {
            publisher_registry,
            delay_publisher,
            landfill_routing_key: landfill_routing_key.to_owned(),
            fallback: FallbackPolicy::default(),
        }
    }

    pub fn with_fallback(mut self, fallback: FallbackPolicy) -> Self {
        self.fallback = fallback;
        self
    }

    async fn retry(&self, message: Message) -> Result<(), AmqpError> {
        self.delay_publisher
            .publish(message, &self.landfill_routing_key)
            .await
    }

    async fn deliver(&self, headers: &Headers, message: Message) -> Result<(), AmqpError> {
        let publisher_key = required_str(headers, HEADER_PUBLISHER_KEY)?;
        let routing_key = required_str(headers, HEADER_ROUTING_KEY)?;

        let publisher = self.publisher_registry.get(publisher_key)?;
        debug!(publisher_key, routing_key, "delivering expired message");

        publisher.publish(message, routing_key).await
    }
}

#[async_trait]
impl MessageHandler for ExpiredMessageHandler {
    /// True when the first `x-death` record names the landfill routing key.
    fn supports(&self, message: &ReceivedMessage) -> bool {
        let first_routing_key = message
            .headers()
            .get(AMQP_HEADERS_X_DEATH)
            .and_then(|deaths| deaths.as_array())
            .and_then(|deaths| deaths.first())
            .and_then(|death| death.as_table())
            .and_then(|death| death.get(AMQP_HEADERS_ROUTING_KEYS))
            .and_then(|keys| keys.as_array())
            .and_then(|keys| keys.first())
            .and_then(|key| key.as_str());

        first_routing_key == Some(self.landfill_routing_key.as_str())
    }

    async fn handle(&self, message: &ReceivedMessage) -> Result<(), AmqpError> {
        let headers = message.headers();

        let counter = match headers.get(HEADER_RETRY_COUNTER) {
            Some(value) => value.as_i64().ok_or_else(|| {
                AmqpError::HandlerFailure(format!("`{}` is not an integer", HEADER_RETRY_COUNTER))
            })?,
            None => 1,
        };

        // a counter of 0 or less is delivered right away
        let counter = counter.checked_sub(1).ok_or_else(|| {
            AmqpError::HandlerFailure(format!("`{}` is out of range", HEADER_RETRY_COUNTER))
        })?;

        if counter > 0 {
            debug!(counter, "sending message back to landfill");

            let retry = Message::from_parts(
                message.payload().clone(),
                None,
                Some(headers.with(HEADER_RETRY_COUNTER, counter)),
                Some(message.identifier().clone()),
            );

            return self.retry(retry).await;
        }

        let target = Message::from_parts(
            message.payload().clone(),
            None,
            Some(headers.without(&[
                HEADER_PUBLISHER_KEY,
                HEADER_ROUTING_KEY,
                HEADER_RETRY_COUNTER,
            ])),
            Some(message.identifier().clone()),
        );

        self.deliver(headers, target).await
    }

    async fn catch_error(
        &self,
        message: &ReceivedMessage,
        error: AmqpError,
    ) -> Result<(), AmqpError> {
        match &self.fallback {
            FallbackPolicy::Propagate => Err(error),
            FallbackPolicy::Publish {
                publisher,
                routing_key,
            } => {
                warn!(
                    error = error.to_string(),
                    routing_key, "publishing expired message to fallback"
                );

                publisher
                    .publish(message.message().clone(), routing_key)
                    .await
                    .inspect_err(|err| {
                        error!(error = err.to_string(), "failure to publish to fallback")
                    })
            }
        }
    }
}

fn required_str<'h>(headers: &'h Headers, key: &str) -> Result<&'h str, AmqpError> {
    headers
        .get(key)
        .and_then(|value| value.as_str())
        .ok_or_else(|| AmqpError::HandlerFailure(format!("missing `{}` header", key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        headers::HeaderValue,
        message::{Identifier, Payload},
        publisher::MockPublisher,
        received::MockAcknowledger,
    };

    const LANDFILL: &str = "landfill";

    fn x_death(routing_key: &str) -> HeaderValue {
        let record: Headers = [
            ("count", HeaderValue::Int(1)),
            (
                AMQP_HEADERS_ROUTING_KEYS,
                HeaderValue::Array(vec![HeaderValue::from(routing_key)]),
            ),
        ]
        .into_iter()
        .collect();

        HeaderValue::Array(vec![HeaderValue::Table(record)])
    }

    fn received(headers: Headers) -> ReceivedMessage {
        let message = Message::new(Payload::new("some payload"))
            .with_headers(headers)
            .with_identifier(Identifier::new(Some("id-1".to_owned()), None, None));

        ReceivedMessage::new(
            message,
            7,
            "expired",
            "delay",
            Arc::new(MockAcknowledger::new()),
        )
    }

    fn retry_headers(counter: Option<i64>) -> Headers {
        let headers: Headers = [
            ("custom", HeaderValue::from("kept")),
            (AMQP_HEADERS_X_DEATH, x_death(LANDFILL)),
            (HEADER_PUBLISHER_KEY, HeaderValue::from("orders")),
            (HEADER_ROUTING_KEY, HeaderValue::from("order.created")),
        ]
        .into_iter()
        .collect();

        match counter {
            Some(counter) => headers.with(HEADER_RETRY_COUNTER, counter),
            None => headers,
        }
    }

    fn handler(registry: PublisherRegistry, delay: MockPublisher) -> ExpiredMessageHandler {
        ExpiredMessageHandler::new(Arc::new(registry), Arc::new(delay), LANDFILL)
    }

    #[test]
    fn supports_only_landfill_deaths() {
        let handler = handler(PublisherRegistry::new(), MockPublisher::new());

        assert!(handler.supports(&received(retry_headers(Some(2)))));
        assert!(!handler.supports(&received(Headers::new())));
        assert!(!handler.supports(&received(
            Headers::new().with(AMQP_HEADERS_X_DEATH, x_death("other"))
        )));
        assert!(!handler.supports(&received(
            Headers::new().with(AMQP_HEADERS_X_DEATH, HeaderValue::Array(vec![]))
        )));

        let without_keys: Headers = [("count", 1)].into_iter().collect();
        assert!(!handler.supports(&received(Headers::new().with(
            AMQP_HEADERS_X_DEATH,
            HeaderValue::Array(vec![HeaderValue::Table(without_keys)])
        ))));
    }

    #[tokio::test]
    async fn remaining_passes_go_back_to_the_landfill() {
        let mut delay = MockPublisher::new();
        delay
            .expect_publish()
            .withf(|_, key| key == LANDFILL)
            .times(1)
            .returning(|message, _| {
                assert_eq!(message.payload().body(), b"some payload");
                assert_eq!(
                    message.headers().get(HEADER_RETRY_COUNTER),
                    Some(&HeaderValue::Int(2))
                );
                assert_eq!(
                    message.headers().get(HEADER_PUBLISHER_KEY),
                    Some(&HeaderValue::from("orders"))
                );
                assert_eq!(message.identifier().message_id(), Some("id-1"));
                Ok(())
            });

        let handler = handler(PublisherRegistry::new(), delay);

        handler
            .handle(&received(retry_headers(Some(3))))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn last_pass_is_delivered_without_retry_headers() {
        for counter in [Some(1), None] {
            let mut target = MockPublisher::new();
            target
                .expect_publish()
                .withf(|_, key| key == "order.created")
                .times(1)
                .returning(|message, _| {
                    let headers = message.headers();
                    assert!(!headers.has(HEADER_PUBLISHER_KEY));
                    assert!(!headers.has(HEADER_ROUTING_KEY));
                    assert!(!headers.has(HEADER_RETRY_COUNTER));
                    assert_eq!(headers.get("custom"), Some(&HeaderValue::from("kept")));
                    assert_eq!(message.payload().body(), b"some payload");
                    Ok(())
                });

            let mut registry = PublisherRegistry::new();
            registry.add("orders", Arc::new(target)).unwrap();

            let mut delay = MockPublisher::new();
            delay.expect_publish().never();

            handler(registry, delay)
                .handle(&received(retry_headers(counter)))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn exhausted_counters_are_delivered_right_away() {
        for counter in [0, -3] {
            let mut target = MockPublisher::new();
            target
                .expect_publish()
                .withf(|message, key| {
                    key == "order.created" && !message.headers().has(HEADER_RETRY_COUNTER)
                })
                .times(1)
                .returning(|_, _| Ok(()));

            let mut registry = PublisherRegistry::new();
            registry.add("orders", Arc::new(target)).unwrap();

            let mut delay = MockPublisher::new();
            delay.expect_publish().never();

            handler(registry, delay)
                .handle(&received(retry_headers(Some(counter))))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn counter_underflow_is_a_handler_failure() {
        let mut delay = MockPublisher::new();
        delay.expect_publish().never();

        let handler = handler(PublisherRegistry::new(), delay);

        assert_eq!(
            handler
                .handle(&received(retry_headers(Some(i64::MIN))))
                .await,
            Err(AmqpError::HandlerFailure(
                "`retry-counter` is out of range".to_owned()
            ))
        );
    }

    #[tokio::test]
    async fn unknown_publisher_key_is_not_found() {
        let handler = handler(PublisherRegistry::new(), MockPublisher::new());

        assert_eq!(
            handler.handle(&received(retry_headers(Some(1)))).await,
            Err(AmqpError::NotFound("orders".to_owned()))
        );
    }

    #[tokio::test]
    async fn default_catch_reraises() {
        let handler = handler(PublisherRegistry::new(), MockPublisher::new());
        let error = AmqpError::PublishFailure("down".to_owned());

        assert_eq!(
            handler
                .catch_error(&received(retry_headers(Some(1))), error.clone())
                .await,
            Err(error)
        );
    }

    #[tokio::test]
    async fn fallback_policy_publishes_the_original_message() {
        let mut fallback = MockPublisher::new();
        fallback
            .expect_publish()
            .withf(|message, key| {
                key == "failed" && message.headers().has(HEADER_RETRY_COUNTER)
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let handler = handler(PublisherRegistry::new(), MockPublisher::new()).with_fallback(
            FallbackPolicy::Publish {
                publisher: Arc::new(fallback),
                routing_key: "failed".to_owned(),
            },
        );

        handler
            .catch_error(
                &received(retry_headers(Some(1))),
                AmqpError::PublishFailure("down".to_owned()),
            )
            .await
            .unwrap();
    }
}
