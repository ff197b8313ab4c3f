// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Received Messages
//!
//! A [`ReceivedMessage`] is a delivered [`Message`] plus the delivery metadata and the
//! acknowledgment contract: exactly one of `ack`/`nack` may reach the broker.

use crate::{
    errors::AmqpError,
    headers::Headers,
    message::{Identifier, Message, Options, Payload},
};
use async_trait::async_trait;
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tracing::debug;

/// Sends acknowledgment decisions for delivery tags back to the broker.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self, delivery_tag: u64) -> Result<(), AmqpError>;

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError>;
}

/// A message delivered by the broker and owned by the consuming loop until answered.
pub struct ReceivedMessage {
    message: Message,
    delivery_tag: u64,
    routing_key: String,
    exchange_name: String,
    answered: AtomicBool,
    acknowledger: Arc<dyn Acknowledger>,
}

impl ReceivedMessage {
    pub fn new(
        message: Message,
        delivery_tag: u64,
        routing_key: impl Into<String>,
        exchange_name: impl Into<String>,
        acknowledger: Arc<dyn Acknowledger>,
    ) -> ReceivedMessage {
        ReceivedMessage {
            message,
            delivery_tag,
            routing_key: routing_key.into(),
            exchange_name: exchange_name.into(),
            answered: AtomicBool::new(false),
            acknowledger,
        }
    }

    /// Acknowledges the delivery.
    ///
    /// Fails with [`AmqpError::DuplicateAcknowledgment`] once the message was answered.
    pub async fn ack(&self) -> Result<(), AmqpError> {
        self.mark_answered()?;
        debug!(delivery_tag = self.delivery_tag, "ack message");

        self.acknowledger.ack(self.delivery_tag).await
    }

    /// Rejects the delivery, optionally asking the broker to requeue it.
    ///
    /// Fails with [`AmqpError::DuplicateAcknowledgment`] once the message was answered.
    pub async fn nack(&self, requeue: bool) -> Result<(), AmqpError> {
        self.mark_answered()?;
        debug!(delivery_tag = self.delivery_tag, requeue, "nack message");

        self.acknowledger.nack(self.delivery_tag, requeue).await
    }

    pub fn is_answered(&self) -> bool {
        self.answered.load(Ordering::SeqCst)
    }

    fn mark_answered(&self) -> Result<(), AmqpError> {
        if self.answered.swap(true, Ordering::SeqCst) {
            return Err(AmqpError::DuplicateAcknowledgment(self.delivery_tag));
        }

        Ok(())
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn payload(&self) -> &Payload {
        self.message.payload()
    }

    pub fn options(&self) -> &Options {
        self.message.options()
    }

    pub fn headers(&self) -> &Headers {
        self.message.headers()
    }

    pub fn identifier(&self) -> &Identifier {
        self.message.identifier()
    }

    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn exchange_name(&self) -> &str {
        &self.exchange_name
    }
}

impl fmt::Debug for ReceivedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceivedMessage")
            .field("message", &self.message)
            .field("delivery_tag", &self.delivery_tag)
            .field("routing_key", &self.routing_key)
            .field("exchange_name", &self.exchange_name)
            .field("answered", &self.is_answered())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;

    fn received(acknowledger: MockAcknowledger) -> ReceivedMessage {
        ReceivedMessage::new(
            Message::new(Payload::new("some")),
            123,
            "some",
            "exchange",
            Arc::new(acknowledger),
        )
    }

    #[tokio::test]
    async fn ack_answers_the_delivery() {
        let mut acknowledger = MockAcknowledger::new();
        acknowledger
            .expect_ack()
            .with(eq(123))
            .times(1)
            .returning(|_| Ok(()));

        let message = received(acknowledger);
        message.ack().await.unwrap();

        assert!(message.is_answered());
    }

    #[tokio::test]
    async fn nack_with_and_without_requeue() {
        let mut acknowledger = MockAcknowledger::new();
        acknowledger
            .expect_nack()
            .with(eq(123), eq(false))
            .times(1)
            .returning(|_, _| Ok(()));

        let message = received(acknowledger);
        message.nack(false).await.unwrap();
        assert!(message.is_answered());

        let mut acknowledger = MockAcknowledger::new();
        acknowledger
            .expect_nack()
            .with(eq(123), eq(true))
            .times(1)
            .returning(|_, _| Ok(()));

        received(acknowledger).nack(true).await.unwrap();
    }

    #[tokio::test]
    async fn second_answer_is_rejected() {
        let mut acknowledger = MockAcknowledger::new();
        acknowledger.expect_ack().times(1).returning(|_| Ok(()));
        acknowledger.expect_nack().never();

        let message = received(acknowledger);
        message.ack().await.unwrap();

        assert_eq!(
            message.nack(true).await,
            Err(AmqpError::DuplicateAcknowledgment(123))
        );
        assert_eq!(message.ack().await, Err(AmqpError::DuplicateAcknowledgment(123)));
    }

    #[tokio::test]
    async fn nack_then_ack_is_rejected() {
        let mut acknowledger = MockAcknowledger::new();
        acknowledger.expect_nack().times(1).returning(|_, _| Ok(()));
        acknowledger.expect_ack().never();

        let message = received(acknowledger);
        message.nack(true).await.unwrap();

        assert_eq!(message.ack().await, Err(AmqpError::DuplicateAcknowledgment(123)));
    }
}
