// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Handlers
//!
//! Handlers process received messages. The [`MessageHandlers`] chain dispatches a
//! delivery to every handler that supports it, routes failures through the failing
//! handler's `catch_error`, and acknowledges the delivery once all of them succeeded
//! and none answered it already.

use crate::{errors::AmqpError, received::ReceivedMessage};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Processes received messages.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Whether this handler wants to process the message.
    fn supports(&self, message: &ReceivedMessage) -> bool;

    async fn handle(&self, message: &ReceivedMessage) -> Result<(), AmqpError>;

    /// Called with the error `handle` returned. Returning `Ok` marks the failure as
    /// dealt with; the default re-raises it unchanged.
    async fn catch_error(
        &self,
        _message: &ReceivedMessage,
        error: AmqpError,
    ) -> Result<(), AmqpError> {
        Err(error)
    }
}

/// Ordered chain of message handlers.
#[derive(Clone, Default)]
pub struct MessageHandlers {
    handlers: Vec<Arc<dyn MessageHandler>>,
}

impl MessageHandlers {
    pub fn new() -> Self {
        MessageHandlers::default()
    }

    pub fn with(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.handlers.push(handler);
        self
    }
}

#[async_trait]
impl MessageHandler for MessageHandlers {
    fn supports(&self, message: &ReceivedMessage) -> bool {
        self.handlers.iter().any(|handler| handler.supports(message))
    }

    /// Runs every supporting handler in order.
    ///
    /// Fails with [`AmqpError::HandlerFailure`] when no handler supports the message.
    /// An unanswered message is acknowledged after all supporting handlers succeeded.
    async fn handle(&self, message: &ReceivedMessage) -> Result<(), AmqpError> {
        let mut handled = false;

        for handler in self.handlers.iter() {
            if !handler.supports(message) {
                continue;
            }

            handled = true;
            if let Err(err) = handler.handle(message).await {
                warn!(
                    error = err.to_string(),
                    delivery_tag = message.delivery_tag(),
                    "error whiling handling msg"
                );
                handler.catch_error(message, err).await?;
            }
        }

        if !handled {
            return Err(AmqpError::HandlerFailure(format!(
                "no handler supports message routed with `{}`",
                message.routing_key()
            )));
        }

        if !message.is_answered() {
            message.ack().await?;
        }

        debug!(delivery_tag = message.delivery_tag(), "message successfully processed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        message::{Message, Payload},
        received::MockAcknowledger,
    };

    fn received(acknowledger: MockAcknowledger) -> ReceivedMessage {
        ReceivedMessage::new(
            Message::new(Payload::new("x")),
            1,
            "orders",
            "events",
            Arc::new(acknowledger),
        )
    }

    fn handler(supports: bool, result: Result<(), AmqpError>) -> MockMessageHandler {
        let mut handler = MockMessageHandler::new();
        handler.expect_supports().return_const(supports);
        handler
            .expect_handle()
            .times(usize::from(supports))
            .returning(move |_| result.clone());
        handler
    }

    #[tokio::test]
    async fn acks_after_supporting_handlers_succeed() {
        let mut acknowledger = MockAcknowledger::new();
        acknowledger.expect_ack().times(1).returning(|_| Ok(()));

        let handlers = MessageHandlers::new()
            .with(Arc::new(handler(false, Ok(()))))
            .with(Arc::new(handler(true, Ok(()))))
            .with(Arc::new(handler(true, Ok(()))));

        handlers.handle(&received(acknowledger)).await.unwrap();
    }

    #[tokio::test]
    async fn unsupported_message_fails_without_ack() {
        let mut acknowledger = MockAcknowledger::new();
        acknowledger.expect_ack().never();

        let handlers = MessageHandlers::new().with(Arc::new(handler(false, Ok(()))));
        let message = received(acknowledger);

        assert!(!handlers.supports(&message));
        assert!(matches!(
            handlers.handle(&message).await,
            Err(AmqpError::HandlerFailure(_))
        ));
        assert!(!message.is_answered());
    }

    #[tokio::test]
    async fn handler_error_is_reraised_by_default_catch() {
        let mut acknowledger = MockAcknowledger::new();
        acknowledger.expect_ack().never();

        let mut failing = handler(true, Err(AmqpError::HandlerFailure("boom".to_owned())));
        failing
            .expect_catch_error()
            .times(1)
            .returning(|_, err| Err(err));

        let handlers = MessageHandlers::new().with(Arc::new(failing));

        assert_eq!(
            handlers.handle(&received(acknowledger)).await,
            Err(AmqpError::HandlerFailure("boom".to_owned()))
        );
    }

    #[tokio::test]
    async fn caught_error_lets_the_message_be_acked() {
        let mut acknowledger = MockAcknowledger::new();
        acknowledger.expect_ack().times(1).returning(|_| Ok(()));

        let mut failing = handler(true, Err(AmqpError::HandlerFailure("boom".to_owned())));
        failing
            .expect_catch_error()
            .times(1)
            .returning(|_, _| Ok(()));

        let handlers = MessageHandlers::new().with(Arc::new(failing));

        handlers.handle(&received(acknowledger)).await.unwrap();
    }
}
