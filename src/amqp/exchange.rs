// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Lapin Exchanges
//!
//! Exchanges declared on a lapin channel from an [`ExchangeDefinition`] on first use.

use crate::{
    amqp::{channel::LapinChannel, convert},
    errors::AmqpError,
    exchange::{Exchange, ExchangeDefinition, ExchangeFactory},
    message::Message,
};
use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ExchangeDeclareOptions};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, error};

/// A declared exchange.
pub struct LapinExchange {
    channel: Arc<LapinChannel>,
    name: String,
}

#[async_trait]
impl Exchange for LapinExchange {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn publish(&self, message: &Message, routing_key: &str) -> Result<(), AmqpError> {
        match self
            .channel
            .inner()
            .basic_publish(
                &self.name,
                routing_key,
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                message.payload().body(),
                convert::properties(message),
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    exchange = self.name,
                    routing_key,
                    "error publishing message"
                );
                Err(AmqpError::PublishFailure(err.to_string()))
            }
            _ => Ok(()),
        }
    }
}

/// Declares an exchange from its definition on first use.
pub struct LapinExchangeFactory {
    channel: Arc<LapinChannel>,
    definition: ExchangeDefinition,
    exchange: OnceCell<Arc<LapinExchange>>,
}

impl LapinExchangeFactory {
    pub fn new(
        channel: Arc<LapinChannel>,
        definition: ExchangeDefinition,
    ) -> LapinExchangeFactory {
        LapinExchangeFactory {
            channel,
            definition,
            exchange: OnceCell::new(),
        }
    }

    async fn declare(&self) -> Result<Arc<LapinExchange>, AmqpError> {
        let def = &self.definition;

        // the default exchange always exists and can't be declared
        if !def.name.is_empty() {
            debug!("creating exchange: {}", def.name);

            match self
                .channel
                .inner()
                .exchange_declare(
                    &def.name,
                    lapin::ExchangeKind::from(&def.kind),
                    ExchangeDeclareOptions {
                        passive: def.passive,
                        durable: def.durable,
                        auto_delete: def.delete,
                        internal: def.internal,
                        nowait: def.no_wait,
                    },
                    convert::field_table_from(def.params.iter()),
                )
                .await
            {
                Err(err) => {
                    error!(
                        error = err.to_string(),
                        name = def.name,
                        "error to declare the exchange"
                    );
                    Err(AmqpError::DeclareExchangeError(def.name.clone()))
                }
                _ => Ok(()),
            }?;

            debug!("exchange: {} was created", def.name);
        }

        Ok(Arc::new(LapinExchange {
            channel: self.channel.clone(),
            name: def.name.clone(),
        }))
    }
}

#[async_trait]
impl ExchangeFactory for LapinExchangeFactory {
    async fn create(&self) -> Result<Arc<dyn Exchange>, AmqpError> {
        let exchange: Arc<dyn Exchange> = self
            .exchange
            .get_or_try_init(|| self.declare())
            .await?
            .clone();

        Ok(exchange)
    }
}
