// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Lapin Channels
//!
//! A lapin channel behind the [`Channel`] contract, with transaction and prefetch
//! control, and the factory that opens it lazily on an [`AmqpConnection`].

use crate::{
    amqp::connection::AmqpConnection,
    channel::{Channel, ChannelFactory},
    errors::AmqpError,
};
use async_trait::async_trait;
use lapin::options::{BasicAckOptions, BasicNackOptions, BasicQosOptions};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, error};

/// A lapin channel.
pub struct LapinChannel {
    inner: lapin::Channel,
}

impl LapinChannel {
    pub fn new(inner: lapin::Channel) -> LapinChannel {
        LapinChannel { inner }
    }

    pub(crate) fn inner(&self) -> &lapin::Channel {
        &self.inner
    }

    pub(crate) async fn ack(&self, delivery_tag: u64) -> Result<(), AmqpError> {
        self.inner
            .basic_ack(delivery_tag, BasicAckOptions { multiple: false })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), delivery_tag, "error to ack message");
                AmqpError::AckMessageError {}
            })
    }

    pub(crate) async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError> {
        self.inner
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    multiple: false,
                    requeue,
                },
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), delivery_tag, "error to nack message");
                AmqpError::NackMessageError {}
            })
    }
}

#[async_trait]
impl Channel for LapinChannel {
    async fn start_transaction(&self) -> Result<(), AmqpError> {
        self.inner.tx_select().await.map_err(|err| {
            error!(error = err.to_string(), "failure to start transaction");
            AmqpError::TransactionError(err.to_string())
        })
    }

    async fn commit_transaction(&self) -> Result<(), AmqpError> {
        self.inner.tx_commit().await.map_err(|err| {
            error!(error = err.to_string(), "failure to commit transaction");
            AmqpError::TransactionError(err.to_string())
        })
    }

    async fn rollback_transaction(&self) -> Result<(), AmqpError> {
        self.inner.tx_rollback().await.map_err(|err| {
            error!(error = err.to_string(), "failure to rollback transaction");
            AmqpError::TransactionError(err.to_string())
        })
    }

    async fn set_prefetch_count(&self, count: u16) -> Result<(), AmqpError> {
        debug!(count, "configuring channel qos");

        self.inner
            .basic_qos(count, BasicQosOptions { global: false })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "failure to configure qos");
                AmqpError::QoSDeclarationError(err.to_string())
            })
    }
}

/// Opens one channel on first use and returns it on every call.
pub struct LapinChannelFactory {
    connection: Arc<AmqpConnection>,
    channel: OnceCell<Arc<LapinChannel>>,
}

impl LapinChannelFactory {
    pub fn new(connection: Arc<AmqpConnection>) -> LapinChannelFactory {
        LapinChannelFactory {
            connection,
            channel: OnceCell::new(),
        }
    }

    /// The shared channel with its concrete type, for the exchange and queue factories.
    pub async fn channel(&self) -> Result<Arc<LapinChannel>, AmqpError> {
        self.channel
            .get_or_try_init(|| async {
                self.connection.create_channel().await.map(Arc::new)
            })
            .await
            .cloned()
    }
}

#[async_trait]
impl ChannelFactory for LapinChannelFactory {
    async fn create(&self) -> Result<Arc<dyn Channel>, AmqpError> {
        let channel: Arc<dyn Channel> = self.channel().await?;
        Ok(channel)
    }
}
