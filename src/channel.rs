// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Channel Capability
//!
//! The channel operations the delivery layer needs from a broker backend: the
//! transactional primitives and the prefetch window.

use crate::errors::AmqpError;
use async_trait::async_trait;
use std::sync::Arc;

/// A broker channel.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Channel: Send + Sync {
    async fn start_transaction(&self) -> Result<(), AmqpError>;

    async fn commit_transaction(&self) -> Result<(), AmqpError>;

    async fn rollback_transaction(&self) -> Result<(), AmqpError>;

    /// Limits the number of unacknowledged deliveries in flight.
    async fn set_prefetch_count(&self, count: u16) -> Result<(), AmqpError>;
}

/// Creates (or hands out the already created) channel.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChannelFactory: Send + Sync {
    async fn create(&self) -> Result<Arc<dyn Channel>, AmqpError>;
}
