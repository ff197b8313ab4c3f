// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Topology Initialization
//!
//! Exchange and queue factories declare their topology the first time they create an
//! instance. These helpers create every factory named in a key list up front, so the
//! whole topology exists before the first message is published or consumed.

use crate::{
    errors::AmqpError,
    registry::{ExchangeFactoryRegistry, QueueFactoryRegistry},
};
use tracing::{debug, error};

/// Creates the exchange of every factory registered under `keys`, in order.
///
/// Stops at the first unknown key or failed declaration.
pub async fn initialize_exchanges<K>(
    registry: &ExchangeFactoryRegistry,
    keys: K,
) -> Result<(), AmqpError>
where
    K: IntoIterator,
    K::Item: AsRef<str>,
{
    for key in keys {
        let key = key.as_ref();
        let exchange = registry.get(key)?.create().await.inspect_err(|err| {
            error!(error = err.to_string(), key, "failure to initialize exchange")
        })?;

        debug!(key, name = exchange.name(), "exchange initialized");
    }

    Ok(())
}

/// Creates the queue of every factory registered under `keys`, in order.
///
/// Stops at the first unknown key or failed declaration.
pub async fn initialize_queues<K>(
    registry: &QueueFactoryRegistry,
    keys: K,
) -> Result<(), AmqpError>
where
    K: IntoIterator,
    K::Item: AsRef<str>,
{
    for key in keys {
        let key = key.as_ref();
        let queue = registry.get(key)?.create().await.inspect_err(|err| {
            error!(error = err.to_string(), key, "failure to initialize queue")
        })?;

        debug!(key, name = queue.name(), "queue initialized");
    }

    Ok(())
}
