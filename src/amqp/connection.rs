// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Connection Management
//!
//! Establishes the connection to the broker from an [`AmqpConfig`] and opens channels
//! on it. Lifecycle changes are broadcast to subscribers as [`ConnectionEvent`]s; the
//! receiver returned by [`AmqpConnection::connect`] starts with
//! [`ConnectionEvent::Connected`]. The connection is not re-established automatically.

use crate::{amqp::channel::LapinChannel, config::AmqpConfig, errors::AmqpError};
use lapin::{types::LongString, Connection, ConnectionProperties};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error};

const EVENTS_CAPACITY: usize = 16;

/// Connection lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    /// The connection was closed or lost, with the reason.
    Disconnected(String),
}

/// A broker connection shared by the channels opened on it.
pub struct AmqpConnection {
    connection: Connection,
    events: broadcast::Sender<ConnectionEvent>,
}

impl AmqpConnection {
    /// Connects to the broker described by `cfg`, returning the connection with a receiver
    /// subscribed before [`ConnectionEvent::Connected`] was sent.
    pub async fn connect(
        cfg: &AmqpConfig,
    ) -> Result<(Arc<AmqpConnection>, broadcast::Receiver<ConnectionEvent>), AmqpError> {
        debug!("creating amqp connection...");
        let options = ConnectionProperties::default()
            .with_connection_name(LongString::from(cfg.connection_name.clone()));

        let connection = match Connection::connect(&cfg.uri(), options).await {
            Ok(c) => Ok(c),
            Err(err) => {
                error!(error = err.to_string(), "failure to connect");
                Err(AmqpError::ConnectionError {})
            }
        }?;
        debug!("amqp connected");

        let (events, receiver) = broadcast::channel(EVENTS_CAPACITY);

        let lost = events.clone();
        connection.on_error(move |err| connection_lost(&lost, err.to_string()));

        notify(&events, ConnectionEvent::Connected);

        Ok((Arc::new(AmqpConnection { connection, events }), receiver))
    }

    /// Receives the lifecycle events emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }

    /// Opens a new channel on this connection.
    pub async fn create_channel(&self) -> Result<LapinChannel, AmqpError> {
        debug!("creating amqp channel...");
        match self.connection.create_channel().await {
            Ok(c) => {
                debug!("channel created");
                Ok(LapinChannel::new(c))
            }
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(AmqpError::ChannelError {})
            }
        }
    }

    /// Closes the connection and notifies subscribers.
    pub async fn close(&self) -> Result<(), AmqpError> {
        self.connection
            .close(200, "closing")
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "failure to close the connection");
                AmqpError::ConnectionError {}
            })?;

        notify(&self.events, ConnectionEvent::Disconnected("closed".to_owned()));
        Ok(())
    }
}

fn connection_lost(events: &broadcast::Sender<ConnectionEvent>, reason: String) {
    error!(error = reason, "amqp connection lost");
    notify(events, ConnectionEvent::Disconnected(reason));
}

fn notify(events: &broadcast::Sender<ConnectionEvent>, event: ConnectionEvent) {
    if events.send(event.clone()).is_err() {
        debug!(event = ?event, "no subscriber for connection event");
    }
}
