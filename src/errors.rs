// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types
//!
//! This module provides the single error type shared by the delivery layer and its
//! broker backends. The `AmqpError` enum covers both the programming defects the core
//! detects (double acknowledgment, unbalanced transactions, unknown registry keys)
//! and the transport failures reported by the broker collaborators.

use thiserror::Error;

/// Represents errors that can occur while publishing, consuming or managing topology.
///
/// Transport details are carried as strings so that the enum stays comparable,
/// which the tests rely on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    /// Internal errors that don't fit into other categories
    #[error("internal error")]
    InternalError,

    /// `ack` or `nack` was called on a message that was already answered
    #[error("we already answered to broker for delivery `{0}`")]
    DuplicateAcknowledgment(u64),

    /// Registry lookup for an unknown key
    #[error("`{0}` was not found in the registry")]
    NotFound(String),

    /// Registry already holds an entry for the key
    #[error("`{0}` is already registered")]
    AlreadyRegistered(String),

    /// `commit` or `rollback` without a matching `begin`
    #[error("there is no active transaction")]
    NoActiveTransaction,

    /// Transport failure while publishing a message
    #[error("failure to publish: {0}")]
    PublishFailure(String),

    /// Failure raised while processing a received message
    #[error("failure to handle message: {0}")]
    HandlerFailure(String),

    /// Invalid configuration values
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Error establishing a connection to the broker
    #[error("failure to connect")]
    ConnectionError,

    /// Error creating a channel from an established connection
    #[error("failure to create a channel")]
    ChannelError,

    /// Error while starting, committing or rolling back a channel transaction
    #[error("failure to `{0}` transaction")]
    TransactionError(String),

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding a queue to an exchange
    #[error("failure to binding exchange `{0}` to queue `{1}`")]
    BindingExchangeToQueueError(String, String),

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Error negative-acknowledging a message
    #[error("failure to nack message")]
    NackMessageError,

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),

    /// Error consuming a message
    #[error("failure to consume message `{0}`")]
    ConsumerError(String),

    /// Error encoding or decoding a message payload
    #[error("failure to parse payload: {0}")]
    ParsePayloadError(String),
}
