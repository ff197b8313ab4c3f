// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Backend
//!
//! Implementations of the channel, exchange and queue contracts on top of lapin.
//! Exchange and queue factories declare their topology the first time they are asked
//! for an instance and hand out the same instance afterwards.

mod convert;

pub mod channel;
pub mod connection;
pub mod exchange;
pub mod queue;

pub use channel::{LapinChannel, LapinChannelFactory};
pub use connection::{AmqpConnection, ConnectionEvent};
pub use exchange::{LapinExchange, LapinExchangeFactory};
pub use queue::{LapinQueue, LapinQueueFactory};
