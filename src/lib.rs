// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Reliability Layer
//!
//! Building blocks for reliable messaging over RabbitMQ: a publisher pipeline with
//! middlewares, reentrant channel transactions, delayed retries through a TTL
//! "landfill" queue, and a bounded batch consumer.

mod otel;

pub mod amqp;
pub mod channel;
pub mod config;
pub mod consumer;
pub mod errors;
pub mod exchange;
pub mod headers;
pub mod memory;
pub mod message;
pub mod publisher;
pub mod queue;
pub mod received;
pub mod registry;
pub mod topology;
pub mod transactional;
