// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Consumers
//!
//! Everything on the receiving side: the handler chain, the landfill retry handler,
//! the bounded spool consumer and consumer tag generation.

pub mod handler;
pub mod landfill;
pub mod spool;
pub mod tag;

pub use handler::{MessageHandler, MessageHandlers};
pub use landfill::{ExpiredMessageHandler, FallbackPolicy};
pub use spool::{BatchReport, SpoolConsumer, SpoolConsumerConfiguration, SpoolState};
pub use tag::{ConsumerTagGenerator, EmptyConsumerTagGenerator, UuidConsumerTagGenerator};
