// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Consumer tag generation.

use uuid::Uuid;

/// Produces the tag a backend registers its consumer with.
pub trait ConsumerTagGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Always returns an empty tag, letting the broker pick one.
pub struct EmptyConsumerTagGenerator;

impl ConsumerTagGenerator for EmptyConsumerTagGenerator {
    fn generate(&self) -> String {
        String::new()
    }
}

/// Returns `prefix` followed by a random v4 uuid.
pub struct UuidConsumerTagGenerator {
    prefix: String,
}

impl UuidConsumerTagGenerator {
    pub fn new(prefix: &str) -> UuidConsumerTagGenerator {
        UuidConsumerTagGenerator {
            prefix: prefix.to_owned(),
        }
    }
}

impl ConsumerTagGenerator for UuidConsumerTagGenerator {
    fn generate(&self) -> String {
        format!("{}{}", self.prefix, Uuid::new_v4())
    }
}
