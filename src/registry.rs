// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Registries
//!
//! Name to collaborator mappings, populated once at startup and passed by reference to
//! whoever needs to resolve a collaborator by key.

use crate::{
    errors::AmqpError, exchange::ExchangeFactory, publisher::Publisher, queue::QueueFactory,
};
use std::{collections::HashMap, sync::Arc};

/// Registry of exchange factories
pub type ExchangeFactoryRegistry = Registry<dyn ExchangeFactory>;
/// Registry of queue factories
pub type QueueFactoryRegistry = Registry<dyn QueueFactory>;
/// Registry of publishers
pub type PublisherRegistry = Registry<dyn Publisher>;

/// A map from unique keys to shared collaborators.
pub struct Registry<T: ?Sized> {
    entries: HashMap<String, Arc<T>>,
}

impl<T: ?Sized> Registry<T> {
    pub fn new() -> Self {
        Registry {
            entries: HashMap::default(),
        }
    }

    /// Registers `entry` under `key`.
    ///
    /// Keys are unique: registering a key twice fails with
    /// [`AmqpError::AlreadyRegistered`].
    pub fn add(&mut self, key: impl Into<String>, entry: Arc<T>) -> Result<(), AmqpError> {
        let key = key.into();
        if self.entries.contains_key(&key) {
            return Err(AmqpError::AlreadyRegistered(key));
        }

        self.entries.insert(key, entry);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Arc<T>, AmqpError> {
        self.entries
            .get(key)
            .cloned()
            .ok_or_else(|| AmqpError::NotFound(key.to_owned()))
    }

    pub fn has(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl<T: ?Sized> Default for Registry<T> {
    fn default() -> Self {
        Registry::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_returns_registered_entry() {
        let mut registry = Registry::<str>::new();
        registry.add("greeting", Arc::from("hello")).unwrap();

        assert_eq!(&*registry.get("greeting").unwrap(), "hello");
        assert!(registry.has("greeting"));
    }

    #[test]
    fn missing_key_is_not_found() {
        let registry = Registry::<str>::new();

        assert_eq!(
            registry.get("missing").err(),
            Some(AmqpError::NotFound("missing".to_owned()))
        );
    }

    #[test]
    fn duplicate_key_is_rejected() {
        let mut registry = Registry::<str>::new();
        registry.add("a", Arc::from("x")).unwrap();

        assert_eq!(
            registry.add("a", Arc::from("y")),
            Err(AmqpError::AlreadyRegistered("a".to_owned()))
        );
        assert_eq!(&*registry.get("a").unwrap(), "x");
    }
}
