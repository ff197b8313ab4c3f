// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Headers
//!
//! Broker-native header values and the ordered header map carried by every message.
//! Entries keep their insertion order for transmission, while equality ignores it.

/// A broker-native header value.
///
/// Mirrors the field types an AMQP header table can hold, including the nested arrays
/// and tables the broker uses for `x-death` records.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Void,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    Timestamp(u64),
    Array(Vec<HeaderValue>),
    Table(Headers),
}

impl HeaderValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            HeaderValue::Int(value) => Some(*value),
            HeaderValue::Timestamp(value) => i64::try_from(*value).ok(),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[HeaderValue]> {
        match self {
            HeaderValue::Array(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&Headers> {
        match self {
            HeaderValue::Table(table) => Some(table),
            _ => None,
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::String(value.to_owned())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::String(value)
    }
}

impl From<i64> for HeaderValue {
    fn from(value: i64) -> Self {
        HeaderValue::Int(value)
    }
}

impl From<i32> for HeaderValue {
    fn from(value: i32) -> Self {
        HeaderValue::Int(value.into())
    }
}

impl From<bool> for HeaderValue {
    fn from(value: bool) -> Self {
        HeaderValue::Bool(value)
    }
}

impl From<Vec<HeaderValue>> for HeaderValue {
    fn from(values: Vec<HeaderValue>) -> Self {
        HeaderValue::Array(values)
    }
}

impl From<Headers> for HeaderValue {
    fn from(table: Headers) -> Self {
        HeaderValue::Table(table)
    }
}

/// Ordered header map with unique keys.
///
/// `Headers` is a value: `with` and `without` return new maps and leave the original
/// untouched.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<(String, HeaderValue)>,
}

impl Headers {
    pub fn new() -> Self {
        Headers::default()
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn get(&self, key: &str) -> Option<&HeaderValue> {
        self.entries
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }

    /// All entries in insertion order.
    pub fn all(&self) -> &[(String, HeaderValue)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns a copy with `key` set to `value`.
    ///
    /// An existing key keeps its position, a new key is appended.
    pub fn with(&self, key: impl Into<String>, value: impl Into<HeaderValue>) -> Headers {
        let mut headers = self.clone();
        headers.insert(key.into(), value.into());
        headers
    }

    /// Returns a copy without the given keys.
    pub fn without(&self, keys: &[&str]) -> Headers {
        Headers {
            entries: self
                .entries
                .iter()
                .filter(|(name, _)| !keys.contains(&name.as_str()))
                .cloned()
                .collect(),
        }
    }

    pub(crate) fn insert(&mut self, key: String, value: HeaderValue) {
        match self.entries.iter_mut().find(|(name, _)| *name == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }
}

impl PartialEq for Headers {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .entries
                .iter()
                .all(|(key, value)| other.get(key) == Some(value))
    }
}

impl<K, V> FromIterator<(K, V)> for Headers
where
    K: Into<String>,
    V: Into<HeaderValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::default();
        for (key, value) in iter {
            headers.insert(key.into(), value.into());
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_ignores_insertion_order() {
        let left: Headers = [("a", 1), ("b", 2)].into_iter().collect();
        let right: Headers = [("b", 2), ("a", 1)].into_iter().collect();

        assert_eq!(left, right);
        assert_eq!(left.all()[0].0, "a");
        assert_eq!(right.all()[0].0, "b");
    }

    #[test]
    fn with_replaces_in_place_and_leaves_original() {
        let original: Headers = [("a", 1), ("b", 2)].into_iter().collect();
        let updated = original.with("a", 5);

        assert_eq!(original.get("a"), Some(&HeaderValue::Int(1)));
        assert_eq!(updated.get("a"), Some(&HeaderValue::Int(5)));
        assert_eq!(updated.all()[0].0, "a");
        assert_eq!(updated.len(), 2);
    }

    #[test]
    fn without_strips_keys() {
        let headers: Headers = [("a", "x"), ("b", "y"), ("c", "z")].into_iter().collect();
        let stripped = headers.without(&["a", "c", "missing"]);

        assert!(!stripped.has("a"));
        assert!(stripped.has("b"));
        assert_eq!(stripped.len(), 1);
    }
}
