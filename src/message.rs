// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Model
//!
//! Immutable value types shared by publishers and consumers. A [`Message`] is built
//! from a [`Payload`], [`Options`], [`Headers`] and an [`Identifier`]; components that
//! need to change any part of it construct a new message instead of mutating.

use crate::{errors::AmqpError, headers::Headers};
use serde::{de::DeserializeOwned, Serialize};

/// Default content type when the producer does not set one
pub const DEFAULT_CONTENT_TYPE: &str = "text/plain";
/// Content type for JSON payloads
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Header holding the registry key of the final destination publisher
pub const HEADER_PUBLISHER_KEY: &str = "publisher-key";
/// Header holding the final routing key
pub const HEADER_ROUTING_KEY: &str = "routing-key";
/// Header holding the remaining retry passes
pub const HEADER_RETRY_COUNTER: &str = "retry-counter";

/// Message body together with its content metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    body: Vec<u8>,
    content_type: String,
    content_encoding: Option<String>,
}

impl Payload {
    /// Creates a `text/plain` payload without encoding.
    pub fn new(body: impl Into<Vec<u8>>) -> Payload {
        Payload {
            body: body.into(),
            content_type: DEFAULT_CONTENT_TYPE.to_owned(),
            content_encoding: None,
        }
    }

    pub fn with_content(
        body: impl Into<Vec<u8>>,
        content_type: impl Into<String>,
        content_encoding: Option<String>,
    ) -> Payload {
        Payload {
            body: body.into(),
            content_type: content_type.into(),
            content_encoding,
        }
    }

    /// Serializes `value` into an `application/json` payload.
    pub fn json<T: Serialize>(value: &T) -> Result<Payload, AmqpError> {
        let body =
            serde_json::to_vec(value).map_err(|e| AmqpError::ParsePayloadError(e.to_string()))?;

        Ok(Payload::with_content(body, JSON_CONTENT_TYPE, None))
    }

    pub fn decode_json<T: DeserializeOwned>(&self) -> Result<T, AmqpError> {
        serde_json::from_slice(&self.body).map_err(|e| AmqpError::ParsePayloadError(e.to_string()))
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn content_encoding(&self) -> Option<&str> {
        self.content_encoding.as_deref()
    }
}

/// Delivery options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    persistent: bool,
    expiration: u64,
}

impl Options {
    /// `expiration` is in milliseconds, `0` disables it.
    pub fn new(persistent: bool, expiration: u64) -> Options {
        Options {
            persistent,
            expiration,
        }
    }

    pub fn persistent(&self) -> bool {
        self.persistent
    }

    pub fn expiration(&self) -> u64 {
        self.expiration
    }
}

impl Default for Options {
    fn default() -> Self {
        Options::new(true, 0)
    }
}

/// Optional identification properties of a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identifier {
    message_id: Option<String>,
    app_id: Option<String>,
    user_id: Option<String>,
}

impl Identifier {
    pub fn new(
        message_id: Option<String>,
        app_id: Option<String>,
        user_id: Option<String>,
    ) -> Identifier {
        Identifier {
            message_id,
            app_id,
            user_id,
        }
    }

    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    pub fn app_id(&self) -> Option<&str> {
        self.app_id.as_deref()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Returns a copy with the message id replaced.
    pub fn with_message_id(&self, message_id: impl Into<String>) -> Identifier {
        Identifier {
            message_id: Some(message_id.into()),
            ..self.clone()
        }
    }
}

/// A message to publish.
///
/// Missing parts default to persistent options, empty headers and an empty identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    payload: Payload,
    options: Options,
    headers: Headers,
    identifier: Identifier,
}

impl Message {
    pub fn new(payload: Payload) -> Message {
        Message {
            payload,
            options: Options::default(),
            headers: Headers::default(),
            identifier: Identifier::default(),
        }
    }

    pub fn from_parts(
        payload: Payload,
        options: Option<Options>,
        headers: Option<Headers>,
        identifier: Option<Identifier>,
    ) -> Message {
        Message {
            payload,
            options: options.unwrap_or_default(),
            headers: headers.unwrap_or_default(),
            identifier: identifier.unwrap_or_default(),
        }
    }

    pub fn with_options(self, options: Options) -> Message {
        Message { options, ..self }
    }

    pub fn with_headers(self, headers: Headers) -> Message {
        Message { headers, ..self }
    }

    pub fn with_identifier(self, identifier: Identifier) -> Message {
        Message { identifier, ..self }
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }
}

/// A message scheduled for delayed delivery through the landfill.
///
/// The destination is encoded in the retry headers, so the broker carries the whole
/// retry state and no scheduler is needed.
#[derive(Debug, Clone, PartialEq)]
pub struct DelayMessage {
    message: Message,
    publisher_key: String,
    routing_key: String,
    counter: i64,
}

impl DelayMessage {
    /// `counter` is the number of landfill passes before the final delivery.
    pub fn new(
        message: Message,
        publisher_key: impl Into<String>,
        routing_key: impl Into<String>,
        counter: i64,
    ) -> DelayMessage {
        DelayMessage {
            message,
            publisher_key: publisher_key.into(),
            routing_key: routing_key.into(),
            counter: counter.max(1),
        }
    }

    pub fn publisher_key(&self) -> &str {
        &self.publisher_key
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn counter(&self) -> i64 {
        self.counter
    }

    /// Builds the message with the retry headers merged into its own headers.
    pub fn into_message(self) -> Message {
        let headers = self
            .message
            .headers()
            .with(HEADER_PUBLISHER_KEY, self.publisher_key)
            .with(HEADER_ROUTING_KEY, self.routing_key)
            .with(HEADER_RETRY_COUNTER, self.counter);

        self.message.with_headers(headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::HeaderValue;
    use serde::Deserialize;

    #[test]
    fn message_defaults_are_never_empty_fields() {
        let message = Message::new(Payload::new("some"));

        assert!(message.options().persistent());
        assert_eq!(message.options().expiration(), 0);
        assert!(message.headers().is_empty());
        assert_eq!(message.identifier(), &Identifier::default());
        assert_eq!(message.payload().content_type(), "text/plain");
        assert_eq!(message.payload().content_encoding(), None);
    }

    #[test]
    fn from_parts_fills_missing_parts() {
        let message = Message::from_parts(Payload::new("a"), None, None, None);

        assert_eq!(message, Message::new(Payload::new("a")));
    }

    #[test]
    fn json_payload_round_trip() {
        #[derive(Serialize, Deserialize, Debug, PartialEq)]
        struct Order {
            id: u32,
        }

        let payload = Payload::json(&Order { id: 7 }).unwrap();

        assert_eq!(payload.content_type(), JSON_CONTENT_TYPE);
        assert_eq!(payload.decode_json::<Order>().unwrap(), Order { id: 7 });
    }

    #[test]
    fn decode_json_reports_invalid_body() {
        let result = Payload::new("not json").decode_json::<u32>();

        assert!(matches!(result, Err(AmqpError::ParsePayloadError(_))));
    }

    #[test]
    fn delay_message_adds_retry_headers() {
        let base = Message::new(Payload::new("x"))
            .with_headers([("trace", "abc")].into_iter().collect());
        let message = DelayMessage::new(base, "orders", "order.created", 3).into_message();

        let headers = message.headers();
        assert_eq!(headers.get("trace"), Some(&HeaderValue::from("abc")));
        assert_eq!(headers.get(HEADER_PUBLISHER_KEY), Some(&HeaderValue::from("orders")));
        assert_eq!(
            headers.get(HEADER_ROUTING_KEY),
            Some(&HeaderValue::from("order.created"))
        );
        assert_eq!(headers.get(HEADER_RETRY_COUNTER), Some(&HeaderValue::Int(3)));
    }
}
