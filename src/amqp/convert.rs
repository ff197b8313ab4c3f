// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Conversions between the message model and lapin's wire types.

use crate::{
    exchange::ExchangeKind,
    headers::{HeaderValue, Headers},
    message::{Identifier, Message, Options, Payload, DEFAULT_CONTENT_TYPE},
};
use lapin::{
    types::{AMQPValue, ByteArray, FieldArray, FieldTable, LongString, ShortString},
    BasicProperties,
};
use std::collections::BTreeMap;

const PERSISTENT_DELIVERY_MODE: u8 = 2;
const TRANSIENT_DELIVERY_MODE: u8 = 1;

impl From<&ExchangeKind> for lapin::ExchangeKind {
    fn from(kind: &ExchangeKind) -> Self {
        match kind {
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
            ExchangeKind::Headers => lapin::ExchangeKind::Headers,
            ExchangeKind::XMessageDelayed => {
                lapin::ExchangeKind::Custom("x-delayed-message".to_owned())
            }
        }
    }
}

pub(crate) fn amqp_value(value: &HeaderValue) -> AMQPValue {
    match value {
        HeaderValue::Void => AMQPValue::Void,
        HeaderValue::Bool(v) => AMQPValue::Boolean(*v),
        HeaderValue::Int(v) => AMQPValue::LongLongInt(*v),
        HeaderValue::Double(v) => AMQPValue::Double(*v),
        HeaderValue::String(v) => AMQPValue::LongString(LongString::from(v.as_str())),
        HeaderValue::Bytes(v) => AMQPValue::ByteArray(ByteArray::from(v.clone())),
        HeaderValue::Timestamp(v) => AMQPValue::Timestamp(*v),
        HeaderValue::Array(values) => AMQPValue::FieldArray(FieldArray::from(
            values.iter().map(amqp_value).collect::<Vec<_>>(),
        )),
        HeaderValue::Table(headers) => AMQPValue::FieldTable(field_table(headers)),
    }
}

pub(crate) fn header_value(value: &AMQPValue) -> HeaderValue {
    match value {
        AMQPValue::Void => HeaderValue::Void,
        AMQPValue::Boolean(v) => HeaderValue::Bool(*v),
        AMQPValue::ShortShortInt(v) => HeaderValue::Int(i64::from(*v)),
        AMQPValue::ShortShortUInt(v) => HeaderValue::Int(i64::from(*v)),
        AMQPValue::ShortInt(v) => HeaderValue::Int(i64::from(*v)),
        AMQPValue::ShortUInt(v) => HeaderValue::Int(i64::from(*v)),
        AMQPValue::LongInt(v) => HeaderValue::Int(i64::from(*v)),
        AMQPValue::LongUInt(v) => HeaderValue::Int(i64::from(*v)),
        AMQPValue::LongLongInt(v) => HeaderValue::Int(*v),
        AMQPValue::Float(v) => HeaderValue::Double(f64::from(*v)),
        AMQPValue::Double(v) => HeaderValue::Double(*v),
        AMQPValue::DecimalValue(v) => {
            HeaderValue::Double(f64::from(v.value) / 10f64.powi(i32::from(v.scale)))
        }
        AMQPValue::ShortString(v) => HeaderValue::String(v.as_str().to_owned()),
        AMQPValue::LongString(v) => {
            HeaderValue::String(String::from_utf8_lossy(v.as_bytes()).into_owned())
        }
        AMQPValue::FieldArray(v) => {
            HeaderValue::Array(v.as_slice().iter().map(header_value).collect())
        }
        AMQPValue::Timestamp(v) => HeaderValue::Timestamp(*v),
        AMQPValue::FieldTable(v) => HeaderValue::Table(headers(v)),
        AMQPValue::ByteArray(v) => HeaderValue::Bytes(v.as_slice().to_vec()),
    }
}

pub(crate) fn field_table(headers: &Headers) -> FieldTable {
    let btree: BTreeMap<ShortString, AMQPValue> = headers
        .all()
        .iter()
        .map(|(key, value)| (ShortString::from(key.as_str()), amqp_value(value)))
        .collect();

    FieldTable::from(btree)
}

pub(crate) fn field_table_from<'a, I>(entries: I) -> FieldTable
where
    I: IntoIterator<Item = (&'a String, &'a HeaderValue)>,
{
    let btree: BTreeMap<ShortString, AMQPValue> = entries
        .into_iter()
        .map(|(key, value)| (ShortString::from(key.as_str()), amqp_value(value)))
        .collect();

    FieldTable::from(btree)
}

pub(crate) fn headers(table: &FieldTable) -> Headers {
    table
        .inner()
        .iter()
        .map(|(key, value)| (key.as_str().to_owned(), header_value(value)))
        .collect()
}

/// Publish properties carrying everything but the body of `message`.
pub(crate) fn properties(message: &Message) -> BasicProperties {
    let payload = message.payload();
    let options = message.options();
    let identifier = message.identifier();

    let delivery_mode = if options.persistent() {
        PERSISTENT_DELIVERY_MODE
    } else {
        TRANSIENT_DELIVERY_MODE
    };

    let mut properties = BasicProperties::default()
        .with_content_type(ShortString::from(payload.content_type()))
        .with_delivery_mode(delivery_mode)
        .with_headers(field_table(message.headers()));

    if let Some(encoding) = payload.content_encoding() {
        properties = properties.with_content_encoding(ShortString::from(encoding));
    }
    if options.expiration() > 0 {
        properties =
            properties.with_expiration(ShortString::from(options.expiration().to_string()));
    }
    if let Some(id) = identifier.message_id() {
        properties = properties.with_message_id(ShortString::from(id));
    }
    if let Some(app_id) = identifier.app_id() {
        properties = properties.with_app_id(ShortString::from(app_id));
    }
    if let Some(user_id) = identifier.user_id() {
        properties = properties.with_user_id(ShortString::from(user_id));
    }

    properties
}

/// Rebuilds a message from a delivered body and its properties.
///
/// A missing content type reads as `text/plain` and a missing or unparsable expiration
/// as `0`. Only delivery mode 2 is persistent.
pub(crate) fn message(body: Vec<u8>, properties: &BasicProperties) -> Message {
    let content_type = non_empty(properties.content_type())
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_owned());

    let payload = Payload::with_content(
        body,
        content_type,
        non_empty(properties.content_encoding()),
    );

    let options = Options::new(
        *properties.delivery_mode() == Some(PERSISTENT_DELIVERY_MODE),
        properties
            .expiration()
            .as_ref()
            .and_then(|expiration| expiration.as_str().parse().ok())
            .unwrap_or(0),
    );

    let identifier = Identifier::new(
        non_empty(properties.message_id()),
        non_empty(properties.app_id()),
        non_empty(properties.user_id()),
    );

    Message::from_parts(
        payload,
        Some(options),
        properties.headers().as_ref().map(headers),
        Some(identifier),
    )
}

fn non_empty(value: &Option<ShortString>) -> Option<String> {
    value
        .as_ref()
        .map(|v| v.as_str().to_owned())
        .filter(|v| !v.is_empty())
}
