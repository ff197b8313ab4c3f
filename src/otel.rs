// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # OpenTelemetry Integration
//!
//! This module propagates trace context through message headers. Publishers inject the
//! current context before a message leaves, consumers extract it to open a consumer
//! span for every delivery.

use crate::headers::{HeaderValue, Headers};
use opentelemetry::{
    global::{self, BoxedSpan, BoxedTracer},
    propagation::{Extractor, Injector},
    trace::{SpanKind, Tracer},
    Context,
};
use std::borrow::Cow;

/// An adapter for injecting and extracting OpenTelemetry context from message headers.
pub(crate) struct HeadersPropagator<'a> {
    headers: &'a mut Headers,
}

impl<'a> HeadersPropagator<'a> {
    pub(crate) fn new(headers: &'a mut Headers) -> Self {
        Self { headers }
    }
}

impl Injector for HeadersPropagator<'_> {
    /// Sets a trace context key-value pair in the message headers.
    fn set(&mut self, key: &str, value: String) {
        self.headers
            .insert(key.to_lowercase(), HeaderValue::String(value));
    }
}

impl Extractor for HeadersPropagator<'_> {
    /// Gets a trace context value from the message headers.
    fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(HeaderValue::as_str)
    }

    fn keys(&self) -> Vec<&str> {
        self.headers
            .all()
            .iter()
            .map(|(key, _)| key.as_str())
            .collect()
    }
}

/// Returns a copy of `headers` carrying the trace context of `ctx`.
pub(crate) fn inject(ctx: &Context, headers: &Headers) -> Headers {
    let mut headers = headers.clone();
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(ctx, &mut HeadersPropagator::new(&mut headers))
    });

    headers
}

/// Creates a consumer span for a delivery, parented on the context found in its
/// headers.
pub(crate) fn new_span(
    headers: &Headers,
    tracer: &BoxedTracer,
    name: &str,
) -> (Context, BoxedSpan) {
    let mut headers = headers.clone();
    let ctx = global::get_text_map_propagator(|propagator| {
        propagator.extract(&HeadersPropagator::new(&mut headers))
    });

    let span = tracer
        .span_builder(Cow::from(name.to_owned()))
        .with_kind(SpanKind::Consumer)
        .start_with_context(tracer, &ctx);

    (ctx, span)
}
