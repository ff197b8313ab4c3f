// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Spool Consumer
//!
//! Bounded consumption: a batch reads messages until either the configured number of
//! messages was processed or no message arrived within the timeout, then hands
//! control back to the caller. The caller can do periodic work (health checks,
//! reconnects) between batches instead of blocking forever on the queue.
//!
//! Messages are processed one at a time. Acknowledging is up to the handler chain; a
//! handler error is returned to the caller after the in-flight message, if still
//! unanswered, was nacked with requeue.

use crate::{
    consumer::handler::{MessageHandler, MessageHandlers},
    errors::AmqpError,
    otel,
    queue::QueueFactory,
    received::ReceivedMessage,
};
use opentelemetry::{
    global::{self, BoxedTracer},
    trace::{Span, Status},
};
use std::{borrow::Cow, ops::ControlFlow, sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::{debug, error};

/// Lowest accepted read timeout, in seconds
pub const MIN_TIMEOUT: f64 = 0.1;

/// Validated spool settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpoolConsumerConfiguration {
    prefetch_count: u16,
    max_messages_per_batch: usize,
    timeout: Duration,
}

impl SpoolConsumerConfiguration {
    /// `max_messages_per_batch` of `0` means unlimited; `timeout` is in seconds and
    /// can't be less than [`MIN_TIMEOUT`].
    pub fn new(
        prefetch_count: u16,
        max_messages_per_batch: usize,
        timeout: f64,
    ) -> Result<SpoolConsumerConfiguration, AmqpError> {
        if prefetch_count == 0 {
            return Err(AmqpError::InvalidConfiguration(
                "the prefetch count must be positive".to_owned(),
            ));
        }

        // written negated so that NaN is rejected too
        if !(timeout >= MIN_TIMEOUT) || !timeout.is_finite() {
            return Err(AmqpError::InvalidConfiguration(format!(
                "the timeout can't be less than ~{}, {} given",
                MIN_TIMEOUT, timeout
            )));
        }

        let timeout = Duration::try_from_secs_f64(timeout).map_err(|_| {
            AmqpError::InvalidConfiguration(format!(
                "the timeout of {} seconds is too large",
                timeout
            ))
        })?;

        Ok(SpoolConsumerConfiguration {
            prefetch_count,
            max_messages_per_batch,
            timeout,
        })
    }

    pub fn prefetch_count(&self) -> u16 {
        self.prefetch_count
    }

    pub fn max_messages_per_batch(&self) -> usize {
        self.max_messages_per_batch
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Where the spool consumer stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpoolState {
    Idle,
    Running,
    /// The batch reached `max_messages_per_batch`.
    BatchComplete,
    /// No message arrived within the timeout.
    TimedOut,
}

/// Outcome of one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub processed: usize,
    pub state: SpoolState,
}

/// Consumes a queue in bounded batches.
pub struct SpoolConsumer {
    queue_factory: Arc<dyn QueueFactory>,
    handlers: MessageHandlers,
    configuration: SpoolConsumerConfiguration,
    state: watch::Sender<SpoolState>,
}

impl SpoolConsumer {
    pub fn new(
        queue_factory: Arc<dyn QueueFactory>,
        handlers: MessageHandlers,
        configuration: SpoolConsumerConfiguration,
    ) -> SpoolConsumer {
        let (state, _) = watch::channel(SpoolState::Idle);

        SpoolConsumer {
            queue_factory,
            handlers,
            configuration,
            state,
        }
    }

    pub fn state(&self) -> SpoolState {
        *self.state.borrow()
    }

    /// Receives every state transition, for supervisors watching the consumer.
    pub fn subscribe(&self) -> watch::Receiver<SpoolState> {
        self.state.subscribe()
    }

    /// Runs one batch.
    ///
    /// Returns with [`SpoolState::TimedOut`] when the queue stayed empty for the
    /// timeout, and with [`SpoolState::BatchComplete`] once the batch limit was
    /// reached. Errors leave the consumer `Idle`.
    pub async fn run_batch(&self) -> Result<BatchReport, AmqpError> {
        let result = self.consume().await;

        match &result {
            Ok(report) => {
                self.state.send_replace(report.state);
            }
            Err(err) => {
                error!(error = err.to_string(), "spool batch failed");
                self.state.send_replace(SpoolState::Idle);
            }
        }

        result
    }

    /// Runs batches until `between_batches` breaks, or a batch fails.
    pub async fn run<F>(&self, mut between_batches: F) -> Result<(), AmqpError>
    where
        F: FnMut(&BatchReport) -> ControlFlow<()>,
    {
        loop {
            let report = self.run_batch().await?;

            if between_batches(&report).is_break() {
                self.state.send_replace(SpoolState::Idle);
                return Ok(());
            }
        }
    }

    async fn consume(&self) -> Result<BatchReport, AmqpError> {
        let queue = self.queue_factory.create().await?;
        queue
            .channel()
            .set_prefetch_count(self.configuration.prefetch_count)
            .await?;

        self.state.send_replace(SpoolState::Running);
        debug!(queue = queue.name(), "spool batch started");

        let tracer = global::tracer("amqp consumer");
        let limit = self.configuration.max_messages_per_batch;
        let mut processed = 0;

        loop {
            let Some(message) = queue.receive(self.configuration.timeout).await? else {
                debug!(processed, "no message within timeout");
                return Ok(BatchReport {
                    processed,
                    state: SpoolState::TimedOut,
                });
            };

            self.dispatch(&tracer, &message).await?;
            processed += 1;

            if limit > 0 && processed >= limit {
                debug!(processed, "spool batch complete");
                return Ok(BatchReport {
                    processed,
                    state: SpoolState::BatchComplete,
                });
            }
        }
    }

    async fn dispatch(
        &self,
        tracer: &BoxedTracer,
        message: &ReceivedMessage,
    ) -> Result<(), AmqpError> {
        let (_ctx, mut span) = otel::new_span(message.headers(), tracer, message.routing_key());

        debug!(
            "received: {} - exchange: {}",
            message.routing_key(),
            message.exchange_name()
        );

        let Err(err) = self.handlers.handle(message).await else {
            span.set_status(Status::Ok);
            return Ok(());
        };

        span.record_error(&err);
        span.set_status(Status::Error {
            description: Cow::from(err.to_string()),
        });

        if !message.is_answered() {
            if let Err(nack_err) = message.nack(true).await {
                error!(error = nack_err.to_string(), "error whiling requeuing");
            }
        }

        Err(err)
    }
}
