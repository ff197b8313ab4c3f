// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Reentrant Transactions
//!
//! `AmqpTransactional` turns the channel transaction primitives into a reentrant
//! resource. Nested units of work each call `begin`/`commit`, but only the outermost
//! pair reaches the broker; an inner `rollback` just unwinds one level and leaves the
//! final decision to the outermost caller.
//!
//! The controller owns its channel exclusively. Calls from several tasks on the same
//! controller must be serialized by the caller.

use crate::{
    channel::{Channel, ChannelFactory},
    errors::AmqpError,
};
use std::{future::Future, sync::Arc};
use tokio::sync::Mutex;
use tracing::{debug, error};

#[derive(Default)]
struct TransactionState {
    level: usize,
    channel: Option<Arc<dyn Channel>>,
}

/// Reentrant begin/commit/rollback over a lazily created channel.
pub struct AmqpTransactional {
    channel_factory: Arc<dyn ChannelFactory>,
    state: Mutex<TransactionState>,
}

impl AmqpTransactional {
    pub fn new(channel_factory: Arc<dyn ChannelFactory>) -> AmqpTransactional {
        AmqpTransactional {
            channel_factory,
            state: Mutex::new(TransactionState::default()),
        }
    }

    /// Current nesting level, `0` outside of any transaction.
    pub async fn level(&self) -> usize {
        self.state.lock().await.level
    }

    /// Opens a transaction level. Only the outermost level starts the broker
    /// transaction.
    pub async fn begin(&self) -> Result<(), AmqpError> {
        let mut state = self.state.lock().await;

        if state.level == 0 {
            let channel = self.channel(&mut state).await?;
            debug!("starting transaction");
            channel.start_transaction().await?;
        }

        state.level += 1;
        Ok(())
    }

    /// Closes a transaction level. The outermost level commits the broker transaction.
    pub async fn commit(&self) -> Result<(), AmqpError> {
        let mut state = self.state.lock().await;
        let channel = Self::leave(&mut state)?;

        match channel {
            Some(channel) => {
                debug!("committing transaction");
                channel.commit_transaction().await
            }
            None => Ok(()),
        }
    }

    /// Closes a transaction level. The outermost level rolls the broker transaction
    /// back.
    pub async fn rollback(&self) -> Result<(), AmqpError> {
        let mut state = self.state.lock().await;
        let channel = Self::leave(&mut state)?;

        match channel {
            Some(channel) => {
                debug!("rolling back transaction");
                channel.rollback_transaction().await
            }
            None => Ok(()),
        }
    }

    /// Runs `work` inside a transaction level.
    ///
    /// Commits when `work` succeeds. When it fails the level is rolled back and the
    /// error of `work` is returned as is.
    pub async fn execute<F, Fut, T, E>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<AmqpError>,
    {
        self.begin().await?;

        match work().await {
            Ok(result) => {
                self.commit().await?;
                Ok(result)
            }
            Err(err) => {
                if let Err(rollback_err) = self.rollback().await {
                    error!(
                        error = rollback_err.to_string(),
                        "failure to rollback transaction"
                    );
                }
                Err(err)
            }
        }
    }

    /// Decrements the level and returns the channel when the outermost level closed.
    fn leave(state: &mut TransactionState) -> Result<Option<Arc<dyn Channel>>, AmqpError> {
        if state.level == 0 {
            error!("commit or rollback without an active transaction");
            return Err(AmqpError::NoActiveTransaction);
        }

        state.level -= 1;
        if state.level > 0 {
            return Ok(None);
        }

        state
            .channel
            .clone()
            .map(Some)
            .ok_or(AmqpError::InternalError)
    }

    async fn channel(
        &self,
        state: &mut TransactionState,
    ) -> Result<Arc<dyn Channel>, AmqpError> {
        if let Some(channel) = &state.channel {
            return Ok(channel.clone());
        }

        let channel = self.channel_factory.create().await?;
        state.channel = Some(channel.clone());
        Ok(channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{MockChannel, MockChannelFactory};
    use mockall::Sequence;

    fn transactional(channel: MockChannel) -> AmqpTransactional {
        let channel: Arc<dyn Channel> = Arc::new(channel);
        let mut factory = MockChannelFactory::new();
        factory
            .expect_create()
            .times(1)
            .returning(move || Ok(channel.clone()));

        AmqpTransactional::new(Arc::new(factory))
    }

    #[tokio::test]
    async fn nested_commits_issue_one_physical_pair() {
        let mut seq = Sequence::new();
        let mut channel = MockChannel::new();
        channel
            .expect_start_transaction()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        channel
            .expect_commit_transaction()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        channel.expect_rollback_transaction().never();

        let tx = transactional(channel);
        for _ in 0..3 {
            tx.begin().await.unwrap();
        }
        assert_eq!(tx.level().await, 3);
        for _ in 0..3 {
            tx.commit().await.unwrap();
        }
        assert_eq!(tx.level().await, 0);
    }

    #[tokio::test]
    async fn nested_rollbacks_issue_one_physical_rollback() {
        let mut seq = Sequence::new();
        let mut channel = MockChannel::new();
        channel
            .expect_start_transaction()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        channel
            .expect_rollback_transaction()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        channel.expect_commit_transaction().never();

        let tx = transactional(channel);
        tx.begin().await.unwrap();
        tx.begin().await.unwrap();
        tx.rollback().await.unwrap();
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn commit_without_begin_is_rejected() {
        let tx = AmqpTransactional::new(Arc::new(MockChannelFactory::new()));

        assert_eq!(tx.commit().await, Err(AmqpError::NoActiveTransaction));
        assert_eq!(tx.rollback().await, Err(AmqpError::NoActiveTransaction));
        assert_eq!(tx.level().await, 0);
    }

    #[tokio::test]
    async fn failed_start_keeps_level_at_zero() {
        let mut channel = MockChannel::new();
        channel
            .expect_start_transaction()
            .times(1)
            .returning(|| Err(AmqpError::TransactionError("start".to_owned())));

        let tx = transactional(channel);

        assert!(tx.begin().await.is_err());
        assert_eq!(tx.level().await, 0);
    }

    #[tokio::test]
    async fn execute_commits_and_returns_the_result() {
        let mut seq = Sequence::new();
        let mut channel = MockChannel::new();
        channel
            .expect_start_transaction()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        channel
            .expect_commit_transaction()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));

        let tx = transactional(channel);
        let result = tx
            .execute(|| async { Ok::<_, AmqpError>("some foo") })
            .await;

        assert_eq!(result, Ok("some foo"));
    }

    #[derive(Debug, PartialEq)]
    enum WorkError {
        Invalid(&'static str),
        Amqp(AmqpError),
    }

    impl From<AmqpError> for WorkError {
        fn from(err: AmqpError) -> Self {
            WorkError::Amqp(err)
        }
    }

    #[tokio::test]
    async fn execute_rolls_back_and_returns_the_original_error() {
        let mut seq = Sequence::new();
        let mut channel = MockChannel::new();
        channel
            .expect_start_transaction()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        channel
            .expect_rollback_transaction()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        channel.expect_commit_transaction().never();

        let tx = transactional(channel);
        let result: Result<(), WorkError> = tx
            .execute(|| async { Err(WorkError::Invalid("some foo")) })
            .await;

        assert_eq!(result, Err(WorkError::Invalid("some foo")));
        assert_eq!(tx.level().await, 0);
    }

    #[tokio::test]
    async fn nested_execute_commits_once() {
        let mut channel = MockChannel::new();
        channel
            .expect_start_transaction()
            .times(1)
            .returning(|| Ok(()));
        channel
            .expect_commit_transaction()
            .times(1)
            .returning(|| Ok(()));

        let tx = transactional(channel);
        let result = tx
            .execute(|| async {
                let inner = tx.execute(|| async { Ok::<_, AmqpError>(2) }).await?;
                assert_eq!(tx.level().await, 1);
                Ok::<_, AmqpError>(inner * 21)
            })
            .await;

        assert_eq!(result, Ok(42));
    }
}
