//! # Consumer Worker
//!
//! One worker per `(group, topic, partition)`. Processing within a
//! partition is strictly sequential to preserve ordering; workers on
//! different partitions run in parallel.
//!
//! ## Offset discipline
//!
//! The offset is committed synchronously after each handled message,
//! including dead-lettered ones, so a poisoned message cannot wedge its
//! partition. On shutdown the worker finishes the message in flight and
//! stops; everything already handled is already committed, so a restarted
//! worker resumes exactly past it (or from `earliest` when the group has
//! no committed offset yet).

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, warn};
use warden_bus::{topics, DeadLetter, InMemoryBus, StoredMessage};
use warden_store::Clock;
use warden_telemetry::{CONSUMER_RETRIES, DLQ_MESSAGES};
use warden_types::{BusEnvelope, Partition};

/// A handler failure. After the retry budget the message is dead-lettered.
#[derive(Debug, Clone, Error)]
#[error("Handler failure: {message}")]
pub struct HandlerError {
    /// Human-readable cause, copied onto the DLQ record.
    pub message: String,
}

impl HandlerError {
    /// Build from any displayable error.
    pub fn new(message: impl std::fmt::Display) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

/// Per-message processing logic. Handlers must be idempotent: delivery is
/// at-least-once.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one message.
    async fn handle(&self, message: &StoredMessage) -> Result<(), HandlerError>;
}

/// Backoff schedule between handler attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delays after the 1st, 2nd, … failures. Length = retry budget.
    pub delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delays: vec![
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_secs(2),
            ],
        }
    }
}

impl RetryPolicy {
    /// Near-zero delays for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            delays: vec![
                Duration::from_millis(1),
                Duration::from_millis(1),
                Duration::from_millis(1),
            ],
        }
    }

    /// Total attempts (first try + retries).
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.delays.len() as u32 + 1
    }
}

/// Worker tuning.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Poll timeout.
    pub poll_timeout: Duration,
    /// Messages pulled per poll.
    pub batch_size: usize,
    /// Retry schedule.
    pub retry: RetryPolicy,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(1),
            batch_size: 100,
            retry: RetryPolicy::default(),
        }
    }
}

impl ConsumerConfig {
    /// Fast polling and near-zero backoff for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            poll_timeout: Duration::from_millis(20),
            batch_size: 100,
            retry: RetryPolicy::for_testing(),
        }
    }
}

/// One consumer on one `(group, topic, partition)`.
pub struct ConsumerWorker {
    bus: Arc<InMemoryBus>,
    group: String,
    topic: String,
    partition: Partition,
    handler: Arc<dyn MessageHandler>,
    config: ConsumerConfig,
    clock: Arc<dyn Clock>,
    dlq_seq: AtomicU64,
}

impl ConsumerWorker {
    /// Create a worker.
    #[must_use]
    pub fn new(
        bus: Arc<InMemoryBus>,
        group: impl Into<String>,
        topic: impl Into<String>,
        partition: Partition,
        handler: Arc<dyn MessageHandler>,
        config: ConsumerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            bus,
            group: group.into(),
            topic: topic.into(),
            partition,
            handler,
            config,
            clock,
            dlq_seq: AtomicU64::new(0),
        }
    }

    /// The worker's consumer group.
    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Poll once and process the returned batch. Returns the number of
    /// messages handled (committed), dead-lettered ones included.
    pub async fn run_once(&self) -> usize {
        let batch = self
            .bus
            .poll(
                &self.group,
                &self.topic,
                self.partition,
                self.config.batch_size,
                self.config.poll_timeout,
            )
            .await;
        let mut processed = 0;
        for message in &batch {
            self.process(message).await;
            processed += 1;
        }
        processed
    }

    /// Poll-process loop until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        debug!(
            group = %self.group,
            topic = %self.topic,
            partition = self.partition,
            "Consumer started"
        );
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = shutdown.changed() => break,
                count = self.run_once() => {
                    if count > 0 {
                        debug!(group = %self.group, partition = self.partition, count, "Batch handled");
                    }
                }
            }
        }
        debug!(group = %self.group, partition = self.partition, "Consumer stopped");
    }

    /// Handle one message with retries; commit afterwards no matter what.
    async fn process(&self, message: &StoredMessage) {
        let mut attempt: u32 = 0;
        let final_error = loop {
            attempt += 1;
            match self.handler.handle(message).await {
                Ok(()) => break None,
                Err(e) if attempt < self.config.retry.attempts() => {
                    CONSUMER_RETRIES.with_label_values(&[&self.group]).inc();
                    let delay = self.config.retry.delays[(attempt - 1) as usize];
                    warn!(
                        group = %self.group,
                        topic = %self.topic,
                        offset = message.offset,
                        attempt,
                        error = %e,
                        "Handler failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => break Some(e),
            }
        };

        if let Some(e) = final_error {
            self.dead_letter(message, &e, attempt - 1);
        }

        if let Err(e) = self
            .bus
            .commit(&self.group, &self.topic, self.partition, message.offset)
        {
            // A failed commit means redelivery, which idempotent handlers
            // absorb; it is logged, not fatal.
            error!(group = %self.group, offset = message.offset, error = %e, "Offset commit failed");
        }
    }

    fn dead_letter(&self, message: &StoredMessage, error: &HandlerError, retry_count: u32) {
        DLQ_MESSAGES.with_label_values(&[&self.group]).inc();
        let dead = DeadLetter {
            original_topic: message.topic.clone(),
            partition: message.partition,
            offset: message.offset,
            key: message.key.clone(),
            payload: message.payload.clone(),
            error: error.message.clone(),
            retry_count,
            failed_at_ms: self.clock.now_ms(),
            consumer_group: self.group.clone(),
        };
        let envelope = BusEnvelope::new(
            format!("dlq:{}", self.group),
            self.dlq_seq.fetch_add(1, Ordering::Relaxed),
            message.key.clone(),
            self.clock.now_ms(),
            dead,
        );
        match self.bus.publish(topics::DLQ, &envelope) {
            Ok((partition, offset)) => warn!(
                group = %self.group,
                original_topic = %message.topic,
                original_offset = message.offset,
                dlq_partition = partition,
                dlq_offset = offset,
                "Message dead-lettered"
            ),
            Err(e) => error!(
                group = %self.group,
                original_offset = message.offset,
                error = %e,
                "DLQ publish failed; message dropped after retries"
            ),
        }
    }
}
