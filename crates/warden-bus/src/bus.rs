//! # In-Memory Bus
//!
//! Single-process implementation of the partitioned, offset-addressed bus.
//! Distributed deployments would swap this for a real broker; the consumer
//! pipeline only sees `publish` / `poll` / `commit`.

use crate::message::StoredMessage;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, warn};
use warden_types::events::partition_for_key;
use warden_types::{BusEnvelope, Partition, TimestampMs};

/// Errors from bus operations.
#[derive(Debug, Error)]
pub enum BusError {
    /// The envelope payload could not be serialized.
    #[error("Failed to serialize payload: {0}")]
    Serialize(String),

    /// A commit referenced an offset the partition does not hold.
    #[error("Offset {offset} out of range for {topic}/{partition} (log length {len})")]
    OffsetOutOfRange {
        topic: String,
        partition: Partition,
        offset: u64,
        len: u64,
    },
}

#[derive(Default)]
struct BusState {
    /// Retained messages per (topic, partition).
    logs: HashMap<(String, Partition), Vec<StoredMessage>>,
    /// Next offset each group will read, per (group, topic, partition).
    committed: HashMap<(String, String, Partition), u64>,
}

/// In-memory partitioned message bus.
pub struct InMemoryBus {
    partitions: u32,
    state: RwLock<BusState>,
    /// Woken on every publish so pollers can re-check their logs.
    notify: Arc<Notify>,
}

impl InMemoryBus {
    /// Create a bus with the given partition count (minimum 1).
    #[must_use]
    pub fn new(partitions: u32) -> Self {
        Self {
            partitions: partitions.max(1),
            state: RwLock::new(BusState::default()),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Number of partitions per topic.
    #[must_use]
    pub fn partitions(&self) -> u32 {
        self.partitions
    }

    /// Publish an envelope; the key routes it to a partition. Returns the
    /// `(partition, offset)` the message landed at.
    pub fn publish<T: Serialize>(
        &self,
        topic: &str,
        envelope: &BusEnvelope<T>,
    ) -> Result<(Partition, u64), BusError> {
        let payload =
            serde_json::to_value(envelope).map_err(|e| BusError::Serialize(e.to_string()))?;
        let partition = partition_for_key(&envelope.key, self.partitions);
        let published_ms = envelope.published_ms;
        self.publish_raw(topic, partition, envelope.key.clone(), payload, published_ms)
    }

    /// Publish a pre-serialized payload to an explicit partition. Used by
    /// the consumer pipeline to forward originals onto the DLQ unchanged.
    pub fn publish_raw(
        &self,
        topic: &str,
        partition: Partition,
        key: String,
        payload: serde_json::Value,
        published_ms: TimestampMs,
    ) -> Result<(Partition, u64), BusError> {
        let offset;
        {
            let mut state = self.state.write();
            let log = state
                .logs
                .entry((topic.to_string(), partition))
                .or_default();
            offset = log.len() as u64;
            log.push(StoredMessage {
                topic: topic.to_string(),
                partition,
                offset,
                key,
                payload,
                published_ms,
            });
        }
        debug!(topic, partition, offset, "Message published");
        self.notify.notify_waiters();
        Ok((partition, offset))
    }

    /// Read up to `max` messages past the group's committed offset,
    /// waiting up to `timeout` for at least one to arrive.
    pub async fn poll(
        &self,
        group: &str,
        topic: &str,
        partition: Partition,
        max: usize,
        timeout: Duration,
    ) -> Vec<StoredMessage> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register for wakeups before checking the log, so a publish
            // between the check and the await cannot be missed.
            let mut notified = std::pin::pin!(self.notify.notified());
            notified.as_mut().enable();

            let batch = self.fetch(group, topic, partition, max);
            if !batch.is_empty() {
                return batch;
            }
            tokio::select! {
                () = &mut notified => {}
                () = tokio::time::sleep_until(deadline) => return Vec::new(),
            }
        }
    }

    fn fetch(
        &self,
        group: &str,
        topic: &str,
        partition: Partition,
        max: usize,
    ) -> Vec<StoredMessage> {
        let state = self.state.read();
        let next = state
            .committed
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied()
            // No committed offset: fall back to earliest.
            .unwrap_or(0);
        state
            .logs
            .get(&(topic.to_string(), partition))
            .map(|log| {
                log.iter()
                    .skip(next as usize)
                    .take(max)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Synchronously mark everything up to and including `offset` consumed
    /// for the group.
    pub fn commit(
        &self,
        group: &str,
        topic: &str,
        partition: Partition,
        offset: u64,
    ) -> Result<(), BusError> {
        let mut state = self.state.write();
        let len = state
            .logs
            .get(&(topic.to_string(), partition))
            .map(|log| log.len() as u64)
            .unwrap_or(0);
        if offset >= len {
            warn!(group, topic, partition, offset, len, "Commit past log end rejected");
            return Err(BusError::OffsetOutOfRange {
                topic: topic.to_string(),
                partition,
                offset,
                len,
            });
        }
        state
            .committed
            .insert((group.to_string(), topic.to_string(), partition), offset + 1);
        Ok(())
    }

    /// The group's committed position: the offset of the next message it
    /// will read, if any commit has happened.
    #[must_use]
    pub fn committed(&self, group: &str, topic: &str, partition: Partition) -> Option<u64> {
        self.state
            .read()
            .committed
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied()
    }

    /// Number of retained messages on a partition log.
    #[must_use]
    pub fn log_len(&self, topic: &str, partition: Partition) -> u64 {
        self.state
            .read()
            .logs
            .get(&(topic.to_string(), partition))
            .map(|log| log.len() as u64)
            .unwrap_or(0)
    }

    /// All retained messages on a partition, for replay.
    #[must_use]
    pub fn read_from(
        &self,
        topic: &str,
        partition: Partition,
        from_offset: u64,
    ) -> Vec<StoredMessage> {
        self.state
            .read()
            .logs
            .get(&(topic.to_string(), partition))
            .map(|log| log.iter().skip(from_offset as usize).cloned().collect())
            .unwrap_or_default()
    }
}
