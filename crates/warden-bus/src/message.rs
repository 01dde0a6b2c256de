//! # Bus Message Shapes

use serde::{Deserialize, Serialize};
use warden_types::{Partition, TimestampMs};

/// A message as retained on a partition log.
///
/// The payload is the serialized [`warden_types::BusEnvelope`]; it stays a
/// JSON value on the bus so the log does not depend on any one consumer's
/// schema version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Topic the message was published to.
    pub topic: String,
    /// Partition the key routed to.
    pub partition: Partition,
    /// Position within the partition log, starting at 0, no gaps.
    pub offset: u64,
    /// Partition key (principal id).
    pub key: String,
    /// The serialized envelope.
    pub payload: serde_json::Value,
    /// When the bus accepted the message.
    pub published_ms: TimestampMs,
}

/// A message that exhausted its retry budget, as published on the DLQ.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    /// Topic the message originally arrived on.
    pub original_topic: String,
    /// Original partition.
    pub partition: Partition,
    /// Original offset.
    pub offset: u64,
    /// Original key.
    pub key: String,
    /// The original payload, untouched.
    pub payload: serde_json::Value,
    /// Stringified handler error from the final attempt.
    pub error: String,
    /// How many times the handler was tried.
    pub retry_count: u32,
    /// When the final attempt failed.
    pub failed_at_ms: TimestampMs,
    /// The consumer group that gave up.
    pub consumer_group: String,
}
