//! # Bus Envelope
//!
//! The versioned wrapper for every message on the bus. Readers check the
//! version before touching the payload and tolerate unknown optional fields,
//! so producers can be upgraded first.

use crate::TimestampMs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from envelope validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    /// The envelope version is newer than this reader supports.
    #[error("Unsupported envelope version: received {received}, supported up to {supported}")]
    UnsupportedVersion { received: u16, supported: u16 },
}

/// The universal message envelope for bus traffic.
///
/// `producer_id` and `producer_seq` identify the message for deduplication:
/// a producer never reuses a sequence number, so `(key, producer_seq)` keyed
/// handlers can turn redelivery into a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEnvelope<T> {
    /// Schema version. Checked before the payload is interpreted.
    pub version: u16,
    /// Stable identifier of the producing component.
    pub producer_id: String,
    /// Monotonic per-producer sequence number.
    pub producer_seq: u64,
    /// Partition key; Warden keys by principal id so one principal's
    /// events stay ordered.
    pub key: String,
    /// Correlation id threading a request through the system.
    #[serde(default)]
    pub correlation_id: Option<String>,
    /// Publish time.
    pub published_ms: TimestampMs,
    /// The payload.
    pub payload: T,
}

impl<T> BusEnvelope<T> {
    /// Current schema version.
    pub const CURRENT_VERSION: u16 = 1;

    /// Wrap a payload with the current version.
    pub fn new(
        producer_id: impl Into<String>,
        producer_seq: u64,
        key: impl Into<String>,
        published_ms: TimestampMs,
        payload: T,
    ) -> Self {
        BusEnvelope {
            version: Self::CURRENT_VERSION,
            producer_id: producer_id.into(),
            producer_seq,
            key: key.into(),
            correlation_id: None,
            published_ms,
            payload,
        }
    }

    /// Attach a correlation id.
    #[must_use]
    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Reject envelopes from a future schema.
    pub fn validate_version(&self) -> Result<(), EnvelopeError> {
        if self.version > Self::CURRENT_VERSION {
            return Err(EnvelopeError::UnsupportedVersion {
                received: self.version,
                supported: Self::CURRENT_VERSION,
            });
        }
        Ok(())
    }
}
