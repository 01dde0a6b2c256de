//! # Warden Bus
//!
//! The ordered message bus between emitters (evaluator, proxy-side
//! metering) and the consumer pipeline.
//!
//! ## Semantics
//!
//! - Topics are partitioned; messages are routed by key (principal id), so
//!   one principal's messages are totally ordered within a partition.
//! - Messages are retained, not broadcast: consumers address them by
//!   offset, which makes at-least-once delivery and replay possible.
//! - Each consumer group commits offsets per `(topic, partition)`;
//!   an uncommitted group starts from the earliest retained offset.
//! - Messages that exhaust their retry budget are published to the
//!   [`topics::DLQ`] topic with full failure context.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod bus;
pub mod dedupe;
pub mod message;
pub mod topics;

pub use bus::{BusError, InMemoryBus};
pub use dedupe::ProducerDedupeCache;
pub use message::{DeadLetter, StoredMessage};
