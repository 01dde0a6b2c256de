//! # Warden Pipeline
//!
//! The at-least-once consumer machinery between the bus and the ledger.
//!
//! Three consumer groups read the metering and decision topics:
//!
//! - `ledger-writer` - prices metering records and turns bus messages into
//!   ledger rows; idempotent via `(principal, producer_seq)` uniqueness.
//! - `aggregator-metrics` - feeds the Prometheus counters.
//! - `audit-logger` - structured log line per message.
//!
//! Each worker polls with a timeout, handles messages strictly in order
//! within its partition, commits synchronously on success, retries with
//! backoff on failure, and dead-letters after the retry budget, then
//! commits past the poisoned message so the partition keeps flowing.
//!
//! [`replay`] rebuilds derived state from a snapshot and the retained bus
//! log, and refuses to hand control back until Merkle verification over
//! the reconstructed range passes.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod consumer;
pub mod handlers;
pub mod replay;

pub use consumer::{ConsumerConfig, ConsumerWorker, HandlerError, MessageHandler, RetryPolicy};
pub use handlers::{groups, AuditLogHandler, LedgerWriteHandler, MetricsHandler};
pub use replay::{ReplayError, ReplayReport, ReplayStart, Replayer};
