//! # Warden Node Runtime
//!
//! Builds and runs the full service: durable store, partitioned bus,
//! per-partition ledger writers and Merkle aggregators, consumer groups,
//! the mandate manager, and the authority evaluator.
//!
//! All wiring happens in [`container::Node::build`]; nothing reaches for
//! process-wide state beyond the metrics sink.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod config;
pub mod container;

pub use config::NodeConfig;
pub use container::Node;
