//! # Warden Shared Types
//!
//! Domain entities, value objects, and error taxonomy shared by every
//! Warden subsystem.
//!
//! ## Contents
//!
//! - [`entities`] - principals, authority policies, execution mandates
//! - [`events`] - ledger events, Merkle batches, snapshots
//! - [`pattern`] - `:`-delimited resource URN patterns and subset logic
//! - [`money`] - fixed-point costs with explicit currency
//! - [`decision`] - evaluator request/decision shapes
//! - [`envelope`] - the versioned message envelope used on the bus
//! - [`errors`] - shared error types

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod decision;
pub mod entities;
pub mod envelope;
pub mod errors;
pub mod events;
pub mod money;
pub mod pattern;

pub use decision::{Decision, DecisionNotice, DecisionReason, EvaluationRequest};
pub use entities::{
    AuthorityPolicy, Mandate, MandateId, PolicyId, Principal, PrincipalId, PublicKeyBytes,
    RevocationState, SignatureBytes,
};
pub use envelope::{BusEnvelope, EnvelopeError};
pub use errors::StoreError;
pub use events::{
    ChangeNotice, EventBody, EventId, EventType, LedgerEvent, LifecycleNotice, MerkleBatch,
    MeteringRecord, Outcome, Partition, Snapshot,
};
pub use money::{Cost, Currency};
pub use pattern::{matches_any, scope_subset, ResourcePattern};

/// A 32-byte digest (SHA-256 output).
pub type Hash = [u8; 32];

/// Milliseconds since the Unix epoch.
pub type TimestampMs = i64;
