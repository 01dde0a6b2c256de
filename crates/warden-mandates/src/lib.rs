//! # Warden Mandates
//!
//! The mandate lifecycle: issue a root grant within the issuer's policy
//! ceiling, delegate a subset of an existing grant, and revoke, optionally
//! cascading over every descendant.
//!
//! Every lifecycle transition lands on the ledger in the same transaction
//! as the entity write, and a change notice goes out on the bus so the
//! evaluator's caches can drop the affected entries.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod canonical;
pub mod errors;
pub mod manager;

pub use canonical::mandate_signing_bytes;
pub use errors::MandateError;
pub use manager::{IssueParams, MandateManager, PolicyDraft};
