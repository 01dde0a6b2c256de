//! # Warden Evaluator
//!
//! The hot-path decision engine: given `(mandate, action, resource)`,
//! decide allow or deny with a bounded latency budget.
//!
//! ## Properties
//!
//! - **Fail-closed.** Any internal fault, missing dependency, or ambiguity
//!   is a deny with reason `InternalError`. A denial is a normal outcome,
//!   never an error.
//! - **Short-circuit order.** Chain resolution, signatures, revocation,
//!   validity, scope, chain-subset, intent binding, policy ceiling; the
//!   first failure wins and names the specific reason.
//! - **Audited.** Every decision, including denials and deadline
//!   cancellations, is published on `policy.decisions` and lands on the
//!   ledger through the consumer pipeline.
//! - **Read-mostly caches.** Resolved chains and active policies are held
//!   in bounded TTL caches with explicit invalidation on revocation and
//!   policy change; a cache hit still re-checks `now` against the cached
//!   validity and revocation state.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod cache;
pub mod evaluator;

pub use cache::LruTtlCache;
pub use evaluator::{Evaluator, EvaluatorConfig};
