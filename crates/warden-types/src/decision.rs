//! # Evaluator Request and Decision Shapes
//!
//! The evaluator returns a [`Decision`] with a tagged reason; callers never
//! branch on errors to decide allow/deny. A denial is a normal outcome, not
//! an error.

use crate::entities::MandateId;
use crate::TimestampMs;
use serde::{Deserialize, Serialize};

/// Why a request was allowed or denied.
///
/// Serialized with the exact variant names the proxy and adapters expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DecisionReason {
    /// All checks passed.
    Allow,
    /// No mandate with the requested id exists.
    UnknownMandate,
    /// A signature in the mandate chain failed verification.
    BadSignature,
    /// A mandate in the chain was revoked.
    Revoked,
    /// `now` is past `not_after` somewhere in the chain.
    Expired,
    /// `now` is before `not_before` somewhere in the chain.
    NotYetValid,
    /// The requested action/resource is outside the mandate scope.
    OutOfScope,
    /// The supplied intent claim does not hash to the bound intent.
    IntentMismatch,
    /// The root issuer's active policy no longer permits the scope.
    PolicyDenied,
    /// The evaluation deadline expired or the client canceled.
    Canceled,
    /// An internal fault; the evaluator fails closed.
    InternalError,
}

impl DecisionReason {
    /// Whether this reason means the request proceeds.
    #[must_use]
    pub fn is_allow(&self) -> bool {
        matches!(self, DecisionReason::Allow)
    }
}

/// A request from the proxy or tool adapter to evaluate one action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationRequest {
    /// The mandate claimed to authorize the action.
    pub mandate_id: MandateId,
    /// The action about to be performed.
    pub requested_action: String,
    /// The concrete resource URN.
    pub requested_resource: String,
    /// The declared operation, for intent-bound mandates.
    #[serde(default)]
    pub intent_claim: Option<serde_json::Value>,
    /// Correlation id threading the request through the audit trail.
    #[serde(default)]
    pub correlation_id: Option<String>,
}

/// The evaluator's answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    /// Whether the action may proceed.
    pub allowed: bool,
    /// The specific reason.
    pub reason: DecisionReason,
    /// The evaluated mandate.
    pub mandate_id: MandateId,
    /// When the evaluation finished.
    pub evaluated_at_ms: TimestampMs,
    /// Wall-clock cost of the evaluation.
    pub latency_ms: u64,
    /// Correlation id copied from the request.
    pub correlation_id: Option<String>,
}

impl Decision {
    /// Build a decision from a reason; `allowed` follows the reason.
    #[must_use]
    pub fn from_reason(
        reason: DecisionReason,
        mandate_id: MandateId,
        evaluated_at_ms: TimestampMs,
        latency_ms: u64,
        correlation_id: Option<String>,
    ) -> Self {
        Decision {
            allowed: reason.is_allow(),
            reason,
            mandate_id,
            evaluated_at_ms,
            latency_ms,
            correlation_id,
        }
    }
}

/// A decision as published on the `policy.decisions` topic.
///
/// Carries the request context the ledger writer needs to build the
/// `decision_allow` / `decision_deny` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionNotice {
    /// The principal the decision concerns (the leaf mandate's subject;
    /// nil when the mandate was unknown).
    pub principal_id: crate::entities::PrincipalId,
    /// The evaluated action.
    pub requested_action: String,
    /// The evaluated resource URN.
    pub requested_resource: String,
    /// The decision itself.
    pub decision: Decision,
}
