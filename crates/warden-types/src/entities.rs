//! # Domain Entities
//!
//! Principals, authority policies, and execution mandates.
//!
//! Ownership: the persistence layer owns every record; other subsystems hold
//! ids and read through it. Principals and policies are never deleted, only
//! tombstoned; mandates transition to `Revoked` exactly once.

use crate::pattern::ResourcePattern;
use crate::{Hash, TimestampMs};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Stable identifier of a principal.
pub type PrincipalId = Uuid;

/// Stable identifier of a mandate.
pub type MandateId = Uuid;

/// Stable identifier of a policy version.
pub type PolicyId = Uuid;

/// Compressed SEC1 P-256 public key (33 bytes).
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyBytes(#[serde_as(as = "Bytes")] pub [u8; 33]);

impl PublicKeyBytes {
    /// Raw compressed bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 33] {
        &self.0
    }
}

/// ECDSA signature in `r || s` form (64 bytes).
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureBytes(#[serde_as(as = "Bytes")] pub [u8; 64]);

impl SignatureBytes {
    /// Raw `r || s` bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl std::fmt::Display for SignatureBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// An identity (agent or user) holding a signing key.
///
/// The optional `parent` link forms a forest: a principal is either a root
/// or a delegated child. Immutable once created except for
/// soft-deactivation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    /// Stable id.
    pub id: PrincipalId,
    /// Current P-256 public key, used to verify mandate signatures.
    pub public_key: PublicKeyBytes,
    /// Human-readable name.
    pub display_name: String,
    /// Owning team or operator.
    pub owner: String,
    /// Parent principal for delegated children.
    pub parent: Option<PrincipalId>,
    /// Creation time.
    pub created_ms: TimestampMs,
    /// Soft-deactivation flag. Deactivated principals cannot issue.
    pub deactivated: bool,
    /// Administrative capability: may revoke any mandate.
    pub is_admin: bool,
}

/// A principal's ceiling: what it may in turn issue mandates for.
///
/// Exactly one policy per principal is active at a time; prior versions are
/// retained as history for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorityPolicy {
    /// Id of this policy version.
    pub id: PolicyId,
    /// The principal this policy constrains.
    pub principal_id: PrincipalId,
    /// Resource patterns the principal may grant.
    pub resources: Vec<ResourcePattern>,
    /// Action names the principal may grant.
    pub actions: BTreeSet<String>,
    /// Maximum validity span of any issued mandate, in milliseconds.
    pub max_validity_ms: i64,
    /// Maximum delegation depth of any mandate under this policy.
    pub max_delegation_depth: u32,
    /// Whether mandates issued under this policy may be delegated further.
    pub delegation_permitted: bool,
    /// Whether this version is the active one.
    pub active: bool,
    /// Monotonic version number within the principal's policy history.
    pub version: u32,
    /// Creation time.
    pub created_ms: TimestampMs,
}

impl AuthorityPolicy {
    /// Whether this policy's ceiling covers the given scope.
    ///
    /// Every requested resource pattern must be covered by some policy
    /// pattern, and every requested action must be in the policy action set.
    #[must_use]
    pub fn permits_scope(&self, resources: &[ResourcePattern], actions: &BTreeSet<String>) -> bool {
        crate::pattern::scope_subset(resources, &self.resources)
            && actions.iter().all(|a| self.actions.contains(a))
    }

    /// Whether a validity span of `span_ms` is within the policy maximum.
    #[must_use]
    pub fn permits_validity(&self, span_ms: i64) -> bool {
        span_ms > 0 && span_ms <= self.max_validity_ms
    }
}

/// Revocation state of a mandate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevocationState {
    /// The mandate has not been revoked.
    Active,
    /// The mandate was revoked; a mandate is revoked at most once.
    Revoked {
        /// When the revocation happened.
        revoked_ms: TimestampMs,
        /// Operator-supplied reason.
        reason: String,
        /// Principal that performed the revocation.
        revoker: PrincipalId,
    },
}

impl RevocationState {
    /// Whether this state is `Revoked`.
    #[must_use]
    pub fn is_revoked(&self) -> bool {
        matches!(self, RevocationState::Revoked { .. })
    }
}

/// A signed grant authorizing a subject to perform actions in a scope for a
/// bounded window.
///
/// The signature is by the issuer over the canonical serialization of every
/// field up to and including `created_ms`; revocation state is mutable and
/// therefore outside the signed payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mandate {
    /// UUID v4 id.
    pub id: MandateId,
    /// Principal that signed this mandate.
    pub issuer: PrincipalId,
    /// Principal authorized by this mandate.
    pub subject: PrincipalId,
    /// Resource scope. Wildcards allowed; see [`crate::pattern`].
    pub resources: Vec<ResourcePattern>,
    /// Action scope.
    pub actions: BTreeSet<String>,
    /// Start of the validity window (inclusive).
    pub not_before_ms: TimestampMs,
    /// End of the validity window (inclusive).
    pub not_after_ms: TimestampMs,
    /// Parent mandate for delegated grants.
    pub parent_id: Option<MandateId>,
    /// Delegation depth; 0 for root mandates.
    pub depth: u32,
    /// Optional binding to one pre-declared operation.
    pub intent_hash: Option<Hash>,
    /// Issuer signature over the canonical payload.
    pub signature: SignatureBytes,
    /// Creation time.
    pub created_ms: TimestampMs,
    /// Revocation state.
    pub revocation: RevocationState,
}

impl Mandate {
    /// Whether the validity window has passed at `now`.
    #[must_use]
    pub fn is_expired(&self, now_ms: TimestampMs) -> bool {
        now_ms > self.not_after_ms
    }

    /// Whether the validity window has not yet opened at `now`.
    ///
    /// A mandate with `not_before` in the future is valid-but-not-yet-active;
    /// the evaluator denies until the window opens.
    #[must_use]
    pub fn is_not_yet_valid(&self, now_ms: TimestampMs) -> bool {
        now_ms < self.not_before_ms
    }

    /// Whether `now` lies inside the validity window.
    #[must_use]
    pub fn is_within_validity(&self, now_ms: TimestampMs) -> bool {
        !self.is_expired(now_ms) && !self.is_not_yet_valid(now_ms)
    }

    /// Whether this mandate's validity window contains `other`'s.
    #[must_use]
    pub fn validity_contains(&self, other: &Mandate) -> bool {
        self.not_before_ms <= other.not_before_ms && other.not_after_ms <= self.not_after_ms
    }

    /// Whether `other`'s scope is a subset of this mandate's scope.
    #[must_use]
    pub fn scope_contains(&self, other: &Mandate) -> bool {
        crate::pattern::scope_subset(&other.resources, &self.resources)
            && other.actions.iter().all(|a| self.actions.contains(a))
    }

    /// Shorthand for revocation state.
    #[must_use]
    pub fn is_revoked(&self) -> bool {
        self.revocation.is_revoked()
    }
}
