//! # Mandate Lifecycle Errors

use thiserror::Error;
use uuid::Uuid;
use warden_crypto::CryptoError;
use warden_ledger::WriterError;
use warden_types::StoreError;

/// Errors from issuing, delegating, or revoking mandates.
#[derive(Debug, Error)]
pub enum MandateError {
    /// The issuer has no active policy.
    #[error("Principal {issuer} has no active policy")]
    NoAuthority { issuer: Uuid },

    /// The issuer was soft-deactivated.
    #[error("Principal {issuer} is deactivated")]
    IssuerDeactivated { issuer: Uuid },

    /// `not_before` must precede `not_after`.
    #[error("Invalid validity window [{not_before_ms}, {not_after_ms}]")]
    InvalidValidity {
        not_before_ms: i64,
        not_after_ms: i64,
    },

    /// The requested scope exceeds the issuer's policy ceiling.
    #[error("Requested scope exceeds policy ceiling for {issuer}")]
    ScopeExceedsPolicy { issuer: Uuid },

    /// The validity span exceeds the policy maximum.
    #[error("Validity span {span_ms} ms exceeds policy maximum {max_ms} ms")]
    ValidityExceedsPolicy { span_ms: i64, max_ms: i64 },

    /// The issuer's policy does not permit delegation.
    #[error("Policy for {issuer} does not permit delegation")]
    DelegationNotPermitted { issuer: Uuid },

    /// The parent mandate was revoked.
    #[error("Parent mandate {parent} is revoked")]
    ParentRevoked { parent: Uuid },

    /// The parent mandate's window has passed.
    #[error("Parent mandate {parent} is expired")]
    ParentExpired { parent: Uuid },

    /// The parent mandate's window has not opened.
    #[error("Parent mandate {parent} is not yet valid")]
    ParentNotYetValid { parent: Uuid },

    /// Only the holder of the parent mandate may delegate it.
    #[error("Principal {issuer} does not hold parent mandate {parent}")]
    NotParentHolder { issuer: Uuid, parent: Uuid },

    /// The child scope is not a subset of the parent scope.
    #[error("Child scope exceeds parent mandate {parent}")]
    ScopeExceedsParent { parent: Uuid },

    /// The child validity window is not contained in the parent's.
    #[error("Child validity outside parent mandate {parent}")]
    ValidityOutsideParent { parent: Uuid },

    /// The delegation chain would exceed the policy's maximum depth.
    #[error("Delegation depth {depth} exceeds maximum {max}")]
    DepthExceeded { depth: u32, max: u32 },

    /// The mandate is already revoked.
    #[error("Mandate {mandate} is already revoked")]
    AlreadyRevoked { mandate: Uuid },

    /// The revoker is neither issuer, subject, nor admin.
    #[error("Principal {revoker} may not revoke mandate {mandate}")]
    NotAuthorized { revoker: Uuid, mandate: Uuid },

    /// The store rejected a read or write.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The ledger append failed.
    #[error(transparent)]
    Ledger(#[from] WriterError),

    /// Signing failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}
