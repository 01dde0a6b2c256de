//! # Mandate Manager
//!
//! Issues, delegates, and revokes mandates. Entity writes and their ledger
//! events land in one transaction through the ledger writer; change notices
//! go out on the bus afterwards so evaluator caches drop stale entries.

use crate::canonical::mandate_signing_bytes;
use crate::errors::MandateError;
use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use warden_bus::{topics, InMemoryBus};
use warden_crypto::KeyRegistry;
use warden_ledger::LedgerRouter;
use warden_store::{Clock, Store, WriteBatch, WriteOp};
use warden_types::{
    AuthorityPolicy, BusEnvelope, ChangeNotice, EventBody, EventType, Hash, LifecycleNotice,
    Mandate, MandateId, Principal, PrincipalId, ResourcePattern, RevocationState, TimestampMs,
};

/// Inputs to `issue` / `delegate`.
#[derive(Debug, Clone)]
pub struct IssueParams {
    /// Signing principal.
    pub issuer: PrincipalId,
    /// Principal receiving the grant.
    pub subject: PrincipalId,
    /// Resource scope.
    pub resources: Vec<ResourcePattern>,
    /// Action scope.
    pub actions: BTreeSet<String>,
    /// Window start (inclusive).
    pub not_before_ms: TimestampMs,
    /// Window end (inclusive).
    pub not_after_ms: TimestampMs,
    /// Optional binding to one declared operation.
    pub intent_hash: Option<Hash>,
    /// Parent mandate for delegation.
    pub parent_id: Option<MandateId>,
    /// Correlation id carried onto the ledger event.
    pub correlation_id: Option<String>,
}

/// Inputs to `set_policy`. The manager assigns id, version, and activation.
#[derive(Debug, Clone)]
pub struct PolicyDraft {
    /// The principal the policy constrains.
    pub principal_id: PrincipalId,
    /// Resource ceiling.
    pub resources: Vec<ResourcePattern>,
    /// Action ceiling.
    pub actions: BTreeSet<String>,
    /// Maximum validity span for issued mandates.
    pub max_validity_ms: i64,
    /// Maximum delegation depth.
    pub max_delegation_depth: u32,
    /// Whether delegation is permitted at all.
    pub delegation_permitted: bool,
}

/// The mandate lifecycle service.
pub struct MandateManager {
    store: Arc<dyn Store>,
    ledger: Arc<LedgerRouter>,
    keys: Arc<dyn KeyRegistry>,
    clock: Arc<dyn Clock>,
    bus: Option<Arc<InMemoryBus>>,
    producer_seq: AtomicU64,
}

impl MandateManager {
    /// Producer id stamped on this manager's bus envelopes.
    pub const PRODUCER_ID: &'static str = "mandate-manager";

    /// Create a manager without bus notifications (tests, offline tools).
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        ledger: Arc<LedgerRouter>,
        keys: Arc<dyn KeyRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            ledger,
            keys,
            clock,
            bus: None,
            producer_seq: AtomicU64::new(0),
        }
    }

    /// Attach the bus for change and lifecycle notices.
    #[must_use]
    pub fn with_bus(mut self, bus: Arc<InMemoryBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    // --- principals -------------------------------------------------------

    /// Register a principal and announce it on `agent.lifecycle`.
    pub fn create_principal(&self, principal: Principal) -> Result<(), MandateError> {
        let id = principal.id;
        self.store
            .commit(WriteBatch::new().with(WriteOp::InsertPrincipal(principal)))?;
        info!(principal = %id, "Principal created");
        self.publish_lifecycle(&id, LifecycleNotice::PrincipalCreated { principal_id: id });
        Ok(())
    }

    /// Tombstone a principal. Existing mandates stay on the ledger; the
    /// evaluator denies new issuance from a deactivated issuer.
    pub fn deactivate_principal(&self, id: &PrincipalId) -> Result<(), MandateError> {
        self.store
            .commit(WriteBatch::new().with(WriteOp::DeactivatePrincipal(*id)))?;
        info!(principal = %id, "Principal deactivated");
        self.publish_lifecycle(id, LifecycleNotice::PrincipalDeactivated { principal_id: *id });
        Ok(())
    }

    // --- policies ---------------------------------------------------------

    /// Activate a new policy version for a principal. The prior active
    /// version is deactivated in the same transaction; history is kept.
    pub fn set_policy(&self, draft: PolicyDraft) -> Result<AuthorityPolicy, MandateError> {
        let version = self
            .store
            .policy_history(&draft.principal_id)?
            .last()
            .map(|p| p.version + 1)
            .unwrap_or(1);
        let policy = AuthorityPolicy {
            id: Uuid::new_v4(),
            principal_id: draft.principal_id,
            resources: draft.resources,
            actions: draft.actions,
            max_validity_ms: draft.max_validity_ms,
            max_delegation_depth: draft.max_delegation_depth,
            delegation_permitted: draft.delegation_permitted,
            active: true,
            version,
            created_ms: self.clock.now_ms(),
        };
        self.store
            .commit(WriteBatch::new().with(WriteOp::InsertPolicy(policy.clone())))?;
        info!(principal = %policy.principal_id, version, "Policy activated");
        self.publish_change(
            &policy.principal_id.to_string(),
            ChangeNotice::PolicyActivated {
                principal_id: policy.principal_id,
            },
        );
        Ok(policy)
    }

    // --- mandates ---------------------------------------------------------

    /// Issue a mandate. With `parent_id` set this is a delegation and the
    /// full parent-subset rules apply.
    pub fn issue(&self, params: IssueParams) -> Result<Mandate, MandateError> {
        let now = self.clock.now_ms();

        let issuer = self.store.principal(&params.issuer)?;
        if issuer.deactivated {
            return Err(MandateError::IssuerDeactivated {
                issuer: params.issuer,
            });
        }
        // Subject must exist; issuer == subject is fine for root mandates
        // (a principal self-grants within its own ceiling).
        self.store.principal(&params.subject)?;

        let policy = self
            .store
            .active_policy(&params.issuer)
            .map_err(|_| MandateError::NoAuthority {
                issuer: params.issuer,
            })?;

        if params.not_before_ms >= params.not_after_ms {
            return Err(MandateError::InvalidValidity {
                not_before_ms: params.not_before_ms,
                not_after_ms: params.not_after_ms,
            });
        }
        if !policy.permits_scope(&params.resources, &params.actions) {
            return Err(MandateError::ScopeExceedsPolicy {
                issuer: params.issuer,
            });
        }
        let span_ms = params.not_after_ms - params.not_before_ms;
        if !policy.permits_validity(span_ms) {
            return Err(MandateError::ValidityExceedsPolicy {
                span_ms,
                max_ms: policy.max_validity_ms,
            });
        }

        let depth = match &params.parent_id {
            None => 0,
            Some(parent_id) => self.check_delegation(&params, &policy, parent_id, now)?,
        };

        let mut mandate = Mandate {
            id: Uuid::new_v4(),
            issuer: params.issuer,
            subject: params.subject,
            resources: params.resources,
            actions: params.actions,
            not_before_ms: params.not_before_ms,
            not_after_ms: params.not_after_ms,
            parent_id: params.parent_id,
            depth,
            intent_hash: params.intent_hash,
            signature: warden_types::SignatureBytes([0; 64]),
            created_ms: now,
            revocation: RevocationState::Active,
        };
        let payload = mandate_signing_bytes(&mandate)?;
        mandate.signature = self.keys.sign_for(&params.issuer, &payload)?.into();

        let event_type = if mandate.parent_id.is_some() {
            EventType::Delegate
        } else {
            EventType::Issue
        };
        let mut body = EventBody::new(mandate.subject, event_type, now);
        body.mandate_id = Some(mandate.id);
        body.correlation_id = params.correlation_id;

        self.ledger.append_with(
            body,
            WriteBatch::new().with(WriteOp::InsertMandate(mandate.clone())),
        )?;
        debug!(
            mandate = %mandate.id,
            issuer = %mandate.issuer,
            subject = %mandate.subject,
            depth = mandate.depth,
            "Mandate issued"
        );
        Ok(mandate)
    }

    /// Delegation-specific checks; returns the child depth.
    fn check_delegation(
        &self,
        params: &IssueParams,
        policy: &AuthorityPolicy,
        parent_id: &MandateId,
        now: TimestampMs,
    ) -> Result<u32, MandateError> {
        if !policy.delegation_permitted {
            return Err(MandateError::DelegationNotPermitted {
                issuer: params.issuer,
            });
        }
        let parent = self.store.mandate(parent_id)?;
        if parent.is_revoked() {
            return Err(MandateError::ParentRevoked { parent: *parent_id });
        }
        if parent.is_expired(now) {
            return Err(MandateError::ParentExpired { parent: *parent_id });
        }
        if parent.is_not_yet_valid(now) {
            return Err(MandateError::ParentNotYetValid { parent: *parent_id });
        }
        // Only the holder of a grant can derive from it.
        if parent.subject != params.issuer {
            return Err(MandateError::NotParentHolder {
                issuer: params.issuer,
                parent: *parent_id,
            });
        }

        let child_scope_ok = warden_types::scope_subset(&params.resources, &parent.resources)
            && params.actions.iter().all(|a| parent.actions.contains(a));
        if !child_scope_ok {
            return Err(MandateError::ScopeExceedsParent { parent: *parent_id });
        }
        if params.not_before_ms < parent.not_before_ms
            || params.not_after_ms > parent.not_after_ms
        {
            return Err(MandateError::ValidityOutsideParent { parent: *parent_id });
        }

        let depth = parent.depth + 1;
        if depth > policy.max_delegation_depth {
            return Err(MandateError::DepthExceeded {
                depth,
                max: policy.max_delegation_depth,
            });
        }
        Ok(depth)
    }

    /// Revoke a mandate; with `cascade` every descendant is revoked too.
    ///
    /// Returns the ids actually revoked. The root revocation is
    /// transactional; a failing descendant is logged and skipped so one bad
    /// child cannot leave the rest of a compromised subtree live.
    pub fn revoke(
        &self,
        revoker: &PrincipalId,
        mandate_id: &MandateId,
        reason: &str,
        cascade: bool,
    ) -> Result<Vec<MandateId>, MandateError> {
        let mandate = self.store.mandate(mandate_id)?;
        if mandate.is_revoked() {
            return Err(MandateError::AlreadyRevoked {
                mandate: *mandate_id,
            });
        }

        let authorized = *revoker == mandate.issuer
            || *revoker == mandate.subject
            || self.store.principal(revoker)?.is_admin;
        if !authorized {
            return Err(MandateError::NotAuthorized {
                revoker: *revoker,
                mandate: *mandate_id,
            });
        }

        self.revoke_one(revoker, &mandate, reason)?;
        let mut revoked = vec![*mandate_id];

        if cascade {
            // BFS over delegation back-references; every child gets its own
            // row and ledger event.
            let mut queue: VecDeque<MandateId> =
                self.store.children_of(mandate_id)?.into();
            while let Some(child_id) = queue.pop_front() {
                match self.store.children_of(&child_id) {
                    Ok(grandchildren) => queue.extend(grandchildren),
                    Err(e) => warn!(mandate = %child_id, error = %e, "Cascade fan-out read failed"),
                }
                let child = match self.store.mandate(&child_id) {
                    Ok(c) => c,
                    Err(e) => {
                        warn!(mandate = %child_id, error = %e, "Cascade child read failed");
                        continue;
                    }
                };
                if child.is_revoked() {
                    continue;
                }
                match self.revoke_one(revoker, &child, reason) {
                    Ok(()) => revoked.push(child_id),
                    Err(e) => {
                        warn!(mandate = %child_id, error = %e, "Cascade child revocation failed")
                    }
                }
            }
        }

        info!(
            mandate = %mandate_id,
            revoker = %revoker,
            cascade,
            count = revoked.len(),
            "Mandate revoked"
        );
        Ok(revoked)
    }

    fn revoke_one(
        &self,
        revoker: &PrincipalId,
        mandate: &Mandate,
        reason: &str,
    ) -> Result<(), MandateError> {
        let now = self.clock.now_ms();
        let revocation = RevocationState::Revoked {
            revoked_ms: now,
            reason: reason.to_string(),
            revoker: *revoker,
        };
        let mut body = EventBody::new(mandate.subject, EventType::Revoke, now);
        body.mandate_id = Some(mandate.id);
        body.metadata = serde_json::to_vec(&serde_json::json!({ "reason": reason }))
            .unwrap_or_default();

        self.ledger.append_with(
            body,
            WriteBatch::new().with(WriteOp::RevokeMandate {
                id: mandate.id,
                revocation,
            }),
        )?;
        self.publish_change(
            &mandate.subject.to_string(),
            ChangeNotice::MandateRevoked {
                mandate_id: mandate.id,
            },
        );
        Ok(())
    }

    // --- bus notices ------------------------------------------------------

    fn publish_change(&self, key: &str, notice: ChangeNotice) {
        self.publish(topics::POLICY_CHANGES, key, &notice);
    }

    fn publish_lifecycle(&self, principal: &PrincipalId, notice: LifecycleNotice) {
        self.publish(topics::AGENT_LIFECYCLE, &principal.to_string(), &notice);
    }

    fn publish<T: serde::Serialize>(&self, topic: &str, key: &str, payload: &T) {
        let Some(bus) = &self.bus else {
            return;
        };
        let envelope = BusEnvelope::new(
            Self::PRODUCER_ID,
            self.producer_seq.fetch_add(1, Ordering::Relaxed),
            key,
            self.clock.now_ms(),
            payload,
        );
        if let Err(e) = bus.publish(topic, &envelope) {
            warn!(topic, error = %e, "Change notice publish failed");
        }
    }
}
