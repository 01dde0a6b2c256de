//! # Authority Evaluator
//!
//! Decides whether a mandate authorizes a concrete `(action, resource)`
//! request. Checks run in short-circuit order and every outcome, allow,
//! deny, or cancellation, is published for the audit trail.

use crate::cache::LruTtlCache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use warden_bus::{topics, InMemoryBus};
use warden_crypto::{canonical_json, sha256, PublicKey, Signature};
use warden_mandates::mandate_signing_bytes;
use warden_store::{Clock, Store};
use warden_types::{
    matches_any, AuthorityPolicy, BusEnvelope, ChangeNotice, Decision, DecisionNotice,
    DecisionReason, EvaluationRequest, Mandate, MandateId, PrincipalId, StoreError, TimestampMs,
};

/// Evaluator tuning.
#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    /// Bound on cached resolved chains.
    pub chain_cache_capacity: usize,
    /// Bound on cached active policies.
    pub policy_cache_capacity: usize,
    /// TTL for both caches.
    pub cache_ttl_ms: i64,
    /// Per-evaluation deadline; exhaustion denies with `Canceled`.
    pub deadline_ms: i64,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            chain_cache_capacity: 10_000,
            policy_cache_capacity: 10_000,
            cache_ttl_ms: 60_000,
            deadline_ms: 100,
        }
    }
}

impl EvaluatorConfig {
    /// Small caches for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            chain_cache_capacity: 16,
            policy_cache_capacity: 16,
            cache_ttl_ms: 60_000,
            deadline_ms: 10_000,
        }
    }
}

/// A mandate chain resolved leaf-first, with each link's issuer key.
struct ResolvedChain {
    mandates: Vec<Mandate>,
    issuer_keys: Vec<PublicKey>,
}

/// Short-circuit result carrying the deny reason and, when known, the
/// principal for the audit record.
struct Stop {
    reason: DecisionReason,
    principal: Option<PrincipalId>,
}

impl Stop {
    fn new(reason: DecisionReason) -> Self {
        Self {
            reason,
            principal: None,
        }
    }

    fn with_principal(reason: DecisionReason, principal: PrincipalId) -> Self {
        Self {
            reason,
            principal: Some(principal),
        }
    }
}

/// The hot-path decision engine.
pub struct Evaluator {
    store: Arc<dyn Store>,
    bus: Option<Arc<InMemoryBus>>,
    clock: Arc<dyn Clock>,
    config: EvaluatorConfig,
    chain_cache: LruTtlCache<MandateId, Arc<ResolvedChain>>,
    policy_cache: LruTtlCache<PrincipalId, Arc<AuthorityPolicy>>,
    producer_seq: AtomicU64,
}

impl Evaluator {
    /// Producer id stamped on decision envelopes.
    pub const PRODUCER_ID: &'static str = "evaluator";

    /// Create an evaluator.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, config: EvaluatorConfig) -> Self {
        let chain_cache = LruTtlCache::new(config.chain_cache_capacity, config.cache_ttl_ms);
        let policy_cache = LruTtlCache::new(config.policy_cache_capacity, config.cache_ttl_ms);
        Self {
            store,
            bus: None,
            clock,
            config,
            chain_cache,
            policy_cache,
            producer_seq: AtomicU64::new(0),
        }
    }

    /// Attach the bus so decisions reach the audit pipeline.
    #[must_use]
    pub fn with_bus(mut self, bus: Arc<InMemoryBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Evaluate one request. Never fails: every fault folds into a deny.
    pub fn evaluate(&self, request: &EvaluationRequest) -> Decision {
        let started = self.clock.now_ms();
        let deadline = started + self.config.deadline_ms;

        let (reason, principal) = match self.eval_inner(request, started, deadline) {
            Ok(principal) => (DecisionReason::Allow, Some(principal)),
            Err(stop) => (stop.reason, stop.principal),
        };

        let now = self.clock.now_ms();
        let decision = Decision::from_reason(
            reason,
            request.mandate_id,
            now,
            now.saturating_sub(started).max(0) as u64,
            request.correlation_id.clone(),
        );
        debug!(
            mandate = %request.mandate_id,
            action = %request.requested_action,
            resource = %request.requested_resource,
            allowed = decision.allowed,
            reason = ?decision.reason,
            latency_ms = decision.latency_ms,
            "Evaluated"
        );
        self.publish_decision(request, &decision, principal);
        decision
    }

    fn eval_inner(
        &self,
        request: &EvaluationRequest,
        now: TimestampMs,
        deadline: TimestampMs,
    ) -> Result<PrincipalId, Stop> {
        self.check_deadline(deadline, None)?;

        // 1. Resolve the chain, leaf to root.
        let chain = self.resolve_chain(&request.mandate_id)?;
        let principal = chain.mandates[0].subject;
        let stop =
            |reason: DecisionReason| Stop::with_principal(reason, principal);

        // 2. Every signature in the chain verifies under its issuer's key.
        for (mandate, key) in chain.mandates.iter().zip(&chain.issuer_keys) {
            let payload = mandate_signing_bytes(mandate)
                .map_err(|_| stop(DecisionReason::InternalError))?;
            let signature = Signature::from(&mandate.signature);
            if key.verify(&payload, &signature).is_err() {
                warn!(mandate = %mandate.id, "Mandate signature failed verification");
                return Err(stop(DecisionReason::BadSignature));
            }
        }
        self.check_deadline(deadline, Some(principal))?;

        // 3. Revocation anywhere in the chain.
        if chain.mandates.iter().any(Mandate::is_revoked) {
            return Err(stop(DecisionReason::Revoked));
        }

        // 4. Validity window over the whole chain.
        for mandate in &chain.mandates {
            if mandate.is_expired(now) {
                return Err(stop(DecisionReason::Expired));
            }
            if mandate.is_not_yet_valid(now) {
                return Err(stop(DecisionReason::NotYetValid));
            }
        }

        // 5. Leaf scope covers the request.
        let leaf = &chain.mandates[0];
        if !leaf.actions.contains(&request.requested_action)
            || !matches_any(&leaf.resources, &request.requested_resource)
        {
            return Err(stop(DecisionReason::OutOfScope));
        }

        // 6. Subset-through-chain, re-verified as defense in depth.
        for pair in chain.mandates.windows(2) {
            let (child, parent) = (&pair[0], &pair[1]);
            if !parent.scope_contains(child) {
                return Err(stop(DecisionReason::OutOfScope));
            }
            if !parent.validity_contains(child) || child.depth != parent.depth + 1 {
                // Issue-time invariants broken: the chain is corrupt.
                return Err(stop(DecisionReason::InternalError));
            }
        }
        self.check_deadline(deadline, Some(principal))?;

        // 7. Intent binding.
        if let Some(expected) = leaf.intent_hash {
            let Some(claim) = &request.intent_claim else {
                return Err(stop(DecisionReason::IntentMismatch));
            };
            let bytes =
                canonical_json(claim).map_err(|_| stop(DecisionReason::IntentMismatch))?;
            if sha256(&bytes) != expected {
                return Err(stop(DecisionReason::IntentMismatch));
            }
        }

        // 8. The root issuer's current policy must still permit the leaf
        //    scope; a policy change revokes without touching mandates.
        let root = chain.mandates.last().unwrap_or(leaf);
        let policy = self.resolve_policy(&root.issuer, principal)?;
        if !policy.permits_scope(&leaf.resources, &leaf.actions) {
            return Err(stop(DecisionReason::PolicyDenied));
        }

        Ok(principal)
    }

    fn check_deadline(
        &self,
        deadline: TimestampMs,
        principal: Option<PrincipalId>,
    ) -> Result<(), Stop> {
        if self.clock.now_ms() >= deadline {
            return Err(Stop {
                reason: DecisionReason::Canceled,
                principal,
            });
        }
        Ok(())
    }

    /// Read-through chain resolution. A hit returns the cached chain; the
    /// time and revocation checks still run against `now` on every
    /// evaluation.
    fn resolve_chain(&self, mandate_id: &MandateId) -> Result<Arc<ResolvedChain>, Stop> {
        let now = self.clock.now_ms();
        if let Some(chain) = self.chain_cache.get(mandate_id, now) {
            return Ok(chain);
        }

        let mandates = match self.store.mandate_chain(mandate_id) {
            Ok(chain) => chain,
            Err(StoreError::NotFound { .. }) => {
                return Err(Stop::new(DecisionReason::UnknownMandate))
            }
            Err(e) => {
                warn!(mandate = %mandate_id, error = %e, "Chain resolution failed");
                return Err(Stop::new(DecisionReason::InternalError));
            }
        };
        let principal = mandates[0].subject;

        let mut issuer_keys = Vec::with_capacity(mandates.len());
        for mandate in &mandates {
            let issuer = self.store.principal(&mandate.issuer).map_err(|e| {
                warn!(mandate = %mandate.id, error = %e, "Issuer lookup failed");
                Stop::with_principal(DecisionReason::InternalError, principal)
            })?;
            let key = PublicKey::try_from(&issuer.public_key).map_err(|_| {
                warn!(issuer = %issuer.id, "Issuer public key undecodable");
                Stop::with_principal(DecisionReason::BadSignature, principal)
            })?;
            issuer_keys.push(key);
        }

        let resolved = Arc::new(ResolvedChain {
            mandates,
            issuer_keys,
        });
        self.chain_cache
            .insert(*mandate_id, Arc::clone(&resolved), now);
        Ok(resolved)
    }

    fn resolve_policy(
        &self,
        issuer: &PrincipalId,
        principal: PrincipalId,
    ) -> Result<Arc<AuthorityPolicy>, Stop> {
        let now = self.clock.now_ms();
        if let Some(policy) = self.policy_cache.get(issuer, now) {
            return Ok(policy);
        }
        let policy = match self.store.active_policy(issuer) {
            Ok(p) => Arc::new(p),
            Err(StoreError::NotFound { .. }) => {
                return Err(Stop::with_principal(DecisionReason::PolicyDenied, principal))
            }
            Err(e) => {
                warn!(issuer = %issuer, error = %e, "Policy lookup failed");
                return Err(Stop::with_principal(
                    DecisionReason::InternalError,
                    principal,
                ));
            }
        };
        self.policy_cache.insert(*issuer, Arc::clone(&policy), now);
        Ok(policy)
    }

    /// Apply a change notice from the `policy.changes` topic.
    ///
    /// Revocations clear the whole chain cache: a revoked ancestor
    /// invalidates every descendant chain, and those are not addressable
    /// by the revoked id alone. Revocations are rare; correctness wins.
    pub fn apply_change(&self, notice: &ChangeNotice) {
        match notice {
            ChangeNotice::MandateRevoked { mandate_id } => {
                debug!(mandate = %mandate_id, "Clearing chain cache on revocation");
                self.chain_cache.clear();
            }
            ChangeNotice::PolicyActivated { principal_id } => {
                self.policy_cache.invalidate(principal_id);
            }
        }
    }

    fn publish_decision(
        &self,
        request: &EvaluationRequest,
        decision: &Decision,
        principal: Option<PrincipalId>,
    ) {
        let Some(bus) = &self.bus else {
            return;
        };
        let principal_id = principal.unwrap_or_else(uuid::Uuid::nil);
        let notice = DecisionNotice {
            principal_id,
            requested_action: request.requested_action.clone(),
            requested_resource: request.requested_resource.clone(),
            decision: decision.clone(),
        };
        let mut envelope = BusEnvelope::new(
            Self::PRODUCER_ID,
            self.producer_seq.fetch_add(1, Ordering::Relaxed),
            principal_id.to_string(),
            self.clock.now_ms(),
            &notice,
        );
        envelope.correlation_id = decision.correlation_id.clone();
        if let Err(e) = bus.publish(topics::POLICY_DECISIONS, &envelope) {
            // The caller still gets the decision; the audit row arrives
            // when the pipeline replays the gap.
            warn!(error = %e, "Decision publish failed");
        }
    }
}
