//! # Forged Mandate Attacks
//!
//! An attacker with write access to the store (or a compromised manager)
//! plants mandates that were never legitimately signed: widened scopes
//! under an old signature, transplanted signatures, fabricated issuers.
//! The evaluator's chain signature check is the last line of defense and
//! must deny every one of them.

#[cfg(test)]
mod tests {
    use crate::integration::fixtures::Harness;
    use std::collections::BTreeSet;
    use uuid::Uuid;
    use warden_store::{Clock, Store, WriteBatch, WriteOp};
    use warden_types::{DecisionReason, Mandate, RevocationState, SignatureBytes};

    /// Plant a hand-built mandate row, bypassing the manager.
    fn plant(h: &Harness, mandate: &Mandate) {
        h.store
            .commit(WriteBatch::new().with(WriteOp::InsertMandate(mandate.clone())))
            .expect("plant mandate");
    }

    #[test]
    fn test_widened_scope_under_original_signature_is_denied() {
        let h = Harness::new();
        let p = h.principal();
        h.standard_policy(p);
        let legitimate = h.issue(p, p);

        // Keep the valid signature, widen the resource scope.
        let mut forged = legitimate.clone();
        forged.id = Uuid::new_v4();
        forged.resources = vec!["**".parse().expect("pattern")];
        plant(&h, &forged);

        let decision = h.evaluate(&forged, "call", "db:prod:users");
        assert!(!decision.allowed);
        assert_eq!(decision.reason, DecisionReason::BadSignature);
    }

    #[test]
    fn test_transplanted_signature_is_denied() {
        let h = Harness::new();
        let alice = h.principal();
        let mallory = h.principal();
        h.standard_policy(alice);
        let donor = h.issue(alice, alice);

        // Mallory grafts Alice's signature onto a grant naming herself.
        let mut forged = donor.clone();
        forged.id = Uuid::new_v4();
        forged.subject = mallory;
        plant(&h, &forged);

        let decision = h.evaluate(&forged, "call", "api:openai:gpt-4");
        assert_eq!(decision.reason, DecisionReason::BadSignature);
    }

    #[test]
    fn test_unsigned_mandate_is_denied() {
        let h = Harness::new();
        let p = h.principal();
        h.standard_policy(p);
        let now = h.clock.now_ms();

        let forged = Mandate {
            id: Uuid::new_v4(),
            issuer: p,
            subject: p,
            resources: vec!["api:openai:gpt-4".parse().expect("pattern")],
            actions: BTreeSet::from(["call".to_string()]),
            not_before_ms: now,
            not_after_ms: now + 600_000,
            parent_id: None,
            depth: 0,
            intent_hash: None,
            signature: SignatureBytes([0; 64]),
            created_ms: now,
            revocation: RevocationState::Active,
        };
        plant(&h, &forged);

        let decision = h.evaluate(&forged, "call", "api:openai:gpt-4");
        assert_eq!(decision.reason, DecisionReason::BadSignature);
    }

    #[test]
    fn test_issuer_substitution_is_denied() {
        let h = Harness::new();
        let victim = h.principal();
        let mallory = h.principal();
        h.standard_policy(victim);
        h.standard_policy(mallory);

        // Mallory signs with her own key but claims the victim issued it,
        // hoping to inherit the victim's policy ceiling.
        let legitimate = h.issue(mallory, mallory);
        let mut forged = legitimate.clone();
        forged.id = Uuid::new_v4();
        forged.issuer = victim;
        plant(&h, &forged);

        let decision = h.evaluate(&forged, "call", "api:openai:gpt-4");
        assert_eq!(decision.reason, DecisionReason::BadSignature);
    }
}
