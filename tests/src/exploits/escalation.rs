//! # Privilege Escalation Attacks
//!
//! Adversaries who hold a narrow, legitimate grant and try to widen it:
//! broader delegation scope, longer validity, deeper chains, delegating
//! grants they do not hold, revoking grants they do not own, and riding a
//! stale policy after the ceiling was lowered.

#[cfg(test)]
mod tests {
    use crate::integration::fixtures::Harness;
    use uuid::Uuid;
    use warden_crypto::KeyRegistry;
    use warden_mandates::{mandate_signing_bytes, MandateError};
    use warden_store::{Store, WriteBatch, WriteOp};
    use warden_types::{ChangeNotice, DecisionReason};

    #[test]
    fn test_delegation_cannot_widen_scope() {
        let h = Harness::new();
        let p = h.principal();
        h.standard_policy(p);
        let root = h.issue(p, p);

        let mut params = h.issue_params(p, p);
        params.parent_id = Some(root.id);
        params.resources = vec!["api:anthropic:claude".parse().expect("pattern")];
        assert!(matches!(
            h.manager.issue(params),
            Err(MandateError::ScopeExceedsParent { .. })
        ));
    }

    #[test]
    fn test_delegation_cannot_extend_validity() {
        let h = Harness::new();
        let p = h.principal();
        h.standard_policy(p);
        let root = h.issue(p, p);

        let mut params = h.issue_params(p, p);
        params.parent_id = Some(root.id);
        params.not_after_ms = root.not_after_ms + 60_000;
        assert!(matches!(
            h.manager.issue(params),
            Err(MandateError::ValidityOutsideParent { .. })
        ));
    }

    #[test]
    fn test_delegation_chain_cannot_exceed_policy_depth() {
        let h = Harness::new();
        let p = h.principal();
        h.standard_policy(p); // max depth 3

        let mut parent = h.issue(p, p);
        for _ in 0..3 {
            h.clock.advance(1_500);
            parent = h.delegate(p, &parent);
        }
        h.clock.advance(1_500);
        let mut params = h.issue_params(p, p);
        params.parent_id = Some(parent.id);
        params.not_before_ms = parent.not_before_ms + 1_000;
        params.not_after_ms = parent.not_after_ms - 1_000;
        assert!(matches!(
            h.manager.issue(params),
            Err(MandateError::DepthExceeded { .. })
        ));
    }

    #[test]
    fn test_cannot_delegate_a_grant_one_does_not_hold() {
        let h = Harness::new();
        let alice = h.principal();
        let mallory = h.principal();
        h.standard_policy(alice);
        h.standard_policy(mallory);
        let alices_grant = h.issue(alice, alice);

        let mut params = h.issue_params(mallory, mallory);
        params.parent_id = Some(alices_grant.id);
        assert!(matches!(
            h.manager.issue(params),
            Err(MandateError::NotParentHolder { .. })
        ));
    }

    #[test]
    fn test_stranger_cannot_revoke() {
        let h = Harness::new();
        let alice = h.principal();
        let mallory = h.principal();
        h.standard_policy(alice);
        let grant = h.issue(alice, alice);

        assert!(matches!(
            h.manager.revoke(&mallory, &grant.id, "hostile", false),
            Err(MandateError::NotAuthorized { .. })
        ));
        assert!(!h.store.mandate(&grant.id).expect("mandate").is_revoked());
    }

    #[test]
    fn test_lowered_policy_ceiling_defeats_existing_grants() {
        let h = Harness::new();
        let p = h.principal();
        h.standard_policy(p);
        let grant = h.issue(p, p);
        assert!(h.evaluate(&grant, "call", "api:openai:gpt-4").allowed);

        // The operator narrows the ceiling; the old grant outlives it but
        // must stop authorizing.
        h.manager
            .set_policy(warden_mandates::PolicyDraft {
                principal_id: p,
                resources: vec!["api:internal:*".parse().expect("pattern")],
                actions: std::collections::BTreeSet::from(["call".to_string()]),
                max_validity_ms: 60 * 60 * 1000,
                max_delegation_depth: 3,
                delegation_permitted: true,
            })
            .expect("narrow policy");
        h.evaluator
            .apply_change(&ChangeNotice::PolicyActivated { principal_id: p });

        let decision = h.evaluate(&grant, "call", "api:openai:gpt-4");
        assert_eq!(decision.reason, DecisionReason::PolicyDenied);
    }

    #[test]
    fn test_validly_signed_but_widened_child_is_caught_by_chain_check() {
        let h = Harness::new();
        let p = h.principal();
        h.standard_policy(p);
        let root = h.issue(p, p);

        // An attacker with access to the issuer key signs a child whose
        // scope exceeds the parent and plants it directly, bypassing the
        // manager's subset validation. Every signature in the chain is
        // genuine; the evaluator's subset re-verification must still deny.
        let mut rogue = root.clone();
        rogue.id = Uuid::new_v4();
        rogue.parent_id = Some(root.id);
        rogue.depth = root.depth + 1;
        rogue.resources = vec!["api:*:*".parse().expect("pattern")];
        let payload = mandate_signing_bytes(&rogue).expect("canonical");
        rogue.signature = h.keys.sign_for(&p, &payload).expect("sign").into();
        h.store
            .commit(WriteBatch::new().with(WriteOp::InsertMandate(rogue.clone())))
            .expect("plant");

        let decision = h.evaluate(&rogue, "call", "api:anthropic:claude");
        assert!(!decision.allowed);
        assert_eq!(decision.reason, DecisionReason::OutOfScope);
    }
}
