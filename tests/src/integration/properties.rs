//! # Cross-Crate Properties
//!
//! The system invariants checked against the real component graph:
//! delegation chains are always subsets, allowed evaluations stay allowed
//! while nothing changes, cascades leave no live descendant, canonical
//! bytes are stable, and the ledger stays dense.

#[cfg(test)]
mod tests {
    use crate::integration::fixtures::{Harness, START_MS};
    use proptest::prelude::*;
    use std::collections::BTreeSet;
    use warden_crypto::canonical_json;
    use warden_ledger::{build_proof, merkle_root, verify_proof};
    use warden_mandates::mandate_signing_bytes;
    use warden_store::{Clock, Store};
    use warden_types::{DecisionReason, EventBody, EventType, ResourcePattern};

    // =========================================================================
    // CHAIN SUBSET INVARIANT
    // =========================================================================

    #[test]
    fn test_delegation_chains_always_satisfy_subset_invariants() {
        let h = Harness::new();
        let p = h.principal();
        h.standard_policy(p);

        let root = h.issue(p, p);
        let child = h.delegate(p, &root);
        // The child's window opens 1 s after the root's; step inside it
        // before delegating again.
        h.clock.advance(1_500);
        let grandchild = h.delegate(p, &child);

        let chain = h.store.mandate_chain(&grandchild.id).expect("chain");
        assert_eq!(chain.len(), 3);
        for pair in chain.windows(2) {
            let (lower, upper) = (&pair[0], &pair[1]);
            assert!(upper.scope_contains(lower));
            assert!(upper.validity_contains(lower));
            assert_eq!(lower.depth, upper.depth + 1);
        }
    }

    // =========================================================================
    // EVALUATOR MONOTONICITY
    // =========================================================================

    #[test]
    fn test_allow_is_stable_while_nothing_changes() {
        let h = Harness::new();
        let p = h.principal();
        h.standard_policy(p);
        let mandate = h.issue(p, p);

        assert!(h.evaluate(&mandate, "call", "api:openai:gpt-4").allowed);

        // Any instant inside the window, same mandate, same policy: the
        // decision must not flip.
        for offset in [1_000, 60_000, 240_000, 599_000] {
            h.clock.set(START_MS + offset);
            let decision = h.evaluate(&mandate, "call", "api:openai:gpt-4");
            assert!(
                decision.allowed,
                "flipped at offset {offset} ms: {:?}",
                decision.reason
            );
        }
    }

    // =========================================================================
    // CASCADE COMPLETENESS
    // =========================================================================

    #[test]
    fn test_cascade_leaves_no_live_descendant() {
        let h = Harness::new();
        let p = h.principal();
        h.standard_policy(p);

        // A small tree: root -> {a, b}, a -> a1.
        let root = h.issue(p, p);
        let a = h.delegate(p, &root);
        let b = h.delegate(p, &root);
        h.clock.advance(1_500);
        let a1 = h.delegate(p, &a);
        h.clock.advance(1_500);

        h.manager
            .revoke(&p, &root.id, "compromised", true)
            .expect("cascade");
        h.evaluator
            .apply_change(&warden_types::ChangeNotice::MandateRevoked {
                mandate_id: root.id,
            });

        for descendant in [&root, &a, &b, &a1] {
            let decision = h.evaluate(descendant, "call", "api:openai:gpt-4");
            assert_eq!(
                decision.reason,
                DecisionReason::Revoked,
                "descendant {} still live",
                descendant.id
            );
        }
    }

    // =========================================================================
    // LEDGER DENSITY
    // =========================================================================

    #[test]
    fn test_ledger_ids_stay_dense_per_partition() {
        let h = Harness::new();
        let p = h.principal();
        h.standard_policy(p);

        // Mixed traffic: issuance, revocations, decisions.
        let m1 = h.issue(p, p);
        let m2 = h.issue(p, p);
        h.manager.revoke(&p, &m2.id, "unused", false).expect("revoke");

        let partition = h.partition_for(&p);
        let last = h
            .store
            .last_event_id(partition)
            .expect("last")
            .expect("events exist");
        let events = h
            .store
            .events_in_range(partition, 1, last)
            .expect("range");
        for (i, event) in events.iter().enumerate() {
            assert_eq!(event.id, i as u64 + 1);
        }
        assert!(events.iter().any(|e| e.mandate_id == Some(m1.id)));
    }

    #[test]
    fn test_direct_gap_insertion_is_rejected() {
        let h = Harness::new();
        let p = h.principal();
        let partition = h.partition_for(&p);

        let writer_event = warden_types::LedgerEvent::from_body(
            5, // partition is empty; the only legal id is 1
            partition,
            EventBody::new(p, EventType::Metering, h.clock.now_ms()),
            [0; 32],
        );
        let result = h.store.commit(
            warden_store::WriteBatch::new()
                .with(warden_store::WriteOp::AppendEvent(writer_event)),
        );
        assert!(result.is_err());
    }

    // =========================================================================
    // CANONICAL STABILITY
    // =========================================================================

    #[test]
    fn test_same_mandate_scope_in_any_order_signs_identically() {
        let h = Harness::new();
        let p = h.principal();
        h.standard_policy(p);
        let mandate = h.issue(p, p);

        let mut shuffled = mandate.clone();
        shuffled.resources.reverse();
        assert_eq!(
            mandate_signing_bytes(&mandate).expect("canonical"),
            mandate_signing_bytes(&shuffled).expect("canonical")
        );
    }

    proptest! {
        /// Key order never changes canonical bytes.
        #[test]
        fn test_canonical_bytes_ignore_key_order(
            a in -1_000_000i64..1_000_000,
            b in "[a-z]{1,12}",
            c in proptest::bool::ANY,
        ) {
            let forward = serde_json::json!({"alpha": a, "beta": b, "gamma": c});
            let backward: serde_json::Value = serde_json::from_str(&format!(
                r#"{{"gamma":{},"beta":{:?},"alpha":{}}}"#,
                c, b, a
            )).expect("json");
            prop_assert_eq!(
                canonical_json(&forward).expect("canonical"),
                canonical_json(&backward).expect("canonical")
            );
        }

        /// Merkle round-trip holds for arbitrary leaf sets, and bit flips
        /// break verification.
        #[test]
        fn test_merkle_round_trip_and_tamper(
            count in 1usize..200,
            tamper_index in 0usize..200,
            flip_bit in 0u8..8,
        ) {
            let leaves: Vec<[u8; 32]> = (0..count)
                .map(|i| warden_crypto::sha256(&(i as u64).to_be_bytes()))
                .collect();
            let root = merkle_root(&leaves);

            let index = tamper_index % count;
            let proof = build_proof(&leaves, index).expect("proof");
            prop_assert!(verify_proof(&leaves[index], &proof, &root));

            let mut flipped = leaves[index];
            flipped[0] ^= 1 << flip_bit;
            prop_assert!(!verify_proof(&flipped, &proof, &root));
        }

        /// Scope subsets accepted at delegation time are honored by the
        /// matcher: anything the child pattern matches, the parent
        /// pattern matches too.
        #[test]
        fn test_accepted_subset_implies_match_containment(
            provider in "[a-z]{2,6}",
            product in "[a-z]{2,6}",
            resource in "[a-z0-9-]{1,8}",
        ) {
            let urn = format!("{provider}:{product}:{resource}");
            let child: ResourcePattern = urn.parse().expect("child");
            let parents = [
                format!("{provider}:{product}:*"),
                format!("{provider}:*:*"),
                format!("{provider}:**"),
                "**".to_string(),
            ];
            for raw in parents {
                let parent: ResourcePattern = raw.parse().expect("parent");
                prop_assert!(parent.covers(&child), "{raw} does not cover {urn}");
                prop_assert!(parent.matches(&urn));
            }
        }
    }

    // =========================================================================
    // REPLAY DETERMINISM
    // =========================================================================

    #[tokio::test]
    async fn test_replay_twice_yields_identical_derived_state() {
        let h = Harness::new();
        let p = h.principal();
        for _ in 0..5 {
            h.publish_metering(p, None, 4);
        }
        let partition = h.partition_for(&p);
        let replayer = h.replayer();

        replayer
            .replay(partition, warden_pipeline::ReplayStart::Offset(0), &h.verification_keys)
            .await
            .expect("first replay");
        h.seal_all();
        let first_roots: Vec<_> = h
            .store
            .batches(partition)
            .expect("batches")
            .iter()
            .map(|b| b.root_hash)
            .collect();
        let first_total = h
            .spending
            .sum_spending(h.history.as_ref(), &p, 0, h.clock.now_ms())
            .expect("sum");

        replayer
            .replay(partition, warden_pipeline::ReplayStart::Offset(0), &h.verification_keys)
            .await
            .expect("second replay");
        let second_roots: Vec<_> = h
            .store
            .batches(partition)
            .expect("batches")
            .iter()
            .map(|b| b.root_hash)
            .collect();
        let second_total = h
            .spending
            .sum_spending(h.history.as_ref(), &p, 0, h.clock.now_ms())
            .expect("sum");

        assert_eq!(first_roots, second_roots);
        assert_eq!(first_total, second_total);
        let ids = BTreeSet::from_iter(
            h.store
                .events_in_range(partition, 1, 5)
                .expect("events")
                .iter()
                .map(|e| e.id),
        );
        assert_eq!(ids.len(), 5);
    }
}
