//! # End-to-End Scenarios
//!
//! The complete request path exercised across crates: issue → evaluate →
//! meter → ledger → Merkle seal, plus delegation/cascade, intent binding,
//! tamper detection, and consumer DLQ discipline.

#[cfg(test)]
mod tests {
    use crate::integration::fixtures::Harness;
    use async_trait::async_trait;
    use std::sync::Arc;
    use warden_bus::{topics, DeadLetter, StoredMessage};
    use warden_crypto::{canonical_json, sha256};
    use warden_ledger::{build_proof, verify_partition, verify_proof, IntegrityError};
    use warden_pipeline::{
        ConsumerConfig, ConsumerWorker, HandlerError, MessageHandler, ReplayStart,
    };
    use warden_store::{Clock, Store};
    use warden_types::{BusEnvelope, DecisionReason, EventType, Outcome};

    // =========================================================================
    // S1: ISSUE / EVALUATE / ALLOW
    // =========================================================================

    #[tokio::test]
    async fn test_s1_issue_evaluate_allow() {
        let h = Harness::new();
        let p = h.principal();
        h.standard_policy(p);
        let mandate = h.issue(p, p);

        let decision = h.evaluate(&mandate, "call", "api:openai:gpt-4");
        assert!(decision.allowed);
        assert_eq!(decision.reason, DecisionReason::Allow);

        // The decision reaches the ledger through the consumer pipeline.
        h.drain_ledger_group().await;
        let allows = h.events_of_type(&p, EventType::DecisionAllow);
        assert_eq!(allows.len(), 1);
        assert_eq!(allows[0].mandate_id, Some(mandate.id));
        assert_eq!(allows[0].outcome, Some(Outcome::Allow));
        assert_eq!(allows[0].action.as_deref(), Some("call"));
        assert_eq!(allows[0].resource.as_deref(), Some("api:openai:gpt-4"));
    }

    // =========================================================================
    // S2: OUT-OF-SCOPE DENY
    // =========================================================================

    #[tokio::test]
    async fn test_s2_out_of_scope_deny() {
        let h = Harness::new();
        let p = h.principal();
        h.standard_policy(p);
        let mandate = h.issue(p, p);

        let decision = h.evaluate(&mandate, "call", "api:anthropic:claude");
        assert!(!decision.allowed);
        assert_eq!(decision.reason, DecisionReason::OutOfScope);

        h.drain_ledger_group().await;
        let denies = h.events_of_type(&p, EventType::DecisionDeny);
        assert_eq!(denies.len(), 1);
        assert_eq!(denies[0].outcome, Some(Outcome::Deny));
        let metadata: serde_json::Value =
            serde_json::from_slice(&denies[0].metadata).expect("metadata json");
        assert_eq!(metadata["reason"], "OutOfScope");
    }

    // =========================================================================
    // S3: DELEGATION AND CASCADE REVOKE
    // =========================================================================

    #[tokio::test]
    async fn test_s3_delegation_and_cascade_revoke() {
        let h = Harness::new();
        let p = h.principal();
        h.standard_policy(p);

        let m1 = h.issue(p, p);
        let m2 = h.delegate(p, &m1);
        h.clock.advance(2_000); // inside m2's narrowed window

        assert!(h.evaluate(&m2, "call", "api:openai:gpt-4").allowed);

        let revoked = h
            .manager
            .revoke(&p, &m1.id, "key rotation", true)
            .expect("cascade revoke");
        assert_eq!(revoked.len(), 2);
        h.evaluator
            .apply_change(&warden_types::ChangeNotice::MandateRevoked { mandate_id: m1.id });

        let decision = h.evaluate(&m2, "call", "api:openai:gpt-4");
        assert_eq!(decision.reason, DecisionReason::Revoked);

        // Ledger holds a revoke event for each mandate in the subtree.
        let revokes = h.events_of_type(&p, EventType::Revoke);
        assert_eq!(revokes.len(), 2);
        let revoked_ids: Vec<_> = revokes.iter().filter_map(|e| e.mandate_id).collect();
        assert!(revoked_ids.contains(&m1.id));
        assert!(revoked_ids.contains(&m2.id));
    }

    // =========================================================================
    // S4: INTENT BINDING
    // =========================================================================

    #[tokio::test]
    async fn test_s4_intent_binding() {
        let h = Harness::new();
        let p = h.principal();
        h.standard_policy(p);

        let claim = serde_json::json!({"op": "transfer", "amount": 100});
        let intent_hash = sha256(&canonical_json(&claim).expect("canonical"));
        let mut params = h.issue_params(p, p);
        params.intent_hash = Some(intent_hash);
        let mandate = h.manager.issue(params).expect("issue");

        let mut matching = h.request(&mandate, "call", "api:openai:gpt-4");
        matching.intent_claim = Some(serde_json::json!({"amount": 100, "op": "transfer"}));
        assert!(h.evaluator.evaluate(&matching).allowed);

        let mut off_by_one = h.request(&mandate, "call", "api:openai:gpt-4");
        off_by_one.intent_claim = Some(serde_json::json!({"op": "transfer", "amount": 101}));
        let decision = h.evaluator.evaluate(&off_by_one);
        assert!(!decision.allowed);
        assert_eq!(decision.reason, DecisionReason::IntentMismatch);
    }

    // =========================================================================
    // S5: MERKLE INTEGRITY OVER 3000 EVENTS
    // =========================================================================

    #[tokio::test]
    async fn test_s5_merkle_integrity_at_scale() {
        let h = Harness::with_aggregator_config(warden_ledger::AggregatorConfig {
            size_threshold: 1024,
            time_threshold: std::time::Duration::from_secs(60),
            sign_retry_backoff: std::time::Duration::from_millis(10),
        });
        let p = h.principal();

        // 3000 metered events through the pipeline onto one partition.
        for _ in 0..3000 {
            h.publish_metering(p, None, 1);
        }
        h.drain_ledger_group().await;
        let partition = h.partition_for(&p);
        assert_eq!(h.store.last_event_id(partition).expect("last id"), Some(3000));

        h.seal_all();
        let batches = h.store.batches(partition).expect("batches");
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].first_event_id, 1);
        assert_eq!(batches[0].last_event_id, 1024);
        assert_eq!(batches[2].last_event_id, 3000);

        // Inclusion proof for event id 1500 (batch 2, index 475).
        let batch = &batches[1];
        let leaves = h.batch_leaves(partition, batch.batch_id);
        let index = (1500 - batch.first_event_id) as usize;
        let proof = build_proof(&leaves, index).expect("proof");
        let event = h.store.event(partition, 1500).expect("event 1500");
        assert!(verify_proof(&event.content_hash, &proof, &batch.root_hash));

        // Full-partition verification passes on the untouched ledger.
        verify_partition(h.store.as_ref(), partition, &h.verification_keys)
            .expect("clean verify");

        // Flip stored bytes of event 1500: proof machinery and the
        // integrity gate both notice, and replay halts.
        h.store
            .tamper_event_metadata(partition, 1500, b"tampered".to_vec())
            .expect("tamper");
        let tampered = h.store.event(partition, 1500).expect("event");
        let recomputed = warden_ledger::event_content_hash(&tampered).expect("hash");
        assert_ne!(recomputed, tampered.content_hash);

        let err = verify_partition(h.store.as_ref(), partition, &h.verification_keys)
            .expect_err("tamper detected");
        assert!(matches!(
            err,
            IntegrityError::HashMismatch { event_id: 1500, .. }
        ));

        let replay_err = h
            .replayer()
            .replay(partition, ReplayStart::Offset(0), &h.verification_keys)
            .await
            .expect_err("replay halts");
        assert!(matches!(
            replay_err,
            warden_pipeline::ReplayError::Integrity(_)
        ));
    }

    // =========================================================================
    // S6: CONSUMER DLQ
    // =========================================================================

    struct PoisonKeyHandler {
        poison_key: String,
    }

    #[async_trait]
    impl MessageHandler for PoisonKeyHandler {
        async fn handle(&self, message: &StoredMessage) -> Result<(), HandlerError> {
            if message.key == self.poison_key {
                return Err(HandlerError::new("cannot process this key"));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_s6_consumer_dead_letters_and_advances() {
        let h = Harness::new();
        let p = h.principal();
        let poisoned = h.principal();
        // Both principals may share a partition; the poisoned key alone
        // must be dead-lettered.
        h.publish_metering(poisoned, None, 1);
        h.publish_metering(p, None, 1);

        let handler = Arc::new(PoisonKeyHandler {
            poison_key: poisoned.to_string(),
        });
        let mut handled = 0;
        for partition in 0..h.partitions {
            let worker = ConsumerWorker::new(
                h.bus.clone(),
                "poison-test",
                topics::METERING_EVENTS,
                partition,
                handler.clone() as Arc<dyn MessageHandler>,
                ConsumerConfig::for_testing(),
                h.clock.clone() as Arc<dyn Clock>,
            );
            handled += worker.run_once().await;
            // The committed offset advanced past everything retained.
            if h.bus.log_len(topics::METERING_EVENTS, partition) > 0 {
                assert_eq!(
                    h.bus.committed("poison-test", topics::METERING_EVENTS, partition),
                    Some(h.bus.log_len(topics::METERING_EVENTS, partition))
                );
            }
        }
        assert_eq!(handled, 2);

        // Exactly one dead letter, fully annotated.
        let mut letters = Vec::new();
        for partition in 0..h.partitions {
            letters.extend(h.bus.read_from(topics::DLQ, partition, 0));
        }
        assert_eq!(letters.len(), 1);
        let env: BusEnvelope<DeadLetter> =
            serde_json::from_value(letters[0].payload.clone()).expect("dead letter");
        assert_eq!(env.payload.retry_count, 3);
        assert_eq!(env.payload.consumer_group, "poison-test");
        assert_eq!(env.payload.error, "cannot process this key");
        assert_eq!(env.payload.key, poisoned.to_string());
        assert_eq!(env.payload.original_topic, topics::METERING_EVENTS);
    }

    // =========================================================================
    // SPENDING READ PATH
    // =========================================================================

    #[tokio::test]
    async fn test_metering_feeds_spending_cache_and_history() {
        let h = Harness::new();
        let p = h.principal();

        for _ in 0..4 {
            h.publish_metering(p, None, 10);
        }
        h.drain_ledger_group().await;

        // Writer updated the cache best-effort: 4 * 10 * 3 minor units.
        let totals = h.spending.total_spent(&p).expect("cached totals");
        assert_eq!(totals[&warden_types::Currency::USD], 120);

        let now = h.clock.now_ms();
        let sums = h
            .spending
            .sum_spending(h.history.as_ref(), &p, now - 1_000, now + 1_000)
            .expect("sum");
        assert_eq!(sums[&warden_types::Currency::USD], 120);
    }

    #[tokio::test]
    async fn test_audit_group_consumes_decisions_independently() {
        let h = Harness::new();
        let p = h.principal();
        h.standard_policy(p);
        let mandate = h.issue(p, p);
        h.evaluate(&mandate, "call", "api:openai:gpt-4");

        // Both groups see the same message; offsets are independent.
        h.drain_ledger_group().await;
        let audited = h.drain_audit_group().await;
        assert_eq!(audited, 1);
    }

    // =========================================================================
    // REPLAY / RECOVERY
    // =========================================================================

    #[tokio::test]
    async fn test_replay_after_restart_matches_live_state() {
        let h = Harness::new();
        let p = h.principal();
        for _ in 0..6 {
            h.publish_metering(p, None, 2);
        }
        h.drain_ledger_group().await;
        h.seal_all();
        let partition = h.partition_for(&p);
        let live_roots: Vec<_> = h
            .store
            .batches(partition)
            .expect("batches")
            .iter()
            .map(|b| b.root_hash)
            .collect();

        // Recovery replays the retained bus log through the normal
        // handlers; duplicates collapse and the verification gate passes.
        let report = h
            .replayer()
            .replay(partition, ReplayStart::Offset(0), &h.verification_keys)
            .await
            .expect("replay");
        assert_eq!(report.verification.batches_verified, live_roots.len());

        let verify_roots: Vec<_> = h
            .store
            .batches(partition)
            .expect("batches")
            .iter()
            .map(|b| b.root_hash)
            .collect();
        assert_eq!(live_roots, verify_roots);

        let snapshot = h.replayer().take_snapshot(partition).expect("snapshot");
        assert_eq!(
            snapshot.as_of_event_id,
            h.store.last_event_id(partition).expect("last").unwrap_or(0)
        );
    }
}
