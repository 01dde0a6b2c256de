//! # Replay Attacks
//!
//! At-least-once delivery means an attacker who can re-inject captured bus
//! traffic gets free redelivery. The `(principal, producer_seq)` uniqueness
//! constraint must collapse every replay into a no-op, even when the
//! replayed payload was altered.

#[cfg(test)]
mod tests {
    use crate::integration::fixtures::Harness;
    use warden_bus::topics;
    use warden_store::{Clock, Store};
    use warden_types::{BusEnvelope, MeteringRecord, PrincipalId};

    fn metering_envelope(
        h: &Harness,
        principal: PrincipalId,
        seq: u64,
        quantity: u64,
    ) -> BusEnvelope<MeteringRecord> {
        BusEnvelope::new(
            "proxy",
            seq,
            principal.to_string(),
            h.clock.now_ms(),
            MeteringRecord {
                principal_id: principal,
                mandate_id: None,
                action: "call".to_string(),
                resource: "api:openai:gpt-4".to_string(),
                resource_type: "api:openai:gpt-4".to_string(),
                quantity,
            },
        )
    }

    #[tokio::test]
    async fn test_replayed_metering_message_writes_a_single_row() {
        let h = Harness::new();
        let p = h.principal();
        let envelope = metering_envelope(&h, p, 1, 10);

        // The captured message is injected three times.
        for _ in 0..3 {
            h.bus
                .publish(topics::METERING_EVENTS, &envelope)
                .expect("publish");
        }
        h.drain_ledger_group().await;

        let partition = h.partition_for(&p);
        assert_eq!(h.store.last_event_id(partition).expect("last"), Some(1));
        // The spending total reflects exactly one charge.
        let totals = h.spending.total_spent(&p).expect("totals");
        assert_eq!(totals[&warden_types::Currency::USD], 30);
    }

    #[tokio::test]
    async fn test_altered_replay_with_stolen_sequence_is_ignored() {
        let h = Harness::new();
        let p = h.principal();

        h.bus
            .publish(topics::METERING_EVENTS, &metering_envelope(&h, p, 7, 10))
            .expect("publish");
        // Same sequence number, inflated quantity: the first write wins and
        // the forgery is a no-op.
        h.bus
            .publish(topics::METERING_EVENTS, &metering_envelope(&h, p, 7, 10_000))
            .expect("publish");
        h.drain_ledger_group().await;

        let partition = h.partition_for(&p);
        assert_eq!(h.store.last_event_id(partition).expect("last"), Some(1));
        let event = h.store.event(partition, 1).expect("event");
        assert_eq!(event.cost.expect("cost").minor_units, 30);
    }

    #[tokio::test]
    async fn test_cross_principal_sequences_do_not_collide() {
        let h = Harness::new();
        let alice = h.principal();
        let bob = h.principal();

        // Two principals legitimately reuse the same producer sequence;
        // dedupe is scoped per principal, so both rows land.
        h.bus
            .publish(topics::METERING_EVENTS, &metering_envelope(&h, alice, 1, 5))
            .expect("publish");
        h.bus
            .publish(topics::METERING_EVENTS, &metering_envelope(&h, bob, 1, 5))
            .expect("publish");
        h.drain_ledger_group().await;

        let total: u64 = (0..h.partitions)
            .map(|partition| {
                h.store
                    .last_event_id(partition)
                    .expect("last")
                    .unwrap_or(0)
            })
            .sum();
        assert_eq!(total, 2);
    }
}
