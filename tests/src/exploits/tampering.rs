//! # Ledger Tampering Attacks
//!
//! Adversaries with storage access rewrite history: altered event rows,
//! batches sealed over forged roots, and commitments signed by a key the
//! verifier never trusted. Merkle verification must catch each case and
//! keep the pipeline halted.

#[cfg(test)]
mod tests {
    use crate::integration::fixtures::Harness;
    use warden_crypto::Keypair;
    use warden_ledger::{batch_commitment, merkle_root, verify_partition, IntegrityError};
    use warden_pipeline::{ReplayError, ReplayStart};
    use warden_store::{Clock, Store, WriteBatch, WriteOp};
    use warden_types::{MerkleBatch, Partition, SignatureBytes};

    async fn seeded(h: &Harness, events: u64) -> Partition {
        let p = h.principal();
        for _ in 0..events {
            h.publish_metering(p, None, 1);
        }
        h.drain_ledger_group().await;
        h.partition_for(&p)
    }

    #[tokio::test]
    async fn test_rewritten_event_row_is_detected() {
        let h = Harness::new();
        let partition = seeded(&h, 6).await;
        h.seal_all();

        h.store
            .tamper_event_metadata(partition, 3, b"laundered".to_vec())
            .expect("tamper");

        let err = verify_partition(h.store.as_ref(), partition, &h.verification_keys)
            .expect_err("tamper must be detected");
        assert!(matches!(
            err,
            IntegrityError::HashMismatch { event_id: 3, .. }
        ));

        // Recovery refuses to hand control back over a tampered ledger.
        let replay_err = h
            .replayer()
            .replay(partition, ReplayStart::Offset(0), &h.verification_keys)
            .await
            .expect_err("replay must halt");
        assert!(matches!(replay_err, ReplayError::Integrity(_)));
    }

    #[tokio::test]
    async fn test_batch_sealed_over_forged_root_is_detected() {
        let h = Harness::new();
        let partition = seeded(&h, 3).await;

        // A compromised aggregator seals a batch committing to a root that
        // does not match the events it claims to cover.
        let forged_root = [0xAA; 32];
        let batch_id = h.store.next_batch_id(partition).expect("batch id");
        let commitment = batch_commitment(batch_id, 1, 3, &forged_root);
        let rogue_signer = Keypair::generate();
        let batch = MerkleBatch {
            batch_id,
            partition,
            first_event_id: 1,
            last_event_id: 3,
            root_hash: forged_root,
            signing_key_id: "ledger-key-1".to_string(),
            signature: rogue_signer.sign(&commitment).into(),
            created_ms: h.clock.now_ms(),
        };
        h.store
            .commit(WriteBatch::new().with(WriteOp::SealBatch(batch)))
            .expect("seal forged batch");

        let err = verify_partition(h.store.as_ref(), partition, &h.verification_keys)
            .expect_err("forged root must be detected");
        assert!(matches!(err, IntegrityError::RootMismatch { .. }));
    }

    #[tokio::test]
    async fn test_correct_root_signed_by_untrusted_key_is_detected() {
        let h = Harness::new();
        let partition = seeded(&h, 3).await;

        // The root is honest, but the commitment is signed by an attacker
        // key masquerading under the trusted key id.
        let leaves: Vec<_> = h
            .store
            .events_in_range(partition, 1, 3)
            .expect("events")
            .iter()
            .map(|e| e.content_hash)
            .collect();
        let root = merkle_root(&leaves);
        let batch_id = h.store.next_batch_id(partition).expect("batch id");
        let commitment = batch_commitment(batch_id, 1, 3, &root);
        let rogue_signer = Keypair::generate();
        let batch = MerkleBatch {
            batch_id,
            partition,
            first_event_id: 1,
            last_event_id: 3,
            root_hash: root,
            signing_key_id: "ledger-key-1".to_string(),
            signature: rogue_signer.sign(&commitment).into(),
            created_ms: h.clock.now_ms(),
        };
        h.store
            .commit(WriteBatch::new().with(WriteOp::SealBatch(batch)))
            .expect("seal batch");

        let err = verify_partition(h.store.as_ref(), partition, &h.verification_keys)
            .expect_err("untrusted signature must be detected");
        assert!(matches!(err, IntegrityError::BadRootSignature { .. }));
    }

    #[tokio::test]
    async fn test_batch_under_unknown_key_id_is_detected() {
        let h = Harness::new();
        let partition = seeded(&h, 2).await;
        h.seal_all();

        // A verifier configured without the sealing key must refuse rather
        // than skip the batch.
        let no_keys: std::collections::HashMap<String, warden_crypto::PublicKey> =
            std::collections::HashMap::new();
        let err = verify_partition(h.store.as_ref(), partition, &no_keys)
            .expect_err("unknown key must halt verification");
        assert!(matches!(err, IntegrityError::UnknownSigningKey { .. }));
    }

    #[test]
    fn test_forged_signature_bytes_do_not_validate() {
        // A raw all-zero signature is structurally invalid on the curve.
        let key = Keypair::generate().public_key();
        let sig = warden_crypto::Signature::from(&SignatureBytes([0; 64]));
        assert!(key.verify(b"anything", &sig).is_err());
    }
}
