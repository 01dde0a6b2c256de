//! # Ledger Integrity Verification
//!
//! Tamper-evidence check over sealed batches: recompute every event's
//! content hash from its row fields, rebuild each batch's Merkle root, and
//! verify the signed commitment. Replay runs this over the reconstructed
//! range before consumers restart; any failure halts the pipeline.

use crate::merkle::{batch_commitment, merkle_root};
use crate::writer::event_content_hash;
use std::collections::HashMap;
use thiserror::Error;
use tracing::error;
use warden_crypto::{CryptoError, PublicKey, Signature};
use warden_store::Store;
use warden_types::{EventId, Partition, StoreError};

/// Resolves a batch's `signing_key_id` to the public key to verify with.
pub trait SigningKeyResolver: Send + Sync {
    /// The public key for a key id, if known.
    fn resolve(&self, key_id: &str) -> Option<PublicKey>;
}

impl SigningKeyResolver for HashMap<String, PublicKey> {
    fn resolve(&self, key_id: &str) -> Option<PublicKey> {
        self.get(key_id).copied()
    }
}

/// Integrity verification failures. Any of these is grounds to halt.
#[derive(Debug, Error)]
pub enum IntegrityError {
    /// The store failed while reading the range.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// An event's recomputed hash differs from its stored hash.
    #[error("Event {event_id} in partition {partition} failed content hash check")]
    HashMismatch {
        partition: Partition,
        event_id: EventId,
    },

    /// A batch's recomputed Merkle root differs from the sealed root.
    #[error("Batch {batch_id} in partition {partition} failed root check")]
    RootMismatch { partition: Partition, batch_id: u64 },

    /// The signed commitment does not verify.
    #[error("Batch {batch_id} in partition {partition} has a bad root signature")]
    BadRootSignature { partition: Partition, batch_id: u64 },

    /// No public key is known for the batch's signing key id.
    #[error("Unknown signing key {key_id} for batch {batch_id}")]
    UnknownSigningKey { batch_id: u64, key_id: String },

    /// An event row could not be canonicalized.
    #[error(transparent)]
    Canonical(#[from] CryptoError),
}

/// Outcome of a successful verification pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct VerifyReport {
    /// Sealed batches checked.
    pub batches_verified: usize,
    /// Events checked inside those batches.
    pub events_verified: usize,
}

/// Verify every sealed batch in a partition.
pub fn verify_partition(
    store: &dyn Store,
    partition: Partition,
    keys: &dyn SigningKeyResolver,
) -> Result<VerifyReport, IntegrityError> {
    verify_batches_up_to(store, partition, EventId::MAX, keys)
}

/// Verify sealed batches whose range starts at or below `up_to`.
///
/// Used by replay, which only needs the reconstructed prefix proven before
/// consumers restart.
pub fn verify_batches_up_to(
    store: &dyn Store,
    partition: Partition,
    up_to: EventId,
    keys: &dyn SigningKeyResolver,
) -> Result<VerifyReport, IntegrityError> {
    let mut report = VerifyReport::default();

    for batch in store.batches(partition)? {
        if batch.first_event_id > up_to {
            break;
        }
        let events = store.events_in_range(partition, batch.first_event_id, batch.last_event_id)?;

        let mut leaves = Vec::with_capacity(events.len());
        for event in &events {
            let recomputed = event_content_hash(event)?;
            if recomputed != event.content_hash {
                error!(
                    partition,
                    event_id = event.id,
                    "Event content hash mismatch; ledger is tampered"
                );
                return Err(IntegrityError::HashMismatch {
                    partition,
                    event_id: event.id,
                });
            }
            leaves.push(event.content_hash);
        }

        if merkle_root(&leaves) != batch.root_hash {
            error!(partition, batch_id = batch.batch_id, "Merkle root mismatch");
            return Err(IntegrityError::RootMismatch {
                partition,
                batch_id: batch.batch_id,
            });
        }

        let key = keys
            .resolve(&batch.signing_key_id)
            .ok_or_else(|| IntegrityError::UnknownSigningKey {
                batch_id: batch.batch_id,
                key_id: batch.signing_key_id.clone(),
            })?;
        let commitment = batch_commitment(
            batch.batch_id,
            batch.first_event_id,
            batch.last_event_id,
            &batch.root_hash,
        );
        let signature = Signature::from(&batch.signature);
        if key.verify(&commitment, &signature).is_err() {
            error!(partition, batch_id = batch.batch_id, "Batch signature invalid");
            return Err(IntegrityError::BadRootSignature {
                partition,
                batch_id: batch.batch_id,
            });
        }

        report.batches_verified += 1;
        report.events_verified += events.len();
    }

    Ok(report)
}
