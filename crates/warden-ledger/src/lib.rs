//! # Warden Ledger
//!
//! The append-only audit ledger: durable event appends with dense monotonic
//! ids, batched Merkle aggregation, signed roots, and inclusion proofs.
//!
//! ## Write discipline
//!
//! One [`LedgerWriter`] per partition, protected by an advisory partition
//! lock held for the process lifetime. Appends are fail-loud: a failed
//! write propagates to the caller and is never swallowed. The spending
//! cache update after a successful append is the one best-effort step; a
//! cache failure is logged, not raised.
//!
//! ## Aggregation
//!
//! The writer feeds event hashes to one [`MerkleAggregator`] per partition.
//! Batches seal on a size threshold or a time threshold, whichever hits
//! first; sealing is idempotent and a signing failure leaves the batch open
//! for retry. Events are never lost to aggregator failures; they are
//! already on the ledger, and the aggregator re-pulls unbatched events on
//! restart.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod aggregator;
pub mod merkle;
pub mod ports;
pub mod router;
pub mod verify;
pub mod writer;

pub use aggregator::{AggregatorConfig, AggregatorError, MerkleAggregator};
pub use merkle::{
    batch_commitment, build_proof, merkle_root, verify_proof, Position, ProofNode,
};
pub use ports::{BatchSigner, KeypairBatchSigner, RecordError, SpendingRecorder};
pub use router::LedgerRouter;
pub use verify::{verify_batches_up_to, verify_partition, IntegrityError, SigningKeyResolver, VerifyReport};
pub use writer::{event_content_hash, LeafNotice, LedgerWriter, WriterError};
