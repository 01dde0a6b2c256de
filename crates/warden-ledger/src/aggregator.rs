//! # Merkle Aggregator
//!
//! One aggregator per partition consumes leaf notices from the writer and
//! seals batches when either threshold is hit:
//!
//! - `size_threshold` (default 1024 events), or
//! - `time_threshold` (default 60 s since the oldest unsealed leaf).
//!
//! Sealing happens outside the queue lock. A signing failure leaves the
//! leaves queued and is retried with backoff; the events themselves are
//! already durable on the ledger, so nothing is lost. Sealing an already
//! sealed batch is a no-op at the store layer.

use crate::merkle::{batch_commitment, merkle_root};
use crate::ports::BatchSigner;
use crate::writer::LeafNotice;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use warden_crypto::CryptoError;
use warden_store::{Clock, Store, WriteBatch, WriteOp};
use warden_types::{EventId, MerkleBatch, Partition, StoreError, TimestampMs};

/// Aggregator tuning.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Seal when this many leaves are pending.
    pub size_threshold: usize,
    /// Seal when the oldest pending leaf is this old.
    pub time_threshold: Duration,
    /// Pause after a signing failure before the next attempt.
    pub sign_retry_backoff: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            size_threshold: 1024,
            time_threshold: Duration::from_secs(60),
            sign_retry_backoff: Duration::from_millis(500),
        }
    }
}

impl AggregatorConfig {
    /// Small thresholds for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            size_threshold: 4,
            time_threshold: Duration::from_millis(50),
            sign_retry_backoff: Duration::from_millis(10),
        }
    }
}

/// Errors from batch sealing.
#[derive(Debug, Error)]
pub enum AggregatorError {
    /// The store rejected the seal.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The signer failed; the batch stays open.
    #[error("Batch signing failed: {0}")]
    Signing(CryptoError),

    /// The queued leaves are not a dense id range even after re-reading
    /// the ledger.
    #[error("Non-contiguous leaves in partition {partition}: expected {expected}, found {found}")]
    NonContiguous {
        partition: Partition,
        expected: EventId,
        found: EventId,
    },
}

struct Unsealed {
    leaves: Vec<LeafNotice>,
    /// When the oldest currently queued leaf arrived.
    opened_at_ms: Option<TimestampMs>,
}

/// Per-partition Merkle batch aggregator.
pub struct MerkleAggregator {
    store: Arc<dyn Store>,
    partition: Partition,
    signer: Arc<dyn BatchSigner>,
    clock: Arc<dyn Clock>,
    config: AggregatorConfig,
    unsealed: Mutex<Unsealed>,
}

impl MerkleAggregator {
    /// Create an aggregator for one partition.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        partition: Partition,
        signer: Arc<dyn BatchSigner>,
        clock: Arc<dyn Clock>,
        config: AggregatorConfig,
    ) -> Self {
        Self {
            store,
            partition,
            signer,
            clock,
            config,
            unsealed: Mutex::new(Unsealed {
                leaves: Vec::new(),
                opened_at_ms: None,
            }),
        }
    }

    /// Rebuild the unsealed queue from the ledger's unbatched events. Run
    /// at startup and after any gap is detected; this is the crash-recovery
    /// high-water mark.
    pub fn catch_up(&self) -> Result<usize, AggregatorError> {
        let events = self.store.unbatched_events(self.partition)?;
        let mut unsealed = self.unsealed.lock();
        unsealed.leaves = events
            .iter()
            .map(|e| LeafNotice {
                event_id: e.id,
                content_hash: e.content_hash,
            })
            .collect();
        unsealed.opened_at_ms = if unsealed.leaves.is_empty() {
            None
        } else {
            Some(self.clock.now_ms())
        };
        let count = unsealed.leaves.len();
        if count > 0 {
            info!(partition = self.partition, count, "Aggregator caught up unbatched events");
        }
        Ok(count)
    }

    /// Queue a freshly appended leaf.
    pub fn offer(&self, notice: LeafNotice) {
        let mut unsealed = self.unsealed.lock();
        if unsealed.leaves.is_empty() {
            unsealed.opened_at_ms = Some(self.clock.now_ms());
        }
        unsealed.leaves.push(notice);
    }

    /// Number of leaves waiting to be sealed.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.unsealed.lock().leaves.len()
    }

    /// Whether either sealing threshold is currently met.
    #[must_use]
    pub fn due(&self) -> bool {
        let unsealed = self.unsealed.lock();
        if unsealed.leaves.len() >= self.config.size_threshold {
            return true;
        }
        match unsealed.opened_at_ms {
            Some(opened) if !unsealed.leaves.is_empty() => {
                let age = self.clock.now_ms().saturating_sub(opened);
                age >= self.config.time_threshold.as_millis() as i64
            }
            _ => false,
        }
    }

    /// Seal one batch of up to `size_threshold` leaves, if any are queued.
    ///
    /// On failure the drained leaves are requeued at the front, so no leaf
    /// is dropped and the next attempt sees the same batch.
    pub fn seal_next(&self) -> Result<Option<MerkleBatch>, AggregatorError> {
        let chunk: Vec<LeafNotice> = {
            let mut unsealed = self.unsealed.lock();
            if unsealed.leaves.is_empty() {
                return Ok(None);
            }
            let take = unsealed.leaves.len().min(self.config.size_threshold);
            let rest = unsealed.leaves.split_off(take);
            let chunk = std::mem::replace(&mut unsealed.leaves, rest);
            unsealed.opened_at_ms = if unsealed.leaves.is_empty() {
                None
            } else {
                Some(self.clock.now_ms())
            };
            chunk
        };

        match self.seal_chunk(&chunk) {
            Ok(batch) => Ok(Some(batch)),
            Err(e) => {
                let mut unsealed = self.unsealed.lock();
                let mut restored = chunk;
                restored.append(&mut unsealed.leaves);
                unsealed.leaves = restored;
                unsealed.opened_at_ms = Some(self.clock.now_ms());
                Err(e)
            }
        }
    }

    /// Seal everything queued, in threshold-sized batches. Used at
    /// shutdown and by replay verification setup.
    pub fn seal_all(&self) -> Result<Vec<MerkleBatch>, AggregatorError> {
        let mut sealed = Vec::new();
        while let Some(batch) = self.seal_next()? {
            sealed.push(batch);
        }
        Ok(sealed)
    }

    fn seal_chunk(&self, chunk: &[LeafNotice]) -> Result<MerkleBatch, AggregatorError> {
        // The chunk must be a dense id range; a gap means the writer feed
        // and the ledger diverged (e.g. missed notices across a restart).
        let first = chunk[0].event_id;
        for (i, leaf) in chunk.iter().enumerate() {
            let expected = first + i as EventId;
            if leaf.event_id != expected {
                return Err(AggregatorError::NonContiguous {
                    partition: self.partition,
                    expected,
                    found: leaf.event_id,
                });
            }
        }
        let last = chunk[chunk.len() - 1].event_id;

        let hashes: Vec<_> = chunk.iter().map(|l| l.content_hash).collect();
        let root = merkle_root(&hashes);
        let batch_id = self.store.next_batch_id(self.partition)?;
        let commitment = batch_commitment(batch_id, first, last, &root);
        let signature = self
            .signer
            .sign(&commitment)
            .map_err(AggregatorError::Signing)?;

        let batch = MerkleBatch {
            batch_id,
            partition: self.partition,
            first_event_id: first,
            last_event_id: last,
            root_hash: root,
            signing_key_id: self.signer.key_id().to_string(),
            signature: signature.into(),
            created_ms: self.clock.now_ms(),
        };
        self.store
            .commit(WriteBatch::new().with(WriteOp::SealBatch(batch.clone())))?;
        debug!(
            partition = self.partition,
            batch_id, first, last, "Merkle batch sealed"
        );
        Ok(batch)
    }

    /// Drive the aggregator: consume leaf notices, seal on thresholds,
    /// flush at shutdown.
    pub async fn run(
        self: Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<LeafNotice>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        if let Err(e) = self.catch_up() {
            error!(partition = self.partition, error = %e, "Aggregator catch-up failed");
        }

        let tick_period = self.config.time_threshold.min(Duration::from_secs(1)).max(Duration::from_millis(10));
        let mut tick = tokio::time::interval(tick_period);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(notice) => {
                        self.offer(notice);
                        if self.pending() >= self.config.size_threshold {
                            self.try_seal().await;
                        }
                    }
                    None => break,
                },
                _ = tick.tick() => {
                    if self.due() {
                        self.try_seal().await;
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        // Final flush so a clean shutdown leaves no unsealed tail.
        if let Err(e) = self.seal_all() {
            warn!(partition = self.partition, error = %e, "Final seal failed; events remain unbatched");
        }
    }

    async fn try_seal(&self) {
        match self.seal_next() {
            Ok(_) => {}
            Err(AggregatorError::NonContiguous { .. }) => {
                warn!(partition = self.partition, "Leaf gap detected, re-reading ledger");
                if let Err(e) = self.catch_up() {
                    error!(partition = self.partition, error = %e, "Catch-up after gap failed");
                }
            }
            Err(e) => {
                warn!(partition = self.partition, error = %e, "Seal failed, backing off");
                tokio::time::sleep(self.config.sign_retry_backoff).await;
            }
        }
    }
}
