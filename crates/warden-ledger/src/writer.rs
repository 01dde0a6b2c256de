//! # Ledger Writer
//!
//! The only component that appends ledger rows. One writer per partition,
//! guarded by the partition's advisory lock.
//!
//! ## Append path
//!
//! 1. Reserve the next dense id.
//! 2. Compute the canonical bytes and content hash.
//! 3. Commit the row (plus any same-transaction entity writes).
//! 4. Best-effort: update the spending cache.
//! 5. Notify the Merkle aggregator.
//!
//! The store adapter flushes durably inside commit, so a crash after (3)
//! leaves the row visible on recovery and the aggregator re-pulls it via
//! its unbatched-events high-water mark.

use crate::ports::SpendingRecorder;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use warden_crypto::{canonical_json, sha256, CryptoError};
use warden_store::{PartitionLock, Store, WriteBatch, WriteOp};
use warden_types::{
    EventBody, EventId, EventType, Hash, LedgerEvent, Partition, PrincipalId, StoreError,
};

/// Notification to the aggregator that a new leaf exists.
#[derive(Debug, Clone, Copy)]
pub struct LeafNotice {
    /// The appended event's id.
    pub event_id: EventId,
    /// The event's content hash (the Merkle leaf).
    pub content_hash: Hash,
}

/// Errors from ledger appends.
#[derive(Debug, Error)]
pub enum WriterError {
    /// The `(principal, producer_seq)` pair was already appended. For
    /// at-least-once consumers this is success, not failure.
    #[error("Duplicate append for principal {principal} seq {seq}")]
    Duplicate { principal: PrincipalId, seq: u64 },

    /// The store rejected the write.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The event body could not be canonicalized for hashing.
    #[error(transparent)]
    Canonical(#[from] CryptoError),
}

/// Single-writer append handle for one partition.
pub struct LedgerWriter {
    store: Arc<dyn Store>,
    partition: Partition,
    /// Held for the process lifetime; releasing it hands the partition to
    /// the next writer.
    _lock: Option<PartitionLock>,
    spending: Option<Arc<dyn SpendingRecorder>>,
    aggregator_tx: Option<mpsc::UnboundedSender<LeafNotice>>,
}

impl LedgerWriter {
    /// A writer without an advisory lock, for in-process setups where the
    /// caller guarantees single-writer discipline (tests, embedded use).
    #[must_use]
    pub fn new(store: Arc<dyn Store>, partition: Partition) -> Self {
        Self {
            store,
            partition,
            _lock: None,
            spending: None,
            aggregator_tx: None,
        }
    }

    /// A writer holding the partition's advisory lock.
    #[must_use]
    pub fn with_lock(store: Arc<dyn Store>, partition: Partition, lock: PartitionLock) -> Self {
        Self {
            store,
            partition,
            _lock: Some(lock),
            spending: None,
            aggregator_tx: None,
        }
    }

    /// Attach the best-effort spending sink.
    #[must_use]
    pub fn with_spending(mut self, spending: Arc<dyn SpendingRecorder>) -> Self {
        self.spending = Some(spending);
        self
    }

    /// Attach the aggregator feed.
    #[must_use]
    pub fn with_aggregator(mut self, tx: mpsc::UnboundedSender<LeafNotice>) -> Self {
        self.aggregator_tx = Some(tx);
        self
    }

    /// The partition this writer owns.
    #[must_use]
    pub fn partition(&self) -> Partition {
        self.partition
    }

    /// Append one event.
    pub fn append(&self, body: EventBody) -> Result<LedgerEvent, WriterError> {
        self.append_with(body, WriteBatch::new())
    }

    /// Append one event together with entity writes that must land in the
    /// same transaction (mandate issuance and revocation use this).
    ///
    /// `extra` is applied before the event row, so an event may reference
    /// an entity inserted in the same batch.
    pub fn append_with(
        &self,
        body: EventBody,
        extra: WriteBatch,
    ) -> Result<LedgerEvent, WriterError> {
        let has_seq = body.producer_seq.is_some();
        let event = self.prepare(body)?;

        let mut batch = extra;
        batch.push(WriteOp::AppendEvent(event.clone()));
        match self.store.commit(batch) {
            Ok(()) => {}
            Err(StoreError::Conflict { .. }) if has_seq => {
                // At-least-once redelivery; the first append won.
                debug!(
                    partition = self.partition,
                    principal = %event.principal_id,
                    seq = event.producer_seq,
                    "Duplicate append suppressed"
                );
                return Err(WriterError::Duplicate {
                    principal: event.principal_id,
                    seq: event.producer_seq.unwrap_or_default(),
                });
            }
            Err(e) => return Err(e.into()),
        }

        self.post_commit(&event);
        Ok(event)
    }

    /// Assemble the full row: reserve the id and compute the content hash.
    fn prepare(&self, body: EventBody) -> Result<LedgerEvent, WriterError> {
        let id = self.store.next_event_id(self.partition)?;
        let hash = content_hash(id, self.partition, &body)?;
        Ok(LedgerEvent::from_body(id, self.partition, body, hash))
    }

    /// Steps after the durable commit: spending update (best-effort) and
    /// aggregator notification.
    fn post_commit(&self, event: &LedgerEvent) {
        if event.event_type == EventType::Metering && event.cost.is_some() {
            if let Some(spending) = &self.spending {
                if let Err(e) = spending.record(event) {
                    // The ledger row is durable; the cache will catch up
                    // from the store on its next fallthrough query.
                    warn!(
                        partition = self.partition,
                        event_id = event.id,
                        error = %e,
                        "Spending cache update failed"
                    );
                }
            }
        }
        if let Some(tx) = &self.aggregator_tx {
            let notice = LeafNotice {
                event_id: event.id,
                content_hash: event.content_hash,
            };
            if tx.send(notice).is_err() {
                warn!(
                    partition = self.partition,
                    event_id = event.id,
                    "Aggregator channel closed; event will be sealed on restart"
                );
            }
        }
    }
}

/// Canonical content hash for an event about to be appended.
///
/// The hash covers the writer-assigned id and partition as well as the
/// body, so a row cannot be moved within or across partitions undetected.
pub fn content_hash(
    id: EventId,
    partition: Partition,
    body: &EventBody,
) -> Result<Hash, CryptoError> {
    let row = LedgerEvent::from_body(id, partition, body.clone(), [0u8; 32]);
    event_content_hash(&row)
}

/// Recompute the canonical content hash from a persisted row.
///
/// Integrity verification recomputes this from the row's fields and
/// compares against the stored `content_hash`; a tampered field shows up as
/// a mismatch even before the Merkle root is checked.
pub fn event_content_hash(event: &LedgerEvent) -> Result<Hash, CryptoError> {
    let value = json!({
        "id": event.id,
        "partition": event.partition,
        "ts_ms": event.ts_ms,
        "principal_id": event.principal_id.to_string(),
        "type": event.event_type,
        "mandate_id": event.mandate_id.map(|m| m.to_string()),
        "action": &event.action,
        "resource": &event.resource,
        "cost_minor_units": event.cost.map(|c| c.minor_units),
        "currency": event.cost.map(|c| c.currency.as_str().to_string()),
        "outcome": event.outcome,
        "correlation_id": &event.correlation_id,
        "metadata": hex::encode(&event.metadata),
        "producer_seq": event.producer_seq,
    });
    Ok(sha256(&canonical_json(&value)?))
}
