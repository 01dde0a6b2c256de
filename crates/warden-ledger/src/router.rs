//! # Ledger Router
//!
//! Routes an append to the writer owning the principal's partition. The
//! same key-to-partition mapping the bus uses keeps a principal's ledger
//! rows and bus messages on the same partition index.

use crate::writer::{LedgerWriter, WriterError};
use std::collections::HashMap;
use std::sync::Arc;
use warden_store::WriteBatch;
use warden_types::events::partition_for_key;
use warden_types::{EventBody, LedgerEvent, Partition, PrincipalId};

/// The set of per-partition writers owned by this process.
pub struct LedgerRouter {
    writers: HashMap<Partition, Arc<LedgerWriter>>,
    partitions: u32,
}

impl LedgerRouter {
    /// Build a router over one writer per partition.
    ///
    /// # Panics
    ///
    /// Panics if a writer's partition does not match its map key; this is a
    /// wiring bug, not a runtime condition.
    #[must_use]
    pub fn new(writers: Vec<Arc<LedgerWriter>>, partitions: u32) -> Self {
        let map: HashMap<Partition, Arc<LedgerWriter>> = writers
            .into_iter()
            .map(|w| (w.partition(), w))
            .collect();
        Self {
            writers: map,
            partitions: partitions.max(1),
        }
    }

    /// The partition a principal's events land on.
    #[must_use]
    pub fn partition_for(&self, principal: &PrincipalId) -> Partition {
        partition_for_key(&principal.to_string(), self.partitions)
    }

    /// The writer for a principal's partition, if this process owns it.
    #[must_use]
    pub fn writer_for(&self, principal: &PrincipalId) -> Option<&Arc<LedgerWriter>> {
        self.writers.get(&self.partition_for(principal))
    }

    /// Append an event via the owning writer.
    pub fn append(&self, body: EventBody) -> Result<LedgerEvent, WriterError> {
        self.append_with(body, WriteBatch::new())
    }

    /// Append with same-transaction entity writes.
    pub fn append_with(
        &self,
        body: EventBody,
        extra: WriteBatch,
    ) -> Result<LedgerEvent, WriterError> {
        let partition = self.partition_for(&body.principal_id);
        let writer = self.writers.get(&partition).ok_or_else(|| {
            WriterError::Store(warden_types::StoreError::not_found(
                "writer for partition",
                partition,
            ))
        })?;
        writer.append_with(body, extra)
    }
}
