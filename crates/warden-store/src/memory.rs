//! # In-Memory Store
//!
//! The test and development adapter. Commits clone the state, apply the
//! batch, and swap on success, so concurrent readers always see a fully
//! committed view.

use crate::ports::{SnapshotRetention, Store, WriteBatch};
use crate::state::StoreState;
use parking_lot::RwLock;
use warden_types::{
    AuthorityPolicy, EventId, LedgerEvent, Mandate, MandateId, MerkleBatch, Partition, Principal,
    PrincipalId, Snapshot, StoreError, TimestampMs,
};

/// In-memory implementation of [`Store`].
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a stored event's metadata without updating its content
    /// hash. Exists so integrity tests can simulate on-disk tampering;
    /// never called by production code.
    #[doc(hidden)]
    pub fn tamper_event_metadata(
        &self,
        partition: Partition,
        id: EventId,
        metadata: Vec<u8>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write();
        let event = state
            .events
            .get_mut(&partition)
            .and_then(|log| log.get_mut((id as usize).wrapping_sub(1)))
            .ok_or_else(|| StoreError::not_found("event", format!("{partition}/{id}")))?;
        event.metadata = metadata;
        Ok(())
    }
}

impl Store for MemoryStore {
    fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut state = self.state.write();
        let mut staged = state.clone();
        staged.apply(&batch)?;
        *state = staged;
        Ok(())
    }

    fn principal(&self, id: &PrincipalId) -> Result<Principal, StoreError> {
        self.state.read().principal(id)
    }

    fn active_policy(&self, principal: &PrincipalId) -> Result<AuthorityPolicy, StoreError> {
        self.state.read().active_policy(principal)
    }

    fn policy_history(&self, principal: &PrincipalId) -> Result<Vec<AuthorityPolicy>, StoreError> {
        self.state.read().policy_history(principal)
    }

    fn mandate(&self, id: &MandateId) -> Result<Mandate, StoreError> {
        self.state.read().mandate(id)
    }

    fn mandate_chain(&self, id: &MandateId) -> Result<Vec<Mandate>, StoreError> {
        self.state.read().mandate_chain(id)
    }

    fn children_of(&self, id: &MandateId) -> Result<Vec<MandateId>, StoreError> {
        self.state.read().children_of(id)
    }

    fn mandates_for_subject(
        &self,
        subject: &PrincipalId,
        active_only: bool,
    ) -> Result<Vec<Mandate>, StoreError> {
        self.state.read().mandates_for_subject(subject, active_only)
    }

    fn active_mandate_ids(&self) -> Result<Vec<MandateId>, StoreError> {
        Ok(self.state.read().active_mandate_ids())
    }

    fn next_event_id(&self, partition: Partition) -> Result<EventId, StoreError> {
        Ok(self.state.read().last_event_id(partition).unwrap_or(0) + 1)
    }

    fn last_event_id(&self, partition: Partition) -> Result<Option<EventId>, StoreError> {
        Ok(self.state.read().last_event_id(partition))
    }

    fn event(&self, partition: Partition, id: EventId) -> Result<LedgerEvent, StoreError> {
        self.state.read().event(partition, id)
    }

    fn events_in_range(
        &self,
        partition: Partition,
        first: EventId,
        last: EventId,
    ) -> Result<Vec<LedgerEvent>, StoreError> {
        self.state.read().events_in_range(partition, first, last)
    }

    fn events_for_principal(
        &self,
        principal: &PrincipalId,
        t0: TimestampMs,
        t1: TimestampMs,
    ) -> Result<Vec<LedgerEvent>, StoreError> {
        Ok(self.state.read().events_for_principal(principal, t0, t1))
    }

    fn unbatched_events(&self, partition: Partition) -> Result<Vec<LedgerEvent>, StoreError> {
        Ok(self.state.read().unbatched_events(partition))
    }

    fn batch(&self, partition: Partition, batch_id: u64) -> Result<MerkleBatch, StoreError> {
        self.state.read().batch(partition, batch_id)
    }

    fn batches(&self, partition: Partition) -> Result<Vec<MerkleBatch>, StoreError> {
        Ok(self.state.read().batches(partition))
    }

    fn next_batch_id(&self, partition: Partition) -> Result<u64, StoreError> {
        Ok(self.state.read().next_batch_id(partition))
    }

    fn latest_snapshot(&self, partition: Partition) -> Result<Option<Snapshot>, StoreError> {
        Ok(self.state.read().latest_snapshot(partition))
    }

    fn prune_snapshots(
        &self,
        partition: Partition,
        retention: SnapshotRetention,
    ) -> Result<usize, StoreError> {
        Ok(self.state.write().prune_snapshots(partition, retention))
    }
}
