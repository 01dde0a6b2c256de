//! Shared in-memory representation used by both store adapters.
//!
//! A commit applies its operations to a clone of the current state and the
//! adapter swaps the clone in only when every operation validated, so a
//! failed batch leaves nothing behind.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use warden_types::{
    AuthorityPolicy, EventId, LedgerEvent, Mandate, MandateId, MerkleBatch, Partition, PolicyId,
    Principal, PrincipalId, Snapshot, StoreError, TimestampMs,
};

use crate::ports::{SnapshotRetention, WriteBatch, WriteOp};

/// 30-day bucket used by snapshot retention for "one per month".
const MONTH_BUCKET_MS: i64 = 30 * 24 * 60 * 60 * 1000;

/// Maximum delegation chain length tolerated when walking parents; a longer
/// walk means a corrupted parent link cycle.
const MAX_CHAIN_LEN: usize = 1024;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub(crate) struct StoreState {
    pub principals: HashMap<PrincipalId, Principal>,
    pub policies: HashMap<PolicyId, AuthorityPolicy>,
    /// Policy ids per principal, oldest version first.
    pub policy_order: HashMap<PrincipalId, Vec<PolicyId>>,
    pub mandates: HashMap<MandateId, Mandate>,
    /// Direct delegation children per mandate.
    pub children: HashMap<MandateId, Vec<MandateId>>,
    /// Mandates granted to each subject.
    pub by_subject: HashMap<PrincipalId, Vec<MandateId>>,
    /// Ledger events per partition; `events[p][i].id == i + 1` always holds.
    pub events: HashMap<Partition, Vec<LedgerEvent>>,
    /// Seen `(principal, producer_seq)` pairs for idempotent appends.
    pub dedupe: HashSet<(PrincipalId, u64)>,
    /// Sealed batches per partition; `batches[p][i].batch_id == i + 1`.
    pub batches: HashMap<Partition, Vec<MerkleBatch>>,
    /// Snapshots per partition, in creation order.
    pub snapshots: HashMap<Partition, Vec<Snapshot>>,
}

impl StoreState {
    /// Apply a batch in order. Any error aborts the whole batch (the caller
    /// discards the clone).
    pub fn apply(&mut self, batch: &WriteBatch) -> Result<(), StoreError> {
        for op in batch.ops() {
            self.apply_op(op)?;
        }
        Ok(())
    }

    fn apply_op(&mut self, op: &WriteOp) -> Result<(), StoreError> {
        match op {
            WriteOp::InsertPrincipal(p) => self.insert_principal(p),
            WriteOp::DeactivatePrincipal(id) => self.deactivate_principal(id),
            WriteOp::InsertPolicy(policy) => self.insert_policy(policy),
            WriteOp::InsertMandate(m) => self.insert_mandate(m),
            WriteOp::RevokeMandate { id, revocation } => self.revoke_mandate(id, revocation),
            WriteOp::AppendEvent(e) => self.append_event(e),
            WriteOp::SealBatch(b) => self.seal_batch(b),
            WriteOp::InsertSnapshot(s) => {
                self.snapshots.entry(s.partition).or_default().push(s.clone());
                Ok(())
            }
        }
    }

    fn insert_principal(&mut self, p: &Principal) -> Result<(), StoreError> {
        if self.principals.contains_key(&p.id) {
            return Err(StoreError::Conflict {
                what: format!("principal {}", p.id),
            });
        }
        if let Some(parent) = &p.parent {
            if !self.principals.contains_key(parent) {
                return Err(StoreError::Integrity {
                    message: format!("principal {} references missing parent {parent}", p.id),
                });
            }
        }
        self.principals.insert(p.id, p.clone());
        Ok(())
    }

    fn deactivate_principal(&mut self, id: &PrincipalId) -> Result<(), StoreError> {
        let p = self
            .principals
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("principal", id))?;
        p.deactivated = true;
        Ok(())
    }

    fn insert_policy(&mut self, policy: &AuthorityPolicy) -> Result<(), StoreError> {
        if self.policies.contains_key(&policy.id) {
            return Err(StoreError::Conflict {
                what: format!("policy {}", policy.id),
            });
        }
        if !self.principals.contains_key(&policy.principal_id) {
            return Err(StoreError::Integrity {
                message: format!(
                    "policy {} references missing principal {}",
                    policy.id, policy.principal_id
                ),
            });
        }
        if !policy.active {
            return Err(StoreError::Integrity {
                message: format!("policy {} must be inserted active", policy.id),
            });
        }

        let order = self.policy_order.entry(policy.principal_id).or_default();
        if let Some(last_id) = order.last() {
            let last = &self.policies[last_id];
            if policy.version <= last.version {
                return Err(StoreError::Conflict {
                    what: format!(
                        "policy version {} for principal {} (latest is {})",
                        policy.version, policy.principal_id, last.version
                    ),
                });
            }
        }
        // Exactly one active policy per principal: deactivate the
        // predecessor in the same transaction.
        for pid in order.iter() {
            if let Some(prior) = self.policies.get_mut(pid) {
                prior.active = false;
            }
        }
        order.push(policy.id);
        self.policies.insert(policy.id, policy.clone());
        Ok(())
    }

    fn insert_mandate(&mut self, m: &Mandate) -> Result<(), StoreError> {
        if self.mandates.contains_key(&m.id) {
            return Err(StoreError::Conflict {
                what: format!("mandate {}", m.id),
            });
        }
        for (role, id) in [("issuer", &m.issuer), ("subject", &m.subject)] {
            if !self.principals.contains_key(id) {
                return Err(StoreError::Integrity {
                    message: format!("mandate {} references missing {role} {id}", m.id),
                });
            }
        }
        if let Some(parent) = &m.parent_id {
            if !self.mandates.contains_key(parent) {
                return Err(StoreError::Integrity {
                    message: format!("mandate {} references missing parent {parent}", m.id),
                });
            }
            self.children.entry(*parent).or_default().push(m.id);
        }
        self.by_subject.entry(m.subject).or_default().push(m.id);
        self.mandates.insert(m.id, m.clone());
        Ok(())
    }

    fn revoke_mandate(
        &mut self,
        id: &MandateId,
        revocation: &warden_types::RevocationState,
    ) -> Result<(), StoreError> {
        let m = self
            .mandates
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("mandate", id))?;
        if m.is_revoked() {
            return Err(StoreError::Conflict {
                what: format!("mandate {id} already revoked"),
            });
        }
        if !revocation.is_revoked() {
            return Err(StoreError::Integrity {
                message: format!("revocation for mandate {id} must carry a revoked state"),
            });
        }
        m.revocation = revocation.clone();
        Ok(())
    }

    fn append_event(&mut self, e: &LedgerEvent) -> Result<(), StoreError> {
        if let Some(seq) = e.producer_seq {
            if !self.dedupe.insert((e.principal_id, seq)) {
                return Err(StoreError::Conflict {
                    what: format!("producer_seq {seq} for principal {}", e.principal_id),
                });
            }
        }
        let log = self.events.entry(e.partition).or_default();
        let expected = log.len() as EventId + 1;
        if e.id != expected {
            return Err(StoreError::Integrity {
                message: format!(
                    "non-dense event id {} in partition {} (expected {expected})",
                    e.id, e.partition
                ),
            });
        }
        log.push(e.clone());
        Ok(())
    }

    fn seal_batch(&mut self, b: &MerkleBatch) -> Result<(), StoreError> {
        let batches = self.batches.entry(b.partition).or_default();
        if let Some(existing) = batches.get((b.batch_id as usize).wrapping_sub(1)) {
            // Sealing is idempotent: the identical commitment is a no-op.
            if existing.first_event_id == b.first_event_id
                && existing.last_event_id == b.last_event_id
                && existing.root_hash == b.root_hash
            {
                return Ok(());
            }
            return Err(StoreError::Conflict {
                what: format!("batch {} in partition {}", b.batch_id, b.partition),
            });
        }
        let expected = batches.len() as u64 + 1;
        if b.batch_id != expected {
            return Err(StoreError::Integrity {
                message: format!(
                    "non-dense batch id {} in partition {} (expected {expected})",
                    b.batch_id, b.partition
                ),
            });
        }
        if b.first_event_id == 0 || b.first_event_id > b.last_event_id {
            return Err(StoreError::Integrity {
                message: format!(
                    "batch {} has invalid range [{}, {}]",
                    b.batch_id, b.first_event_id, b.last_event_id
                ),
            });
        }

        let log = self.events.entry(b.partition).or_default();
        if b.last_event_id as usize > log.len() {
            return Err(StoreError::Integrity {
                message: format!(
                    "batch {} covers event {} beyond the log end {}",
                    b.batch_id,
                    b.last_event_id,
                    log.len()
                ),
            });
        }
        for event in &log[(b.first_event_id - 1) as usize..b.last_event_id as usize] {
            if let Some(other) = event.batch_id {
                return Err(StoreError::Conflict {
                    what: format!("event {} already sealed in batch {other}", event.id),
                });
            }
        }
        for event in &mut log[(b.first_event_id - 1) as usize..b.last_event_id as usize] {
            event.batch_id = Some(b.batch_id);
        }
        batches.push(b.clone());
        Ok(())
    }

    // --- reads ------------------------------------------------------------

    pub fn principal(&self, id: &PrincipalId) -> Result<Principal, StoreError> {
        self.principals
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("principal", id))
    }

    pub fn active_policy(&self, principal: &PrincipalId) -> Result<AuthorityPolicy, StoreError> {
        self.policy_order
            .get(principal)
            .and_then(|order| order.last())
            .and_then(|id| self.policies.get(id))
            .filter(|p| p.active)
            .cloned()
            .ok_or_else(|| StoreError::not_found("active policy for principal", principal))
    }

    pub fn policy_history(
        &self,
        principal: &PrincipalId,
    ) -> Result<Vec<AuthorityPolicy>, StoreError> {
        Ok(self
            .policy_order
            .get(principal)
            .map(|order| {
                order
                    .iter()
                    .filter_map(|id| self.policies.get(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    pub fn mandate(&self, id: &MandateId) -> Result<Mandate, StoreError> {
        self.mandates
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("mandate", id))
    }

    pub fn mandate_chain(&self, id: &MandateId) -> Result<Vec<Mandate>, StoreError> {
        let mut chain = Vec::new();
        let mut current = Some(*id);
        while let Some(cid) = current {
            if chain.len() >= MAX_CHAIN_LEN {
                return Err(StoreError::Integrity {
                    message: format!("mandate chain from {id} exceeds {MAX_CHAIN_LEN} links"),
                });
            }
            let m = if chain.is_empty() {
                // The leaf itself missing is NotFound; a missing ancestor is
                // a broken reference.
                self.mandate(&cid)?
            } else {
                self.mandates.get(&cid).cloned().ok_or_else(|| {
                    StoreError::Integrity {
                        message: format!("mandate chain from {id} has dangling parent {cid}"),
                    }
                })?
            };
            current = m.parent_id;
            chain.push(m);
        }
        Ok(chain)
    }

    pub fn children_of(&self, id: &MandateId) -> Result<Vec<MandateId>, StoreError> {
        Ok(self.children.get(id).cloned().unwrap_or_default())
    }

    pub fn mandates_for_subject(
        &self,
        subject: &PrincipalId,
        active_only: bool,
    ) -> Result<Vec<Mandate>, StoreError> {
        Ok(self
            .by_subject
            .get(subject)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.mandates.get(id))
                    .filter(|m| !active_only || !m.is_revoked())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    pub fn active_mandate_ids(&self) -> Vec<MandateId> {
        let mut ids: Vec<MandateId> = self
            .mandates
            .values()
            .filter(|m| !m.is_revoked())
            .map(|m| m.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn last_event_id(&self, partition: Partition) -> Option<EventId> {
        self.events
            .get(&partition)
            .and_then(|log| log.last())
            .map(|e| e.id)
    }

    pub fn event(&self, partition: Partition, id: EventId) -> Result<LedgerEvent, StoreError> {
        self.events
            .get(&partition)
            .and_then(|log| log.get((id as usize).wrapping_sub(1)))
            .cloned()
            .ok_or_else(|| StoreError::not_found("event", format!("{partition}/{id}")))
    }

    pub fn events_in_range(
        &self,
        partition: Partition,
        first: EventId,
        last: EventId,
    ) -> Result<Vec<LedgerEvent>, StoreError> {
        if first == 0 || first > last {
            return Ok(Vec::new());
        }
        let log = self.events.get(&partition).map(Vec::as_slice).unwrap_or(&[]);
        if last as usize > log.len() {
            return Err(StoreError::not_found(
                "event",
                format!("{partition}/{last}"),
            ));
        }
        Ok(log[(first - 1) as usize..last as usize].to_vec())
    }

    pub fn events_for_principal(
        &self,
        principal: &PrincipalId,
        t0: TimestampMs,
        t1: TimestampMs,
    ) -> Vec<LedgerEvent> {
        let mut out: Vec<LedgerEvent> = self
            .events
            .values()
            .flatten()
            .filter(|e| e.principal_id == *principal && e.ts_ms >= t0 && e.ts_ms <= t1)
            .cloned()
            .collect();
        out.sort_by_key(|e| (e.ts_ms, e.id));
        out
    }

    pub fn unbatched_events(&self, partition: Partition) -> Vec<LedgerEvent> {
        self.events
            .get(&partition)
            .map(|log| {
                log.iter()
                    .filter(|e| e.batch_id.is_none())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn batch(&self, partition: Partition, batch_id: u64) -> Result<MerkleBatch, StoreError> {
        self.batches
            .get(&partition)
            .and_then(|b| b.get((batch_id as usize).wrapping_sub(1)))
            .cloned()
            .ok_or_else(|| StoreError::not_found("batch", format!("{partition}/{batch_id}")))
    }

    pub fn batches(&self, partition: Partition) -> Vec<MerkleBatch> {
        self.batches.get(&partition).cloned().unwrap_or_default()
    }

    pub fn next_batch_id(&self, partition: Partition) -> u64 {
        self.batches
            .get(&partition)
            .map(|b| b.len() as u64 + 1)
            .unwrap_or(1)
    }

    pub fn latest_snapshot(&self, partition: Partition) -> Option<Snapshot> {
        self.snapshots
            .get(&partition)
            .and_then(|s| s.last())
            .cloned()
    }

    pub fn prune_snapshots(&mut self, partition: Partition, retention: SnapshotRetention) -> usize {
        let Some(snaps) = self.snapshots.get_mut(&partition) else {
            return 0;
        };
        let total = snaps.len();
        if total <= retention.keep_last {
            return 0;
        }
        let cutoff = total - retention.keep_last;
        let mut seen_buckets: HashSet<i64> = HashSet::new();
        let mut kept: Vec<Snapshot> = Vec::with_capacity(retention.keep_last + 4);
        for (i, snap) in snaps.iter().enumerate() {
            let bucket = snap.created_ms / MONTH_BUCKET_MS;
            let keep_monthly = i < cutoff && seen_buckets.insert(bucket);
            if i >= cutoff || keep_monthly {
                kept.push(snap.clone());
            }
        }
        let removed = total - kept.len();
        *snaps = kept;
        removed
    }
}
