//! # Store Ports
//!
//! The interfaces the rest of the system programs against: the typed
//! [`Store`] trait, the all-or-nothing [`WriteBatch`], and the injectable
//! [`Clock`].

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use warden_types::{
    AuthorityPolicy, EventId, LedgerEvent, Mandate, MandateId, MerkleBatch, Partition, Principal,
    PrincipalId, RevocationState, Snapshot, StoreError, TimestampMs,
};

/// One typed mutation inside a [`WriteBatch`].
#[derive(Debug, Clone)]
pub enum WriteOp {
    /// Create a principal. Fails with `Conflict` if the id exists and
    /// `Integrity` if the parent link is dangling.
    InsertPrincipal(Principal),
    /// Soft-deactivate a principal. Tombstone, never delete.
    DeactivatePrincipal(PrincipalId),
    /// Insert a policy version and make it the active one; the prior active
    /// version for the principal is deactivated in the same transaction.
    InsertPolicy(AuthorityPolicy),
    /// Create a mandate. Issuer, subject, and parent must exist.
    InsertMandate(Mandate),
    /// Transition a mandate to revoked. A mandate is revoked exactly once;
    /// a second revocation is a `Conflict`.
    RevokeMandate {
        /// Mandate to revoke.
        id: MandateId,
        /// The revocation record.
        revocation: RevocationState,
    },
    /// Append a ledger event. The id must be exactly `last_id + 1` for its
    /// partition, and `(principal_id, producer_seq)` must be unused.
    AppendEvent(LedgerEvent),
    /// Seal a Merkle batch and stamp `batch_id` on every event in its
    /// range. Re-sealing an identical batch is a no-op.
    SealBatch(MerkleBatch),
    /// Store a snapshot.
    InsertSnapshot(Snapshot),
}

/// An atomic group of writes: either every operation applies or none do.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    /// An empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an operation.
    #[must_use]
    pub fn with(mut self, op: WriteOp) -> Self {
        self.ops.push(op);
        self
    }

    /// Append an operation in place.
    pub fn push(&mut self, op: WriteOp) {
        self.ops.push(op);
    }

    /// The operations in application order.
    #[must_use]
    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    /// Whether the batch holds no operations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Snapshot retention policy: keep the most recent `keep_last`, plus the
/// first snapshot of each 30-day bucket for long-term history.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotRetention {
    /// Number of most-recent snapshots always kept.
    pub keep_last: usize,
}

impl Default for SnapshotRetention {
    fn default() -> Self {
        Self { keep_last: 7 }
    }
}

/// The persistence interface.
///
/// All mutation goes through [`Store::commit`]; reads are side-effect free.
/// Implementations are internally synchronized and safe to share.
pub trait Store: Send + Sync {
    /// Apply a batch atomically.
    fn commit(&self, batch: WriteBatch) -> Result<(), StoreError>;

    // --- principals -------------------------------------------------------

    /// Fetch a principal by id.
    fn principal(&self, id: &PrincipalId) -> Result<Principal, StoreError>;

    // --- policies ---------------------------------------------------------

    /// The single active policy for a principal, or `NotFound`.
    fn active_policy(&self, principal: &PrincipalId) -> Result<AuthorityPolicy, StoreError>;

    /// Every policy version for a principal, oldest first.
    fn policy_history(&self, principal: &PrincipalId) -> Result<Vec<AuthorityPolicy>, StoreError>;

    // --- mandates ---------------------------------------------------------

    /// Fetch a mandate by id.
    fn mandate(&self, id: &MandateId) -> Result<Mandate, StoreError>;

    /// The mandate chain from the given leaf up to its root, leaf first.
    fn mandate_chain(&self, id: &MandateId) -> Result<Vec<Mandate>, StoreError>;

    /// Direct children of a mandate (delegations derived from it).
    fn children_of(&self, id: &MandateId) -> Result<Vec<MandateId>, StoreError>;

    /// Mandates granted to a subject, optionally only non-revoked ones.
    fn mandates_for_subject(
        &self,
        subject: &PrincipalId,
        active_only: bool,
    ) -> Result<Vec<Mandate>, StoreError>;

    /// Ids of every non-revoked mandate. Feeds the snapshot's active
    /// mandate index.
    fn active_mandate_ids(&self) -> Result<Vec<MandateId>, StoreError>;

    // --- ledger -----------------------------------------------------------

    /// The next dense event id for a partition. Only meaningful while the
    /// caller holds the partition's writer lock; commit enforces density.
    fn next_event_id(&self, partition: Partition) -> Result<EventId, StoreError>;

    /// The highest committed event id in a partition, if any.
    fn last_event_id(&self, partition: Partition) -> Result<Option<EventId>, StoreError>;

    /// Fetch one event.
    fn event(&self, partition: Partition, id: EventId) -> Result<LedgerEvent, StoreError>;

    /// Events with ids in `[first, last]`, ordered by id.
    fn events_in_range(
        &self,
        partition: Partition,
        first: EventId,
        last: EventId,
    ) -> Result<Vec<LedgerEvent>, StoreError>;

    /// Events for a principal with `ts_ms` in `[t0, t1]`, ordered by time.
    fn events_for_principal(
        &self,
        principal: &PrincipalId,
        t0: TimestampMs,
        t1: TimestampMs,
    ) -> Result<Vec<LedgerEvent>, StoreError>;

    /// Events not yet sealed into a batch, ordered by id.
    fn unbatched_events(&self, partition: Partition) -> Result<Vec<LedgerEvent>, StoreError>;

    // --- Merkle batches ---------------------------------------------------

    /// Fetch a sealed batch.
    fn batch(&self, partition: Partition, batch_id: u64) -> Result<MerkleBatch, StoreError>;

    /// All sealed batches for a partition, ordered by batch id.
    fn batches(&self, partition: Partition) -> Result<Vec<MerkleBatch>, StoreError>;

    /// The next batch id for a partition.
    fn next_batch_id(&self, partition: Partition) -> Result<u64, StoreError>;

    // --- snapshots --------------------------------------------------------

    /// The most recent snapshot for a partition, if any.
    fn latest_snapshot(&self, partition: Partition) -> Result<Option<Snapshot>, StoreError>;

    /// Delete snapshots outside the retention policy. Returns the number
    /// removed.
    fn prune_snapshots(
        &self,
        partition: Partition,
        retention: SnapshotRetention,
    ) -> Result<usize, StoreError>;
}

/// Injectable time source.
pub trait Clock: Send + Sync {
    /// Current time, milliseconds since the Unix epoch.
    fn now_ms(&self) -> TimestampMs;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> TimestampMs {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as TimestampMs)
            .unwrap_or(0)
    }
}

/// Controllable clock for tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    /// Start at the given instant.
    #[must_use]
    pub fn at(now_ms: TimestampMs) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    /// Advance the clock.
    pub fn advance(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }

    /// Jump to an absolute instant.
    pub fn set(&self, now_ms: TimestampMs) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> TimestampMs {
        self.now_ms.load(Ordering::SeqCst)
    }
}
