//! # Ledger Events, Merkle Batches, Snapshots
//!
//! The append-only record of what happened. Events are write-once and
//! referenced forever; ids are dense and strictly increasing within a
//! partition. Sealed batches commit a contiguous id range under a signed
//! Merkle root.

use crate::entities::{MandateId, PrincipalId, SignatureBytes};
use crate::money::Cost;
use crate::{Hash, TimestampMs};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Dense, monotonically increasing 64-bit event id (per partition).
pub type EventId = u64;

/// Ledger partition index. Events of one principal always land in one
/// partition, so per-principal ordering is total.
pub type Partition = u32;

/// Stable partition assignment for a key (FNV-1a over the key bytes).
///
/// Both the bus and the ledger route by principal id through this function,
/// so one principal's events share a partition end to end.
#[must_use]
pub fn partition_for_key(key: &str, partitions: u32) -> Partition {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = FNV_OFFSET;
    for byte in key.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    (hash % u64::from(partitions.max(1))) as Partition
}

/// What kind of fact an event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A root mandate was issued.
    Issue,
    /// A mandate was delegated from a parent.
    Delegate,
    /// A mandate was revoked.
    Revoke,
    /// The evaluator allowed a request.
    DecisionAllow,
    /// The evaluator denied a request.
    DecisionDeny,
    /// A completed action was metered.
    Metering,
}

/// Outcome of the operation an event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The request was allowed.
    Allow,
    /// The request was denied.
    Deny,
}

/// The caller-supplied portion of a ledger event.
///
/// The ledger writer assigns the id, computes the content hash, and persists
/// the full [`LedgerEvent`]. Nothing outside the writer appends rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBody {
    /// Principal the event belongs to.
    pub principal_id: PrincipalId,
    /// Event kind.
    pub event_type: EventType,
    /// Event time.
    pub ts_ms: TimestampMs,
    /// Mandate involved, if any.
    pub mandate_id: Option<MandateId>,
    /// Requested action, for decision and metering events.
    pub action: Option<String>,
    /// Requested resource URN, for decision and metering events.
    pub resource: Option<String>,
    /// Metered cost, if any.
    pub cost: Option<Cost>,
    /// Outcome, for decision events.
    pub outcome: Option<Outcome>,
    /// Correlation id threading a request through the system.
    pub correlation_id: Option<String>,
    /// Opaque metadata blob (JSON bytes by convention).
    pub metadata: Vec<u8>,
    /// Producer sequence number for bus-sourced events. Uniqueness of
    /// `(principal_id, producer_seq)` turns redelivery into a no-op.
    pub producer_seq: Option<u64>,
}

impl EventBody {
    /// A minimal body with only the required fields set.
    #[must_use]
    pub fn new(principal_id: PrincipalId, event_type: EventType, ts_ms: TimestampMs) -> Self {
        EventBody {
            principal_id,
            event_type,
            ts_ms,
            mandate_id: None,
            action: None,
            resource: None,
            cost: None,
            outcome: None,
            correlation_id: None,
            metadata: Vec::new(),
            producer_seq: None,
        }
    }
}

/// A fully persisted ledger event. Immutable after write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEvent {
    /// Dense monotonic id within the partition.
    pub id: EventId,
    /// Partition the event was appended to.
    pub partition: Partition,
    /// Event time.
    pub ts_ms: TimestampMs,
    /// Principal the event belongs to.
    pub principal_id: PrincipalId,
    /// Event kind.
    pub event_type: EventType,
    /// Mandate involved, if any.
    pub mandate_id: Option<MandateId>,
    /// Requested action.
    pub action: Option<String>,
    /// Requested resource URN.
    pub resource: Option<String>,
    /// Metered cost.
    pub cost: Option<Cost>,
    /// Outcome, for decision events.
    pub outcome: Option<Outcome>,
    /// Correlation id.
    pub correlation_id: Option<String>,
    /// Opaque metadata blob.
    pub metadata: Vec<u8>,
    /// Producer sequence for deduplication, if bus-sourced.
    pub producer_seq: Option<u64>,
    /// SHA-256 of the event's canonical serialization; the Merkle leaf.
    pub content_hash: Hash,
    /// Batch this event was sealed into, once aggregated.
    pub batch_id: Option<u64>,
}

impl LedgerEvent {
    /// Assemble a persisted event from its body and writer-assigned fields.
    #[must_use]
    pub fn from_body(id: EventId, partition: Partition, body: EventBody, content_hash: Hash) -> Self {
        LedgerEvent {
            id,
            partition,
            ts_ms: body.ts_ms,
            principal_id: body.principal_id,
            event_type: body.event_type,
            mandate_id: body.mandate_id,
            action: body.action,
            resource: body.resource,
            cost: body.cost,
            outcome: body.outcome,
            correlation_id: body.correlation_id,
            metadata: body.metadata,
            producer_seq: body.producer_seq,
            content_hash,
            batch_id: None,
        }
    }
}

/// A signed commitment over a contiguous range of ledger events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerkleBatch {
    /// Batch id, monotonic per partition.
    pub batch_id: u64,
    /// Partition the batch covers.
    pub partition: Partition,
    /// First event id in the range (inclusive).
    pub first_event_id: EventId,
    /// Last event id in the range (inclusive).
    pub last_event_id: EventId,
    /// Merkle root over the events' content hashes.
    pub root_hash: Hash,
    /// Identifier of the signing key.
    pub signing_key_id: String,
    /// Signature over the batch commitment bytes.
    pub signature: SignatureBytes,
    /// Sealing time.
    pub created_ms: TimestampMs,
}

/// A completed, allowed action as published on the `metering.events` topic.
///
/// The pipeline prices `(resource_type, quantity)` through the pricebook
/// and writes the resulting cost onto the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeteringRecord {
    /// The acting principal.
    pub principal_id: PrincipalId,
    /// The mandate that authorized the action.
    pub mandate_id: Option<MandateId>,
    /// The performed action.
    pub action: String,
    /// The concrete resource URN.
    pub resource: String,
    /// Pricebook key for the consumed resource.
    pub resource_type: String,
    /// Consumed quantity in pricebook units.
    pub quantity: u64,
}

/// Authority-state change published on the `policy.changes` topic.
///
/// The evaluator invalidates its chain and policy caches on these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeNotice {
    /// A mandate was revoked (directly or by cascade).
    MandateRevoked {
        /// The revoked mandate.
        mandate_id: MandateId,
    },
    /// A new policy version became active for a principal.
    PolicyActivated {
        /// The principal whose ceiling changed.
        principal_id: PrincipalId,
    },
}

/// Principal lifecycle notice published on the `agent.lifecycle` topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleNotice {
    /// A principal was registered.
    PrincipalCreated {
        /// The new principal.
        principal_id: PrincipalId,
    },
    /// A principal was soft-deactivated.
    PrincipalDeactivated {
        /// The tombstoned principal.
        principal_id: PrincipalId,
    },
}

/// Point-in-time materialization of derived state, used to bound recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Snapshot id.
    pub id: Uuid,
    /// Partition the snapshot covers.
    pub partition: Partition,
    /// Every event up to and including this id is reflected.
    pub as_of_event_id: EventId,
    /// Spending totals per principal at the snapshot point.
    pub spending_totals: BTreeMap<PrincipalId, Vec<Cost>>,
    /// Mandates that were active (not revoked) at the snapshot point.
    pub active_mandates: Vec<MandateId>,
    /// Creation time.
    pub created_ms: TimestampMs,
}
