//! # Replay / Recovery
//!
//! Rebuilds derived state from a snapshot plus the retained bus log, then
//! gates consumer restart on Merkle verification of the reconstructed
//! range.
//!
//! The caller stops consumers first (shutdown signal), runs
//! [`Replayer::replay`], and only restarts consumers on success. A
//! verification failure is an [`ReplayError::Integrity`]: the pipeline
//! stays halted and the report names the offending batch or event.

use crate::consumer::MessageHandler;
use crate::handlers::LedgerWriteHandler;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;
use warden_bus::{topics, InMemoryBus};
use warden_ledger::{verify_batches_up_to, IntegrityError, SigningKeyResolver, VerifyReport};
use warden_spend::SpendingCache;
use warden_store::{Clock, SnapshotRetention, Store, WriteBatch, WriteOp};
use warden_telemetry::REPLAY_MESSAGES;
use warden_types::{Cost, EventType, Partition, Snapshot, StoreError};

/// Where replay starts.
#[derive(Debug, Clone, Copy)]
pub enum ReplayStart {
    /// Replay the retained bus log from this offset on every topic.
    Offset(u64),
    /// Seed derived state from the latest snapshot, then replay the full
    /// retained log; idempotent handlers turn the overlap into no-ops.
    FromSnapshot,
}

/// Errors from replay.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// The store failed during reconstruction.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Merkle verification failed; the pipeline must stay halted.
    #[error("Integrity verification failed: {0}")]
    Integrity(#[from] IntegrityError),
}

/// Outcome of a replay run.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplayReport {
    /// Bus messages pushed through the handlers.
    pub messages_replayed: usize,
    /// Snapshot the run was seeded from, if any.
    pub seeded_from_event_id: Option<u64>,
    /// The verification pass over the reconstructed range.
    pub verification: VerifyReport,
}

/// Rebuilds one partition's derived state.
pub struct Replayer {
    store: Arc<dyn Store>,
    bus: Arc<InMemoryBus>,
    ledger_handler: Arc<LedgerWriteHandler>,
    spending: Arc<SpendingCache>,
    clock: Arc<dyn Clock>,
}

impl Replayer {
    /// Create a replayer over the normal ledger-writer handler; replay
    /// goes through exactly the code path live consumption uses.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        bus: Arc<InMemoryBus>,
        ledger_handler: Arc<LedgerWriteHandler>,
        spending: Arc<SpendingCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            bus,
            ledger_handler,
            spending,
            clock,
        }
    }

    /// Replay one partition. Consumers must be stopped for the duration.
    pub async fn replay(
        &self,
        partition: Partition,
        start: ReplayStart,
        keys: &dyn SigningKeyResolver,
    ) -> Result<ReplayReport, ReplayError> {
        let mut report = ReplayReport::default();

        let from_offset = match start {
            ReplayStart::Offset(offset) => offset,
            ReplayStart::FromSnapshot => {
                if let Some(snapshot) = self.store.latest_snapshot(partition)? {
                    info!(
                        partition,
                        as_of = snapshot.as_of_event_id,
                        "Seeding derived state from snapshot"
                    );
                    self.seed_from_snapshot(&snapshot);
                    report.seeded_from_event_id = Some(snapshot.as_of_event_id);
                }
                0
            }
        };

        // Push the retained log through the normal handlers; duplicate
        // appends collapse against the producer-seq constraint.
        for topic in [topics::METERING_EVENTS, topics::POLICY_DECISIONS] {
            for message in self.bus.read_from(topic, partition, from_offset) {
                self.ledger_handler
                    .handle(&message)
                    .await
                    .map_err(|e| StoreError::Io {
                        message: format!("replay handler failed: {e}"),
                    })?;
                REPLAY_MESSAGES.inc();
                report.messages_replayed += 1;
            }
        }

        // The reconstructed range must prove out before consumers restart.
        let up_to = self.store.last_event_id(partition)?.unwrap_or(0);
        match verify_batches_up_to(self.store.as_ref(), partition, up_to, keys) {
            Ok(verification) => {
                report.verification = verification;
                info!(
                    partition,
                    messages = report.messages_replayed,
                    batches = report.verification.batches_verified,
                    "Replay complete, integrity verified"
                );
                Ok(report)
            }
            Err(e) => {
                error!(partition, error = %e, "HALT: ledger integrity verification failed");
                Err(e.into())
            }
        }
    }

    fn seed_from_snapshot(&self, snapshot: &Snapshot) {
        for (principal, costs) in &snapshot.spending_totals {
            for (i, cost) in costs.iter().enumerate() {
                // Seed totals as synthetic window entries stamped at the
                // snapshot time; precise per-event history older than the
                // window lives in the store anyway.
                self.spending
                    .record(*principal, snapshot.created_ms, i as u64, *cost);
            }
        }
    }

    /// Materialize a snapshot of derived state for one partition and
    /// prune older snapshots per retention.
    pub fn take_snapshot(&self, partition: Partition) -> Result<Snapshot, ReplayError> {
        let as_of = self.store.last_event_id(partition)?.unwrap_or(0);
        let mut totals: std::collections::BTreeMap<warden_types::PrincipalId, Vec<Cost>> =
            std::collections::BTreeMap::new();

        for event in self.store.events_in_range(partition, 1, as_of)? {
            if event.event_type != EventType::Metering {
                continue;
            }
            let Some(cost) = event.cost else { continue };
            let entry = totals.entry(event.principal_id).or_default();
            match entry.iter_mut().find(|c| c.currency == cost.currency) {
                Some(sum) => sum.minor_units += cost.minor_units,
                None => entry.push(cost),
            }
        }

        let snapshot = Snapshot {
            id: Uuid::new_v4(),
            partition,
            as_of_event_id: as_of,
            spending_totals: totals,
            active_mandates: self.store.active_mandate_ids()?,
            created_ms: self.clock.now_ms(),
        };
        self.store
            .commit(WriteBatch::new().with(WriteOp::InsertSnapshot(snapshot.clone())))?;
        self.store
            .prune_snapshots(partition, SnapshotRetention::default())?;
        info!(partition, as_of, "Snapshot taken");
        Ok(snapshot)
    }
}
