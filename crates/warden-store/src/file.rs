//! # File-Backed Store
//!
//! Durability without an external database: the full state is serialized
//! with bincode, protected by a CRC32C checksum, and replaced atomically via
//! a temp file + rename. Suitable for single-node deployments; the
//! single-writer ledger discipline keeps write contention away from the
//! store itself.

use crate::ports::{SnapshotRetention, Store, WriteBatch};
use crate::state::StoreState;
use parking_lot::RwLock;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use warden_types::{
    AuthorityPolicy, EventId, LedgerEvent, Mandate, MandateId, MerkleBatch, Partition, Principal,
    PrincipalId, Snapshot, StoreError, TimestampMs,
};

/// Magic bytes at the head of a store file.
const MAGIC: &[u8; 4] = b"WDN1";

/// File-backed implementation of [`Store`].
pub struct FileStore {
    state: RwLock<StoreState>,
    path: PathBuf,
}

impl FileStore {
    /// Open a store file, creating an empty store if the file is missing.
    ///
    /// A corrupt file (bad magic or checksum mismatch) is an error, not a
    /// silent reset; the operator decides what to do with it.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let state = match std::fs::metadata(&path) {
            Ok(meta) => {
                info!(path = %path.display(), bytes = meta.len(), "Opening store file");
                Self::load(&path)?
            }
            Err(_) => {
                info!(path = %path.display(), "No store file, starting empty");
                StoreState::default()
            }
        };
        Ok(Self {
            state: RwLock::new(state),
            path,
        })
    }

    fn load(path: &Path) -> Result<StoreState, StoreError> {
        let mut file = std::fs::File::open(path).map_err(io_err)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).map_err(io_err)?;

        if bytes.len() < 8 || &bytes[..4] != MAGIC {
            return Err(StoreError::Integrity {
                message: format!("store file {} has bad header", path.display()),
            });
        }
        let stored_crc = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let payload = &bytes[8..];
        let actual_crc = crc32fast::hash(payload);
        if stored_crc != actual_crc {
            return Err(StoreError::Integrity {
                message: format!(
                    "store file {} checksum mismatch (stored {stored_crc:#x}, actual {actual_crc:#x})",
                    path.display()
                ),
            });
        }
        bincode::deserialize(payload).map_err(|e| StoreError::Integrity {
            message: format!("store file {} undecodable: {e}", path.display()),
        })
    }

    /// Serialize `state` and atomically replace the store file.
    fn persist(&self, state: &StoreState) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let payload = bincode::serialize(state).map_err(|e| StoreError::Io {
            message: format!("serialize store state: {e}"),
        })?;
        let mut bytes = Vec::with_capacity(payload.len() + 8);
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        bytes.extend_from_slice(&payload);

        let temp_path = self.path.with_extension("tmp");
        let mut file = std::fs::File::create(&temp_path).map_err(io_err)?;
        file.write_all(&bytes).map_err(io_err)?;
        // Durable flush before the rename makes the swap crash-safe.
        file.sync_all().map_err(io_err)?;
        std::fs::rename(&temp_path, &self.path).map_err(|e| {
            warn!(path = %self.path.display(), error = %e, "Store file rename failed");
            io_err(e)
        })?;
        Ok(())
    }
}

fn io_err(e: std::io::Error) -> StoreError {
    StoreError::Io {
        message: e.to_string(),
    }
}

impl Store for FileStore {
    fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut state = self.state.write();
        let mut staged = state.clone();
        staged.apply(&batch)?;
        // Persist the staged state first; memory is swapped only after the
        // bytes are durable, so a failed write leaves the old state intact.
        self.persist(&staged)?;
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
        let mut state = self.state.write();
        let mut staged = state.clone();
        let removed = staged.prune_snapshots(partition, retention);
        if removed > 0 {
            self.persist(&staged)?;
            *state = staged;
        }
        Ok(removed)
    }
}
