//! # Partition Writer Lock
//!
//! Single-writer discipline per ledger partition is enforced with an
//! advisory file lock (`flock` on Unix, `LockFile` on Windows via `fs2`).
//! The writer acquires its partition lock at startup and holds it for the
//! process lifetime; a second would-be writer waits up to a timeout, then
//! exits with a clear error naming the owning PID.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};
use warden_types::Partition;

/// How long a second writer waits for the lock before giving up.
const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Initial retry delay; doubles up to 800 ms.
const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Errors from partition locking.
#[derive(Debug, Error)]
pub enum LockError {
    /// Lock file could not be created.
    #[error("Failed to create lock file: {0}")]
    CreateFailed(io::Error),

    /// Another process holds the partition.
    #[error("Partition {partition} already locked by pid {pid:?} ({path})")]
    AlreadyLocked {
        partition: Partition,
        pid: Option<u32>,
        path: PathBuf,
    },

    /// Failed to stamp the lock file with this PID.
    #[error("Failed to write pid to lock file: {0}")]
    WriteFailed(io::Error),
}

/// Exclusive advisory lock on one ledger partition.
///
/// Released on drop (RAII); the file handle is kept open to maintain the
/// lock.
pub struct PartitionLock {
    file: File,
    path: PathBuf,
    partition: Partition,
}

impl PartitionLock {
    /// Acquire the lock for `partition` under `data_dir`, retrying with
    /// exponential backoff up to a bounded timeout.
    pub fn acquire(data_dir: &Path, partition: Partition) -> Result<Self, LockError> {
        Self::acquire_with_timeout(data_dir, partition, DEFAULT_ACQUIRE_TIMEOUT)
    }

    /// Acquire with an explicit timeout.
    pub fn acquire_with_timeout(
        data_dir: &Path,
        partition: Partition,
        timeout: Duration,
    ) -> Result<Self, LockError> {
        std::fs::create_dir_all(data_dir).map_err(LockError::CreateFailed)?;
        let path = data_dir.join(format!("partition-{partition}.lock"));
        let deadline = Instant::now() + timeout;
        let mut retry_delay = INITIAL_RETRY_DELAY;

        loop {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)
                .map_err(LockError::CreateFailed)?;

            match file.try_lock_exclusive() {
                Ok(()) => {
                    let mut lock = Self {
                        file,
                        path: path.clone(),
                        partition,
                    };
                    lock.stamp_pid()?;
                    info!(partition, path = %path.display(), "Partition writer lock acquired");
                    return Ok(lock);
                }
                Err(_) if Instant::now() < deadline => {
                    debug!(partition, delay_ms = retry_delay.as_millis() as u64,
                        "Partition locked, retrying");
                    std::thread::sleep(retry_delay);
                    retry_delay = (retry_delay * 2).min(Duration::from_millis(800));
                }
                Err(_) => {
                    return Err(LockError::AlreadyLocked {
                        partition,
                        pid: read_owner_pid(&path),
                        path,
                    });
                }
            }
        }
    }

    /// Write this process's PID into the lock file so a blocked writer can
    /// name the owner in its error.
    fn stamp_pid(&mut self) -> Result<(), LockError> {
        let pid = std::process::id();
        self.file.set_len(0).map_err(LockError::WriteFailed)?;
        self.file
            .write_all(pid.to_string().as_bytes())
            .map_err(LockError::WriteFailed)?;
        self.file.sync_all().map_err(LockError::WriteFailed)?;
        Ok(())
    }

    /// The partition this lock guards.
    #[must_use]
    pub fn partition(&self) -> Partition {
        self.partition
    }
}

impl Drop for PartitionLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
        // Leftover lock files are harmless; the flock is what matters.
        let _ = std::fs::remove_file(&self.path);
        debug!(partition = self.partition, "Partition writer lock released");
    }
}

fn read_owner_pid(path: &Path) -> Option<u32> {
    let mut contents = String::new();
    File::open(path)
        .ok()?
        .read_to_string(&mut contents)
        .ok()?;
    contents.trim().parse().ok()
}
