//! # Transient-Error Retry
//!
//! The store never retries internally; callers wrap operations that may hit
//! transient I/O in [`retry_transient`]. Policy: 3 attempts with delays of
//! 50, 200, and 800 ms. Non-transient errors propagate immediately.

use std::time::Duration;
use tracing::warn;
use warden_types::StoreError;

/// Backoff schedule between attempts.
const DELAYS: [Duration; 3] = [
    Duration::from_millis(50),
    Duration::from_millis(200),
    Duration::from_millis(800),
];

/// Run `op`, retrying on transient errors per the fixed schedule.
///
/// `op_name` appears in logs and in the final error.
pub fn retry_transient<T>(
    op_name: &str,
    mut op: impl FnMut() -> Result<T, StoreError>,
) -> Result<T, StoreError> {
    for (attempt, delay) in DELAYS.iter().enumerate() {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() => {
                warn!(
                    operation = op_name,
                    attempt = attempt + 1,
                    error = %e,
                    "Transient store error, backing off"
                );
                std::thread::sleep(*delay);
            }
            Err(e) => return Err(e),
        }
    }
    // Final attempt after the last delay; its error is the caller's.
    op()
}
