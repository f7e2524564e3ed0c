//! Bounded execution of store operations.
//!
//! Every store call on the locking and checking paths runs under an explicit
//! time budget. Temporary backend failures are retried with exponential
//! backoff until the budget runs out; permanent failures end the operation
//! immediately. A call that completes after its deadline counts as timed out,
//! since the caller cannot assume anything it observed is still current.

use crate::core::error::{BackendError, LockFailure, LockResult, LockingError};
use crate::core::time::TimestampProvider;
use std::time::Duration;

/// Initial backoff between retries.
pub const BACKOFF_BASE: Duration = Duration::from_millis(50);

/// Maximum backoff between retries.
pub const BACKOFF_MAX: Duration = Duration::from_secs(2);

/// Run `op` against store `store`, retrying temporary failures until
/// `max_time` has elapsed.
pub fn execute<T, F>(
    operation: &str,
    store: &str,
    max_time: Duration,
    times: &dyn TimestampProvider,
    mut op: F,
) -> LockResult<T>
where
    F: FnMut() -> Result<T, BackendError>,
{
    let started = times.now();
    let deadline = started.plus(max_time);
    let mut backoff = BACKOFF_BASE;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let result = op();
        let now = times.now();

        match result {
            Ok(value) if !deadline.is_before(now) => return Ok(value),
            Ok(_) => {
                tracing::warn!(
                    operation,
                    store,
                    elapsed = ?now.saturating_duration_since(started),
                    "store operation finished after its deadline"
                );
                return Err(timeout(operation, max_time));
            }
            Err(err) if err.is_temporary() => {
                if !now.plus(backoff).is_before(deadline) {
                    tracing::warn!(operation, store, attempt, error = %err, "giving up on store operation");
                    return Err(timeout(operation, max_time));
                }
                tracing::debug!(operation, store, attempt, error = %err, ?backoff, "retrying store operation");
                times.sleep_for(backoff);
                backoff = (backoff * 2).min(BACKOFF_MAX);
            }
            Err(err) => return Err(LockingError::backend(store, err)),
        }
    }
}

fn timeout(operation: &str, budget: Duration) -> LockingError {
    LockingError::temporary(LockFailure::Timeout {
        operation: operation.to_string(),
        budget,
    })
}
