//! Transition claim protocol.
//!
//! Every at-most-once transition in the engine is a conditional update
//! against the store: write new values only while the guard columns still
//! hold the values the caller observed. The store reports how many rows were
//! modified; zero means another actor already transitioned the state (or the
//! precondition never held), one means the caller now exclusively owns the
//! transition's side effects.
//!
//! A lost race is expected and silent, never retried. Transient backend
//! failures get a small bounded number of retries with linear backoff, then
//! the caller waits for its next poll tick.

use std::future::Future;
use std::time::Duration;

use crate::store::StoreResult;

/// Outcome of a transition claim attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This actor won the conditional update and must perform the
    /// transition's side effects synchronously.
    Claimed,
    /// Another actor already transitioned the guarded state. Re-read and
    /// no-op (or retry with a fresh guard), but perform no effects.
    LostRace,
}

impl ClaimOutcome {
    /// Interpret the row count reported by a conditional update.
    pub fn from_rows(rows_affected: u64) -> Self {
        if rows_affected > 0 {
            ClaimOutcome::Claimed
        } else {
            ClaimOutcome::LostRace
        }
    }

    pub fn is_claimed(&self) -> bool {
        matches!(self, ClaimOutcome::Claimed)
    }
}

/// Maximum retries for transient store failures.
pub const MAX_TRANSIENT_RETRIES: u32 = 3;

/// Base delay between retries; attempt N waits N times this.
pub const RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Run a store operation, retrying transient failures with linear backoff.
/// Non-transient errors (including duplicate keys) surface immediately.
pub async fn retry_transient<T, F, Fut>(operation: &str, mut f: F) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < MAX_TRANSIENT_RETRIES => {
                attempt += 1;
                log::warn!("{operation}: transient store error (attempt {attempt}): {e}");
                tokio::time::sleep(RETRY_BACKOFF * attempt).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Convenience: map a `StoreError` into "drop until next tick" semantics.
/// Transient errors are logged and swallowed; anything else propagates.
pub fn swallow_transient<T>(operation: &str, result: StoreResult<T>) -> StoreResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_transient() => {
            log::warn!("{operation}: dropped until next tick: {e}");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn outcome_from_row_counts() {
        assert_eq!(ClaimOutcome::from_rows(1), ClaimOutcome::Claimed);
        assert_eq!(ClaimOutcome::from_rows(0), ClaimOutcome::LostRace);
        assert!(ClaimOutcome::from_rows(1).is_claimed());
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_then_succeeds() {
        let attempts = AtomicU32::new(0);
        let result = retry_transient("test", || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(StoreError::Timeout(Duration::from_secs(1)))
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_transient_errors_surface_immediately() {
        let attempts = AtomicU32::new(0);
        let result: StoreResult<()> = retry_transient("test", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::DuplicateKey("k".to_string())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_bounded_retries() {
        let attempts = AtomicU32::new(0);
        let result: StoreResult<()> = retry_transient("test", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::Timeout(Duration::from_secs(1))) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1 + MAX_TRANSIENT_RETRIES);
    }
}
