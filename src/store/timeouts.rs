//! Bounded timeouts for store operations.
//!
//! Every poller call is a non-blocking network call with a bounded timeout; a
//! hung query must never block the next enforcement tick.

use std::time::Duration;
use tokio::time::timeout;

use super::errors::{StoreError, StoreResult};

/// Default timeout for store queries (5 seconds)
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for sweep-wide operations (30 seconds)
pub const SWEEP_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Execute a store operation with a timeout. A timeout maps to the transient
/// error class, so enforcement loops retry-later instead of failing.
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> StoreResult<T>
where
    F: std::future::Future<Output = StoreResult<T>>,
{
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(duration)),
    }
}

/// Execute a store operation with the default query timeout.
pub async fn with_default_timeout<F, T>(future: F) -> StoreResult<T>
where
    F: std::future::Future<Output = StoreResult<T>>,
{
    with_timeout(DEFAULT_QUERY_TIMEOUT, future).await
}
