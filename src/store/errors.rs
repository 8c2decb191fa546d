//! Store error types.

use thiserror::Error;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Row not found
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// Unique-constraint violation on insert. For the per-hand round
    /// constraint this is the final arbiter between racing hand starts and
    /// is treated by callers as a lost race, not a fault.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Operation exceeded its bounded timeout
    #[error("Store operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Serialization error for JSON columns and notification payloads
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether this failure is worth a bounded retry (timeouts, connection
    /// drops, pool exhaustion). Lost races and constraint violations are not
    /// transient and must never be retried blindly.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Timeout(_) => true,
            StoreError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ),
            _ => false,
        }
    }

    /// Whether this is a unique-constraint violation.
    pub fn is_duplicate_key(&self) -> bool {
        match self {
            StoreError::DuplicateKey(_) => true,
            StoreError::Database(sqlx::Error::Database(db)) => db.is_unique_violation(),
            _ => false,
        }
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn timeout_is_transient() {
        assert!(StoreError::Timeout(Duration::from_secs(5)).is_transient());
    }

    #[test]
    fn duplicate_key_is_not_transient() {
        let err = StoreError::DuplicateKey("rounds_dealer_game_hand_key".to_string());
        assert!(!err.is_transient());
        assert!(err.is_duplicate_key());
    }

    #[test]
    fn not_found_is_neither() {
        let err = StoreError::NotFound {
            entity: "game",
            id: 7,
        };
        assert!(!err.is_transient());
        assert!(!err.is_duplicate_key());
        assert!(err.to_string().contains("game 7"));
    }
}
