//! Lifecycle error types.

use thiserror::Error;

use crate::store::{GameId, StoreError};

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A start/settle attempt was abandoned before any claim was attempted.
    /// Not a fault; the caller simply stops.
    #[error("Precondition not met: {0}")]
    PreconditionNotMet(String),

    /// A chip movement failed after the settlement claim already succeeded.
    /// The round is `completed` and cannot be re-claimed, so this must be
    /// flagged for manual reconciliation rather than retried blindly.
    #[error(
        "Financial effect failed after settlement claim (game {game_id}, hand {hand_number}): {source}"
    )]
    FinancialEffect {
        game_id: GameId,
        hand_number: i32,
        #[source]
        source: StoreError,
    },
}

impl LifecycleError {
    /// The one error class that must stand out in logs and telemetry.
    pub fn is_financial(&self) -> bool {
        matches!(self, LifecycleError::FinancialEffect { .. })
    }
}

/// Result type for lifecycle operations
pub type LifecycleResult<T> = Result<T, LifecycleError>;
