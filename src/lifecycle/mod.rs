//! Round lifecycle: hand start, settlement, and end-of-hand player state
//! evaluation.

pub mod errors;
pub mod evaluator;
pub mod orchestrator;

pub use errors::{LifecycleError, LifecycleResult};
pub use evaluator::{
    EvaluationSummary, FlagAction, evaluate, next_hand_action, next_seat_clockwise, rotate_dealer,
};
pub use orchestrator::{RoundOrchestrator, SettleOutcome, StartOutcome};
