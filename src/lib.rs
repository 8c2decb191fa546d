//! # Round Coordinator
//!
//! Round coordination and deadline enforcement for a multiplayer table game
//! whose state lives in a shared relational store. Many uncoordinated actors
//! touch the same game at once: each player's client polls the games it
//! watches, bot pollers drive seats without a human behind them, and a
//! scheduled sweep covers games nobody is watching. Any of them may notice a
//! stalled phase and act on it.
//!
//! The store offers no locks and no leader. Every at-most-once transition is
//! instead a *transition claim*: a conditional update that writes new values
//! only while the guard columns still hold the values the actor observed.
//! Whoever's update modifies a row owns that transition's side effects;
//! everyone else lost the race and silently stands down.
//!
//! ## Core Modules
//!
//! - [`store`]: the `GameStore` repository trait, its PostgreSQL and
//!   in-memory implementations, and the per-game change feed
//! - [`claim`]: claim outcomes and the transient-failure retry policy
//! - [`lifecycle`]: hand start, settlement, and end-of-hand evaluation
//! - [`enforcement`]: deadline defaults, bot fallback, and the sweep
//! - [`variant`]: seams toward the per-variant rule engines
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use round_coordinator::config::CoordinationConfig;
//! use round_coordinator::enforcement::{DeadlineEnforcer, spawn_deadline_poller};
//! use round_coordinator::lifecycle::RoundOrchestrator;
//! use round_coordinator::store::MemoryGameStore;
//!
//! # async fn run() {
//! let store = Arc::new(MemoryGameStore::new());
//! let config = CoordinationConfig::from_env();
//! let orchestrator = Arc::new(RoundOrchestrator::new(store.clone(), config.clone()));
//! let enforcer = Arc::new(DeadlineEnforcer::new(store, orchestrator, config));
//! let handle = spawn_deadline_poller(enforcer, 42);
//! # handle.abort();
//! # }
//! ```

pub mod claim;
pub mod config;
pub mod enforcement;
pub mod lifecycle;
pub mod store;
pub mod variant;

pub use claim::ClaimOutcome;
pub use config::CoordinationConfig;
pub use enforcement::{
    BotEnforcer, BotTickOutcome, DeadlineEnforcer, EnforcementOutcome, SweepJob, SweepOutcome,
    SweepReport,
};
pub use lifecycle::{
    LifecycleError, LifecycleResult, RoundOrchestrator, SettleOutcome, StartOutcome,
};
pub use store::{GameStore, MemoryGameStore, PgGameStore, StoreError, StoreResult};
pub use variant::{BotBrain, Showdown, ShowdownEvaluator, TableView};
