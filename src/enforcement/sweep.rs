//! Scheduled safety-net sweep.
//!
//! Clients poll only the games they watch; a game everyone abandoned would
//! stall forever without this job. It scans every unpaused game in an active
//! status, pre-filters on the listed row (plausibly expired deadline or past
//! the staleness window) before paying for full enforcement, and runs the
//! same deadline enforcement a client would. Per-game failures are recorded
//! and the scan continues; one broken game must not starve the rest.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::claim::swallow_transient;
use crate::config::CoordinationConfig;
use crate::lifecycle::LifecycleError;
use crate::store::timeouts::SWEEP_OPERATION_TIMEOUT;
use crate::store::{Game, GameId, GameStatus, GameStore, StoreError};

use super::deadline::{DeadlineEnforcer, EnforcementOutcome};

/// Per-game outcome of one sweep pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepOutcome {
    /// Skipped by the pre-filter or found with nothing due.
    NoActionNeeded,
    /// Default actions this sweep applied, in order.
    Actions(Vec<String>),
    /// The game reached `session_ended`.
    Finished,
    /// Enforcement failed or timed out for this game; scan continued.
    Failed(String),
}

/// What one full sweep pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Per-game outcomes, in scan order.
    pub outcomes: Vec<(GameId, SweepOutcome)>,
    /// Wall time of the whole pass.
    pub duration: Duration,
}

impl SweepReport {
    pub fn scanned(&self) -> usize {
        self.outcomes.len()
    }

    pub fn enforced(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, SweepOutcome::Actions(_)))
            .count()
    }

    pub fn finished(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, SweepOutcome::Finished))
            .count()
    }

    pub fn failures(&self) -> Vec<(GameId, &str)> {
        self.outcomes
            .iter()
            .filter_map(|(id, o)| match o {
                SweepOutcome::Failed(reason) => Some((*id, reason.as_str())),
                _ => None,
            })
            .collect()
    }

    pub fn had_failures(&self) -> bool {
        self.outcomes
            .iter()
            .any(|(_, o)| matches!(o, SweepOutcome::Failed(_)))
    }
}

/// Scheduled sweep over all enforceable games.
pub struct SweepJob<S: GameStore> {
    enforcer: Arc<DeadlineEnforcer<S>>,
}

impl<S: GameStore + 'static> SweepJob<S> {
    pub fn new(enforcer: Arc<DeadlineEnforcer<S>>) -> Self {
        Self { enforcer }
    }

    /// Whether the listed row alone suggests something could be due. Avoids a
    /// re-read plus round lookup for the common nothing-to-do game.
    fn plausibly_due(game: &Game, config: &CoordinationConfig) -> bool {
        let now = Utc::now();
        match game.status {
            // The per-turn deadline lives on the round; the listed row cannot
            // rule it out.
            GameStatus::InProgress => true,
            GameStatus::GameOver => game
                .game_over_at
                .is_none_or(|at| now >= at + chrono::Duration::seconds(config.game_over_display_secs)),
            GameStatus::Configuring | GameStatus::GameSelection | GameStatus::AnteDecision => {
                match game.active_deadline() {
                    Some(deadline) => now >= deadline,
                    None => now - game.updated_at >= chrono::Duration::seconds(config.stale_game_secs),
                }
            }
            GameStatus::DealerSelection | GameStatus::Waiting => {
                now - game.updated_at >= chrono::Duration::seconds(config.stale_game_secs)
            }
            GameStatus::SessionEnded => false,
        }
    }

    /// One full pass. Transient listing failures skip the pass entirely
    /// (empty report); per-game failures are collected in the report.
    pub async fn run_once(&self) -> Result<SweepReport, StoreError> {
        let started = Instant::now();
        let listed = swallow_transient(
            "sweep: list games",
            self.enforcer.store().list_enforceable_games().await,
        )?;
        let Some(games) = listed else {
            return Ok(SweepReport::default());
        };

        let mut report = SweepReport::default();
        for game in games {
            if !Self::plausibly_due(&game, self.enforcer.config()) {
                report.outcomes.push((game.id, SweepOutcome::NoActionNeeded));
                continue;
            }
            let enforced = tokio::time::timeout(
                SWEEP_OPERATION_TIMEOUT,
                self.enforcer.enforce_game(game.id),
            )
            .await;
            let outcome = match enforced {
                Ok(Ok(EnforcementOutcome::Actions(actions))) => {
                    log::info!("sweep: game {} enforced: {}", game.id, actions.join("; "));
                    SweepOutcome::Actions(actions)
                }
                Ok(Ok(EnforcementOutcome::GameFinished)) => SweepOutcome::Finished,
                Ok(Ok(EnforcementOutcome::NoActionNeeded)) => SweepOutcome::NoActionNeeded,
                Ok(Err(e)) => {
                    // Financial effect failures are already logged loudly at
                    // the settlement site; everything else is a per-game skip.
                    if !matches!(e, LifecycleError::FinancialEffect { .. }) {
                        log::warn!("sweep: game {} skipped: {e}", game.id);
                    }
                    SweepOutcome::Failed(e.to_string())
                }
                Err(_elapsed) => {
                    log::warn!(
                        "sweep: game {} enforcement exceeded {SWEEP_OPERATION_TIMEOUT:?}",
                        game.id
                    );
                    SweepOutcome::Failed("enforcement timed out".to_string())
                }
            };
            report.outcomes.push((game.id, outcome));
        }

        report.duration = started.elapsed();
        log::info!(
            "sweep: scanned {}, enforced {}, finished {}, failures {} in {:?}",
            report.scanned(),
            report.enforced(),
            report.finished(),
            report.failures().len(),
            report.duration
        );
        Ok(report)
    }
}
