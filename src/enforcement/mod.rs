//! Deadline, bot, and sweep enforcement.
//!
//! Three uncoordinated actor kinds drive stalled games forward: a per-game
//! client poller, a per-game bot poller, and the scheduled sweep. All three
//! converge on the same claim-guarded default actions, so any mix of them
//! running at once still applies each default exactly once.

pub mod bot;
pub mod deadline;
pub mod sweep;

pub use bot::{BotEnforcer, BotTickOutcome};
pub use deadline::{DeadlineEnforcer, EnforcementOutcome};
pub use sweep::{SweepJob, SweepOutcome, SweepReport};

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::lifecycle::LifecycleError;
use crate::store::{GameId, GameStore, RoundStatus};

/// Random spread added to each poll wait so a fleet of pollers started
/// together does not tick in lockstep against the same rows.
fn jitter(max_ms: u64) -> Duration {
    Duration::from_millis(rand::rng().random_range(0..max_ms.max(1)))
}

fn log_tick_error(context: &str, game_id: GameId, err: &LifecycleError) {
    if err.is_financial() {
        log::error!("{context}: game {game_id}: {err}");
    } else {
        match err {
            LifecycleError::Store(e) if e.is_transient() => {
                log::warn!("{context}: game {game_id}: retry next tick: {e}");
            }
            other => log::warn!("{context}: game {game_id}: {other}"),
        }
    }
}

/// Spawn the per-game deadline poller. Ticks on the poll interval (with
/// jitter) and wakes early on change-feed events; exits when the game reaches
/// `session_ended`.
pub fn spawn_deadline_poller<S: GameStore + 'static>(
    enforcer: Arc<DeadlineEnforcer<S>>,
    game_id: GameId,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut events = enforcer.store().subscribe(game_id);
        loop {
            let wait = enforcer.config().poll_interval + jitter(500);
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                recv = events.recv() => match recv {
                    Ok(_) => {}
                    // Lagging just means we fall back to this tick's poll.
                    Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => {
                        events = enforcer.store().subscribe(game_id);
                    }
                },
            }
            match enforcer.enforce_game(game_id).await {
                Ok(EnforcementOutcome::GameFinished) => {
                    log::debug!("poller: game {game_id} finished, stopping");
                    break;
                }
                Ok(_) => {}
                Err(e) => log_tick_error("poller", game_id, &e),
            }
        }
    })
}

/// Spawn the per-game bot poller. Exits when the game reaches
/// `session_ended`.
pub fn spawn_bot_poller<S: GameStore + 'static>(
    enforcer: Arc<BotEnforcer<S>>,
    game_id: GameId,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut events = enforcer.store().subscribe(game_id);
        loop {
            let wait = enforcer.config().bot_poll_interval + jitter(300);
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                recv = events.recv() => match recv {
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => {
                        events = enforcer.store().subscribe(game_id);
                    }
                },
            }

            match enforcer.store().get_game(game_id).await {
                Ok(game) if game.status == crate::store::GameStatus::SessionEnded => break,
                Ok(_) => {}
                Err(e) => {
                    log::warn!("bot poller: game {game_id}: {e}");
                    continue;
                }
            }
            if let Err(e) = enforcer.tick(game_id).await {
                log_tick_error("bot poller", game_id, &e);
            }

            // Keep the attempted-turn memo bounded to the active round.
            match enforcer.store().latest_round(game_id).await {
                Ok(round) => enforcer.forget_except(
                    round
                        .filter(|r| r.status == RoundStatus::Betting)
                        .map(|r| r.id),
                ),
                Err(_) => {}
            }
        }
    })
}

/// Spawn the scheduled sweep at a fixed period. Runs until aborted.
pub fn spawn_sweep<S: GameStore + 'static>(
    job: Arc<SweepJob<S>>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = job.run_once().await {
                log::error!("sweep: pass failed: {e}");
            }
        }
    })
}
