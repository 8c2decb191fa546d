//! Deadline enforcement.
//!
//! Runs identically as a per-game client poller and as the scheduled sweep
//! over all active games. Each tick reads the game (and, in play, the active
//! round), and if the phase deadline has elapsed applies exactly one default
//! action through the transition claim protocol. The claim that clears the
//! deadline is taken first, so a client and the sweep racing on the same
//! expired deadline cannot both apply the default; the winner then performs
//! the per-player writes.

use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::claim::{ClaimOutcome, retry_transient};
use crate::config::CoordinationConfig;
use crate::lifecycle::{
    LifecycleError, LifecycleResult, RoundOrchestrator, StartOutcome, evaluate,
    next_seat_clockwise,
};
use crate::store::{
    AnteDecision, Game, GameEvent, GameGuard, GameId, GamePatch, GameStatus, GameStore,
    PlayerPatch, RoundPatch, RoundStatus,
};

/// Default recorded for a player whose turn timer elapsed.
const DEFAULT_TURN_DECISION: &str = "fold";

/// What an enforcement tick did for one game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnforcementOutcome {
    /// No deadline was due (or the game is paused).
    NoActionNeeded,
    /// Default actions this actor applied, in order.
    Actions(Vec<String>),
    /// The game reached `session_ended`; pollers can stop.
    GameFinished,
}

/// Deadline enforcement loop body
pub struct DeadlineEnforcer<S: GameStore> {
    store: Arc<S>,
    orchestrator: Arc<RoundOrchestrator<S>>,
    config: CoordinationConfig,
}

impl<S: GameStore + 'static> DeadlineEnforcer<S> {
    pub fn new(
        store: Arc<S>,
        orchestrator: Arc<RoundOrchestrator<S>>,
        config: CoordinationConfig,
    ) -> Self {
        Self {
            store,
            orchestrator,
            config,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &CoordinationConfig {
        &self.config
    }

    /// One enforcement tick for one game.
    pub async fn enforce_game(&self, game_id: GameId) -> LifecycleResult<EnforcementOutcome> {
        let store = &self.store;
        let game = retry_transient("enforce: read game", || {
            let store = store.clone();
            async move { store.get_game(game_id).await }
        })
        .await?;

        if game.is_paused {
            return Ok(EnforcementOutcome::NoActionNeeded);
        }

        match game.status {
            GameStatus::Configuring => self.enforce_config(&game).await,
            GameStatus::GameSelection => self.enforce_selection(&game).await,
            GameStatus::AnteDecision => self.enforce_ante(&game).await,
            GameStatus::InProgress => self.enforce_turn(&game).await,
            GameStatus::GameOver => self.enforce_game_over(&game).await,
            GameStatus::DealerSelection | GameStatus::Waiting => self.enforce_staleness(&game).await,
            GameStatus::SessionEnded => Ok(EnforcementOutcome::GameFinished),
        }
    }

    /// `configuring` past its deadline: force the pending configuration to
    /// defaults and open the ante phase.
    async fn enforce_config(&self, game: &Game) -> LifecycleResult<EnforcementOutcome> {
        let Some(deadline) = game.config_deadline else {
            return Ok(EnforcementOutcome::NoActionNeeded);
        };
        let now = Utc::now();
        if now < deadline {
            return Ok(EnforcementOutcome::NoActionNeeded);
        }

        let guard = GameGuard::status(GameStatus::Configuring).with_config_deadline(Some(deadline));
        let patch = GamePatch {
            status: Some(GameStatus::AnteDecision),
            config_deadline: Some(None),
            ante_decision_deadline: Some(Some(
                now + Duration::seconds(self.config.ante_decision_secs),
            )),
            ..GamePatch::default()
        };
        let rows = self
            .store
            .claim_game_transition(game.id, &guard, &patch)
            .await?;
        if !ClaimOutcome::from_rows(rows).is_claimed() {
            return Ok(EnforcementOutcome::NoActionNeeded);
        }

        // Fresh ante phase: everyone is undecided again.
        for player in self.store.players(game.id).await? {
            self.store
                .update_player(
                    player.id,
                    &PlayerPatch {
                        ante_decision: Some(None),
                        ..PlayerPatch::default()
                    },
                )
                .await?;
        }
        self.store
            .publish(
                game.id,
                &GameEvent::StatusChanged {
                    status: GameStatus::AnteDecision,
                },
            )
            .await?;
        log::info!("enforce: game {} configuration defaulted", game.id);
        Ok(EnforcementOutcome::Actions(vec![
            "config_defaulted".to_string()
        ]))
    }

    /// `game_selection` past its deadline: consume the deadline, default the
    /// dealer's selection, and try to start the hand.
    async fn enforce_selection(&self, game: &Game) -> LifecycleResult<EnforcementOutcome> {
        let Some(deadline) = game.config_deadline else {
            return Ok(EnforcementOutcome::NoActionNeeded);
        };
        let now = Utc::now();
        if now < deadline {
            return Ok(EnforcementOutcome::NoActionNeeded);
        }

        let guard =
            GameGuard::status(GameStatus::GameSelection).with_config_deadline(Some(deadline));
        let patch = GamePatch {
            config_deadline: Some(None),
            ..GamePatch::default()
        };
        let rows = self
            .store
            .claim_game_transition(game.id, &guard, &patch)
            .await?;
        if !ClaimOutcome::from_rows(rows).is_claimed() {
            return Ok(EnforcementOutcome::NoActionNeeded);
        }

        let mut actions = vec!["selection_defaulted".to_string()];
        match self.orchestrator.start_hand(game.id).await {
            Ok(StartOutcome::Started { hand_number, .. }) => {
                actions.push(format!("hand_started:{hand_number}"));
            }
            Ok(StartOutcome::LostRace) => {}
            Err(LifecycleError::PreconditionNotMet(reason)) => {
                // Not enough players to deal: park the game for the stale
                // sweep rather than spinning on the selection phase.
                log::info!("enforce: game {} cannot start hand: {reason}", game.id);
                let guard = GameGuard::status(GameStatus::GameSelection);
                let patch = GamePatch {
                    status: Some(GameStatus::Waiting),
                    ..GamePatch::default()
                };
                self.store
                    .claim_game_transition(game.id, &guard, &patch)
                    .await?;
                actions.push("waiting_for_players".to_string());
            }
            Err(e) => return Err(e),
        }
        Ok(EnforcementOutcome::Actions(actions))
    }

    /// `ante_decision` past its deadline: default every undecided player and
    /// advance to game selection.
    async fn enforce_ante(&self, game: &Game) -> LifecycleResult<EnforcementOutcome> {
        let Some(deadline) = game.ante_decision_deadline else {
            return Ok(EnforcementOutcome::NoActionNeeded);
        };
        let now = Utc::now();
        if now < deadline {
            return Ok(EnforcementOutcome::NoActionNeeded);
        }

        let guard =
            GameGuard::status(GameStatus::AnteDecision).with_ante_deadline(Some(deadline));
        let patch = GamePatch {
            status: Some(GameStatus::GameSelection),
            ante_decision_deadline: Some(None),
            config_deadline: Some(Some(
                now + Duration::seconds(self.config.config_decision_secs),
            )),
            ..GamePatch::default()
        };
        let rows = self
            .store
            .claim_game_transition(game.id, &guard, &patch)
            .await?;
        if !ClaimOutcome::from_rows(rows).is_claimed() {
            return Ok(EnforcementOutcome::NoActionNeeded);
        }

        let mut actions = Vec::new();
        for player in self.store.players(game.id).await? {
            if !player.is_active() && !player.has_auto_ante() {
                continue;
            }
            if player.ante_decision.is_some() {
                continue;
            }
            let (decision, patch) = if player.has_auto_ante() {
                (
                    AnteDecision::AnteUp,
                    PlayerPatch {
                        ante_decision: Some(Some(AnteDecision::AnteUp)),
                        sitting_out: Some(false),
                        ..PlayerPatch::default()
                    },
                )
            } else {
                (
                    AnteDecision::SitOut,
                    PlayerPatch {
                        ante_decision: Some(Some(AnteDecision::SitOut)),
                        ..PlayerPatch::default()
                    },
                )
            };
            self.store.update_player(player.id, &patch).await?;
            self.store
                .publish(game.id, &GameEvent::PlayerUpdated { player_id: player.id })
                .await?;
            actions.push(format!("ante_defaulted:{}:{decision}", player.id));
        }
        self.store
            .publish(
                game.id,
                &GameEvent::StatusChanged {
                    status: GameStatus::GameSelection,
                },
            )
            .await?;
        log::info!(
            "enforce: game {} ante deadline enforced ({} defaults)",
            game.id,
            actions.len()
        );
        Ok(EnforcementOutcome::Actions(actions))
    }

    /// `in_progress` with an elapsed per-turn deadline: fold the player on
    /// turn and advance the turn pointer. A hand with no deadline left to
    /// enforce (everyone folded out, or the round never armed one) has no
    /// client obligated to settle it, so it falls to the staleness check.
    async fn enforce_turn(&self, game: &Game) -> LifecycleResult<EnforcementOutcome> {
        let Some(round) = self.store.latest_round(game.id).await? else {
            return self.enforce_staleness(game).await;
        };
        if round.status != RoundStatus::Betting {
            return self.enforce_staleness(game).await;
        }
        let Some(deadline) = round.decision_deadline else {
            return self.enforce_staleness(game).await;
        };
        let now = Utc::now();
        if now < deadline {
            return Ok(EnforcementOutcome::NoActionNeeded);
        }

        let players = self.store.players(game.id).await?;
        let on_turn = round
            .turn_position
            .and_then(|seat| players.iter().find(|p| p.position == Some(seat)));

        // Remaining undecided seats, excluding the one being folded.
        let mut waiting_seats: Vec<i32> = players
            .iter()
            .filter(|p| {
                p.is_active()
                    && p.current_decision.is_none()
                    && p.position != round.turn_position
            })
            .filter_map(|p| p.position)
            .collect();
        waiting_seats.sort_unstable();
        let next_turn = round
            .turn_position
            .and_then(|seat| next_seat_clockwise(seat, &waiting_seats));

        let patch = RoundPatch {
            turn_position: Some(next_turn),
            decision_deadline: Some(
                next_turn.map(|_| now + Duration::seconds(self.config.turn_decision_secs)),
            ),
            ..RoundPatch::default()
        };
        let rows = self
            .store
            .claim_round_turn(round.id, Some(deadline), round.turn_position, &patch)
            .await?;
        if !ClaimOutcome::from_rows(rows).is_claimed() {
            return Ok(EnforcementOutcome::NoActionNeeded);
        }

        let mut actions = Vec::new();
        if let Some(player) = on_turn {
            self.store
                .update_player(
                    player.id,
                    &PlayerPatch {
                        current_decision: Some(Some(DEFAULT_TURN_DECISION.to_string())),
                        auto_fold: Some(true),
                        ..PlayerPatch::default()
                    },
                )
                .await?;
            self.store
                .publish(game.id, &GameEvent::DecisionRecorded { player_id: player.id })
                .await?;
            log::info!(
                "enforce: game {} hand {} folded player {} on timeout",
                game.id,
                round.hand_number,
                player.id
            );
            actions.push(format!("turn_defaulted:{}", player.id));
        } else {
            actions.push("turn_deadline_cleared".to_string());
        }
        Ok(EnforcementOutcome::Actions(actions))
    }

    /// `game_over` past the display window: evaluate player flags, rotate
    /// the dealer, and open the next hand's ante phase (or end the session).
    async fn enforce_game_over(&self, game: &Game) -> LifecycleResult<EnforcementOutcome> {
        let Some(over_at) = game.game_over_at else {
            return Ok(EnforcementOutcome::NoActionNeeded);
        };
        let now = Utc::now();
        if now < over_at + Duration::seconds(self.config.game_over_display_secs) {
            return Ok(EnforcementOutcome::NoActionNeeded);
        }

        let players = self.store.players(game.id).await?;
        let (patches, summary) = evaluate(&players, game.dealer_position, game.allow_bot_dealers);

        let guard = GameGuard::status(GameStatus::GameOver).with_current_round(game.current_round);
        if summary.active_players >= self.config.min_players && summary.next_dealer.is_some() {
            let next_dealer = summary.next_dealer.unwrap_or(game.dealer_position);
            let patch = GamePatch {
                status: Some(GameStatus::AnteDecision),
                dealer_position: Some(next_dealer),
                ante_decision_deadline: Some(Some(
                    now + Duration::seconds(self.config.ante_decision_secs),
                )),
                game_over_at: Some(None),
                ..GamePatch::default()
            };
            let rows = self
                .store
                .claim_game_transition(game.id, &guard, &patch)
                .await?;
            if !ClaimOutcome::from_rows(rows).is_claimed() {
                return Ok(EnforcementOutcome::NoActionNeeded);
            }
            for (player_id, player_patch) in &patches {
                self.store.update_player(*player_id, player_patch).await?;
            }
            self.store
                .publish(
                    game.id,
                    &GameEvent::StatusChanged {
                        status: GameStatus::AnteDecision,
                    },
                )
                .await?;
            log::info!(
                "enforce: game {} ready for next hand, dealer seat {next_dealer}",
                game.id
            );
            Ok(EnforcementOutcome::Actions(vec![
                "next_hand_ready".to_string(),
                format!("dealer:{next_dealer}"),
            ]))
        } else {
            let patch = GamePatch {
                status: Some(GameStatus::SessionEnded),
                game_over_at: Some(None),
                ..GamePatch::default()
            };
            let rows = self
                .store
                .claim_game_transition(game.id, &guard, &patch)
                .await?;
            if !ClaimOutcome::from_rows(rows).is_claimed() {
                return Ok(EnforcementOutcome::NoActionNeeded);
            }
            for (player_id, player_patch) in &patches {
                self.store.update_player(*player_id, player_patch).await?;
            }
            self.store
                .publish(
                    game.id,
                    &GameEvent::StatusChanged {
                        status: GameStatus::SessionEnded,
                    },
                )
                .await?;
            log::info!("enforce: game {} session ended", game.id);
            Ok(EnforcementOutcome::GameFinished)
        }
    }

    /// Liveness cleanup for games stuck without any deadline: no update in
    /// the staleness window means the seating is abandoned.
    async fn enforce_staleness(&self, game: &Game) -> LifecycleResult<EnforcementOutcome> {
        let now = Utc::now();
        if now - game.updated_at < Duration::seconds(self.config.stale_game_secs) {
            return Ok(EnforcementOutcome::NoActionNeeded);
        }
        let guard = GameGuard::status(game.status);
        let patch = GamePatch {
            status: Some(GameStatus::SessionEnded),
            ..GamePatch::default()
        };
        let rows = self
            .store
            .claim_game_transition(game.id, &guard, &patch)
            .await?;
        if !ClaimOutcome::from_rows(rows).is_claimed() {
            return Ok(EnforcementOutcome::NoActionNeeded);
        }
        log::info!(
            "enforce: game {} archived as stale ({})",
            game.id,
            game.status
        );
        Ok(EnforcementOutcome::GameFinished)
    }
}
