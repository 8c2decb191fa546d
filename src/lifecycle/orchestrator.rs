//! Round lifecycle orchestration: hand start and settlement.
//!
//! Both operations are guarded by the transition claim protocol so that any
//! number of racing clients produce exactly one set of side effects. Losing a
//! claim is a normal outcome, reported as `LostRace` and never as an error.

use std::sync::Arc;

use chrono::{Duration, Utc};

use super::errors::{LifecycleError, LifecycleResult};
use crate::claim::{ClaimOutcome, retry_transient};
use crate::config::CoordinationConfig;
use crate::store::{
    AnteDecision, Game, GameEvent, GameGuard, GameId, GamePatch, GameStatus, GameStore, HandResult,
    NewRound, Player, PlayerHandResult, PlayerId, PlayerPatch, Round, RoundPatch,
};
use crate::variant::Showdown;
use crate::lifecycle::evaluator::next_seat_clockwise;

/// Outcome of a hand-start attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// This actor started the hand and performed the side effects.
    Started { round_id: i64, hand_number: i32 },
    /// Another client already started the hand. Not an error; stop.
    LostRace,
}

/// Outcome of a settlement attempt. No `Eq`: the attached `Round` carries
/// the opaque JSON variant state, which is only `PartialEq`.
#[derive(Debug, Clone, PartialEq)]
pub enum SettleOutcome {
    /// This actor settled the hand and applied the financial effects.
    Settled {
        hand_number: i32,
        winner_id: PlayerId,
        amount: i64,
    },
    /// Tie or no decision: the pot was carried forward to a re-ante with the
    /// same dealer; no financial effect.
    CarriedForward { hand_number: i32, pot: i64 },
    /// Another client already settled this hand. The re-read final round is
    /// attached for display purposes only.
    LostRace { completed: Round },
}

/// Round lifecycle orchestrator
pub struct RoundOrchestrator<S: GameStore> {
    store: Arc<S>,
    config: CoordinationConfig,
}

impl<S: GameStore + 'static> RoundOrchestrator<S> {
    pub fn new(store: Arc<S>, config: CoordinationConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Players who will be dealt into the next hand: seated, not sitting
    /// out, and not having declined the ante.
    fn eligible<'p>(players: &'p [Player]) -> Vec<&'p Player> {
        players
            .iter()
            .filter(|p| p.is_active() && p.ante_decision != Some(AnteDecision::SitOut))
            .collect()
    }

    /// Start the next hand: claim the game transition, create the round row,
    /// collect antes, and seat the turn pointer.
    ///
    /// Preconditions are checked before any claim is attempted; a game that
    /// is not awaiting a hand or lacks enough players fails with
    /// `PreconditionNotMet` and performs no writes.
    pub async fn start_hand(&self, game_id: GameId) -> LifecycleResult<StartOutcome> {
        let store = &self.store;
        let game = retry_transient("start_hand: read game", || {
            let store = store.clone();
            async move { store.get_game(game_id).await }
        })
        .await?;

        if !matches!(
            game.status,
            GameStatus::GameSelection | GameStatus::GameOver
        ) {
            return Err(LifecycleError::PreconditionNotMet(format!(
                "game {game_id} is not awaiting a hand (status {})",
                game.status
            )));
        }

        let players = store.players(game_id).await?;
        let eligible = Self::eligible(&players);
        if eligible.len() < self.config.min_players {
            return Err(LifecycleError::PreconditionNotMet(format!(
                "need {} eligible players, have {}",
                self.config.min_players,
                eligible.len()
            )));
        }
        if eligible.len() > self.config.max_players {
            return Err(LifecycleError::PreconditionNotMet(format!(
                "variant seats {} players at most, have {}",
                self.config.max_players,
                eligible.len()
            )));
        }

        let hand_number = game.current_round + 1;
        let now = Utc::now();
        let guard = GameGuard::status(game.status).with_current_round(game.current_round);
        let patch = GamePatch {
            status: Some(GameStatus::InProgress),
            current_round: Some(hand_number),
            total_hands: Some(game.total_hands + 1),
            // The carried pot moves onto the round row.
            pot_amount: Some(0),
            config_deadline: Some(None),
            ante_decision_deadline: Some(None),
            last_round_result: Some(None),
            game_over_at: Some(None),
            is_first_hand: Some(false),
            ..GamePatch::default()
        };
        let rows = store.claim_game_transition(game_id, &guard, &patch).await?;
        if !ClaimOutcome::from_rows(rows).is_claimed() {
            return Ok(StartOutcome::LostRace);
        }

        let ante_total = self.config.ante_amount * eligible.len() as i64;
        let mut eligible_seats: Vec<i32> = eligible.iter().filter_map(|p| p.position).collect();
        eligible_seats.sort_unstable();
        let first_turn = next_seat_clockwise(game.dealer_position, &eligible_seats);

        let new_round = NewRound {
            game_id,
            dealer_game_id: game.dealer_game_id,
            hand_number,
            round_number: 1,
            pot: game.pot_amount + ante_total,
            decision_deadline: Some(now + Duration::seconds(self.config.turn_decision_secs)),
            turn_position: first_turn,
            variant_state: serde_json::Value::Null,
        };
        let round_id = match store.insert_round(&new_round).await {
            Ok(id) => id,
            // The per-hand uniqueness constraint is the final backstop when
            // two actors win separate game-row claims through different
            // guard paths. Identical to losing the race.
            Err(e) if e.is_duplicate_key() => {
                log::info!("start_hand: hand {hand_number} of game {game_id} already created");
                return Ok(StartOutcome::LostRace);
            }
            Err(e) => return Err(e.into()),
        };

        let eligible_ids: Vec<PlayerId> = eligible.iter().map(|p| p.id).collect();
        for player in &players {
            if eligible_ids.contains(&player.id) {
                store.add_chips(player.id, -self.config.ante_amount).await?;
            }
            store
                .update_player(
                    player.id,
                    &PlayerPatch {
                        current_decision: Some(None),
                        ante_decision: Some(None),
                        ..PlayerPatch::default()
                    },
                )
                .await?;
        }

        store
            .publish(game_id, &GameEvent::RoundStarted { hand_number })
            .await?;
        store
            .publish(
                game_id,
                &GameEvent::StatusChanged {
                    status: GameStatus::InProgress,
                },
            )
            .await?;

        log::info!(
            "start_hand: game {game_id} hand {hand_number} started, pot {}, {} players",
            new_round.pot,
            eligible_ids.len()
        );
        Ok(StartOutcome::Started {
            round_id,
            hand_number,
        })
    }

    /// Settle the active hand with a variant showdown outcome.
    ///
    /// The round-row claim decides the single settling actor. Ties and
    /// no-decision hands carry the pot forward to a re-ante with the same
    /// dealer instead of paying anyone.
    pub async fn settle_hand(
        &self,
        game_id: GameId,
        showdown: &Showdown,
    ) -> LifecycleResult<SettleOutcome> {
        let store = &self.store;
        let game = retry_transient("settle_hand: read game", || {
            let store = store.clone();
            async move { store.get_game(game_id).await }
        })
        .await?;
        let round = store
            .latest_round(game_id)
            .await?
            .ok_or_else(|| LifecycleError::PreconditionNotMet(format!("game {game_id} has no round")))?;

        let rows = store.claim_round_completed(round.id).await?;
        if !ClaimOutcome::from_rows(rows).is_claimed() {
            // Loser re-reads the final state for display; zero writes.
            let completed = store.get_round(round.id).await?;
            return Ok(SettleOutcome::LostRace { completed });
        }

        let hand_number = round.hand_number;
        match showdown.winner_id {
            Some(winner_id) => {
                self.pay_out(&game, &round, winner_id, showdown).await?;
                store
                    .publish(game_id, &GameEvent::RoundSettled { hand_number })
                    .await?;
                let amount = self.capped_pot(round.pot);
                Ok(SettleOutcome::Settled {
                    hand_number,
                    winner_id,
                    amount,
                })
            }
            None => {
                self.carry_forward(&game, &round, showdown).await?;
                store
                    .publish(game_id, &GameEvent::RoundSettled { hand_number })
                    .await?;
                Ok(SettleOutcome::CarriedForward {
                    hand_number,
                    pot: round.pot,
                })
            }
        }
    }

    fn capped_pot(&self, pot: i64) -> i64 {
        match self.config.max_pot {
            Some(cap) => pot.min(cap),
            None => pot,
        }
    }

    /// Winner-only financial effects. Chip deltas go through the atomic
    /// increment, which commutes, so a crash mid-way leaves a partial but
    /// re-runnable-by-hand state; the round is already `completed`, so a
    /// failure here is flagged for manual reconciliation instead of retried.
    async fn pay_out(
        &self,
        game: &Game,
        round: &Round,
        winner_id: PlayerId,
        showdown: &Showdown,
    ) -> LifecycleResult<()> {
        let store = &self.store;
        let gain = self.capped_pot(round.pot);
        let mut deltas: Vec<(PlayerId, i64)> = vec![(winner_id, gain)];
        deltas.extend(showdown.payouts.iter().copied());

        let mut financial_failure: Option<LifecycleError> = None;
        for (player_id, delta) in &deltas {
            if let Err(e) = store.add_chips(*player_id, *delta).await {
                log::error!(
                    "settlement: chip increment of {delta} for player {player_id} failed after \
                     claim (game {}, hand {}): {e}; manual reconciliation required",
                    game.id,
                    round.hand_number
                );
                if financial_failure.is_none() {
                    financial_failure = Some(LifecycleError::FinancialEffect {
                        game_id: game.id,
                        hand_number: round.hand_number,
                        source: e,
                    });
                }
            }
        }

        let settlement_key = format!("settlement_{}_{}", game.dealer_game_id, round.hand_number);
        store
            .insert_hand_result(&HandResult {
                game_id: game.id,
                hand_number: round.hand_number,
                winner_id: Some(winner_id),
                amount: gain,
                description: showdown.summary.clone(),
                idempotency_key: settlement_key.clone(),
            })
            .await?;

        // Each row is the player's net over the whole hand: the ante debited
        // at hand start, the pot on win, and any variant payouts. The rows
        // sum to the chips actually moved.
        let players = store.players(game.id).await?;
        for player in players.iter().filter(|p| p.is_active()) {
            let paid_out: i64 = showdown
                .payouts
                .iter()
                .filter(|(id, _)| *id == player.id)
                .map(|(_, delta)| delta)
                .sum();
            let won = if player.id == winner_id { gain } else { 0 };
            let chip_delta = won + paid_out - self.config.ante_amount;
            store
                .insert_player_hand_result(&PlayerHandResult {
                    game_id: game.id,
                    hand_number: round.hand_number,
                    player_id: player.id,
                    chip_delta,
                    chips_after: player.chips,
                    idempotency_key: format!("{settlement_key}_{}", player.id),
                })
                .await?;
        }

        let winner_name = players
            .iter()
            .find(|p| p.id == winner_id)
            .map(|p| p.display_name.clone())
            .unwrap_or_else(|| format!("player {winner_id}"));
        let guard = GameGuard::status(GameStatus::InProgress).with_current_round(game.current_round);
        let patch = GamePatch {
            status: Some(GameStatus::GameOver),
            last_round_result: Some(Some(format!(
                "{winner_name} wins {gain} ({})",
                showdown.summary
            ))),
            game_over_at: Some(Some(Utc::now())),
            pot_amount: Some(0),
            ..GamePatch::default()
        };
        let rows = store.claim_game_transition(game.id, &guard, &patch).await?;
        if rows == 0 {
            // Should be unreachable: nothing else moves a game out of
            // in_progress while its round is still being settled.
            log::warn!(
                "settlement: game {} left in_progress before result write",
                game.id
            );
        }
        store
            .publish(
                game.id,
                &GameEvent::StatusChanged {
                    status: GameStatus::GameOver,
                },
            )
            .await?;

        match financial_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Tie / no-decision: same dealer, re-ante, pot carried on the game row.
    async fn carry_forward(
        &self,
        game: &Game,
        round: &Round,
        showdown: &Showdown,
    ) -> LifecycleResult<()> {
        let store = &self.store;
        let now = Utc::now();
        let guard = GameGuard::status(GameStatus::InProgress).with_current_round(game.current_round);
        let patch = GamePatch {
            status: Some(GameStatus::AnteDecision),
            ante_decision_deadline: Some(Some(
                now + Duration::seconds(self.config.ante_decision_secs),
            )),
            pot_amount: Some(round.pot),
            last_round_result: Some(Some(format!("Pot carried forward ({})", showdown.summary))),
            ..GamePatch::default()
        };
        let rows = store.claim_game_transition(game.id, &guard, &patch).await?;
        if rows > 0 {
            // Re-open the ante question for the carried hand.
            let players = store.players(game.id).await?;
            for player in &players {
                store
                    .update_player(
                        player.id,
                        &PlayerPatch {
                            ante_decision: Some(None),
                            ..PlayerPatch::default()
                        },
                    )
                    .await?;
            }
            store
                .publish(
                    game.id,
                    &GameEvent::StatusChanged {
                        status: GameStatus::AnteDecision,
                    },
                )
                .await?;
        }
        log::info!(
            "settlement: game {} hand {} carried pot {} forward",
            game.id,
            round.hand_number,
            round.pot
        );
        Ok(())
    }

    /// Record a decision through the normal path and notify subscribers.
    /// Used by clients, the bot enforcer, and timeout defaults alike.
    pub async fn record_decision(
        &self,
        game_id: GameId,
        player_id: PlayerId,
        decision: &str,
    ) -> LifecycleResult<()> {
        self.store
            .update_player(
                player_id,
                &PlayerPatch {
                    current_decision: Some(Some(decision.to_string())),
                    ..PlayerPatch::default()
                },
            )
            .await?;
        self.store
            .publish(game_id, &GameEvent::DecisionRecorded { player_id })
            .await?;
        Ok(())
    }

    /// Pause enforcement for a game, stashing the remaining time on the
    /// active deadline so resume can restore it.
    pub async fn pause_game(&self, game_id: GameId) -> LifecycleResult<ClaimOutcome> {
        let game = self.store.get_game(game_id).await?;
        if game.is_paused {
            return Ok(ClaimOutcome::LostRace);
        }
        let now = Utc::now();
        let deadline = match game.status {
            GameStatus::InProgress => self
                .store
                .latest_round(game_id)
                .await?
                .and_then(|r| r.decision_deadline),
            _ => game.active_deadline(),
        };
        let remaining_ms = deadline.map(|d| (d - now).num_milliseconds().max(0));
        let guard = GameGuard::status(game.status);
        let patch = GamePatch {
            is_paused: Some(true),
            paused_time_remaining: Some(remaining_ms),
            ..GamePatch::default()
        };
        let rows = self
            .store
            .claim_game_transition(game_id, &guard, &patch)
            .await?;
        Ok(ClaimOutcome::from_rows(rows))
    }

    /// Resume a paused game, re-anchoring the stashed deadline remainder at
    /// the current time.
    pub async fn resume_game(&self, game_id: GameId) -> LifecycleResult<ClaimOutcome> {
        let game = self.store.get_game(game_id).await?;
        if !game.is_paused {
            return Ok(ClaimOutcome::LostRace);
        }
        let now = Utc::now();
        let restored = game
            .paused_time_remaining
            .map(|ms| now + Duration::milliseconds(ms));

        let mut patch = GamePatch {
            is_paused: Some(false),
            paused_time_remaining: Some(None),
            ..GamePatch::default()
        };
        match game.status {
            GameStatus::Configuring | GameStatus::GameSelection => {
                patch.config_deadline = Some(restored);
            }
            GameStatus::AnteDecision => {
                patch.ante_decision_deadline = Some(restored);
            }
            GameStatus::InProgress => {
                if let Some(round) = self.store.latest_round(game_id).await? {
                    self.store
                        .update_round(
                            round.id,
                            &RoundPatch {
                                decision_deadline: Some(restored),
                                ..RoundPatch::default()
                            },
                        )
                        .await?;
                }
            }
            _ => {}
        }
        let guard = GameGuard::status(game.status);
        let rows = self
            .store
            .claim_game_transition(game_id, &guard, &patch)
            .await?;
        Ok(ClaimOutcome::from_rows(rows))
    }
}
