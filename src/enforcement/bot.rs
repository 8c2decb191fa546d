//! Bot fallback enforcement.
//!
//! Bots have no client of their own; a poller drives them. Each tick looks
//! for a pending choice owned by a bot (turn decision, ante decision, or a
//! bot dealer's phase configuration) and performs the variant's bot decision
//! through the same claim protocol a human client would use. A memo of
//! already-handled `(round, stuck bots)` keys keeps the poller from
//! re-deciding the same stuck situation on every tick; the memo is dropped
//! when the round identity changes.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;

use chrono::{Duration, Utc};

use crate::claim::ClaimOutcome;
use crate::config::CoordinationConfig;
use crate::lifecycle::{
    LifecycleError, LifecycleResult, RoundOrchestrator, StartOutcome, next_seat_clockwise,
};
use crate::store::{
    AnteDecision, Game, GameEvent, GameId, GameStatus, GameStore, PlayerId, PlayerPatch,
    RoundPatch, RoundStatus,
};
use crate::variant::{BotBrain, TableView};

/// One stuck situation this client already handled: the round plus the
/// undecided bots it acted for. A bot that records a decision leaves the
/// stuck set, so the next stuck situation in the same round keys differently.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StuckKey {
    round_id: i64,
    bot_ids: Vec<PlayerId>,
}

impl StuckKey {
    fn new(round_id: i64, mut bot_ids: Vec<PlayerId>) -> Self {
        bot_ids.sort_unstable();
        Self { round_id, bot_ids }
    }
}

/// What one bot poll tick did for one game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotTickOutcome {
    /// Nothing was waiting on a bot.
    Idle,
    /// A bot decision was recorded.
    Acted { player_id: PlayerId, decision: String },
    /// A racing actor resolved the same choice first.
    LostRace,
}

/// Bot fallback poll loop body
pub struct BotEnforcer<S: GameStore> {
    store: Arc<S>,
    orchestrator: Arc<RoundOrchestrator<S>>,
    brain: Arc<dyn BotBrain>,
    config: CoordinationConfig,
    attempted: Mutex<HashSet<StuckKey>>,
}

impl<S: GameStore + 'static> BotEnforcer<S> {
    pub fn new(
        store: Arc<S>,
        orchestrator: Arc<RoundOrchestrator<S>>,
        brain: Arc<dyn BotBrain>,
        config: CoordinationConfig,
    ) -> Self {
        Self {
            store,
            orchestrator,
            brain,
            config,
            attempted: Mutex::new(HashSet::new()),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &CoordinationConfig {
        &self.config
    }

    /// One bot poll tick for one game.
    pub async fn tick(&self, game_id: GameId) -> LifecycleResult<BotTickOutcome> {
        let game = self.store.get_game(game_id).await?;
        if game.is_paused {
            return Ok(BotTickOutcome::Idle);
        }
        match game.status {
            GameStatus::InProgress => self.act_on_turn(&game).await,
            GameStatus::AnteDecision => self.answer_antes(&game).await,
            GameStatus::GameSelection | GameStatus::Configuring => {
                self.act_as_dealer(&game).await
            }
            _ => Ok(BotTickOutcome::Idle),
        }
    }

    /// If the turn pointer sits on a bot, decide for it and advance the turn.
    async fn act_on_turn(&self, game: &Game) -> LifecycleResult<BotTickOutcome> {
        let Some(round) = self.store.latest_round(game.id).await? else {
            return Ok(BotTickOutcome::Idle);
        };
        if round.status != RoundStatus::Betting {
            return Ok(BotTickOutcome::Idle);
        }
        let Some(turn_seat) = round.turn_position else {
            return Ok(BotTickOutcome::Idle);
        };

        let players = self.store.players(game.id).await?;
        let Some(bot) = players
            .iter()
            .find(|p| p.position == Some(turn_seat) && p.is_bot && p.current_decision.is_none())
        else {
            return Ok(BotTickOutcome::Idle);
        };

        // One attempt per stuck situation. If the claim below loses, a human
        // or the deadline enforcer already moved the turn; the next stuck set
        // keys differently.
        let key = StuckKey::new(round.id, vec![bot.id]);
        {
            let mut attempted = self.attempted.lock().unwrap_or_else(|e| e.into_inner());
            if !attempted.insert(key) {
                return Ok(BotTickOutcome::Idle);
            }
        }

        let view = TableView {
            game: game.clone(),
            round: round.clone(),
            players: players.clone(),
        };
        let decision = self.brain.decide(&view, bot);

        let mut waiting_seats: Vec<i32> = players
            .iter()
            .filter(|p| {
                p.is_active() && p.current_decision.is_none() && p.position != Some(turn_seat)
            })
            .filter_map(|p| p.position)
            .collect();
        waiting_seats.sort_unstable();
        let next_turn = next_seat_clockwise(turn_seat, &waiting_seats);

        let now = Utc::now();
        let patch = RoundPatch {
            turn_position: Some(next_turn),
            decision_deadline: Some(
                next_turn.map(|_| now + Duration::seconds(self.config.turn_decision_secs)),
            ),
            ..RoundPatch::default()
        };
        let rows = self
            .store
            .claim_round_turn(round.id, round.decision_deadline, round.turn_position, &patch)
            .await?;
        if !ClaimOutcome::from_rows(rows).is_claimed() {
            return Ok(BotTickOutcome::LostRace);
        }

        let bot_id = bot.id;
        self.orchestrator
            .record_decision(game.id, bot_id, &decision)
            .await?;
        log::debug!(
            "bot: game {} hand {} seat {turn_seat} decided {decision}",
            game.id,
            round.hand_number
        );
        Ok(BotTickOutcome::Acted {
            player_id: bot_id,
            decision,
        })
    }

    /// Answer the ante question for every undecided bot. Unconditional player
    /// writes; answering twice with the same value is harmless.
    async fn answer_antes(&self, game: &Game) -> LifecycleResult<BotTickOutcome> {
        let players = self.store.players(game.id).await?;
        let mut last: Option<(PlayerId, String)> = None;
        for bot in players
            .iter()
            .filter(|p| p.is_bot && p.is_active() && p.ante_decision.is_none())
        {
            // Short-stacked bots sit out rather than ante into a pot they
            // cannot cover.
            let decision = if bot.chips >= self.config.ante_amount {
                AnteDecision::AnteUp
            } else {
                AnteDecision::SitOut
            };
            self.store
                .update_player(
                    bot.id,
                    &PlayerPatch {
                        ante_decision: Some(Some(decision)),
                        ..PlayerPatch::default()
                    },
                )
                .await?;
            self.store
                .publish(game.id, &GameEvent::PlayerUpdated { player_id: bot.id })
                .await?;
            last = Some((bot.id, decision.to_string()));
        }
        Ok(match last {
            Some((player_id, decision)) => BotTickOutcome::Acted {
                player_id,
                decision,
            },
            None => BotTickOutcome::Idle,
        })
    }

    /// A bot dealer never deliberates: when the dealer seat belongs to a bot,
    /// take the phase's default path immediately instead of waiting out the
    /// deadline.
    async fn act_as_dealer(&self, game: &Game) -> LifecycleResult<BotTickOutcome> {
        let players = self.store.players(game.id).await?;
        let Some(dealer) = players
            .iter()
            .find(|p| p.position == Some(game.dealer_position) && p.is_bot)
        else {
            return Ok(BotTickOutcome::Idle);
        };

        if game.status == GameStatus::GameSelection {
            match self.orchestrator.start_hand(game.id).await {
                Ok(StartOutcome::Started { hand_number, .. }) => {
                    log::debug!(
                        "bot: dealer {} started hand {hand_number} of game {}",
                        dealer.id,
                        game.id
                    );
                    Ok(BotTickOutcome::Acted {
                        player_id: dealer.id,
                        decision: format!("deal:{hand_number}"),
                    })
                }
                Ok(StartOutcome::LostRace) => Ok(BotTickOutcome::LostRace),
                // Not enough players yet; the deadline enforcer will park
                // the game if nobody shows up.
                Err(LifecycleError::PreconditionNotMet(_)) => Ok(BotTickOutcome::Idle),
                Err(e) => Err(e),
            }
        } else {
            // Configuring with a bot dealer: leave the defaults to the
            // deadline enforcer's claim path rather than duplicating it here.
            Ok(BotTickOutcome::Idle)
        }
    }

    /// Drop memo entries for rounds other than the given active one. Called
    /// by the poll loop between hands to keep the set bounded.
    pub fn forget_except(&self, active_round_id: Option<i64>) {
        let mut attempted = self.attempted.lock().unwrap_or_else(|e| e.into_inner());
        attempted.retain(|key| Some(key.round_id) == active_round_id);
    }
}
