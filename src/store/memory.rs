//! In-memory `GameStore` implementation.
//!
//! Backs tests and single-process deployments. Conditional updates are
//! evaluated under one mutex, which gives the same at-most-one-winner
//! semantics as the row-level conditional update in PostgreSQL.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::errors::{StoreError, StoreResult};
use super::models::{
    Game, GameEvent, GameGuard, GameId, GamePatch, HandResult, NewRound, Player, PlayerHandResult,
    PlayerId, PlayerPatch, Round, RoundId, RoundPatch, RoundStatus,
};
use super::repository::GameStore;

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Default)]
struct Inner {
    games: HashMap<GameId, Game>,
    rounds: HashMap<RoundId, Round>,
    players: HashMap<PlayerId, Player>,
    hand_results: Vec<HandResult>,
    player_hand_results: Vec<PlayerHandResult>,
    next_round_id: RoundId,
}

/// In-memory game store
pub struct MemoryGameStore {
    inner: Mutex<Inner>,
    channels: Mutex<HashMap<GameId, broadcast::Sender<GameEvent>>>,
}

impl Default for MemoryGameStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGameStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_round_id: 1,
                ..Inner::default()
            }),
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Insert a game row directly (test/bootstrap seam).
    pub fn seed_game(&self, game: Game) {
        self.inner.lock().unwrap().games.insert(game.id, game);
    }

    /// Insert a player row directly (test/bootstrap seam).
    pub fn seed_player(&self, player: Player) {
        self.inner.lock().unwrap().players.insert(player.id, player);
    }

    /// Insert a round row directly with an explicit id (test/bootstrap seam).
    pub fn seed_round(&self, round: Round) {
        let mut inner = self.inner.lock().unwrap();
        inner.next_round_id = inner.next_round_id.max(round.id + 1);
        inner.rounds.insert(round.id, round);
    }

    /// Snapshot of settlement records, in insertion order.
    pub fn hand_results(&self) -> Vec<HandResult> {
        self.inner.lock().unwrap().hand_results.clone()
    }

    /// Snapshot of per-player chip-change records, in insertion order.
    pub fn player_hand_results(&self) -> Vec<PlayerHandResult> {
        self.inner.lock().unwrap().player_hand_results.clone()
    }

    fn sender_for(&self, game_id: GameId) -> broadcast::Sender<GameEvent> {
        self.channels
            .lock()
            .unwrap()
            .entry(game_id)
            .or_insert_with(|| broadcast::channel(EVENT_CHANNEL_CAPACITY).0)
            .clone()
    }
}

fn guard_matches(game: &Game, guard: &GameGuard) -> bool {
    if let Some(status) = guard.status {
        if game.status != status {
            return false;
        }
    }
    if let Some(current_round) = guard.current_round {
        if game.current_round != current_round {
            return false;
        }
    }
    if let Some(observed) = guard.config_deadline {
        if game.config_deadline != observed {
            return false;
        }
    }
    if let Some(observed) = guard.ante_decision_deadline {
        if game.ante_decision_deadline != observed {
            return false;
        }
    }
    true
}

fn apply_game_patch(game: &mut Game, patch: &GamePatch) {
    if let Some(status) = patch.status {
        game.status = status;
    }
    if let Some(current_round) = patch.current_round {
        game.current_round = current_round;
    }
    if let Some(total_hands) = patch.total_hands {
        game.total_hands = total_hands;
    }
    if let Some(pot_amount) = patch.pot_amount {
        game.pot_amount = pot_amount;
    }
    if let Some(dealer_position) = patch.dealer_position {
        game.dealer_position = dealer_position;
    }
    if let Some(is_paused) = patch.is_paused {
        game.is_paused = is_paused;
    }
    if let Some(remaining) = patch.paused_time_remaining {
        game.paused_time_remaining = remaining;
    }
    if let Some(deadline) = patch.config_deadline {
        game.config_deadline = deadline;
    }
    if let Some(deadline) = patch.ante_decision_deadline {
        game.ante_decision_deadline = deadline;
    }
    if let Some(is_first_hand) = patch.is_first_hand {
        game.is_first_hand = is_first_hand;
    }
    if let Some(ref result) = patch.last_round_result {
        game.last_round_result = result.clone();
    }
    if let Some(game_over_at) = patch.game_over_at {
        game.game_over_at = game_over_at;
    }
    game.updated_at = Utc::now();
}

fn apply_round_patch(round: &mut Round, patch: &RoundPatch) {
    if let Some(pot) = patch.pot {
        round.pot = pot;
    }
    if let Some(deadline) = patch.decision_deadline {
        round.decision_deadline = deadline;
    }
    if let Some(turn) = patch.turn_position {
        round.turn_position = turn;
    }
    if let Some(ref state) = patch.variant_state {
        round.variant_state = state.clone();
    }
    if let Some(is_final) = patch.is_final {
        round.is_final = is_final;
    }
    round.updated_at = Utc::now();
}

fn apply_player_patch(player: &mut Player, patch: &PlayerPatch) {
    if let Some(position) = patch.position {
        player.position = position;
    }
    if let Some(v) = patch.sitting_out {
        player.sitting_out = v;
    }
    if let Some(v) = patch.waiting {
        player.waiting = v;
    }
    if let Some(v) = patch.stand_up_next_hand {
        player.stand_up_next_hand = v;
    }
    if let Some(v) = patch.sit_out_next_hand {
        player.sit_out_next_hand = v;
    }
    if let Some(v) = patch.auto_fold {
        player.auto_fold = v;
    }
    if let Some(v) = patch.auto_ante {
        player.auto_ante = v;
    }
    if let Some(v) = patch.auto_ante_runback {
        player.auto_ante_runback = v;
    }
    if let Some(ref decision) = patch.current_decision {
        player.current_decision = decision.clone();
    }
    if let Some(decision) = patch.ante_decision {
        player.ante_decision = decision;
    }
}

#[async_trait]
impl GameStore for MemoryGameStore {
    async fn get_game(&self, game_id: GameId) -> StoreResult<Game> {
        self.inner
            .lock()
            .unwrap()
            .games
            .get(&game_id)
            .cloned()
            .ok_or(StoreError::NotFound {
                entity: "game",
                id: game_id,
            })
    }

    async fn list_enforceable_games(&self) -> StoreResult<Vec<Game>> {
        let inner = self.inner.lock().unwrap();
        let mut games: Vec<Game> = inner
            .games
            .values()
            .filter(|g| g.status.is_active() && !g.is_paused)
            .cloned()
            .collect();
        games.sort_by_key(|g| g.id);
        Ok(games)
    }

    async fn claim_game_transition(
        &self,
        game_id: GameId,
        guard: &GameGuard,
        patch: &GamePatch,
    ) -> StoreResult<u64> {
        let mut inner = self.inner.lock().unwrap();
        match inner.games.get_mut(&game_id) {
            Some(game) if guard_matches(game, guard) => {
                apply_game_patch(game, patch);
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn get_round(&self, round_id: RoundId) -> StoreResult<Round> {
        self.inner
            .lock()
            .unwrap()
            .rounds
            .get(&round_id)
            .cloned()
            .ok_or(StoreError::NotFound {
                entity: "round",
                id: round_id,
            })
    }

    async fn latest_round(&self, game_id: GameId) -> StoreResult<Option<Round>> {
        let inner = self.inner.lock().unwrap();
        let dealer_game_id: Uuid = match inner.games.get(&game_id) {
            Some(game) => game.dealer_game_id,
            None => {
                return Err(StoreError::NotFound {
                    entity: "game",
                    id: game_id,
                });
            }
        };
        Ok(inner
            .rounds
            .values()
            .filter(|r| r.game_id == game_id && r.dealer_game_id == dealer_game_id)
            .max_by_key(|r| (r.hand_number, r.round_number))
            .cloned())
    }

    async fn insert_round(&self, round: &NewRound) -> StoreResult<RoundId> {
        let mut inner = self.inner.lock().unwrap();
        let duplicate = inner.rounds.values().any(|r| {
            r.dealer_game_id == round.dealer_game_id && r.hand_number == round.hand_number
        });
        if duplicate {
            return Err(StoreError::DuplicateKey(format!(
                "round ({}, {})",
                round.dealer_game_id, round.hand_number
            )));
        }
        let id = inner.next_round_id;
        inner.next_round_id += 1;
        let now = Utc::now();
        inner.rounds.insert(
            id,
            Round {
                id,
                game_id: round.game_id,
                dealer_game_id: round.dealer_game_id,
                hand_number: round.hand_number,
                round_number: round.round_number,
                status: RoundStatus::Betting,
                pot: round.pot,
                decision_deadline: round.decision_deadline,
                turn_position: round.turn_position,
                variant_state: round.variant_state.clone(),
                is_final: false,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn claim_round_completed(&self, round_id: RoundId) -> StoreResult<u64> {
        let mut inner = self.inner.lock().unwrap();
        match inner.rounds.get_mut(&round_id) {
            Some(round) if round.status != RoundStatus::Completed => {
                round.status = RoundStatus::Completed;
                round.decision_deadline = None;
                round.updated_at = Utc::now();
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn claim_round_turn(
        &self,
        round_id: RoundId,
        observed_deadline: Option<DateTime<Utc>>,
        observed_turn: Option<i32>,
        patch: &RoundPatch,
    ) -> StoreResult<u64> {
        let mut inner = self.inner.lock().unwrap();
        match inner.rounds.get_mut(&round_id) {
            Some(round)
                if round.status == RoundStatus::Betting
                    && round.decision_deadline == observed_deadline
                    && round.turn_position == observed_turn =>
            {
                apply_round_patch(round, patch);
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn update_round(&self, round_id: RoundId, patch: &RoundPatch) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let round = inner.rounds.get_mut(&round_id).ok_or(StoreError::NotFound {
            entity: "round",
            id: round_id,
        })?;
        apply_round_patch(round, patch);
        Ok(())
    }

    async fn players(&self, game_id: GameId) -> StoreResult<Vec<Player>> {
        let inner = self.inner.lock().unwrap();
        let mut players: Vec<Player> = inner
            .players
            .values()
            .filter(|p| p.game_id == game_id)
            .cloned()
            .collect();
        players.sort_by_key(|p| (p.position.is_none(), p.position, p.id));
        Ok(players)
    }

    async fn get_player(&self, player_id: PlayerId) -> StoreResult<Player> {
        self.inner
            .lock()
            .unwrap()
            .players
            .get(&player_id)
            .cloned()
            .ok_or(StoreError::NotFound {
                entity: "player",
                id: player_id,
            })
    }

    async fn update_player(&self, player_id: PlayerId, patch: &PlayerPatch) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let player = inner
            .players
            .get_mut(&player_id)
            .ok_or(StoreError::NotFound {
                entity: "player",
                id: player_id,
            })?;
        apply_player_patch(player, patch);
        Ok(())
    }

    async fn add_chips(&self, player_id: PlayerId, delta: i64) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let player = inner
            .players
            .get_mut(&player_id)
            .ok_or(StoreError::NotFound {
                entity: "player",
                id: player_id,
            })?;
        player.chips += delta;
        Ok(())
    }

    async fn insert_hand_result(&self, result: &HandResult) -> StoreResult<i64> {
        let mut inner = self.inner.lock().unwrap();
        if inner
            .hand_results
            .iter()
            .any(|r| r.idempotency_key == result.idempotency_key)
        {
            return Err(StoreError::DuplicateKey(result.idempotency_key.clone()));
        }
        inner.hand_results.push(result.clone());
        Ok(inner.hand_results.len() as i64)
    }

    async fn insert_player_hand_result(&self, result: &PlayerHandResult) -> StoreResult<i64> {
        let mut inner = self.inner.lock().unwrap();
        if inner
            .player_hand_results
            .iter()
            .any(|r| r.idempotency_key == result.idempotency_key)
        {
            return Err(StoreError::DuplicateKey(result.idempotency_key.clone()));
        }
        inner.player_hand_results.push(result.clone());
        Ok(inner.player_hand_results.len() as i64)
    }

    async fn publish(&self, game_id: GameId, event: &GameEvent) -> StoreResult<()> {
        // A send error only means no subscriber is currently listening.
        let _ = self.sender_for(game_id).send(event.clone());
        Ok(())
    }

    fn subscribe(&self, game_id: GameId) -> broadcast::Receiver<GameEvent> {
        self.sender_for(game_id).subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::models::GameStatus;

    fn game(id: GameId, status: GameStatus) -> Game {
        let now = Utc::now();
        Game {
            id,
            dealer_game_id: Uuid::new_v4(),
            status,
            current_round: 0,
            total_hands: 0,
            pot_amount: 0,
            dealer_position: 0,
            is_paused: false,
            paused_time_remaining: None,
            config_deadline: None,
            ante_decision_deadline: None,
            is_first_hand: true,
            last_round_result: None,
            game_over_at: None,
            allow_bot_dealers: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn claim_fails_when_guard_status_differs() {
        let store = MemoryGameStore::new();
        store.seed_game(game(1, GameStatus::InProgress));

        let guard = GameGuard::status(GameStatus::GameOver);
        let patch = GamePatch {
            status: Some(GameStatus::AnteDecision),
            ..GamePatch::default()
        };
        assert_eq!(store.claim_game_transition(1, &guard, &patch).await.unwrap(), 0);

        let unchanged = store.get_game(1).await.unwrap();
        assert_eq!(unchanged.status, GameStatus::InProgress);
    }

    #[tokio::test]
    async fn claim_compares_exact_deadline_instance() {
        let store = MemoryGameStore::new();
        let mut g = game(1, GameStatus::AnteDecision);
        let deadline = Utc::now();
        g.ante_decision_deadline = Some(deadline);
        store.seed_game(g);

        // A guard carrying a stale deadline (already cleared by a rival) loses.
        let stale = GameGuard::status(GameStatus::AnteDecision).with_ante_deadline(None);
        assert_eq!(
            store
                .claim_game_transition(1, &stale, &GamePatch::default())
                .await
                .unwrap(),
            0
        );

        let fresh = GameGuard::status(GameStatus::AnteDecision).with_ante_deadline(Some(deadline));
        let patch = GamePatch {
            ante_decision_deadline: Some(None),
            status: Some(GameStatus::GameSelection),
            ..GamePatch::default()
        };
        assert_eq!(store.claim_game_transition(1, &fresh, &patch).await.unwrap(), 1);
        let updated = store.get_game(1).await.unwrap();
        assert_eq!(updated.ante_decision_deadline, None);
        assert_eq!(updated.status, GameStatus::GameSelection);
    }

    #[tokio::test]
    async fn round_uniqueness_is_per_dealer_game_and_hand() {
        let store = MemoryGameStore::new();
        let g = game(1, GameStatus::InProgress);
        let dealer_game_id = g.dealer_game_id;
        store.seed_game(g);

        let new_round = NewRound {
            game_id: 1,
            dealer_game_id,
            hand_number: 1,
            round_number: 1,
            pot: 0,
            decision_deadline: None,
            turn_position: None,
            variant_state: serde_json::Value::Null,
        };
        store.insert_round(&new_round).await.unwrap();
        let err = store.insert_round(&new_round).await.unwrap_err();
        assert!(err.is_duplicate_key());
    }

    #[tokio::test]
    async fn latest_round_orders_by_hand_then_round_number() {
        let store = MemoryGameStore::new();
        let g = game(1, GameStatus::InProgress);
        let dealer_game_id = g.dealer_game_id;
        store.seed_game(g);

        for (hand, round) in [(1, 1), (2, 1), (2, 2), (1, 3)] {
            store
                .insert_round(&NewRound {
                    game_id: 1,
                    dealer_game_id,
                    hand_number: hand * 10 + round, // keep hand keys unique
                    round_number: round,
                    pot: 0,
                    decision_deadline: None,
                    turn_position: None,
                    variant_state: serde_json::Value::Null,
                })
                .await
                .unwrap();
        }

        let latest = store.latest_round(1).await.unwrap().unwrap();
        assert_eq!(latest.hand_number, 22);
    }

    #[tokio::test]
    async fn settlement_claim_wins_once() {
        let store = MemoryGameStore::new();
        let g = game(1, GameStatus::InProgress);
        let dealer_game_id = g.dealer_game_id;
        store.seed_game(g);
        let round_id = store
            .insert_round(&NewRound {
                game_id: 1,
                dealer_game_id,
                hand_number: 1,
                round_number: 1,
                pot: 100,
                decision_deadline: None,
                turn_position: None,
                variant_state: serde_json::Value::Null,
            })
            .await
            .unwrap();

        assert_eq!(store.claim_round_completed(round_id).await.unwrap(), 1);
        assert_eq!(store.claim_round_completed(round_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let store = MemoryGameStore::new();
        let mut rx = store.subscribe(9);
        store
            .publish(
                9,
                &GameEvent::StatusChanged {
                    status: GameStatus::InProgress,
                },
            )
            .await
            .unwrap();
        let event = rx.try_recv().unwrap();
        assert_eq!(
            event,
            GameEvent::StatusChanged {
                status: GameStatus::InProgress
            }
        );
    }
}
