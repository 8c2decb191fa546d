//! Repository trait for the shared game state store.
//!
//! Every coordination component talks to the store through this trait so the
//! enforcement and lifecycle logic can be exercised against the in-memory
//! implementation in tests and small deployments while production uses
//! PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use super::errors::StoreResult;
use super::models::{
    Game, GameEvent, GameGuard, GameId, GamePatch, HandResult, NewRound, Player, PlayerHandResult,
    PlayerId, PlayerPatch, Round, RoundId, RoundPatch,
};

/// Shared game state store: point reads, conditional point updates, atomic
/// increments, append-only inserts, and a per-game change feed.
///
/// The `claim_*` methods are the transition claim primitive. Each is a single
/// conditional update; the returned count is the number of rows actually
/// modified. Zero means some other actor already transitioned the guarded
/// state (or the precondition never held) and the caller must not perform the
/// transition's side effects.
#[async_trait]
pub trait GameStore: Send + Sync {
    /// Read one game row.
    async fn get_game(&self, game_id: GameId) -> StoreResult<Game>;

    /// List unpaused games in an active status, for the scheduled sweep.
    async fn list_enforceable_games(&self) -> StoreResult<Vec<Game>>;

    /// Conditionally update a game row: apply `patch` only while every guard
    /// column still holds its observed value. Returns rows modified (0 or 1).
    async fn claim_game_transition(
        &self,
        game_id: GameId,
        guard: &GameGuard,
        patch: &GamePatch,
    ) -> StoreResult<u64>;

    /// Read one round row.
    async fn get_round(&self, round_id: RoundId) -> StoreResult<Round>;

    /// The active round: highest `(hand_number, round_number)` under the
    /// game's current `dealer_game_id`. Never selected by creation time,
    /// since historical rounds are retained.
    async fn latest_round(&self, game_id: GameId) -> StoreResult<Option<Round>>;

    /// Insert a new round. Fails with a duplicate-key error if a row already
    /// exists for `(dealer_game_id, hand_number)`.
    async fn insert_round(&self, round: &NewRound) -> StoreResult<RoundId>;

    /// Claim settlement of a round: `betting` -> `completed`, at most once.
    async fn claim_round_completed(&self, round_id: RoundId) -> StoreResult<u64>;

    /// Conditionally advance the turn on a round, guarded on the exact
    /// observed `(decision_deadline, turn_position)` pair so two enforcers
    /// cannot both time out the same turn instance.
    async fn claim_round_turn(
        &self,
        round_id: RoundId,
        observed_deadline: Option<DateTime<Utc>>,
        observed_turn: Option<i32>,
        patch: &RoundPatch,
    ) -> StoreResult<u64>;

    /// Unconditional round update, for fields not guarding any transition.
    async fn update_round(&self, round_id: RoundId, patch: &RoundPatch) -> StoreResult<()>;

    /// All players of a game, in seat order (observers last).
    async fn players(&self, game_id: GameId) -> StoreResult<Vec<Player>>;

    /// Read one player row.
    async fn get_player(&self, player_id: PlayerId) -> StoreResult<Player>;

    /// Write player flags/decisions. These columns guard no transition, so
    /// the update is unconditional.
    async fn update_player(&self, player_id: PlayerId, patch: &PlayerPatch) -> StoreResult<()>;

    /// Atomic chip increment. Commutative, so settlement applies deltas
    /// through this rather than a conditional update.
    async fn add_chips(&self, player_id: PlayerId, delta: i64) -> StoreResult<()>;

    /// Append one immutable settlement record.
    async fn insert_hand_result(&self, result: &HandResult) -> StoreResult<i64>;

    /// Append one per-player chip-change snapshot.
    async fn insert_player_hand_result(&self, result: &PlayerHandResult) -> StoreResult<i64>;

    /// Publish a change event for a game.
    async fn publish(&self, game_id: GameId, event: &GameEvent) -> StoreResult<()>;

    /// Subscribe to a game's change feed. Lagged subscribers miss events and
    /// fall back to their next poll tick.
    fn subscribe(&self, game_id: GameId) -> broadcast::Receiver<GameEvent>;
}
