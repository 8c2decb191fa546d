//! PostgreSQL `GameStore` implementation.
//!
//! All transition claims are single conditional `UPDATE` statements; the
//! caller inspects `rows_affected()` to learn whether it won. Guard
//! comparisons on nullable deadline columns use `IS NOT DISTINCT FROM` so the
//! exact observed instance (null included) is part of the guard. The change
//! feed rides PostgreSQL `LISTEN`/`NOTIFY` on a single channel and fans out to
//! per-game broadcast channels in-process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgListener;
use sqlx::{PgPool, Row};
use tokio::sync::broadcast;

use super::errors::{StoreError, StoreResult};
use super::models::{
    AnteDecision, Game, GameEvent, GameGuard, GameId, GamePatch, GameStatus, HandResult, NewRound,
    Player, PlayerHandResult, PlayerId, PlayerPatch, Round, RoundId, RoundPatch, RoundStatus,
};
use super::repository::GameStore;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// NOTIFY channel shared by all games; payloads carry the game id.
const NOTIFY_CHANNEL: &str = "game_events";

#[derive(Debug, Serialize, Deserialize)]
struct EventEnvelope {
    game_id: GameId,
    event: GameEvent,
}

type SenderMap = Arc<Mutex<HashMap<GameId, broadcast::Sender<GameEvent>>>>;

/// PostgreSQL game store
pub struct PgGameStore {
    pool: Arc<PgPool>,
    senders: SenderMap,
}

impl PgGameStore {
    /// Create a store and spawn its notification listener task.
    pub fn new(pool: Arc<PgPool>) -> Self {
        let senders: SenderMap = Arc::new(Mutex::new(HashMap::new()));
        tokio::spawn(listen_loop(pool.clone(), senders.clone()));
        Self { pool, senders }
    }

    fn sender_for(&self, game_id: GameId) -> broadcast::Sender<GameEvent> {
        sender_for(&self.senders, game_id)
    }
}

fn sender_for(senders: &SenderMap, game_id: GameId) -> broadcast::Sender<GameEvent> {
    senders
        .lock()
        .unwrap()
        .entry(game_id)
        .or_insert_with(|| broadcast::channel(EVENT_CHANNEL_CAPACITY).0)
        .clone()
}

/// Forward NOTIFY payloads to per-game subscribers. `PgListener` reconnects
/// on the next `recv` after a dropped connection; a failed cycle only delays
/// subscribers until their next poll tick.
async fn listen_loop(pool: Arc<PgPool>, senders: SenderMap) {
    loop {
        let mut listener = match PgListener::connect_with(pool.as_ref()).await {
            Ok(listener) => listener,
            Err(e) => {
                log::warn!("change feed: listener connect failed: {e}");
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                continue;
            }
        };
        if let Err(e) = listener.listen(NOTIFY_CHANNEL).await {
            log::warn!("change feed: LISTEN failed: {e}");
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            continue;
        }
        loop {
            match listener.recv().await {
                Ok(notification) => {
                    match serde_json::from_str::<EventEnvelope>(notification.payload()) {
                        Ok(envelope) => {
                            let _ = sender_for(&senders, envelope.game_id).send(envelope.event);
                        }
                        Err(e) => log::warn!("change feed: bad payload: {e}"),
                    }
                }
                Err(e) => {
                    log::warn!("change feed: recv failed, reconnecting: {e}");
                    break;
                }
            }
        }
    }
}

fn game_from_row(row: &sqlx::postgres::PgRow) -> Game {
    Game {
        id: row.get("id"),
        dealer_game_id: row.get("dealer_game_id"),
        status: GameStatus::parse(&row.get::<String, _>("status")).unwrap_or(GameStatus::Waiting),
        current_round: row.get("current_round"),
        total_hands: row.get("total_hands"),
        pot_amount: row.get("pot_amount"),
        dealer_position: row.get("dealer_position"),
        is_paused: row.get("is_paused"),
        paused_time_remaining: row.get("paused_time_remaining"),
        config_deadline: row
            .get::<Option<chrono::NaiveDateTime>, _>("config_deadline")
            .map(|dt| dt.and_utc()),
        ante_decision_deadline: row
            .get::<Option<chrono::NaiveDateTime>, _>("ante_decision_deadline")
            .map(|dt| dt.and_utc()),
        is_first_hand: row.get("is_first_hand"),
        last_round_result: row.get("last_round_result"),
        game_over_at: row
            .get::<Option<chrono::NaiveDateTime>, _>("game_over_at")
            .map(|dt| dt.and_utc()),
        allow_bot_dealers: row.get("allow_bot_dealers"),
        created_at: row.get::<chrono::NaiveDateTime, _>("created_at").and_utc(),
        updated_at: row.get::<chrono::NaiveDateTime, _>("updated_at").and_utc(),
    }
}

fn round_from_row(row: &sqlx::postgres::PgRow) -> Round {
    Round {
        id: row.get("id"),
        game_id: row.get("game_id"),
        dealer_game_id: row.get("dealer_game_id"),
        hand_number: row.get("hand_number"),
        round_number: row.get("round_number"),
        status: RoundStatus::parse(&row.get::<String, _>("status")).unwrap_or(RoundStatus::Betting),
        pot: row.get("pot"),
        decision_deadline: row
            .get::<Option<chrono::NaiveDateTime>, _>("decision_deadline")
            .map(|dt| dt.and_utc()),
        turn_position: row.get("turn_position"),
        variant_state: row.get("variant_state"),
        is_final: row.get("is_final"),
        created_at: row.get::<chrono::NaiveDateTime, _>("created_at").and_utc(),
        updated_at: row.get::<chrono::NaiveDateTime, _>("updated_at").and_utc(),
    }
}

fn player_from_row(row: &sqlx::postgres::PgRow) -> Player {
    Player {
        id: row.get("id"),
        game_id: row.get("game_id"),
        position: row.get("position"),
        display_name: row.get("display_name"),
        is_bot: row.get("is_bot"),
        chips: row.get("chips"),
        sitting_out: row.get("sitting_out"),
        waiting: row.get("waiting"),
        stand_up_next_hand: row.get("stand_up_next_hand"),
        sit_out_next_hand: row.get("sit_out_next_hand"),
        auto_fold: row.get("auto_fold"),
        auto_ante: row.get("auto_ante"),
        auto_ante_runback: row.get("auto_ante_runback"),
        current_decision: row.get("current_decision"),
        ante_decision: row
            .get::<Option<String>, _>("ante_decision")
            .as_deref()
            .and_then(AnteDecision::parse),
    }
}

const GAME_COLUMNS: &str = "id, dealer_game_id, status, current_round, total_hands, pot_amount, \
     dealer_position, is_paused, paused_time_remaining, config_deadline, \
     ante_decision_deadline, is_first_hand, last_round_result, game_over_at, \
     allow_bot_dealers, created_at, updated_at";

const ROUND_COLUMNS: &str = "id, game_id, dealer_game_id, hand_number, round_number, status, pot, \
     decision_deadline, turn_position, variant_state, is_final, created_at, updated_at";

const PLAYER_COLUMNS: &str = "id, game_id, position, display_name, is_bot, chips, sitting_out, waiting, \
     stand_up_next_hand, sit_out_next_hand, auto_fold, auto_ante, auto_ante_runback, \
     current_decision, ante_decision";

fn map_insert_err(e: sqlx::Error, key: String) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::DuplicateKey(key),
        _ => StoreError::Database(e),
    }
}

#[async_trait]
impl GameStore for PgGameStore {
    async fn get_game(&self, game_id: GameId) -> StoreResult<Game> {
        let row = sqlx::query(&format!("SELECT {GAME_COLUMNS} FROM games WHERE id = $1"))
            .bind(game_id)
            .fetch_optional(self.pool.as_ref())
            .await?
            .ok_or(StoreError::NotFound {
                entity: "game",
                id: game_id,
            })?;
        Ok(game_from_row(&row))
    }

    async fn list_enforceable_games(&self) -> StoreResult<Vec<Game>> {
        let rows = sqlx::query(&format!(
            "SELECT {GAME_COLUMNS} FROM games
             WHERE status <> 'session_ended' AND is_paused = FALSE
             ORDER BY id"
        ))
        .fetch_all(self.pool.as_ref())
        .await?;
        Ok(rows.iter().map(game_from_row).collect())
    }

    async fn claim_game_transition(
        &self,
        game_id: GameId,
        guard: &GameGuard,
        patch: &GamePatch,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE games SET
                status = CASE WHEN $10 THEN $11 ELSE status END,
                current_round = CASE WHEN $12 THEN $13 ELSE current_round END,
                total_hands = CASE WHEN $14 THEN $15 ELSE total_hands END,
                pot_amount = CASE WHEN $16 THEN $17 ELSE pot_amount END,
                dealer_position = CASE WHEN $18 THEN $19 ELSE dealer_position END,
                is_paused = CASE WHEN $20 THEN $21 ELSE is_paused END,
                paused_time_remaining = CASE WHEN $22 THEN $23 ELSE paused_time_remaining END,
                config_deadline = CASE WHEN $24 THEN $25 ELSE config_deadline END,
                ante_decision_deadline = CASE WHEN $26 THEN $27 ELSE ante_decision_deadline END,
                is_first_hand = CASE WHEN $28 THEN $29 ELSE is_first_hand END,
                last_round_result = CASE WHEN $30 THEN $31 ELSE last_round_result END,
                game_over_at = CASE WHEN $32 THEN $33 ELSE game_over_at END,
                updated_at = NOW()
             WHERE id = $1
               AND (NOT $2 OR status = $3)
               AND (NOT $4 OR current_round = $5)
               AND (NOT $6 OR config_deadline IS NOT DISTINCT FROM $7)
               AND (NOT $8 OR ante_decision_deadline IS NOT DISTINCT FROM $9)",
        )
        .bind(game_id)
        .bind(guard.status.is_some())
        .bind(guard.status.map(|s| s.as_str()))
        .bind(guard.current_round.is_some())
        .bind(guard.current_round)
        .bind(guard.config_deadline.is_some())
        .bind(guard.config_deadline.flatten().map(|d| d.naive_utc()))
        .bind(guard.ante_decision_deadline.is_some())
        .bind(
            guard
                .ante_decision_deadline
                .flatten()
                .map(|d| d.naive_utc()),
        )
        .bind(patch.status.is_some())
        .bind(patch.status.map(|s| s.as_str()))
        .bind(patch.current_round.is_some())
        .bind(patch.current_round)
        .bind(patch.total_hands.is_some())
        .bind(patch.total_hands)
        .bind(patch.pot_amount.is_some())
        .bind(patch.pot_amount)
        .bind(patch.dealer_position.is_some())
        .bind(patch.dealer_position)
        .bind(patch.is_paused.is_some())
        .bind(patch.is_paused)
        .bind(patch.paused_time_remaining.is_some())
        .bind(patch.paused_time_remaining.flatten())
        .bind(patch.config_deadline.is_some())
        .bind(patch.config_deadline.flatten().map(|d| d.naive_utc()))
        .bind(patch.ante_decision_deadline.is_some())
        .bind(
            patch
                .ante_decision_deadline
                .flatten()
                .map(|d| d.naive_utc()),
        )
        .bind(patch.is_first_hand.is_some())
        .bind(patch.is_first_hand)
        .bind(patch.last_round_result.is_some())
        .bind(patch.last_round_result.clone().flatten())
        .bind(patch.game_over_at.is_some())
        .bind(patch.game_over_at.flatten().map(|d| d.naive_utc()))
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected())
    }

    async fn get_round(&self, round_id: RoundId) -> StoreResult<Round> {
        let row = sqlx::query(&format!("SELECT {ROUND_COLUMNS} FROM rounds WHERE id = $1"))
            .bind(round_id)
            .fetch_optional(self.pool.as_ref())
            .await?
            .ok_or(StoreError::NotFound {
                entity: "round",
                id: round_id,
            })?;
        Ok(round_from_row(&row))
    }

    async fn latest_round(&self, game_id: GameId) -> StoreResult<Option<Round>> {
        let row = sqlx::query(&format!(
            "SELECT {ROUND_COLUMNS} FROM rounds
             WHERE game_id = $1
               AND dealer_game_id = (SELECT dealer_game_id FROM games WHERE id = $1)
             ORDER BY hand_number DESC, round_number DESC
             LIMIT 1"
        ))
        .bind(game_id)
        .fetch_optional(self.pool.as_ref())
        .await?;
        Ok(row.as_ref().map(round_from_row))
    }

    async fn insert_round(&self, round: &NewRound) -> StoreResult<RoundId> {
        let row = sqlx::query(
            "INSERT INTO rounds
                (game_id, dealer_game_id, hand_number, round_number, status, pot,
                 decision_deadline, turn_position, variant_state, is_final)
             VALUES ($1, $2, $3, $4, 'betting', $5, $6, $7, $8, FALSE)
             RETURNING id",
        )
        .bind(round.game_id)
        .bind(round.dealer_game_id)
        .bind(round.hand_number)
        .bind(round.round_number)
        .bind(round.pot)
        .bind(round.decision_deadline.map(|d| d.naive_utc()))
        .bind(round.turn_position)
        .bind(&round.variant_state)
        .fetch_one(self.pool.as_ref())
        .await
        .map_err(|e| {
            map_insert_err(
                e,
                format!("round ({}, {})", round.dealer_game_id, round.hand_number),
            )
        })?;
        Ok(row.get("id"))
    }

    async fn claim_round_completed(&self, round_id: RoundId) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE rounds
             SET status = 'completed', decision_deadline = NULL, updated_at = NOW()
             WHERE id = $1 AND status <> 'completed'",
        )
        .bind(round_id)
        .execute(self.pool.as_ref())
        .await?;
        Ok(result.rows_affected())
    }

    async fn claim_round_turn(
        &self,
        round_id: RoundId,
        observed_deadline: Option<DateTime<Utc>>,
        observed_turn: Option<i32>,
        patch: &RoundPatch,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE rounds SET
                pot = CASE WHEN $4 THEN $5 ELSE pot END,
                decision_deadline = CASE WHEN $6 THEN $7 ELSE decision_deadline END,
                turn_position = CASE WHEN $8 THEN $9 ELSE turn_position END,
                variant_state = CASE WHEN $10 THEN $11 ELSE variant_state END,
                is_final = CASE WHEN $12 THEN $13 ELSE is_final END,
                updated_at = NOW()
             WHERE id = $1
               AND status = 'betting'
               AND decision_deadline IS NOT DISTINCT FROM $2
               AND turn_position IS NOT DISTINCT FROM $3",
        )
        .bind(round_id)
        .bind(observed_deadline.map(|d| d.naive_utc()))
        .bind(observed_turn)
        .bind(patch.pot.is_some())
        .bind(patch.pot)
        .bind(patch.decision_deadline.is_some())
        .bind(patch.decision_deadline.flatten().map(|d| d.naive_utc()))
        .bind(patch.turn_position.is_some())
        .bind(patch.turn_position.flatten())
        .bind(patch.variant_state.is_some())
        .bind(patch.variant_state.clone())
        .bind(patch.is_final.is_some())
        .bind(patch.is_final)
        .execute(self.pool.as_ref())
        .await?;
        Ok(result.rows_affected())
    }

    async fn update_round(&self, round_id: RoundId, patch: &RoundPatch) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE rounds SET
                pot = CASE WHEN $2 THEN $3 ELSE pot END,
                decision_deadline = CASE WHEN $4 THEN $5 ELSE decision_deadline END,
                turn_position = CASE WHEN $6 THEN $7 ELSE turn_position END,
                variant_state = CASE WHEN $8 THEN $9 ELSE variant_state END,
                is_final = CASE WHEN $10 THEN $11 ELSE is_final END,
                updated_at = NOW()
             WHERE id = $1",
        )
        .bind(round_id)
        .bind(patch.pot.is_some())
        .bind(patch.pot)
        .bind(patch.decision_deadline.is_some())
        .bind(patch.decision_deadline.flatten().map(|d| d.naive_utc()))
        .bind(patch.turn_position.is_some())
        .bind(patch.turn_position.flatten())
        .bind(patch.variant_state.is_some())
        .bind(patch.variant_state.clone())
        .bind(patch.is_final.is_some())
        .bind(patch.is_final)
        .execute(self.pool.as_ref())
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "round",
                id: round_id,
            });
        }
        Ok(())
    }

    async fn players(&self, game_id: GameId) -> StoreResult<Vec<Player>> {
        let rows = sqlx::query(&format!(
            "SELECT {PLAYER_COLUMNS} FROM players
             WHERE game_id = $1
             ORDER BY position ASC NULLS LAST, id"
        ))
        .bind(game_id)
        .fetch_all(self.pool.as_ref())
        .await?;
        Ok(rows.iter().map(player_from_row).collect())
    }

    async fn get_player(&self, player_id: PlayerId) -> StoreResult<Player> {
        let row = sqlx::query(&format!(
            "SELECT {PLAYER_COLUMNS} FROM players WHERE id = $1"
        ))
        .bind(player_id)
        .fetch_optional(self.pool.as_ref())
        .await?
        .ok_or(StoreError::NotFound {
            entity: "player",
            id: player_id,
        })?;
        Ok(player_from_row(&row))
    }

    async fn update_player(&self, player_id: PlayerId, patch: &PlayerPatch) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE players SET
                position = CASE WHEN $2 THEN $3 ELSE position END,
                sitting_out = COALESCE($4, sitting_out),
                waiting = COALESCE($5, waiting),
                stand_up_next_hand = COALESCE($6, stand_up_next_hand),
                sit_out_next_hand = COALESCE($7, sit_out_next_hand),
                auto_fold = COALESCE($8, auto_fold),
                auto_ante = COALESCE($9, auto_ante),
                auto_ante_runback = COALESCE($10, auto_ante_runback),
                current_decision = CASE WHEN $11 THEN $12 ELSE current_decision END,
                ante_decision = CASE WHEN $13 THEN $14 ELSE ante_decision END
             WHERE id = $1",
        )
        .bind(player_id)
        .bind(patch.position.is_some())
        .bind(patch.position.flatten())
        .bind(patch.sitting_out)
        .bind(patch.waiting)
        .bind(patch.stand_up_next_hand)
        .bind(patch.sit_out_next_hand)
        .bind(patch.auto_fold)
        .bind(patch.auto_ante)
        .bind(patch.auto_ante_runback)
        .bind(patch.current_decision.is_some())
        .bind(patch.current_decision.clone().flatten())
        .bind(patch.ante_decision.is_some())
        .bind(patch.ante_decision.flatten().map(|d| d.as_str()))
        .execute(self.pool.as_ref())
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "player",
                id: player_id,
            });
        }
        Ok(())
    }

    async fn add_chips(&self, player_id: PlayerId, delta: i64) -> StoreResult<()> {
        let result = sqlx::query("UPDATE players SET chips = chips + $1 WHERE id = $2")
            .bind(delta)
            .bind(player_id)
            .execute(self.pool.as_ref())
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "player",
                id: player_id,
            });
        }
        Ok(())
    }

    async fn insert_hand_result(&self, result: &HandResult) -> StoreResult<i64> {
        let row = sqlx::query(
            "INSERT INTO hand_results
                (game_id, hand_number, winner_id, amount, description, idempotency_key)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING id",
        )
        .bind(result.game_id)
        .bind(result.hand_number)
        .bind(result.winner_id)
        .bind(result.amount)
        .bind(&result.description)
        .bind(&result.idempotency_key)
        .fetch_one(self.pool.as_ref())
        .await
        .map_err(|e| map_insert_err(e, result.idempotency_key.clone()))?;
        Ok(row.get("id"))
    }

    async fn insert_player_hand_result(&self, result: &PlayerHandResult) -> StoreResult<i64> {
        let row = sqlx::query(
            "INSERT INTO player_hand_results
                (game_id, hand_number, player_id, chip_delta, chips_after, idempotency_key)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING id",
        )
        .bind(result.game_id)
        .bind(result.hand_number)
        .bind(result.player_id)
        .bind(result.chip_delta)
        .bind(result.chips_after)
        .bind(&result.idempotency_key)
        .fetch_one(self.pool.as_ref())
        .await
        .map_err(|e| map_insert_err(e, result.idempotency_key.clone()))?;
        Ok(row.get("id"))
    }

    async fn publish(&self, game_id: GameId, event: &GameEvent) -> StoreResult<()> {
        let payload = serde_json::to_string(&EventEnvelope {
            game_id,
            event: event.clone(),
        })?;
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(NOTIFY_CHANNEL)
            .bind(payload)
            .execute(self.pool.as_ref())
            .await?;
        Ok(())
    }

    fn subscribe(&self, game_id: GameId) -> broadcast::Receiver<GameEvent> {
        self.sender_for(game_id).subscribe()
    }
}
