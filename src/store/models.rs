//! Row models for the shared game state store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Game ID type
pub type GameId = i64;

/// Round ID type
pub type RoundId = i64;

/// Player ID type
pub type PlayerId = i64;

/// Game lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    /// Dealer is configuring the upcoming hand (guarded by `config_deadline`)
    Configuring,
    /// Dealer is picking the variant for this hand
    GameSelection,
    /// Players are deciding whether to ante (guarded by `ante_decision_deadline`)
    AnteDecision,
    /// A hand is being played (per-turn deadline lives on the active round)
    InProgress,
    /// Hand finished; result is on display for a short fixed window
    GameOver,
    /// Seats are being assigned a first dealer
    DealerSelection,
    /// Waiting for enough players to seat
    Waiting,
    /// Session ended; no further hands will be played
    SessionEnded,
}

impl GameStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameStatus::Configuring => "configuring",
            GameStatus::GameSelection => "game_selection",
            GameStatus::AnteDecision => "ante_decision",
            GameStatus::InProgress => "in_progress",
            GameStatus::GameOver => "game_over",
            GameStatus::DealerSelection => "dealer_selection",
            GameStatus::Waiting => "waiting",
            GameStatus::SessionEnded => "session_ended",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "configuring" => Some(GameStatus::Configuring),
            "game_selection" => Some(GameStatus::GameSelection),
            "ante_decision" => Some(GameStatus::AnteDecision),
            "in_progress" => Some(GameStatus::InProgress),
            "game_over" => Some(GameStatus::GameOver),
            "dealer_selection" => Some(GameStatus::DealerSelection),
            "waiting" => Some(GameStatus::Waiting),
            "session_ended" => Some(GameStatus::SessionEnded),
            _ => None,
        }
    }

    /// Statuses in which enforcement pollers and the sweep job care about a game.
    pub fn is_active(&self) -> bool {
        !matches!(self, GameStatus::SessionEnded)
    }
}

impl std::fmt::Display for GameStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ante decision recorded per player per hand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnteDecision {
    AnteUp,
    SitOut,
}

impl AnteDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnteDecision::AnteUp => "ante_up",
            AnteDecision::SitOut => "sit_out",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ante_up" => Some(AnteDecision::AnteUp),
            "sit_out" => Some(AnteDecision::SitOut),
            _ => None,
        }
    }
}

impl std::fmt::Display for AnteDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Round status: `betting` until settlement claims the row, then `completed`.
/// Variant-specific intermediate phases live in the round's opaque
/// `variant_state`, owned by the rule engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    Betting,
    Completed,
}

impl RoundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoundStatus::Betting => "betting",
            RoundStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "betting" => Some(RoundStatus::Betting),
            "completed" => Some(RoundStatus::Completed),
            _ => None,
        }
    }
}

impl std::fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Game model: one seating of play spanning many hands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Game {
    pub id: GameId,
    /// Hand-numbering scope key; rounds carry `(dealer_game_id, hand_number)`.
    pub dealer_game_id: Uuid,
    pub status: GameStatus,
    /// Number of the hand currently being played (or about to start).
    pub current_round: i32,
    pub total_hands: i32,
    /// Pot carried between hands (ties carry the pot forward).
    pub pot_amount: i64,
    pub dealer_position: i32,
    pub is_paused: bool,
    /// Milliseconds left on the active deadline when the game was paused.
    pub paused_time_remaining: Option<i64>,
    pub config_deadline: Option<DateTime<Utc>>,
    pub ante_decision_deadline: Option<DateTime<Utc>>,
    pub is_first_hand: bool,
    pub last_round_result: Option<String>,
    /// Anchor for the result-display countdown after settlement.
    pub game_over_at: Option<DateTime<Utc>>,
    pub allow_bot_dealers: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Game {
    /// The single deadline guarding the current phase, if any. At most one is
    /// non-null at a time; it is cleared the instant the phase ends.
    pub fn active_deadline(&self) -> Option<DateTime<Utc>> {
        match self.status {
            GameStatus::Configuring | GameStatus::GameSelection => self.config_deadline,
            GameStatus::AnteDecision => self.ante_decision_deadline,
            _ => None,
        }
    }
}

/// Round model: one hand within a game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Round {
    pub id: RoundId,
    pub game_id: GameId,
    pub dealer_game_id: Uuid,
    pub hand_number: i32,
    pub round_number: i32,
    pub status: RoundStatus,
    pub pot: i64,
    /// Per-turn decision deadline for the player on turn.
    pub decision_deadline: Option<DateTime<Utc>>,
    /// Seat position of the player expected to act, if the variant is turn-based.
    pub turn_position: Option<i32>,
    /// Opaque variant phase data owned by the rule-engine collaborator.
    pub variant_state: serde_json::Value,
    /// Final rounds are exempt from retention purging.
    pub is_final: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Player model: one occupant (human or bot) of a game.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub game_id: GameId,
    /// Seat number; null once the player becomes a pure observer.
    pub position: Option<i32>,
    pub display_name: String,
    pub is_bot: bool,
    pub chips: i64,
    pub sitting_out: bool,
    pub waiting: bool,
    pub stand_up_next_hand: bool,
    pub sit_out_next_hand: bool,
    pub auto_fold: bool,
    pub auto_ante: bool,
    pub auto_ante_runback: bool,
    /// Null means "awaiting" for the current turn/phase.
    pub current_decision: Option<String>,
    pub ante_decision: Option<AnteDecision>,
}

impl Player {
    /// Seated and not sitting out: participates in the current hand.
    pub fn is_active(&self) -> bool {
        self.position.is_some() && !self.sitting_out
    }

    /// A standing auto-ante preference (either flavor; they are mutually
    /// exclusive) turns a missed ante deadline into `ante_up` instead of
    /// `sit_out`.
    pub fn has_auto_ante(&self) -> bool {
        self.auto_ante || self.auto_ante_runback
    }
}

/// Guard columns for a conditional update on a game row. The update applies
/// only when every present field matches the stored value; nullable deadline
/// fields compare the exact observed instance (null included).
#[derive(Debug, Clone, Default)]
pub struct GameGuard {
    pub status: Option<GameStatus>,
    pub current_round: Option<i32>,
    /// Outer `Some` = compare; inner value is the expected (possibly null) deadline.
    pub config_deadline: Option<Option<DateTime<Utc>>>,
    pub ante_decision_deadline: Option<Option<DateTime<Utc>>>,
}

impl GameGuard {
    pub fn status(status: GameStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_current_round(mut self, current_round: i32) -> Self {
        self.current_round = Some(current_round);
        self
    }

    pub fn with_config_deadline(mut self, observed: Option<DateTime<Utc>>) -> Self {
        self.config_deadline = Some(observed);
        self
    }

    pub fn with_ante_deadline(mut self, observed: Option<DateTime<Utc>>) -> Self {
        self.ante_decision_deadline = Some(observed);
        self
    }
}

/// New values written by a claimed game transition. `None` leaves a column
/// untouched; for nullable columns, `Some(None)` clears it.
#[derive(Debug, Clone, Default)]
pub struct GamePatch {
    pub status: Option<GameStatus>,
    pub current_round: Option<i32>,
    pub total_hands: Option<i32>,
    pub pot_amount: Option<i64>,
    pub dealer_position: Option<i32>,
    pub is_paused: Option<bool>,
    pub paused_time_remaining: Option<Option<i64>>,
    pub config_deadline: Option<Option<DateTime<Utc>>>,
    pub ante_decision_deadline: Option<Option<DateTime<Utc>>>,
    pub is_first_hand: Option<bool>,
    pub last_round_result: Option<Option<String>>,
    pub game_over_at: Option<Option<DateTime<Utc>>>,
}

/// New values for the active round.
#[derive(Debug, Clone, Default)]
pub struct RoundPatch {
    pub pot: Option<i64>,
    pub decision_deadline: Option<Option<DateTime<Utc>>>,
    pub turn_position: Option<Option<i32>>,
    pub variant_state: Option<serde_json::Value>,
    pub is_final: Option<bool>,
}

/// Per-player flag/decision writes.
#[derive(Debug, Clone, Default)]
pub struct PlayerPatch {
    pub position: Option<Option<i32>>,
    pub sitting_out: Option<bool>,
    pub waiting: Option<bool>,
    pub stand_up_next_hand: Option<bool>,
    pub sit_out_next_hand: Option<bool>,
    pub auto_fold: Option<bool>,
    pub auto_ante: Option<bool>,
    pub auto_ante_runback: Option<bool>,
    pub current_decision: Option<Option<String>>,
    pub ante_decision: Option<Option<AnteDecision>>,
}

/// Insert payload for a new round. `(dealer_game_id, hand_number)` carries a
/// store-level uniqueness constraint; a duplicate-key outcome means another
/// actor already started this hand.
#[derive(Debug, Clone)]
pub struct NewRound {
    pub game_id: GameId,
    pub dealer_game_id: Uuid,
    pub hand_number: i32,
    pub round_number: i32,
    pub pot: i64,
    pub decision_deadline: Option<DateTime<Utc>>,
    pub turn_position: Option<i32>,
    pub variant_state: serde_json::Value,
}

/// Immutable settlement record, one per settled hand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandResult {
    pub game_id: GameId,
    pub hand_number: i32,
    /// Null for carried-forward (tie / no-decision) hands.
    pub winner_id: Option<PlayerId>,
    pub amount: i64,
    pub description: String,
    pub idempotency_key: String,
}

/// Per-player chip-change snapshot for a settled hand, for downstream
/// balance reconciliation. Never mutated after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerHandResult {
    pub game_id: GameId,
    pub hand_number: i32,
    pub player_id: PlayerId,
    pub chip_delta: i64,
    pub chips_after: i64,
    pub idempotency_key: String,
}

/// Change-notification event published per game so connected clients can
/// react to another actor's successful claim without waiting for their poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GameEvent {
    StatusChanged { status: GameStatus },
    RoundStarted { hand_number: i32 },
    RoundSettled { hand_number: i32 },
    DecisionRecorded { player_id: PlayerId },
    PlayerUpdated { player_id: PlayerId },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            GameStatus::Configuring,
            GameStatus::GameSelection,
            GameStatus::AnteDecision,
            GameStatus::InProgress,
            GameStatus::GameOver,
            GameStatus::DealerSelection,
            GameStatus::Waiting,
            GameStatus::SessionEnded,
        ] {
            assert_eq!(GameStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(GameStatus::parse("bogus"), None);
    }

    #[test]
    fn active_deadline_follows_status() {
        let now = Utc::now();
        let mut game = Game {
            id: 1,
            dealer_game_id: Uuid::new_v4(),
            status: GameStatus::AnteDecision,
            current_round: 0,
            total_hands: 0,
            pot_amount: 0,
            dealer_position: 0,
            is_paused: false,
            paused_time_remaining: None,
            config_deadline: None,
            ante_decision_deadline: Some(now),
            is_first_hand: true,
            last_round_result: None,
            game_over_at: None,
            allow_bot_dealers: false,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(game.active_deadline(), Some(now));

        game.status = GameStatus::InProgress;
        assert_eq!(game.active_deadline(), None);

        game.status = GameStatus::Configuring;
        game.config_deadline = Some(now);
        assert_eq!(game.active_deadline(), Some(now));
    }
}
