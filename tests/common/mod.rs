#![allow(dead_code)]

use chrono::{DateTime, Utc};
use uuid::Uuid;

use round_coordinator::config::CoordinationConfig;
use round_coordinator::store::{Game, GameId, GameStatus, Player, PlayerId, Round, RoundStatus};

pub fn config() -> CoordinationConfig {
    CoordinationConfig::default()
}

pub fn game(id: GameId, status: GameStatus) -> Game {
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

pub fn player(id: PlayerId, game_id: GameId, position: Option<i32>) -> Player {
    Player {
        id,
        game_id,
        position,
        display_name: format!("player-{id}"),
        is_bot: false,
        chips: 1000,
        sitting_out: false,
        waiting: false,
        stand_up_next_hand: false,
        sit_out_next_hand: false,
        auto_fold: false,
        auto_ante: false,
        auto_ante_runback: false,
        current_decision: None,
        ante_decision: None,
    }
}

pub fn bot(id: PlayerId, game_id: GameId, position: Option<i32>) -> Player {
    let mut p = player(id, game_id, position);
    p.is_bot = true;
    p.display_name = format!("bot-{id}");
    p
}

pub fn round(
    id: i64,
    game: &Game,
    hand_number: i32,
    pot: i64,
    turn_position: Option<i32>,
    decision_deadline: Option<DateTime<Utc>>,
) -> Round {
    let now = Utc::now();
    Round {
        id,
        game_id: game.id,
        dealer_game_id: game.dealer_game_id,
        hand_number,
        round_number: 1,
        status: RoundStatus::Betting,
        pot,
        decision_deadline,
        turn_position,
        variant_state: serde_json::Value::Null,
        is_final: false,
        created_at: now,
        updated_at: now,
    }
}
