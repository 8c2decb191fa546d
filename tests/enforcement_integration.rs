//! Deadline, bot, and sweep enforcement scenarios against the in-memory
//! store.

mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};

use round_coordinator::config::CoordinationConfig;
use round_coordinator::enforcement::{
    BotEnforcer, BotTickOutcome, DeadlineEnforcer, EnforcementOutcome, SweepJob,
};
use round_coordinator::lifecycle::RoundOrchestrator;
use round_coordinator::store::{AnteDecision, GameStatus, GameStore, MemoryGameStore};
use round_coordinator::variant::AlwaysFold;

fn enforcer(store: Arc<MemoryGameStore>) -> DeadlineEnforcer<MemoryGameStore> {
    let config = CoordinationConfig::default();
    let orchestrator = Arc::new(RoundOrchestrator::new(store.clone(), config.clone()));
    DeadlineEnforcer::new(store, orchestrator, config)
}

fn bot_enforcer(store: Arc<MemoryGameStore>) -> BotEnforcer<MemoryGameStore> {
    let config = CoordinationConfig::default();
    let orchestrator = Arc::new(RoundOrchestrator::new(store.clone(), config.clone()));
    BotEnforcer::new(store, orchestrator, Arc::new(AlwaysFold), config)
}

#[tokio::test]
async fn future_deadlines_are_left_alone() {
    let store = Arc::new(MemoryGameStore::new());
    let mut game = common::game(1, GameStatus::AnteDecision);
    game.ante_decision_deadline = Some(Utc::now() + Duration::seconds(30));
    store.seed_game(game);
    store.seed_player(common::player(1, 1, Some(2)));

    let enforcer = enforcer(store.clone());
    assert_eq!(
        enforcer.enforce_game(1).await.unwrap(),
        EnforcementOutcome::NoActionNeeded
    );
    assert_eq!(
        store.get_game(1).await.unwrap().status,
        GameStatus::AnteDecision
    );
}

#[tokio::test]
async fn elapsed_ante_deadline_defaults_undecided_players() {
    let store = Arc::new(MemoryGameStore::new());
    let mut game = common::game(1, GameStatus::AnteDecision);
    game.ante_decision_deadline = Some(Utc::now() - Duration::seconds(1));
    store.seed_game(game);

    let mut decided = common::player(1, 1, Some(2));
    decided.ante_decision = Some(AnteDecision::AnteUp);
    store.seed_player(decided);
    let mut auto = common::player(2, 1, Some(4));
    auto.auto_ante = true;
    store.seed_player(auto);
    store.seed_player(common::player(3, 1, Some(5)));

    let enforcer = enforcer(store.clone());
    let outcome = enforcer.enforce_game(1).await.unwrap();
    let EnforcementOutcome::Actions(actions) = outcome else {
        panic!("expected actions, got {outcome:?}");
    };
    assert_eq!(actions.len(), 2);

    let game = store.get_game(1).await.unwrap();
    assert_eq!(game.status, GameStatus::GameSelection);
    assert_eq!(game.ante_decision_deadline, None);
    assert!(game.config_deadline.is_some());

    // Already-decided players keep their answer; auto-ante players are in,
    // everyone else sits out.
    assert_eq!(
        store.get_player(1).await.unwrap().ante_decision,
        Some(AnteDecision::AnteUp)
    );
    let auto = store.get_player(2).await.unwrap();
    assert_eq!(auto.ante_decision, Some(AnteDecision::AnteUp));
    assert!(!auto.sitting_out);
    assert_eq!(
        store.get_player(3).await.unwrap().ante_decision,
        Some(AnteDecision::SitOut)
    );
}

#[tokio::test]
async fn ante_enforcement_fires_exactly_once() {
    let store = Arc::new(MemoryGameStore::new());
    let mut game = common::game(1, GameStatus::AnteDecision);
    game.ante_decision_deadline = Some(Utc::now() - Duration::seconds(1));
    store.seed_game(game);
    store.seed_player(common::player(1, 1, Some(2)));
    store.seed_player(common::player(2, 1, Some(4)));

    let enforcer = enforcer(store.clone());
    let first = enforcer.enforce_game(1).await.unwrap();
    assert!(matches!(first, EnforcementOutcome::Actions(_)));

    // The deadline was consumed by the claim; a second tick (or a racing
    // sweep) finds a later phase with a fresh deadline and does nothing to it.
    let second = enforcer.enforce_game(1).await.unwrap();
    assert_eq!(second, EnforcementOutcome::NoActionNeeded);
}

#[tokio::test]
async fn elapsed_config_deadline_opens_ante_phase() {
    let store = Arc::new(MemoryGameStore::new());
    let mut game = common::game(1, GameStatus::Configuring);
    game.config_deadline = Some(Utc::now() - Duration::seconds(1));
    store.seed_game(game);
    let mut stale_answer = common::player(1, 1, Some(2));
    stale_answer.ante_decision = Some(AnteDecision::SitOut);
    store.seed_player(stale_answer);

    let enforcer = enforcer(store.clone());
    let outcome = enforcer.enforce_game(1).await.unwrap();
    assert_eq!(
        outcome,
        EnforcementOutcome::Actions(vec!["config_defaulted".to_string()])
    );

    let game = store.get_game(1).await.unwrap();
    assert_eq!(game.status, GameStatus::AnteDecision);
    assert_eq!(game.config_deadline, None);
    assert!(game.ante_decision_deadline.is_some());
    // The new ante phase starts with everyone undecided.
    assert_eq!(store.get_player(1).await.unwrap().ante_decision, None);
}

#[tokio::test]
async fn elapsed_selection_deadline_starts_the_hand() {
    let store = Arc::new(MemoryGameStore::new());
    let mut game = common::game(1, GameStatus::GameSelection);
    game.config_deadline = Some(Utc::now() - Duration::seconds(1));
    store.seed_game(game);
    store.seed_player(common::player(1, 1, Some(2)));
    store.seed_player(common::player(2, 1, Some(4)));

    let enforcer = enforcer(store.clone());
    let EnforcementOutcome::Actions(actions) = enforcer.enforce_game(1).await.unwrap() else {
        panic!("expected actions");
    };
    assert_eq!(actions[0], "selection_defaulted");
    assert_eq!(actions[1], "hand_started:1");

    let game = store.get_game(1).await.unwrap();
    assert_eq!(game.status, GameStatus::InProgress);
    assert!(store.latest_round(1).await.unwrap().is_some());
}

#[tokio::test]
async fn selection_without_players_parks_the_game() {
    let store = Arc::new(MemoryGameStore::new());
    let mut game = common::game(1, GameStatus::GameSelection);
    game.config_deadline = Some(Utc::now() - Duration::seconds(1));
    store.seed_game(game);
    store.seed_player(common::player(1, 1, Some(2)));

    let enforcer = enforcer(store.clone());
    let EnforcementOutcome::Actions(actions) = enforcer.enforce_game(1).await.unwrap() else {
        panic!("expected actions");
    };
    assert!(actions.contains(&"waiting_for_players".to_string()));
    assert_eq!(store.get_game(1).await.unwrap().status, GameStatus::Waiting);
}

#[tokio::test]
async fn elapsed_turn_deadline_folds_the_player_on_turn() {
    let store = Arc::new(MemoryGameStore::new());
    let mut game = common::game(1, GameStatus::InProgress);
    game.current_round = 1;
    store.seed_game(game.clone());
    store.seed_player(common::player(1, 1, Some(2)));
    store.seed_player(common::player(2, 1, Some(4)));
    store.seed_player(common::player(3, 1, Some(5)));
    store.seed_round(common::round(
        10,
        &game,
        1,
        30,
        Some(2),
        Some(Utc::now() - Duration::seconds(1)),
    ));

    let enforcer = enforcer(store.clone());
    let outcome = enforcer.enforce_game(1).await.unwrap();
    assert_eq!(
        outcome,
        EnforcementOutcome::Actions(vec!["turn_defaulted:1".to_string()])
    );

    let folded = store.get_player(1).await.unwrap();
    assert_eq!(folded.current_decision.as_deref(), Some("fold"));
    assert!(folded.auto_fold);

    // Turn advanced clockwise with a fresh deadline.
    let round = store.get_round(10).await.unwrap();
    assert_eq!(round.turn_position, Some(4));
    assert!(round.decision_deadline.unwrap() > Utc::now());

    // The new turn instance is not due yet.
    assert_eq!(
        enforcer.enforce_game(1).await.unwrap(),
        EnforcementOutcome::NoActionNeeded
    );
}

#[tokio::test]
async fn last_undecided_turn_clears_the_pointer() {
    let store = Arc::new(MemoryGameStore::new());
    let mut game = common::game(1, GameStatus::InProgress);
    game.current_round = 1;
    store.seed_game(game.clone());
    let mut decided = common::player(1, 1, Some(2));
    decided.current_decision = Some("call".to_string());
    store.seed_player(decided);
    store.seed_player(common::player(2, 1, Some(4)));
    store.seed_round(common::round(
        10,
        &game,
        1,
        20,
        Some(4),
        Some(Utc::now() - Duration::seconds(1)),
    ));

    let enforcer = enforcer(store.clone());
    enforcer.enforce_game(1).await.unwrap();

    let round = store.get_round(10).await.unwrap();
    assert_eq!(round.turn_position, None);
    assert_eq!(round.decision_deadline, None);
}

#[tokio::test]
async fn game_over_window_rotates_dealer_into_next_ante() {
    let store = Arc::new(MemoryGameStore::new());
    let mut game = common::game(1, GameStatus::GameOver);
    game.dealer_position = 2;
    game.game_over_at = Some(Utc::now() - Duration::seconds(60));
    store.seed_game(game);
    store.seed_player(common::player(1, 1, Some(2)));
    let mut leaver = common::player(2, 1, Some(4));
    leaver.stand_up_next_hand = true;
    store.seed_player(leaver);
    store.seed_player(common::player(3, 1, Some(5)));

    let enforcer = enforcer(store.clone());
    let EnforcementOutcome::Actions(actions) = enforcer.enforce_game(1).await.unwrap() else {
        panic!("expected actions");
    };
    assert_eq!(actions[0], "next_hand_ready");
    // Seat 4 stood up, so rotation from 2 skips to 5.
    assert_eq!(actions[1], "dealer:5");

    let game = store.get_game(1).await.unwrap();
    assert_eq!(game.status, GameStatus::AnteDecision);
    assert_eq!(game.dealer_position, 5);
    assert_eq!(game.game_over_at, None);
    assert!(game.ante_decision_deadline.is_some());

    let leaver = store.get_player(2).await.unwrap();
    assert_eq!(leaver.position, None);
    assert!(!leaver.stand_up_next_hand);
}

#[tokio::test]
async fn game_over_without_enough_players_ends_the_session() {
    let store = Arc::new(MemoryGameStore::new());
    let mut game = common::game(1, GameStatus::GameOver);
    game.game_over_at = Some(Utc::now() - Duration::seconds(60));
    store.seed_game(game);
    store.seed_player(common::player(1, 1, Some(2)));
    let mut leaver = common::player(2, 1, Some(4));
    leaver.stand_up_next_hand = true;
    store.seed_player(leaver);

    let enforcer = enforcer(store.clone());
    assert_eq!(
        enforcer.enforce_game(1).await.unwrap(),
        EnforcementOutcome::GameFinished
    );
    assert_eq!(
        store.get_game(1).await.unwrap().status,
        GameStatus::SessionEnded
    );
}

#[tokio::test]
async fn game_over_display_window_is_respected() {
    let store = Arc::new(MemoryGameStore::new());
    let mut game = common::game(1, GameStatus::GameOver);
    game.game_over_at = Some(Utc::now() - Duration::seconds(2));
    store.seed_game(game);
    store.seed_player(common::player(1, 1, Some(2)));
    store.seed_player(common::player(2, 1, Some(4)));

    // Default display window is longer than two seconds.
    let enforcer = enforcer(store.clone());
    assert_eq!(
        enforcer.enforce_game(1).await.unwrap(),
        EnforcementOutcome::NoActionNeeded
    );
}

#[tokio::test]
async fn stale_waiting_game_is_archived() {
    let store = Arc::new(MemoryGameStore::new());
    let mut game = common::game(1, GameStatus::Waiting);
    game.updated_at = Utc::now() - Duration::seconds(3 * 3600);
    store.seed_game(game);

    let mut fresh = common::game(2, GameStatus::Waiting);
    fresh.updated_at = Utc::now() - Duration::seconds(60);
    store.seed_game(fresh);

    let enforcer = enforcer(store.clone());
    assert_eq!(
        enforcer.enforce_game(1).await.unwrap(),
        EnforcementOutcome::GameFinished
    );
    assert_eq!(
        enforcer.enforce_game(2).await.unwrap(),
        EnforcementOutcome::NoActionNeeded
    );
    assert_eq!(
        store.get_game(1).await.unwrap().status,
        GameStatus::SessionEnded
    );
    assert_eq!(store.get_game(2).await.unwrap().status, GameStatus::Waiting);
}

#[tokio::test]
async fn abandoned_hand_without_a_deadline_is_archived() {
    let store = Arc::new(MemoryGameStore::new());
    let mut game = common::game(1, GameStatus::InProgress);
    game.current_round = 1;
    game.updated_at = Utc::now() - Duration::seconds(3 * 3600);
    store.seed_game(game.clone());
    store.seed_player(common::player(1, 1, Some(2)));
    store.seed_player(common::player(2, 1, Some(4)));
    // Every turn timed out and nobody came back to settle: no turn pointer,
    // no decision deadline, nothing for deadline enforcement to act on.
    store.seed_round(common::round(10, &game, 1, 20, None, None));

    let job = SweepJob::new(Arc::new(enforcer(store.clone())));
    let report = job.run_once().await.unwrap();
    assert_eq!(report.finished(), 1);
    assert_eq!(
        store.get_game(1).await.unwrap().status,
        GameStatus::SessionEnded
    );

    // A live hand in the same shape is left for its players.
    let mut live = common::game(2, GameStatus::InProgress);
    live.current_round = 1;
    store.seed_game(live.clone());
    store.seed_round(common::round(11, &live, 1, 20, None, None));
    let enforcer = enforcer(store.clone());
    assert_eq!(
        enforcer.enforce_game(2).await.unwrap(),
        EnforcementOutcome::NoActionNeeded
    );
    assert_eq!(
        store.get_game(2).await.unwrap().status,
        GameStatus::InProgress
    );
}

#[tokio::test]
async fn paused_games_are_never_enforced() {
    let store = Arc::new(MemoryGameStore::new());
    let mut game = common::game(1, GameStatus::AnteDecision);
    game.ante_decision_deadline = Some(Utc::now() - Duration::seconds(30));
    game.is_paused = true;
    store.seed_game(game);

    let enforcer = enforcer(store.clone());
    assert_eq!(
        enforcer.enforce_game(1).await.unwrap(),
        EnforcementOutcome::NoActionNeeded
    );
}

#[tokio::test]
async fn bots_decide_and_pass_the_turn() {
    let store = Arc::new(MemoryGameStore::new());
    let mut game = common::game(1, GameStatus::InProgress);
    game.current_round = 1;
    store.seed_game(game.clone());
    store.seed_player(common::bot(1, 1, Some(2)));
    store.seed_player(common::bot(2, 1, Some(4)));
    store.seed_round(common::round(
        10,
        &game,
        1,
        20,
        Some(2),
        Some(Utc::now() + Duration::seconds(45)),
    ));

    let bots = bot_enforcer(store.clone());
    let first = bots.tick(1).await.unwrap();
    assert_eq!(
        first,
        BotTickOutcome::Acted {
            player_id: 1,
            decision: "fold".to_string()
        }
    );
    assert_eq!(
        store.get_round(10).await.unwrap().turn_position,
        Some(4)
    );

    let second = bots.tick(1).await.unwrap();
    assert_eq!(
        second,
        BotTickOutcome::Acted {
            player_id: 2,
            decision: "fold".to_string()
        }
    );
    let round = store.get_round(10).await.unwrap();
    assert_eq!(round.turn_position, None);

    // Nothing left for a bot to do; repeated ticks stay idle.
    assert_eq!(bots.tick(1).await.unwrap(), BotTickOutcome::Idle);
}

#[tokio::test]
async fn bot_turn_attempts_are_memoized_per_round_and_stuck_set() {
    let store = Arc::new(MemoryGameStore::new());
    let mut game = common::game(1, GameStatus::InProgress);
    game.current_round = 1;
    store.seed_game(game.clone());
    store.seed_player(common::bot(1, 1, Some(2)));
    store.seed_player(common::player(2, 1, Some(4)));
    let deadline = Utc::now() + Duration::seconds(45);
    store.seed_round(common::round(10, &game, 1, 20, Some(2), Some(deadline)));

    let bots = bot_enforcer(store.clone());
    assert!(matches!(
        bots.tick(1).await.unwrap(),
        BotTickOutcome::Acted { player_id: 1, .. }
    ));

    // Rewind the round and wipe the recorded decision: the memo still holds
    // this (round, stuck bot) key, so the poller does not decide again.
    store
        .update_player(
            1,
            &round_coordinator::store::PlayerPatch {
                current_decision: Some(None),
                ..round_coordinator::store::PlayerPatch::default()
            },
        )
        .await
        .unwrap();
    store.seed_round(common::round(10, &game, 1, 20, Some(2), Some(deadline)));
    assert_eq!(bots.tick(1).await.unwrap(), BotTickOutcome::Idle);

    // A new round identity resets the memo.
    bots.forget_except(Some(11));
    store.seed_round(common::round(11, &game, 2, 20, Some(2), Some(deadline)));
    assert!(matches!(
        bots.tick(1).await.unwrap(),
        BotTickOutcome::Acted { player_id: 1, .. }
    ));
}

#[tokio::test]
async fn bots_answer_the_ante_question() {
    let store = Arc::new(MemoryGameStore::new());
    let mut game = common::game(1, GameStatus::AnteDecision);
    game.ante_decision_deadline = Some(Utc::now() + Duration::seconds(30));
    store.seed_game(game);
    store.seed_player(common::bot(1, 1, Some(2)));
    let mut broke = common::bot(2, 1, Some(4));
    broke.chips = 5;
    store.seed_player(broke);
    store.seed_player(common::player(3, 1, Some(5)));

    let bots = bot_enforcer(store.clone());
    assert!(matches!(
        bots.tick(1).await.unwrap(),
        BotTickOutcome::Acted { .. }
    ));

    assert_eq!(
        store.get_player(1).await.unwrap().ante_decision,
        Some(AnteDecision::AnteUp)
    );
    // Short stack sits out instead of anteing into a pot it cannot cover.
    assert_eq!(
        store.get_player(2).await.unwrap().ante_decision,
        Some(AnteDecision::SitOut)
    );
    // Humans are left to decide for themselves.
    assert_eq!(store.get_player(3).await.unwrap().ante_decision, None);
}

#[tokio::test]
async fn bot_dealer_starts_the_hand_without_waiting() {
    let store = Arc::new(MemoryGameStore::new());
    let mut game = common::game(1, GameStatus::GameSelection);
    game.dealer_position = 2;
    game.config_deadline = Some(Utc::now() + Duration::seconds(60));
    store.seed_game(game);
    store.seed_player(common::bot(1, 1, Some(2)));
    store.seed_player(common::player(2, 1, Some(4)));

    let bots = bot_enforcer(store.clone());
    assert_eq!(
        bots.tick(1).await.unwrap(),
        BotTickOutcome::Acted {
            player_id: 1,
            decision: "deal:1".to_string()
        }
    );
    assert_eq!(
        store.get_game(1).await.unwrap().status,
        GameStatus::InProgress
    );
}

#[tokio::test]
async fn sweep_covers_unwatched_games() {
    let store = Arc::new(MemoryGameStore::new());

    let mut due = common::game(1, GameStatus::AnteDecision);
    due.ante_decision_deadline = Some(Utc::now() - Duration::seconds(5));
    store.seed_game(due);
    store.seed_player(common::player(1, 1, Some(2)));
    store.seed_player(common::player(2, 1, Some(4)));

    let mut quiet = common::game(2, GameStatus::AnteDecision);
    quiet.ante_decision_deadline = Some(Utc::now() + Duration::seconds(30));
    store.seed_game(quiet);

    let mut stale = common::game(3, GameStatus::Waiting);
    stale.updated_at = Utc::now() - Duration::seconds(3 * 3600);
    store.seed_game(stale);

    // Ended games are not scanned at all.
    store.seed_game(common::game(4, GameStatus::SessionEnded));

    let job = SweepJob::new(Arc::new(enforcer(store.clone())));
    let report = job.run_once().await.unwrap();
    assert_eq!(report.scanned(), 3);
    assert_eq!(report.enforced(), 1);
    assert_eq!(report.finished(), 1);
    assert!(!report.had_failures());

    assert_eq!(
        store.get_game(1).await.unwrap().status,
        GameStatus::GameSelection
    );
    assert_eq!(
        store.get_game(3).await.unwrap().status,
        GameStatus::SessionEnded
    );
}

#[tokio::test]
async fn racing_enforcers_default_a_deadline_once() {
    let store = Arc::new(MemoryGameStore::new());
    let mut game = common::game(1, GameStatus::AnteDecision);
    game.ante_decision_deadline = Some(Utc::now() - Duration::seconds(1));
    store.seed_game(game);
    store.seed_player(common::player(1, 1, Some(2)));
    store.seed_player(common::player(2, 1, Some(4)));

    let enforcer = Arc::new(enforcer(store.clone()));
    let mut handles = Vec::new();
    for _ in 0..6 {
        let enforcer = enforcer.clone();
        handles.push(tokio::spawn(async move { enforcer.enforce_game(1).await }));
    }

    let mut acted = 0;
    for handle in handles {
        if let EnforcementOutcome::Actions(_) = handle.await.unwrap().unwrap() {
            acted += 1;
        }
    }
    assert_eq!(acted, 1);
}
