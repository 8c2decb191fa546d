//! Property tests for dealer rotation and end-of-hand flag evaluation.

use proptest::prelude::*;

use round_coordinator::lifecycle::{FlagAction, evaluate, next_hand_action, rotate_dealer};
use round_coordinator::store::Player;

fn player_with_flags(
    id: i64,
    position: Option<i32>,
    flags: (bool, bool, bool, bool),
) -> Player {
    let (stand_up, sit_out, auto_fold, waiting) = flags;
    Player {
        id,
        game_id: 1,
        position,
        display_name: format!("p{id}"),
        is_bot: false,
        chips: 1000,
        sitting_out: waiting, // waiting players were sitting out
        waiting,
        stand_up_next_hand: stand_up,
        sit_out_next_hand: sit_out,
        auto_fold,
        auto_ante: false,
        auto_ante_runback: false,
        current_decision: None,
        ante_decision: None,
    }
}

proptest! {
    #[test]
    fn rotation_always_lands_on_an_eligible_seat(
        current in 0..16i32,
        seats in proptest::collection::btree_set(0..16i32, 0..8),
    ) {
        let eligible: Vec<i32> = seats.into_iter().collect();
        match rotate_dealer(current, &eligible) {
            Some(next) => prop_assert!(eligible.contains(&next)),
            None => prop_assert!(eligible.is_empty()),
        }
    }

    #[test]
    fn rotation_picks_the_nearest_clockwise_seat(
        current in 0..16i32,
        seats in proptest::collection::btree_set(0..16i32, 1..8),
    ) {
        let eligible: Vec<i32> = seats.into_iter().collect();
        let next = rotate_dealer(current, &eligible).unwrap();
        if eligible.contains(&current) {
            match eligible.iter().copied().find(|&s| s > current) {
                Some(nearest) => prop_assert_eq!(next, nearest),
                // Dealer holds the highest seat: wrap to the lowest.
                None => prop_assert_eq!(next, eligible[0]),
            }
        } else {
            prop_assert_eq!(next, eligible[0]);
        }
    }

    #[test]
    fn exactly_one_flag_rule_applies(
        stand_up in any::<bool>(),
        sit_out in any::<bool>(),
        auto_fold in any::<bool>(),
        waiting in any::<bool>(),
    ) {
        let p = player_with_flags(1, Some(3), (stand_up, sit_out, auto_fold, waiting));
        let action = next_hand_action(&p);
        let expected = if stand_up {
            FlagAction::StandUp
        } else if sit_out {
            FlagAction::SitOutNext
        } else if auto_fold {
            FlagAction::AutoFoldSitOut
        } else if waiting {
            FlagAction::Rejoin
        } else {
            FlagAction::None
        };
        prop_assert_eq!(action, expected);
    }

    #[test]
    fn evaluation_never_seats_a_standing_player_as_dealer(
        flags in proptest::collection::vec(
            (any::<bool>(), any::<bool>(), any::<bool>(), any::<bool>()),
            1..6,
        ),
        current in 0..8i32,
    ) {
        let players: Vec<Player> = flags
            .iter()
            .enumerate()
            .map(|(i, &f)| player_with_flags(i as i64 + 1, Some(i as i32), f))
            .collect();
        let (_, summary) = evaluate(&players, current, true);

        if let Some(dealer_seat) = summary.next_dealer {
            let dealer = players
                .iter()
                .find(|p| p.position == Some(dealer_seat))
                .unwrap();
            prop_assert!(!dealer.stand_up_next_hand);
            prop_assert!(!dealer.sit_out_next_hand);
            prop_assert!(!dealer.auto_fold);
        }
        prop_assert!(summary.dealer_eligible <= players.len());
        prop_assert!(summary.active_players <= players.len());
    }
}
