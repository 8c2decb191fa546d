//! End-of-hand player state evaluation and dealer rotation.
//!
//! Runs once per hand, after settlement and before the next hand's start.
//! The rules are pure functions so the enforcement path can compute the
//! resulting patches before claiming the game transition and apply them only
//! as the claim winner. Applying the patches twice is harmless: each rule
//! clears the flag it consumes.

use crate::store::{Player, PlayerId, PlayerPatch};

/// The single rule a player matches at the end of a hand, in precedence
/// order. Each player matches exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagAction {
    /// Release the seat: position -> null, observer from the next hand on.
    StandUp,
    /// Sit out the next hand only.
    SitOutNext,
    /// Timed out last hand (`auto_fold` still set): sit out.
    AutoFoldSitOut,
    /// Previously sitting out and asked to rejoin: admit to the next hand.
    Rejoin,
    /// No change.
    None,
}

/// First matching rule wins; `stand_up_next_hand` beats everything else.
pub fn next_hand_action(player: &Player) -> FlagAction {
    if player.stand_up_next_hand {
        FlagAction::StandUp
    } else if player.sit_out_next_hand {
        FlagAction::SitOutNext
    } else if player.auto_fold {
        FlagAction::AutoFoldSitOut
    } else if player.waiting {
        FlagAction::Rejoin
    } else {
        FlagAction::None
    }
}

/// The store patch implementing a rule, or `None` when nothing changes.
pub fn patch_for(action: FlagAction) -> Option<PlayerPatch> {
    match action {
        FlagAction::StandUp => Some(PlayerPatch {
            position: Some(None),
            sitting_out: Some(false),
            stand_up_next_hand: Some(false),
            sit_out_next_hand: Some(false),
            waiting: Some(false),
            ..PlayerPatch::default()
        }),
        FlagAction::SitOutNext => Some(PlayerPatch {
            sitting_out: Some(true),
            sit_out_next_hand: Some(false),
            ..PlayerPatch::default()
        }),
        FlagAction::AutoFoldSitOut => Some(PlayerPatch {
            sitting_out: Some(true),
            auto_fold: Some(false),
            ..PlayerPatch::default()
        }),
        FlagAction::Rejoin => Some(PlayerPatch {
            sitting_out: Some(false),
            waiting: Some(false),
            ..PlayerPatch::default()
        }),
        FlagAction::None => None,
    }
}

/// Next seat strictly clockwise from `current`, wrapping. `current` need not
/// be in the set; `seats` must be sorted ascending. Used for turn order, where
/// the seat that just acted is no longer in the waiting set.
pub fn next_seat_clockwise(current: i32, seats: &[i32]) -> Option<i32> {
    seats
        .iter()
        .find(|&&seat| seat > current)
        .or_else(|| seats.first())
        .copied()
}

/// Next dealer strictly clockwise from `current`, wrapping; if `current` is
/// not an eligible seat, the first eligible seat in seat order. `eligible`
/// must be sorted ascending.
pub fn rotate_dealer(current: i32, eligible: &[i32]) -> Option<i32> {
    if eligible.is_empty() {
        return None;
    }
    if !eligible.contains(&current) {
        return eligible.first().copied();
    }
    next_seat_clockwise(current, eligible)
}

/// Player-set summary after applying the end-of-hand rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationSummary {
    pub active_players: usize,
    pub active_humans: usize,
    pub dealer_eligible: usize,
    pub next_dealer: Option<i32>,
}

/// Evaluate every player's end-of-hand rule and the resulting dealer
/// rotation. Returns the per-player patches (flag writes) for the claim
/// winner to apply, plus the summary for the next hand's preconditions.
pub fn evaluate(
    players: &[Player],
    current_dealer: i32,
    allow_bot_dealers: bool,
) -> (Vec<(PlayerId, PlayerPatch)>, EvaluationSummary) {
    let mut patches = Vec::new();
    let mut next_states: Vec<Player> = Vec::with_capacity(players.len());

    for player in players {
        let action = next_hand_action(player);
        let mut projected = player.clone();
        if let Some(patch) = patch_for(action) {
            apply_projection(&mut projected, &patch);
            patches.push((player.id, patch));
        }
        next_states.push(projected);
    }

    let active_players = next_states.iter().filter(|p| p.is_active()).count();
    let active_humans = next_states
        .iter()
        .filter(|p| p.is_active() && !p.is_bot)
        .count();

    let mut eligible_seats: Vec<i32> = next_states
        .iter()
        .filter(|p| p.is_active() && (allow_bot_dealers || !p.is_bot))
        .filter_map(|p| p.position)
        .collect();
    eligible_seats.sort_unstable();

    let summary = EvaluationSummary {
        active_players,
        active_humans,
        dealer_eligible: eligible_seats.len(),
        next_dealer: rotate_dealer(current_dealer, &eligible_seats),
    };

    (patches, summary)
}

// Mirror of the store-side patch application, for projecting eligibility
// before the patches are actually written.
fn apply_projection(player: &mut Player, patch: &PlayerPatch) {
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
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(id: PlayerId, position: Option<i32>) -> Player {
        Player {
            id,
            game_id: 1,
            position,
            display_name: format!("p{id}"),
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

    #[test]
    fn rotation_moves_clockwise_with_wrap() {
        assert_eq!(rotate_dealer(4, &[2, 4, 5]), Some(5));
        assert_eq!(rotate_dealer(5, &[2, 4, 5]), Some(2));
    }

    #[test]
    fn rotation_from_ineligible_dealer_starts_at_first_seat() {
        assert_eq!(rotate_dealer(7, &[2, 4, 5]), Some(2));
    }

    #[test]
    fn rotation_with_no_eligible_seats() {
        assert_eq!(rotate_dealer(3, &[]), None);
    }

    #[test]
    fn turn_order_moves_to_nearest_higher_seat() {
        // The acting seat is not in the waiting set; advance clockwise anyway.
        assert_eq!(next_seat_clockwise(3, &[2, 4]), Some(4));
        assert_eq!(next_seat_clockwise(5, &[2, 4]), Some(2));
        assert_eq!(next_seat_clockwise(1, &[]), None);
    }

    #[test]
    fn stand_up_wins_over_sit_out() {
        let mut p = player(1, Some(3));
        p.stand_up_next_hand = true;
        p.sit_out_next_hand = true;
        assert_eq!(next_hand_action(&p), FlagAction::StandUp);

        let patch = patch_for(FlagAction::StandUp).unwrap();
        assert_eq!(patch.position, Some(None));
        assert_eq!(patch.stand_up_next_hand, Some(false));
        // The shadowed sit-out flag is cleared too, not deferred to next hand.
        assert_eq!(patch.sit_out_next_hand, Some(false));
    }

    #[test]
    fn precedence_order_is_stable() {
        let mut p = player(1, Some(1));
        p.sit_out_next_hand = true;
        p.auto_fold = true;
        p.waiting = true;
        assert_eq!(next_hand_action(&p), FlagAction::SitOutNext);

        p.sit_out_next_hand = false;
        assert_eq!(next_hand_action(&p), FlagAction::AutoFoldSitOut);

        p.auto_fold = false;
        assert_eq!(next_hand_action(&p), FlagAction::Rejoin);

        p.waiting = false;
        assert_eq!(next_hand_action(&p), FlagAction::None);
    }

    #[test]
    fn waiting_player_rejoins_next_hand() {
        let mut p = player(1, Some(2));
        p.sitting_out = true;
        p.waiting = true;

        let (patches, summary) = evaluate(&[p], 2, false);
        assert_eq!(patches.len(), 1);
        assert_eq!(summary.active_players, 1);
        assert_eq!(summary.next_dealer, Some(2));
    }

    #[test]
    fn bots_excluded_from_dealer_rotation_unless_allowed() {
        let mut bot = player(1, Some(2));
        bot.is_bot = true;
        let human_a = player(2, Some(4));
        let human_b = player(3, Some(5));
        let players = vec![bot.clone(), human_a.clone(), human_b.clone()];

        let (_, summary) = evaluate(&players, 5, false);
        assert_eq!(summary.dealer_eligible, 2);
        assert_eq!(summary.next_dealer, Some(4));

        let (_, summary) = evaluate(&players, 5, true);
        assert_eq!(summary.dealer_eligible, 3);
        assert_eq!(summary.next_dealer, Some(2));
    }

    #[test]
    fn standing_up_player_leaves_eligibility_counts() {
        let mut leaver = player(1, Some(2));
        leaver.stand_up_next_hand = true;
        let stayer = player(2, Some(4));

        let (patches, summary) = evaluate(&[leaver, stayer], 2, false);
        assert_eq!(patches.len(), 1);
        assert_eq!(summary.active_players, 1);
        assert_eq!(summary.dealer_eligible, 1);
        assert_eq!(summary.next_dealer, Some(4));
    }
}
