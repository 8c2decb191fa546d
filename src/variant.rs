//! Seams toward the variant rule engines.
//!
//! The five game variants (cards, dice, trivia, cribbage) own hand ranking,
//! scoring, and decision vocabulary. This core consumes them as pure
//! functions over plain data: a bot decision function and a showdown
//! evaluator. Neither has side effects; decisions are opaque tokens the core
//! only records and clears.

use serde::{Deserialize, Serialize};

use crate::store::{Game, Player, PlayerId, Round};

/// Plain snapshot of a table handed to the rule-engine collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableView {
    pub game: Game,
    pub round: Round,
    pub players: Vec<Player>,
}

/// Showdown outcome produced by a variant's evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Showdown {
    /// Winning player, or `None` for a tie / no-decision hand, which carries
    /// the pot forward instead of settling.
    pub winner_id: Option<PlayerId>,
    /// Additional per-player chip deltas the variant wants applied at
    /// settlement (side bets, penalties). Applied only by the settlement
    /// winner, through the store's commutative increment.
    pub payouts: Vec<(PlayerId, i64)>,
    /// Human-readable result line for display and the audit record.
    pub summary: String,
}

impl Showdown {
    pub fn tie(summary: impl Into<String>) -> Self {
        Self {
            winner_id: None,
            payouts: Vec::new(),
            summary: summary.into(),
        }
    }

    pub fn winner(player_id: PlayerId, summary: impl Into<String>) -> Self {
        Self {
            winner_id: Some(player_id),
            payouts: Vec::new(),
            summary: summary.into(),
        }
    }
}

/// Pure bot decision function: table state in, decision token out.
pub trait BotBrain: Send + Sync {
    fn decide(&self, view: &TableView, bot: &Player) -> String;
}

/// Pure showdown evaluation: table state in, winner and payouts out.
pub trait ShowdownEvaluator: Send + Sync {
    fn evaluate(&self, view: &TableView) -> Showdown;
}

/// Fallback brain that always plays the variant-neutral default. Used when a
/// variant ships no bot logic; keeps a stuck table moving.
pub struct AlwaysFold;

impl BotBrain for AlwaysFold {
    fn decide(&self, _view: &TableView, _bot: &Player) -> String {
        "fold".to_string()
    }
}
