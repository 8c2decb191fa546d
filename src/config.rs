//! Coordination policy configuration.
//!
//! Deadlines, polling intervals, and sweep policy. All values have defaults
//! and can be overridden from the environment.

use std::env;
use std::time::Duration;

/// Coordination policy
#[derive(Debug, Clone)]
pub struct CoordinationConfig {
    /// Seconds the dealer has to finish configuring a hand
    pub config_decision_secs: i64,

    /// Seconds players have to make their ante decision
    pub ante_decision_secs: i64,

    /// Seconds the player on turn has to act
    pub turn_decision_secs: i64,

    /// Seconds the hand result stays on display before the next hand
    pub game_over_display_secs: i64,

    /// Client-side enforcement poll interval
    pub poll_interval: Duration,

    /// Bot decision enforcement poll interval
    pub bot_poll_interval: Duration,

    /// A game with no deadline and no update for this long is swept
    pub stale_game_secs: i64,

    /// Ante collected from every active player at hand start
    pub ante_amount: i64,

    /// Cap on the pot paid out at settlement, if any
    pub max_pot: Option<i64>,

    /// Minimum eligible players to start a hand
    pub min_players: usize,

    /// Maximum seats the variant supports
    pub max_players: usize,
}

impl CoordinationConfig {
    /// Create configuration from environment variables, falling back to
    /// defaults for anything unset.
    ///
    /// Recognized variables: `CONFIG_DECISION_SECS`, `ANTE_DECISION_SECS`,
    /// `TURN_DECISION_SECS`, `GAME_OVER_DISPLAY_SECS`, `POLL_INTERVAL_MS`,
    /// `BOT_POLL_INTERVAL_MS`, `STALE_GAME_SECS`, `ANTE_AMOUNT`, `MAX_POT`,
    /// `MIN_PLAYERS`, `MAX_PLAYERS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            config_decision_secs: env_i64("CONFIG_DECISION_SECS", defaults.config_decision_secs),
            ante_decision_secs: env_i64("ANTE_DECISION_SECS", defaults.ante_decision_secs),
            turn_decision_secs: env_i64("TURN_DECISION_SECS", defaults.turn_decision_secs),
            game_over_display_secs: env_i64(
                "GAME_OVER_DISPLAY_SECS",
                defaults.game_over_display_secs,
            ),
            poll_interval: Duration::from_millis(env_i64(
                "POLL_INTERVAL_MS",
                defaults.poll_interval.as_millis() as i64,
            ) as u64),
            bot_poll_interval: Duration::from_millis(env_i64(
                "BOT_POLL_INTERVAL_MS",
                defaults.bot_poll_interval.as_millis() as i64,
            ) as u64),
            stale_game_secs: env_i64("STALE_GAME_SECS", defaults.stale_game_secs),
            ante_amount: env_i64("ANTE_AMOUNT", defaults.ante_amount),
            max_pot: env::var("MAX_POT").ok().and_then(|v| v.parse().ok()),
            min_players: env_i64("MIN_PLAYERS", defaults.min_players as i64) as usize,
            max_players: env_i64("MAX_PLAYERS", defaults.max_players as i64) as usize,
        }
    }
}

fn env_i64(key: &str, default: i64) -> i64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            config_decision_secs: 60,
            ante_decision_secs: 30,
            turn_decision_secs: 45,
            game_over_display_secs: 12,
            poll_interval: Duration::from_millis(2000),
            bot_poll_interval: Duration::from_millis(1500),
            // Observed operational constant: games untouched for two hours
            // with no deadline are considered abandoned.
            stale_game_secs: 7200,
            ante_amount: 10,
            max_pot: None,
            min_players: 2,
            max_players: 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = CoordinationConfig::default();
        assert!(config.min_players >= 2);
        assert!(config.max_players >= config.min_players);
        assert_eq!(config.stale_game_secs, 7200);
        assert!(config.poll_interval >= Duration::from_millis(100));
    }
}
