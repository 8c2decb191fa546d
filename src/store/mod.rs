//! Shared state store access.
//!
//! The coordination engine treats the store as its only shared mutable
//! resource: point reads, conditional point updates, atomic increments, and a
//! change-notification feed. This module provides the PostgreSQL connection
//! pool, the `GameStore` repository trait, and its two implementations.

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

pub mod config;
pub mod errors;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod repository;
pub mod timeouts;

pub use config::StoreConfig;
pub use errors::{StoreError, StoreResult};
pub use memory::MemoryGameStore;
pub use models::{
    AnteDecision, Game, GameEvent, GameGuard, GameId, GamePatch, GameStatus, HandResult, NewRound,
    Player, PlayerHandResult, PlayerId, PlayerPatch, Round, RoundId, RoundPatch, RoundStatus,
};
pub use postgres::PgGameStore;
pub use repository::GameStore;

/// Database connection pool wrapper
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool
    pub async fn new(config: &StoreConfig) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
            .connect(&config.database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check if the database connection is healthy
    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Close the database connection pool
    pub async fn close(self) {
        self.pool.close().await;
    }
}
