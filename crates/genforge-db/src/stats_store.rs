//! Persistence for `player_stats` and `economic_transactions`.
//!
//! Earnings increments and transaction rows are batched per player; the
//! owned-generator count is refreshed in the background after placement
//! and removal.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use genforge_types::money::{from_cents, to_cents};
use genforge_types::{EconomicTransaction, PlayerId, PlayerStats, TransactionSource};
use rust_decimal::Decimal;

use crate::error::DbError;
use crate::gateway::Gateway;
use crate::params;
use crate::value::to_millis;

/// Table name used in error reports.
const TABLE: &str = "player_stats";

/// Recount a player's generators, creating the stats row if needed. A
/// blank name keeps the stored one.
const REFRESH_GENERATORS_OWNED: &str = "INSERT INTO player_stats (uuid, player_name, generators_owned) \
     VALUES (?1, ?2, (SELECT COUNT(*) FROM generators WHERE owner = ?1)) \
     ON CONFLICT (uuid) DO UPDATE SET \
     generators_owned = excluded.generators_owned, \
     player_name = CASE WHEN excluded.player_name = '' THEN player_stats.player_name \
     ELSE excluded.player_name END";

/// Add to a player's lifetime earnings.
const ADD_EARNINGS: &str = "INSERT INTO player_stats (uuid, total_earnings) VALUES (?1, ?2) \
     ON CONFLICT (uuid) DO UPDATE SET total_earnings = player_stats.total_earnings + excluded.total_earnings";

/// Append one money movement.
const INSERT_TRANSACTION: &str = "INSERT INTO economic_transactions (player_uuid, amount, source, timestamp) \
     VALUES (?1, ?2, ?3, ?4)";

/// Operations on the statistics tables.
pub struct StatsStore<'a> {
    gateway: &'a Arc<Gateway>,
}

impl<'a> StatsStore<'a> {
    /// Create a store bound to the gateway.
    pub const fn new(gateway: &'a Arc<Gateway>) -> Self {
        Self { gateway }
    }

    /// Recount the player's generators in the background.
    pub fn refresh_generators_owned(&self, player: PlayerId, player_name: &str) {
        self.gateway.execute_detached(
            REFRESH_GENERATORS_OWNED,
            params![player.to_string(), player_name],
        );
    }

    /// Recount the player's generators and wait for the write.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the statement fails.
    pub async fn refresh_generators_owned_now(&self, player: PlayerId, player_name: &str) -> Result<u64, DbError> {
        self.gateway
            .execute(
                REFRESH_GENERATORS_OWNED,
                &params![player.to_string(), player_name],
            )
            .await
    }

    /// Queue an earnings increment on the player's batch.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Closed`] after shutdown.
    pub fn queue_earnings(&self, player: PlayerId, amount: Decimal) -> Result<(), DbError> {
        let actor = player.to_string();
        self.gateway.add_batch_operation(
            &actor,
            ADD_EARNINGS,
            params![actor.as_str(), to_cents(amount)],
        )
    }

    /// Queue a transaction row on the player's batch.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Closed`] after shutdown.
    pub fn queue_transaction(&self, transaction: &EconomicTransaction) -> Result<(), DbError> {
        let actor = transaction.player_id.to_string();
        self.gateway.add_batch_operation(
            &actor,
            INSERT_TRANSACTION,
            params![
                actor.as_str(),
                to_cents(transaction.amount),
                transaction.source.as_str(),
                to_millis(transaction.timestamp),
            ],
        )
    }

    /// The player's stats row, if any.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub async fn get(&self, player: PlayerId) -> Result<Option<PlayerStats>, DbError> {
        let row: Option<PlayerStatsRow> = self
            .gateway
            .fetch_optional(
                "SELECT uuid, player_name, generators_owned, total_earnings, network_notifications \
                 FROM player_stats WHERE uuid = ?1",
                &params![player.to_string()],
            )
            .await?;
        row.map(PlayerStatsRow::into_stats).transpose()
    }

    /// Flip the player's notification preference and return the new value.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if either statement fails.
    pub async fn toggle_notifications(&self, player: PlayerId) -> Result<bool, DbError> {
        let uuid = player.to_string();
        self.gateway
            .execute(
                "INSERT INTO player_stats (uuid, network_notifications) VALUES (?1, 0) \
                 ON CONFLICT (uuid) DO UPDATE SET \
                 network_notifications = 1 - player_stats.network_notifications",
                &params![uuid.as_str()],
            )
            .await?;
        let enabled: i64 = self
            .gateway
            .fetch_scalar(
                "SELECT network_notifications FROM player_stats WHERE uuid = ?1",
                &params![uuid],
            )
            .await?;
        Ok(enabled != 0)
    }

    /// Lifetime earnings across every player.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub async fn total_earnings(&self) -> Result<Decimal, DbError> {
        let cents: i64 = self
            .gateway
            .fetch_scalar("SELECT COALESCE(SUM(total_earnings), 0) FROM player_stats", &[])
            .await?;
        Ok(from_cents(cents))
    }

    /// Collected earnings recorded at or after `since`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub async fn earnings_since(&self, since: DateTime<Utc>) -> Result<Decimal, DbError> {
        let cents: i64 = self
            .gateway
            .fetch_scalar(
                "SELECT COALESCE(SUM(amount), 0) FROM economic_transactions \
                 WHERE source = ?1 AND timestamp >= ?2",
                &params![TransactionSource::Collection.as_str(), to_millis(since)],
            )
            .await?;
        Ok(from_cents(cents))
    }

    /// Number of transaction rows recorded for `player`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub async fn transaction_count(&self, player: PlayerId) -> Result<u64, DbError> {
        let count: i64 = self
            .gateway
            .fetch_scalar(
                "SELECT COUNT(*) FROM economic_transactions WHERE player_uuid = ?1",
                &params![player.to_string()],
            )
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

/// A row from `player_stats`.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct PlayerStatsRow {
    /// Player UUID as text.
    pub uuid: String,
    /// Display name.
    pub player_name: String,
    /// Owned generator count.
    pub generators_owned: i64,
    /// Lifetime earnings in cents.
    pub total_earnings: i64,
    /// Notification flag (0 or 1).
    pub network_notifications: i64,
}

impl PlayerStatsRow {
    /// Convert into [`PlayerStats`].
    ///
    /// # Errors
    ///
    /// Returns [`DbError::CorruptRow`] if the player id is invalid.
    pub fn into_stats(self) -> Result<PlayerStats, DbError> {
        let player_id = PlayerId::parse(&self.uuid).ok_or_else(|| DbError::CorruptRow {
            table: TABLE,
            reason: format!("invalid player id {:?}", self.uuid),
        })?;
        Ok(PlayerStats {
            player_id,
            player_name: self.player_name,
            generators_owned: u32::try_from(self.generators_owned).unwrap_or(0),
            total_earnings: from_cents(self.total_earnings),
            network_notifications: self.network_notifications != 0,
        })
    }
}
