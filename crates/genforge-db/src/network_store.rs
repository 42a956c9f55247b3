//! Persistence for `networks` and `network_generators`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use genforge_types::{GeneratorId, NetworkId, NetworkTier, PlayerId};

use crate::error::DbError;
use crate::gateway::Gateway;
use crate::params;
use crate::value::{from_millis, to_millis};

/// Table name used in error reports.
const TABLE: &str = "networks";

/// Operations on the network tables.
pub struct NetworkStore<'a> {
    gateway: &'a Arc<Gateway>,
}

impl<'a> NetworkStore<'a> {
    /// Create a store bound to the gateway.
    pub const fn new(gateway: &'a Arc<Gateway>) -> Self {
        Self { gateway }
    }

    /// Insert a network and return the store-assigned id.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the insert fails.
    pub async fn insert(
        &self,
        owner: PlayerId,
        name: &str,
        tier: NetworkTier,
        created_at: DateTime<Utc>,
    ) -> Result<NetworkId, DbError> {
        let id = self
            .gateway
            .insert(
                "INSERT INTO networks (owner, name, tier, creation_time) VALUES (?1, ?2, ?3, ?4)",
                &params![owner.to_string(), name, tier.as_str(), to_millis(created_at)],
            )
            .await?;
        tracing::debug!(network_id = id, name, tier = tier.as_str(), "Inserted network");
        Ok(NetworkId::new(id))
    }

    /// Persist a tier change.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the update fails.
    pub async fn update_tier(&self, id: NetworkId, tier: NetworkTier) -> Result<u64, DbError> {
        self.gateway
            .execute(
                "UPDATE networks SET tier = ?1 WHERE id = ?2",
                &params![tier.as_str(), id.into_inner()],
            )
            .await
    }

    /// Persist a new display name.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the update fails.
    pub async fn rename(&self, id: NetworkId, name: &str) -> Result<u64, DbError> {
        self.gateway
            .execute(
                "UPDATE networks SET name = ?1 WHERE id = ?2",
                &params![name, id.into_inner()],
            )
            .await
    }

    /// Delete a network with its memberships and permission grants in one
    /// transaction. Returns the number of network rows deleted.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if any statement fails; nothing is deleted then.
    pub async fn delete(&self, id: NetworkId) -> Result<u64, DbError> {
        let raw = id.into_inner();
        self.gateway
            .transaction(move |conn| {
                Box::pin(async move {
                    sqlx::query("DELETE FROM network_generators WHERE network_id = ?1")
                        .bind(raw)
                        .execute(&mut *conn)
                        .await?;
                    sqlx::query("DELETE FROM network_permissions WHERE network_id = ?1")
                        .bind(raw)
                        .execute(&mut *conn)
                        .await?;
                    let deleted = sqlx::query("DELETE FROM networks WHERE id = ?1")
                        .bind(raw)
                        .execute(&mut *conn)
                        .await?;
                    Ok(deleted.rows_affected())
                })
            })
            .await
    }

    /// Record `generator` as a member of `network`, releasing any previous
    /// membership of the generator in the same transaction.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if either statement fails; the previous
    /// membership is kept then.
    pub async fn move_generator(&self, generator: GeneratorId, network: NetworkId) -> Result<(), DbError> {
        let generator = generator.into_inner();
        let network = network.into_inner();
        self.gateway
            .transaction(move |conn| {
                Box::pin(async move {
                    sqlx::query("DELETE FROM network_generators WHERE generator_id = ?1")
                        .bind(generator)
                        .execute(&mut *conn)
                        .await?;
                    sqlx::query(
                        "INSERT INTO network_generators (network_id, generator_id) VALUES (?1, ?2)",
                    )
                    .bind(network)
                    .bind(generator)
                    .execute(&mut *conn)
                    .await?;
                    Ok(())
                })
            })
            .await
    }

    /// Remove `generator` from whichever network holds it.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the delete fails.
    pub async fn remove_generator(&self, generator: GeneratorId) -> Result<u64, DbError> {
        self.gateway
            .execute(
                "DELETE FROM network_generators WHERE generator_id = ?1",
                &params![generator.into_inner()],
            )
            .await
    }

    /// Delete membership rows whose generator no longer exists. Returns the
    /// number of rows deleted.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the delete fails.
    pub async fn prune_orphan_memberships(&self) -> Result<u64, DbError> {
        self.gateway
            .execute(
                "DELETE FROM network_generators WHERE generator_id NOT IN (SELECT id FROM generators)",
                &[],
            )
            .await
    }

    /// Every network row.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub async fn load_all(&self) -> Result<Vec<NetworkRow>, DbError> {
        self.gateway
            .fetch_all(
                "SELECT id, owner, name, tier, creation_time FROM networks ORDER BY id",
                &[],
            )
            .await
    }

    /// Every membership row.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub async fn load_memberships(&self) -> Result<Vec<MembershipRow>, DbError> {
        self.gateway
            .fetch_all(
                "SELECT network_id, generator_id FROM network_generators ORDER BY network_id, generator_id",
                &[],
            )
            .await
    }

    /// The owner column of network `id`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub async fn owner_of(&self, id: NetworkId) -> Result<Option<String>, DbError> {
        let row: Option<(String,)> = self
            .gateway
            .fetch_optional(
                "SELECT owner FROM networks WHERE id = ?1",
                &params![id.into_inner()],
            )
            .await?;
        Ok(row.map(|(owner,)| owner))
    }
}

/// A row from the `networks` table.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct NetworkRow {
    /// Row id.
    pub id: i64,
    /// Owner UUID as text.
    pub owner: String,
    /// Display name.
    pub name: String,
    /// Tier name.
    pub tier: String,
    /// Creation time, Unix milliseconds.
    pub creation_time: i64,
}

impl NetworkRow {
    /// The row id as a [`NetworkId`].
    pub const fn network_id(&self) -> NetworkId {
        NetworkId::new(self.id)
    }

    /// The owner as a [`PlayerId`].
    ///
    /// # Errors
    ///
    /// Returns [`DbError::CorruptRow`] if the stored owner is not a UUID.
    pub fn owner_id(&self) -> Result<PlayerId, DbError> {
        PlayerId::parse(&self.owner).ok_or_else(|| DbError::CorruptRow {
            table: TABLE,
            reason: format!("network {} has invalid owner {:?}", self.id, self.owner),
        })
    }

    /// The stored tier.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::CorruptRow`] if the tier name is unknown.
    pub fn tier(&self) -> Result<NetworkTier, DbError> {
        NetworkTier::parse(&self.tier).ok_or_else(|| DbError::CorruptRow {
            table: TABLE,
            reason: format!("network {} has unknown tier {:?}", self.id, self.tier),
        })
    }

    /// The creation timestamp.
    pub fn created_at(&self) -> DateTime<Utc> {
        from_millis(self.creation_time)
    }
}

/// A row from the `network_generators` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::FromRow)]
pub struct MembershipRow {
    /// Network id.
    pub network_id: i64,
    /// Generator id.
    pub generator_id: i64,
}
