//! Persistence for the `generators` table.
//!
//! Placement and removal are awaited by the registry so the in-memory map
//! only changes after the durable row does. Removal takes the generator's
//! `network_generators` row with it. Production timestamps are
//! written in the background and their outcome is logged from the
//! foreground queue; losing one only costs a player a few seconds of
//! cooldown after a crash.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use genforge_types::{BlockLocation, GeneratorId, PlayerId};

use crate::error::DbError;
use crate::gateway::Gateway;
use crate::params;
use crate::value::{from_millis, to_millis};

/// Table name used in error reports.
const TABLE: &str = "generators";

/// Columns selected for a [`GeneratorRow`].
const SELECT_COLUMNS: &str =
    "SELECT id, owner, world, x, y, z, type AS type_id, level, last_generation FROM generators";

/// Operations on the `generators` table.
pub struct GeneratorStore<'a> {
    gateway: &'a Arc<Gateway>,
}

impl<'a> GeneratorStore<'a> {
    /// Create a store bound to the gateway.
    pub const fn new(gateway: &'a Arc<Gateway>) -> Self {
        Self { gateway }
    }

    /// Insert a generator row and return the store-assigned id.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Sqlite`] if the insert fails, including when the
    /// location is already taken.
    pub async fn insert(
        &self,
        owner: PlayerId,
        location: &BlockLocation,
        type_id: &str,
        level: u32,
        last_generation: DateTime<Utc>,
    ) -> Result<GeneratorId, DbError> {
        let id = self
            .gateway
            .insert(
                "INSERT INTO generators (owner, world, x, y, z, type, level, last_generation) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                &params![
                    owner.to_string(),
                    location.world.as_str(),
                    location.x,
                    location.y,
                    location.z,
                    type_id,
                    level,
                    to_millis(last_generation),
                ],
            )
            .await?;
        tracing::debug!(generator_id = id, %location, type_id, "Inserted generator");
        Ok(GeneratorId::new(id))
    }

    /// Delete the generator at `location` together with its network
    /// membership in one transaction. Returns the generator rows deleted.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if either delete fails; both rows are kept then.
    pub async fn delete_at(&self, location: &BlockLocation) -> Result<u64, DbError> {
        let world = location.world.clone();
        let (x, y, z) = (location.x, location.y, location.z);
        self.gateway
            .transaction(move |conn| {
                Box::pin(async move {
                    sqlx::query(
                        "DELETE FROM network_generators WHERE generator_id IN \
                         (SELECT id FROM generators WHERE world = ?1 AND x = ?2 AND y = ?3 AND z = ?4)",
                    )
                    .bind(world.as_str())
                    .bind(x)
                    .bind(y)
                    .bind(z)
                    .execute(&mut *conn)
                    .await?;
                    let deleted = sqlx::query(
                        "DELETE FROM generators WHERE world = ?1 AND x = ?2 AND y = ?3 AND z = ?4",
                    )
                    .bind(world.as_str())
                    .bind(x)
                    .bind(y)
                    .bind(z)
                    .execute(&mut *conn)
                    .await?;
                    Ok(deleted.rows_affected())
                })
            })
            .await
    }

    /// Every generator row.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub async fn load_all(&self) -> Result<Vec<GeneratorRow>, DbError> {
        self.gateway
            .fetch_all(&format!("{SELECT_COLUMNS} ORDER BY id"), &[])
            .await
    }

    /// The generator row with `id`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub async fn get(&self, id: GeneratorId) -> Result<Option<GeneratorRow>, DbError> {
        self.gateway
            .fetch_optional(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                &params![id.into_inner()],
            )
            .await
    }

    /// Persist a new level.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the update fails.
    pub async fn update_level(&self, id: GeneratorId, level: u32) -> Result<u64, DbError> {
        self.gateway
            .execute(
                "UPDATE generators SET level = ?1 WHERE id = ?2",
                &params![level, id.into_inner()],
            )
            .await
    }

    /// Persist a type change and the level that goes with it.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the update fails.
    pub async fn update_type(&self, id: GeneratorId, type_id: &str, level: u32) -> Result<u64, DbError> {
        self.gateway
            .execute(
                "UPDATE generators SET type = ?1, level = ?2 WHERE id = ?3",
                &params![type_id, level, id.into_inner()],
            )
            .await
    }

    /// Persist a production timestamp in the background. The outcome is
    /// logged from the foreground queue.
    pub fn touch_last_generation(&self, id: GeneratorId, at: DateTime<Utc>) {
        self.gateway.execute_with_callback(
            "UPDATE generators SET last_generation = ?1 WHERE id = ?2",
            params![to_millis(at), id.into_inner()],
            move |result| match result {
                Ok(0) => tracing::warn!(generator_id = %id, "Production timestamp for missing generator"),
                Ok(_) => {}
                Err(e) => tracing::error!(generator_id = %id, error = %e, "Failed to persist production timestamp"),
            },
        );
    }

    /// Number of generator rows.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub async fn count(&self) -> Result<u64, DbError> {
        let count: i64 = self
            .gateway
            .fetch_scalar("SELECT COUNT(*) FROM generators", &[])
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

/// A row from the `generators` table.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct GeneratorRow {
    /// Row id.
    pub id: i64,
    /// Owner UUID as text.
    pub owner: String,
    /// World name.
    pub world: String,
    /// Block X.
    pub x: i32,
    /// Block Y.
    pub y: i32,
    /// Block Z.
    pub z: i32,
    /// Generator type id.
    pub type_id: String,
    /// Stored level.
    pub level: i64,
    /// Last production, Unix milliseconds.
    pub last_generation: i64,
}

impl GeneratorRow {
    /// The row id as a [`GeneratorId`].
    pub const fn generator_id(&self) -> GeneratorId {
        GeneratorId::new(self.id)
    }

    /// The owner as a [`PlayerId`].
    ///
    /// # Errors
    ///
    /// Returns [`DbError::CorruptRow`] if the stored owner is not a UUID.
    pub fn owner_id(&self) -> Result<PlayerId, DbError> {
        PlayerId::parse(&self.owner).ok_or_else(|| DbError::CorruptRow {
            table: TABLE,
            reason: format!("generator {} has invalid owner {:?}", self.id, self.owner),
        })
    }

    /// The stored coordinates.
    pub fn location(&self) -> BlockLocation {
        BlockLocation::new(self.world.clone(), self.x, self.y, self.z)
    }

    /// The stored level, with out-of-range values mapped to 1.
    pub fn level(&self) -> u32 {
        u32::try_from(self.level).unwrap_or(1).max(1)
    }

    /// The stored production timestamp.
    pub fn last_production(&self) -> DateTime<Utc> {
        from_millis(self.last_generation)
    }
}
