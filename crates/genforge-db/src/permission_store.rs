//! Persistence for `network_permissions` and ownership transfer.
//!
//! Stored levels never include `OWNER`; the owner is read from the
//! `networks` row. Callers validate grants before they get here.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use genforge_types::{NetworkId, NetworkMember, PermissionLevel, PlayerId};

use crate::error::DbError;
use crate::gateway::Gateway;
use crate::params;
use crate::value::{from_millis, to_millis};

/// Table name used in error reports.
const TABLE: &str = "network_permissions";

/// Insert-or-update of one grant.
const UPSERT_GRANT: &str = "INSERT INTO network_permissions \
     (network_id, player_uuid, player_name, permission_level, joined_time, last_access) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
     ON CONFLICT (network_id, player_uuid) DO UPDATE SET \
     permission_level = excluded.permission_level, \
     player_name = excluded.player_name";

/// Ownership handover inputs, owned so they can move into the transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnershipTransfer {
    /// Network changing hands.
    pub network_id: NetworkId,
    /// Current owner, demoted to `ADMIN`.
    pub previous_owner: PlayerId,
    /// Display name stored with the previous owner's new grant.
    pub previous_owner_name: String,
    /// New owner.
    pub new_owner: PlayerId,
    /// Timestamp for the previous owner's grant.
    pub at: DateTime<Utc>,
}

/// Operations on `network_permissions`.
pub struct PermissionStore<'a> {
    gateway: &'a Arc<Gateway>,
}

impl<'a> PermissionStore<'a> {
    /// Create a store bound to the gateway.
    pub const fn new(gateway: &'a Arc<Gateway>) -> Self {
        Self { gateway }
    }

    /// Insert or update a grant.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the statement fails.
    pub async fn upsert(&self, member: &NetworkMember) -> Result<u64, DbError> {
        self.gateway
            .execute(
                UPSERT_GRANT,
                &params![
                    member.network_id.into_inner(),
                    member.player_id.to_string(),
                    member.player_name.as_str(),
                    member.level.as_str(),
                    to_millis(member.joined_at),
                    to_millis(member.last_access),
                ],
            )
            .await
    }

    /// Persist a level change of an existing grant.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the statement fails.
    pub async fn update_level(
        &self,
        network_id: NetworkId,
        player: PlayerId,
        level: PermissionLevel,
    ) -> Result<u64, DbError> {
        self.gateway
            .execute(
                "UPDATE network_permissions SET permission_level = ?1 \
                 WHERE network_id = ?2 AND player_uuid = ?3",
                &params![level.as_str(), network_id.into_inner(), player.to_string()],
            )
            .await
    }

    /// Delete a grant.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the statement fails.
    pub async fn delete(&self, network_id: NetworkId, player: PlayerId) -> Result<u64, DbError> {
        self.gateway
            .execute(
                "DELETE FROM network_permissions WHERE network_id = ?1 AND player_uuid = ?2",
                &params![network_id.into_inner(), player.to_string()],
            )
            .await
    }

    /// Record a permission lookup in the background.
    pub fn touch(&self, network_id: NetworkId, player: PlayerId, at: DateTime<Utc>) {
        self.gateway.execute_detached(
            "UPDATE network_permissions SET last_access = ?1 \
             WHERE network_id = ?2 AND player_uuid = ?3",
            params![to_millis(at), network_id.into_inner(), player.to_string()],
        );
    }

    /// Every grant.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub async fn load_all(&self) -> Result<Vec<PermissionRow>, DbError> {
        self.gateway
            .fetch_all(
                "SELECT network_id, player_uuid, player_name, permission_level, joined_time, last_access \
                 FROM network_permissions ORDER BY network_id, joined_time",
                &[],
            )
            .await
    }

    /// Hand a network to a new owner in one transaction:
    ///
    /// 1. delete the new owner's explicit grant,
    /// 2. upsert `ADMIN` for the previous owner,
    /// 3. point the network's owner column at the new owner.
    ///
    /// Step 3 must touch exactly one row. Any failure rolls every step back.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::UnexpectedRowCount`] if the network row is
    /// missing, or [`DbError`] if any statement fails.
    pub async fn transfer_ownership(&self, transfer: OwnershipTransfer) -> Result<(), DbError> {
        let network_id = transfer.network_id.into_inner();
        let new_owner = transfer.new_owner.to_string();
        let previous_owner = transfer.previous_owner.to_string();
        let previous_name = transfer.previous_owner_name;
        let at = to_millis(transfer.at);

        self.gateway
            .transaction(move |conn| {
                Box::pin(async move {
                    sqlx::query(
                        "DELETE FROM network_permissions WHERE network_id = ?1 AND player_uuid = ?2",
                    )
                    .bind(network_id)
                    .bind(new_owner.as_str())
                    .execute(&mut *conn)
                    .await?;

                    sqlx::query(UPSERT_GRANT)
                        .bind(network_id)
                        .bind(previous_owner.as_str())
                        .bind(previous_name.as_str())
                        .bind(PermissionLevel::Admin.as_str())
                        .bind(at)
                        .bind(at)
                        .execute(&mut *conn)
                        .await?;

                    let updated = sqlx::query("UPDATE networks SET owner = ?1 WHERE id = ?2")
                        .bind(new_owner.as_str())
                        .bind(network_id)
                        .execute(&mut *conn)
                        .await?;
                    if updated.rows_affected() != 1 {
                        return Err(DbError::UnexpectedRowCount {
                            table: "networks",
                            expected: 1,
                            actual: updated.rows_affected(),
                        });
                    }
                    Ok(())
                })
            })
            .await?;

        tracing::info!(
            network_id,
            previous_owner = %transfer.previous_owner,
            new_owner = %transfer.new_owner,
            "Transferred network ownership"
        );
        Ok(())
    }
}

/// A row from `network_permissions`.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct PermissionRow {
    /// Network id.
    pub network_id: i64,
    /// Player UUID as text.
    pub player_uuid: String,
    /// Player display name.
    pub player_name: String,
    /// Level name.
    pub permission_level: String,
    /// Join time, Unix milliseconds.
    pub joined_time: i64,
    /// Last lookup, Unix milliseconds.
    pub last_access: i64,
}

impl PermissionRow {
    /// Convert into a [`NetworkMember`].
    ///
    /// # Errors
    ///
    /// Returns [`DbError::CorruptRow`] if the player id or level is invalid,
    /// including a stored `OWNER` level.
    pub fn into_member(self) -> Result<NetworkMember, DbError> {
        let player_id = PlayerId::parse(&self.player_uuid).ok_or_else(|| DbError::CorruptRow {
            table: TABLE,
            reason: format!("invalid player id {:?}", self.player_uuid),
        })?;
        let level = PermissionLevel::parse(&self.permission_level)
            .filter(|level| level.is_grantable())
            .ok_or_else(|| DbError::CorruptRow {
                table: TABLE,
                reason: format!("invalid stored level {:?}", self.permission_level),
            })?;
        Ok(NetworkMember {
            network_id: NetworkId::new(self.network_id),
            player_id,
            player_name: self.player_name,
            level,
            joined_at: from_millis(self.joined_time),
            last_access: from_millis(self.last_access),
        })
    }
}
