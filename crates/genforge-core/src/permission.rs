//! Permission engine: per-network access control.
//!
//! Levels are ordered by explicit rank:
//!
//! ```text
//! NONE(0) < VIEW(1) < USE(2) < MANAGE(3) < ADMIN(4) < OWNER(5)
//! ```
//!
//! `OWNER` is never stored. It is derived from the network's owner by
//! [`resolve`]; every other player holds their stored grant or `NONE`.
//! Grant operations that would store `OWNER`, or re-grade or remove the
//! owner, are invariant violations: they are logged at `error!` and
//! rejected before any effect.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use genforge_db::{Gateway, OwnershipTransfer, PermissionStore, StatsStore};
use genforge_types::{NetworkId, NetworkMember, PermissionLevel, PlayerId};
use tracing::{error, info, warn};

use crate::error::PermissionError;
use crate::network::NetworkEngine;

/// The level `player` holds on a network owned by `owner`, given the
/// player's stored grant.
pub fn resolve(owner: PlayerId, player: PlayerId, stored: Option<PermissionLevel>) -> PermissionLevel {
    if player == owner {
        PermissionLevel::Owner
    } else {
        stored.unwrap_or(PermissionLevel::None)
    }
}

/// In-memory grants backed by `network_permissions`.
pub struct PermissionEngine {
    gateway: Arc<Gateway>,
    networks: Arc<NetworkEngine>,
    grants: DashMap<NetworkId, HashMap<PlayerId, NetworkMember>>,
}

impl PermissionEngine {
    /// Create an engine with no grants. Call [`load_all`](Self::load_all)
    /// to hydrate.
    pub fn new(gateway: Arc<Gateway>, networks: Arc<NetworkEngine>) -> Self {
        Self {
            gateway,
            networks,
            grants: DashMap::new(),
        }
    }

    /// The level `player` holds on the network, without recording access.
    ///
    /// # Errors
    ///
    /// Returns [`PermissionError::NetworkNotFound`] for an unknown network.
    pub fn permission_of(
        &self,
        network_id: NetworkId,
        player: PlayerId,
    ) -> Result<PermissionLevel, PermissionError> {
        let owner = self
            .networks
            .owner_of(network_id)
            .ok_or(PermissionError::NetworkNotFound(network_id))?;
        Ok(resolve(owner, player, self.stored_level(network_id, player)))
    }

    /// The level `player` holds on the network. Records the lookup as the
    /// grant's last access: in memory immediately, in the store in the
    /// background.
    ///
    /// # Errors
    ///
    /// Returns [`PermissionError::NetworkNotFound`] for an unknown network.
    pub fn get_player_permission(
        &self,
        network_id: NetworkId,
        player: PlayerId,
        now: DateTime<Utc>,
    ) -> Result<PermissionLevel, PermissionError> {
        let level = self.permission_of(network_id, player)?;
        let touched = self.grants.get_mut(&network_id).is_some_and(|mut grants| {
            if let Some(grant) = grants.get_mut(&player) {
                grant.last_access = now;
                true
            } else {
                false
            }
        });
        if touched {
            PermissionStore::new(&self.gateway).touch(network_id, player, now);
        }
        Ok(level)
    }

    /// The player's level, if it allows `required`.
    ///
    /// # Errors
    ///
    /// Returns [`PermissionError::Denied`] if the level is too low, or
    /// [`PermissionError::NetworkNotFound`] for an unknown network.
    pub fn require(
        &self,
        network_id: NetworkId,
        player: PlayerId,
        required: PermissionLevel,
        now: DateTime<Utc>,
    ) -> Result<PermissionLevel, PermissionError> {
        let held = self.get_player_permission(network_id, player, now)?;
        if held.allows(required) {
            Ok(held)
        } else {
            Err(PermissionError::Denied { required, held })
        }
    }

    /// Grant `level` to `player`, replacing any existing grant.
    ///
    /// # Errors
    ///
    /// Returns [`PermissionError::OwnerGrant`] for `OWNER`,
    /// [`PermissionError::OwnerRemoval`] if `player` owns the network,
    /// [`PermissionError::NetworkNotFound`], or [`PermissionError::Store`].
    pub async fn add_member(
        &self,
        network_id: NetworkId,
        player: PlayerId,
        player_name: &str,
        level: PermissionLevel,
        now: DateTime<Utc>,
    ) -> Result<NetworkMember, PermissionError> {
        self.check_grant(network_id, player, level)?;
        let joined_at = self
            .grants
            .get(&network_id)
            .and_then(|grants| grants.get(&player).map(|grant| grant.joined_at))
            .unwrap_or(now);
        let member = NetworkMember {
            network_id,
            player_id: player,
            player_name: player_name.to_owned(),
            level,
            joined_at,
            last_access: now,
        };
        PermissionStore::new(&self.gateway)
            .upsert(&member)
            .await
            .inspect_err(|e| error!(network_id = %network_id, %player, error = %e, "Failed to store grant"))?;

        self.grants
            .entry(network_id)
            .or_default()
            .insert(player, member.clone());
        info!(network_id = %network_id, %player, level = level.as_str(), "Granted network permission");
        Ok(member)
    }

    /// Change an existing grant's level.
    ///
    /// Returns `false` if the player has no grant.
    ///
    /// # Errors
    ///
    /// Same as [`add_member`](Self::add_member).
    pub async fn update_permission(
        &self,
        network_id: NetworkId,
        player: PlayerId,
        level: PermissionLevel,
    ) -> Result<bool, PermissionError> {
        self.check_grant(network_id, player, level)?;
        if self.stored_level(network_id, player).is_none() {
            return Ok(false);
        }
        PermissionStore::new(&self.gateway)
            .update_level(network_id, player, level)
            .await?;
        if let Some(mut grants) = self.grants.get_mut(&network_id) {
            if let Some(grant) = grants.get_mut(&player) {
                grant.level = level;
            }
        }
        info!(network_id = %network_id, %player, level = level.as_str(), "Updated network permission");
        Ok(true)
    }

    /// Delete a player's grant.
    ///
    /// Returns `false` if the player had none.
    ///
    /// # Errors
    ///
    /// Returns [`PermissionError::OwnerRemoval`] for the owner,
    /// [`PermissionError::NetworkNotFound`], or [`PermissionError::Store`].
    pub async fn remove_member(
        &self,
        network_id: NetworkId,
        player: PlayerId,
    ) -> Result<bool, PermissionError> {
        let owner = self
            .networks
            .owner_of(network_id)
            .ok_or(PermissionError::NetworkNotFound(network_id))?;
        if player == owner {
            error!(network_id = %network_id, %player, "Rejected removal of the network owner");
            return Err(PermissionError::OwnerRemoval);
        }
        let deleted = PermissionStore::new(&self.gateway)
            .delete(network_id, player)
            .await?;
        let removed = self
            .grants
            .get_mut(&network_id)
            .and_then(|mut grants| grants.remove(&player))
            .is_some();
        Ok(deleted > 0 || removed)
    }

    /// Hand the network to `new_owner`. The previous owner keeps `ADMIN`.
    ///
    /// The store runs the handover as one transaction. In-memory state only
    /// changes after it commits.
    ///
    /// # Errors
    ///
    /// Returns [`PermissionError::SameOwner`] if `new_owner` already owns
    /// the network, [`PermissionError::NetworkNotFound`], or
    /// [`PermissionError::Store`] if the transaction rolled back.
    pub async fn transfer_ownership(
        &self,
        network_id: NetworkId,
        new_owner: PlayerId,
        now: DateTime<Utc>,
    ) -> Result<bool, PermissionError> {
        let previous_owner = self
            .networks
            .owner_of(network_id)
            .ok_or(PermissionError::NetworkNotFound(network_id))?;
        if previous_owner == new_owner {
            return Err(PermissionError::SameOwner(network_id));
        }

        let previous_owner_name = match StatsStore::new(&self.gateway).get(previous_owner).await {
            Ok(stats) => stats.map(|stats| stats.player_name).unwrap_or_default(),
            Err(e) => {
                warn!(%previous_owner, error = %e, "Could not look up previous owner's name");
                String::new()
            }
        };

        PermissionStore::new(&self.gateway)
            .transfer_ownership(OwnershipTransfer {
                network_id,
                previous_owner,
                previous_owner_name: previous_owner_name.clone(),
                new_owner,
                at: now,
            })
            .await
            .inspect_err(|e| {
                error!(network_id = %network_id, %new_owner, error = %e, "Ownership transfer rolled back");
            })?;

        {
            let mut grants = self.grants.entry(network_id).or_default();
            grants.remove(&new_owner);
            grants.insert(
                previous_owner,
                NetworkMember {
                    network_id,
                    player_id: previous_owner,
                    player_name: previous_owner_name,
                    level: PermissionLevel::Admin,
                    joined_at: now,
                    last_access: now,
                },
            );
        }
        self.networks.set_owner(network_id, new_owner);
        Ok(true)
    }

    /// Grants on a network, earliest join first.
    pub fn members(&self, network_id: NetworkId) -> Vec<NetworkMember> {
        let mut members: Vec<NetworkMember> = self
            .grants
            .get(&network_id)
            .map(|grants| grants.values().cloned().collect())
            .unwrap_or_default();
        members.sort_by_key(|member| (member.joined_at, member.player_id));
        members
    }

    /// Drop the in-memory grants of a network whose rows were deleted with
    /// it. Returns the number of grants dropped.
    pub(crate) fn forget_network(&self, network_id: NetworkId) -> usize {
        self.grants
            .remove(&network_id)
            .map_or(0, |(_, grants)| grants.len())
    }

    /// Rebuild the grants from the store.
    ///
    /// Unreadable rows, grants on unknown networks, and grants held by the
    /// owner are skipped with a warning. Returns the number loaded.
    ///
    /// # Errors
    ///
    /// Returns [`PermissionError::Store`] if the query fails.
    pub async fn load_all(&self) -> Result<usize, PermissionError> {
        let rows = PermissionStore::new(&self.gateway).load_all().await?;
        self.grants.clear();
        let mut loaded: usize = 0;
        for row in rows {
            let member = match row.into_member() {
                Ok(member) => member,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable permission row");
                    continue;
                }
            };
            match self.networks.owner_of(member.network_id) {
                None => {
                    warn!(network_id = %member.network_id, "Grant on unknown network");
                    continue;
                }
                Some(owner) if owner == member.player_id => {
                    warn!(network_id = %member.network_id, player = %owner, "Ignoring stored grant of the owner");
                    continue;
                }
                Some(_) => {}
            }
            self.grants
                .entry(member.network_id)
                .or_default()
                .insert(member.player_id, member);
            loaded = loaded.saturating_add(1);
        }
        info!(grants = loaded, "Loaded network permissions");
        Ok(loaded)
    }

    fn stored_level(&self, network_id: NetworkId, player: PlayerId) -> Option<PermissionLevel> {
        self.grants
            .get(&network_id)
            .and_then(|grants| grants.get(&player).map(|grant| grant.level))
    }

    fn check_grant(
        &self,
        network_id: NetworkId,
        player: PlayerId,
        level: PermissionLevel,
    ) -> Result<(), PermissionError> {
        if !level.is_grantable() {
            error!(network_id = %network_id, %player, "Rejected attempt to grant OWNER");
            return Err(PermissionError::OwnerGrant);
        }
        let owner = self
            .networks
            .owner_of(network_id)
            .ok_or(PermissionError::NetworkNotFound(network_id))?;
        if player == owner {
            error!(network_id = %network_id, %player, "Rejected re-grade of the network owner");
            return Err(PermissionError::OwnerRemoval);
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use genforge_db::{DatabaseConfig, Foreground, ForegroundLoop, migrate};
    use genforge_types::NetworkTier;

    use super::*;
    use crate::config::NetworkConfig;

    struct Fixture {
        permissions: PermissionEngine,
        networks: Arc<NetworkEngine>,
        network: NetworkId,
        owner: PlayerId,
        _fg: ForegroundLoop,
    }

    async fn setup() -> Fixture {
        let (foreground, fg) = Foreground::channel();
        let gateway = Gateway::connect(DatabaseConfig::in_memory(), foreground)
            .await
            .unwrap();
        migrate(&gateway).await.unwrap();
        let networks = Arc::new(NetworkEngine::new(Arc::clone(&gateway), NetworkConfig::default()));
        let owner = PlayerId::new();
        let network = networks
            .create_network(owner, "Quarry", NetworkTier::Basic, Utc::now())
            .await
            .unwrap()
            .id;
        Fixture {
            permissions: PermissionEngine::new(gateway, Arc::clone(&networks)),
            networks,
            network,
            owner,
            _fg: fg,
        }
    }

    #[test]
    fn owner_resolution_ignores_stored_grant() {
        let owner = PlayerId::new();
        let other = PlayerId::new();
        assert_eq!(resolve(owner, owner, None), PermissionLevel::Owner);
        assert_eq!(resolve(owner, owner, Some(PermissionLevel::View)), PermissionLevel::Owner);
        assert_eq!(resolve(owner, other, None), PermissionLevel::None);
        assert_eq!(resolve(owner, other, Some(PermissionLevel::Use)), PermissionLevel::Use);
    }

    #[tokio::test]
    async fn owner_cannot_be_granted() {
        let fx = setup().await;
        let player = PlayerId::new();
        let result = fx
            .permissions
            .add_member(fx.network, player, "bob", PermissionLevel::Owner, Utc::now())
            .await;
        assert!(matches!(result, Err(PermissionError::OwnerGrant)));
        assert!(fx.permissions.members(fx.network).is_empty());

        let result = fx.permissions.remove_member(fx.network, fx.owner).await;
        assert!(matches!(result, Err(PermissionError::OwnerRemoval)));
    }

    #[tokio::test]
    async fn require_compares_ranks() {
        let fx = setup().await;
        let player = PlayerId::new();
        fx.permissions
            .add_member(fx.network, player, "bob", PermissionLevel::Use, Utc::now())
            .await
            .unwrap();

        assert!(fx.permissions.require(fx.network, player, PermissionLevel::Use, Utc::now()).is_ok());
        let denied = fx
            .permissions
            .require(fx.network, player, PermissionLevel::Manage, Utc::now());
        assert!(matches!(
            denied,
            Err(PermissionError::Denied {
                required: PermissionLevel::Manage,
                held: PermissionLevel::Use,
            })
        ));
        assert!(fx.permissions.require(fx.network, fx.owner, PermissionLevel::Admin, Utc::now()).is_ok());
    }

    #[tokio::test]
    async fn lookup_touches_last_access() {
        let fx = setup().await;
        let player = PlayerId::new();
        let joined = Utc::now() - chrono::Duration::hours(1);
        fx.permissions
            .add_member(fx.network, player, "bob", PermissionLevel::View, joined)
            .await
            .unwrap();
        let later = Utc::now();
        fx.permissions
            .get_player_permission(fx.network, player, later)
            .unwrap();
        let member = fx.permissions.members(fx.network).into_iter().next().unwrap();
        assert_eq!(member.last_access, later);
        assert_eq!(member.joined_at, joined);
    }

    #[tokio::test]
    async fn update_and_remove_members() {
        let fx = setup().await;
        let player = PlayerId::new();
        assert!(!fx
            .permissions
            .update_permission(fx.network, player, PermissionLevel::Manage)
            .await
            .unwrap());
        fx.permissions
            .add_member(fx.network, player, "bob", PermissionLevel::View, Utc::now())
            .await
            .unwrap();
        assert!(fx
            .permissions
            .update_permission(fx.network, player, PermissionLevel::Manage)
            .await
            .unwrap());
        assert_eq!(
            fx.permissions.permission_of(fx.network, player).unwrap(),
            PermissionLevel::Manage
        );
        assert!(fx.permissions.remove_member(fx.network, player).await.unwrap());
        assert_eq!(
            fx.permissions.permission_of(fx.network, player).unwrap(),
            PermissionLevel::None
        );
    }

    #[tokio::test]
    async fn transfer_demotes_previous_owner() {
        let fx = setup().await;
        let heir = PlayerId::new();
        fx.permissions
            .add_member(fx.network, heir, "heir", PermissionLevel::Manage, Utc::now())
            .await
            .unwrap();

        assert!(fx
            .permissions
            .transfer_ownership(fx.network, heir, Utc::now())
            .await
            .unwrap());
        assert_eq!(fx.networks.owner_of(fx.network), Some(heir));
        assert_eq!(
            fx.permissions.permission_of(fx.network, heir).unwrap(),
            PermissionLevel::Owner
        );
        assert_eq!(
            fx.permissions.permission_of(fx.network, fx.owner).unwrap(),
            PermissionLevel::Admin
        );

        let again = fx.permissions.transfer_ownership(fx.network, heir, Utc::now()).await;
        assert!(matches!(again, Err(PermissionError::SameOwner(_))));
    }

    #[tokio::test]
    async fn load_all_restores_grants() {
        let fx = setup().await;
        let player = PlayerId::new();
        fx.permissions
            .add_member(fx.network, player, "bob", PermissionLevel::Admin, Utc::now())
            .await
            .unwrap();
        assert_eq!(fx.permissions.load_all().await.unwrap(), 1);
        assert_eq!(
            fx.permissions.permission_of(fx.network, player).unwrap(),
            PermissionLevel::Admin
        );
    }
}
