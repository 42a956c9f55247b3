//! Network engine: generator grouping, tiers, capacity, range, and the
//! efficiency bonus.
//!
//! A generator belongs to at most one network. Joining a second network
//! moves it out of the first in the same store transaction; the capacity
//! check runs before anything is released, so a rejected join leaves the
//! old membership in place.
//!
//! | Derived value | Formula |
//! |---------------|---------|
//! | bonus | `min(base_bonus + members × per_generator_bonus, max_bonus)` |
//! | capacity | `base_capacity + rank × capacity_step` |
//! | range | `base_range + rank × range_step` |

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use genforge_db::{Gateway, NetworkStore};
use genforge_types::{
    BlockLocation, GeneratorId, Network, NetworkId, NetworkSnapshot, NetworkTier, PlayerId,
};
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use crate::config::NetworkConfig;
use crate::error::NetworkError;

/// In-memory networks backed by the `networks` and `network_generators`
/// tables.
pub struct NetworkEngine {
    gateway: Arc<Gateway>,
    config: NetworkConfig,
    networks: DashMap<NetworkId, Network>,
    memberships: DashMap<GeneratorId, NetworkId>,
}

impl NetworkEngine {
    /// Create an empty engine. Call [`load_all`](Self::load_all) to hydrate.
    pub fn new(gateway: Arc<Gateway>, config: NetworkConfig) -> Self {
        Self {
            gateway,
            config,
            networks: DashMap::new(),
            memberships: DashMap::new(),
        }
    }

    /// The tier, capacity and range configuration.
    pub const fn config(&self) -> &NetworkConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Create a network with no members.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::InvalidName`] for a blank or overlong name, or
    /// [`NetworkError::Store`] if the insert fails.
    pub async fn create_network(
        &self,
        owner: PlayerId,
        name: &str,
        tier: NetworkTier,
        now: DateTime<Utc>,
    ) -> Result<Network, NetworkError> {
        let name = self.validate_name(name)?;
        let id = NetworkStore::new(&self.gateway)
            .insert(owner, &name, tier, now)
            .await
            .inspect_err(|e| error!(%owner, error = %e, "Failed to create network"))?;

        let network = Network {
            id,
            owner,
            name,
            tier,
            connected: BTreeSet::new(),
            efficiency_bonus: self.config.tier(tier).efficiency_bonus(0),
            created_at: now,
        };
        self.networks.insert(id, network.clone());
        info!(network_id = %id, %owner, tier = tier.as_str(), "Created network");
        Ok(network)
    }

    /// Put a generator into a network, moving it out of any other network.
    ///
    /// Returns `false` if the generator was already a member (nothing to do)
    /// and `true` if the membership changed.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::NotFound`] for an unknown network,
    /// [`NetworkError::CapacityExceeded`] if the network is full, or
    /// [`NetworkError::Store`] if the move fails. The previous membership
    /// is intact on every error.
    pub async fn add_generator(
        &self,
        network_id: NetworkId,
        generator: GeneratorId,
    ) -> Result<bool, NetworkError> {
        {
            let network = self
                .networks
                .get(&network_id)
                .ok_or(NetworkError::NotFound(network_id))?;
            if network.connected.contains(&generator) {
                return Ok(false);
            }
            let capacity = self.config.capacity(network.tier);
            let members = u32::try_from(network.member_count()).unwrap_or(u32::MAX);
            if members >= capacity {
                return Err(NetworkError::CapacityExceeded {
                    network: network_id,
                    capacity,
                });
            }
        }

        NetworkStore::new(&self.gateway)
            .move_generator(generator, network_id)
            .await
            .inspect_err(|e| {
                error!(network_id = %network_id, generator_id = %generator, error = %e, "Failed to move generator");
            })?;

        let previous = self.memberships.insert(generator, network_id);
        if let Some(previous) = previous.filter(|previous| *previous != network_id) {
            self.detach(previous, generator);
            debug!(generator_id = %generator, from = %previous, to = %network_id, "Migrated generator between networks");
        }
        if let Some(mut network) = self.networks.get_mut(&network_id) {
            network.connected.insert(generator);
            self.refresh_bonus(&mut network);
        }
        Ok(true)
    }

    /// Take a generator out of its network.
    ///
    /// Returns `false` if it was in none.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::Store`] if the delete fails.
    pub async fn remove_generator(&self, generator: GeneratorId) -> Result<bool, NetworkError> {
        let Some(network_id) = self.network_of(generator) else {
            return Ok(false);
        };
        NetworkStore::new(&self.gateway)
            .remove_generator(generator)
            .await
            .inspect_err(|e| error!(generator_id = %generator, error = %e, "Failed to release generator"))?;
        self.memberships.remove(&generator);
        self.detach(network_id, generator);
        Ok(true)
    }

    /// Drop a generator whose membership row is already gone from the
    /// store. Returns `false` if it was in no network.
    pub(crate) fn forget_generator(&self, generator: GeneratorId) -> bool {
        let Some((_, network_id)) = self.memberships.remove(&generator) else {
            return false;
        };
        self.detach(network_id, generator);
        true
    }

    /// Raise a network's tier.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::NotFound`] for an unknown network,
    /// [`NetworkError::InvalidTierTransition`] unless `new_tier` ranks
    /// strictly higher, or [`NetworkError::Store`] if the update fails.
    pub async fn upgrade_tier(
        &self,
        network_id: NetworkId,
        new_tier: NetworkTier,
    ) -> Result<bool, NetworkError> {
        let current = self
            .networks
            .get(&network_id)
            .map(|network| network.tier)
            .ok_or(NetworkError::NotFound(network_id))?;
        if new_tier.rank() <= current.rank() {
            return Err(NetworkError::InvalidTierTransition {
                from: current,
                to: new_tier,
            });
        }

        let updated = NetworkStore::new(&self.gateway)
            .update_tier(network_id, new_tier)
            .await?;
        if updated == 0 {
            warn!(network_id = %network_id, "Network row missing during tier upgrade");
            return Err(NetworkError::NotFound(network_id));
        }

        if let Some(mut network) = self.networks.get_mut(&network_id) {
            network.tier = new_tier;
            self.refresh_bonus(&mut network);
        }
        info!(
            network_id = %network_id,
            from = current.as_str(),
            to = new_tier.as_str(),
            capacity = self.config.capacity(new_tier),
            range = self.config.range(new_tier),
            "Upgraded network tier"
        );
        Ok(true)
    }

    /// Delete a network, its memberships and its grants.
    ///
    /// Returns `false` if no such network exists.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::Store`] if the cascade fails; nothing is
    /// deleted then.
    pub async fn delete_network(&self, network_id: NetworkId) -> Result<bool, NetworkError> {
        if !self.networks.contains_key(&network_id) {
            return Ok(false);
        }
        NetworkStore::new(&self.gateway)
            .delete(network_id)
            .await
            .inspect_err(|e| error!(network_id = %network_id, error = %e, "Failed to delete network"))?;

        if let Some((_, network)) = self.networks.remove(&network_id) {
            for generator in &network.connected {
                self.memberships.remove_if(generator, |_, owner| *owner == network_id);
            }
            info!(network_id = %network_id, members = network.member_count(), "Deleted network");
        }
        Ok(true)
    }

    /// Rename a network.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::NotFound`], [`NetworkError::InvalidName`], or
    /// [`NetworkError::Store`].
    pub async fn rename(&self, network_id: NetworkId, name: &str) -> Result<(), NetworkError> {
        if !self.networks.contains_key(&network_id) {
            return Err(NetworkError::NotFound(network_id));
        }
        let name = self.validate_name(name)?;
        NetworkStore::new(&self.gateway)
            .rename(network_id, &name)
            .await?;
        if let Some(mut network) = self.networks.get_mut(&network_id) {
            network.name = name;
        }
        Ok(())
    }

    /// Point the in-memory owner at `owner` after a durable transfer.
    pub(crate) fn set_owner(&self, network_id: NetworkId, owner: PlayerId) {
        if let Some(mut network) = self.networks.get_mut(&network_id) {
            network.owner = owner;
        }
    }

    /// Rebuild the in-memory state from the store.
    ///
    /// Membership rows of generators that no longer exist are deleted
    /// first. Rows that fail to decode and memberships of unknown networks
    /// are skipped with a warning. Returns the number of networks loaded.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::Store`] if a query fails.
    pub async fn load_all(&self) -> Result<usize, NetworkError> {
        let store = NetworkStore::new(&self.gateway);
        let pruned = store.prune_orphan_memberships().await?;
        if pruned > 0 {
            warn!(pruned, "Deleted memberships of missing generators");
        }
        let rows = store.load_all().await?;
        let memberships = store.load_memberships().await?;

        self.networks.clear();
        self.memberships.clear();
        for row in rows {
            let (owner, tier) = match (row.owner_id(), row.tier()) {
                (Ok(owner), Ok(tier)) => (owner, tier),
                (Err(e), _) | (_, Err(e)) => {
                    warn!(network_id = row.id, error = %e, "Skipping unreadable network row");
                    continue;
                }
            };
            let created_at = row.created_at();
            let id = row.network_id();
            self.networks.insert(
                id,
                Network {
                    id,
                    owner,
                    name: row.name,
                    tier,
                    connected: BTreeSet::new(),
                    efficiency_bonus: Decimal::ZERO,
                    created_at,
                },
            );
        }

        for membership in memberships {
            let network_id = NetworkId::new(membership.network_id);
            let generator = GeneratorId::new(membership.generator_id);
            let attached = self
                .networks
                .get_mut(&network_id)
                .map(|mut network| network.connected.insert(generator))
                .is_some();
            if attached {
                self.memberships.insert(generator, network_id);
            } else {
                warn!(network_id = %network_id, generator_id = %generator, "Membership of unknown network");
            }
        }

        for mut network in self.networks.iter_mut() {
            self.refresh_bonus(&mut network);
        }
        let count = self.networks.len();
        info!(networks = count, memberships = self.memberships.len(), "Loaded networks");
        Ok(count)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Whether `location` is close enough to `controller` to join the
    /// network. Advisory: membership itself does not depend on range.
    pub fn is_in_range(
        &self,
        network_id: NetworkId,
        controller: &BlockLocation,
        location: &BlockLocation,
    ) -> bool {
        self.networks
            .get(&network_id)
            .is_some_and(|network| controller.within(location, self.config.range(network.tier)))
    }

    /// A copy of the network.
    pub fn get(&self, network_id: NetworkId) -> Option<Network> {
        self.networks.get(&network_id).map(|network| network.clone())
    }

    /// Whether the network exists.
    pub fn contains(&self, network_id: NetworkId) -> bool {
        self.networks.contains_key(&network_id)
    }

    /// The network's owner.
    pub fn owner_of(&self, network_id: NetworkId) -> Option<PlayerId> {
        self.networks.get(&network_id).map(|network| network.owner)
    }

    /// The network a generator belongs to.
    pub fn network_of(&self, generator: GeneratorId) -> Option<NetworkId> {
        self.memberships.get(&generator).map(|entry| *entry)
    }

    /// Efficiency bonus applying to a generator (zero outside networks).
    pub fn bonus_for(&self, generator: GeneratorId) -> Decimal {
        self.network_of(generator)
            .and_then(|id| self.networks.get(&id).map(|network| network.efficiency_bonus))
            .unwrap_or(Decimal::ZERO)
    }

    /// Networks owned by `player`, by id.
    pub fn networks_owned_by(&self, player: PlayerId) -> Vec<Network> {
        let mut owned: Vec<Network> = self
            .networks
            .iter()
            .filter(|network| network.owner == player)
            .map(|network| network.clone())
            .collect();
        owned.sort_by_key(|network| network.id);
        owned
    }

    /// Member capacity of `tier`.
    pub const fn capacity(&self, tier: NetworkTier) -> u32 {
        self.config.capacity(tier)
    }

    /// Join range of `tier`.
    pub fn range(&self, tier: NetworkTier) -> f64 {
        self.config.range(tier)
    }

    /// Number of networks.
    pub fn count(&self) -> usize {
        self.networks.len()
    }

    /// Read-only view of one network.
    pub fn snapshot(&self, network_id: NetworkId) -> Option<NetworkSnapshot> {
        self.networks
            .get(&network_id)
            .map(|network| self.to_snapshot(&network))
    }

    /// Read-only views of every network, by id.
    pub fn snapshots(&self) -> Vec<NetworkSnapshot> {
        let mut snapshots: Vec<NetworkSnapshot> = self
            .networks
            .iter()
            .map(|network| self.to_snapshot(&network))
            .collect();
        snapshots.sort_by_key(|snapshot| snapshot.id);
        snapshots
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn to_snapshot(&self, network: &Network) -> NetworkSnapshot {
        NetworkSnapshot {
            id: network.id,
            owner: network.owner,
            name: network.name.clone(),
            tier: network.tier,
            members: network.connected.iter().copied().collect(),
            efficiency_bonus: network.efficiency_bonus,
            range: self.config.range(network.tier),
            capacity: self.config.capacity(network.tier),
            created_at: network.created_at,
        }
    }

    fn detach(&self, network_id: NetworkId, generator: GeneratorId) {
        if let Some(mut network) = self.networks.get_mut(&network_id) {
            network.connected.remove(&generator);
            self.refresh_bonus(&mut network);
        }
    }

    fn refresh_bonus(&self, network: &mut Network) {
        network.efficiency_bonus = self
            .config
            .tier(network.tier)
            .efficiency_bonus(network.member_count());
    }

    fn validate_name(&self, name: &str) -> Result<String, NetworkError> {
        let trimmed = name.trim();
        if trimmed.is_empty() || trimmed.chars().count() > self.config.max_name_length {
            return Err(NetworkError::InvalidName(name.to_owned()));
        }
        Ok(trimmed.to_owned())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use genforge_db::{DatabaseConfig, Foreground, ForegroundLoop, GeneratorStore, migrate};
    use rust_decimal_macros::dec;

    use super::*;

    async fn stored_generator(engine: &NetworkEngine, x: i32) -> GeneratorId {
        GeneratorStore::new(&engine.gateway)
            .insert(PlayerId::new(), &BlockLocation::new("world", x, 64, 0), "stone", 1, Utc::now())
            .await
            .unwrap()
    }

    async fn setup(config: NetworkConfig) -> (NetworkEngine, ForegroundLoop) {
        let (foreground, fg_loop) = Foreground::channel();
        let gateway = Gateway::connect(DatabaseConfig::in_memory(), foreground)
            .await
            .unwrap();
        migrate(&gateway).await.unwrap();
        (NetworkEngine::new(gateway, config), fg_loop)
    }

    #[tokio::test]
    async fn bonus_grows_and_saturates() {
        let (engine, _fg) = setup(NetworkConfig {
            base_capacity: 100,
            ..NetworkConfig::default()
        })
        .await;
        let network = engine
            .create_network(PlayerId::new(), "Quarry", NetworkTier::Basic, Utc::now())
            .await
            .unwrap();
        assert_eq!(network.efficiency_bonus, dec!(0.05));

        for raw in 1..=3 {
            engine
                .add_generator(network.id, GeneratorId::new(raw))
                .await
                .unwrap();
        }
        assert_eq!(engine.bonus_for(GeneratorId::new(1)), dec!(0.08));

        for raw in 4..=40 {
            engine
                .add_generator(network.id, GeneratorId::new(raw))
                .await
                .unwrap();
        }
        assert_eq!(engine.bonus_for(GeneratorId::new(1)), dec!(0.25));
        assert_eq!(engine.bonus_for(GeneratorId::new(999)), Decimal::ZERO);
    }

    #[tokio::test]
    async fn joining_twice_is_a_no_op() {
        let (engine, _fg) = setup(NetworkConfig::default()).await;
        let network = engine
            .create_network(PlayerId::new(), "Quarry", NetworkTier::Basic, Utc::now())
            .await
            .unwrap();
        assert!(engine.add_generator(network.id, GeneratorId::new(1)).await.unwrap());
        assert!(!engine.add_generator(network.id, GeneratorId::new(1)).await.unwrap());
        assert_eq!(engine.get(network.id).unwrap().member_count(), 1);
    }

    #[tokio::test]
    async fn generator_migrates_between_networks() {
        let (engine, _fg) = setup(NetworkConfig::default()).await;
        let owner = PlayerId::new();
        let first = engine
            .create_network(owner, "A", NetworkTier::Basic, Utc::now())
            .await
            .unwrap();
        let second = engine
            .create_network(owner, "B", NetworkTier::Basic, Utc::now())
            .await
            .unwrap();
        let generator = GeneratorId::new(7);

        engine.add_generator(first.id, generator).await.unwrap();
        engine.add_generator(second.id, generator).await.unwrap();

        assert_eq!(engine.network_of(generator), Some(second.id));
        assert_eq!(engine.get(first.id).unwrap().member_count(), 0);
        assert_eq!(engine.get(first.id).unwrap().efficiency_bonus, dec!(0.05));
        assert_eq!(engine.get(second.id).unwrap().efficiency_bonus, dec!(0.06));
    }

    #[tokio::test]
    async fn full_network_rejects_and_keeps_old_membership() {
        let (engine, _fg) = setup(NetworkConfig {
            base_capacity: 1,
            ..NetworkConfig::default()
        })
        .await;
        let owner = PlayerId::new();
        let home = engine
            .create_network(owner, "Home", NetworkTier::Basic, Utc::now())
            .await
            .unwrap();
        let full = engine
            .create_network(owner, "Full", NetworkTier::Basic, Utc::now())
            .await
            .unwrap();
        engine.add_generator(home.id, GeneratorId::new(1)).await.unwrap();
        engine.add_generator(full.id, GeneratorId::new(2)).await.unwrap();

        let result = engine.add_generator(full.id, GeneratorId::new(1)).await;
        assert!(matches!(
            result,
            Err(NetworkError::CapacityExceeded { capacity: 1, .. })
        ));
        assert_eq!(engine.network_of(GeneratorId::new(1)), Some(home.id));
    }

    #[tokio::test]
    async fn tiers_only_move_up() {
        let (engine, _fg) = setup(NetworkConfig::default()).await;
        let network = engine
            .create_network(PlayerId::new(), "Quarry", NetworkTier::Advanced, Utc::now())
            .await
            .unwrap();

        let down = engine.upgrade_tier(network.id, NetworkTier::Basic).await;
        assert!(matches!(down, Err(NetworkError::InvalidTierTransition { .. })));
        let same = engine.upgrade_tier(network.id, NetworkTier::Advanced).await;
        assert!(matches!(same, Err(NetworkError::InvalidTierTransition { .. })));

        assert!(engine.upgrade_tier(network.id, NetworkTier::Ultimate).await.unwrap());
        let snapshot = engine.snapshot(network.id).unwrap();
        assert_eq!(snapshot.tier, NetworkTier::Ultimate);
        assert_eq!(snapshot.capacity, 40);
        assert_eq!(snapshot.efficiency_bonus, dec!(0.20));
    }

    #[tokio::test]
    async fn range_depends_on_tier_and_world() {
        let (engine, _fg) = setup(NetworkConfig::default()).await;
        let network = engine
            .create_network(PlayerId::new(), "Quarry", NetworkTier::Basic, Utc::now())
            .await
            .unwrap();
        let controller = BlockLocation::new("world", 0, 64, 0);
        assert!(engine.is_in_range(network.id, &controller, &BlockLocation::new("world", 16, 64, 0)));
        assert!(!engine.is_in_range(network.id, &controller, &BlockLocation::new("world", 17, 64, 0)));
        assert!(!engine.is_in_range(network.id, &controller, &BlockLocation::new("nether", 0, 64, 0)));

        engine.upgrade_tier(network.id, NetworkTier::Advanced).await.unwrap();
        assert!(engine.is_in_range(network.id, &controller, &BlockLocation::new("world", 24, 64, 0)));
    }

    #[tokio::test]
    async fn delete_clears_memberships() {
        let (engine, _fg) = setup(NetworkConfig::default()).await;
        let network = engine
            .create_network(PlayerId::new(), "Quarry", NetworkTier::Basic, Utc::now())
            .await
            .unwrap();
        engine.add_generator(network.id, GeneratorId::new(3)).await.unwrap();

        assert!(engine.delete_network(network.id).await.unwrap());
        assert!(!engine.delete_network(network.id).await.unwrap());
        assert_eq!(engine.network_of(GeneratorId::new(3)), None);
        assert_eq!(engine.count(), 0);
    }

    #[tokio::test]
    async fn blank_names_are_rejected() {
        let (engine, _fg) = setup(NetworkConfig::default()).await;
        let result = engine
            .create_network(PlayerId::new(), "   ", NetworkTier::Basic, Utc::now())
            .await;
        assert!(matches!(result, Err(NetworkError::InvalidName(_))));
    }

    #[tokio::test]
    async fn load_all_restores_members_and_bonus() {
        let (engine, _fg) = setup(NetworkConfig::default()).await;
        let network = engine
            .create_network(PlayerId::new(), " Quarry ", NetworkTier::Elite, Utc::now())
            .await
            .unwrap();
        let first = stored_generator(&engine, 0).await;
        let second = stored_generator(&engine, 1).await;
        engine.add_generator(network.id, first).await.unwrap();
        engine.add_generator(network.id, second).await.unwrap();

        assert_eq!(engine.load_all().await.unwrap(), 1);
        let restored = engine.get(network.id).unwrap();
        assert_eq!(restored.name, "Quarry");
        assert_eq!(restored.tier, NetworkTier::Elite);
        assert_eq!(restored.member_count(), 2);
        assert_eq!(restored.efficiency_bonus, dec!(0.19));
    }

    #[tokio::test]
    async fn load_all_drops_members_of_missing_generators() {
        let (engine, _fg) = setup(NetworkConfig::default()).await;
        let network = engine
            .create_network(PlayerId::new(), "Quarry", NetworkTier::Basic, Utc::now())
            .await
            .unwrap();
        let kept = stored_generator(&engine, 0).await;
        engine.add_generator(network.id, kept).await.unwrap();
        engine.add_generator(network.id, GeneratorId::new(999)).await.unwrap();

        engine.load_all().await.unwrap();
        let restored = engine.get(network.id).unwrap();
        assert_eq!(restored.member_count(), 1);
        assert_eq!(engine.network_of(GeneratorId::new(999)), None);
        assert_eq!(restored.efficiency_bonus, dec!(0.06));
        let rows = NetworkStore::new(&engine.gateway).load_memberships().await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn forget_generator_only_touches_memory() {
        let (engine, _fg) = setup(NetworkConfig::default()).await;
        let network = engine
            .create_network(PlayerId::new(), "Quarry", NetworkTier::Basic, Utc::now())
            .await
            .unwrap();
        engine.add_generator(network.id, GeneratorId::new(4)).await.unwrap();

        assert!(engine.forget_generator(GeneratorId::new(4)));
        assert!(!engine.forget_generator(GeneratorId::new(4)));
        assert_eq!(engine.get(network.id).unwrap().member_count(), 0);
        assert_eq!(engine.get(network.id).unwrap().efficiency_bonus, dec!(0.05));
    }
}
