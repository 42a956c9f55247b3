//! Generator registry: the location-keyed map of placed generators.
//!
//! Placement and removal change the durable row first and the map second.
//! A generator's value is looked up at read time:
//!
//! ```text
//! value = base_value × value_multiplier^(level − 1)
//!       × (1 + network bonus)
//!       × economy multiplier for the type
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use genforge_db::{Gateway, GeneratorStore, StatsStore};
use genforge_types::{
    BlockLocation, EconomySnapshot, Generator, GeneratorId, GeneratorSnapshot, GeneratorType,
    PlayerId,
};
use rust_decimal::Decimal;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::RegistryError;
use crate::network::NetworkEngine;

/// Every placed generator, keyed by location and by id.
pub struct GeneratorRegistry {
    gateway: Arc<Gateway>,
    types: BTreeMap<String, Arc<GeneratorType>>,
    generators: DashMap<BlockLocation, Generator>,
    locations: DashMap<GeneratorId, BlockLocation>,
    networks: Arc<NetworkEngine>,
    economy: watch::Receiver<EconomySnapshot>,
    max_per_player: u32,
}

impl GeneratorRegistry {
    /// Create an empty registry over the configured types.
    ///
    /// `max_per_player` of `0` means unlimited.
    pub fn new(
        gateway: Arc<Gateway>,
        types: Vec<GeneratorType>,
        networks: Arc<NetworkEngine>,
        economy: watch::Receiver<EconomySnapshot>,
        max_per_player: u32,
    ) -> Self {
        let types = types
            .into_iter()
            .map(|generator_type| (generator_type.id.clone(), Arc::new(generator_type)))
            .collect();
        Self {
            gateway,
            types,
            generators: DashMap::new(),
            locations: DashMap::new(),
            networks,
            economy,
            max_per_player,
        }
    }

    /// A configured type.
    pub fn generator_type(&self, type_id: &str) -> Option<Arc<GeneratorType>> {
        self.types.get(type_id).cloned()
    }

    /// Every configured type, by id.
    pub fn types(&self) -> impl Iterator<Item = &Arc<GeneratorType>> {
        self.types.values()
    }

    /// The per-player cap (`0` means unlimited).
    pub const fn max_per_player(&self) -> u32 {
        self.max_per_player
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Place a level-1 generator of `type_id` at `location`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownType`],
    /// [`RegistryError::LocationOccupied`], [`RegistryError::CapExceeded`],
    /// or [`RegistryError::Store`] if the insert fails. The map is only
    /// changed once the row exists.
    pub async fn place(
        &self,
        owner: PlayerId,
        owner_name: &str,
        location: BlockLocation,
        type_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Generator, RegistryError> {
        let generator_type = self
            .generator_type(type_id)
            .ok_or_else(|| RegistryError::UnknownType(type_id.to_owned()))?;
        if self.generators.contains_key(&location) {
            return Err(RegistryError::LocationOccupied(location));
        }
        if self.max_per_player > 0 && self.count_for(owner) >= self.max_per_player {
            return Err(RegistryError::CapExceeded {
                cap: self.max_per_player,
            });
        }

        let id = GeneratorStore::new(&self.gateway)
            .insert(owner, &location, type_id, 1, now)
            .await
            .inspect_err(|e| error!(%owner, %location, error = %e, "Failed to place generator"))?;

        let generator = Generator {
            id,
            owner,
            location: location.clone(),
            generator_type,
            level: 1,
            last_production: now,
        };
        self.locations.insert(id, location.clone());
        self.generators.insert(location.clone(), generator.clone());
        StatsStore::new(&self.gateway).refresh_generators_owned(owner, owner_name);
        info!(generator_id = %id, %owner, %location, type_id, "Placed generator");
        Ok(generator)
    }

    /// Remove the generator at `location`, releasing its network membership.
    ///
    /// Returns `false` if there is no generator there, or if the store did
    /// not delete exactly one row (the map is left alone then).
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Store`] if the delete fails.
    pub async fn remove(&self, location: &BlockLocation) -> Result<bool, RegistryError> {
        let Some((id, owner)) = self
            .generators
            .get(location)
            .map(|generator| (generator.id, generator.owner))
        else {
            return Ok(false);
        };

        let deleted = GeneratorStore::new(&self.gateway)
            .delete_at(location)
            .await
            .inspect_err(|e| error!(%location, error = %e, "Failed to remove generator"))?;
        if deleted != 1 {
            warn!(%location, deleted, "Generator delete touched an unexpected number of rows");
            return Ok(false);
        }

        self.generators.remove(location);
        self.locations.remove(&id);
        self.networks.forget_generator(id);
        StatsStore::new(&self.gateway).refresh_generators_owned(owner, "");
        info!(generator_id = %id, %owner, %location, "Removed generator");
        Ok(true)
    }

    /// Set the level of the generator at `location`, clamped to
    /// `[1, max_level]`. Returns the level applied.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] or [`RegistryError::Store`].
    pub async fn set_level(&self, location: &BlockLocation, level: u32) -> Result<u32, RegistryError> {
        let (id, level) = self
            .generators
            .get(location)
            .map(|generator| (generator.id, generator.generator_type.clamp_level(level)))
            .ok_or_else(|| RegistryError::NotFound(location.clone()))?;

        GeneratorStore::new(&self.gateway)
            .update_level(id, level)
            .await?;
        if let Some(mut generator) = self.generators.get_mut(location) {
            generator.level = level;
        }
        debug!(generator_id = %id, level, "Set generator level");
        Ok(level)
    }

    /// Swap the generator at `location` to `type_id` at level 1.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`], [`RegistryError::UnknownType`],
    /// or [`RegistryError::Store`].
    pub async fn set_type(
        &self,
        location: &BlockLocation,
        type_id: &str,
    ) -> Result<Generator, RegistryError> {
        let generator_type = self
            .generator_type(type_id)
            .ok_or_else(|| RegistryError::UnknownType(type_id.to_owned()))?;
        let id = self
            .generators
            .get(location)
            .map(|generator| generator.id)
            .ok_or_else(|| RegistryError::NotFound(location.clone()))?;

        GeneratorStore::new(&self.gateway)
            .update_type(id, type_id, 1)
            .await?;
        let mut generator = self
            .generators
            .get_mut(location)
            .ok_or_else(|| RegistryError::NotFound(location.clone()))?;
        generator.generator_type = generator_type;
        generator.level = 1;
        info!(generator_id = %id, type_id, "Evolved generator");
        Ok(generator.clone())
    }

    /// Collect from the generator at `location` if its cooldown elapsed.
    ///
    /// Resets the production timer and returns the amount produced.
    /// Paying the owner and persisting the timestamp are up to the caller.
    pub fn collect(&self, location: &BlockLocation, now: DateTime<Utc>) -> Option<Decimal> {
        let mut generator = self.generators.get_mut(location)?;
        if !generator.can_produce(now) {
            return None;
        }
        let amount = self.value(&generator);
        generator.last_production = now;
        Some(amount)
    }

    /// Rebuild the map from the store.
    ///
    /// Rows whose type is no longer configured, or whose owner cannot be
    /// read, are skipped with a warning. Returns the number loaded.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Store`] if the query fails.
    pub async fn load_all(&self) -> Result<usize, RegistryError> {
        let rows = GeneratorStore::new(&self.gateway).load_all().await?;
        self.generators.clear();
        self.locations.clear();
        for row in rows {
            let Some(generator_type) = self.generator_type(&row.type_id) else {
                warn!(generator_id = row.id, type_id = %row.type_id, "Skipping generator of unconfigured type");
                continue;
            };
            let owner = match row.owner_id() {
                Ok(owner) => owner,
                Err(e) => {
                    warn!(generator_id = row.id, error = %e, "Skipping unreadable generator row");
                    continue;
                }
            };
            let location = row.location();
            let generator = Generator {
                id: row.generator_id(),
                owner,
                location: location.clone(),
                level: generator_type.clamp_level(row.level()),
                generator_type,
                last_production: row.last_production(),
            };
            self.locations.insert(generator.id, location.clone());
            self.generators.insert(location, generator);
        }
        let count = self.generators.len();
        info!(generators = count, "Loaded generators");
        Ok(count)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Current value of a generator's output.
    pub fn value(&self, generator: &Generator) -> Decimal {
        let bonus = self.networks.bonus_for(generator.id);
        let multiplier = self.economy.borrow().multiplier_for(generator.type_id());
        generator
            .base_value()
            .saturating_mul(Decimal::ONE.saturating_add(bonus))
            .saturating_mul(multiplier)
            .max(Decimal::ZERO)
    }

    /// A copy of the generator at `location`.
    pub fn get(&self, location: &BlockLocation) -> Option<Generator> {
        self.generators.get(location).map(|generator| generator.clone())
    }

    /// A copy of the generator with `id`.
    pub fn get_by_id(&self, id: GeneratorId) -> Option<Generator> {
        let location = self.locations.get(&id).map(|location| location.clone())?;
        self.get(&location)
    }

    /// Generators owned by `player`, by id.
    pub fn owned_by(&self, player: PlayerId) -> Vec<Generator> {
        let mut owned: Vec<Generator> = self
            .generators
            .iter()
            .filter(|generator| generator.owner == player)
            .map(|generator| generator.clone())
            .collect();
        owned.sort_by_key(|generator| generator.id);
        owned
    }

    /// Number of generators owned by `player`.
    pub fn count_for(&self, player: PlayerId) -> u32 {
        let count = self
            .generators
            .iter()
            .filter(|generator| generator.owner == player)
            .count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    /// Number of placed generators.
    pub fn count(&self) -> u64 {
        u64::try_from(self.generators.len()).unwrap_or(u64::MAX)
    }

    /// Placed generators per type id. Every configured type is present.
    pub fn type_counts(&self) -> BTreeMap<String, u64> {
        let mut counts: BTreeMap<String, u64> =
            self.types.keys().map(|id| (id.clone(), 0)).collect();
        for generator in &self.generators {
            let count = counts.entry(generator.type_id().to_owned()).or_insert(0);
            *count = count.saturating_add(1);
        }
        counts
    }

    /// Read-only view of a generator at `now`.
    pub fn snapshot(&self, generator: &Generator, now: DateTime<Utc>) -> GeneratorSnapshot {
        GeneratorSnapshot {
            id: generator.id,
            owner: generator.owner,
            location: generator.location.clone(),
            type_id: generator.type_id().to_owned(),
            type_name: generator.generator_type.display_name.clone(),
            level: generator.level,
            max_level: generator.generator_type.max_level,
            last_production: generator.last_production,
            ready: generator.can_produce(now),
            value: self.value(generator),
            network_id: self.networks.network_of(generator.id),
        }
    }

    /// Read-only views of every generator, optionally only `owner`'s, by id.
    pub fn snapshots(&self, owner: Option<PlayerId>, now: DateTime<Utc>) -> Vec<GeneratorSnapshot> {
        let mut generators: Vec<Generator> = self
            .generators
            .iter()
            .filter(|generator| owner.is_none_or(|owner| generator.owner == owner))
            .map(|generator| generator.clone())
            .collect();
        generators.sort_by_key(|generator| generator.id);
        generators
            .iter()
            .map(|generator| self.snapshot(generator, now))
            .collect()
    }

    /// The economy snapshot value computation currently uses.
    pub fn economy(&self) -> EconomySnapshot {
        self.economy.borrow().clone()
    }
}
