//! Gameplay service: the player-facing operations, composed from the
//! registry, the network and permission engines, and the wallet.
//!
//! Every operation validates against in-memory state first, charges the
//! wallet when a price applies, and then changes durable and in-memory
//! state through the engines. When a charged change fails to persist the
//! charge is refunded.
//!
//! | Operation | Required access |
//! |-----------|-----------------|
//! | pickup, upgrade, evolve | generator owner |
//! | collect | generator owner, or `USE` on its network |
//! | join / leave network | generator owner and `MANAGE` |
//! | upgrade / rename network, manage members | `ADMIN` |
//! | transfer / dismantle network | `OWNER` |

use std::sync::Arc;

use chrono::{DateTime, Utc};
use genforge_db::{Gateway, GeneratorStore, StatsStore};
use genforge_types::{
    BlockLocation, EconomicTransaction, Generator, GeneratorSnapshot, Network, NetworkId,
    NetworkMember, NetworkTier, PermissionLevel, PlayerId, TransactionSource,
};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::{ServiceError, ValidationError};
use crate::network::NetworkEngine;
use crate::permission::PermissionEngine;
use crate::registry::GeneratorRegistry;
use crate::wallet::Wallet;

/// Milliseconds per second, for cooldown messages.
const MILLIS_PER_SECOND: i64 = 1_000;

/// Result of collecting from every ready generator a player owns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CollectSummary {
    /// Generators that produced.
    pub collected: u32,
    /// Total paid out.
    pub amount: Decimal,
}

/// Player-facing operations.
pub struct GeneratorService {
    gateway: Arc<Gateway>,
    registry: Arc<GeneratorRegistry>,
    networks: Arc<NetworkEngine>,
    permissions: Arc<PermissionEngine>,
    wallet: Arc<dyn Wallet>,
}

impl GeneratorService {
    /// Compose the service.
    pub fn new(
        gateway: Arc<Gateway>,
        registry: Arc<GeneratorRegistry>,
        networks: Arc<NetworkEngine>,
        permissions: Arc<PermissionEngine>,
        wallet: Arc<dyn Wallet>,
    ) -> Self {
        Self {
            gateway,
            registry,
            networks,
            permissions,
            wallet,
        }
    }

    // -----------------------------------------------------------------------
    // Generators
    // -----------------------------------------------------------------------

    /// Place a generator for `player`.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Validation`] for an unknown type, an occupied
    /// location, or a full allowance, and [`ServiceError::Store`] if the
    /// insert fails.
    pub async fn place_generator(
        &self,
        player: PlayerId,
        player_name: &str,
        location: BlockLocation,
        type_id: &str,
        now: DateTime<Utc>,
    ) -> Result<GeneratorSnapshot, ServiceError> {
        let generator = self
            .registry
            .place(player, player_name, location, type_id, now)
            .await?;
        Ok(self.registry.snapshot(&generator, now))
    }

    /// Pick up one of the player's generators.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Validation`] if there is no generator or the
    /// player does not own it, and [`ServiceError::Store`] if the delete
    /// fails.
    pub async fn pickup_generator(
        &self,
        player: PlayerId,
        location: &BlockLocation,
        now: DateTime<Utc>,
    ) -> Result<GeneratorSnapshot, ServiceError> {
        let generator = self.owned_generator(player, location)?;
        let snapshot = self.registry.snapshot(&generator, now);
        if !self.registry.remove(location).await? {
            return Err(ValidationError::GeneratorNotFound(location.clone()).into());
        }
        Ok(snapshot)
    }

    /// Collect from one generator and pay the player.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Validation`] if there is no generator, the
    /// player may not use it, or its cooldown has not elapsed.
    pub fn collect(
        &self,
        player: PlayerId,
        location: &BlockLocation,
        now: DateTime<Utc>,
    ) -> Result<Decimal, ServiceError> {
        let generator = self
            .registry
            .get(location)
            .ok_or_else(|| ValidationError::GeneratorNotFound(location.clone()))?;
        if generator.owner != player {
            let network = self
                .networks
                .network_of(generator.id)
                .ok_or(ValidationError::NotOwner)?;
            self.permissions
                .require(network, player, PermissionLevel::Use, now)?;
        }
        self.collect_generator(player, &generator, now)
    }

    /// Collect from every ready generator the player owns.
    pub fn collect_all(&self, player: PlayerId, now: DateTime<Utc>) -> CollectSummary {
        let mut summary = CollectSummary::default();
        for generator in self.registry.owned_by(player) {
            if !generator.can_produce(now) {
                continue;
            }
            if let Ok(amount) = self.collect_generator(player, &generator, now) {
                summary.collected = summary.collected.saturating_add(1);
                summary.amount = summary.amount.saturating_add(amount);
            }
        }
        debug!(%player, collected = summary.collected, amount = %summary.amount, "Collected all");
        summary
    }

    /// Buy the next level of one of the player's generators.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Validation`] if the generator is missing, not
    /// the player's, already at max level, or unaffordable, and
    /// [`ServiceError::Store`] if the level change fails (the price is
    /// refunded then).
    pub async fn upgrade_generator(
        &self,
        player: PlayerId,
        location: &BlockLocation,
        now: DateTime<Utc>,
    ) -> Result<GeneratorSnapshot, ServiceError> {
        let generator = self.owned_generator(player, location)?;
        if generator.is_max_level() {
            return Err(ValidationError::MaxLevel.into());
        }
        let cost = generator.generator_type.upgrade_cost(generator.level);
        self.charge(player, cost)?;

        let target = generator.level.saturating_add(1);
        if let Err(e) = self.registry.set_level(location, target).await {
            self.refund(player, cost, "generator upgrade");
            return Err(e.into());
        }
        self.record_spend(player, cost, TransactionSource::Upgrade, now);
        info!(%player, %location, level = target, cost = %cost, "Upgraded generator");
        self.snapshot_at(location, now)
    }

    /// Evolve a max-level generator into its type's evolution target.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Validation`] if the generator is missing, not
    /// the player's, below max level, has no evolution, or is unaffordable,
    /// and [`ServiceError::Store`] if the change fails (refunded then).
    pub async fn evolve_generator(
        &self,
        player: PlayerId,
        location: &BlockLocation,
        now: DateTime<Utc>,
    ) -> Result<GeneratorSnapshot, ServiceError> {
        let generator = self.owned_generator(player, location)?;
        let evolution = generator
            .generator_type
            .evolution
            .clone()
            .ok_or(ValidationError::NoEvolution)?;
        if !generator.is_max_level() {
            return Err(ValidationError::NotMaxLevel.into());
        }
        if self.registry.generator_type(&evolution.target).is_none() {
            return Err(ValidationError::UnknownType(evolution.target).into());
        }
        self.charge(player, evolution.cost)?;

        if let Err(e) = self.registry.set_type(location, &evolution.target).await {
            self.refund(player, evolution.cost, "generator evolution");
            return Err(e.into());
        }
        self.record_spend(player, evolution.cost, TransactionSource::Evolution, now);
        self.snapshot_at(location, now)
    }

    // -----------------------------------------------------------------------
    // Networks
    // -----------------------------------------------------------------------

    /// Create a network owned by `player`, charging the tier's price.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Validation`] for a bad name or an
    /// unaffordable tier, and [`ServiceError::Store`] if the insert fails
    /// (refunded then).
    pub async fn create_network(
        &self,
        player: PlayerId,
        name: &str,
        tier: NetworkTier,
        now: DateTime<Utc>,
    ) -> Result<Network, ServiceError> {
        let cost = self.networks.config().tier(tier).upgrade_cost;
        self.charge(player, cost)?;
        match self.networks.create_network(player, name, tier, now).await {
            Ok(network) => {
                self.record_spend(player, cost, TransactionSource::NetworkUpgrade, now);
                Ok(network)
            }
            Err(e) => {
                self.refund(player, cost, "network creation");
                Err(e.into())
            }
        }
    }

    /// Put one of the player's generators into a network.
    ///
    /// Returns `false` if it already was a member.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Validation`] if the generator is missing or
    /// not the player's, the player lacks `MANAGE`, the generator is out of
    /// range of `controller`, or the network is full.
    pub async fn join_network(
        &self,
        player: PlayerId,
        network_id: NetworkId,
        controller: &BlockLocation,
        location: &BlockLocation,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let generator = self.owned_generator(player, location)?;
        self.permissions
            .require(network_id, player, PermissionLevel::Manage, now)?;
        if !self.networks.is_in_range(network_id, controller, location) {
            let range = self
                .networks
                .get(network_id)
                .map_or(0.0, |network| self.networks.range(network.tier));
            return Err(ValidationError::OutOfRange { range }.into());
        }
        Ok(self.networks.add_generator(network_id, generator.id).await?)
    }

    /// Take one of the player's generators out of its network.
    ///
    /// Returns `false` if it was in none.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Validation`] if the generator is missing or
    /// not the player's, or the player lacks `MANAGE` on its network.
    pub async fn leave_network(
        &self,
        player: PlayerId,
        location: &BlockLocation,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let generator = self.owned_generator(player, location)?;
        let Some(network_id) = self.networks.network_of(generator.id) else {
            return Ok(false);
        };
        self.permissions
            .require(network_id, player, PermissionLevel::Manage, now)?;
        Ok(self.networks.remove_generator(generator.id).await?)
    }

    /// Buy the next tier of a network.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Validation`] if the player lacks `ADMIN`, the
    /// network is at the highest tier, or the price is unaffordable, and
    /// [`ServiceError::Store`] if the update fails (refunded then).
    pub async fn upgrade_network(
        &self,
        player: PlayerId,
        network_id: NetworkId,
        now: DateTime<Utc>,
    ) -> Result<NetworkTier, ServiceError> {
        self.permissions
            .require(network_id, player, PermissionLevel::Admin, now)?;
        let current = self
            .networks
            .get(network_id)
            .map(|network| network.tier)
            .ok_or(ValidationError::NetworkNotFound(network_id))?;
        let next = current.next().ok_or(ValidationError::MaxTier)?;
        let cost = self.networks.config().tier(next).upgrade_cost;
        self.charge(player, cost)?;

        if let Err(e) = self.networks.upgrade_tier(network_id, next).await {
            self.refund(player, cost, "network upgrade");
            return Err(e.into());
        }
        self.record_spend(player, cost, TransactionSource::NetworkUpgrade, now);
        Ok(next)
    }

    /// Rename a network.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Validation`] if the player lacks `ADMIN` or
    /// the name is invalid.
    pub async fn rename_network(
        &self,
        player: PlayerId,
        network_id: NetworkId,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        self.permissions
            .require(network_id, player, PermissionLevel::Admin, now)?;
        Ok(self.networks.rename(network_id, name).await?)
    }

    /// Grant `level` on a network to `target`.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Validation`] if the player lacks `ADMIN`, and
    /// [`ServiceError::Invariant`] for `OWNER` grants or grants to the owner.
    pub async fn set_member_permission(
        &self,
        player: PlayerId,
        network_id: NetworkId,
        target: PlayerId,
        target_name: &str,
        level: PermissionLevel,
        now: DateTime<Utc>,
    ) -> Result<NetworkMember, ServiceError> {
        self.permissions
            .require(network_id, player, PermissionLevel::Admin, now)?;
        Ok(self
            .permissions
            .add_member(network_id, target, target_name, level, now)
            .await?)
    }

    /// Remove `target`'s grant on a network.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Validation`] if the player lacks `ADMIN`, and
    /// [`ServiceError::Invariant`] if `target` owns the network.
    pub async fn remove_member(
        &self,
        player: PlayerId,
        network_id: NetworkId,
        target: PlayerId,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        self.permissions
            .require(network_id, player, PermissionLevel::Admin, now)?;
        Ok(self.permissions.remove_member(network_id, target).await?)
    }

    /// Hand a network to `new_owner`.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Validation`] if the player is not the owner
    /// or already is `new_owner`, and [`ServiceError::Store`] if the
    /// transaction rolled back.
    pub async fn transfer_network(
        &self,
        player: PlayerId,
        network_id: NetworkId,
        new_owner: PlayerId,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        self.permissions
            .require(network_id, player, PermissionLevel::Owner, now)?;
        Ok(self
            .permissions
            .transfer_ownership(network_id, new_owner, now)
            .await?)
    }

    /// Delete a network with its memberships and grants.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Validation`] if the player is not the owner,
    /// and [`ServiceError::Store`] if the cascade fails.
    pub async fn dismantle_network(
        &self,
        player: PlayerId,
        network_id: NetworkId,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        self.permissions
            .require(network_id, player, PermissionLevel::Owner, now)?;
        if !self.networks.delete_network(network_id).await? {
            return Ok(false);
        }
        let grants = self.permissions.forget_network(network_id);
        debug!(network_id = %network_id, grants, "Dropped grants of dismantled network");
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Players
    // -----------------------------------------------------------------------

    /// Flip the player's network notification preference.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Store`] if the update fails.
    pub async fn toggle_notifications(&self, player: PlayerId) -> Result<bool, ServiceError> {
        Ok(StatsStore::new(&self.gateway)
            .toggle_notifications(player)
            .await?)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn owned_generator(
        &self,
        player: PlayerId,
        location: &BlockLocation,
    ) -> Result<Generator, ServiceError> {
        let generator = self
            .registry
            .get(location)
            .ok_or_else(|| ValidationError::GeneratorNotFound(location.clone()))?;
        if generator.owner != player {
            return Err(ValidationError::NotOwner.into());
        }
        Ok(generator)
    }

    fn snapshot_at(
        &self,
        location: &BlockLocation,
        now: DateTime<Utc>,
    ) -> Result<GeneratorSnapshot, ServiceError> {
        self.registry
            .get(location)
            .map(|generator| self.registry.snapshot(&generator, now))
            .ok_or_else(|| ValidationError::GeneratorNotFound(location.clone()).into())
    }

    fn collect_generator(
        &self,
        player: PlayerId,
        generator: &Generator,
        now: DateTime<Utc>,
    ) -> Result<Decimal, ServiceError> {
        let Some(amount) = self.registry.collect(&generator.location, now) else {
            let remaining = generator.millis_until_ready(now);
            let remaining_secs = remaining
                .saturating_add(MILLIS_PER_SECOND.saturating_sub(1))
                .checked_div(MILLIS_PER_SECOND)
                .unwrap_or(0);
            return Err(ValidationError::NotReady { remaining_secs }.into());
        };

        self.wallet.deposit(player, amount);
        GeneratorStore::new(&self.gateway).touch_last_generation(generator.id, now);
        let stats = StatsStore::new(&self.gateway);
        let queued = stats.queue_earnings(player, amount).and_then(|()| {
            stats.queue_transaction(&EconomicTransaction {
                player_id: player,
                amount,
                source: TransactionSource::Collection,
                timestamp: now,
            })
        });
        if let Err(e) = queued {
            error!(%player, generator_id = %generator.id, error = %e, "Failed to record earnings");
        }
        debug!(%player, generator_id = %generator.id, amount = %amount, "Collected");
        Ok(amount)
    }

    fn charge(&self, player: PlayerId, amount: Decimal) -> Result<(), ServiceError> {
        if amount <= Decimal::ZERO {
            return Ok(());
        }
        if !self.wallet.has(player, amount) || !self.wallet.withdraw(player, amount) {
            return Err(ValidationError::InsufficientFunds { required: amount }.into());
        }
        Ok(())
    }

    fn refund(&self, player: PlayerId, amount: Decimal, what: &str) {
        if amount > Decimal::ZERO {
            self.wallet.deposit(player, amount);
            warn!(%player, amount = %amount, what, "Refunded charge after failed change");
        }
    }

    fn record_spend(
        &self,
        player: PlayerId,
        amount: Decimal,
        source: TransactionSource,
        now: DateTime<Utc>,
    ) {
        if amount <= Decimal::ZERO {
            return;
        }
        let recorded = StatsStore::new(&self.gateway).queue_transaction(&EconomicTransaction {
            player_id: player,
            amount,
            source,
            timestamp: now,
        });
        if let Err(e) = recorded {
            error!(%player, source = source.as_str(), error = %e, "Failed to record transaction");
        }
    }
}
