//! Core entity structs: generator types, generators, networks, members,
//! player statistics, economic transactions, and the read-only snapshots
//! handed to presentation collaborators.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::{NetworkTier, PermissionLevel, TransactionSource};
use crate::ids::{GeneratorId, NetworkId, PlayerId};
use crate::location::BlockLocation;
use crate::money::compound;

/// Milliseconds per second.
const MILLIS_PER_SECOND: u64 = 1_000;

// ---------------------------------------------------------------------------
// Generator types
// ---------------------------------------------------------------------------

/// Where a generator type evolves to once it reaches its max level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct EvolutionSpec {
    /// Id of the target generator type.
    pub target: String,
    /// Price of the evolution.
    #[ts(as = "String")]
    pub cost: Decimal,
}

/// Immutable economics of one kind of generator.
///
/// Loaded once from configuration and shared by [`Arc`] across every
/// generator of the type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct GeneratorType {
    /// Stable identifier (configuration key).
    pub id: String,
    /// Display name.
    pub display_name: String,
    /// Block material the generator is placed as.
    pub material: String,
    /// Output at level 1 before any multiplier.
    #[ts(as = "String")]
    pub base_value: Decimal,
    /// Per-level exponential growth of output.
    #[ts(as = "String")]
    pub value_multiplier: Decimal,
    /// Highest reachable level.
    pub max_level: u32,
    /// Cooldown between productions, in seconds.
    pub generation_time_secs: u64,
    /// Price of the first level-up.
    #[ts(as = "String")]
    pub upgrade_cost_base: Decimal,
    /// Per-level exponential growth of the level-up price.
    #[ts(as = "String")]
    pub upgrade_cost_multiplier: Decimal,
    /// Optional evolution target.
    pub evolution: Option<EvolutionSpec>,
}

impl GeneratorType {
    /// Clamp a level into `[1, max_level]`.
    pub fn clamp_level(&self, level: u32) -> u32 {
        level.clamp(1, self.max_level.max(1))
    }

    /// `base_value × value_multiplier^(level − 1)`.
    pub fn base_production(&self, level: u32) -> Decimal {
        let steps = self.clamp_level(level).saturating_sub(1);
        compound(self.base_value, self.value_multiplier, steps)
    }

    /// Price of leveling up from `level` to `level + 1`:
    /// `upgrade_cost_base × upgrade_cost_multiplier^(level − 1)`.
    pub fn upgrade_cost(&self, level: u32) -> Decimal {
        let steps = level.max(1).saturating_sub(1);
        compound(self.upgrade_cost_base, self.upgrade_cost_multiplier, steps)
    }

    /// Cooldown in milliseconds.
    pub fn generation_time_millis(&self) -> i64 {
        i64::try_from(self.generation_time_secs.saturating_mul(MILLIS_PER_SECOND))
            .unwrap_or(i64::MAX)
    }
}

// ---------------------------------------------------------------------------
// Generators
// ---------------------------------------------------------------------------

/// A placed generator.
#[derive(Debug, Clone)]
pub struct Generator {
    /// Durable id assigned by the store.
    pub id: GeneratorId,
    /// Owning player.
    pub owner: PlayerId,
    /// Where the generator sits. Unique among active generators.
    pub location: BlockLocation,
    /// Shared type definition.
    pub generator_type: Arc<GeneratorType>,
    /// Current level in `[1, max_level]`.
    pub level: u32,
    /// When the generator last produced (or was placed).
    pub last_production: DateTime<Utc>,
}

impl Generator {
    /// Id of the generator's type.
    pub fn type_id(&self) -> &str {
        &self.generator_type.id
    }

    /// Whether the cooldown has elapsed at `now`.
    pub fn can_produce(&self, now: DateTime<Utc>) -> bool {
        let elapsed = now
            .signed_duration_since(self.last_production)
            .num_milliseconds();
        elapsed >= self.generator_type.generation_time_millis()
    }

    /// Milliseconds left until the generator can produce (zero when ready).
    pub fn millis_until_ready(&self, now: DateTime<Utc>) -> i64 {
        let elapsed = now
            .signed_duration_since(self.last_production)
            .num_milliseconds();
        self.generator_type
            .generation_time_millis()
            .saturating_sub(elapsed)
            .max(0)
    }

    /// Output before the network bonus and economy multiplier are applied.
    pub fn base_value(&self) -> Decimal {
        self.generator_type.base_production(self.level)
    }

    /// Whether the generator is at its type's max level.
    pub fn is_max_level(&self) -> bool {
        self.level >= self.generator_type.max_level
    }
}

// ---------------------------------------------------------------------------
// Networks
// ---------------------------------------------------------------------------

/// Bonus curve and price of one network tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct TierSpec {
    /// Bonus of an empty network.
    #[ts(as = "String")]
    pub base_bonus: Decimal,
    /// Bonus added per connected generator.
    #[ts(as = "String")]
    pub per_generator_bonus: Decimal,
    /// Ceiling of the bonus.
    #[ts(as = "String")]
    pub max_bonus: Decimal,
    /// Price of upgrading into this tier.
    #[ts(as = "String")]
    pub upgrade_cost: Decimal,
}

impl TierSpec {
    /// `min(base_bonus + members × per_generator_bonus, max_bonus)`.
    pub fn efficiency_bonus(&self, members: usize) -> Decimal {
        let per_member = self
            .per_generator_bonus
            .checked_mul(Decimal::from(members))
            .unwrap_or(Decimal::MAX);
        self.base_bonus
            .checked_add(per_member)
            .unwrap_or(Decimal::MAX)
            .min(self.max_bonus)
    }
}

/// A group of generators sharing an efficiency bonus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Network {
    /// Durable id assigned by the store.
    pub id: NetworkId,
    /// The single player resolving to [`PermissionLevel::Owner`].
    pub owner: PlayerId,
    /// Display name.
    pub name: String,
    /// Current tier.
    pub tier: NetworkTier,
    /// Member generators.
    pub connected: BTreeSet<GeneratorId>,
    /// Derived bonus, recomputed on membership and tier changes.
    pub efficiency_bonus: Decimal,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Network {
    /// Number of member generators.
    pub fn member_count(&self) -> usize {
        self.connected.len()
    }
}

/// A player's stored grant on a network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct NetworkMember {
    /// Network the grant applies to.
    pub network_id: NetworkId,
    /// Player holding the grant.
    pub player_id: PlayerId,
    /// Player display name at grant time.
    pub player_name: String,
    /// Granted level. Never [`PermissionLevel::Owner`].
    pub level: PermissionLevel,
    /// When the player joined.
    pub joined_at: DateTime<Utc>,
    /// When the player's permission was last looked up.
    pub last_access: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Player statistics and transactions
// ---------------------------------------------------------------------------

/// Per-player aggregates kept in `player_stats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct PlayerStats {
    /// The player.
    pub player_id: PlayerId,
    /// Last known display name.
    pub player_name: String,
    /// Generators currently owned.
    pub generators_owned: u32,
    /// Lifetime collected earnings.
    #[ts(as = "String")]
    pub total_earnings: Decimal,
    /// Whether the player wants network notifications.
    pub network_notifications: bool,
}

/// One money movement recorded for economic analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct EconomicTransaction {
    /// The player whose wallet moved.
    pub player_id: PlayerId,
    /// Amount; positive for earnings, negative for spending.
    #[ts(as = "String")]
    pub amount: Decimal,
    /// What caused the movement.
    pub source: TransactionSource,
    /// When it happened.
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// Read-only view of a generator for presentation collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct GeneratorSnapshot {
    /// Generator id.
    pub id: GeneratorId,
    /// Owner.
    pub owner: PlayerId,
    /// Location.
    pub location: BlockLocation,
    /// Type id.
    pub type_id: String,
    /// Type display name.
    pub type_name: String,
    /// Current level.
    pub level: u32,
    /// Max level of the type.
    pub max_level: u32,
    /// Last production time.
    pub last_production: DateTime<Utc>,
    /// Whether the generator can be collected right now.
    pub ready: bool,
    /// Current value including network bonus and economy multiplier.
    #[ts(as = "String")]
    pub value: Decimal,
    /// Network the generator belongs to, if any.
    pub network_id: Option<NetworkId>,
}

/// Read-only view of a network for presentation collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct NetworkSnapshot {
    /// Network id.
    pub id: NetworkId,
    /// Owner.
    pub owner: PlayerId,
    /// Display name.
    pub name: String,
    /// Tier.
    pub tier: NetworkTier,
    /// Member generator ids.
    pub members: Vec<GeneratorId>,
    /// Current efficiency bonus.
    #[ts(as = "String")]
    pub efficiency_bonus: Decimal,
    /// Join range in blocks.
    pub range: f64,
    /// Max member count.
    pub capacity: u32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Raw inputs the economy controller read during a cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct EconomyMetrics {
    /// Active generators across the server.
    pub total_generators: u64,
    /// Lifetime collected earnings across all players.
    #[ts(as = "String")]
    pub total_earnings: Decimal,
    /// Earnings collected in the trailing hour.
    #[ts(as = "String")]
    pub recent_earnings: Decimal,
    /// Sum of every wallet balance.
    #[ts(as = "String")]
    pub total_balance: Decimal,
    /// Wallet sum observed on the previous cycle.
    #[ts(as = "String")]
    pub previous_balance: Decimal,
    /// Players online during the cycle.
    pub online_players: u32,
    /// Active generators per type id.
    pub type_counts: BTreeMap<String, u64>,
}

/// The multipliers consumed by value computation, plus the inputs that
/// produced them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct EconomySnapshot {
    /// Whether dynamic balancing is active.
    pub enabled: bool,
    /// Server-wide multiplier.
    #[ts(as = "String")]
    pub global_multiplier: Decimal,
    /// Rarity adjustment per type id (added to 1 before multiplying).
    #[ts(as = "BTreeMap<String, String>")]
    pub rarity: BTreeMap<String, Decimal>,
    /// Inflation factor of the last cycle.
    #[ts(as = "String")]
    pub inflation_factor: Decimal,
    /// Activity factor of the last cycle.
    #[ts(as = "String")]
    pub activity_factor: Decimal,
    /// Saturation factor of the last cycle.
    #[ts(as = "String")]
    pub saturation_factor: Decimal,
    /// Inputs of the last cycle.
    pub metrics: EconomyMetrics,
    /// When the snapshot was computed (`None` before the first cycle).
    pub computed_at: Option<DateTime<Utc>>,
}

impl EconomySnapshot {
    /// The neutral snapshot: every multiplier is 1.
    pub fn neutral(enabled: bool) -> Self {
        Self {
            enabled,
            global_multiplier: Decimal::ONE,
            rarity: BTreeMap::new(),
            inflation_factor: Decimal::ONE,
            activity_factor: Decimal::ONE,
            saturation_factor: Decimal::ONE,
            metrics: EconomyMetrics::default(),
            computed_at: None,
        }
    }

    /// Multiplier applied to a generator of `type_id`:
    /// `global × (1 + rarity[type_id])`, or exactly 1 when disabled.
    pub fn multiplier_for(&self, type_id: &str) -> Decimal {
        if !self.enabled {
            return Decimal::ONE;
        }
        let rarity = self.rarity.get(type_id).copied().unwrap_or(Decimal::ZERO);
        self.global_multiplier
            .checked_mul(Decimal::ONE.checked_add(rarity).unwrap_or(Decimal::ONE))
            .unwrap_or(self.global_multiplier)
            .max(Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use rust_decimal_macros::dec;

    use super::*;

    fn stone() -> GeneratorType {
        GeneratorType {
            id: String::from("stone"),
            display_name: String::from("Stone Generator"),
            material: String::from("STONE"),
            base_value: dec!(10),
            value_multiplier: dec!(1.5),
            max_level: 5,
            generation_time_secs: 60,
            upgrade_cost_base: dec!(100),
            upgrade_cost_multiplier: dec!(2),
            evolution: None,
        }
    }

    fn placed(level: u32, at: DateTime<Utc>) -> Generator {
        Generator {
            id: GeneratorId::new(1),
            owner: PlayerId::new(),
            location: BlockLocation::new("world", 0, 64, 0),
            generator_type: Arc::new(stone()),
            level,
            last_production: at,
        }
    }

    #[test]
    fn base_production_grows_per_level() {
        let t = stone();
        assert_eq!(t.base_production(1), dec!(10));
        assert_eq!(t.base_production(3), dec!(22.5));
        assert!(t.base_production(4) > t.base_production(3));
    }

    #[test]
    fn base_production_clamps_level() {
        let t = stone();
        assert_eq!(t.base_production(0), t.base_production(1));
        assert_eq!(t.base_production(99), t.base_production(5));
    }

    #[test]
    fn upgrade_cost_curve() {
        let t = stone();
        assert_eq!(t.upgrade_cost(1), dec!(100));
        assert_eq!(t.upgrade_cost(3), dec!(400));
    }

    #[test]
    fn production_ready_exactly_at_generation_time() {
        let start = Utc::now();
        let generator = placed(1, start);
        assert!(!generator.can_produce(start));
        assert!(!generator.can_produce(start + Duration::milliseconds(59_999)));
        assert!(generator.can_produce(start + Duration::seconds(60)));
        assert_eq!(generator.millis_until_ready(start + Duration::seconds(61)), 0);
    }

    #[test]
    fn tier_bonus_saturates() {
        let basic = TierSpec {
            base_bonus: dec!(0.05),
            per_generator_bonus: dec!(0.01),
            max_bonus: dec!(0.25),
            upgrade_cost: Decimal::ZERO,
        };
        assert_eq!(basic.efficiency_bonus(0), dec!(0.05));
        assert_eq!(basic.efficiency_bonus(3), dec!(0.08));
        assert_eq!(basic.efficiency_bonus(20), dec!(0.25));
        assert_eq!(basic.efficiency_bonus(500), dec!(0.25));
    }

    #[test]
    fn disabled_economy_is_neutral() {
        let mut snapshot = EconomySnapshot::neutral(false);
        snapshot.global_multiplier = dec!(1.7);
        snapshot.rarity.insert(String::from("stone"), dec!(0.2));
        assert_eq!(snapshot.multiplier_for("stone"), Decimal::ONE);
    }

    #[test]
    fn rarity_combines_with_global() {
        let mut snapshot = EconomySnapshot::neutral(true);
        snapshot.global_multiplier = dec!(0.8);
        snapshot.rarity.insert(String::from("diamond"), dec!(0.2));
        assert_eq!(snapshot.multiplier_for("diamond"), dec!(0.96));
        assert_eq!(snapshot.multiplier_for("stone"), dec!(0.8));
    }
}
