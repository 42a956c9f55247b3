//! Configuration loading and typed config structures for Genforge.
//!
//! The canonical configuration lives in `genforge-config.yaml` next to the
//! server binary. Every field has a default, so a missing section (or a
//! missing file) leaves the documented values in place.
//!
//! ```yaml
//! generators:
//!   stone:
//!     display_name: Stone Generator
//!     base_value: 10
//!     value_multiplier: 1.5
//!     generation_time_secs: 60
//! economy:
//!   enabled: true
//!   min_multiplier: 0.5
//!   max_multiplier: 2.0
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use genforge_db::{BatchConfig, DatabaseConfig};
use genforge_types::{EvolutionSpec, GeneratorType, NetworkTier, TierSpec};
use rust_decimal::Decimal;
use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// The configuration parsed but is inconsistent.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level configuration.
///
/// Mirrors the structure of `genforge-config.yaml`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GenforgeConfig {
    /// Store connection and batching.
    #[serde(default)]
    pub database: DatabaseSection,

    /// Generator type definitions keyed by type id.
    #[serde(default = "default_generators")]
    pub generators: BTreeMap<String, GeneratorTypeConfig>,

    /// Network tiers, capacity and range.
    #[serde(default)]
    pub networks: NetworkConfig,

    /// Economy controller knobs.
    #[serde(default)]
    pub economy: EconomyConfig,

    /// Per-player limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Built-in wallet settings.
    #[serde(default)]
    pub wallet: WalletConfig,

    /// HTTP API settings.
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for GenforgeConfig {
    fn default() -> Self {
        Self {
            database: DatabaseSection::default(),
            generators: default_generators(),
            networks: NetworkConfig::default(),
            economy: EconomyConfig::default(),
            limits: LimitsConfig::default(),
            wallet: WalletConfig::default(),
            api: ApiConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl GenforgeConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override YAML values:
    /// - `DATABASE_URL` overrides `database.url`
    /// - `GENFORGE_API_PORT` overrides `api.port`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if validation fails.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if validation fails.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database.url = url;
        }
        if let Some(port) = std::env::var("GENFORGE_API_PORT")
            .ok()
            .and_then(|raw| raw.parse().ok())
        {
            self.api.port = port;
        }
    }

    /// Check cross-field consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.generators.is_empty() {
            return Err(ConfigError::Invalid(String::from(
                "at least one generator type must be configured",
            )));
        }
        for (id, generator) in &self.generators {
            if generator.max_level == 0 {
                return Err(ConfigError::Invalid(format!(
                    "generator type {id}: max_level must be at least 1"
                )));
            }
            if generator.base_value.is_sign_negative() {
                return Err(ConfigError::Invalid(format!(
                    "generator type {id}: base_value must not be negative"
                )));
            }
            if let Some(evolution) = &generator.evolution {
                if !self.generators.contains_key(&evolution.target) {
                    return Err(ConfigError::Invalid(format!(
                        "generator type {id}: evolution target {} is not configured",
                        evolution.target
                    )));
                }
            }
        }
        if self.economy.min_multiplier > self.economy.max_multiplier {
            return Err(ConfigError::Invalid(String::from(
                "economy.min_multiplier exceeds economy.max_multiplier",
            )));
        }
        Ok(())
    }

    /// Every configured generator type.
    pub fn generator_types(&self) -> Vec<GeneratorType> {
        self.generators
            .iter()
            .map(|(id, generator)| generator.to_type(id))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

/// Store connection and batching settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatabaseSection {
    /// `SQLite` connection URL.
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Busy timeout in seconds.
    #[serde(default = "default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,

    /// Operations per player before a batch flushes.
    #[serde(default = "default_batch_max_size")]
    pub batch_max_size: usize,

    /// Age in milliseconds after which a batch flushes on the next sweep.
    #[serde(default = "default_batch_max_age_ms")]
    pub batch_max_age_ms: u64,

    /// Batch sweep interval in milliseconds.
    #[serde(default = "default_batch_sweep_interval_ms")]
    pub batch_sweep_interval_ms: u64,

    /// Sleep between pending-operation checks at shutdown, in milliseconds.
    #[serde(default = "default_shutdown_poll_interval_ms")]
    pub shutdown_poll_interval_ms: u64,

    /// Pending-operation checks at shutdown.
    #[serde(default = "default_shutdown_max_polls")]
    pub shutdown_max_polls: u32,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            busy_timeout_secs: default_busy_timeout_secs(),
            batch_max_size: default_batch_max_size(),
            batch_max_age_ms: default_batch_max_age_ms(),
            batch_sweep_interval_ms: default_batch_sweep_interval_ms(),
            shutdown_poll_interval_ms: default_shutdown_poll_interval_ms(),
            shutdown_max_polls: default_shutdown_max_polls(),
        }
    }
}

impl DatabaseSection {
    /// Build the gateway configuration.
    pub fn to_database_config(&self) -> DatabaseConfig {
        DatabaseConfig::new(&self.url)
            .with_busy_timeout(Duration::from_secs(self.busy_timeout_secs))
            .with_shutdown_polling(
                Duration::from_millis(self.shutdown_poll_interval_ms),
                self.shutdown_max_polls,
            )
            .with_batch(BatchConfig {
                max_size: self.batch_max_size.max(1),
                max_age: Duration::from_millis(self.batch_max_age_ms),
                sweep_interval: Duration::from_millis(self.batch_sweep_interval_ms.max(1)),
            })
    }
}

// ---------------------------------------------------------------------------
// Generators
// ---------------------------------------------------------------------------

/// Economics of one generator type.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GeneratorTypeConfig {
    /// Display name.
    pub display_name: String,

    /// Block material.
    #[serde(default = "default_material")]
    pub material: String,

    /// Output at level 1.
    pub base_value: Decimal,

    /// Per-level output growth.
    #[serde(default = "default_value_multiplier")]
    pub value_multiplier: Decimal,

    /// Highest level.
    #[serde(default = "default_max_level")]
    pub max_level: u32,

    /// Cooldown in seconds.
    #[serde(default = "default_generation_time_secs")]
    pub generation_time_secs: u64,

    /// Price of the first level-up.
    #[serde(default = "default_upgrade_cost_base")]
    pub upgrade_cost_base: Decimal,

    /// Per-level price growth.
    #[serde(default = "default_upgrade_cost_multiplier")]
    pub upgrade_cost_multiplier: Decimal,

    /// Optional evolution at max level.
    #[serde(default)]
    pub evolution: Option<EvolutionSpec>,
}

impl GeneratorTypeConfig {
    /// Build the shared type definition for type `id`.
    pub fn to_type(&self, id: &str) -> GeneratorType {
        GeneratorType {
            id: id.to_owned(),
            display_name: self.display_name.clone(),
            material: self.material.clone(),
            base_value: self.base_value,
            value_multiplier: self.value_multiplier,
            max_level: self.max_level,
            generation_time_secs: self.generation_time_secs,
            upgrade_cost_base: self.upgrade_cost_base,
            upgrade_cost_multiplier: self.upgrade_cost_multiplier,
            evolution: self.evolution.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Networks
// ---------------------------------------------------------------------------

/// Per-tier bonus curves.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TierTable {
    /// Entry tier.
    #[serde(default = "default_basic_tier")]
    pub basic: TierSpec,
    /// Second tier.
    #[serde(default = "default_advanced_tier")]
    pub advanced: TierSpec,
    /// Third tier.
    #[serde(default = "default_elite_tier")]
    pub elite: TierSpec,
    /// Highest tier.
    #[serde(default = "default_ultimate_tier")]
    pub ultimate: TierSpec,
}

impl Default for TierTable {
    fn default() -> Self {
        Self {
            basic: default_basic_tier(),
            advanced: default_advanced_tier(),
            elite: default_elite_tier(),
            ultimate: default_ultimate_tier(),
        }
    }
}

/// Network tiers plus the capacity and range formulas.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NetworkConfig {
    /// Bonus curve per tier.
    #[serde(default)]
    pub tiers: TierTable,

    /// Capacity of a rank-0 network.
    #[serde(default = "default_base_capacity")]
    pub base_capacity: u32,

    /// Capacity added per tier rank.
    #[serde(default = "default_capacity_step")]
    pub capacity_step: u32,

    /// Join range of a rank-0 network, in blocks.
    #[serde(default = "default_base_range")]
    pub base_range: f64,

    /// Range added per tier rank, in blocks.
    #[serde(default = "default_range_step")]
    pub range_step: f64,

    /// Longest accepted network name.
    #[serde(default = "default_max_name_length")]
    pub max_name_length: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            tiers: TierTable::default(),
            base_capacity: default_base_capacity(),
            capacity_step: default_capacity_step(),
            base_range: default_base_range(),
            range_step: default_range_step(),
            max_name_length: default_max_name_length(),
        }
    }
}

impl NetworkConfig {
    /// Bonus curve of `tier`.
    pub const fn tier(&self, tier: NetworkTier) -> &TierSpec {
        match tier {
            NetworkTier::Basic => &self.tiers.basic,
            NetworkTier::Advanced => &self.tiers.advanced,
            NetworkTier::Elite => &self.tiers.elite,
            NetworkTier::Ultimate => &self.tiers.ultimate,
        }
    }

    /// `base_capacity + rank × capacity_step`.
    pub const fn capacity(&self, tier: NetworkTier) -> u32 {
        self.base_capacity
            .saturating_add(tier.rank().saturating_mul(self.capacity_step))
    }

    /// `base_range + rank × range_step`.
    pub fn range(&self, tier: NetworkTier) -> f64 {
        f64::from(tier.rank()).mul_add(self.range_step, self.base_range)
    }
}

// ---------------------------------------------------------------------------
// Economy
// ---------------------------------------------------------------------------

/// Economy controller knobs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EconomyConfig {
    /// Whether dynamic balancing runs. When `false` every multiplier is 1.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between cycles.
    #[serde(default = "default_update_interval_secs")]
    pub update_interval_secs: u64,

    /// Multiplier before any factor is applied.
    #[serde(default = "default_base_multiplier")]
    pub base_multiplier: Decimal,

    /// Lower clamp of the global multiplier.
    #[serde(default = "default_min_multiplier")]
    pub min_multiplier: Decimal,

    /// Upper clamp of the global multiplier.
    #[serde(default = "default_max_multiplier")]
    pub max_multiplier: Decimal,

    /// Balance growth per cycle tolerated before inflation control kicks in.
    #[serde(default = "default_inflation_threshold")]
    pub inflation_threshold: Decimal,

    /// Multiplier reduction per unit of growth above the threshold.
    #[serde(default = "default_inflation_sensitivity")]
    pub inflation_sensitivity: Decimal,

    /// Online players considered normal.
    #[serde(default = "default_expected_players")]
    pub expected_players: u32,

    /// Multiplier reduction per unit of relative excess players.
    #[serde(default = "default_activity_sensitivity")]
    pub activity_sensitivity: Decimal,

    /// Active generators considered normal.
    #[serde(default = "default_expected_generators")]
    pub expected_generators: u64,

    /// Multiplier change per unit of relative generator excess or deficit.
    #[serde(default = "default_saturation_sensitivity")]
    pub saturation_sensitivity: Decimal,

    /// Trailing window for the recent-earnings metric, in seconds.
    #[serde(default = "default_earnings_window_secs")]
    pub earnings_window_secs: u64,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            update_interval_secs: default_update_interval_secs(),
            base_multiplier: default_base_multiplier(),
            min_multiplier: default_min_multiplier(),
            max_multiplier: default_max_multiplier(),
            inflation_threshold: default_inflation_threshold(),
            inflation_sensitivity: default_inflation_sensitivity(),
            expected_players: default_expected_players(),
            activity_sensitivity: default_activity_sensitivity(),
            expected_generators: default_expected_generators(),
            saturation_sensitivity: default_saturation_sensitivity(),
            earnings_window_secs: default_earnings_window_secs(),
        }
    }
}

impl EconomyConfig {
    /// Interval between cycles.
    pub const fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }
}

// ---------------------------------------------------------------------------
// Limits, wallet, API, logging
// ---------------------------------------------------------------------------

/// Per-player limits.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LimitsConfig {
    /// Generators a player may own at once. `0` means unlimited.
    #[serde(default = "default_max_generators_per_player")]
    pub max_generators_per_player: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_generators_per_player: default_max_generators_per_player(),
        }
    }
}

/// Built-in wallet settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WalletConfig {
    /// Balance a player's wallet starts with.
    #[serde(default = "default_starting_balance")]
    pub starting_balance: Decimal,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            starting_balance: default_starting_balance(),
        }
    }
}

/// HTTP API settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ApiConfig {
    /// Whether the HTTP API is served.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Bind host.
    #[serde(default = "default_api_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_api_host(),
            port: default_api_port(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `pretty` or `json`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions (serde default requires named functions)
// ---------------------------------------------------------------------------

const fn default_true() -> bool {
    true
}

fn default_database_url() -> String {
    "sqlite://genforge.db".to_owned()
}

const fn default_busy_timeout_secs() -> u64 {
    5
}

const fn default_batch_max_size() -> usize {
    20
}

const fn default_batch_max_age_ms() -> u64 {
    2_000
}

const fn default_batch_sweep_interval_ms() -> u64 {
    500
}

const fn default_shutdown_poll_interval_ms() -> u64 {
    100
}

const fn default_shutdown_max_polls() -> u32 {
    50
}

fn default_material() -> String {
    "STONE".to_owned()
}

const fn default_value_multiplier() -> Decimal {
    Decimal::from_parts(15, 0, 0, false, 1)
}

const fn default_max_level() -> u32 {
    10
}

const fn default_generation_time_secs() -> u64 {
    60
}

const fn default_upgrade_cost_base() -> Decimal {
    Decimal::ONE_HUNDRED
}

const fn default_upgrade_cost_multiplier() -> Decimal {
    Decimal::TWO
}

fn generator(
    display_name: &str,
    material: &str,
    base_value: i64,
    generation_time_secs: u64,
    upgrade_cost_base: i64,
    evolution: Option<(&str, i64)>,
) -> GeneratorTypeConfig {
    GeneratorTypeConfig {
        display_name: display_name.to_owned(),
        material: material.to_owned(),
        base_value: Decimal::from(base_value),
        value_multiplier: default_value_multiplier(),
        max_level: default_max_level(),
        generation_time_secs,
        upgrade_cost_base: Decimal::from(upgrade_cost_base),
        upgrade_cost_multiplier: default_upgrade_cost_multiplier(),
        evolution: evolution.map(|(target, cost)| EvolutionSpec {
            target: target.to_owned(),
            cost: Decimal::from(cost),
        }),
    }
}

fn default_generators() -> BTreeMap<String, GeneratorTypeConfig> {
    BTreeMap::from([
        (
            "stone".to_owned(),
            generator("Stone Generator", "STONE", 10, 60, 100, Some(("iron", 5_000))),
        ),
        (
            "iron".to_owned(),
            generator("Iron Generator", "IRON_BLOCK", 50, 120, 500, Some(("gold", 25_000))),
        ),
        (
            "gold".to_owned(),
            generator("Gold Generator", "GOLD_BLOCK", 200, 180, 2_000, Some(("diamond", 100_000))),
        ),
        (
            "diamond".to_owned(),
            generator("Diamond Generator", "DIAMOND_BLOCK", 1_000, 300, 10_000, None),
        ),
    ])
}

fn tier(base: i64, per: i64, max: i64, cost: i64) -> TierSpec {
    TierSpec {
        base_bonus: Decimal::new(base, 3),
        per_generator_bonus: Decimal::new(per, 3),
        max_bonus: Decimal::new(max, 3),
        upgrade_cost: Decimal::from(cost),
    }
}

fn default_basic_tier() -> TierSpec {
    tier(50, 10, 250, 0)
}

fn default_advanced_tier() -> TierSpec {
    tier(100, 15, 400, 10_000)
}

fn default_elite_tier() -> TierSpec {
    tier(150, 20, 600, 50_000)
}

fn default_ultimate_tier() -> TierSpec {
    tier(200, 25, 800, 250_000)
}

const fn default_base_capacity() -> u32 {
    10
}

const fn default_capacity_step() -> u32 {
    10
}

const fn default_base_range() -> f64 {
    16.0
}

const fn default_range_step() -> f64 {
    8.0
}

const fn default_max_name_length() -> usize {
    32
}

const fn default_update_interval_secs() -> u64 {
    300
}

const fn default_base_multiplier() -> Decimal {
    Decimal::ONE
}

const fn default_min_multiplier() -> Decimal {
    Decimal::from_parts(5, 0, 0, false, 1)
}

const fn default_max_multiplier() -> Decimal {
    Decimal::TWO
}

const fn default_inflation_threshold() -> Decimal {
    Decimal::from_parts(1, 0, 0, false, 1)
}

const fn default_inflation_sensitivity() -> Decimal {
    Decimal::from_parts(5, 0, 0, false, 1)
}

const fn default_expected_players() -> u32 {
    20
}

const fn default_activity_sensitivity() -> Decimal {
    Decimal::from_parts(3, 0, 0, false, 1)
}

const fn default_expected_generators() -> u64 {
    200
}

const fn default_saturation_sensitivity() -> Decimal {
    Decimal::from_parts(5, 0, 0, false, 1)
}

const fn default_earnings_window_secs() -> u64 {
    3_600
}

const fn default_max_generators_per_player() -> u32 {
    50
}

const fn default_starting_balance() -> Decimal {
    Decimal::ONE_THOUSAND
}

fn default_api_host() -> String {
    "0.0.0.0".to_owned()
}

const fn default_api_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_log_format() -> String {
    "pretty".to_owned()
}
