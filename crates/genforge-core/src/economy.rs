//! Economy controller: the periodic feedback loop behind the value
//! multipliers.
//!
//! Each cycle reads the server's metrics, derives three factors, and
//! publishes a new [`EconomySnapshot`] on a `watch` channel. Value
//! computation reads the latest snapshot lazily; nothing is persisted.
//!
//! | Factor | Above baseline | Below baseline |
//! |--------|----------------|----------------|
//! | inflation | `1 − (growth − threshold) × sensitivity`, floor 0.5 | 1.05 on shrink |
//! | activity | `1 − excess × sensitivity`, floor 0.7 | 1.0 |
//! | saturation | `1 − excess × sensitivity`, floor 0.5 | `1 + deficit × sensitivity`, cap 1.2 |
//!
//! `global = clamp(base × inflation × activity × saturation, min, max)`.
//! Each type then gets a rarity adjustment from its share of all
//! generators, and its multiplier is `global × (1 + rarity)`.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use genforge_db::{DbError, Gateway, StatsStore};
use genforge_types::{EconomyMetrics, EconomySnapshot};
use rust_decimal::Decimal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::EconomyConfig;
use crate::registry::GeneratorRegistry;
use crate::wallet::{PlayerActivity, Wallet};

/// Lowest inflation factor.
const INFLATION_FLOOR: Decimal = Decimal::from_parts(5, 0, 0, false, 1);
/// Inflation factor when the money supply shrank.
const DEFLATION_BOOST: Decimal = Decimal::from_parts(105, 0, 0, false, 2);
/// Lowest activity factor.
const ACTIVITY_FLOOR: Decimal = Decimal::from_parts(7, 0, 0, false, 1);
/// Lowest saturation factor.
const SATURATION_FLOOR: Decimal = Decimal::from_parts(5, 0, 0, false, 1);
/// Highest saturation factor.
const SATURATION_CAP: Decimal = Decimal::from_parts(12, 0, 0, false, 1);

/// Rarity adjustment by share of all generators, rarest band first.
const RARITY_BANDS: [(Decimal, Decimal); 2] = [
    (Decimal::from_parts(5, 0, 0, false, 2), Decimal::from_parts(20, 0, 0, false, 2)),
    (Decimal::from_parts(10, 0, 0, false, 2), Decimal::from_parts(10, 0, 0, false, 2)),
];
/// Share above which a type counts as common.
const COMMON_SHARE: Decimal = Decimal::from_parts(30, 0, 0, false, 2);
/// Rarity adjustment of common types.
const COMMON_PENALTY: Decimal = Decimal::from_parts(10, 0, 0, true, 2);

/// Create the snapshot channel, starting from the neutral snapshot.
pub fn economy_channel(
    enabled: bool,
) -> (watch::Sender<EconomySnapshot>, watch::Receiver<EconomySnapshot>) {
    watch::channel(EconomySnapshot::neutral(enabled))
}

// ---------------------------------------------------------------------------
// Pure computation
// ---------------------------------------------------------------------------

/// Compute a snapshot from one cycle's metrics.
pub fn compute(config: &EconomyConfig, metrics: EconomyMetrics, now: DateTime<Utc>) -> EconomySnapshot {
    if !config.enabled {
        return EconomySnapshot {
            metrics,
            computed_at: Some(now),
            ..EconomySnapshot::neutral(false)
        };
    }

    let inflation = inflation_factor(config, &metrics);
    let activity = activity_factor(config, metrics.online_players);
    let saturation = saturation_factor(config, metrics.total_generators);
    let global = config
        .base_multiplier
        .saturating_mul(inflation)
        .saturating_mul(activity)
        .saturating_mul(saturation)
        .clamp(config.min_multiplier, config.max_multiplier);
    let rarity = rarity_adjustments(&metrics.type_counts, metrics.total_generators);

    EconomySnapshot {
        enabled: true,
        global_multiplier: global,
        rarity,
        inflation_factor: inflation,
        activity_factor: activity,
        saturation_factor: saturation,
        metrics,
        computed_at: Some(now),
    }
}

/// `numerator / denominator`, or `None` when the denominator is not positive.
fn ratio(numerator: Decimal, denominator: Decimal) -> Option<Decimal> {
    if denominator > Decimal::ZERO {
        numerator.checked_div(denominator)
    } else {
        None
    }
}

fn inflation_factor(config: &EconomyConfig, metrics: &EconomyMetrics) -> Decimal {
    let change = metrics.total_balance.saturating_sub(metrics.previous_balance);
    let Some(growth) = ratio(change, metrics.previous_balance) else {
        return Decimal::ONE;
    };
    if growth > config.inflation_threshold {
        let excess = growth.saturating_sub(config.inflation_threshold);
        Decimal::ONE
            .saturating_sub(excess.saturating_mul(config.inflation_sensitivity))
            .max(INFLATION_FLOOR)
    } else if growth < Decimal::ZERO {
        DEFLATION_BOOST
    } else {
        Decimal::ONE
    }
}

fn activity_factor(config: &EconomyConfig, online: u32) -> Decimal {
    if online <= config.expected_players {
        return Decimal::ONE;
    }
    let expected = Decimal::from(config.expected_players);
    let excess = Decimal::from(online.saturating_sub(config.expected_players));
    ratio(excess, expected).map_or(ACTIVITY_FLOOR, |relative| {
        Decimal::ONE
            .saturating_sub(relative.saturating_mul(config.activity_sensitivity))
            .max(ACTIVITY_FLOOR)
    })
}

fn saturation_factor(config: &EconomyConfig, total_generators: u64) -> Decimal {
    let expected = Decimal::from(config.expected_generators);
    let Some(load) = ratio(Decimal::from(total_generators), expected) else {
        return Decimal::ONE;
    };
    if load > Decimal::ONE {
        let excess = load.saturating_sub(Decimal::ONE);
        Decimal::ONE
            .saturating_sub(excess.saturating_mul(config.saturation_sensitivity))
            .max(SATURATION_FLOOR)
    } else {
        let deficit = Decimal::ONE.saturating_sub(load);
        Decimal::ONE
            .saturating_add(deficit.saturating_mul(config.saturation_sensitivity))
            .min(SATURATION_CAP)
    }
}

fn rarity_adjustments(type_counts: &BTreeMap<String, u64>, total: u64) -> BTreeMap<String, Decimal> {
    let total = Decimal::from(total);
    type_counts
        .iter()
        .filter_map(|(type_id, count)| {
            let share = ratio(Decimal::from(*count), total)?;
            let adjustment = RARITY_BANDS
                .iter()
                .find(|(below, _)| share < *below)
                .map(|(_, bonus)| *bonus)
                .or_else(|| (share > COMMON_SHARE).then_some(COMMON_PENALTY))?;
            Some((type_id.clone(), adjustment))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Runs economy cycles and publishes their snapshots.
pub struct EconomyController {
    config: EconomyConfig,
    gateway: Arc<Gateway>,
    registry: Arc<GeneratorRegistry>,
    wallet: Arc<dyn Wallet>,
    activity: Arc<dyn PlayerActivity>,
    publisher: watch::Sender<EconomySnapshot>,
}

impl EconomyController {
    /// Create a controller publishing on `publisher`.
    pub fn new(
        config: EconomyConfig,
        gateway: Arc<Gateway>,
        registry: Arc<GeneratorRegistry>,
        wallet: Arc<dyn Wallet>,
        activity: Arc<dyn PlayerActivity>,
        publisher: watch::Sender<EconomySnapshot>,
    ) -> Self {
        Self {
            config,
            gateway,
            registry,
            wallet,
            activity,
            publisher,
        }
    }

    /// The latest published snapshot.
    pub fn current(&self) -> EconomySnapshot {
        self.publisher.borrow().clone()
    }

    /// A new receiver of published snapshots.
    pub fn subscribe(&self) -> watch::Receiver<EconomySnapshot> {
        self.publisher.subscribe()
    }

    /// Run one cycle and publish its snapshot.
    ///
    /// If a metric query fails, the previous snapshot stays in place and is
    /// returned.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> EconomySnapshot {
        let previous = self.current();
        let metrics = match self.collect_metrics(&previous, now).await {
            Ok(metrics) => metrics,
            Err(e) => {
                warn!(error = %e, "Economy metrics unavailable, keeping previous multipliers");
                return previous;
            }
        };

        let snapshot = compute(&self.config, metrics, now);
        info!(
            enabled = snapshot.enabled,
            global_multiplier = %snapshot.global_multiplier,
            inflation_factor = %snapshot.inflation_factor,
            activity_factor = %snapshot.activity_factor,
            saturation_factor = %snapshot.saturation_factor,
            total_generators = snapshot.metrics.total_generators,
            online_players = snapshot.metrics.online_players,
            total_balance = %snapshot.metrics.total_balance,
            recent_earnings = %snapshot.metrics.recent_earnings,
            rare_types = snapshot.rarity.len(),
            "Economy cycle"
        );
        self.publisher.send_replace(snapshot.clone());
        snapshot
    }

    /// Run cycles every `update_interval` until `shutdown` turns `true` or
    /// its sender is dropped. The first cycle runs immediately.
    pub fn spawn(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        let period = self.config.update_interval().max(std::time::Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        controller.run_cycle(Utc::now()).await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Economy controller stopped");
        })
    }

    async fn collect_metrics(
        &self,
        previous: &EconomySnapshot,
        now: DateTime<Utc>,
    ) -> Result<EconomyMetrics, DbError> {
        let stats = StatsStore::new(&self.gateway);
        let window = i64::try_from(self.config.earnings_window_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX);
        let since = now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let total_earnings = stats.total_earnings().await?;
        let recent_earnings = stats.earnings_since(since).await?;

        let total_balance = self.wallet.total_balance();
        let previous_balance = if previous.computed_at.is_some() {
            previous.metrics.total_balance
        } else {
            total_balance
        };
        Ok(EconomyMetrics {
            total_generators: self.registry.count(),
            total_earnings,
            recent_earnings,
            total_balance,
            previous_balance,
            online_players: self.activity.online_players(),
            type_counts: self.registry.type_counts(),
        })
    }
}
