//! Integration tests for the Genforge gameplay service.
//!
//! Each test wires a full [`Genforge`] over a private `sqlite::memory:`
//! database with an in-memory wallet.

#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::too_many_lines,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    clippy::panic
)]

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use genforge_core::{
    Genforge, GenforgeConfig, InMemoryWallet, OnlineCounter, ServiceError, ValidationError,
};
use genforge_db::{DatabaseConfig, Foreground, ForegroundLoop, Gateway, StatsStore, migrate};
use genforge_types::{BlockLocation, NetworkTier, PermissionLevel, PlayerId};
use rust_decimal_macros::dec;

// =============================================================================
// Helpers
// =============================================================================

struct Harness {
    app: Genforge,
    wallet: Arc<InMemoryWallet>,
    activity: Arc<OnlineCounter>,
    gateway: Arc<Gateway>,
    _fg: ForegroundLoop,
}

async fn open() -> (Arc<Gateway>, ForegroundLoop) {
    let (foreground, fg_loop) = Foreground::channel();
    let gateway = Gateway::connect(DatabaseConfig::in_memory(), foreground)
        .await
        .expect("Failed to open in-memory database");
    migrate(&gateway).await.expect("Failed to run migrations");
    (gateway, fg_loop)
}

fn assemble(config: &GenforgeConfig, gateway: &Arc<Gateway>) -> (Genforge, Arc<InMemoryWallet>, Arc<OnlineCounter>) {
    let wallet = Arc::new(InMemoryWallet::new(config.wallet.starting_balance));
    let activity = Arc::new(OnlineCounter::new());
    let app = Genforge::assemble(
        config,
        Arc::clone(gateway),
        Arc::clone(&wallet) as Arc<dyn genforge_core::Wallet>,
        Arc::clone(&activity) as Arc<dyn genforge_core::PlayerActivity>,
    );
    (app, wallet, activity)
}

async fn harness() -> Harness {
    let config = GenforgeConfig::default();
    let (gateway, fg) = open().await;
    let (app, wallet, activity) = assemble(&config, &gateway);
    Harness {
        app,
        wallet,
        activity,
        gateway,
        _fg: fg,
    }
}

fn at(x: i32) -> BlockLocation {
    BlockLocation::new("world", x, 64, 0)
}

fn start() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

fn validation(err: ServiceError) -> ValidationError {
    match err {
        ServiceError::Validation(v) => v,
        other => panic!("expected validation error, got {other:?}"),
    }
}

// =============================================================================
// Generators
// =============================================================================

#[tokio::test]
async fn collect_pays_after_cooldown_and_records_earnings() {
    let h = harness().await;
    let alice = PlayerId::new();
    let t0 = start();
    let service = h.app.service();

    service
        .place_generator(alice, "alice", at(0), "stone", t0)
        .await
        .unwrap();

    let early = service.collect(alice, &at(0), t0 + Duration::seconds(30));
    assert_eq!(
        validation(early.unwrap_err()),
        ValidationError::NotReady { remaining_secs: 30 }
    );

    let paid = service
        .collect(alice, &at(0), t0 + Duration::seconds(60))
        .unwrap();
    assert_eq!(paid, dec!(10));
    assert_eq!(h.wallet.balance(alice), dec!(1010));

    // The timer restarts from the collection.
    assert!(service.collect(alice, &at(0), t0 + Duration::seconds(61)).is_err());

    h.gateway.flush_all().await;
    assert!(h.gateway.wait_idle().await);
    let stats = StatsStore::new(&h.gateway);
    let row = stats.get(alice).await.unwrap().expect("stats row");
    assert_eq!(row.total_earnings, dec!(10));
    assert_eq!(row.generators_owned, 1);
    assert_eq!(stats.transaction_count(alice).await.unwrap(), 1);
}

#[tokio::test]
async fn only_owner_or_network_user_collects() {
    let h = harness().await;
    let alice = PlayerId::new();
    let bob = PlayerId::new();
    let t0 = start();
    let service = h.app.service();

    service
        .place_generator(alice, "alice", at(0), "stone", t0)
        .await
        .unwrap();
    let ready = t0 + Duration::seconds(60);
    assert_eq!(
        validation(service.collect(bob, &at(0), ready).unwrap_err()),
        ValidationError::NotOwner
    );

    let network = service
        .create_network(alice, "Quarry", NetworkTier::Basic, t0)
        .await
        .unwrap();
    service
        .join_network(alice, network.id, &at(0), &at(0), t0)
        .await
        .unwrap();
    assert!(matches!(
        validation(service.collect(bob, &at(0), ready).unwrap_err()),
        ValidationError::PermissionDenied { .. }
    ));

    service
        .set_member_permission(alice, network.id, bob, "bob", PermissionLevel::Use, t0)
        .await
        .unwrap();
    // 10 × (1 + 0.05 + 0.01)
    assert_eq!(service.collect(bob, &at(0), ready).unwrap(), dec!(10.60));
    assert_eq!(h.wallet.balance(bob), dec!(1010.60));
}

#[tokio::test]
async fn collect_all_sums_ready_generators() {
    let h = harness().await;
    let alice = PlayerId::new();
    let t0 = start();
    let service = h.app.service();

    service.place_generator(alice, "alice", at(0), "stone", t0).await.unwrap();
    service.place_generator(alice, "alice", at(1), "stone", t0).await.unwrap();
    service
        .place_generator(alice, "alice", at(2), "iron", t0)
        .await
        .unwrap();

    let summary = service.collect_all(alice, t0 + Duration::seconds(90));
    assert_eq!(summary.collected, 2);
    assert_eq!(summary.amount, dec!(20));
}

#[tokio::test]
async fn upgrade_charges_and_rejects_unaffordable_levels() {
    let h = harness().await;
    let alice = PlayerId::new();
    let t0 = start();
    let service = h.app.service();

    service.place_generator(alice, "alice", at(0), "stone", t0).await.unwrap();
    let upgraded = service.upgrade_generator(alice, &at(0), t0).await.unwrap();
    assert_eq!(upgraded.level, 2);
    assert_eq!(upgraded.value, dec!(15.0));
    assert_eq!(h.wallet.balance(alice), dec!(900));

    // Level 2 -> 3 costs 200, level 3 -> 4 costs 400, then 800 is too much.
    service.upgrade_generator(alice, &at(0), t0).await.unwrap();
    service.upgrade_generator(alice, &at(0), t0).await.unwrap();
    assert_eq!(h.wallet.balance(alice), dec!(300));
    assert_eq!(
        validation(service.upgrade_generator(alice, &at(0), t0).await.unwrap_err()),
        ValidationError::InsufficientFunds {
            required: dec!(800)
        }
    );
    assert_eq!(h.wallet.balance(alice), dec!(300));
    assert_eq!(h.app.registry().get(&at(0)).unwrap().level, 4);
}

#[tokio::test]
async fn evolve_requires_max_level_and_resets_to_level_one() {
    let h = harness().await;
    let alice = PlayerId::new();
    let t0 = start();
    let service = h.app.service();
    h.wallet.set_balance(alice, dec!(1000000));

    service.place_generator(alice, "alice", at(0), "stone", t0).await.unwrap();
    assert_eq!(
        validation(service.evolve_generator(alice, &at(0), t0).await.unwrap_err()),
        ValidationError::NotMaxLevel
    );

    for _ in 1..10 {
        service.upgrade_generator(alice, &at(0), t0).await.unwrap();
    }
    assert_eq!(
        validation(service.upgrade_generator(alice, &at(0), t0).await.unwrap_err()),
        ValidationError::MaxLevel
    );

    let before = h.wallet.balance(alice);
    let evolved = service.evolve_generator(alice, &at(0), t0).await.unwrap();
    assert_eq!(evolved.type_id, "iron");
    assert_eq!(evolved.level, 1);
    assert_eq!(h.wallet.balance(alice), before - dec!(5000));
}

#[tokio::test]
async fn pickup_is_owner_only() {
    let h = harness().await;
    let alice = PlayerId::new();
    let bob = PlayerId::new();
    let t0 = start();
    let service = h.app.service();

    service.place_generator(alice, "alice", at(0), "stone", t0).await.unwrap();
    assert_eq!(
        validation(service.pickup_generator(bob, &at(0), t0).await.unwrap_err()),
        ValidationError::NotOwner
    );
    let picked = service.pickup_generator(alice, &at(0), t0).await.unwrap();
    assert_eq!(picked.type_id, "stone");
    assert!(h.app.registry().get(&at(0)).is_none());
    assert!(matches!(
        validation(service.pickup_generator(alice, &at(0), t0).await.unwrap_err()),
        ValidationError::GeneratorNotFound(_)
    ));
}

#[tokio::test]
async fn failed_pickup_keeps_generator_in_its_network() {
    let h = harness().await;
    let alice = PlayerId::new();
    let t0 = start();
    let service = h.app.service();
    let networks = h.app.networks();

    let network = service
        .create_network(alice, "Quarry", NetworkTier::Basic, t0)
        .await
        .unwrap();
    let generator = service
        .place_generator(alice, "alice", at(0), "stone", t0)
        .await
        .unwrap();
    service.join_network(alice, network.id, &at(0), &at(0), t0).await.unwrap();
    h.gateway
        .execute(
            "CREATE TRIGGER keep_members BEFORE DELETE ON network_generators \
             BEGIN SELECT RAISE(ABORT, 'membership locked'); END",
            &[],
        )
        .await
        .unwrap();

    let failed = service.pickup_generator(alice, &at(0), t0).await;
    assert!(matches!(failed, Err(ServiceError::Store(_))));
    assert!(h.app.registry().get(&at(0)).is_some());
    assert_eq!(networks.network_of(generator.id), Some(network.id));

    h.gateway.execute("DROP TRIGGER keep_members", &[]).await.unwrap();
    service.pickup_generator(alice, &at(0), t0).await.unwrap();
    assert_eq!(networks.network_of(generator.id), None);
    let live = networks.get(network.id).unwrap();
    assert_eq!(live.member_count(), 0);
    assert_eq!(live.efficiency_bonus, dec!(0.05));

    let (fresh, _wallet, _activity) = assemble(&GenforgeConfig::default(), &h.gateway);
    let report = fresh.hydrate().await.unwrap();
    assert_eq!(report.generators, 0);
    assert_eq!(fresh.networks().get(network.id).unwrap().member_count(), 0);
}

// =============================================================================
// Networks
// =============================================================================

#[tokio::test]
async fn join_checks_permission_and_range() {
    let h = harness().await;
    let alice = PlayerId::new();
    let bob = PlayerId::new();
    let t0 = start();
    let service = h.app.service();

    let network = service
        .create_network(alice, "Quarry", NetworkTier::Basic, t0)
        .await
        .unwrap();
    service.place_generator(bob, "bob", at(5), "stone", t0).await.unwrap();
    service.place_generator(bob, "bob", at(40), "stone", t0).await.unwrap();

    assert!(matches!(
        validation(
            service
                .join_network(bob, network.id, &at(0), &at(5), t0)
                .await
                .unwrap_err()
        ),
        ValidationError::PermissionDenied { .. }
    ));

    service
        .set_member_permission(alice, network.id, bob, "bob", PermissionLevel::Manage, t0)
        .await
        .unwrap();
    assert!(service.join_network(bob, network.id, &at(0), &at(5), t0).await.unwrap());
    assert!(!service.join_network(bob, network.id, &at(0), &at(5), t0).await.unwrap());
    assert_eq!(
        validation(
            service
                .join_network(bob, network.id, &at(0), &at(40), t0)
                .await
                .unwrap_err()
        ),
        ValidationError::OutOfRange { range: 16.0 }
    );

    assert!(service.leave_network(bob, &at(5), t0).await.unwrap());
    assert!(!service.leave_network(bob, &at(5), t0).await.unwrap());
}

#[tokio::test]
async fn joining_another_network_moves_the_generator() {
    let h = harness().await;
    let alice = PlayerId::new();
    let t0 = start();
    let service = h.app.service();
    let networks = h.app.networks();

    let first = service
        .create_network(alice, "North", NetworkTier::Basic, t0)
        .await
        .unwrap();
    let second = service
        .create_network(alice, "South", NetworkTier::Basic, t0)
        .await
        .unwrap();
    let generator = service
        .place_generator(alice, "alice", at(0), "stone", t0)
        .await
        .unwrap();

    service.join_network(alice, first.id, &at(0), &at(0), t0).await.unwrap();
    service.join_network(alice, second.id, &at(0), &at(0), t0).await.unwrap();

    assert_eq!(networks.network_of(generator.id), Some(second.id));
    assert_eq!(networks.get(first.id).unwrap().member_count(), 0);
    assert_eq!(networks.get(second.id).unwrap().member_count(), 1);
}

#[tokio::test]
async fn full_network_rejects_joins() {
    let mut config = GenforgeConfig::default();
    config.networks.base_capacity = 2;
    let (gateway, _fg) = open().await;
    let (app, _wallet, _activity) = assemble(&config, &gateway);
    let alice = PlayerId::new();
    let t0 = start();
    let service = app.service();

    let network = service
        .create_network(alice, "Quarry", NetworkTier::Basic, t0)
        .await
        .unwrap();
    for x in 0..3 {
        service.place_generator(alice, "alice", at(x), "stone", t0).await.unwrap();
    }
    service.join_network(alice, network.id, &at(0), &at(0), t0).await.unwrap();
    service.join_network(alice, network.id, &at(0), &at(1), t0).await.unwrap();
    assert_eq!(
        validation(
            service
                .join_network(alice, network.id, &at(0), &at(2), t0)
                .await
                .unwrap_err()
        ),
        ValidationError::NetworkFull { capacity: 2 }
    );
}

#[tokio::test]
async fn network_upgrades_step_through_every_tier() {
    let h = harness().await;
    let alice = PlayerId::new();
    let t0 = start();
    let service = h.app.service();
    h.wallet.set_balance(alice, dec!(310000));

    let network = service
        .create_network(alice, "Quarry", NetworkTier::Basic, t0)
        .await
        .unwrap();
    assert_eq!(
        service.upgrade_network(alice, network.id, t0).await.unwrap(),
        NetworkTier::Advanced
    );
    assert_eq!(
        service.upgrade_network(alice, network.id, t0).await.unwrap(),
        NetworkTier::Elite
    );
    assert_eq!(
        service.upgrade_network(alice, network.id, t0).await.unwrap(),
        NetworkTier::Ultimate
    );
    assert_eq!(h.wallet.balance(alice), dec!(0));
    assert_eq!(
        validation(service.upgrade_network(alice, network.id, t0).await.unwrap_err()),
        ValidationError::MaxTier
    );

    let snapshot = h.app.networks().snapshot(network.id).unwrap();
    assert_eq!(snapshot.capacity, 40);
    assert!((snapshot.range - 40.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn unaffordable_network_upgrade_changes_nothing() {
    let h = harness().await;
    let alice = PlayerId::new();
    let t0 = start();
    let service = h.app.service();

    let network = service
        .create_network(alice, "Quarry", NetworkTier::Basic, t0)
        .await
        .unwrap();
    assert_eq!(
        validation(service.upgrade_network(alice, network.id, t0).await.unwrap_err()),
        ValidationError::InsufficientFunds {
            required: dec!(10000)
        }
    );
    assert_eq!(h.wallet.balance(alice), dec!(1000));
    assert_eq!(h.app.networks().get(network.id).unwrap().tier, NetworkTier::Basic);
}

#[tokio::test]
async fn admin_manages_members_but_not_ownership() {
    let h = harness().await;
    let alice = PlayerId::new();
    let bob = PlayerId::new();
    let carol = PlayerId::new();
    let t0 = start();
    let service = h.app.service();

    let network = service
        .create_network(alice, "Quarry", NetworkTier::Basic, t0)
        .await
        .unwrap();
    service
        .set_member_permission(alice, network.id, bob, "bob", PermissionLevel::Admin, t0)
        .await
        .unwrap();
    service
        .set_member_permission(bob, network.id, carol, "carol", PermissionLevel::View, t0)
        .await
        .unwrap();
    assert!(service.remove_member(bob, network.id, carol, t0).await.unwrap());

    assert!(matches!(
        service
            .set_member_permission(bob, network.id, carol, "carol", PermissionLevel::Owner, t0)
            .await
            .unwrap_err(),
        ServiceError::Invariant(_)
    ));
    assert!(matches!(
        service.remove_member(bob, network.id, alice, t0).await.unwrap_err(),
        ServiceError::Invariant(_)
    ));
    assert!(matches!(
        validation(
            service
                .transfer_network(bob, network.id, bob, t0)
                .await
                .unwrap_err()
        ),
        ValidationError::PermissionDenied { .. }
    ));
}

#[tokio::test]
async fn transfer_hands_over_and_demotes_previous_owner() {
    let h = harness().await;
    let alice = PlayerId::new();
    let bob = PlayerId::new();
    let t0 = start();
    let service = h.app.service();
    let permissions = h.app.permissions();

    let network = service
        .create_network(alice, "Quarry", NetworkTier::Basic, t0)
        .await
        .unwrap();
    service
        .set_member_permission(alice, network.id, bob, "bob", PermissionLevel::Use, t0)
        .await
        .unwrap();

    assert!(service.transfer_network(alice, network.id, bob, t0).await.unwrap());
    assert_eq!(h.app.networks().owner_of(network.id), Some(bob));
    assert_eq!(
        permissions.permission_of(network.id, bob).unwrap(),
        PermissionLevel::Owner
    );
    assert_eq!(
        permissions.permission_of(network.id, alice).unwrap(),
        PermissionLevel::Admin
    );
    assert_eq!(
        validation(
            service
                .transfer_network(bob, network.id, bob, t0)
                .await
                .unwrap_err()
        ),
        ValidationError::SameOwner
    );
}

#[tokio::test]
async fn dismantle_releases_generators() {
    let h = harness().await;
    let alice = PlayerId::new();
    let bob = PlayerId::new();
    let t0 = start();
    let service = h.app.service();

    let network = service
        .create_network(alice, "Quarry", NetworkTier::Basic, t0)
        .await
        .unwrap();
    let generator = service
        .place_generator(alice, "alice", at(0), "stone", t0)
        .await
        .unwrap();
    service.join_network(alice, network.id, &at(0), &at(0), t0).await.unwrap();
    service
        .set_member_permission(alice, network.id, bob, "bob", PermissionLevel::Use, t0)
        .await
        .unwrap();

    assert!(service.dismantle_network(alice, network.id, t0).await.unwrap());
    assert!(h.app.networks().get(network.id).is_none());
    assert!(h.app.networks().network_of(generator.id).is_none());
    assert!(h.app.permissions().members(network.id).is_empty());
    assert_eq!(h.app.registry().get(&at(0)).unwrap().base_value(), dec!(10));

    let grants: i64 = h
        .gateway
        .fetch_scalar("SELECT COUNT(*) FROM network_permissions", &[])
        .await
        .unwrap();
    assert_eq!(grants, 0);
    let (fresh, _wallet, _activity) = assemble(&GenforgeConfig::default(), &h.gateway);
    assert_eq!(fresh.hydrate().await.unwrap().permissions, 0);
}

#[tokio::test]
async fn notifications_toggle() {
    let h = harness().await;
    let alice = PlayerId::new();
    let service = h.app.service();
    let first = service.toggle_notifications(alice).await.unwrap();
    let second = service.toggle_notifications(alice).await.unwrap();
    assert_ne!(first, second);
}

// =============================================================================
// Startup and economy
// =============================================================================

#[tokio::test]
async fn hydrate_restores_state_in_a_fresh_instance() {
    let config = GenforgeConfig::default();
    let (gateway, _fg) = open().await;
    let alice = PlayerId::new();
    let bob = PlayerId::new();
    let t0 = start();

    let network_id = {
        let (app, _wallet, _activity) = assemble(&config, &gateway);
        let service = app.service();
        let network = service
            .create_network(alice, "Quarry", NetworkTier::Basic, t0)
            .await
            .unwrap();
        service.place_generator(alice, "alice", at(0), "stone", t0).await.unwrap();
        service.place_generator(alice, "alice", at(1), "iron", t0).await.unwrap();
        service.join_network(alice, network.id, &at(0), &at(0), t0).await.unwrap();
        service
            .set_member_permission(alice, network.id, bob, "bob", PermissionLevel::Manage, t0)
            .await
            .unwrap();
        network.id
    };

    let (app, _wallet, _activity) = assemble(&config, &gateway);
    let report = app.hydrate().await.unwrap();
    assert_eq!(report.networks, 1);
    assert_eq!(report.permissions, 1);
    assert_eq!(report.generators, 2);

    assert_eq!(
        app.permissions().permission_of(network_id, bob).unwrap(),
        PermissionLevel::Manage
    );
    let stone = app.registry().get(&at(0)).unwrap();
    assert_eq!(app.networks().network_of(stone.id), Some(network_id));
    assert_eq!(app.registry().value(&stone), dec!(10.60));
}

#[tokio::test]
async fn economy_cycle_feeds_generator_values() {
    let h = harness().await;
    let alice = PlayerId::new();
    let t0 = start();
    let service = h.app.service();

    service.place_generator(alice, "alice", at(0), "stone", t0).await.unwrap();
    h.activity.set(20);

    let snapshot = h.app.economy().run_cycle(t0).await;
    assert!(snapshot.enabled);
    assert_eq!(snapshot.metrics.total_generators, 1);
    assert_eq!(snapshot.metrics.online_players, 20);

    let generator = h.app.registry().get(&at(0)).unwrap();
    let expected = (dec!(10) * snapshot.multiplier_for("stone")).max(dec!(0));
    assert_eq!(h.app.registry().value(&generator), expected);
}

#[tokio::test]
async fn failed_economy_cycle_keeps_previous_snapshot() {
    let h = harness().await;
    let alice = PlayerId::new();
    let t0 = start();
    let economy = h.app.economy();
    let mut published = economy.subscribe();

    h.app
        .service()
        .place_generator(alice, "alice", at(0), "stone", t0)
        .await
        .unwrap();
    h.activity.set(5);
    let first = economy.run_cycle(t0).await;
    assert_eq!(first.computed_at, Some(t0));
    assert_eq!(*published.borrow_and_update(), first);

    h.gateway.shutdown().await.unwrap();
    h.activity.set(40);
    let second = economy.run_cycle(t0 + Duration::seconds(300)).await;

    assert_eq!(second, first);
    assert_eq!(economy.current(), first);
    assert!(!published.has_changed().unwrap());
}
