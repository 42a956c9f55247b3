//! Integration tests for the `genforge-db` persistence gateway.
//!
//! Every test runs against a private `sqlite::memory:` database, so no
//! external services are needed.

// Integration tests use expect/unwrap extensively for clarity -- panicking
// on failure is the correct behavior in test code.
#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::too_many_lines,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]

use std::sync::Arc;

use chrono::Utc;
use genforge_db::{
    DatabaseConfig, DbError, Foreground, ForegroundLoop, Gateway, GeneratorStore, NetworkStore,
    OwnershipTransfer, PermissionStore, StatsStore, migrate,
};
use genforge_types::{
    BlockLocation, EconomicTransaction, NetworkId, NetworkMember, NetworkTier, PermissionLevel,
    PlayerId, TransactionSource,
};
use rust_decimal_macros::dec;

// =============================================================================
// Helpers
// =============================================================================

async fn setup() -> (Arc<Gateway>, ForegroundLoop) {
    let (foreground, fg_loop) = Foreground::channel();
    let gateway = Gateway::connect(DatabaseConfig::in_memory(), foreground)
        .await
        .expect("Failed to open in-memory database");
    migrate(&gateway).await.expect("Failed to run migrations");
    (gateway, fg_loop)
}

async fn network_with_member(
    gateway: &Arc<Gateway>,
    owner: PlayerId,
    member: PlayerId,
    level: PermissionLevel,
) -> NetworkId {
    let networks = NetworkStore::new(gateway);
    let id = networks
        .insert(owner, "Quarry", NetworkTier::Basic, Utc::now())
        .await
        .unwrap();
    let now = Utc::now();
    PermissionStore::new(gateway)
        .upsert(&NetworkMember {
            network_id: id,
            player_id: member,
            player_name: String::from("bob"),
            level,
            joined_at: now,
            last_access: now,
        })
        .await
        .unwrap();
    id
}

// =============================================================================
// Generators
// =============================================================================

#[tokio::test]
async fn generator_rows_roundtrip() {
    let (gateway, _fg) = setup().await;
    let store = GeneratorStore::new(&gateway);
    let owner = PlayerId::new();
    let location = BlockLocation::new("world", 10, 64, -3);

    let id = store
        .insert(owner, &location, "stone", 1, Utc::now())
        .await
        .unwrap();
    assert_eq!(store.update_level(id, 3).await.unwrap(), 1);

    let rows = store.load_all().await.unwrap();
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.generator_id(), id);
    assert_eq!(row.owner_id().unwrap(), owner);
    assert_eq!(row.location(), location);
    assert_eq!(row.type_id, "stone");
    assert_eq!(row.level(), 3);
}

#[tokio::test]
async fn duplicate_location_is_rejected_by_store() {
    let (gateway, _fg) = setup().await;
    let store = GeneratorStore::new(&gateway);
    let location = BlockLocation::new("world", 0, 0, 0);
    store
        .insert(PlayerId::new(), &location, "stone", 1, Utc::now())
        .await
        .unwrap();
    let second = store
        .insert(PlayerId::new(), &location, "stone", 1, Utc::now())
        .await;
    assert!(matches!(second, Err(DbError::Sqlite(_))));
}

#[tokio::test]
async fn delete_reports_affected_rows() {
    let (gateway, _fg) = setup().await;
    let store = GeneratorStore::new(&gateway);
    let location = BlockLocation::new("world", 1, 2, 3);
    store
        .insert(PlayerId::new(), &location, "stone", 1, Utc::now())
        .await
        .unwrap();
    assert_eq!(store.delete_at(&location).await.unwrap(), 1);
    assert_eq!(store.delete_at(&location).await.unwrap(), 0);
}

#[tokio::test]
async fn delete_takes_membership_with_it() {
    let (gateway, _fg) = setup().await;
    let generators = GeneratorStore::new(&gateway);
    let networks = NetworkStore::new(&gateway);
    let location = BlockLocation::new("world", 4, 64, 4);
    let id = generators
        .insert(PlayerId::new(), &location, "stone", 1, Utc::now())
        .await
        .unwrap();
    let network = networks
        .insert(PlayerId::new(), "Quarry", NetworkTier::Basic, Utc::now())
        .await
        .unwrap();
    networks.move_generator(id, network).await.unwrap();

    assert_eq!(generators.delete_at(&location).await.unwrap(), 1);
    assert!(networks.load_memberships().await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_membership_delete_keeps_generator_row() {
    let (gateway, _fg) = setup().await;
    let generators = GeneratorStore::new(&gateway);
    let networks = NetworkStore::new(&gateway);
    let location = BlockLocation::new("world", 4, 64, 4);
    let id = generators
        .insert(PlayerId::new(), &location, "stone", 1, Utc::now())
        .await
        .unwrap();
    let network = networks
        .insert(PlayerId::new(), "Quarry", NetworkTier::Basic, Utc::now())
        .await
        .unwrap();
    networks.move_generator(id, network).await.unwrap();
    gateway
        .execute(
            "CREATE TRIGGER keep_members BEFORE DELETE ON network_generators \
             BEGIN SELECT RAISE(ABORT, 'membership locked'); END",
            &[],
        )
        .await
        .unwrap();

    assert!(matches!(generators.delete_at(&location).await, Err(DbError::Sqlite(_))));
    assert_eq!(generators.load_all().await.unwrap().len(), 1);
    assert_eq!(networks.load_memberships().await.unwrap().len(), 1);
}

#[tokio::test]
async fn production_timestamp_reports_on_foreground() {
    let (gateway, mut fg) = setup().await;
    let store = GeneratorStore::new(&gateway);
    let location = BlockLocation::new("world", 0, 64, 0);
    let placed = chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap();
    let id = store
        .insert(PlayerId::new(), &location, "stone", 1, placed)
        .await
        .unwrap();

    let produced = placed + chrono::Duration::seconds(60);
    store.touch_last_generation(id, produced);
    assert!(gateway.wait_idle().await);
    assert_eq!(fg.run_pending().await, 1);

    let row = store.get(id).await.unwrap().unwrap();
    assert_eq!(row.last_production(), produced);
}

#[tokio::test]
async fn orphan_memberships_are_pruned() {
    let (gateway, _fg) = setup().await;
    let generators = GeneratorStore::new(&gateway);
    let networks = NetworkStore::new(&gateway);
    let id = generators
        .insert(PlayerId::new(), &BlockLocation::new("world", 0, 0, 0), "stone", 1, Utc::now())
        .await
        .unwrap();
    let network = networks
        .insert(PlayerId::new(), "Quarry", NetworkTier::Basic, Utc::now())
        .await
        .unwrap();
    networks.move_generator(id, network).await.unwrap();
    networks
        .move_generator(genforge_types::GeneratorId::new(999), network)
        .await
        .unwrap();

    assert_eq!(networks.prune_orphan_memberships().await.unwrap(), 1);
    let memberships = networks.load_memberships().await.unwrap();
    assert_eq!(memberships.len(), 1);
    assert_eq!(memberships[0].generator_id, id.into_inner());
}

// =============================================================================
// Networks
// =============================================================================

#[tokio::test]
async fn moving_generator_releases_old_membership() {
    let (gateway, _fg) = setup().await;
    let store = NetworkStore::new(&gateway);
    let owner = PlayerId::new();
    let first = store.insert(owner, "A", NetworkTier::Basic, Utc::now()).await.unwrap();
    let second = store.insert(owner, "B", NetworkTier::Basic, Utc::now()).await.unwrap();
    let generator = genforge_types::GeneratorId::new(42);

    store.move_generator(generator, first).await.unwrap();
    store.move_generator(generator, second).await.unwrap();

    let memberships = store.load_memberships().await.unwrap();
    assert_eq!(memberships.len(), 1);
    assert_eq!(memberships[0].network_id, second.into_inner());
}

#[tokio::test]
async fn deleting_network_cascades() {
    let (gateway, _fg) = setup().await;
    let owner = PlayerId::new();
    let id = network_with_member(&gateway, owner, PlayerId::new(), PermissionLevel::Use).await;
    let networks = NetworkStore::new(&gateway);
    networks
        .move_generator(genforge_types::GeneratorId::new(1), id)
        .await
        .unwrap();

    assert_eq!(networks.delete(id).await.unwrap(), 1);
    assert!(networks.load_all().await.unwrap().is_empty());
    assert!(networks.load_memberships().await.unwrap().is_empty());
    assert!(PermissionStore::new(&gateway).load_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn tier_is_persisted() {
    let (gateway, _fg) = setup().await;
    let store = NetworkStore::new(&gateway);
    let id = store
        .insert(PlayerId::new(), "Mine", NetworkTier::Basic, Utc::now())
        .await
        .unwrap();
    store.update_tier(id, NetworkTier::Elite).await.unwrap();
    let rows = store.load_all().await.unwrap();
    assert_eq!(rows[0].tier().unwrap(), NetworkTier::Elite);
}

// =============================================================================
// Ownership transfer
// =============================================================================

#[tokio::test]
async fn transfer_swaps_owner_and_demotes_previous() {
    let (gateway, _fg) = setup().await;
    let alice = PlayerId::new();
    let bob = PlayerId::new();
    let id = network_with_member(&gateway, alice, bob, PermissionLevel::Manage).await;

    PermissionStore::new(&gateway)
        .transfer_ownership(OwnershipTransfer {
            network_id: id,
            previous_owner: alice,
            previous_owner_name: String::from("alice"),
            new_owner: bob,
            at: Utc::now(),
        })
        .await
        .unwrap();

    let owner = NetworkStore::new(&gateway).owner_of(id).await.unwrap();
    assert_eq!(owner, Some(bob.to_string()));

    let grants: Vec<NetworkMember> = PermissionStore::new(&gateway)
        .load_all()
        .await
        .unwrap()
        .into_iter()
        .map(|row| row.into_member().unwrap())
        .collect();
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0].player_id, alice);
    assert_eq!(grants[0].level, PermissionLevel::Admin);
}

#[tokio::test]
async fn failed_transfer_leaves_everything_untouched() {
    let (gateway, _fg) = setup().await;
    let alice = PlayerId::new();
    let bob = PlayerId::new();
    let id = network_with_member(&gateway, alice, bob, PermissionLevel::Manage).await;

    // Abort the final step of the transfer.
    gateway
        .execute(
            "CREATE TRIGGER fail_owner_update BEFORE UPDATE OF owner ON networks \
             BEGIN SELECT RAISE(ABORT, 'simulated failure'); END",
            &[],
        )
        .await
        .unwrap();

    let result = PermissionStore::new(&gateway)
        .transfer_ownership(OwnershipTransfer {
            network_id: id,
            previous_owner: alice,
            previous_owner_name: String::from("alice"),
            new_owner: bob,
            at: Utc::now(),
        })
        .await;
    assert!(result.is_err());

    let owner = NetworkStore::new(&gateway).owner_of(id).await.unwrap();
    assert_eq!(owner, Some(alice.to_string()));
    let grants = PermissionStore::new(&gateway).load_all().await.unwrap();
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0].player_uuid, bob.to_string());
    assert_eq!(grants[0].permission_level, "MANAGE");
}

#[tokio::test]
async fn transfer_of_missing_network_rolls_back() {
    let (gateway, _fg) = setup().await;
    let result = PermissionStore::new(&gateway)
        .transfer_ownership(OwnershipTransfer {
            network_id: NetworkId::new(999),
            previous_owner: PlayerId::new(),
            previous_owner_name: String::new(),
            new_owner: PlayerId::new(),
            at: Utc::now(),
        })
        .await;
    assert!(matches!(
        result,
        Err(DbError::UnexpectedRowCount { actual: 0, .. })
    ));
    assert!(PermissionStore::new(&gateway).load_all().await.unwrap().is_empty());
}

// =============================================================================
// Statistics
// =============================================================================

#[tokio::test]
async fn batched_earnings_land_after_flush() {
    let (gateway, _fg) = setup().await;
    let stats = StatsStore::new(&gateway);
    let player = PlayerId::new();

    for _ in 0..3 {
        stats.queue_earnings(player, dec!(12.50)).unwrap();
        stats
            .queue_transaction(&EconomicTransaction {
                player_id: player,
                amount: dec!(12.50),
                source: TransactionSource::Collection,
                timestamp: Utc::now(),
            })
            .unwrap();
    }
    assert_eq!(gateway.queued_batch_operations(), 6);
    assert_eq!(gateway.flush_all().await, 6);

    let row = stats.get(player).await.unwrap().unwrap();
    assert_eq!(row.total_earnings, dec!(37.50));
    assert_eq!(stats.total_earnings().await.unwrap(), dec!(37.50));
    assert_eq!(stats.transaction_count(player).await.unwrap(), 3);
    let recent = stats
        .earnings_since(Utc::now() - chrono::Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(recent, dec!(37.50));
}

#[tokio::test]
async fn owned_count_follows_generators() {
    let (gateway, _fg) = setup().await;
    let player = PlayerId::new();
    let generators = GeneratorStore::new(&gateway);
    for x in 0..2 {
        generators
            .insert(player, &BlockLocation::new("world", x, 0, 0), "stone", 1, Utc::now())
            .await
            .unwrap();
    }
    let stats = StatsStore::new(&gateway);
    stats.refresh_generators_owned_now(player, "alice").await.unwrap();
    let row = stats.get(player).await.unwrap().unwrap();
    assert_eq!(row.generators_owned, 2);
    assert_eq!(row.player_name, "alice");

    // A blank name keeps the stored one.
    stats.refresh_generators_owned_now(player, "").await.unwrap();
    let row = stats.get(player).await.unwrap().unwrap();
    assert_eq!(row.player_name, "alice");
}

#[tokio::test]
async fn notifications_toggle() {
    let (gateway, _fg) = setup().await;
    let stats = StatsStore::new(&gateway);
    let player = PlayerId::new();
    assert!(!stats.toggle_notifications(player).await.unwrap());
    assert!(stats.toggle_notifications(player).await.unwrap());
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn shutdown_flushes_pending_batches() {
    let (gateway, _fg) = setup().await;
    let stats = StatsStore::new(&gateway);
    let player = PlayerId::new();
    stats.queue_earnings(player, dec!(5)).unwrap();
    gateway.shutdown().await.unwrap();
    assert_eq!(gateway.pending_operations(), 0);
    assert_eq!(gateway.queued_batch_operations(), 0);
    assert!(gateway.is_closed());
}
