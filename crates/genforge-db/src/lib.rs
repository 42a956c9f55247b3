//! Persistence gateway for the Genforge generator economy (`SQLite`).
//!
//! One process-wide connection serves every durable read and write. The
//! foreground (interactive) path never blocks on writes it does not need
//! the result of: those are detached, batched, or delivered back through
//! the [`Foreground`] queue.
//!
//! # Architecture
//!
//! ```text
//! Registries / service
//!     |
//!     +-- awaited writes ------> Gateway::execute / insert / transaction
//!     |
//!     +-- fire-and-forget -----> Gateway::execute_detached
//!     |
//!     +-- per-player batches --> BatchQueue --> flusher task (one txn per group)
//!     |
//!     +-- callbacks <----------- Foreground queue <-- Gateway::execute_with_callback
//!
//!  Gateway
//!     |-- GeneratorStore   (generators)
//!     |-- NetworkStore     (networks, network_generators)
//!     |-- PermissionStore  (network_permissions, ownership transfer)
//!     +-- StatsStore       (player_stats, economic_transactions)
//! ```
//!
//! # Modules
//!
//! - [`gateway`] -- Connection lifecycle, sync/async execution, batching, shutdown
//! - [`foreground`] -- The serialized foreground execution context
//! - [`batch`] -- Per-actor batch queue and statement grouping
//! - [`config`] -- Gateway configuration
//! - [`schema`] -- Table definitions and additive migrations
//! - [`generator_store`] -- Generator rows
//! - [`network_store`] -- Network and membership rows
//! - [`permission_store`] -- Permission grants and ownership transfer
//! - [`stats_store`] -- Player statistics and the transaction log
//! - [`value`] -- Owned statement parameters and timestamp encoding
//! - [`error`] -- Shared error types

pub mod batch;
pub mod config;
pub mod error;
pub mod foreground;
pub mod gateway;
pub mod generator_store;
pub mod network_store;
pub mod permission_store;
pub mod schema;
pub mod stats_store;
pub mod value;

// Re-export primary types for convenience.
pub use batch::{BatchConfig, BatchOperation};
pub use config::DatabaseConfig;
pub use error::DbError;
pub use foreground::{Foreground, ForegroundClosed, ForegroundLoop};
pub use gateway::Gateway;
pub use generator_store::{GeneratorRow, GeneratorStore};
pub use network_store::{MembershipRow, NetworkRow, NetworkStore};
pub use permission_store::{OwnershipTransfer, PermissionRow, PermissionStore};
pub use schema::{MigrationReport, migrate};
pub use stats_store::{PlayerStatsRow, StatsStore};
pub use value::SqlValue;
