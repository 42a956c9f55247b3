//! Shared type definitions for the Genforge generator economy.
//!
//! Every crate in the workspace speaks these types. Snapshot types flow to
//! `TypeScript` via `ts-rs` for presentation collaborators.
//!
//! # Modules
//!
//! - [`ids`] -- Store-assigned row ids and player ids
//! - [`enums`] -- Permission levels, network tiers, transaction sources
//! - [`location`] -- World block coordinates
//! - [`money`] -- Cents conversion and compound growth
//! - [`structs`] -- Generators, networks, members, stats, snapshots

pub mod enums;
pub mod ids;
pub mod location;
pub mod money;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{NetworkTier, PermissionLevel, TransactionSource};
pub use ids::{GeneratorId, NetworkId, PlayerId};
pub use location::BlockLocation;
pub use structs::{
    EconomicTransaction, EconomyMetrics, EconomySnapshot, EvolutionSpec, Generator,
    GeneratorSnapshot, GeneratorType, Network, NetworkMember, NetworkSnapshot, PlayerStats,
    TierSpec,
};
