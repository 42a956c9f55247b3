//! Generator registry, networks, permissions, and economy balancing for
//! Genforge.
//!
//! # Modules
//!
//! - [`config`] -- Configuration loading from `genforge-config.yaml` into
//!   strongly-typed structs.
//! - [`registry`] -- [`GeneratorRegistry`]: placed generators by location,
//!   production cooldowns, and value lookup.
//! - [`network`] -- [`NetworkEngine`]: tiered networks, membership, range,
//!   and efficiency bonuses.
//! - [`permission`] -- [`PermissionEngine`]: per-network grants and
//!   ownership transfer.
//! - [`economy`] -- [`EconomyController`]: periodic market factors published
//!   as an [`EconomySnapshot`](genforge_types::EconomySnapshot).
//! - [`service`] -- [`GeneratorService`]: player-facing operations.
//! - [`wallet`] -- [`Wallet`] and [`PlayerActivity`] collaborator traits.
//! - [`runtime`] -- [`Genforge`]: engine wiring and startup hydration.
//! - [`error`] -- Error types for each engine and the service.
//!
//! [`GeneratorRegistry`]: registry::GeneratorRegistry
//! [`NetworkEngine`]: network::NetworkEngine
//! [`PermissionEngine`]: permission::PermissionEngine
//! [`EconomyController`]: economy::EconomyController
//! [`GeneratorService`]: service::GeneratorService
//! [`Wallet`]: wallet::Wallet
//! [`PlayerActivity`]: wallet::PlayerActivity
//! [`Genforge`]: runtime::Genforge

pub mod config;
pub mod economy;
pub mod error;
pub mod network;
pub mod permission;
pub mod registry;
pub mod runtime;
pub mod service;
pub mod wallet;

pub use config::GenforgeConfig;
pub use error::{ServiceError, ValidationError};
pub use runtime::{Genforge, HydrationReport};
pub use service::{CollectSummary, GeneratorService};
pub use wallet::{InMemoryWallet, OnlineCounter, PlayerActivity, Wallet};
