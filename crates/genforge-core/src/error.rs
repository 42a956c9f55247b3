//! Error types for the genforge-core crate.
//!
//! Each engine has its own error enum. The gameplay service folds them into
//! [`ServiceError`], which separates what the player did wrong
//! ([`ServiceError::Validation`]) from what the server failed to do
//! ([`ServiceError::Store`]) and from attempts to break an invariant
//! ([`ServiceError::Invariant`]).

use genforge_db::DbError;
use genforge_types::{BlockLocation, GeneratorId, NetworkId, NetworkTier, PermissionLevel};
use rust_decimal::Decimal;

/// Errors from the generator registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The generator type is not configured.
    #[error("unknown generator type: {0}")]
    UnknownType(String),

    /// Another generator already sits at the location.
    #[error("a generator already exists at {0}")]
    LocationOccupied(BlockLocation),

    /// The owner is at the per-player generator cap.
    #[error("generator limit reached ({cap})")]
    CapExceeded {
        /// The configured cap.
        cap: u32,
    },

    /// No generator sits at the location.
    #[error("no generator at {0}")]
    NotFound(BlockLocation),

    /// The store rejected or failed the operation.
    #[error(transparent)]
    Store(#[from] DbError),
}

/// Errors from the network engine.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// No such network.
    #[error("network not found: {0}")]
    NotFound(NetworkId),

    /// The network has no room for another generator.
    #[error("network {network} is full (capacity {capacity})")]
    CapacityExceeded {
        /// Target network.
        network: NetworkId,
        /// Its capacity.
        capacity: u32,
    },

    /// Tiers only move to a strictly higher rank.
    #[error("cannot change tier from {from} to {to}")]
    InvalidTierTransition {
        /// Current tier.
        from: NetworkTier,
        /// Requested tier.
        to: NetworkTier,
    },

    /// Network names must be non-blank and short.
    #[error("invalid network name: {0:?}")]
    InvalidName(String),

    /// The store rejected or failed the operation.
    #[error(transparent)]
    Store(#[from] DbError),
}

/// Errors from the permission engine.
#[derive(Debug, thiserror::Error)]
pub enum PermissionError {
    /// No such network.
    #[error("network not found: {0}")]
    NetworkNotFound(NetworkId),

    /// The player's level is below what the action needs.
    #[error("requires {required} permission (you have {held})")]
    Denied {
        /// Level the action needs.
        required: PermissionLevel,
        /// Level the player holds.
        held: PermissionLevel,
    },

    /// `OWNER` was passed to a grant operation.
    #[error("OWNER cannot be granted; transfer ownership instead")]
    OwnerGrant,

    /// The owner was passed to a member removal or level change.
    #[error("the network owner cannot be removed or re-graded")]
    OwnerRemoval,

    /// The new owner already owns the network.
    #[error("player already owns network {0}")]
    SameOwner(NetworkId),

    /// The store rejected or failed the operation.
    #[error(transparent)]
    Store(#[from] DbError),
}

/// A rejected player action, with the message the player sees.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    /// The generator type is not configured.
    #[error("Unknown generator type: {0}")]
    UnknownType(String),

    /// Another generator already sits at the location.
    #[error("A generator already exists at {0}")]
    LocationOccupied(BlockLocation),

    /// The owner is at the per-player generator cap.
    #[error("You have reached the generator limit ({cap})")]
    CapExceeded {
        /// The configured cap.
        cap: u32,
    },

    /// No generator sits at the location.
    #[error("There is no generator at {0}")]
    GeneratorNotFound(BlockLocation),

    /// No generator has the id.
    #[error("Generator {0} does not exist")]
    UnknownGenerator(GeneratorId),

    /// The action is reserved to the generator's owner.
    #[error("You do not own this generator")]
    NotOwner,

    /// The generator's cooldown has not elapsed.
    #[error("This generator is not ready yet ({remaining_secs}s left)")]
    NotReady {
        /// Whole seconds left, rounded up.
        remaining_secs: i64,
    },

    /// The wallet cannot cover the price.
    #[error("You need {required} to do that")]
    InsufficientFunds {
        /// The price.
        required: Decimal,
    },

    /// The generator is already at its max level.
    #[error("This generator is already at max level")]
    MaxLevel,

    /// Evolution needs the generator to be at its max level.
    #[error("The generator must be at max level to evolve")]
    NotMaxLevel,

    /// The generator type has no evolution.
    #[error("This generator cannot evolve")]
    NoEvolution,

    /// No such network.
    #[error("Network {0} does not exist")]
    NetworkNotFound(NetworkId),

    /// The player's level is below what the action needs.
    #[error("This requires {required} permission (you have {held})")]
    PermissionDenied {
        /// Level the action needs.
        required: PermissionLevel,
        /// Level the player holds.
        held: PermissionLevel,
    },

    /// The network has no room for another generator.
    #[error("The network is full (capacity {capacity})")]
    NetworkFull {
        /// Its capacity.
        capacity: u32,
    },

    /// Tiers only move up.
    #[error("Cannot change tier from {from} to {to}")]
    InvalidTierTransition {
        /// Current tier.
        from: NetworkTier,
        /// Requested tier.
        to: NetworkTier,
    },

    /// The network is already at the highest tier.
    #[error("The network is already at the highest tier")]
    MaxTier,

    /// The generator is too far from the network controller.
    #[error("The generator is out of the network's range ({range} blocks)")]
    OutOfRange {
        /// The network's range.
        range: f64,
    },

    /// The recipient already owns the network.
    #[error("That player already owns the network")]
    SameOwner,

    /// Network names must be non-blank and short.
    #[error("Invalid network name: {0:?}")]
    InvalidName(String),
}

/// Errors surfaced by gameplay operations.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The player's action was rejected.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The store failed; the action had no effect.
    #[error("store error: {0}")]
    Store(#[from] DbError),

    /// The action would break an invariant.
    #[error("invariant violation: {0}")]
    Invariant(String),
}

/// Generic message returned when the store fails.
const STORE_FAILURE_MESSAGE: &str = "Something went wrong saving your change. Please try again.";

impl ServiceError {
    /// The message shown to the player.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(error) => error.to_string(),
            Self::Store(_) => STORE_FAILURE_MESSAGE.to_owned(),
            Self::Invariant(_) => "That action is not allowed.".to_owned(),
        }
    }
}

impl From<RegistryError> for ServiceError {
    fn from(error: RegistryError) -> Self {
        match error {
            RegistryError::UnknownType(id) => ValidationError::UnknownType(id).into(),
            RegistryError::LocationOccupied(at) => ValidationError::LocationOccupied(at).into(),
            RegistryError::CapExceeded { cap } => ValidationError::CapExceeded { cap }.into(),
            RegistryError::NotFound(at) => ValidationError::GeneratorNotFound(at).into(),
            RegistryError::Store(error) => Self::Store(error),
        }
    }
}

impl From<NetworkError> for ServiceError {
    fn from(error: NetworkError) -> Self {
        match error {
            NetworkError::NotFound(id) => ValidationError::NetworkNotFound(id).into(),
            NetworkError::CapacityExceeded { capacity, .. } => {
                ValidationError::NetworkFull { capacity }.into()
            }
            NetworkError::InvalidTierTransition { from, to } => {
                ValidationError::InvalidTierTransition { from, to }.into()
            }
            NetworkError::InvalidName(name) => ValidationError::InvalidName(name).into(),
            NetworkError::Store(error) => Self::Store(error),
        }
    }
}

impl From<PermissionError> for ServiceError {
    fn from(error: PermissionError) -> Self {
        match error {
            PermissionError::NetworkNotFound(id) => ValidationError::NetworkNotFound(id).into(),
            PermissionError::Denied { required, held } => {
                ValidationError::PermissionDenied { required, held }.into()
            }
            PermissionError::SameOwner(_) => ValidationError::SameOwner.into(),
            PermissionError::OwnerGrant | PermissionError::OwnerRemoval => {
                Self::Invariant(error.to_string())
            }
            PermissionError::Store(error) => Self::Store(error),
        }
    }
}
