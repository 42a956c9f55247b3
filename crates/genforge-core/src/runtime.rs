//! Composition root: builds every engine from one [`GenforgeConfig`] and
//! restores in-memory state from the store.
//!
//! Hydration order matters. Networks load first so permission grants can
//! be matched against their owners, and generators load last so their
//! values see restored network bonuses.

use std::sync::Arc;

use genforge_db::Gateway;
use serde::Serialize;
use tracing::info;

use crate::config::GenforgeConfig;
use crate::economy::{EconomyController, economy_channel};
use crate::error::ServiceError;
use crate::network::NetworkEngine;
use crate::permission::PermissionEngine;
use crate::registry::GeneratorRegistry;
use crate::service::GeneratorService;
use crate::wallet::{PlayerActivity, Wallet};

/// Rows restored by [`Genforge::hydrate`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HydrationReport {
    /// Networks loaded.
    pub networks: usize,
    /// Permission grants loaded.
    pub permissions: usize,
    /// Generators loaded.
    pub generators: usize,
}

/// Every engine of one running instance, wired together.
pub struct Genforge {
    gateway: Arc<Gateway>,
    networks: Arc<NetworkEngine>,
    permissions: Arc<PermissionEngine>,
    registry: Arc<GeneratorRegistry>,
    economy: Arc<EconomyController>,
    service: Arc<GeneratorService>,
}

impl Genforge {
    /// Wire the engines over an open gateway. Nothing is loaded yet.
    pub fn assemble(
        config: &GenforgeConfig,
        gateway: Arc<Gateway>,
        wallet: Arc<dyn Wallet>,
        activity: Arc<dyn PlayerActivity>,
    ) -> Self {
        let (publisher, receiver) = economy_channel(config.economy.enabled);
        let networks = Arc::new(NetworkEngine::new(
            Arc::clone(&gateway),
            config.networks.clone(),
        ));
        let permissions = Arc::new(PermissionEngine::new(
            Arc::clone(&gateway),
            Arc::clone(&networks),
        ));
        let registry = Arc::new(GeneratorRegistry::new(
            Arc::clone(&gateway),
            config.generator_types(),
            Arc::clone(&networks),
            receiver,
            config.limits.max_generators_per_player,
        ));
        let economy = Arc::new(EconomyController::new(
            config.economy.clone(),
            Arc::clone(&gateway),
            Arc::clone(&registry),
            Arc::clone(&wallet),
            activity,
            publisher,
        ));
        let service = Arc::new(GeneratorService::new(
            Arc::clone(&gateway),
            Arc::clone(&registry),
            Arc::clone(&networks),
            Arc::clone(&permissions),
            wallet,
        ));
        Self {
            gateway,
            networks,
            permissions,
            registry,
            economy,
            service,
        }
    }

    /// Restore networks, grants, and generators from the store.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Store`] if any load query fails.
    pub async fn hydrate(&self) -> Result<HydrationReport, ServiceError> {
        let report = HydrationReport {
            networks: self.networks.load_all().await?,
            permissions: self.permissions.load_all().await?,
            generators: self.registry.load_all().await?,
        };
        info!(
            networks = report.networks,
            permissions = report.permissions,
            generators = report.generators,
            "Hydrated state from store"
        );
        Ok(report)
    }

    /// The shared gateway.
    pub const fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// The network engine.
    pub const fn networks(&self) -> &Arc<NetworkEngine> {
        &self.networks
    }

    /// The permission engine.
    pub const fn permissions(&self) -> &Arc<PermissionEngine> {
        &self.permissions
    }

    /// The generator registry.
    pub const fn registry(&self) -> &Arc<GeneratorRegistry> {
        &self.registry
    }

    /// The economy controller.
    pub const fn economy(&self) -> &Arc<EconomyController> {
        &self.economy
    }

    /// The gameplay service.
    pub const fn service(&self) -> &Arc<GeneratorService> {
        &self.service
    }
}
