//! Server binary for the Genforge generator economy.
//!
//! Wires the persistence gateway, the engines, the economy timer, and the
//! collaborator API together, then runs until `Ctrl-C`.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `genforge-config.yaml` (`GENFORGE_CONFIG`
//!    overrides the path; a missing file means defaults)
//! 2. Initialize structured logging (tracing)
//! 3. Open the database and run additive migrations
//! 4. Wire the engines and hydrate networks, grants, and generators
//! 5. Start the batch sweeper and the economy timer
//! 6. Start the API server
//! 7. Run the foreground loop until shutdown
//!
//! # Shutdown Sequence
//!
//! 1. Signal every timer and the API server to stop
//! 2. Drain and stop the foreground loop
//! 3. Flush batches, wait for pending writes, close the connection

mod error;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use genforge_api::AppState;
use genforge_core::{Genforge, GenforgeConfig, InMemoryWallet, OnlineCounter};
use genforge_db::{Foreground, Gateway, migrate};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::ServerError;

/// Default configuration file name.
const CONFIG_FILE: &str = "genforge-config.yaml";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if any startup step fails or closing the database
/// fails during shutdown.
#[tokio::main]
async fn main() -> Result<(), ServerError> {
    // 1. Load configuration.
    let config_path = config_path();
    let config = load_config(&config_path)?;

    // 2. Initialize structured logging.
    init_logging(&config);
    info!(
        config = %config_path.display(),
        database = config.database.url,
        generator_types = config.generators.len(),
        economy_enabled = config.economy.enabled,
        "genforge-server starting"
    );

    // 3. Open the database.
    let (foreground, fg_loop) = Foreground::channel();
    let gateway = Gateway::connect(config.database.to_database_config(), foreground).await?;
    let report = migrate(&gateway).await?;
    info!(
        applied = report.applied.len(),
        skipped = report.skipped,
        "Schema up to date"
    );

    // 4. Wire and hydrate.
    let wallet = Arc::new(InMemoryWallet::new(config.wallet.starting_balance));
    let activity = Arc::new(OnlineCounter::new());
    let app = Arc::new(Genforge::assemble(
        &config,
        Arc::clone(&gateway),
        wallet,
        activity,
    ));
    app.hydrate().await?;

    // 5. Timers.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = gateway.spawn_batch_sweeper(shutdown_rx.clone());
    let economy = app.economy().spawn(shutdown_rx.clone());
    info!(
        interval_secs = config.economy.update_interval_secs,
        "Economy controller started"
    );

    // 6. API server.
    let api = if config.api.enabled {
        let state = Arc::new(AppState::new(Arc::clone(&app)));
        let api_config = config.api.clone();
        let stop = stopped(shutdown_rx.clone());
        Some(tokio::spawn(async move {
            if let Err(e) = genforge_api::start_server(&api_config, state, stop).await {
                error!(error = %e, "API server failed");
            }
        }))
    } else {
        info!("API server disabled");
        None
    };

    // 7. Foreground loop.
    let foreground_task = tokio::spawn(fg_loop.run(stopped(shutdown_rx)));
    info!("genforge-server ready");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    shutdown_tx.send_replace(true);

    join("batch sweeper", sweeper).await;
    join("economy controller", economy).await;
    if let Some(api) = api {
        join("API server", api).await;
    }
    match foreground_task.await {
        Ok(executed) => info!(executed, "Foreground loop drained"),
        Err(e) => warn!(error = %e, "Foreground loop task failed"),
    }

    gateway.shutdown().await?;
    info!("genforge-server stopped");
    Ok(())
}

/// The configuration file path: `GENFORGE_CONFIG` or [`CONFIG_FILE`].
fn config_path() -> PathBuf {
    std::env::var_os("GENFORGE_CONFIG").map_or_else(|| PathBuf::from(CONFIG_FILE), PathBuf::from)
}

/// Load configuration, falling back to defaults when the file is absent.
///
/// Environment overrides apply in both cases.
fn load_config(path: &Path) -> Result<GenforgeConfig, ServerError> {
    if path.exists() {
        return Ok(GenforgeConfig::from_file(path)?);
    }
    let mut config = GenforgeConfig::default();
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

/// Install the tracing subscriber. `RUST_LOG` wins over the config level.
fn init_logging(config: &GenforgeConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if config.logging.format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Resolves once the shutdown flag turns `true` or its sender is dropped.
async fn stopped(mut shutdown: watch::Receiver<bool>) {
    // An error means the sender is gone, which also means stop.
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Await a background task, logging if it panicked.
async fn join(name: &str, handle: JoinHandle<()>) {
    if let Err(e) = handle.await {
        warn!(task = name, error = %e, "Background task failed");
    }
}
