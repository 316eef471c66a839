// main.rs — process entrypoint.
//
// Loads .env, initializes the logger, constructs the shared
// collaborators, loads the account config snapshot, then hands control
// to the Sync Supervisor's hot-reload loop until ctrl-c.

mod allowlist;
mod bookkeeping;
mod classifier;
mod config;
mod engine;
mod error;
mod events;
mod notify;
mod registry;
mod retry;
mod reverse;
mod sizing;
mod store;
mod supervisor;
mod twap;
mod venue;

use std::sync::Arc;

use tokio::sync::watch;

use config::{load_config, ConfigWatcher};
use registry::{SymbolInfo, SymbolRegistry};
use store::InMemoryEventStore;
use supervisor::{DefaultVenueFactory, SyncSupervisor};

fn default_registry() -> SymbolRegistry {
    // A minimal seed registry; a production deployment loads this from
    // the destination venue's instruments endpoint. Kept in-process here
    // since that listing call is part of the external venue SDK.
    let mut registry = SymbolRegistry::new();
    registry.insert(
        "BTC",
        SymbolInfo {
            destination_symbol: "BTCUSDT".into(),
            quantity_step: 0.001,
            min_quantity: 0.001,
            price_tick: 0.5,
        },
    );
    registry.insert(
        "ETH",
        SymbolInfo {
            destination_symbol: "ETHUSDT".into(),
            quantity_step: 0.01,
            min_quantity: 0.01,
            price_tick: 0.01,
        },
    );
    registry.insert(
        "SOL",
        SymbolInfo {
            destination_symbol: "SOLUSDT".into(),
            quantity_step: 0.1,
            min_quantity: 0.1,
            price_tick: 0.001,
        },
    );
    registry
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::init();

    let config_path = std::env::var("MIRROR_CONFIG_PATH").unwrap_or_else(|_| "accounts.json".to_string());
    let venue_base_url = std::env::var("DESTINATION_VENUE_URL")
        .unwrap_or_else(|_| "https://api.example-venue.com".to_string());

    let store = Arc::new(InMemoryEventStore::new());
    let registry = default_registry();
    let venue_factory = Arc::new(DefaultVenueFactory {
        live_base_url: venue_base_url,
    });

    let mut supervisor = SyncSupervisor::new(store, registry, venue_factory);

    match load_config(&config_path) {
        Ok(file) => {
            log::info!("loaded {} account(s) from {}", file.accounts.len(), config_path);
            supervisor.apply_config(file).await;
        }
        Err(e) => {
            log::warn!(
                "no usable config at {} yet ({}); starting with zero accounts",
                config_path,
                e
            );
        }
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watcher = ConfigWatcher::new(config_path);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    supervisor.run_with_hot_reload(watcher, shutdown_rx).await;
}
