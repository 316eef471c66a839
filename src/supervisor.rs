// supervisor.rs — Sync Supervisor.
//
// Owns every account's mirror-engine lifecycle: starts one worker task
// per enabled account, holds the configuration snapshot, and reacts to
// hot-reload by diffing snapshots and restarting only the affected
// workers. Grounded on `main.rs`'s task-spawning/stop-signal style.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::bookkeeping::ForcedLiquidationMemo;
use crate::config::{diff_configs, AccountConfig, AccountConfigFile, ConfigDiff, ConfigWatcher};
use crate::engine::MirrorEngine;
use crate::notify::{LogSink, NotificationSink, WebhookSink};
use crate::registry::SymbolRegistry;
use crate::store::EventStore;
use crate::venue::{DestinationVenue, HttpVenue, SimVenue};

struct Worker {
    config: AccountConfig,
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Constructs the destination-venue adapter for an account. Demo mode
/// uses an in-memory `SimVenue`; live mode talks to the configured REST
/// endpoint via `HttpVenue`.
pub trait VenueFactory: Send + Sync {
    fn build(&self, config: &AccountConfig) -> Arc<dyn DestinationVenue>;
}

pub struct DefaultVenueFactory {
    pub live_base_url: String,
}

impl VenueFactory for DefaultVenueFactory {
    fn build(&self, config: &AccountConfig) -> Arc<dyn DestinationVenue> {
        match config.venue_mode {
            crate::config::VenueMode::Demo => Arc::new(SimVenue::new()),
            crate::config::VenueMode::Live => Arc::new(HttpVenue::new(
                self.live_base_url.clone(),
                config.api_key.clone(),
                config.api_secret.clone(),
            )),
        }
    }
}

pub struct SyncSupervisor {
    store: Arc<dyn EventStore>,
    registry: SymbolRegistry,
    venue_factory: Arc<dyn VenueFactory>,
    workers: HashMap<String, Worker>,
    forced_liquidations: ForcedLiquidationMemo,
}

impl SyncSupervisor {
    pub fn new(store: Arc<dyn EventStore>, registry: SymbolRegistry, venue_factory: Arc<dyn VenueFactory>) -> Self {
        Self {
            store,
            registry,
            venue_factory,
            workers: HashMap::new(),
            forced_liquidations: ForcedLiquidationMemo::new(),
        }
    }

    fn notifier_for(&self, config: &AccountConfig) -> Arc<dyn NotificationSink> {
        match &config.notification_webhook {
            Some(url) if !url.is_empty() => Arc::new(WebhookSink::new(url.clone())),
            _ => Arc::new(LogSink),
        }
    }

    fn start_worker(&mut self, config: AccountConfig) {
        if !config.enabled {
            log::info!("[{}] account disabled, not starting a worker", config.account_name);
            return;
        }
        let account_name = config.account_name.clone();
        let (stop_tx, stop_rx) = watch::channel(false);
        let venue = self.venue_factory.build(&config);
        let notifier = self.notifier_for(&config);
        let mut engine = MirrorEngine::new(
            config.clone(),
            self.registry.clone(),
            venue,
            Arc::clone(&self.store),
            notifier,
            self.forced_liquidations.clone(),
        );
        let handle = tokio::spawn(async move {
            engine.run(stop_rx).await;
        });
        self.workers.insert(
            account_name,
            Worker {
                config,
                stop_tx,
                handle,
            },
        );
    }

    async fn stop_worker(&mut self, account_name: &str) {
        if let Some(worker) = self.workers.remove(account_name) {
            let _ = worker.stop_tx.send(true);
            let _ = worker.handle.await;
            log::info!("[{}] worker stopped", account_name);
        }
    }

    pub async fn apply_config(&mut self, file: AccountConfigFile) {
        let old_configs: Vec<AccountConfig> = self.workers.values().map(|w| w.config.clone()).collect();
        let diffs = diff_configs(&old_configs, &file.accounts);
        let by_name: HashMap<&str, &AccountConfig> =
            file.accounts.iter().map(|c| (c.account_name.as_str(), c)).collect();

        for diff in diffs {
            match diff {
                ConfigDiff::Unchanged(_) => {}
                ConfigDiff::Removed(name) => {
                    self.stop_worker(&name).await;
                }
                ConfigDiff::Added(name) | ConfigDiff::Changed(name) => {
                    self.stop_worker(&name).await;
                    if let Some(config) = by_name.get(name.as_str()) {
                        self.start_worker((*config).clone());
                    }
                }
            }
        }
    }

    /// Polls the config file's mtime every `poll_interval` and
    /// start/stop/replaces only the affected workers on change.
    pub async fn run_with_hot_reload(&mut self, mut watcher: ConfigWatcher, mut shutdown: watch::Receiver<bool>) {
        loop {
            if let Some(result) = watcher.poll() {
                match result {
                    Ok(file) => self.apply_config(file).await,
                    Err(e) => log::error!("config reload failed: {}", e),
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_secs(5)) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        self.shutdown_all().await;
    }

    pub async fn shutdown_all(&mut self) {
        let names: Vec<String> = self.workers.keys().cloned().collect();
        for name in names {
            self.stop_worker(&name).await;
        }
    }

    pub fn active_accounts(&self) -> Vec<String> {
        self.workers.keys().cloned().collect()
    }
}
