// config.rs — AccountConfig + file-backed loader with hot reload. The
// external admin surface mutates the file; the core only reads it and
// reacts to its modified-time changing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::error::MirrorError;
use crate::sizing::SizingPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VenueMode {
    Live,
    Demo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAgeFilter {
    pub enabled: bool,
    pub max_age_hours: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub account_name: String,
    pub api_key: String,
    pub api_secret: String,
    pub venue_mode: VenueMode,
    pub source_wallet_address: String,
    pub enabled: bool,
    pub allowlist_enabled: bool,
    pub allowlist: Vec<String>,
    pub sizing: SizingPolicy,
    pub leverage_overrides: HashMap<String, u32>,
    pub default_leverage: u32,
    pub order_age_filter: OrderAgeFilter,
    pub notification_webhook: Option<String>,
}

impl AccountConfig {
    pub fn leverage_for(&self, coin: &str) -> u32 {
        self.leverage_overrides
            .get(coin)
            .copied()
            .unwrap_or(self.default_leverage)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AccountConfigFile {
    pub accounts: Vec<AccountConfig>,
}

pub fn load_config(path: impl AsRef<Path>) -> Result<AccountConfigFile, MirrorError> {
    let content = std::fs::read_to_string(path.as_ref())
        .map_err(|e| MirrorError::Config(format!("cannot read {:?}: {}", path.as_ref(), e)))?;
    serde_json::from_str(&content).map_err(|e| MirrorError::Config(format!("malformed config: {}", e)))
}

/// Watches a config file's modified-time, polling rather than using
/// inotify.
pub struct ConfigWatcher {
    path: PathBuf,
    last_mtime: Option<SystemTime>,
}

impl ConfigWatcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_mtime: None,
        }
    }

    fn mtime(&self) -> Option<SystemTime> {
        std::fs::metadata(&self.path).ok()?.modified().ok()
    }

    /// Returns `Some(config)` the first time it's called and every time
    /// the file's mtime has advanced since the last call; `None` if
    /// nothing changed (or the file is missing).
    pub fn poll(&mut self) -> Option<Result<AccountConfigFile, MirrorError>> {
        let mtime = self.mtime()?;
        if self.last_mtime == Some(mtime) {
            return None;
        }
        self.last_mtime = Some(mtime);
        Some(load_config(&self.path))
    }
}

/// Per-account diff between two config snapshots, used by the Sync
/// Supervisor to decide which workers to start/stop/replace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigDiff {
    Added(String),
    Removed(String),
    Changed(String),
    Unchanged(String),
}

pub fn diff_configs(old: &[AccountConfig], new: &[AccountConfig]) -> Vec<ConfigDiff> {
    let old_by_name: HashMap<&str, &AccountConfig> =
        old.iter().map(|c| (c.account_name.as_str(), c)).collect();
    let new_by_name: HashMap<&str, &AccountConfig> =
        new.iter().map(|c| (c.account_name.as_str(), c)).collect();

    let mut diffs = Vec::new();
    for name in new_by_name.keys() {
        match old_by_name.get(name) {
            None => diffs.push(ConfigDiff::Added(name.to_string())),
            Some(old_cfg) => {
                let new_cfg = new_by_name[name];
                if configs_equal(old_cfg, new_cfg) {
                    diffs.push(ConfigDiff::Unchanged(name.to_string()));
                } else {
                    diffs.push(ConfigDiff::Changed(name.to_string()));
                }
            }
        }
    }
    for name in old_by_name.keys() {
        if !new_by_name.contains_key(name) {
            diffs.push(ConfigDiff::Removed(name.to_string()));
        }
    }
    diffs
}

fn configs_equal(a: &AccountConfig, b: &AccountConfig) -> bool {
    // serde_json round-trip comparison keeps this in one place rather
    // than hand-rolling PartialEq across every nested field.
    serde_json::to_value(a).ok() == serde_json::to_value(b).ok()
}
