// bookkeeping.rs — the cross-event, per-account collections: OrderIdMap,
// ForcedLiquidationMemo, NotifiedOrderSet, ProcessedTxHashSet,
// ClosedSymbolSet.
//
// All are worker-local (owned exclusively by one account's Mirror Engine)
// except ForcedLiquidationMemo, which is read by external analytics and
// so sits behind a small mutex.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use crate::events::Side;

pub const FORCED_LIQUIDATION_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiquidationKind {
    Follow,
    Forced,
}

#[derive(Debug, Clone)]
pub struct ForcedLiquidationEntry {
    pub time: SystemTime,
    pub kind: LiquidationKind,
    pub reason: String,
    pub size: f64,
}

/// Keyed by (symbol, side). Entries expire 300s after `time`.
#[derive(Debug, Clone, Default)]
pub struct ForcedLiquidationMemo {
    inner: Arc<Mutex<HashMap<(String, Side), ForcedLiquidationEntry>>>,
}

impl ForcedLiquidationMemo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&self, symbol: &str, side: Side, kind: LiquidationKind, reason: String, size: f64) {
        self.inner.lock().unwrap().insert(
            (symbol.to_string(), side),
            ForcedLiquidationEntry {
                time: SystemTime::now(),
                kind,
                reason,
                size,
            },
        );
    }

    /// Returns the entry if present and not yet expired.
    pub fn read(&self, symbol: &str, side: Side) -> Option<ForcedLiquidationEntry> {
        let guard = self.inner.lock().unwrap();
        let entry = guard.get(&(symbol.to_string(), side))?;
        if entry.time.elapsed().unwrap_or(Duration::MAX) < FORCED_LIQUIDATION_TTL {
            Some(entry.clone())
        } else {
            None
        }
    }

    pub fn clear(&self, symbol: &str, side: Side) {
        self.inner.lock().unwrap().remove(&(symbol.to_string(), side));
    }
}

/// Maps source `order_id` to destination order id.
#[derive(Debug, Default)]
pub struct OrderIdMap {
    inner: HashMap<i64, String>,
}

impl OrderIdMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, source_order_id: i64, destination_order_id: String) {
        self.inner.insert(source_order_id, destination_order_id);
    }

    pub fn get(&self, source_order_id: i64) -> Option<&String> {
        self.inner.get(&source_order_id)
    }

    pub fn remove(&mut self, source_order_id: i64) {
        self.inner.remove(&source_order_id);
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Suppresses duplicate success notifications across handler retries.
#[derive(Debug, Default)]
pub struct NotifiedOrderSet {
    inner: HashSet<String>,
}

impl NotifiedOrderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if this is the first time this order id is seen.
    pub fn mark_if_new(&mut self, destination_order_id: &str) -> bool {
        self.inner.insert(destination_order_id.to_string())
    }
}

/// Deduplicates source events that arrive twice, keyed by non-sentinel
/// tx_hash.
#[derive(Debug, Default)]
pub struct ProcessedTxHashSet {
    inner: HashSet<String>,
}

impl ProcessedTxHashSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, tx_hash: &str) -> bool {
        self.inner.contains(tx_hash)
    }

    pub fn insert(&mut self, tx_hash: String) {
        self.inner.insert(tx_hash);
    }
}

/// Tracks coins that have just gone through a full close so later adds
/// are not mistaken for a first open.
#[derive(Debug, Default)]
pub struct ClosedSymbolSet {
    inner: HashSet<String>,
}

impl ClosedSymbolSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, coin: String) {
        self.inner.insert(coin);
    }

    pub fn remove(&mut self, coin: &str) {
        self.inner.remove(coin);
    }

    pub fn contains(&self, coin: &str) -> bool {
        self.inner.contains(coin)
    }
}
