// twap.rs — TWAP Aggregator.
//
// Groups fills sharing one TWAP `oid` into one logical parent, tracking
// running totals so notifications can report "slice i of N". The true
// slice count N is never known in advance — `slice_count` is simply the
// number of slices observed so far.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// This repo's resolution of the open "TWAP complete" question — a
/// parent with no new slice for this long is dormant and may be evicted
/// without changing any externally observable per-slice behavior.
pub const DORMANCY_WATERMARK: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct TwapOrder {
    pub account: String,
    pub oid: i64,
    pub slice_count: u32,
    pub followed_count: u32,
    pub total_size: f64,
    pub followed_size: f64,
    last_seen: Instant,
}

#[derive(Debug, Default)]
pub struct TwapAggregator {
    orders: HashMap<(String, i64), TwapOrder>,
}

impl TwapAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_twap_parent(&self, account: &str, oid: i64) -> bool {
        self.orders.contains_key(&(account.to_string(), oid))
    }

    /// Records a new slice, creating the parent on first observation.
    pub fn record_slice(&mut self, account: &str, oid: i64, size: f64) -> &TwapOrder {
        let key = (account.to_string(), oid);
        let entry = self.orders.entry(key).or_insert_with(|| TwapOrder {
            account: account.to_string(),
            oid,
            slice_count: 0,
            followed_count: 0,
            total_size: 0.0,
            followed_size: 0.0,
            last_seen: Instant::now(),
        });
        entry.slice_count += 1;
        entry.total_size += size;
        entry.last_seen = Instant::now();
        entry
    }

    /// Records a successfully mirrored slice (called after the Mirror
    /// Engine confirms the destination-side fill).
    pub fn mark_slice_followed(&mut self, account: &str, oid: i64, followed_size: f64) {
        if let Some(order) = self.orders.get_mut(&(account.to_string(), oid)) {
            order.followed_count += 1;
            order.followed_size += followed_size;
        }
    }

    pub fn progress(&self, account: &str, oid: i64) -> Option<(u32, u32, f64)> {
        self.orders
            .get(&(account.to_string(), oid))
            .map(|o| (o.followed_count, o.slice_count, o.followed_size))
    }

    /// Evicts parents idle longer than the dormancy watermark. Called
    /// periodically by the Mirror Engine's sweep, never from the hot path.
    pub fn sweep_dormant(&mut self) {
        let now = Instant::now();
        self.orders
            .retain(|_, order| now.duration_since(order.last_seen) < DORMANCY_WATERMARK);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_slice_creates_parent_and_counts_it() {
        let mut agg = TwapAggregator::new();
        assert!(!agg.is_twap_parent("acct1", 42));
        agg.record_slice("acct1", 42, 1.0);
        assert!(agg.is_twap_parent("acct1", 42));
        assert_eq!(agg.progress("acct1", 42), Some((0, 1, 0.0)));
    }

    #[test]
    fn followed_slices_increment_independently_of_slice_count() {
        let mut agg = TwapAggregator::new();
        agg.record_slice("acct1", 42, 1.0);
        agg.record_slice("acct1", 42, 2.0);
        agg.mark_slice_followed("acct1", 42, 1.0);
        assert_eq!(agg.progress("acct1", 42), Some((1, 2, 1.0)));
    }

    #[test]
    fn unrelated_account_and_oid_pairs_do_not_collide() {
        let mut agg = TwapAggregator::new();
        agg.record_slice("acct1", 42, 1.0);
        agg.record_slice("acct2", 42, 5.0);
        assert_eq!(agg.progress("acct1", 42), Some((0, 1, 0.0)));
        assert_eq!(agg.progress("acct2", 42), Some((0, 1, 0.0)));
    }
}
