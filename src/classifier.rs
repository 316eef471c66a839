// classifier.rs — Event Classifier.
//
// A pure function from a SourceFill plus the bookkeeping it needs to
// consult (allowlist, registry, dedup sets, TWAP aggregator) to exactly
// one Classification. Decision order is a hard contract: the first
// matching rule wins, because the rules overlap.

use crate::allowlist::AllowlistFilter;
use crate::bookkeeping::ProcessedTxHashSet;
use crate::events::{Classification, SourceFill};
use crate::registry::SymbolRegistry;
use crate::twap::TwapAggregator;

/// The canonical full-close ratio threshold.
pub const FULL_CLOSE_THRESHOLD: f64 = 0.995;

pub struct ClassifierInputs<'a> {
    pub account: &'a str,
    pub registry: &'a SymbolRegistry,
    pub allowlist: &'a AllowlistFilter,
    pub processed_tx_hashes: &'a ProcessedTxHashSet,
    pub twap: &'a TwapAggregator,
    pub has_same_side_position: bool,
    pub max_age_hours: Option<f64>,
    pub age_hours: f64,
}

pub fn is_full_close(size: f64, start_position: f64) -> bool {
    start_position != 0.0 && (size / start_position).abs() >= FULL_CLOSE_THRESHOLD
}

/// The new side for a reverse-flip direction string: Sell for Long→Short,
/// Buy for Short→Long.
pub fn reverse_flip_new_side(direction: &str) -> Option<crate::events::Side> {
    let lower = direction.to_lowercase();
    if lower.contains("long > short") {
        Some(crate::events::Side::Sell)
    } else if lower.contains("short > long") {
        Some(crate::events::Side::Buy)
    } else {
        None
    }
}

pub fn classify(fill: &SourceFill, inputs: &ClassifierInputs) -> Classification {
    // Rule 2: non-sentinel tx_hash already seen.
    if !fill.is_sentinel_tx_hash() && inputs.processed_tx_hashes.contains(&fill.tx_hash) {
        return Classification::SkipDuplicate;
    }

    // Rule 3: allowlist / registry listing.
    if !inputs.allowlist.is_permitted(&fill.coin, inputs.registry) {
        return Classification::SkipUnsupported;
    }

    // Rule 4: staleness.
    if let Some(max_age) = inputs.max_age_hours {
        if inputs.age_hours > max_age {
            return Classification::SkipStale;
        }
    }

    // Rules 5-6: full close precedes the reverse-flip check.
    if is_full_close(fill.size, fill.start_position) {
        return Classification::CloseFull;
    }

    // Rule 7: reverse flip.
    if fill.direction.contains('>') && reverse_flip_new_side(&fill.direction).is_some() {
        return Classification::ReverseFlip;
    }

    // Rule 8: TWAP slice. `oid` presence alone is the detection signal —
    // `is_twap_parent` can only ever become true via a prior slice of the
    // same order, so gating on it here would mean the very first slice
    // of every TWAP order can never take this branch. `is_twap_parent` is
    // still useful downstream to tell a first slice from a later one.
    if fill.oid.is_some() {
        return Classification::TwapSlice;
    }

    // Rule 9: partial close.
    if fill.closed_pnl != 0.0 || fill.direction.contains("Close") {
        return Classification::ClosePartial;
    }

    // Rule 10: open / add.
    if fill.direction.contains("Open") {
        return if inputs.has_same_side_position {
            Classification::Add
        } else {
            Classification::Open
        };
    }

    // Rule 11: nothing matched.
    Classification::SkipFiltered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Side;
    use chrono::Utc;

    fn base_fill() -> SourceFill {
        SourceFill {
            id: Some(1),
            tx_hash: "0xabc".to_string(),
            timestamp: Utc::now(),
            coin: "BTC".to_string(),
            side: Side::Buy,
            size: 1.0,
            price: 50000.0,
            direction: "Open Long".to_string(),
            start_position: 0.0,
            closed_pnl: 0.0,
            oid: None,
        }
    }

    fn permissive_inputs<'a>(
        registry: &'a SymbolRegistry,
        allowlist: &'a AllowlistFilter,
        tx_hashes: &'a ProcessedTxHashSet,
        twap: &'a TwapAggregator,
    ) -> ClassifierInputs<'a> {
        ClassifierInputs {
            account: "acct1",
            registry,
            allowlist,
            processed_tx_hashes: tx_hashes,
            twap,
            has_same_side_position: false,
            max_age_hours: None,
            age_hours: 0.0,
        }
    }

    fn registry_with_btc() -> SymbolRegistry {
        let mut r = SymbolRegistry::new();
        r.insert(
            "BTC",
            crate::registry::SymbolInfo {
                destination_symbol: "BTCUSDT".into(),
                quantity_step: 0.001,
                min_quantity: 0.001,
                price_tick: 0.5,
            },
        );
        r
    }

    #[test]
    fn open_direction_with_no_existing_position_classifies_open() {
        let registry = registry_with_btc();
        let allowlist = AllowlistFilter::new(false, vec![]);
        let tx_hashes = ProcessedTxHashSet::new();
        let twap = TwapAggregator::new();
        let inputs = permissive_inputs(&registry, &allowlist, &tx_hashes, &twap);
        assert_eq!(classify(&base_fill(), &inputs), Classification::Open);
    }

    /// The very first fill of a TWAP order classifies as a slice: the
    /// aggregator hasn't seen this `oid` before, so this isn't gated on
    /// `is_twap_parent`.
    #[test]
    fn first_fill_with_oid_classifies_as_twap_slice() {
        let registry = registry_with_btc();
        let allowlist = AllowlistFilter::new(false, vec![]);
        let tx_hashes = ProcessedTxHashSet::new();
        let twap = TwapAggregator::new();
        let inputs = permissive_inputs(&registry, &allowlist, &tx_hashes, &twap);
        let mut fill = base_fill();
        fill.oid = Some(777);
        assert!(!twap.is_twap_parent("acct1", 777));
        assert_eq!(classify(&fill, &inputs), Classification::TwapSlice);
    }

    #[test]
    fn open_direction_with_existing_same_side_position_classifies_add() {
        let registry = registry_with_btc();
        let allowlist = AllowlistFilter::new(false, vec![]);
        let tx_hashes = ProcessedTxHashSet::new();
        let twap = TwapAggregator::new();
        let mut inputs = permissive_inputs(&registry, &allowlist, &tx_hashes, &twap);
        inputs.has_same_side_position = true;
        assert_eq!(classify(&base_fill(), &inputs), Classification::Add);
    }

    /// A reduce-shaped direction string is still classified as a full
    /// close once the closed size is effectively the whole position.
    #[test]
    fn full_close_ratio_overrides_reduce_direction() {
        let registry = registry_with_btc();
        let allowlist = AllowlistFilter::new(false, vec![]);
        let tx_hashes = ProcessedTxHashSet::new();
        let twap = TwapAggregator::new();
        let inputs = permissive_inputs(&registry, &allowlist, &tx_hashes, &twap);
        let mut fill = base_fill();
        fill.side = Side::Sell;
        fill.size = 3.0;
        fill.price = 50000.0;
        fill.direction = "Close Long".to_string();
        fill.start_position = 3.0;
        fill.closed_pnl = 10000.0;
        assert_eq!(classify(&fill, &inputs), Classification::CloseFull);
    }

    /// The full-close check runs before the reverse-flip check, even
    /// when the direction string also matches the reverse-flip pattern.
    #[test]
    fn full_close_precedes_reverse_flip() {
        let registry = registry_with_btc();
        let allowlist = AllowlistFilter::new(false, vec![]);
        let tx_hashes = ProcessedTxHashSet::new();
        let twap = TwapAggregator::new();
        let inputs = permissive_inputs(&registry, &allowlist, &tx_hashes, &twap);
        let mut fill = base_fill();
        fill.coin = "ETH".to_string();
        let mut registry = registry;
        registry.insert(
            "ETH",
            crate::registry::SymbolInfo {
                destination_symbol: "ETHUSDT".into(),
                quantity_step: 0.001,
                min_quantity: 0.001,
                price_tick: 0.5,
            },
        );
        let inputs = permissive_inputs(&registry, &allowlist, &tx_hashes, &twap);
        fill.side = Side::Buy;
        fill.size = 0.5;
        fill.price = 3000.0;
        fill.direction = "Short > Long".to_string();
        fill.start_position = -0.5;
        fill.closed_pnl = 100.0;
        assert_eq!(classify(&fill, &inputs), Classification::CloseFull);
    }

    #[test]
    fn duplicate_tx_hash_is_skipped() {
        let registry = registry_with_btc();
        let allowlist = AllowlistFilter::new(false, vec![]);
        let mut tx_hashes = ProcessedTxHashSet::new();
        tx_hashes.insert("0xabc".to_string());
        let twap = TwapAggregator::new();
        let inputs = permissive_inputs(&registry, &allowlist, &tx_hashes, &twap);
        assert_eq!(classify(&base_fill(), &inputs), Classification::SkipDuplicate);
    }

    #[test]
    fn unsupported_coin_is_skipped() {
        let registry = registry_with_btc();
        let allowlist = AllowlistFilter::new(false, vec![]);
        let tx_hashes = ProcessedTxHashSet::new();
        let twap = TwapAggregator::new();
        let inputs = permissive_inputs(&registry, &allowlist, &tx_hashes, &twap);
        let mut fill = base_fill();
        fill.coin = "DOGE".to_string();
        assert_eq!(classify(&fill, &inputs), Classification::SkipUnsupported);
    }

    #[test]
    fn stale_fill_beyond_max_age_is_skipped() {
        let registry = registry_with_btc();
        let allowlist = AllowlistFilter::new(false, vec![]);
        let tx_hashes = ProcessedTxHashSet::new();
        let twap = TwapAggregator::new();
        let mut inputs = permissive_inputs(&registry, &allowlist, &tx_hashes, &twap);
        inputs.max_age_hours = Some(1.0);
        inputs.age_hours = 2.0;
        assert_eq!(classify(&base_fill(), &inputs), Classification::SkipStale);
    }

    #[test]
    fn closed_pnl_without_full_close_ratio_is_partial_close() {
        let registry = registry_with_btc();
        let allowlist = AllowlistFilter::new(false, vec![]);
        let tx_hashes = ProcessedTxHashSet::new();
        let twap = TwapAggregator::new();
        let inputs = permissive_inputs(&registry, &allowlist, &tx_hashes, &twap);
        let mut fill = base_fill();
        fill.direction = "Close Long".to_string();
        fill.start_position = 5.0;
        fill.size = 1.0;
        fill.closed_pnl = 50.0;
        assert_eq!(classify(&fill, &inputs), Classification::ClosePartial);
    }
}
