// registry.rs — Symbol Registry (maps the source venue's coin name to
// the destination venue's contract symbol and its trading constraints).

use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct SymbolInfo {
    pub destination_symbol: String,
    pub quantity_step: f64,
    pub min_quantity: f64,
    pub price_tick: f64,
}

/// Maps short coin names (e.g. "BTC") to destination contract symbols
/// (e.g. "BTCUSDT") plus the constraints the Position Calculator and the
/// venue adapter need to clamp orders legally.
#[derive(Debug, Clone, Default)]
pub struct SymbolRegistry {
    symbols: HashMap<String, SymbolInfo>,
}

impl SymbolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, coin: impl Into<String>, info: SymbolInfo) {
        self.symbols.insert(coin.into(), info);
    }

    pub fn lookup(&self, coin: &str) -> Option<&SymbolInfo> {
        self.symbols.get(coin)
    }

    /// Whether the destination lists a contract for this coin at all.
    pub fn is_listed(&self, coin: &str) -> bool {
        self.symbols.contains_key(coin)
    }

    pub fn destination_symbol(&self, coin: &str) -> Option<&str> {
        self.symbols.get(coin).map(|i| i.destination_symbol.as_str())
    }

    /// Clamps `quantity` down to the nearest multiple of the symbol's step,
    /// returning 0.0 if the clamped amount is below the minimum lot.
    pub fn clamp_quantity(&self, coin: &str, quantity: f64) -> f64 {
        let Some(info) = self.lookup(coin) else {
            return 0.0;
        };
        if info.quantity_step <= 0.0 {
            return quantity;
        }
        let steps = (quantity / info.quantity_step).floor();
        let clamped = steps * info.quantity_step;
        if clamped < info.min_quantity {
            0.0
        } else {
            clamped
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn btc_registry() -> SymbolRegistry {
        let mut r = SymbolRegistry::new();
        r.insert(
            "BTC",
            SymbolInfo {
                destination_symbol: "BTCUSDT".into(),
                quantity_step: 0.001,
                min_quantity: 0.001,
                price_tick: 0.5,
            },
        );
        r
    }

    #[test]
    fn unlisted_coin_reports_not_listed() {
        let r = btc_registry();
        assert!(!r.is_listed("DOGE"));
        assert_eq!(r.clamp_quantity("DOGE", 10.0), 0.0);
    }

    #[test]
    fn clamp_rounds_down_to_step() {
        let r = btc_registry();
        assert_eq!(r.clamp_quantity("BTC", 0.1234), 0.123);
    }

    #[test]
    fn clamp_below_min_lot_returns_zero() {
        let r = btc_registry();
        assert_eq!(r.clamp_quantity("BTC", 0.0005), 0.0);
    }
}
