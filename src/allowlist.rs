// allowlist.rs — Allowlist Filter: is this coin permitted for this
// account. Composes with the Symbol Registry.

use std::collections::HashSet;

use crate::registry::SymbolRegistry;

#[derive(Debug, Clone, Default)]
pub struct AllowlistFilter {
    pub enabled: bool,
    coins: HashSet<String>,
}

impl AllowlistFilter {
    pub fn new(enabled: bool, coins: impl IntoIterator<Item = String>) -> Self {
        Self {
            enabled,
            coins: coins.into_iter().collect(),
        }
    }

    /// Not permitted if the allowlist is enabled and the coin is absent,
    /// OR the allowlist is disabled and the destination doesn't list the
    /// symbol at all.
    pub fn is_permitted(&self, coin: &str, registry: &SymbolRegistry) -> bool {
        if self.enabled {
            self.coins.contains(coin)
        } else {
            registry.is_listed(coin)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SymbolInfo;

    fn registry_with_btc() -> SymbolRegistry {
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
    fn enabled_allowlist_rejects_unlisted_coin() {
        let filter = AllowlistFilter::new(true, vec!["ETH".to_string()]);
        let registry = registry_with_btc();
        assert!(!filter.is_permitted("BTC", &registry));
    }

    #[test]
    fn disabled_allowlist_falls_back_to_registry() {
        let filter = AllowlistFilter::new(false, Vec::new());
        let registry = registry_with_btc();
        assert!(filter.is_permitted("BTC", &registry));
        assert!(!filter.is_permitted("DOGE", &registry));
    }
}
