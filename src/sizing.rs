// sizing.rs — Position Calculator.
//
// Pure function from a fill + sizing policy to a destination-venue order
// quantity. Zero means "do not trade".

use serde::{Deserialize, Serialize};

use crate::registry::SymbolRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SizingMode {
    Fixed,
    Ratio,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingPolicy {
    pub mode: SizingMode,
    pub fixed_amount: f64,
    pub base_margin_amount: f64,
    pub min_copy_value: f64,
    pub force_min_amount_on_small_order: bool,
}

/// Returns the clamped order quantity, or 0.0 to mean "skip".
pub fn calculate_copy_quantity(
    policy: &SizingPolicy,
    coin: &str,
    source_size: f64,
    source_price: f64,
    registry: &SymbolRegistry,
) -> f64 {
    let mut target_notional = match policy.mode {
        SizingMode::Fixed => policy.fixed_amount,
        SizingMode::Ratio => source_size * source_price * policy.base_margin_amount,
    };

    if target_notional < policy.min_copy_value {
        if policy.force_min_amount_on_small_order {
            target_notional = policy.min_copy_value;
        } else {
            return 0.0;
        }
    }

    let raw_quantity = target_notional / source_price;
    registry.clamp_quantity(coin, raw_quantity)
}
