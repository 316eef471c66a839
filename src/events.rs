// events.rs — the dynamic-event data model.
//
// The source venue is dynamically typed; we represent its events as
// tagged records with an explicit `kind` discriminant rather than trying
// to recover a static schema the source never had.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const SENTINEL_TX_HASH: &str =
    "0x0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// Per-event status column. Terminal once non-pending;
/// the same event id is never re-dispatched after reaching one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessedMarker {
    Pending,
    Processed,
    Filtered,
    Unsupported,
    Duplicate,
    Failed,
}

impl ProcessedMarker {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ProcessedMarker::Pending)
    }
}

/// One execution reported by the source venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFill {
    pub id: Option<i64>,
    pub tx_hash: String,
    pub timestamp: DateTime<Utc>,
    pub coin: String,
    pub side: Side,
    pub size: f64,
    pub price: f64,
    pub direction: String,
    pub start_position: f64,
    pub closed_pnl: f64,
    pub oid: Option<i64>,
}

impl SourceFill {
    pub fn is_sentinel_tx_hash(&self) -> bool {
        self.tx_hash == SENTINEL_TX_HASH
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderAction {
    Placed,
    Canceled,
}

/// One order-lifecycle event from the source venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceOrder {
    pub id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub coin: String,
    pub action: OrderAction,
    pub side: Side,
    pub size: f64,
    pub price: f64,
    pub order_id: i64,
}

/// Snapshot from the destination venue. Authoritative — the engine never
/// caches this beyond the lifetime of one operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationPosition {
    pub symbol: String,
    pub side: Side,
    pub size: f64,
    pub avg_price: f64,
}

/// The classifier's output for a single source event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Open,
    Add,
    CloseFull,
    ClosePartial,
    ReverseFlip,
    TwapSlice,
    SkipFiltered,
    SkipDuplicate,
    SkipUnsupported,
    SkipStale,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_opposite_round_trips() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite(), Side::Buy);
    }

    #[test]
    fn only_pending_is_non_terminal() {
        assert!(!ProcessedMarker::Pending.is_terminal());
        assert!(ProcessedMarker::Processed.is_terminal());
        assert!(ProcessedMarker::Failed.is_terminal());
    }
}
