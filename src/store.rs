// store.rs — local event store: an append-only log of SourceFills
// and SourceOrders with a `status` column, queried by the few well-known
// shapes the core needs. The real persistence layer is an external
// collaborator; this module is the trait boundary plus an in-memory
// implementation sufficient for tests and for driving the supervisor
// against demo data.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::MirrorError;
use crate::events::{ProcessedMarker, SourceFill, SourceOrder};

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn pending_fills(&self, account: &str) -> Result<Vec<SourceFill>, MirrorError>;
    async fn pending_orders(&self, account: &str) -> Result<Vec<SourceOrder>, MirrorError>;
    async fn mark_fill(&self, account: &str, id: i64, status: ProcessedMarker) -> Result<(), MirrorError>;
    async fn mark_order(&self, account: &str, id: i64, status: ProcessedMarker) -> Result<(), MirrorError>;
    async fn append_fill(&self, account: &str, fill: SourceFill) -> Result<(), MirrorError>;
    async fn append_order(&self, account: &str, order: SourceOrder) -> Result<(), MirrorError>;
}

struct AccountLog {
    fills: Vec<(SourceFill, ProcessedMarker)>,
    orders: Vec<(SourceOrder, ProcessedMarker)>,
}

/// `Vec`-backed implementation behind a mutex. Append-only; a status
/// update is the only mutation after insertion, matching the "single
/// UPDATE flips status" invariant.
#[derive(Default)]
pub struct InMemoryEventStore {
    accounts: Mutex<std::collections::HashMap<String, AccountLog>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn pending_fills(&self, account: &str) -> Result<Vec<SourceFill>, MirrorError> {
        let accounts = self.accounts.lock().await;
        let Some(log) = accounts.get(account) else {
            return Ok(Vec::new());
        };
        let mut pending: Vec<SourceFill> = log
            .fills
            .iter()
            .filter(|(_, status)| matches!(status, ProcessedMarker::Pending))
            .map(|(fill, _)| fill.clone())
            .collect();
        pending.sort_by_key(|f| (f.timestamp, f.id.unwrap_or(i64::MAX)));
        Ok(pending)
    }

    async fn pending_orders(&self, account: &str) -> Result<Vec<SourceOrder>, MirrorError> {
        let accounts = self.accounts.lock().await;
        let Some(log) = accounts.get(account) else {
            return Ok(Vec::new());
        };
        let mut pending: Vec<SourceOrder> = log
            .orders
            .iter()
            .filter(|(_, status)| matches!(status, ProcessedMarker::Pending))
            .map(|(order, _)| order.clone())
            .collect();
        pending.sort_by_key(|o| (o.timestamp, o.id.unwrap_or(i64::MAX)));
        Ok(pending)
    }

    async fn mark_fill(&self, account: &str, id: i64, status: ProcessedMarker) -> Result<(), MirrorError> {
        let mut accounts = self.accounts.lock().await;
        let log = accounts
            .get_mut(account)
            .ok_or_else(|| MirrorError::Internal(format!("unknown account {}", account)))?;
        if let Some((_, s)) = log.fills.iter_mut().find(|(f, _)| f.id == Some(id)) {
            *s = status;
        }
        Ok(())
    }

    async fn mark_order(&self, account: &str, id: i64, status: ProcessedMarker) -> Result<(), MirrorError> {
        let mut accounts = self.accounts.lock().await;
        let log = accounts
            .get_mut(account)
            .ok_or_else(|| MirrorError::Internal(format!("unknown account {}", account)))?;
        if let Some((_, s)) = log.orders.iter_mut().find(|(o, _)| o.id == Some(id)) {
            *s = status;
        }
        Ok(())
    }

    async fn append_fill(&self, account: &str, fill: SourceFill) -> Result<(), MirrorError> {
        let mut accounts = self.accounts.lock().await;
        let log = accounts.entry(account.to_string()).or_insert_with(|| AccountLog {
            fills: Vec::new(),
            orders: Vec::new(),
        });
        log.fills.push((fill, ProcessedMarker::Pending));
        Ok(())
    }

    async fn append_order(&self, account: &str, order: SourceOrder) -> Result<(), MirrorError> {
        let mut accounts = self.accounts.lock().await;
        let log = accounts.entry(account.to_string()).or_insert_with(|| AccountLog {
            fills: Vec::new(),
            orders: Vec::new(),
        });
        log.orders.push((order, ProcessedMarker::Pending));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Side;
    use chrono::Utc;

    fn fill(id: i64) -> SourceFill {
        SourceFill {
            id: Some(id),
            tx_hash: format!("0x{:064x}", id),
            timestamp: Utc::now(),
            coin: "BTC".into(),
            side: Side::Buy,
            size: 1.0,
            price: 50000.0,
            direction: "Open Long".into(),
            start_position: 0.0,
            closed_pnl: 0.0,
            oid: None,
        }
    }

    #[tokio::test]
    async fn marked_fills_drop_out_of_pending() {
        let store = InMemoryEventStore::new();
        store.append_fill("acct1", fill(1)).await.unwrap();
        store.append_fill("acct1", fill(2)).await.unwrap();
        store
            .mark_fill("acct1", 1, ProcessedMarker::Processed)
            .await
            .unwrap();
        let pending = store.pending_fills("acct1").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, Some(2));
    }

    #[tokio::test]
    async fn unknown_account_returns_empty_not_error() {
        let store = InMemoryEventStore::new();
        let pending = store.pending_fills("ghost").await.unwrap();
        assert!(pending.is_empty());
    }
}
