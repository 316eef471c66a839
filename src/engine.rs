// engine.rs — the Mirror Engine.
//
// The top-level per-account loop: pulls pending events from the local
// store, classifies each, dispatches to the matching handler, updates
// bookkeeping, marks the event processed, emits a notification. One
// `MirrorEngine` instance is exactly one account's serialized worker —
// it owns all per-account collections exclusively except the
// ForcedLiquidationMemo, which is shared with external readers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use uuid::Uuid;

use crate::allowlist::AllowlistFilter;
use crate::bookkeeping::{ClosedSymbolSet, ForcedLiquidationMemo, LiquidationKind, NotifiedOrderSet, OrderIdMap, ProcessedTxHashSet};
use crate::classifier::{self, ClassifierInputs};
use crate::config::AccountConfig;
use crate::error::MirrorError;
use crate::events::{Classification, OrderAction, ProcessedMarker, Side, SourceFill, SourceOrder};
use crate::notify::{Notification, NotificationFields, NotificationSink};
use crate::registry::SymbolRegistry;
use crate::retry::RetryPolicy;
use crate::reverse::execute_reverse_flip;
use crate::sizing::calculate_copy_quantity;
use crate::store::EventStore;
use crate::twap::TwapAggregator;
use crate::venue::DestinationVenue;

const FILL_WAIT_CEILING: Duration = Duration::from_secs(30);
const EXECUTIONS_WINDOW_SECS: i64 = 30;
const POSITION_ZERO_RECOVERY_DELAY: Duration = Duration::from_secs(5);
const ORDER_PRICE_MATCH_TOLERANCE: f64 = 0.01;

pub struct MirrorEngine {
    account: AccountConfig,
    registry: SymbolRegistry,
    allowlist: AllowlistFilter,
    venue: Arc<dyn DestinationVenue>,
    store: Arc<dyn EventStore>,
    notifier: Arc<dyn NotificationSink>,

    twap: TwapAggregator,
    processed_tx_hashes: ProcessedTxHashSet,
    order_id_map: OrderIdMap,
    notified_orders: NotifiedOrderSet,
    closed_symbols: ClosedSymbolSet,
    forced_liquidations: ForcedLiquidationMemo,
}

impl MirrorEngine {
    pub fn new(
        account: AccountConfig,
        registry: SymbolRegistry,
        venue: Arc<dyn DestinationVenue>,
        store: Arc<dyn EventStore>,
        notifier: Arc<dyn NotificationSink>,
        forced_liquidations: ForcedLiquidationMemo,
    ) -> Self {
        let allowlist = AllowlistFilter::new(account.allowlist_enabled, account.allowlist.clone());
        Self {
            account,
            registry,
            allowlist,
            venue,
            store,
            notifier,
            twap: TwapAggregator::new(),
            processed_tx_hashes: ProcessedTxHashSet::new(),
            order_id_map: OrderIdMap::new(),
            notified_orders: NotifiedOrderSet::new(),
            closed_symbols: ClosedSymbolSet::new(),
            forced_liquidations,
        }
    }

    /// The per-account serialized loop. Runs until `stop_rx` flips to
    /// `true`; an in-flight dispatch is allowed to finish rather than
    /// being interrupted.
    pub async fn run(&mut self, mut stop_rx: watch::Receiver<bool>) {
        log::info!("[{}] mirror engine starting", self.account.account_name);
        loop {
            if *stop_rx.borrow() {
                break;
            }

            let fills = match self.store.pending_fills(&self.account.account_name).await {
                Ok(f) => f,
                Err(e) => {
                    log::error!("[{}] failed to fetch pending fills: {}", self.account.account_name, e);
                    Vec::new()
                }
            };
            for fill in fills {
                if *stop_rx.borrow() {
                    break;
                }
                self.process_fill(&fill).await;
            }

            let orders = match self.store.pending_orders(&self.account.account_name).await {
                Ok(o) => o,
                Err(e) => {
                    log::error!("[{}] failed to fetch pending orders: {}", self.account.account_name, e);
                    Vec::new()
                }
            };
            for order in orders {
                if *stop_rx.borrow() {
                    break;
                }
                self.process_order(&order).await;
            }

            self.twap.sweep_dormant();

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(500)) => {}
                _ = stop_rx.changed() => {}
            }
        }
        log::info!("[{}] mirror engine stopped", self.account.account_name);
    }

    fn has_same_side_position(&self, symbol: &str, side: Side, positions: &[crate::events::DestinationPosition]) -> bool {
        positions.iter().any(|p| p.symbol == symbol && p.side == side && p.size > 0.0)
    }

    async fn process_fill(&mut self, fill: &SourceFill) {
        let Some(symbol) = self.registry.destination_symbol(&fill.coin).map(|s| s.to_string()) else {
            // Unlisted coin: classify() will independently reach
            // SkipUnsupported via the allowlist/registry check.
            return self.dispatch_and_mark(fill, Classification::SkipUnsupported).await;
        };

        let positions = match self.venue.query_positions(&symbol).await {
            Ok(p) => p,
            Err(e) => {
                log::error!("[{}] position query failed for {}: {}", self.account.account_name, symbol, e);
                Vec::new()
            }
        };
        // A coin we just fully closed may still show its old position in
        // a query that raced the close; treat it as having no position
        // so the next fill opens fresh instead of being folded in as an
        // add to a position that's actually gone.
        let has_same_side = !self.closed_symbols.contains(&fill.coin)
            && self.has_same_side_position(&symbol, fill.side, &positions);

        let age_hours = (chrono::Utc::now() - fill.timestamp).num_seconds() as f64 / 3600.0;
        let inputs = ClassifierInputs {
            account: &self.account.account_name,
            registry: &self.registry,
            allowlist: &self.allowlist,
            processed_tx_hashes: &self.processed_tx_hashes,
            twap: &self.twap,
            has_same_side_position: has_same_side,
            max_age_hours: if self.account.order_age_filter.enabled {
                Some(self.account.order_age_filter.max_age_hours)
            } else {
                None
            },
            age_hours,
        };
        let classification = classifier::classify(fill, &inputs);
        if matches!(classification, Classification::Open) {
            self.closed_symbols.remove(&fill.coin);
        }
        self.dispatch_and_mark(fill, classification).await;
    }

    async fn dispatch_and_mark(&mut self, fill: &SourceFill, classification: Classification) {
        if !fill.is_sentinel_tx_hash() {
            self.processed_tx_hashes.insert(fill.tx_hash.clone());
        }

        let (status, result) = match classification {
            Classification::SkipDuplicate => (ProcessedMarker::Duplicate, Ok(())),
            Classification::SkipUnsupported => (ProcessedMarker::Unsupported, Ok(())),
            Classification::SkipStale | Classification::SkipFiltered => (ProcessedMarker::Filtered, Ok(())),
            Classification::TwapSlice => {
                if let Some(oid) = fill.oid {
                    let is_first_slice = !self.twap.is_twap_parent(&self.account.account_name, oid);
                    self.twap.record_slice(&self.account.account_name, oid, fill.size);
                    if is_first_slice {
                        log::info!("[{}] new TWAP order detected: oid={}", self.account.account_name, oid);
                    }
                }
                // A TWAP slice still resolves into open/add/close by the
                // same rules used outside the TWAP branch.
                let result = if fill.closed_pnl != 0.0 || fill.direction.contains("Close") {
                    self.handle_close(fill, classifier::is_full_close(fill.size, fill.start_position)).await
                } else {
                    self.handle_open_or_add(fill, true).await
                };
                (self.status_for(&result), result)
            }
            Classification::Open | Classification::Add => {
                let result = self.handle_open_or_add(fill, false).await;
                (self.status_for(&result), result)
            }
            Classification::CloseFull | Classification::ClosePartial => {
                let is_full = matches!(classification, Classification::CloseFull);
                let result = self.handle_close(fill, is_full).await;
                (self.status_for(&result), result)
            }
            Classification::ReverseFlip => {
                let result = self.handle_reverse_flip(fill).await;
                (self.status_for(&result), result)
            }
        };

        if let Err(e) = &result {
            log::warn!(
                "[{}] event {:?} dispatch failed: {}",
                self.account.account_name,
                fill.id,
                e
            );
        }

        if let Some(id) = fill.id {
            if let Err(e) = self.store.mark_fill(&self.account.account_name, id, status).await {
                log::error!("[{}] failed to mark fill {}: {}", self.account.account_name, id, e);
            }
        }
    }

    fn status_for(&self, result: &Result<(), MirrorError>) -> ProcessedMarker {
        match result {
            Ok(()) => ProcessedMarker::Processed,
            Err(MirrorError::SizeSkip { .. }) | Err(MirrorError::FilterSkip(_)) => ProcessedMarker::Filtered,
            Err(_) => ProcessedMarker::Failed,
        }
    }

    /// Handles an OPEN or ADD classification: size, place, wait, notify.
    async fn handle_open_or_add(&mut self, fill: &SourceFill, is_twap_slice: bool) -> Result<(), MirrorError> {
        let symbol = self
            .registry
            .destination_symbol(&fill.coin)
            .ok_or_else(|| MirrorError::FilterSkip(format!("{} not listed", fill.coin)))?
            .to_string();

        let quantity = calculate_copy_quantity(
            &self.account.sizing,
            &fill.coin,
            fill.size,
            fill.price,
            &self.registry,
        );
        if quantity <= 0.0 {
            let minimum = self.account.sizing.min_copy_value;
            self.notifier
                .deliver(&Notification::error(
                    "开仓失败：金额过小",
                    format!(
                        "computed notional below minimum for {} (min_copy_value={})",
                        fill.coin, minimum
                    ),
                    NotificationFields {
                        account: Some(self.account.account_name.clone()),
                        symbol: Some(symbol.clone()),
                        reason: Some("size_skip".to_string()),
                        ..Default::default()
                    },
                ))
                .await;
            return Err(MirrorError::SizeSkip {
                computed: 0.0,
                minimum,
            });
        }

        let leverage = self.account.leverage_for(&fill.coin);
        let venue = Arc::clone(&self.venue);
        let venue_for_leverage = Arc::clone(&venue);
        let symbol_for_leverage = symbol.clone();
        RetryPolicy::CRITICAL
            .run(RetryPolicy::classify_default, || {
                let venue = Arc::clone(&venue_for_leverage);
                let symbol = symbol_for_leverage.clone();
                async move { venue.set_leverage(&symbol, leverage).await }
            })
            .await?;

        let client_order_id = Uuid::new_v4().to_string();
        let placed = {
            let venue = Arc::clone(&venue);
            let symbol = symbol.clone();
            let side = fill.side;
            let client_order_id = client_order_id.clone();
            RetryPolicy::CRITICAL
                .run(RetryPolicy::classify_default, move || {
                    let venue = Arc::clone(&venue);
                    let symbol = symbol.clone();
                    let client_order_id = client_order_id.clone();
                    async move { venue.place_market_order(&symbol, side, quantity, &client_order_id).await }
                })
                .await?
        };

        self.wait_for_fill(&symbol, &placed.order_id).await;

        let (filled_qty, filled_price) = self.resolve_execution(&symbol, &client_order_id, quantity, fill.price).await;

        if is_twap_slice {
            if let Some(oid) = fill.oid {
                self.twap
                    .mark_slice_followed(&self.account.account_name, oid, filled_qty);
            }
        }

        if self.notified_orders.mark_if_new(&placed.order_id) {
            let progress = fill
                .oid
                .and_then(|oid| self.twap.progress(&self.account.account_name, oid))
                .map(|(followed, total, size)| format!("{}/{} (size {:.6})", followed, total, size));
            self.notifier
                .deliver(&Notification::success(
                    "✅ 开仓成功",
                    format!("{} {:?} {:.6} @ {:.2}", symbol, fill.side, filled_qty, filled_price),
                    NotificationFields {
                        account: Some(self.account.account_name.clone()),
                        symbol: Some(symbol),
                        side: Some(format!("{:?}", fill.side)),
                        size: Some(filled_qty),
                        price: Some(filled_price),
                        leverage: Some(leverage),
                        twap_progress: progress,
                        ..Default::default()
                    },
                ))
                .await;
        }

        Ok(())
    }

    async fn wait_for_fill(&self, symbol: &str, order_id: &str) {
        let deadline = tokio::time::Instant::now() + FILL_WAIT_CEILING;
        loop {
            match self.venue.query_order_status(symbol, order_id).await {
                Ok(status) => {
                    use crate::venue::OrderStatus::*;
                    if matches!(status, Filled | Cancelled | Rejected | NotFound) {
                        return;
                    }
                }
                Err(_) => return,
            }
            if tokio::time::Instant::now() >= deadline {
                return;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    /// Volume-weighted fill price/quantity from recent executions,
    /// falling back to the requested quantity and event price.
    async fn resolve_execution(&self, symbol: &str, order_id: &str, requested_qty: f64, fallback_price: f64) -> (f64, f64) {
        match self
            .venue
            .query_executions(symbol, order_id, EXECUTIONS_WINDOW_SECS)
            .await
        {
            Ok(execs) if !execs.is_empty() => {
                let total_qty: f64 = execs.iter().map(|e| e.exec_qty).sum();
                if total_qty <= 0.0 {
                    return (requested_qty, fallback_price);
                }
                let weighted_price: f64 = execs.iter().map(|e| e.exec_qty * e.exec_price).sum::<f64>() / total_qty;
                (total_qty, weighted_price)
            }
            _ => (requested_qty, fallback_price),
        }
    }

    /// Handles a CLOSE_PARTIAL or CLOSE_FULL classification.
    async fn handle_close(&mut self, fill: &SourceFill, is_full: bool) -> Result<(), MirrorError> {
        let symbol = self
            .registry
            .destination_symbol(&fill.coin)
            .ok_or_else(|| MirrorError::FilterSkip(format!("{} not listed", fill.coin)))?
            .to_string();

        let positions = self.venue.query_positions(&symbol).await?;
        if positions.is_empty() {
            return Ok(());
        }

        let mut any_succeeded = false;
        for position in positions {
            let target_qty = if is_full {
                None
            } else {
                Some(fill.size.min(position.size))
            };

            let close_result = self
                .close_one_position(&fill.coin, &symbol, position.side, target_qty, is_full)
                .await;

            match close_result {
                Ok(Some(result)) => {
                    any_succeeded = true;
                    self.notifier
                        .deliver(&Notification::close(
                            if is_full { "✅ 清仓成功" } else { "✅ 减仓成功" },
                            format!(
                                "{} {:?} filled {:.6}, realized pnl {:.4}",
                                symbol, position.side, result.filled_qty, result.realized_pnl
                            ),
                            NotificationFields {
                                account: Some(self.account.account_name.clone()),
                                symbol: Some(symbol.clone()),
                                side: Some(format!("{:?}", position.side)),
                                size: Some(result.filled_qty),
                                pnl: Some(result.realized_pnl),
                                ..Default::default()
                            },
                        ))
                        .await;
                }
                Ok(None) => {
                    // position-is-zero recovery: treat as success, no notification.
                    any_succeeded = true;
                }
                Err(e) => {
                    self.notifier
                        .deliver(&Notification::error(
                            if is_full { "❌ 清仓失败" } else { "❌ 减仓失败" },
                            format!("{} {:?}: {}", symbol, position.side, e),
                            NotificationFields {
                                account: Some(self.account.account_name.clone()),
                                symbol: Some(symbol.clone()),
                                side: Some(format!("{:?}", position.side)),
                                reason: Some(e.to_string()),
                                ..Default::default()
                            },
                        ))
                        .await;
                    return Err(e);
                }
            }
        }

        if any_succeeded {
            self.closed_symbols.insert(fill.coin.clone());
        }
        Ok(())
    }

    /// Closes one position, handling the minimum-lot promotion and the
    /// "position is zero" business-reject recovery path.
    async fn close_one_position(
        &self,
        coin: &str,
        symbol: &str,
        side: Side,
        requested_qty: Option<f64>,
        is_full: bool,
    ) -> Result<Option<crate::venue::ClosePositionResult>, MirrorError> {
        let min_qty = self.registry.lookup(coin).map(|i| i.min_quantity).unwrap_or(0.0);

        let (effective_qty, promoted) = match requested_qty {
            None => (None, false),
            Some(qty) if qty < min_qty => (None, true),
            Some(qty) => (Some(qty), false),
        };

        let venue = Arc::clone(&self.venue);
        let symbol_owned = symbol.to_string();
        let result = RetryPolicy::CRITICAL
            .run(RetryPolicy::classify_default, || {
                let venue = Arc::clone(&venue);
                let symbol = symbol_owned.clone();
                async move { venue.close_position(&symbol, side, effective_qty).await }
            })
            .await;

        match result {
            Ok(result) => {
                if promoted {
                    self.forced_liquidations.write(
                        symbol,
                        side,
                        LiquidationKind::Forced,
                        "reduce promoted to full close: below minimum lot".to_string(),
                        result.filled_qty,
                    );
                } else if is_full {
                    self.forced_liquidations.write(
                        symbol,
                        side,
                        LiquidationKind::Follow,
                        "source trader closed position".to_string(),
                        result.filled_qty,
                    );
                }
                Ok(Some(result))
            }
            Err(e) if e.is_position_is_zero() => {
                tokio::time::sleep(POSITION_ZERO_RECOVERY_DELAY).await;
                let positions = self.venue.query_positions(symbol).await?;
                let still_open = positions.iter().any(|p| p.side == side && p.size > 0.0);
                if still_open {
                    Err(e)
                } else {
                    Ok(None)
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Handles a REVERSE_FLIP classification.
    async fn handle_reverse_flip(&mut self, fill: &SourceFill) -> Result<(), MirrorError> {
        let symbol = self
            .registry
            .destination_symbol(&fill.coin)
            .ok_or_else(|| MirrorError::FilterSkip(format!("{} not listed", fill.coin)))?
            .to_string();

        let new_side = classifier::reverse_flip_new_side(&fill.direction)
            .ok_or_else(|| MirrorError::Internal("reverse-flip direction didn't resolve a side".to_string()))?;

        let quantity = calculate_copy_quantity(
            &self.account.sizing,
            &fill.coin,
            fill.size,
            fill.price,
            &self.registry,
        );

        let outcome = execute_reverse_flip(self.venue.as_ref(), &symbol, new_side, quantity).await;

        match &outcome {
            crate::reverse::ReverseFlipOutcome::Completed { closed_qty, opened_qty } => {
                self.closed_symbols.remove(&fill.coin);
                self.notifier
                    .deliver(&Notification::success(
                        "🔄 反手成功",
                        format!("{} closed {:.6}, opened {:.6} {:?}", symbol, closed_qty, opened_qty, new_side),
                        NotificationFields {
                            account: Some(self.account.account_name.clone()),
                            symbol: Some(symbol),
                            side: Some(format!("{:?}", new_side)),
                            size: Some(*opened_qty),
                            ..Default::default()
                        },
                    ))
                    .await;
                Ok(())
            }
            _ => {
                if let Some(err) = outcome.as_mirror_error() {
                    self.notifier
                        .deliver(&Notification::error(
                            "❌ 反手失败",
                            format!("{}: {}", symbol, err),
                            NotificationFields {
                                account: Some(self.account.account_name.clone()),
                                symbol: Some(symbol),
                                reason: Some(err.to_string()),
                                ..Default::default()
                            },
                        ))
                        .await;
                    Err(err)
                } else {
                    Ok(())
                }
            }
        }
    }

    async fn process_order(&mut self, order: &SourceOrder) {
        let result = match order.action {
            OrderAction::Placed => self.handle_place(order).await,
            OrderAction::Canceled => self.handle_cancel(order).await,
        };
        let status = match &result {
            Ok(()) => ProcessedMarker::Processed,
            Err(_) => ProcessedMarker::Failed,
        };
        if let Err(e) = &result {
            log::warn!("[{}] order event {:?} dispatch failed: {}", self.account.account_name, order.id, e);
        }
        if let Some(id) = order.id {
            if let Err(e) = self.store.mark_order(&self.account.account_name, id, status).await {
                log::error!("[{}] failed to mark order {}: {}", self.account.account_name, id, e);
            }
        }
    }

    /// Handles a resting-order placement event.
    async fn handle_place(&mut self, order: &SourceOrder) -> Result<(), MirrorError> {
        let symbol = self
            .registry
            .destination_symbol(&order.coin)
            .ok_or_else(|| MirrorError::FilterSkip(format!("{} not listed", order.coin)))?
            .to_string();

        let existing = self.venue.query_open_orders(&symbol).await?;
        if existing
            .iter()
            .any(|o| o.side == order.side && (o.price - order.price).abs() < 1e-9)
        {
            return Ok(());
        }

        let quantity = calculate_copy_quantity(
            &self.account.sizing,
            &order.coin,
            order.size,
            order.price,
            &self.registry,
        );
        if quantity <= 0.0 {
            return Err(MirrorError::SizeSkip {
                computed: 0.0,
                minimum: self.account.sizing.min_copy_value,
            });
        }

        let leverage = self.account.leverage_for(&order.coin);
        self.venue.set_leverage(&symbol, leverage).await?;

        let venue = Arc::clone(&self.venue);
        let symbol_owned = symbol.clone();
        let side = order.side;
        let price = order.price;
        let client_order_id = Uuid::new_v4().to_string();
        let placed = RetryPolicy::API
            .run(RetryPolicy::classify_default, || {
                let venue = Arc::clone(&venue);
                let symbol = symbol_owned.clone();
                let client_order_id = client_order_id.clone();
                async move { venue.place_limit_order(&symbol, side, quantity, price, &client_order_id).await }
            })
            .await?;

        self.order_id_map.insert(order.order_id, placed.order_id);
        Ok(())
    }

    /// Handles a resting-order cancellation event.
    async fn handle_cancel(&mut self, order: &SourceOrder) -> Result<(), MirrorError> {
        let symbol = self
            .registry
            .destination_symbol(&order.coin)
            .ok_or_else(|| MirrorError::FilterSkip(format!("{} not listed", order.coin)))?
            .to_string();

        let destination_order_id = match self.order_id_map.get(order.order_id) {
            Some(id) => Some(id.clone()),
            None => {
                let open_orders = self.venue.query_open_orders(&symbol).await?;
                open_orders
                    .into_iter()
                    .find(|o| o.side == order.side && (o.price - order.price).abs() < ORDER_PRICE_MATCH_TOLERANCE)
                    .map(|o| o.order_id)
            }
        };

        let Some(destination_order_id) = destination_order_id else {
            return Ok(());
        };

        let venue = Arc::clone(&self.venue);
        let symbol_owned = symbol.clone();
        let order_id_owned = destination_order_id.clone();
        RetryPolicy::API
            .run(RetryPolicy::classify_default, || {
                let venue = Arc::clone(&venue);
                let symbol = symbol_owned.clone();
                let order_id = order_id_owned.clone();
                async move { venue.cancel_order(&symbol, &order_id).await }
            })
            .await?;

        self.order_id_map.remove(order.order_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OrderAgeFilter, VenueMode};
    use crate::notify::LogSink;
    use crate::registry::SymbolInfo;
    use crate::sizing::{SizingMode, SizingPolicy};
    use crate::store::InMemoryEventStore;
    use crate::venue::SimVenue;
    use std::collections::HashMap;

    fn registry() -> SymbolRegistry {
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

    fn account() -> AccountConfig {
        AccountConfig {
            account_name: "acct1".into(),
            api_key: "k".into(),
            api_secret: "s".into(),
            venue_mode: VenueMode::Demo,
            source_wallet_address: "0xabc".into(),
            enabled: true,
            allowlist_enabled: false,
            allowlist: vec![],
            sizing: SizingPolicy {
                mode: SizingMode::Ratio,
                fixed_amount: 0.0,
                base_margin_amount: 0.1,
                min_copy_value: 10.0,
                force_min_amount_on_small_order: false,
            },
            leverage_overrides: HashMap::new(),
            default_leverage: 20,
            order_age_filter: OrderAgeFilter {
                enabled: false,
                max_age_hours: 0.0,
            },
            notification_webhook: None,
        }
    }

    fn make_engine() -> (MirrorEngine, Arc<SimVenue>, Arc<InMemoryEventStore>) {
        let venue = Arc::new(SimVenue::new());
        let store = Arc::new(InMemoryEventStore::new());
        let notifier = Arc::new(LogSink);
        let engine = MirrorEngine::new(
            account(),
            registry(),
            venue.clone(),
            store.clone(),
            notifier,
            ForcedLiquidationMemo::new(),
        );
        (engine, venue, store)
    }

    fn open_fill() -> SourceFill {
        SourceFill {
            id: Some(1),
            tx_hash: "0xabc".into(),
            timestamp: chrono::Utc::now(),
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
    async fn open_handler_places_market_order_and_notifies_once() {
        let (mut engine, venue, _store) = make_engine();
        let fill = open_fill();
        engine.handle_open_or_add(&fill, false).await.unwrap();
        let positions = venue.query_positions("BTCUSDT").await.unwrap();
        assert_eq!(positions.len(), 1);
        assert!((positions[0].size - 0.100).abs() < 1e-9);
    }

    /// A coin in the ClosedSymbolSet is treated as having no position
    /// even if a racy venue query still shows the old one, so the next
    /// fill classifies as a fresh Open; seeing that Open clears the flag.
    #[tokio::test]
    async fn closed_symbol_forces_fresh_open_despite_stale_position_query() {
        let (mut engine, venue, _store) = make_engine();
        engine.closed_symbols.insert("BTC".into());
        venue.seed_position(crate::events::DestinationPosition {
            symbol: "BTCUSDT".into(),
            side: Side::Buy,
            size: 0.05,
            avg_price: 50000.0,
        });

        engine.process_fill(&open_fill()).await;

        assert!(!engine.closed_symbols.contains("BTC"));
    }

    /// Processing the same fill id twice through the full engine loop
    /// results in exactly one venue order, because the second pass sees a
    /// terminal ProcessedMarker and is never reclassified.
    #[tokio::test]
    async fn at_most_once_dispatch_across_restarts() {
        let (mut engine, venue, store) = make_engine();
        store.append_fill("acct1", open_fill()).await.unwrap();

        let pending = store.pending_fills("acct1").await.unwrap();
        engine.process_fill(&pending[0]).await;

        // Simulate a restart: a fresh engine instance re-reads the store,
        // but the fill is no longer pending because its marker is terminal.
        let pending_after = store.pending_fills("acct1").await.unwrap();
        assert!(pending_after.is_empty());

        let positions = venue.query_positions("BTCUSDT").await.unwrap();
        assert_eq!(positions.len(), 1);
    }

    /// Reducing below the minimum lot is promoted to a full close and
    /// writes a forced-liquidation memo.
    #[tokio::test]
    async fn reduce_below_minimum_lot_promotes_to_full_close() {
        let venue = Arc::new(SimVenue::new());
        let store = Arc::new(InMemoryEventStore::new());
        let notifier = Arc::new(LogSink);
        let mut registry = SymbolRegistry::new();
        registry.insert(
            "SOL",
            SymbolInfo {
                destination_symbol: "SOLUSDT".into(),
                quantity_step: 0.1,
                min_quantity: 0.1,
                price_tick: 0.01,
            },
        );
        venue.seed_position(crate::events::DestinationPosition {
            symbol: "SOLUSDT".into(),
            side: Side::Buy,
            size: 0.5,
            avg_price: 150.0,
        });
        let forced = ForcedLiquidationMemo::new();
        let mut engine = MirrorEngine::new(account(), registry, venue.clone(), store, notifier, forced.clone());

        let mut fill = open_fill();
        fill.coin = "SOL".into();
        fill.size = 0.05;
        fill.start_position = 0.5;
        fill.closed_pnl = 5.0;
        fill.direction = "Close Long".into();

        engine.handle_close(&fill, false).await.unwrap();

        let positions = venue.query_positions("SOLUSDT").await.unwrap();
        assert!(positions.is_empty());
        let memo = forced.read("SOLUSDT", Side::Buy).expect("memo written");
        assert_eq!(memo.kind, LiquidationKind::Forced);
    }

    /// A plain reduce — not a full close, not promoted by the minimum-lot
    /// floor — writes no forced-liquidation memo at all.
    #[tokio::test]
    async fn plain_reduce_writes_no_forced_liquidation_memo() {
        let venue = Arc::new(SimVenue::new());
        let store = Arc::new(InMemoryEventStore::new());
        let notifier = Arc::new(LogSink);
        let mut registry = SymbolRegistry::new();
        registry.insert(
            "SOL",
            SymbolInfo {
                destination_symbol: "SOLUSDT".into(),
                quantity_step: 0.1,
                min_quantity: 0.1,
                price_tick: 0.01,
            },
        );
        venue.seed_position(crate::events::DestinationPosition {
            symbol: "SOLUSDT".into(),
            side: Side::Buy,
            size: 2.0,
            avg_price: 150.0,
        });
        let forced = ForcedLiquidationMemo::new();
        let mut engine = MirrorEngine::new(account(), registry, venue.clone(), store, notifier, forced.clone());

        let mut fill = open_fill();
        fill.coin = "SOL".into();
        fill.size = 1.0;
        fill.start_position = 2.0;
        fill.closed_pnl = 5.0;
        fill.direction = "Close Long".into();

        engine.handle_close(&fill, false).await.unwrap();

        let positions = venue.query_positions("SOLUSDT").await.unwrap();
        assert_eq!(positions.len(), 1);
        assert!(forced.read("SOLUSDT", Side::Buy).is_none());
    }

    /// Position-is-zero recovery reports success with no failure
    /// notification. The venue's close call always rejects with
    /// "position is zero"; since the destination's own position query
    /// (queried during recovery) already shows flat, the handler treats
    /// this as success rather than propagating the error.
    #[tokio::test]
    async fn position_is_zero_recovers_as_success() {
        let (engine, venue, _store) = make_engine();
        venue
            .fail_close_with_position_is_zero
            .store(true, std::sync::atomic::Ordering::SeqCst);

        let result = engine
            .close_one_position("BTC", "BTCUSDT", Side::Buy, None, true)
            .await;
        assert_eq!(result.unwrap(), None);
    }
}
