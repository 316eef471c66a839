// venue.rs — Destination Venue Adapter.
//
// An `ExchangeClient`-shaped trait narrowed to the set of operations a
// mirror engine needs: position/order/execution queries, market/limit
// order placement, cancellation, position close, leverage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MirrorError;
use crate::events::{DestinationPosition, Side};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenOrder {
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    pub price: f64,
    pub quantity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Filled,
    Cancelled,
    Rejected,
    Open,
    NotFound,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacedOrder {
    pub order_id: String,
    pub status: OrderStatus,
}

/// One fill line returned by a query-executions call (`exec_qty`,
/// `exec_price`, `order_link_id`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub order_link_id: String,
    pub exec_qty: f64,
    pub exec_price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosePositionResult {
    pub filled_qty: f64,
    pub realized_pnl: f64,
}

/// Typed operations against the destination venue. One instance is owned
/// by exactly one account's worker and is never shared
/// across accounts — it holds that account's API credentials.
#[async_trait]
pub trait DestinationVenue: Send + Sync {
    async fn query_positions(&self, symbol: &str) -> Result<Vec<DestinationPosition>, MirrorError>;
    async fn query_open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>, MirrorError>;
    async fn query_executions(
        &self,
        symbol: &str,
        client_order_id: &str,
        window_secs: i64,
    ) -> Result<Vec<Execution>, MirrorError>;
    async fn query_order_status(&self, symbol: &str, order_id: &str) -> Result<OrderStatus, MirrorError>;

    /// `client_order_id` is generated fresh by the caller for each
    /// dispatch attempt, so a retried attempt tags the destination with
    /// the same id and `query_executions` can find it even across
    /// retries.
    async fn place_market_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: f64,
        client_order_id: &str,
    ) -> Result<PlacedOrder, MirrorError>;

    async fn place_limit_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: f64,
        price: f64,
        client_order_id: &str,
    ) -> Result<PlacedOrder, MirrorError>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), MirrorError>;

    /// `quantity = None` means "close the entire position" via the
    /// wire-level full-close flag.
    async fn close_position(
        &self,
        symbol: &str,
        side: Side,
        quantity: Option<f64>,
    ) -> Result<ClosePositionResult, MirrorError>;

    /// Idempotent: calling twice with the same leverage is a no-op.
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), MirrorError>;
}

/// In-memory test double (grounded on `SimExchange`). Lets the mirror
/// engine and its handlers be exercised without a live venue connection.
#[derive(Default)]
pub struct SimVenue {
    positions: std::sync::Mutex<Vec<DestinationPosition>>,
    open_orders: std::sync::Mutex<Vec<OpenOrder>>,
    executions: std::sync::Mutex<Vec<(String, Vec<Execution>)>>,
    next_order_id: std::sync::atomic::AtomicU64,
    pub fail_close_with_position_is_zero: std::sync::atomic::AtomicBool,
}

impl SimVenue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_position(&self, pos: DestinationPosition) {
        self.positions.lock().unwrap().push(pos);
    }

    pub fn seed_execution(&self, client_order_id: &str, execs: Vec<Execution>) {
        self.executions
            .lock()
            .unwrap()
            .push((client_order_id.to_string(), execs));
    }

    fn next_id(&self) -> String {
        let id = self
            .next_order_id
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        format!("sim-{}", id)
    }
}

#[async_trait]
impl DestinationVenue for SimVenue {
    async fn query_positions(&self, symbol: &str) -> Result<Vec<DestinationPosition>, MirrorError> {
        Ok(self
            .positions
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.symbol == symbol && p.size > 0.0)
            .cloned()
            .collect())
    }

    async fn query_open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>, MirrorError> {
        Ok(self
            .open_orders
            .lock()
            .unwrap()
            .iter()
            .filter(|o| o.symbol == symbol)
            .cloned()
            .collect())
    }

    async fn query_executions(
        &self,
        _symbol: &str,
        client_order_id: &str,
        _window_secs: i64,
    ) -> Result<Vec<Execution>, MirrorError> {
        Ok(self
            .executions
            .lock()
            .unwrap()
            .iter()
            .find(|(id, _)| id == client_order_id)
            .map(|(_, execs)| execs.clone())
            .unwrap_or_default())
    }

    async fn query_order_status(&self, _symbol: &str, _order_id: &str) -> Result<OrderStatus, MirrorError> {
        Ok(OrderStatus::Filled)
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: f64,
        client_order_id: &str,
    ) -> Result<PlacedOrder, MirrorError> {
        let order_id = if client_order_id.is_empty() {
            self.next_id()
        } else {
            client_order_id.to_string()
        };
        let mut positions = self.positions.lock().unwrap();
        if let Some(existing) = positions
            .iter_mut()
            .find(|p| p.symbol == symbol && p.side == side)
        {
            existing.size += quantity;
        } else {
            positions.push(DestinationPosition {
                symbol: symbol.to_string(),
                side,
                size: quantity,
                avg_price: 0.0,
            });
        }
        Ok(PlacedOrder {
            order_id,
            status: OrderStatus::Filled,
        })
    }

    async fn place_limit_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: f64,
        price: f64,
        client_order_id: &str,
    ) -> Result<PlacedOrder, MirrorError> {
        let order_id = if client_order_id.is_empty() {
            self.next_id()
        } else {
            client_order_id.to_string()
        };
        self.open_orders.lock().unwrap().push(OpenOrder {
            order_id: order_id.clone(),
            symbol: symbol.to_string(),
            side,
            price,
            quantity,
        });
        Ok(PlacedOrder {
            order_id,
            status: OrderStatus::Open,
        })
    }

    async fn cancel_order(&self, _symbol: &str, order_id: &str) -> Result<(), MirrorError> {
        self.open_orders.lock().unwrap().retain(|o| o.order_id != order_id);
        Ok(())
    }

    async fn close_position(
        &self,
        symbol: &str,
        side: Side,
        quantity: Option<f64>,
    ) -> Result<ClosePositionResult, MirrorError> {
        if self
            .fail_close_with_position_is_zero
            .load(std::sync::atomic::Ordering::SeqCst)
        {
            return Err(MirrorError::VenueBusinessReject {
                code: MirrorError::POSITION_IS_ZERO.to_string(),
                message: "position is zero".to_string(),
            });
        }
        let mut positions = self.positions.lock().unwrap();
        let Some(pos) = positions
            .iter_mut()
            .find(|p| p.symbol == symbol && p.side == side)
        else {
            return Ok(ClosePositionResult {
                filled_qty: 0.0,
                realized_pnl: 0.0,
            });
        };
        let close_qty = quantity.unwrap_or(pos.size).min(pos.size);
        pos.size -= close_qty;
        Ok(ClosePositionResult {
            filled_qty: close_qty,
            realized_pnl: 0.0,
        })
    }

    async fn set_leverage(&self, _symbol: &str, _leverage: u32) -> Result<(), MirrorError> {
        Ok(())
    }
}

/// REST adapter against a generic CEX-style API (grounded on
/// `LiveExchange`'s reqwest usage, but against a generic contract rather
/// than Hyperliquid's signed L1 actions — the real venue's wire format is
/// the external collaborator's concern).
pub struct HttpVenue {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    api_secret: String,
}

impl HttpVenue {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    fn signed_request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header("X-API-KEY", &self.api_key)
            .header("X-API-SECRET", &self.api_secret)
    }
}

#[async_trait]
impl DestinationVenue for HttpVenue {
    async fn query_positions(&self, symbol: &str) -> Result<Vec<DestinationPosition>, MirrorError> {
        let resp = self
            .signed_request(reqwest::Method::GET, "/v1/positions")
            .query(&[("symbol", symbol)])
            .send()
            .await
            .map_err(|e| MirrorError::VenueTransient(e.to_string()))?;
        resp.json()
            .await
            .map_err(|e| MirrorError::Internal(format!("bad positions response: {}", e)))
    }

    async fn query_open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>, MirrorError> {
        let resp = self
            .signed_request(reqwest::Method::GET, "/v1/open-orders")
            .query(&[("symbol", symbol)])
            .send()
            .await
            .map_err(|e| MirrorError::VenueTransient(e.to_string()))?;
        resp.json()
            .await
            .map_err(|e| MirrorError::Internal(format!("bad open-orders response: {}", e)))
    }

    async fn query_executions(
        &self,
        symbol: &str,
        client_order_id: &str,
        window_secs: i64,
    ) -> Result<Vec<Execution>, MirrorError> {
        let start_ms = (Utc::now() - chrono::Duration::seconds(window_secs)).timestamp_millis();
        let resp = self
            .signed_request(reqwest::Method::GET, "/v1/executions")
            .query(&[
                ("symbol", symbol.to_string()),
                ("orderLinkId", client_order_id.to_string()),
                ("startTime", start_ms.to_string()),
            ])
            .send()
            .await
            .map_err(|e| MirrorError::VenueTransient(e.to_string()))?;
        resp.json()
            .await
            .map_err(|e| MirrorError::Internal(format!("bad executions response: {}", e)))
    }

    async fn query_order_status(&self, symbol: &str, order_id: &str) -> Result<OrderStatus, MirrorError> {
        let resp = self
            .signed_request(reqwest::Method::GET, "/v1/order")
            .query(&[("symbol", symbol), ("orderId", order_id)])
            .send()
            .await
            .map_err(|e| MirrorError::VenueTransient(e.to_string()))?;
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| MirrorError::Internal(format!("bad order response: {}", e)))?;
        match body.get("status").and_then(|v| v.as_str()) {
            Some("Filled") => Ok(OrderStatus::Filled),
            Some("Cancelled") => Ok(OrderStatus::Cancelled),
            Some("Rejected") => Ok(OrderStatus::Rejected),
            Some(_) => Ok(OrderStatus::Open),
            None => Ok(OrderStatus::NotFound),
        }
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: f64,
        client_order_id: &str,
    ) -> Result<PlacedOrder, MirrorError> {
        let body = serde_json::json!({
            "symbol": symbol,
            "side": side,
            "type": "market",
            "quantity": float_to_wire(quantity),
            "clientOrderId": client_order_id,
        });
        self.post_order(body).await
    }

    async fn place_limit_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: f64,
        price: f64,
        client_order_id: &str,
    ) -> Result<PlacedOrder, MirrorError> {
        let body = serde_json::json!({
            "symbol": symbol,
            "side": side,
            "type": "limit",
            "quantity": float_to_wire(quantity),
            "price": float_to_wire(price),
            "clientOrderId": client_order_id,
        });
        self.post_order(body).await
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), MirrorError> {
        self.signed_request(reqwest::Method::DELETE, "/v1/order")
            .query(&[("symbol", symbol), ("orderId", order_id)])
            .send()
            .await
            .map_err(|e| MirrorError::VenueTransient(e.to_string()))?;
        Ok(())
    }

    async fn close_position(
        &self,
        symbol: &str,
        side: Side,
        quantity: Option<f64>,
    ) -> Result<ClosePositionResult, MirrorError> {
        let body = match quantity {
            Some(q) => serde_json::json!({ "symbol": symbol, "side": side, "quantity": float_to_wire(q) }),
            None => serde_json::json!({ "symbol": symbol, "side": side, "fullClose": true }),
        };
        let resp = self
            .signed_request(reqwest::Method::POST, "/v1/close-position")
            .json(&body)
            .send()
            .await
            .map_err(|e| MirrorError::VenueTransient(e.to_string()))?;
        resp.json()
            .await
            .map_err(|e| MirrorError::Internal(format!("bad close response: {}", e)))
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), MirrorError> {
        self.signed_request(reqwest::Method::POST, "/v1/leverage")
            .json(&serde_json::json!({ "symbol": symbol, "leverage": leverage }))
            .send()
            .await
            .map_err(|e| MirrorError::VenueTransient(e.to_string()))?;
        Ok(())
    }
}

impl HttpVenue {
    async fn post_order(&self, body: serde_json::Value) -> Result<PlacedOrder, MirrorError> {
        let resp = self
            .signed_request(reqwest::Method::POST, "/v1/order")
            .json(&body)
            .send()
            .await
            .map_err(|e| MirrorError::VenueTransient(e.to_string()))?;
        let status = resp.status();
        let value: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| MirrorError::Internal(format!("bad order response: {}", e)))?;
        if let Some(err) = value.get("error").and_then(|v| v.as_str()) {
            if err.to_lowercase().contains("rate limited") {
                return Err(MirrorError::VenueRateLimited(err.to_string()));
            }
            return Err(MirrorError::VenueBusinessReject {
                code: value
                    .get("code")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown")
                    .to_string(),
                message: err.to_string(),
            });
        }
        if !status.is_success() {
            return Err(MirrorError::VenueTransient(format!("http {}", status)));
        }
        let order_id = value
            .get("orderId")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        Ok(PlacedOrder {
            order_id,
            status: OrderStatus::Open,
        })
    }
}

/// Float-to-wire-string normalization so order payloads don't carry
/// binary floating-point noise.
pub fn float_to_wire(value: f64) -> String {
    if value == value.trunc() {
        format!("{:.1}", value)
    } else {
        let s = format!("{:.8}", value);
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sim_venue_market_order_creates_position() {
        let venue = SimVenue::new();
        venue
            .place_market_order("BTCUSDT", Side::Buy, 0.1, "")
            .await
            .unwrap();
        let positions = venue.query_positions("BTCUSDT").await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].size, 0.1);
    }

    #[tokio::test]
    async fn sim_venue_close_position_zeroes_out() {
        let venue = SimVenue::new();
        venue.seed_position(DestinationPosition {
            symbol: "BTCUSDT".into(),
            side: Side::Buy,
            size: 0.05,
            avg_price: 49000.0,
        });
        let result = venue
            .close_position("BTCUSDT", Side::Buy, None)
            .await
            .unwrap();
        assert_eq!(result.filled_qty, 0.05);
        let positions = venue.query_positions("BTCUSDT").await.unwrap();
        assert!(positions.is_empty());
    }

    #[tokio::test]
    async fn sim_venue_can_simulate_position_is_zero_reject() {
        let venue = SimVenue::new();
        venue
            .fail_close_with_position_is_zero
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let err = venue.close_position("BTCUSDT", Side::Buy, None).await;
        assert!(matches!(err, Err(e) if e.is_position_is_zero()));
    }

    #[test]
    fn float_to_wire_trims_trailing_zeros() {
        assert_eq!(float_to_wire(0.100), "0.1");
        assert_eq!(float_to_wire(5.0), "5.0");
        assert_eq!(float_to_wire(0.00123000), "0.00123");
    }
}
