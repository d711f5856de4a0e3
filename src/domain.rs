// ===============================
// src/domain.rs
// ===============================
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side { Buy, Sell }

impl Side {
    pub fn opposite(&self) -> Side { match self { Side::Buy => Side::Sell, Side::Sell => Side::Buy } }
    pub fn as_str(&self) -> &'static str { match self { Side::Buy => "buy", Side::Sell => "sell" } }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Which part of the grid an order plays. Persisted as `type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderRole { Limit, Stop }

impl OrderRole {
    pub fn as_str(&self) -> &'static str { match self { OrderRole::Limit => "limit", OrderRole::Stop => "stop" } }
}

impl fmt::Display for OrderRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Order type as the venue understands it. `Other` covers venue types the
/// grid never places itself (take-profit, trailing stop, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderKind { Limit, Stop, Market, Other }

/// An order the grid wants resting on the book. Price and size are already
/// rounded to the instrument steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetOrder {
    pub role: OrderRole,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub reduce_only: bool,
}

impl TargetOrder {
    pub fn to_request(&self, symbol: &str) -> OrderRequest {
        OrderRequest {
            symbol: symbol.to_string(),
            kind: match self.role { OrderRole::Limit => OrderKind::Limit, OrderRole::Stop => OrderKind::Stop },
            side: self.side,
            size: self.size,
            price: Some(self.price),
            reduce_only: self.reduce_only,
        }
    }
}

/// What was actually submitted and accepted. The only state that survives restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    #[serde(rename = "id")]
    pub exchange_order_id: String,
    #[serde(rename = "type")]
    pub role: OrderRole,
    pub price: Decimal,
    pub size: Decimal,
}

/// Snapshot of a resting order as reported by the venue.
/// `price` is the limit price for limits and the trigger for stops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveOrder {
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    pub kind: OrderKind,
    pub price: Decimal,
    pub size: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position { pub side: Side, pub size: Decimal }

impl Position {
    /// Exposure that a grid entering on `side` has already accumulated.
    /// A position on the other side is not grid exposure.
    pub fn exposure_for(pos: Option<&Position>, side: Side) -> Decimal {
        match pos {
            Some(p) if p.side == side => p.size.abs(),
            _ => Decimal::ZERO,
        }
    }
}

/// Parameters of a single submit call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub kind: OrderKind,
    pub side: Side,
    pub size: Decimal,
    /// Limit price, stop trigger, or `None` for market orders.
    pub price: Option<Decimal>,
    pub reduce_only: bool,
}

impl OrderRequest {
    pub fn market_close(symbol: &str, pos: &Position) -> Self {
        Self {
            symbol: symbol.to_string(),
            kind: OrderKind::Market,
            side: pos.side.opposite(),
            size: pos.size.abs(),
            price: None,
            reduce_only: true,
        }
    }
}

/// Health of an account's grid at one point in time. Recomputed every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountState { Healthy, Missing, PriceDrifted, SizeDrifted, PartiallyFilled }

impl AccountState {
    pub const ALL: [AccountState; 5] = [
        AccountState::Healthy,
        AccountState::Missing,
        AccountState::PriceDrifted,
        AccountState::SizeDrifted,
        AccountState::PartiallyFilled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AccountState::Healthy => "healthy",
            AccountState::Missing => "missing",
            AccountState::PriceDrifted => "price_drifted",
            AccountState::SizeDrifted => "size_drifted",
            AccountState::PartiallyFilled => "partially_filled",
        }
    }
}

impl fmt::Display for AccountState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

// Audit events (JSONL recorder)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    Decision { ts: String, account: String, state: AccountState, reason: Option<String> },
    Placed { ts: String, account: String, role: OrderRole, id: String, price: Decimal, size: Decimal },
    Rejected { ts: String, account: String, role: OrderRole, price: Decimal, size: Decimal, error: String },
    Rebuilt { ts: String, account: String, orders: Vec<OrderRecord> },
    Note(String),
}
