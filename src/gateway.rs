// ===============================
// src/gateway.rs (venue trait + paper venue)
// ===============================
use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::domain::{LiveOrder, OrderKind, OrderRequest, Position, Side};
use crate::instrument::InstrumentSpec;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("network error: {0}")]
    Network(String),
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("api error: {0}")]
    Api(String),
    #[error("order rejected: {0}")]
    Rejected(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("symbol not found: {0}")]
    SymbolNotFound(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(s) => GatewayError::Http { status: s.as_u16(), body: e.to_string() },
            None if e.is_decode() => GatewayError::Parse(e.to_string()),
            None => GatewayError::Network(e.to_string()),
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// One authenticated account on the venue. Every call is a single
/// request/response; timeouts belong to the implementation.
#[async_trait]
pub trait Gateway: Send + Sync {
    fn account(&self) -> &str;

    async fn equity(&self) -> GatewayResult<Decimal>;

    /// All open orders of the account (any symbol).
    async fn open_orders(&self) -> GatewayResult<Vec<LiveOrder>>;

    async fn position(&self, symbol: &str) -> GatewayResult<Option<Position>>;

    /// Returns the venue order id.
    async fn submit_order(&self, req: &OrderRequest) -> GatewayResult<String>;

    async fn cancel_all(&self, symbol: &str) -> GatewayResult<()>;

    async fn cancel_order(&self, order_id: &str) -> GatewayResult<()>;

    async fn instrument_spec(&self, symbol: &str) -> GatewayResult<InstrumentSpec>;
}

#[derive(Debug, Default)]
struct PaperBook {
    equity: Decimal,
    orders: Vec<LiveOrder>,
    position: Option<Position>,
    next_id: u64,
    spec: Option<InstrumentSpec>,
    reject_remaining: u32,
    reject_kind: Option<OrderKind>,
    fail_reads: bool,
    fail_equity: bool,
    /// bulk cancel "succeeds" but leaves orders behind
    sticky_cancel_all: bool,
    submitted: Vec<OrderRequest>,
}

/// In-memory venue. Resting orders never fill on their own; market orders
/// fill immediately against the position. Used for dry runs and tests.
pub struct PaperGateway {
    account: String,
    symbol: String,
    book: Mutex<PaperBook>,
}

impl PaperGateway {
    pub fn new(account: &str, symbol: &str, equity: Decimal) -> Self {
        let book = PaperBook { equity, spec: Some(InstrumentSpec::default()), ..Default::default() };
        Self { account: account.to_string(), symbol: symbol.to_string(), book: Mutex::new(book) }
    }

    pub async fn set_equity(&self, equity: Decimal) { self.book.lock().await.equity = equity; }

    pub async fn set_instrument_spec(&self, spec: Option<InstrumentSpec>) { self.book.lock().await.spec = spec; }

    pub async fn set_position(&self, position: Option<Position>) { self.book.lock().await.position = position; }

    /// Next `n` submissions (of `kind`, or any kind) are rejected.
    pub async fn reject_next(&self, n: u32, kind: Option<OrderKind>) {
        let mut b = self.book.lock().await;
        b.reject_remaining = n;
        b.reject_kind = kind;
    }

    pub async fn fail_reads(&self, fail: bool) { self.book.lock().await.fail_reads = fail; }

    pub async fn fail_equity(&self, fail: bool) { self.book.lock().await.fail_equity = fail; }

    pub async fn sticky_cancel_all(&self, sticky: bool) { self.book.lock().await.sticky_cancel_all = sticky; }

    /// Places an order directly on the book, bypassing the submit path.
    pub async fn inject_order(&self, order: LiveOrder) { self.book.lock().await.orders.push(order); }

    pub async fn resting(&self) -> Vec<LiveOrder> { self.book.lock().await.orders.clone() }

    pub async fn current_position(&self) -> Option<Position> { self.book.lock().await.position }

    pub async fn submitted(&self) -> Vec<OrderRequest> { self.book.lock().await.submitted.clone() }

    /// Fills `qty` of a resting order, moving it into the position.
    /// Returns false when the order is unknown.
    pub async fn fill(&self, order_id: &str, qty: Decimal) -> bool {
        let mut b = self.book.lock().await;
        let Some(idx) = b.orders.iter().position(|o| o.order_id == order_id) else { return false };
        let qty = qty.min(b.orders[idx].size);
        let side = b.orders[idx].side;
        b.orders[idx].size -= qty;
        if b.orders[idx].size.is_zero() {
            b.orders.remove(idx);
        }
        apply_fill(&mut b.position, side, qty);
        true
    }
}

fn apply_fill(position: &mut Option<Position>, side: Side, qty: Decimal) {
    let signed = |p: &Position| match p.side { Side::Buy => p.size, Side::Sell => -p.size };
    let current = position.as_ref().map(signed).unwrap_or(Decimal::ZERO);
    let delta = match side { Side::Buy => qty, Side::Sell => -qty };
    let next = current + delta;
    *position = if next.is_zero() {
        None
    } else if next > Decimal::ZERO {
        Some(Position { side: Side::Buy, size: next })
    } else {
        Some(Position { side: Side::Sell, size: -next })
    };
}

#[async_trait]
impl Gateway for PaperGateway {
    fn account(&self) -> &str { &self.account }

    async fn equity(&self) -> GatewayResult<Decimal> {
        let b = self.book.lock().await;
        if b.fail_equity {
            return Err(GatewayError::Network("paper: equity unavailable".into()));
        }
        Ok(b.equity)
    }

    async fn open_orders(&self) -> GatewayResult<Vec<LiveOrder>> {
        let b = self.book.lock().await;
        if b.fail_reads {
            return Err(GatewayError::Network("paper: open orders unavailable".into()));
        }
        Ok(b.orders.clone())
    }

    async fn position(&self, symbol: &str) -> GatewayResult<Option<Position>> {
        let b = self.book.lock().await;
        if b.fail_reads {
            return Err(GatewayError::Network("paper: position unavailable".into()));
        }
        Ok(if symbol.eq_ignore_ascii_case(&self.symbol) { b.position } else { None })
    }

    async fn submit_order(&self, req: &OrderRequest) -> GatewayResult<String> {
        let mut b = self.book.lock().await;
        b.submitted.push(req.clone());

        let kind_matches = b.reject_kind.map(|k| k == req.kind).unwrap_or(true);
        if b.reject_remaining > 0 && kind_matches {
            b.reject_remaining -= 1;
            return Err(GatewayError::Rejected("paper: insufficientAvailableFunds".into()));
        }

        if req.kind == OrderKind::Market {
            // reduce-only: never flip through zero
            let held = Position::exposure_for(b.position.as_ref(), req.side.opposite());
            let qty = if req.reduce_only { req.size.min(held) } else { req.size };
            apply_fill(&mut b.position, req.side, qty);
            b.next_id += 1;
            return Ok(format!("{}-MKT-{}", self.account, b.next_id));
        }

        let price = req.price.ok_or_else(|| GatewayError::Rejected("paper: price required".into()))?;
        b.next_id += 1;
        let order_id = format!("{}-{}", self.account, b.next_id);
        b.orders.push(LiveOrder {
            order_id: order_id.clone(),
            symbol: req.symbol.clone(),
            side: req.side,
            kind: req.kind,
            price,
            size: req.size,
        });
        Ok(order_id)
    }

    async fn cancel_all(&self, symbol: &str) -> GatewayResult<()> {
        let mut b = self.book.lock().await;
        if !b.sticky_cancel_all {
            b.orders.retain(|o| !o.symbol.eq_ignore_ascii_case(symbol));
        }
        Ok(())
    }

    async fn cancel_order(&self, order_id: &str) -> GatewayResult<()> {
        let mut b = self.book.lock().await;
        let before = b.orders.len();
        b.orders.retain(|o| o.order_id != order_id);
        if b.orders.len() == before {
            return Err(GatewayError::Api(format!("paper: unknown order {order_id}")));
        }
        Ok(())
    }

    async fn instrument_spec(&self, symbol: &str) -> GatewayResult<InstrumentSpec> {
        let b = self.book.lock().await;
        match b.spec {
            Some(spec) if symbol.eq_ignore_ascii_case(&self.symbol) => Ok(spec),
            _ => Err(GatewayError::SymbolNotFound(symbol.to_string())),
        }
    }
}
