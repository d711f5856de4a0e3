// ===============================
// src/executor.rs (tear-down / rebuild)
// ===============================
//
// Urutan rebuild per akun:
// 1) cancel all (bulk) + "sniper" cancel satu per satu untuk sisa order symbol
// 2) baca posisi; saat cold start posisi ditutup market reduce-only
// 3) hitung target grid (netting terhadap posisi)
// 4) submit limit dulu, lalu stop yang size-nya = limit yang diterima + posisi
// 5) commit: ganti record akun di state map lalu simpan ke store
//
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::{AccountConfig, GridParams};
use crate::domain::{Event, OrderRecord, OrderRequest, OrderRole, Position, TargetOrder};
use crate::error::GridError;
use crate::gateway::Gateway;
use crate::grid::build_target_grid;
use crate::instrument::InstrumentSpec;
use crate::metrics::{ORDERS_PLACED, ORDERS_REJECTED, PERSIST_FAILURES};
use crate::recorder::now_ts;
use crate::state::{GridState, StateStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildMode {
    /// Per-tick rebuild: the open position is kept and netted.
    Routine,
    /// Startup reset: the open position is closed at market first.
    ColdStart,
}

/// Execution context for one account.
pub struct Executor<'a> {
    pub gateway: &'a dyn Gateway,
    pub symbol: &'a str,
    pub config: &'a AccountConfig,
    pub spec: &'a InstrumentSpec,
    pub params: &'a GridParams,
    pub recorder: Option<&'a mpsc::Sender<Event>>,
}

impl<'a> Executor<'a> {
    fn record(&self, ev: Event) {
        if let Some(tx) = self.recorder {
            let _ = tx.try_send(ev);
        }
    }

    /// Bulk cancel is not guaranteed complete, so every order still open on
    /// the symbol afterwards is cancelled individually. Failures are logged.
    /// Returns how many orders the sniper pass had to cancel.
    pub async fn cancel_all(&self) -> usize {
        let account = self.config.name();
        match self.gateway.cancel_all(self.symbol).await {
            Ok(()) => info!(%account, symbol = %self.symbol, "orders flushed"),
            Err(e) => error!(%account, error = %e, "bulk cancel failed"),
        }

        let leftovers = match self.gateway.open_orders().await {
            Ok(orders) => orders,
            Err(e) => {
                warn!(%account, error = %e, "cannot list orders for sniper cancel");
                return 0;
            }
        };
        let mut sniped = 0;
        for o in leftovers.iter().filter(|o| o.symbol.eq_ignore_ascii_case(self.symbol)) {
            match self.gateway.cancel_order(&o.order_id).await {
                Ok(()) => {
                    sniped += 1;
                    info!(%account, id = %o.order_id, "sniper cancel");
                }
                Err(e) => warn!(%account, id = %o.order_id, error = %e, "sniper cancel failed"),
            }
        }
        sniped
    }

    async fn fetch_position(&self) -> Result<Option<Position>, GridError> {
        self.gateway.position(self.symbol).await.map_err(GridError::fetch("position"))
    }

    /// Market reduce-only close. A failed close is logged and the rebuild
    /// continues; the grid is then netted against whatever is still open.
    async fn flatten(&self, pos: &Position) {
        let account = self.config.name();
        let req = OrderRequest::market_close(self.symbol, pos);
        match self.gateway.submit_order(&req).await {
            Ok(id) => info!(%account, %id, side = %req.side, size = %req.size, "position closed at market"),
            Err(e) => error!(%account, side = %req.side, size = %req.size, error = %e, "position close failed, rebuilding around it"),
        }
    }

    async fn place(&self, target: &TargetOrder) -> Result<OrderRecord, GridError> {
        debug_assert!(self.spec.is_price_aligned(target.price), "unrounded price {}", target.price);
        debug_assert!(self.spec.is_quantity_aligned(target.size), "unrounded size {}", target.size);

        let account = self.config.name();
        let role = target.role;
        match self.gateway.submit_order(&target.to_request(self.symbol)).await {
            Ok(id) => {
                info!(%account, %role, %id, side = %target.side, price = %target.price, size = %target.size, "placed");
                ORDERS_PLACED.with_label_values(&[account, role.as_str()]).inc();
                self.record(Event::Placed {
                    ts: now_ts(),
                    account: account.to_string(),
                    role,
                    id: id.clone(),
                    price: target.price,
                    size: target.size,
                });
                Ok(OrderRecord { exchange_order_id: id, role, price: target.price, size: target.size })
            }
            Err(source) => {
                ORDERS_REJECTED.with_label_values(&[account, role.as_str()]).inc();
                self.record(Event::Rejected {
                    ts: now_ts(),
                    account: account.to_string(),
                    role,
                    price: target.price,
                    size: target.size,
                    error: source.to_string(),
                });
                Err(GridError::SubmissionRejected { role, source })
            }
        }
    }

    /// Tears the grid down and places a fresh one. Only a failed position
    /// read aborts; individual rejections are skipped.
    pub async fn rebuild(&self, basis_equity: Decimal, mode: RebuildMode) -> Result<Vec<OrderRecord>, GridError> {
        let account = self.config.name();
        self.cancel_all().await;

        let mut position = self.fetch_position().await?;
        if mode == RebuildMode::ColdStart {
            if let Some(pos) = position.filter(|p| !p.size.is_zero()) {
                self.flatten(&pos).await;
                position = self.fetch_position().await?;
            }
        }
        if let Some(p) = position.filter(|p| p.side != self.config.side() && !p.size.is_zero()) {
            warn!(%account, side = %p.side, size = %p.size, "position opposite to grid side is not netted");
        }
        let exposure = Position::exposure_for(position.as_ref(), self.config.side());

        let target = build_target_grid(self.config, self.spec, basis_equity, exposure, self.params);
        info!(%account, %basis_equity, %exposure, orders = target.len(), "placing grid");

        let mut records = Vec::with_capacity(target.len());
        for t in target.iter().filter(|t| t.role == OrderRole::Limit) {
            match self.place(t).await {
                Ok(rec) => records.push(rec),
                Err(e) => warn!(%account, price = %t.price, size = %t.size, error = %e, "limit skipped"),
            }
        }

        // Stop covers what actually rests plus the position.
        if let Some(stop) = target.iter().find(|t| t.role == OrderRole::Stop) {
            let resting: Decimal = records.iter().map(|r| r.size).sum();
            let size = self.spec.round_quantity(resting + exposure);
            if size.is_zero() {
                warn!(%account, "nothing to protect, stop not placed");
            } else {
                let stop = TargetOrder { size, ..stop.clone() };
                match self.place(&stop).await {
                    Ok(rec) => records.push(rec),
                    Err(e) => error!(%account, price = %stop.price, %size, error = %e, "stop skipped, grid unprotected"),
                }
            }
        }

        info!(%account, placed = records.len(), wanted = target.len(), "grid rebuilt");
        self.record(Event::Rebuilt { ts: now_ts(), account: account.to_string(), orders: records.clone() });
        Ok(records)
    }
}

/// Replaces the account's records in memory, then writes the whole map.
/// On write failure the in-memory map stays authoritative for this process.
pub fn commit(
    state: &mut GridState,
    store: &dyn StateStore,
    account: &str,
    records: Vec<OrderRecord>,
) -> Result<(), GridError> {
    state.insert(account.to_string(), records);
    store.save(state).map_err(|e| {
        PERSIST_FAILURES.inc();
        GridError::from(e)
    })
}
