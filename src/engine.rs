// ===============================
// src/engine.rs (per-tick driver)
// ===============================
//
// Satu tick:
//   equity kedua akun (soft, 0 kalau gagal) -> basis = min
//   lalu per akun, berurutan dan terisolasi:
//     open orders + posisi -> reconcile -> (kalau invalid) rebuild + commit
//
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::config::{AccountConfig, GridParams};
use crate::domain::{AccountState, Event, LiveOrder};
use crate::error::GridError;
use crate::executor::{commit, Executor, RebuildMode};
use crate::gateway::Gateway;
use crate::instrument::{InstrumentSpec, SpecCache};
use crate::metrics::{self, BASIS_EQUITY, EQUITY, FETCH_FAILURES, REBUILDS, TICKS};
use crate::reconcile::{reconcile, Action};
use crate::recorder::now_ts;
use crate::sizing::basis_equity;
use crate::state::{GridState, StateStore};

/// One account: its ladder and the venue session it trades through.
pub struct Leg {
    pub config: AccountConfig,
    pub gateway: Arc<dyn Gateway>,
}

/// What happened to one account during a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountOutcome {
    Healthy,
    Rebuilt { state: AccountState, orders: usize },
    Skipped(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickSummary {
    pub basis_equity: Decimal,
    pub outcomes: Vec<(String, AccountOutcome)>,
}

pub struct GridEngine {
    symbol: String,
    legs: Vec<Leg>,
    params: GridParams,
    spec: SpecCache,
    state: GridState,
    store: Box<dyn StateStore>,
    recorder: Option<mpsc::Sender<Event>>,
}

impl GridEngine {
    /// Loads the persisted records. An unreadable state file is logged and
    /// treated as empty: every grid then rebuilds on the first tick.
    pub fn new(symbol: &str, legs: Vec<Leg>, params: GridParams, store: Box<dyn StateStore>) -> Self {
        let state = match store.load() {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "state unreadable, starting without saved grids");
                GridState::new()
            }
        };
        for leg in &legs {
            info!(
                account = leg.config.name(),
                session = leg.gateway.account(),
                role = ?leg.config.role(),
                levels = leg.config.levels().len(),
                stop = %leg.config.stop_price(),
                "leg ready"
            );
        }
        Self {
            symbol: symbol.to_ascii_uppercase(),
            legs,
            params,
            spec: SpecCache::default(),
            state,
            store,
            recorder: None,
        }
    }

    pub fn with_recorder(mut self, tx: mpsc::Sender<Event>) -> Self {
        self.recorder = Some(tx);
        self
    }

    pub fn with_spec(mut self, spec: InstrumentSpec) -> Self {
        self.spec = SpecCache::new(spec);
        self
    }

    pub fn state(&self) -> &GridState { &self.state }

    pub fn spec(&self) -> InstrumentSpec { self.spec.spec() }

    fn record(&self, ev: Event) {
        if let Some(tx) = &self.recorder {
            let _ = tx.try_send(ev);
        }
    }

    /// Spec is the same instrument for both accounts; the first leg fetches it.
    pub async fn refresh_spec(&mut self) -> InstrumentSpec {
        match self.legs.first() {
            Some(leg) => {
                let gw = Arc::clone(&leg.gateway);
                self.spec.refresh(gw.as_ref(), &self.symbol).await
            }
            None => self.spec.spec(),
        }
    }

    /// Soft read: failures count as zero equity.
    async fn fetch_equity(leg: &Leg) -> Decimal {
        let account = leg.config.name();
        match leg.gateway.equity().await {
            Ok(eq) => {
                EQUITY.with_label_values(&[account]).set(eq.to_f64().unwrap_or(0.0));
                eq
            }
            Err(e) => {
                error!(%account, error = %e, "equity fetch failed");
                FETCH_FAILURES.with_label_values(&[account, "equity"]).inc();
                Decimal::ZERO
            }
        }
    }

    async fn basis(&self) -> Decimal {
        let mut equities = Vec::with_capacity(self.legs.len());
        for leg in &self.legs {
            equities.push((leg.config.name(), Self::fetch_equity(leg).await));
        }
        let basis = equities
            .iter()
            .map(|(_, e)| *e)
            .reduce(basis_equity)
            .unwrap_or(Decimal::ZERO);
        info!(equities = ?equities.iter().map(|(a, e)| format!("{a}={e}")).collect::<Vec<_>>(), %basis, "equities");
        BASIS_EQUITY.set(basis.to_f64().unwrap_or(0.0));
        basis
    }

    async fn live_orders(&self, leg: &Leg) -> Result<Vec<LiveOrder>, GridError> {
        let orders = leg.gateway.open_orders().await.map_err(GridError::fetch("open orders"))?;
        Ok(orders.into_iter().filter(|o| o.symbol.eq_ignore_ascii_case(&self.symbol)).collect())
    }

    async fn process_account(&mut self, idx: usize, basis: Decimal) -> Result<AccountOutcome, GridError> {
        let leg = &self.legs[idx];
        let account = leg.config.name();
        let live = self.live_orders(leg).await?;
        let position = leg.gateway.position(&self.symbol).await.map_err(GridError::fetch("position"))?;

        let spec = self.spec.spec();
        let saved = self.state.get(account).map(Vec::as_slice).unwrap_or(&[]);
        let action = reconcile(&leg.config, saved, &live, position.as_ref(), basis, &spec, &self.params);
        let state = action.state();
        metrics::set_grid_state(account, state);

        let reason = match action {
            Action::Keep => {
                info!(%account, live = live.len(), "grid intact");
                self.record(Event::Decision { ts: now_ts(), account: account.to_string(), state, reason: None });
                return Ok(AccountOutcome::Healthy);
            }
            Action::Rebuild(reason) => reason,
        };
        warn!(%account, %state, %reason, live = live.len(), saved = saved.len(), "grid invalid, rebuilding");
        self.record(Event::Decision {
            ts: now_ts(),
            account: account.to_string(),
            state,
            reason: Some(reason.to_string()),
        });
        REBUILDS.with_label_values(&[account, state.as_str()]).inc();

        let orders = self.rebuild_account(idx, basis, RebuildMode::Routine).await?;
        Ok(AccountOutcome::Rebuilt { state, orders })
    }

    /// Old records are dropped before the tear-down so nothing reads them
    /// while the book is being replaced.
    async fn rebuild_account(&mut self, idx: usize, basis: Decimal, mode: RebuildMode) -> Result<usize, GridError> {
        let leg = &self.legs[idx];
        let account = leg.config.name();
        self.state.remove(account);

        let spec = self.spec.spec();
        let exec = Executor {
            gateway: leg.gateway.as_ref(),
            symbol: &self.symbol,
            config: &leg.config,
            spec: &spec,
            params: &self.params,
            recorder: self.recorder.as_ref(),
        };
        let records = exec.rebuild(basis, mode).await?;
        let placed = records.len();
        if let Err(e) = commit(&mut self.state, self.store.as_ref(), account, records) {
            error!(%account, error = %e, "state not persisted, in-memory grid stays authoritative");
        }
        Ok(placed)
    }

    /// One reconciliation pass over both accounts.
    pub async fn tick(&mut self) -> TickSummary {
        TICKS.inc();
        let basis = self.basis().await;
        let mut outcomes = Vec::with_capacity(self.legs.len());

        if basis <= Decimal::ZERO {
            error!(%basis, "basis equity not positive, skipping tick");
            self.record(Event::Note(format!("tick skipped: basis equity {basis}")));
            for leg in &self.legs {
                outcomes.push((leg.config.name().to_string(), AccountOutcome::Skipped("basis equity is zero".into())));
            }
            return TickSummary { basis_equity: basis, outcomes };
        }

        for idx in 0..self.legs.len() {
            let account = self.legs[idx].config.name().to_string();
            let outcome = match self.process_account(idx, basis).await {
                Ok(o) => o,
                Err(e) => {
                    if let GridError::TransientFetch { what, .. } = &e {
                        FETCH_FAILURES.with_label_values(&[account.as_str(), *what]).inc();
                    }
                    error!(%account, error = %e, "account tick abandoned");
                    AccountOutcome::Skipped(e.to_string())
                }
            };
            outcomes.push((account, outcome));
        }
        TickSummary { basis_equity: basis, outcomes }
    }

    /// Cold start: flatten and rebuild every account regardless of saved state.
    pub async fn reset(&mut self) -> TickSummary {
        let basis = self.basis().await;
        let mut outcomes = Vec::with_capacity(self.legs.len());
        for idx in 0..self.legs.len() {
            let account = self.legs[idx].config.name().to_string();
            if basis <= Decimal::ZERO {
                outcomes.push((account, AccountOutcome::Skipped("basis equity is zero".into())));
                continue;
            }
            warn!(%account, "cold start reset");
            let outcome = match self.rebuild_account(idx, basis, RebuildMode::ColdStart).await {
                Ok(orders) => AccountOutcome::Rebuilt { state: AccountState::Missing, orders },
                Err(e) => {
                    error!(%account, error = %e, "reset abandoned");
                    AccountOutcome::Skipped(e.to_string())
                }
            };
            outcomes.push((account, outcome));
        }
        TickSummary { basis_equity: basis, outcomes }
    }

    /// Fixed-interval loop until ctrl-c. The spec is re-fetched once it is
    /// older than `spec_every`; a failed fetch is retried on the next tick.
    pub async fn run(&mut self, tick_every: Duration, spec_every: Duration) {
        let mut ticker = interval(tick_every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let spec_max_age = chrono::Duration::from_std(spec_every).unwrap_or_else(|_| chrono::Duration::hours(1));
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !self.spec.is_fresh(spec_max_age) {
                        self.refresh_spec().await;
                    }
                    let summary = self.tick().await;
                    info!(basis = %summary.basis_equity, outcomes = ?summary.outcomes, "tick done");
                }
                _ = &mut shutdown => {
                    info!("ctrl-c received, stopping");
                    break;
                }
            }
        }
    }
}
