// ===============================
// src/reconcile.rs (grid integrity check)
// ===============================
//
// Snapshot comparison every tick: saved OrderRecords vs live book vs the
// target grid recomputed from current equity + position.
//
// - Harga harus exact-match (harga = identitas rung).
// - Size boleh drift sampai `size_tolerance` (size ikut equity, jadi tidak
//   dibuat exact supaya tidak churn tiap tick).
// - Satu check gagal = seluruh grid akun invalid, tidak ada partial repair.
//
use ahash::AHashMap as HashMap;
use ahash::AHashSet as HashSet;
use rust_decimal::Decimal;
use std::fmt;
use tracing::debug;

use crate::config::{AccountConfig, GridParams};
use crate::domain::{AccountState, LiveOrder, OrderRecord, OrderRole, Position};
use crate::grid::{build_target_grid, target_limit_at, target_stop};
use crate::instrument::InstrumentSpec;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidReason {
    /// Nothing saved for this account yet.
    NoState,
    /// Saved grid has no stop record.
    NoStopRecord,
    /// Saved order is no longer on the book (filled or cancelled outside).
    Missing { id: String, role: OrderRole },
    PriceDrifted { id: String, role: OrderRole, saved: Decimal, live: Decimal },
    SizeDrifted { id: String, role: OrderRole, live: Decimal, ideal: Decimal, deviation: Decimal },
    /// Saved rung is already represented by the open position.
    RungCovered { id: String, price: Decimal, position: Decimal },
    /// Saved limit price is not a rung of the current ladder.
    UnknownRung { id: String, price: Decimal },
    /// Live order on the symbol that the grid did not place.
    Unaccounted { id: String, size: Decimal },
    /// Ladder rung the grid wants but never got on the book (rejected at submit).
    RungNotPlaced { price: Decimal, size: Decimal },
}

impl InvalidReason {
    pub fn state(&self) -> AccountState {
        match self {
            InvalidReason::NoState
            | InvalidReason::NoStopRecord
            | InvalidReason::Missing { .. }
            | InvalidReason::RungNotPlaced { .. } => AccountState::Missing,
            InvalidReason::PriceDrifted { .. } | InvalidReason::UnknownRung { .. } => AccountState::PriceDrifted,
            InvalidReason::SizeDrifted { .. } | InvalidReason::Unaccounted { .. } => AccountState::SizeDrifted,
            InvalidReason::RungCovered { .. } => AccountState::PartiallyFilled,
        }
    }
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidReason::NoState => write!(f, "no saved grid"),
            InvalidReason::NoStopRecord => write!(f, "saved grid has no stop"),
            InvalidReason::Missing { id, role } => write!(f, "missing/filled: {role} {id}"),
            InvalidReason::PriceDrifted { id, role, saved, live } => {
                write!(f, "price mismatch: {role} {id} saved={saved} live={live}")
            }
            InvalidReason::SizeDrifted { id, role, live, ideal, deviation } => {
                write!(f, "size drift: {role} {id} live={live} ideal={ideal} deviation={deviation}")
            }
            InvalidReason::RungCovered { id, price, position } => {
                write!(f, "rung covered by position: limit {id} @ {price} position={position}")
            }
            InvalidReason::UnknownRung { id, price } => write!(f, "not a configured rung: limit {id} @ {price}"),
            InvalidReason::Unaccounted { id, size } => write!(f, "unaccounted live order {id} size={size}"),
            InvalidReason::RungNotPlaced { price, size } => write!(f, "missing/filled: rung {price} size={size} never placed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Keep,
    Rebuild(InvalidReason),
}

impl Action {
    pub fn state(&self) -> AccountState {
        match self {
            Action::Keep => AccountState::Healthy,
            Action::Rebuild(reason) => reason.state(),
        }
    }
}

/// |live - ideal| / live. An empty live order counts as fully drifted.
pub fn size_deviation(live: Decimal, ideal: Decimal) -> Decimal {
    if live.is_zero() {
        return if ideal.is_zero() { Decimal::ZERO } else { Decimal::ONE };
    }
    ((live - ideal).abs() / live.abs()).normalize()
}

/// Strictly greater than: a deviation equal to the tolerance is still accepted.
pub fn exceeds_tolerance(live: Decimal, ideal: Decimal, tolerance: Decimal) -> bool {
    size_deviation(live, ideal) > tolerance
}

/// All-or-nothing health check for one account. `live` must already be
/// filtered to the grid's symbol.
pub fn check_integrity(
    saved: &[OrderRecord],
    live: &[LiveOrder],
    position: Decimal,
    basis_equity: Decimal,
    config: &AccountConfig,
    spec: &InstrumentSpec,
    params: &GridParams,
) -> Result<(), InvalidReason> {
    if saved.is_empty() {
        return Err(InvalidReason::NoState);
    }

    let live_by_id: HashMap<&str, &LiveOrder> = live.iter().map(|o| (o.order_id.as_str(), o)).collect();
    let target = build_target_grid(config, spec, basis_equity, position, params);
    let rungs: HashSet<Decimal> = config.levels().iter().map(|p| spec.round_price(*p)).collect();

    let mut sum_ideal_limit = Decimal::ZERO;
    for rec in saved.iter().filter(|r| r.role == OrderRole::Limit) {
        let lo = live_by_id
            .get(rec.exchange_order_id.as_str())
            .ok_or_else(|| InvalidReason::Missing { id: rec.exchange_order_id.clone(), role: rec.role })?;

        if lo.price != rec.price {
            return Err(InvalidReason::PriceDrifted {
                id: rec.exchange_order_id.clone(),
                role: rec.role,
                saved: rec.price,
                live: lo.price,
            });
        }

        let ideal = match target_limit_at(&target, rec.price) {
            Some(t) => t.size,
            None if rungs.contains(&rec.price) => {
                return Err(InvalidReason::RungCovered { id: rec.exchange_order_id.clone(), price: rec.price, position });
            }
            None => return Err(InvalidReason::UnknownRung { id: rec.exchange_order_id.clone(), price: rec.price }),
        };

        if exceeds_tolerance(lo.size, ideal, params.size_tolerance) {
            return Err(InvalidReason::SizeDrifted {
                id: rec.exchange_order_id.clone(),
                role: rec.role,
                live: lo.size,
                ideal,
                deviation: size_deviation(lo.size, ideal),
            });
        }
        debug!(id = %rec.exchange_order_id, price = %rec.price, live = %lo.size, %ideal, "limit ok");
        sum_ideal_limit += ideal;
    }

    let saved_rungs: HashSet<Decimal> =
        saved.iter().filter(|r| r.role == OrderRole::Limit).map(|r| r.price).collect();
    if let Some(t) = target.iter().find(|t| t.role == OrderRole::Limit && !saved_rungs.contains(&t.price)) {
        return Err(InvalidReason::RungNotPlaced { price: t.price, size: t.size });
    }

    let mut stops = saved.iter().filter(|r| r.role == OrderRole::Stop).peekable();
    if stops.peek().is_none() {
        return Err(InvalidReason::NoStopRecord);
    }
    let expected_stop = spec.round_quantity(sum_ideal_limit + position);
    for rec in stops {
        let lo = live_by_id
            .get(rec.exchange_order_id.as_str())
            .ok_or_else(|| InvalidReason::Missing { id: rec.exchange_order_id.clone(), role: rec.role })?;

        // Stop trigger comes from config, so a changed ladder shows up here too.
        let stop_price = target_stop(&target).map(|t| t.price).unwrap_or(rec.price);
        if lo.price != rec.price || rec.price != stop_price {
            return Err(InvalidReason::PriceDrifted {
                id: rec.exchange_order_id.clone(),
                role: rec.role,
                saved: rec.price,
                live: lo.price,
            });
        }
        if exceeds_tolerance(lo.size, expected_stop, params.size_tolerance) {
            return Err(InvalidReason::SizeDrifted {
                id: rec.exchange_order_id.clone(),
                role: rec.role,
                live: lo.size,
                ideal: expected_stop,
                deviation: size_deviation(lo.size, expected_stop),
            });
        }
    }

    let known: HashSet<&str> = saved.iter().map(|r| r.exchange_order_id.as_str()).collect();
    if let Some(extra) = live.iter().find(|o| !known.contains(o.order_id.as_str())) {
        return Err(InvalidReason::Unaccounted { id: extra.order_id.clone(), size: extra.size });
    }

    Ok(())
}

/// Per-account, per-tick entry point.
pub fn reconcile(
    config: &AccountConfig,
    saved: &[OrderRecord],
    live: &[LiveOrder],
    position: Option<&Position>,
    basis_equity: Decimal,
    spec: &InstrumentSpec,
    params: &GridParams,
) -> Action {
    let exposure = Position::exposure_for(position, config.side());
    match check_integrity(saved, live, exposure, basis_equity, config, spec, params) {
        Ok(()) => Action::Keep,
        Err(reason) => Action::Rebuild(reason),
    }
}
