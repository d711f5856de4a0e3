// ===============================
// src/sizing.rs
// ===============================
//
// Sizing: setiap rung me-risk-kan 1/rungs dari equity terkecil kedua akun.
// Pure function, tidak ada I/O.
//
use rust_decimal::Decimal;

use crate::config::GridParams;
use crate::instrument::InstrumentSpec;

/// Both legs size off the smaller account so they stay proportionally equal.
pub fn basis_equity(equity_long: Decimal, equity_short: Decimal) -> Decimal {
    equity_long.min(equity_short).max(Decimal::ZERO)
}

/// Quote value allotted to a single rung.
pub fn rung_value(basis_equity: Decimal, params: &GridParams) -> Decimal {
    basis_equity / Decimal::from(params.rungs.max(1))
}

/// Contracts for one rung at an already-rounded price, rounded to the
/// quantity step and floored at the minimum quantity.
pub fn compute_order_size(rung_value: Decimal, price: Decimal, spec: &InstrumentSpec) -> Decimal {
    let raw = rung_value.checked_div(price).unwrap_or(Decimal::ZERO);
    spec.round_quantity(raw).max(spec.minimum_quantity)
}

/// Shorthand used by the grid builder and the integrity check.
pub fn ideal_size(basis_equity: Decimal, price: Decimal, spec: &InstrumentSpec, params: &GridParams) -> Decimal {
    compute_order_size(rung_value(basis_equity, params), price, spec)
}
