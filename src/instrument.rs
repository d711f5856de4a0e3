// ===============================
// src/instrument.rs (tick/step cache)
// ===============================
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use tracing::{info, warn};

use crate::error::GridError;
use crate::gateway::Gateway;
use crate::metrics::SPEC_REFRESH;

/// Rounds `value` to the nearest multiple of `step` (midpoint away from zero).
pub fn round_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value.normalize();
    }
    let units = (value / step).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    (units * step).normalize()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstrumentSpec {
    pub price_step: Decimal,
    pub quantity_step: Decimal,
    pub minimum_quantity: Decimal,
}

impl Default for InstrumentSpec {
    // Conservative: whole-dollar ticks, 4-decimal contracts.
    fn default() -> Self {
        Self { price_step: dec!(1), quantity_step: dec!(0.0001), minimum_quantity: dec!(0.0001) }
    }
}

impl InstrumentSpec {
    pub fn new(price_step: Decimal, quantity_step: Decimal, minimum_quantity: Decimal) -> Result<Self, GridError> {
        if price_step <= Decimal::ZERO || quantity_step <= Decimal::ZERO {
            return Err(GridError::Config(format!(
                "instrument steps must be positive (price_step={price_step}, quantity_step={quantity_step})"
            )));
        }
        Ok(Self { price_step, quantity_step, minimum_quantity: minimum_quantity.max(Decimal::ZERO) })
    }

    /// Spec from the venue's tick size and number of size decimals.
    /// A negative precision means sizes are multiples of 10, 100, ...
    pub fn from_precision(tick_size: Decimal, quantity_precision: i32) -> Result<Self, GridError> {
        let step = if quantity_precision >= 0 {
            Decimal::new(1, quantity_precision.min(28) as u32)
        } else {
            Decimal::from(10i64.pow(quantity_precision.unsigned_abs().min(18)))
        };
        Self::new(tick_size, step, step)
    }

    pub fn round_price(&self, price: Decimal) -> Decimal { round_to_step(price, self.price_step) }

    pub fn round_quantity(&self, qty: Decimal) -> Decimal { round_to_step(qty, self.quantity_step) }

    pub fn is_price_aligned(&self, price: Decimal) -> bool { (price % self.price_step).is_zero() }

    pub fn is_quantity_aligned(&self, qty: Decimal) -> bool { (qty % self.quantity_step).is_zero() }
}

/// Last known instrument spec. Never blocks startup: on fetch failure the
/// previous values (or the defaults) stay in place.
#[derive(Debug, Clone, Default)]
pub struct SpecCache {
    current: InstrumentSpec,
    refreshed_at: Option<DateTime<Utc>>,
}

impl SpecCache {
    pub fn new(initial: InstrumentSpec) -> Self { Self { current: initial, refreshed_at: None } }

    pub fn spec(&self) -> InstrumentSpec { self.current }

    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> { self.refreshed_at }

    pub fn is_fresh(&self, max_age: chrono::Duration) -> bool {
        self.refreshed_at.map(|t| Utc::now() - t < max_age).unwrap_or(false)
    }

    /// Single attempt, no retries. Returns the spec in effect afterwards.
    pub async fn refresh(&mut self, gw: &dyn Gateway, symbol: &str) -> InstrumentSpec {
        match gw.instrument_spec(symbol).await {
            Ok(spec) => {
                info!(
                    %symbol,
                    price_step = %spec.price_step,
                    quantity_step = %spec.quantity_step,
                    min_qty = %spec.minimum_quantity,
                    "instrument spec refreshed"
                );
                self.current = spec;
                self.refreshed_at = Some(Utc::now());
                SPEC_REFRESH.with_label_values(&["ok"]).inc();
            }
            Err(e) => {
                let err = GridError::SpecUnavailable(e);
                warn!(
                    %symbol,
                    error = %err,
                    price_step = %self.current.price_step,
                    quantity_step = %self.current.quantity_step,
                    "keeping cached instrument spec"
                );
                SPEC_REFRESH.with_label_values(&["failed"]).inc();
            }
        }
        self.current
    }
}
