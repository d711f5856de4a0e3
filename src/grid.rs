// ===============================
// src/grid.rs (target grid builder)
// ===============================
//
// Target grid = limit per rung (netted against the open position) + 1 stop
// reduce-only that covers all resting limits plus the position.
//
// Netting: rungs are walked closest-to-market first. The position is treated
// as having filled those rungs first; a rung at least `fill_tolerance` covered
// counts as filled and is not re-submitted, a partly covered rung is submitted
// for the remainder only.
//
use rust_decimal::Decimal;

use crate::config::{AccountConfig, GridParams};
use crate::domain::{OrderRole, TargetOrder};
use crate::instrument::InstrumentSpec;
use crate::sizing::ideal_size;

pub fn build_target_grid(
    config: &AccountConfig,
    spec: &InstrumentSpec,
    basis_equity: Decimal,
    position: Decimal,
    params: &GridParams,
) -> Vec<TargetOrder> {
    let position = position.max(Decimal::ZERO);
    let mut covered = position;
    let mut orders = Vec::with_capacity(config.levels().len() + 1);

    for raw in config.levels_fill_order() {
        let price = spec.round_price(raw);
        let ideal = ideal_size(basis_equity, price, spec, params);

        let size = if covered.is_zero() {
            ideal
        } else if covered >= ideal * params.fill_tolerance {
            covered = (covered - ideal).max(Decimal::ZERO);
            continue;
        } else {
            let rest = spec.round_quantity(ideal - covered).max(spec.minimum_quantity);
            covered = Decimal::ZERO;
            rest
        };

        orders.push(TargetOrder { role: OrderRole::Limit, side: config.side(), price, size, reduce_only: false });
    }

    let resting: Decimal = orders.iter().map(|o| o.size).sum();
    orders.push(TargetOrder {
        role: OrderRole::Stop,
        side: config.stop_side(),
        price: spec.round_price(config.stop_price()),
        size: spec.round_quantity(resting + position),
        reduce_only: true,
    });
    orders
}

/// The limit the target grid wants at `price`, if any.
pub fn target_limit_at(grid: &[TargetOrder], price: Decimal) -> Option<&TargetOrder> {
    grid.iter().find(|o| o.role == OrderRole::Limit && o.price == price)
}

pub fn target_stop(grid: &[TargetOrder]) -> Option<&TargetOrder> {
    grid.iter().find(|o| o.role == OrderRole::Stop)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Side;
    use rust_decimal_macros::dec;

    fn limits(grid: &[TargetOrder]) -> Vec<&TargetOrder> {
        grid.iter().filter(|o| o.role == OrderRole::Limit).collect()
    }

    #[test]
    fn flat_grid_has_every_rung_and_covering_stop() {
        let cfg = AccountConfig::reference_long();
        let spec = InstrumentSpec::default();
        let grid = build_target_grid(&cfg, &spec, dec!(8000), dec!(0), &GridParams::default());

        assert_eq!(limits(&grid).len(), 5);
        assert!(limits(&grid).iter().all(|o| o.side == Side::Buy && !o.reduce_only));
        assert_eq!(target_limit_at(&grid, dec!(60000)).unwrap().size, dec!(0.0133));

        let stop = target_stop(&grid).unwrap();
        let sum: Decimal = limits(&grid).iter().map(|o| o.size).sum();
        assert_eq!(stop.size, sum);
        assert_eq!(stop.price, dec!(59000));
        assert_eq!(stop.side, Side::Sell);
        assert!(stop.reduce_only);
    }

    #[test]
    fn position_covers_closest_rungs_first() {
        let cfg = AccountConfig::reference_long();
        let spec = InstrumentSpec::default();
        let params = GridParams::default();
        // 800/64000 = 0.0125, 800/63000 = 0.0127
        let grid = build_target_grid(&cfg, &spec, dec!(8000), dec!(0.0252), &params);

        assert!(target_limit_at(&grid, dec!(64000)).is_none());
        assert!(target_limit_at(&grid, dec!(63000)).is_none());
        assert_eq!(limits(&grid).len(), 3);

        let stop = target_stop(&grid).unwrap();
        let sum: Decimal = limits(&grid).iter().map(|o| o.size).sum();
        assert_eq!(stop.size, sum + dec!(0.0252));
    }

    #[test]
    fn rung_within_fill_tolerance_counts_as_filled() {
        let cfg = AccountConfig::reference_long();
        let spec = InstrumentSpec::default();
        // 0.0113 / 0.0125 = 90.4% of the 64k rung
        let grid = build_target_grid(&cfg, &spec, dec!(8000), dec!(0.0113), &GridParams::default());
        assert!(target_limit_at(&grid, dec!(64000)).is_none());
        assert_eq!(target_limit_at(&grid, dec!(63000)).unwrap().size, dec!(0.0127));
    }

    #[test]
    fn partly_covered_rung_is_resubmitted_for_remainder() {
        let cfg = AccountConfig::reference_short();
        let spec = InstrumentSpec::default();
        // 800/66000 = 0.0121, half filled
        let grid = build_target_grid(&cfg, &spec, dec!(8000), dec!(0.006), &GridParams::default());
        let first = target_limit_at(&grid, dec!(66000)).unwrap();
        assert_eq!(first.size, dec!(0.0061));
        assert_eq!(first.side, Side::Sell);
        assert_eq!(target_stop(&grid).unwrap().side, Side::Buy);
        assert_eq!(limits(&grid).len(), 5);
    }

    #[test]
    fn prices_are_rounded_to_tick() {
        let cfg = AccountConfig::new(
            crate::config::AccountRole::Long,
            vec![dec!(60000.3), dec!(60999.8)],
            dec!(59000.2),
        )
        .unwrap();
        let spec = InstrumentSpec::new(dec!(0.5), dec!(0.0001), dec!(0.0001)).unwrap();
        let grid = build_target_grid(&cfg, &spec, dec!(8000), dec!(0), &GridParams::default());
        assert!(target_limit_at(&grid, dec!(60000.5)).is_some());
        assert!(target_limit_at(&grid, dec!(61000)).is_some());
        assert_eq!(target_stop(&grid).unwrap().price, dec!(59000));
    }
}
