//! End-to-end ticks over two paper venues.
//!
//! Reference ladders at basis 8000 (10 rungs, 800 per rung):
//!   LONG  buys 64k..60k = 0.0125 0.0127 0.0129 0.0131 0.0133, stop 59k
//!   SHORT sells 66k..70k, stop 71k

use std::sync::Arc;

use dual_grid_bot::domain::{Event, LiveOrder, OrderKind};
use dual_grid_bot::{
    AccountConfig, AccountOutcome, AccountState, FileStateStore, GridEngine, GridParams, GridState, Leg,
    MemoryStateStore, PaperGateway, Position, Side, StateStore,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::mpsc;

const SYM: &str = "FF_XBTUSD_260227";

struct Rig {
    long: Arc<PaperGateway>,
    short: Arc<PaperGateway>,
}

impl Rig {
    fn new() -> Self {
        Self {
            long: Arc::new(PaperGateway::new("LONG", SYM, dec!(10000))),
            short: Arc::new(PaperGateway::new("SHORT", SYM, dec!(8000))),
        }
    }

    fn legs(&self) -> Vec<Leg> {
        vec![
            Leg { config: AccountConfig::reference_long(), gateway: self.long.clone() },
            Leg { config: AccountConfig::reference_short(), gateway: self.short.clone() },
        ]
    }

    fn engine(&self) -> GridEngine {
        self.engine_with(Box::new(MemoryStateStore::new(GridState::new())))
    }

    fn engine_with(&self, store: Box<dyn StateStore>) -> GridEngine {
        GridEngine::new(SYM, self.legs(), GridParams::default(), store)
    }
}

fn outcome<'a>(outcomes: &'a [(String, AccountOutcome)], account: &str) -> &'a AccountOutcome {
    &outcomes.iter().find(|(a, _)| a == account).expect("account in summary").1
}

fn by_kind(orders: &[LiveOrder], kind: OrderKind) -> Vec<&LiveOrder> {
    orders.iter().filter(|o| o.kind == kind).collect()
}

fn temp_state_path() -> std::path::PathBuf {
    std::env::temp_dir().join(format!("grid_engine_{}.json", rand::random::<u64>()))
}

#[tokio::test]
async fn first_tick_builds_both_grids_then_holds() {
    let rig = Rig::new();
    let mut engine = rig.engine();

    let first = engine.tick().await;
    assert_eq!(first.basis_equity, dec!(8000));
    assert_eq!(outcome(&first.outcomes, "LONG"), &AccountOutcome::Rebuilt { state: AccountState::Missing, orders: 6 });
    assert_eq!(outcome(&first.outcomes, "SHORT"), &AccountOutcome::Rebuilt { state: AccountState::Missing, orders: 6 });

    let long_book = rig.long.resting().await;
    let stops = by_kind(&long_book, OrderKind::Stop);
    assert_eq!(stops.len(), 1);
    assert_eq!(stops[0].price, dec!(59000));
    assert_eq!(stops[0].size, dec!(0.0645));
    assert_eq!(stops[0].side, Side::Sell);
    assert!(by_kind(&long_book, OrderKind::Limit).iter().all(|o| o.side == Side::Buy));
    assert_eq!(by_kind(&rig.short.resting().await, OrderKind::Stop)[0].side, Side::Buy);

    let second = engine.tick().await;
    assert_eq!(outcome(&second.outcomes, "LONG"), &AccountOutcome::Healthy);
    assert_eq!(outcome(&second.outcomes, "SHORT"), &AccountOutcome::Healthy);
    assert_eq!(rig.long.submitted().await.len(), 6);
    assert_eq!(rig.short.submitted().await.len(), 6);
}

#[tokio::test]
async fn records_match_accepted_orders() {
    let rig = Rig::new();
    let mut engine = rig.engine();
    engine.tick().await;

    let saved = engine.state().get("LONG").cloned().unwrap_or_default();
    let live = rig.long.resting().await;
    assert_eq!(saved.len(), live.len());
    for rec in &saved {
        let lo = live.iter().find(|o| o.order_id == rec.exchange_order_id).expect("record is live");
        assert_eq!(lo.price, rec.price);
        assert_eq!(lo.size, rec.size);
    }
}

#[tokio::test]
async fn filled_rung_is_netted_on_rebuild() {
    let rig = Rig::new();
    let mut engine = rig.engine();
    engine.tick().await;

    let top = rig.long.resting().await.into_iter().find(|o| o.price == dec!(64000)).expect("64k rung");
    assert!(rig.long.fill(&top.order_id, top.size).await);

    let summary = engine.tick().await;
    assert!(matches!(outcome(&summary.outcomes, "LONG"), AccountOutcome::Rebuilt { orders: 5, .. }));
    assert_eq!(outcome(&summary.outcomes, "SHORT"), &AccountOutcome::Healthy);

    let book = rig.long.resting().await;
    let limits = by_kind(&book, OrderKind::Limit);
    assert_eq!(limits.len(), 4);
    assert!(limits.iter().all(|o| o.price != dec!(64000)));
    let resting: Decimal = limits.iter().map(|o| o.size).sum();
    assert_eq!(resting, dec!(0.0520));
    // stop still protects the filled rung
    assert_eq!(by_kind(&book, OrderKind::Stop)[0].size, dec!(0.0645));
    assert_eq!(rig.long.current_position().await, Some(Position { side: Side::Buy, size: dec!(0.0125) }));

    let after = engine.tick().await;
    assert_eq!(outcome(&after.outcomes, "LONG"), &AccountOutcome::Healthy);
}

#[tokio::test]
async fn small_partial_fill_keeps_grid() {
    let rig = Rig::new();
    let mut engine = rig.engine();
    engine.tick().await;

    // 0.0003 of the 64k rung: well inside both tolerances
    let top = rig.long.resting().await.into_iter().find(|o| o.price == dec!(64000)).expect("64k rung");
    assert!(rig.long.fill(&top.order_id, dec!(0.0003)).await);

    let summary = engine.tick().await;
    assert_eq!(outcome(&summary.outcomes, "LONG"), &AccountOutcome::Healthy);
}

#[tokio::test]
async fn equity_move_inside_tolerance_is_ignored() {
    let rig = Rig::new();
    let mut engine = rig.engine();
    engine.tick().await;

    // basis = min(equities): raising only the richer account changes nothing
    rig.long.set_equity(dec!(20000)).await;
    rig.short.set_equity(dec!(8200)).await;
    let summary = engine.tick().await;
    assert_eq!(summary.basis_equity, dec!(8200));
    assert_eq!(outcome(&summary.outcomes, "LONG"), &AccountOutcome::Healthy);
    assert_eq!(outcome(&summary.outcomes, "SHORT"), &AccountOutcome::Healthy);
}

#[tokio::test]
async fn equity_move_beyond_tolerance_resizes_both_grids() {
    let rig = Rig::new();
    let mut engine = rig.engine();
    engine.tick().await;

    rig.long.set_equity(dec!(9000)).await;
    rig.short.set_equity(dec!(9000)).await;
    let summary = engine.tick().await;
    assert_eq!(outcome(&summary.outcomes, "LONG"), &AccountOutcome::Rebuilt { state: AccountState::SizeDrifted, orders: 6 });
    assert_eq!(outcome(&summary.outcomes, "SHORT"), &AccountOutcome::Rebuilt { state: AccountState::SizeDrifted, orders: 6 });

    let top = rig.long.resting().await.into_iter().find(|o| o.price == dec!(64000)).expect("64k rung");
    assert_eq!(top.size, dec!(0.0141));
}

#[tokio::test]
async fn fetch_failure_skips_only_that_account() {
    let rig = Rig::new();
    let mut engine = rig.engine();
    rig.long.fail_reads(true).await;

    let summary = engine.tick().await;
    assert!(matches!(outcome(&summary.outcomes, "LONG"), AccountOutcome::Skipped(_)));
    assert!(matches!(outcome(&summary.outcomes, "SHORT"), AccountOutcome::Rebuilt { orders: 6, .. }));
    assert!(rig.long.submitted().await.is_empty());
    assert!(engine.state().get("LONG").is_none());

    rig.long.fail_reads(false).await;
    let next = engine.tick().await;
    assert!(matches!(outcome(&next.outcomes, "LONG"), AccountOutcome::Rebuilt { orders: 6, .. }));
    assert_eq!(outcome(&next.outcomes, "SHORT"), &AccountOutcome::Healthy);
}

#[tokio::test]
async fn zero_basis_skips_the_whole_tick() {
    let rig = Rig::new();
    let (tx, mut rx) = mpsc::channel(16);
    let mut engine = rig.engine().with_recorder(tx);
    rig.short.fail_equity(true).await;

    let summary = engine.tick().await;
    assert_eq!(summary.basis_equity, Decimal::ZERO);
    assert!(summary.outcomes.iter().all(|(_, o)| matches!(o, AccountOutcome::Skipped(_))));
    assert!(rig.long.submitted().await.is_empty());
    assert!(rig.short.submitted().await.is_empty());
    assert!(matches!(rx.try_recv(), Ok(Event::Note(n)) if n.starts_with("tick skipped")));
}

#[tokio::test]
async fn foreign_order_type_on_symbol_forces_rebuild() {
    let rig = Rig::new();
    let mut engine = rig.engine();
    engine.tick().await;

    rig.long
        .inject_order(LiveOrder {
            order_id: "tp-1".into(),
            symbol: SYM.into(),
            side: Side::Sell,
            kind: OrderKind::Other,
            price: dec!(70000),
            size: dec!(0.01),
        })
        .await;
    let summary = engine.tick().await;
    assert_eq!(outcome(&summary.outcomes, "LONG"), &AccountOutcome::Rebuilt { state: AccountState::SizeDrifted, orders: 6 });
    assert!(rig.long.resting().await.iter().all(|o| o.kind != OrderKind::Other));
}

#[tokio::test]
async fn foreign_order_on_symbol_forces_rebuild() {
    let rig = Rig::new();
    let mut engine = rig.engine();
    engine.tick().await;

    rig.long
        .inject_order(LiveOrder {
            order_id: "manual-1".into(),
            symbol: SYM.into(),
            side: Side::Buy,
            kind: OrderKind::Limit,
            price: dec!(55000),
            size: dec!(0.5),
        })
        .await;
    let summary = engine.tick().await;
    assert_eq!(outcome(&summary.outcomes, "LONG"), &AccountOutcome::Rebuilt { state: AccountState::SizeDrifted, orders: 6 });
    assert!(rig.long.resting().await.iter().all(|o| o.order_id != "manual-1"));
}

#[tokio::test]
async fn orders_on_other_symbols_are_ignored() {
    let rig = Rig::new();
    let mut engine = rig.engine();
    engine.tick().await;

    rig.long
        .inject_order(LiveOrder {
            order_id: "eth-1".into(),
            symbol: "PF_ETHUSD".into(),
            side: Side::Buy,
            kind: OrderKind::Limit,
            price: dec!(2500),
            size: dec!(1),
        })
        .await;
    let summary = engine.tick().await;
    assert_eq!(outcome(&summary.outcomes, "LONG"), &AccountOutcome::Healthy);
}

#[tokio::test]
async fn sticky_bulk_cancel_is_cleaned_up_one_by_one() {
    let rig = Rig::new();
    let mut engine = rig.engine();
    engine.tick().await;
    rig.long.sticky_cancel_all(true).await;

    let top = rig.long.resting().await.into_iter().find(|o| o.price == dec!(64000)).expect("64k rung");
    rig.long.fill(&top.order_id, top.size).await;
    engine.tick().await;

    let book = rig.long.resting().await;
    assert_eq!(book.len(), 5);
    let saved = engine.state().get("LONG").cloned().unwrap_or_default();
    assert!(book.iter().all(|o| saved.iter().any(|r| r.exchange_order_id == o.order_id)));
}

#[tokio::test]
async fn rejected_limit_is_retried_next_tick() {
    let rig = Rig::new();
    let mut engine = rig.engine();
    rig.long.reject_next(1, Some(OrderKind::Limit)).await;

    let first = engine.tick().await;
    assert!(matches!(outcome(&first.outcomes, "LONG"), AccountOutcome::Rebuilt { orders: 5, .. }));
    assert_eq!(by_kind(&rig.long.resting().await, OrderKind::Limit).len(), 4);

    let second = engine.tick().await;
    assert_eq!(outcome(&second.outcomes, "LONG"), &AccountOutcome::Rebuilt { state: AccountState::Missing, orders: 6 });
    let book = rig.long.resting().await;
    assert_eq!(by_kind(&book, OrderKind::Limit).len(), 5);
    assert_eq!(by_kind(&book, OrderKind::Stop)[0].size, dec!(0.0645));

    let third = engine.tick().await;
    assert_eq!(outcome(&third.outcomes, "LONG"), &AccountOutcome::Healthy);
}

#[tokio::test]
async fn rejected_stop_is_retried_next_tick() {
    let rig = Rig::new();
    let mut engine = rig.engine();
    rig.long.reject_next(1, Some(OrderKind::Stop)).await;

    let first = engine.tick().await;
    assert!(matches!(outcome(&first.outcomes, "LONG"), AccountOutcome::Rebuilt { orders: 5, .. }));
    assert!(by_kind(&rig.long.resting().await, OrderKind::Stop).is_empty());

    let second = engine.tick().await;
    assert_eq!(outcome(&second.outcomes, "LONG"), &AccountOutcome::Rebuilt { state: AccountState::Missing, orders: 6 });
    assert_eq!(by_kind(&rig.long.resting().await, OrderKind::Stop).len(), 1);
}

#[tokio::test]
async fn reset_flattens_and_rebuilds() {
    let rig = Rig::new();
    rig.long.set_position(Some(Position { side: Side::Buy, size: dec!(0.05) })).await;
    let mut engine = rig.engine();

    let summary = engine.reset().await;
    assert!(matches!(outcome(&summary.outcomes, "LONG"), AccountOutcome::Rebuilt { orders: 6, .. }));
    assert_eq!(rig.long.current_position().await, None);
    assert_eq!(by_kind(&rig.long.resting().await, OrderKind::Stop)[0].size, dec!(0.0645));

    let market = rig.long.submitted().await.into_iter().find(|r| r.kind == OrderKind::Market).expect("close order");
    assert_eq!(market.side, Side::Sell);
    assert!(market.reduce_only);
}

#[tokio::test]
async fn restart_with_persisted_state_keeps_resting_grid() {
    let path = temp_state_path();
    let rig = Rig::new();
    {
        let mut engine = rig.engine_with(Box::new(FileStateStore::new(&path)));
        engine.tick().await;
    }

    let on_disk = FileStateStore::new(&path).load().expect("state file readable");
    assert_eq!(on_disk.get("LONG").map(Vec::len), Some(6));
    assert_eq!(on_disk.get("SHORT").map(Vec::len), Some(6));

    let mut restarted = rig.engine_with(Box::new(FileStateStore::new(&path)));
    let summary = restarted.tick().await;
    assert_eq!(outcome(&summary.outcomes, "LONG"), &AccountOutcome::Healthy);
    assert_eq!(outcome(&summary.outcomes, "SHORT"), &AccountOutcome::Healthy);
    assert_eq!(rig.long.submitted().await.len(), 6);

    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn restart_against_empty_venue_rebuilds() {
    let path = temp_state_path();
    {
        let rig = Rig::new();
        let mut engine = rig.engine_with(Box::new(FileStateStore::new(&path)));
        engine.tick().await;
    }

    let fresh = Rig::new();
    let mut engine = fresh.engine_with(Box::new(FileStateStore::new(&path)));
    let summary = engine.tick().await;
    assert_eq!(outcome(&summary.outcomes, "LONG"), &AccountOutcome::Rebuilt { state: AccountState::Missing, orders: 6 });

    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn failed_persist_keeps_memory_state() {
    let rig = Rig::new();
    let mut engine = rig.engine_with(Box::new(MemoryStateStore::failing()));

    engine.tick().await;
    assert_eq!(engine.state().get("LONG").map(Vec::len), Some(6));

    let summary = engine.tick().await;
    assert_eq!(outcome(&summary.outcomes, "LONG"), &AccountOutcome::Healthy);
}
