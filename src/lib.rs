// ===============================
// src/lib.rs
// ===============================
//
// Core (pure): instrument -> sizing -> grid -> reconcile
// Side effects: executor (cancel/place), state (persist), engine (tick driver)
// Venues: gateway (trait + paper), kraken + gateway_kraken (Kraken Futures REST)
//
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod executor;
pub mod gateway;
pub mod gateway_kraken;
pub mod grid;
pub mod instrument;
pub mod kraken;
pub mod metrics;
pub mod reconcile;
pub mod recorder;
pub mod sizing;
pub mod state;

pub use config::{AccountConfig, AccountRole, GridParams};
pub use domain::{AccountState, LiveOrder, OrderRecord, OrderRole, Position, Side, TargetOrder};
pub use engine::{AccountOutcome, GridEngine, Leg, TickSummary};
pub use error::GridError;
pub use gateway::{Gateway, GatewayError, PaperGateway};
pub use grid::build_target_grid;
pub use instrument::{round_to_step, InstrumentSpec, SpecCache};
pub use reconcile::{check_integrity, reconcile, Action, InvalidReason};
pub use sizing::{basis_equity, compute_order_size};
pub use state::{FileStateStore, GridState, MemoryStateStore, StateStore};
