// ===============================
// src/main.rs
// ===============================
/*
 # sekali jalan (dry run di paper venue)
 VENUE_MODE=mock cargo run --bin grid_bot -- --once

 # status grid per akun
 curl -s localhost:9898/metrics | grep '^grid_state'
 curl -s localhost:9898/metrics | grep '^grid_rebuilds_total'
*/
/*
=============================================================================
Project : dual_grid_bot — paired long/short staircase grids in Rust
Module  : main.rs
Version : 0.1.0
Author  : dual_grid_bot contributors
License : MIT (see LICENSE)

Summary : Keeps two staircase grids (long-biased and short-biased) resting on
          a futures venue, sized from the smaller of the two account equities,
          and rebuilds a grid whenever its live orders drift, fill, or vanish.

(c) 2025 dual_grid_bot contributors.
=============================================================================
*/
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use rust_decimal_macros::dec;
use tokio::{sync::mpsc, time::Duration};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use dual_grid_bot::config::{self, Cli, Credentials, VenueMode};
use dual_grid_bot::domain::Event;
use dual_grid_bot::engine::{GridEngine, Leg};
use dual_grid_bot::gateway::{Gateway, PaperGateway};
use dual_grid_bot::gateway_kraken::KrakenGateway;
use dual_grid_bot::state::FileStateStore;
use dual_grid_bot::{metrics, recorder, GridError};

fn paper(args: &config::Args, name: &str) -> Arc<dyn Gateway> {
    Arc::new(PaperGateway::new(name, &args.symbol, dec!(10000)))
}

fn kraken(args: &config::Args, name: &str, creds: Credentials) -> Result<Arc<dyn Gateway>, GridError> {
    let timeout = Duration::from_secs(args.request_timeout_secs);
    let gw = KrakenGateway::new(name, &args.rest_url, creds, timeout)
        .map_err(|e| GridError::Config(format!("{name}: http client: {e}")))?;
    Ok(Arc::new(gw))
}

fn build_legs(args: &config::Args) -> Result<Vec<Leg>, GridError> {
    let [long_gw, short_gw] = match args.venue_mode {
        VenueMode::Mock => [paper(args, args.long.name()), paper(args, args.short.name())],
        VenueMode::KrakenDemo | VenueMode::KrakenLive => {
            let (long_creds, short_creds) = args.require_credentials()?;
            [kraken(args, args.long.name(), long_creds)?, kraken(args, args.short.name(), short_creds)?]
        }
    };
    Ok(vec![
        Leg { config: args.long.clone(), gateway: long_gw },
        Leg { config: args.short.clone(), gateway: short_gw },
    ])
}

#[tokio::main]
async fn main() -> ExitCode {
    // ---- Logging ----
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ---- Load CLI + config ----
    let cli = Cli::parse();
    let args = match config::load() {
        Ok(a) => a,
        Err(e) => {
            error!(error = %e, "config invalid");
            return ExitCode::FAILURE;
        }
    };

    info!(
        symbol = %args.symbol,
        venue_mode = %args.venue_mode.as_str(),
        rest = %args.rest_url,
        interval_secs = args.update_interval_secs,
        spec_refresh_secs = args.spec_refresh_secs,
        long_levels = ?args.long.levels(),
        long_stop = %args.long.stop_price(),
        short_levels = ?args.short.levels(),
        short_stop = %args.short.stop_price(),
        rungs = args.params.rungs,
        size_tolerance = %args.params.size_tolerance,
        fill_tolerance = %args.params.fill_tolerance,
        state_file = %args.state_file,
        "startup config"
    );

    // ---- Gateways (kredensial hilang = stop) ----
    let legs = match build_legs(&args) {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, "cannot start");
            return ExitCode::FAILURE;
        }
    };

    // ---- Metrics ----
    metrics::init();
    if args.metrics_port != 0 {
        metrics::serve_metrics(args.metrics_port);
    }

    // ---- Engine ----
    let store = FileStateStore::new(&args.state_file);
    info!(path = %store.path().display(), "state store");
    let mut engine = GridEngine::new(&args.symbol, legs, args.params, Box::new(store));

    // ---- Recorder (optional) ----
    let mut recorder_task = None;
    if let Some(path) = args.record_file.clone() {
        let (rec_tx, rec_rx) = mpsc::channel::<Event>(1024);
        recorder_task = Some(tokio::spawn(recorder::run(rec_rx, path)));
        engine = engine.with_recorder(rec_tx);
    }

    engine.refresh_spec().await;

    if cli.reset {
        let summary = engine.reset().await;
        info!(basis = %summary.basis_equity, outcomes = ?summary.outcomes, "reset done");
    }

    if cli.once {
        let summary = engine.tick().await;
        info!(basis = %summary.basis_equity, outcomes = ?summary.outcomes, "single tick done");
    } else {
        info!(symbol = %args.symbol, "engine started");
        engine
            .run(
                Duration::from_secs(args.update_interval_secs),
                Duration::from_secs(args.spec_refresh_secs),
            )
            .await;
    }

    // drop sender supaya recorder flush & selesai
    drop(engine);
    if let Some(task) = recorder_task {
        let _ = task.await;
    }
    ExitCode::SUCCESS
}
