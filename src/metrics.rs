// ===============================
// src/metrics.rs
// ===============================
use once_cell::sync::Lazy;
use prometheus::{Encoder, Gauge, GaugeVec, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

use crate::domain::AccountState;

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Reconciliation loop --------
pub static TICKS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("ticks_total", "reconciliation ticks").unwrap());

pub static GRID_STATE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("grid_state", "1 for the current grid state of an account (labels: account, state)"),
        &["account", "state"],
    )
    .unwrap()
});

pub static REBUILDS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("grid_rebuilds_total", "grid rebuilds by triggering state"),
        &["account", "state"],
    )
    .unwrap()
});

pub static FETCH_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("fetch_failures_total", "failed reads from the venue"),
        &["account", "what"],
    )
    .unwrap()
});

// -------- Orders --------
pub static ORDERS_PLACED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("orders_placed_total", "orders accepted by the venue"),
        &["account", "role"],
    )
    .unwrap()
});

pub static ORDERS_REJECTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("orders_rejected_total", "orders rejected by the venue"),
        &["account", "role"],
    )
    .unwrap()
});

// -------- Equity --------
pub static EQUITY: Lazy<GaugeVec> = Lazy::new(|| {
    GaugeVec::new(Opts::new("account_equity", "margin equity per account"), &["account"]).unwrap()
});

pub static BASIS_EQUITY: Lazy<Gauge> =
    Lazy::new(|| Gauge::new("basis_equity", "min equity of the paired accounts").unwrap());

// -------- Housekeeping --------
pub static PERSIST_FAILURES: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("state_persist_failures_total", "failed state file writes").unwrap());

pub static SPEC_REFRESH: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("spec_refresh_total", "instrument spec refresh attempts (label: result)"),
        &["result"],
    )
    .unwrap()
});

pub fn init() {
    // Register all metrics to the custom registry
    for m in [
        REGISTRY.register(Box::new(TICKS.clone())),
        REGISTRY.register(Box::new(GRID_STATE.clone())),
        REGISTRY.register(Box::new(REBUILDS.clone())),
        REGISTRY.register(Box::new(FETCH_FAILURES.clone())),
        REGISTRY.register(Box::new(ORDERS_PLACED.clone())),
        REGISTRY.register(Box::new(ORDERS_REJECTED.clone())),
        REGISTRY.register(Box::new(EQUITY.clone())),
        REGISTRY.register(Box::new(BASIS_EQUITY.clone())),
        REGISTRY.register(Box::new(PERSIST_FAILURES.clone())),
        REGISTRY.register(Box::new(SPEC_REFRESH.clone())),
    ] {
        if let Err(e) = m {
            tracing::debug!(error = %e, "metric already registered");
        }
    }
}

/// One-hot gauge: the current state gets 1, the others 0.
pub fn set_grid_state(account: &str, state: AccountState) {
    for s in AccountState::ALL {
        GRID_STATE
            .with_label_values(&[account, s.as_str()])
            .set(i64::from(s == state));
    }
}

// Encode all metrics in Prometheus text format
fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

// Serve one HTTP request (GET / or /metrics), tiny HTTP 1.1 responder
fn handle_client(mut stream: TcpStream) {
    // Read a bit to consume headers (no full parse)
    let mut _req_buf = [0u8; 1024];
    let _ = stream.read(&mut _req_buf);

    let body = encode_metrics();
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );

    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(&body);
    let _ = stream.flush();
}

// Metrics server di OS thread sendiri (runtime Tokio tetap bersih)
pub fn serve_metrics(port: u16) {
    thread::spawn(move || {
        let addr = format!("0.0.0.0:{port}");
        let listener = match TcpListener::bind(&addr) {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(%addr, error = %e, "metrics bind failed, metrics disabled");
                return;
            }
        };
        tracing::info!("metrics listening on http://{addr}/ (and /metrics)");

        for conn in listener.incoming() {
            match conn {
                Ok(stream) => handle_client(stream),
                Err(e) => tracing::warn!(error = %e, "metrics accept error"),
            }
        }
    });
}
