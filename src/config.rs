// ===============================
// src/config.rs
// ===============================
/*
=============================================================================
Project : dual_grid_bot — paired long/short staircase grids in Rust
Module  : config.rs
Version : 0.1.0
Author  : dual_grid_bot contributors
License : MIT (see LICENSE)

Summary : Keeps two staircase grids (long-biased and short-biased) resting on
          a futures venue, sized from the smaller of the two account equities,
          and rebuilds a grid whenever its live orders drift, fill, or vanish.

(c) 2025 dual_grid_bot contributors.
=============================================================================
*/
use std::env;
use std::str::FromStr;

use clap::Parser;
use dotenvy::dotenv;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::domain::Side;
use crate::error::GridError;

/// Flag CLI (sisanya dari ENV)
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "grid_bot", version, about = "Paired long/short staircase grid keeper")]
pub struct Cli {
    /// Run a single reconciliation tick and exit
    #[arg(long)]
    pub once: bool,
    /// Cold start: cancel everything, flatten positions, rebuild both grids
    #[arg(long)]
    pub reset: bool,
}

/// Venue tempat order dikirim
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VenueMode {
    Mock,
    KrakenDemo,
    KrakenLive,
}

impl VenueMode {
    pub fn from_env(key: &str, default_mode: VenueMode) -> VenueMode {
        match env::var(key).unwrap_or_default().to_ascii_lowercase().as_str() {
            "mock"        => VenueMode::Mock,
            "kraken_demo" => VenueMode::KrakenDemo,
            "kraken_live" => VenueMode::KrakenLive,
            _ => default_mode,
        }
    }

    pub fn default_rest_url(&self) -> &'static str {
        match self {
            VenueMode::Mock       => "https://demo-futures.kraken.com", // tidak dipakai saat mock
            VenueMode::KrakenDemo => "https://demo-futures.kraken.com",
            VenueMode::KrakenLive => "https://futures.kraken.com",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VenueMode::Mock => "mock",
            VenueMode::KrakenDemo => "kraken_demo",
            VenueMode::KrakenLive => "kraken_live",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccountRole { Long, Short }

impl AccountRole {
    pub fn name(&self) -> &'static str {
        match self { AccountRole::Long => "LONG", AccountRole::Short => "SHORT" }
    }
    pub fn entry_side(&self) -> Side {
        match self { AccountRole::Long => Side::Buy, AccountRole::Short => Side::Sell }
    }
}

/// Immutable ladder for one account. Passed into every core call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountConfig {
    role: AccountRole,
    levels: Vec<Decimal>,
    stop: Decimal,
}

impl AccountConfig {
    /// Validates the ladder: non-empty, positive prices, and a stop strictly
    /// beyond every level on the losing side.
    pub fn new(role: AccountRole, levels: Vec<Decimal>, stop: Decimal) -> Result<Self, GridError> {
        let name = role.name();
        if levels.is_empty() {
            return Err(GridError::Config(format!("{name}: at least one grid level required")));
        }
        if stop <= Decimal::ZERO || levels.iter().any(|p| *p <= Decimal::ZERO) {
            return Err(GridError::Config(format!("{name}: grid prices must be positive")));
        }
        let stop_ok = match role {
            AccountRole::Long => levels.iter().all(|p| stop < *p),
            AccountRole::Short => levels.iter().all(|p| stop > *p),
        };
        if !stop_ok {
            return Err(GridError::Config(format!(
                "{name}: stop {stop} must sit beyond every level on the losing side"
            )));
        }
        Ok(Self { role, levels, stop })
    }

    /// Reference ladder: buys 60k–64k protected at 59k.
    pub fn reference_long() -> Self {
        Self {
            role: AccountRole::Long,
            levels: vec![dec!(60000), dec!(61000), dec!(62000), dec!(63000), dec!(64000)],
            stop: dec!(59000),
        }
    }

    /// Reference ladder: sells 66k–70k protected at 71k.
    pub fn reference_short() -> Self {
        Self {
            role: AccountRole::Short,
            levels: vec![dec!(66000), dec!(67000), dec!(68000), dec!(69000), dec!(70000)],
            stop: dec!(71000),
        }
    }

    pub fn role(&self) -> AccountRole { self.role }
    pub fn name(&self) -> &'static str { self.role.name() }
    pub fn levels(&self) -> &[Decimal] { &self.levels }
    pub fn stop_price(&self) -> Decimal { self.stop }
    pub fn side(&self) -> Side { self.role.entry_side() }
    pub fn stop_side(&self) -> Side { self.role.entry_side().opposite() }

    /// Levels ordered closest-to-market first: highest bid first for the long
    /// ladder, lowest offer first for the short one.
    pub fn levels_fill_order(&self) -> Vec<Decimal> {
        let mut v = self.levels.clone();
        match self.role {
            AccountRole::Long => v.sort_by(|a, b| b.cmp(a)),
            AccountRole::Short => v.sort(),
        }
        v
    }
}

/// Tunables shared by sizing, grid building and reconciliation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GridParams {
    /// Each rung risks `1 / rungs` of the basis equity.
    pub rungs: u32,
    /// Max fractional size deviation before a resting order is replaced.
    pub size_tolerance: Decimal,
    /// Fraction of a rung that must already sit in the position for the rung to count as filled.
    pub fill_tolerance: Decimal,
}

impl Default for GridParams {
    fn default() -> Self {
        Self { rungs: 10, size_tolerance: dec!(0.05), fill_tolerance: dec!(0.90) }
    }
}

#[derive(Clone, Debug)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

#[derive(Clone, Debug)]
pub struct Args {
    pub symbol: String,
    pub update_interval_secs: u64,
    pub spec_refresh_secs: u64,
    pub request_timeout_secs: u64,

    // files/metrics
    pub state_file: String,
    pub record_file: Option<String>,
    pub metrics_port: u16,

    // venue
    pub venue_mode: VenueMode,
    pub rest_url: String,
    pub long_credentials: Option<Credentials>,
    pub short_credentials: Option<Credentials>,

    // grid
    pub long: AccountConfig,
    pub short: AccountConfig,
    pub params: GridParams,
}

impl Args {
    /// Kredensial wajib kecuali mode mock. Satu-satunya error yang fatal.
    pub fn require_credentials(&self) -> Result<(Credentials, Credentials), GridError> {
        let long = self
            .long_credentials
            .clone()
            .ok_or_else(|| GridError::MissingCredentials(AccountRole::Long.name().to_string()))?;
        let short = self
            .short_credentials
            .clone()
            .ok_or_else(|| GridError::MissingCredentials(AccountRole::Short.name().to_string()))?;
        Ok((long, short))
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}

fn credentials(key_var: &str, secret_var: &str) -> Option<Credentials> {
    let api_key = env::var(key_var).ok().filter(|s| !s.trim().is_empty())?;
    let api_secret = env::var(secret_var).ok().filter(|s| !s.trim().is_empty())?;
    Some(Credentials { api_key, api_secret })
}

/// "60000,61000,62000" -> [60000, 61000, 62000]
pub fn parse_levels(raw: &str) -> Result<Vec<Decimal>, GridError> {
    raw.split(',')
        .map(|x| x.trim())
        .filter(|x| !x.is_empty())
        .map(|x| Decimal::from_str(x).map_err(|e| GridError::Config(format!("bad level {x:?}: {e}"))))
        .collect()
}

fn account_from_env(
    role: AccountRole,
    levels_key: &str,
    stop_key: &str,
    reference: AccountConfig,
) -> Result<AccountConfig, GridError> {
    let levels = match env::var(levels_key) {
        Ok(raw) => parse_levels(&raw)?,
        Err(_) => reference.levels().to_vec(),
    };
    let stop = match env::var(stop_key) {
        Ok(raw) => Decimal::from_str(raw.trim())
            .map_err(|e| GridError::Config(format!("bad {stop_key} {raw:?}: {e}")))?,
        Err(_) => reference.stop_price(),
    };
    AccountConfig::new(role, levels, stop)
}

pub fn load() -> Result<Args, GridError> {
    // Pastikan .env dibaca (KEY1, KEY1SEC, SYMBOL, dll)
    let _ = dotenv();

    // ===== Basic =====
    let symbol = env::var("SYMBOL")
        .unwrap_or_else(|_| "FF_XBTUSD_260227".to_string())
        .trim()
        .to_ascii_uppercase();
    let update_interval_secs = env_parse("UPDATE_INTERVAL", 600u64).max(1);
    let spec_refresh_secs = env_parse("SPEC_REFRESH_SECS", 3600u64).max(1);
    let request_timeout_secs = env_parse("REQUEST_TIMEOUT_SECS", 10u64).max(1);

    let state_file  = env::var("STATE_FILE").unwrap_or_else(|_| "grid_state.json".to_string());
    let record_file = env::var("RECORD_FILE").ok();
    let metrics_port = env_parse("METRICS_PORT", 9898u16);

    // ===== Venue =====
    let venue_mode = VenueMode::from_env("VENUE_MODE", VenueMode::Mock);
    let rest_url = env::var("KRAKEN_REST_URL")
        .unwrap_or_else(|_| venue_mode.default_rest_url().to_string());
    let long_credentials = credentials("KEY1", "KEY1SEC");
    let short_credentials = credentials("KEY2", "KEY2SEC");

    // ===== Grid =====
    // Contoh:
    //   LONG_LEVELS=60000,61000,62000,63000,64000   LONG_STOP=59000
    //   SHORT_LEVELS=66000,67000,68000,69000,70000  SHORT_STOP=71000
    let long = account_from_env(AccountRole::Long, "LONG_LEVELS", "LONG_STOP", AccountConfig::reference_long())?;
    let short = account_from_env(AccountRole::Short, "SHORT_LEVELS", "SHORT_STOP", AccountConfig::reference_short())?;

    let defaults = GridParams::default();
    let default_rungs = (long.levels().len() + short.levels().len()) as u32;
    let params = GridParams {
        rungs: env_parse("GRID_RUNGS", default_rungs).max(1),
        size_tolerance: env_parse("SIZE_TOLERANCE", defaults.size_tolerance),
        fill_tolerance: env_parse("FILL_TOLERANCE", defaults.fill_tolerance),
    };
    if params.size_tolerance < Decimal::ZERO || params.fill_tolerance <= Decimal::ZERO || params.fill_tolerance > Decimal::ONE {
        return Err(GridError::Config(format!(
            "tolerances out of range (size={}, fill={})",
            params.size_tolerance, params.fill_tolerance
        )));
    }

    Ok(Args {
        symbol,
        update_interval_secs,
        spec_refresh_secs,
        request_timeout_secs,
        state_file,
        record_file,
        metrics_port,
        venue_mode,
        rest_url,
        long_credentials,
        short_credentials,
        long,
        short,
        params,
    })
}
