// ===============================
// src/error.rs
// ===============================
use thiserror::Error;

use crate::domain::OrderRole;
use crate::gateway::GatewayError;
use crate::state::StateError;

/// Failures the engine can see while working one account's tick.
/// None of them crosses into the other account.
#[derive(Debug, Error)]
pub enum GridError {
    #[error("fetch {what} failed: {source}")]
    TransientFetch {
        what: &'static str,
        #[source]
        source: GatewayError,
    },
    #[error("{role} order rejected: {source}")]
    SubmissionRejected {
        role: OrderRole,
        #[source]
        source: GatewayError,
    },
    #[error("instrument spec unavailable: {0}")]
    SpecUnavailable(#[source] GatewayError),
    #[error("state persistence failed: {0}")]
    Persistence(#[from] StateError),
    #[error("invalid config: {0}")]
    Config(String),
    #[error("missing credentials for {0} account")]
    MissingCredentials(String),
}

impl GridError {
    pub fn fetch(what: &'static str) -> impl FnOnce(GatewayError) -> GridError {
        move |source| GridError::TransientFetch { what, source }
    }
}
