// ===============================
// src/kraken.rs
// ===============================
//
// Helper Kraken Futures: signer (Authent), nonce, dan model JSON minimal.
//
// Authent = base64( HMAC-SHA512( base64decode(secret), SHA256(postData + nonce + endpointPath) ) )
// endpointPath tanpa prefix "/derivatives", mis. "/api/v3/sendorder".
//
use base64::Engine;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::{Digest, Sha256, Sha512};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::domain::{LiveOrder, OrderKind, Position, Side};
use crate::gateway::GatewayError;

pub const API_PREFIX: &str = "/derivatives";

pub fn timestamp_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

/// Strictly increasing nonce, even for calls in the same millisecond.
#[derive(Debug, Default)]
pub struct NonceSource {
    last: AtomicU64,
}

impl NonceSource {
    pub fn next(&self) -> u64 {
        let now = timestamp_ms();
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(prev + 1);
            match self.last.compare_exchange_weak(prev, candidate, Ordering::AcqRel, Ordering::Relaxed) {
                Ok(_) => return candidate,
                Err(actual) => prev = actual,
            }
        }
    }
}

pub fn sign_request(secret_b64: &str, post_data: &str, nonce: &str, endpoint_path: &str) -> Result<String, GatewayError> {
    let path = endpoint_path.strip_prefix(API_PREFIX).unwrap_or(endpoint_path);
    let digest = Sha256::digest(format!("{post_data}{nonce}{path}").as_bytes());

    let engine = base64::engine::general_purpose::STANDARD;
    let key = engine
        .decode(secret_b64.trim())
        .map_err(|e| GatewayError::Api(format!("api secret is not base64: {e}")))?;
    let mut mac = Hmac::<Sha512>::new_from_slice(&key)
        .map_err(|e| GatewayError::Api(format!("bad hmac key: {e}")))?;
    mac.update(&digest);
    Ok(engine.encode(mac.finalize().into_bytes()))
}

/// `k=v&k=v` with url-encoded values, order preserved (it is what gets signed).
pub fn encode_params(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

// --- Model minimal untuk response REST ---

#[derive(Debug, Deserialize)]
pub struct Envelope {
    pub result: Option<String>,
    pub error: Option<String>,
}

impl Envelope {
    pub fn check(&self) -> Result<(), GatewayError> {
        if self.result.as_deref() == Some("error") || self.error.is_some() {
            return Err(GatewayError::Api(self.error.clone().unwrap_or_else(|| "unknown error".to_string())));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct AccountEntry {
    #[serde(rename = "marginEquity")]
    pub margin_equity: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
pub struct AccountsResponse {
    #[serde(default)]
    pub accounts: BTreeMap<String, AccountEntry>,
}

impl AccountsResponse {
    /// Flex (multi-collateral) equity if present, else the first account reporting one.
    pub fn margin_equity(&self) -> Option<Decimal> {
        self.accounts
            .get("flex")
            .and_then(|a| a.margin_equity)
            .or_else(|| self.accounts.values().find_map(|a| a.margin_equity))
    }
}

#[derive(Debug, Deserialize)]
pub struct OpenOrderWire {
    pub order_id: String,
    pub symbol: String,
    pub side: String,
    #[serde(rename = "orderType")]
    pub order_type: String,
    #[serde(rename = "limitPrice")]
    pub limit_price: Option<Decimal>,
    #[serde(rename = "stopPrice")]
    pub stop_price: Option<Decimal>,
    #[serde(rename = "unfilledSize")]
    pub unfilled_size: Option<Decimal>,
}

pub fn parse_side(s: &str) -> Result<Side, GatewayError> {
    match s.to_ascii_lowercase().as_str() {
        "buy" | "long" => Ok(Side::Buy),
        "sell" | "short" => Ok(Side::Sell),
        other => Err(GatewayError::Parse(format!("unknown side {other:?}"))),
    }
}

impl OpenOrderWire {
    pub fn to_live(&self) -> Result<LiveOrder, GatewayError> {
        let kind = match self.order_type.to_ascii_lowercase().as_str() {
            "lmt" | "limit" | "post" => OrderKind::Limit,
            "stp" | "stop" => OrderKind::Stop,
            "mkt" => OrderKind::Market,
            _ => OrderKind::Other,
        };
        let price = match kind {
            OrderKind::Stop => self.stop_price,
            OrderKind::Other => Some(self.limit_price.or(self.stop_price).unwrap_or(Decimal::ZERO)),
            _ => self.limit_price,
        }
        .ok_or_else(|| GatewayError::Parse(format!("order {} has no price", self.order_id)))?;
        Ok(LiveOrder {
            order_id: self.order_id.clone(),
            symbol: self.symbol.to_ascii_uppercase(),
            side: parse_side(&self.side)?,
            kind,
            price,
            size: self.unfilled_size.unwrap_or(Decimal::ZERO),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct OpenOrdersResponse {
    #[serde(rename = "openOrders", default)]
    pub open_orders: Vec<OpenOrderWire>,
}

#[derive(Debug, Deserialize)]
pub struct PositionWire {
    pub side: String,
    pub symbol: String,
    pub size: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct OpenPositionsResponse {
    #[serde(rename = "openPositions", default)]
    pub open_positions: Vec<PositionWire>,
}

impl OpenPositionsResponse {
    pub fn for_symbol(&self, symbol: &str) -> Result<Option<Position>, GatewayError> {
        match self.open_positions.iter().find(|p| p.symbol.eq_ignore_ascii_case(symbol)) {
            Some(p) if !p.size.is_zero() => Ok(Some(Position { side: parse_side(&p.side)?, size: p.size.abs() })),
            _ => Ok(None),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SendStatus {
    pub order_id: Option<String>,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct SendOrderResponse {
    #[serde(rename = "sendStatus")]
    pub send_status: Option<SendStatus>,
}

impl SendOrderResponse {
    /// Venue order id, or the rejection status (e.g. `insufficientAvailableFunds`).
    pub fn order_id(&self) -> Result<String, GatewayError> {
        let st = self
            .send_status
            .as_ref()
            .ok_or_else(|| GatewayError::Parse("missing sendStatus".into()))?;
        match (st.status.as_str(), &st.order_id) {
            ("placed", Some(id)) => Ok(id.clone()),
            (status, _) => Err(GatewayError::Rejected(status.to_string())),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct InstrumentWire {
    pub symbol: String,
    #[serde(rename = "tickSize")]
    pub tick_size: Option<Decimal>,
    #[serde(rename = "contractValuePrecision")]
    pub contract_value_precision: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct InstrumentsResponse {
    #[serde(default)]
    pub instruments: Vec<InstrumentWire>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn signature_matches_reference_vector() {
        let sig = sign_request(
            "Z3JpZC1ib3QtdGVzdC1zZWNyZXQtMDEyMzQ1Njc4OQ==",
            "orderType=lmt&symbol=PF_XBTUSD&side=buy&size=0.0133&limitPrice=60000",
            "1700000000000",
            "/derivatives/api/v3/sendorder",
        )
        .unwrap();
        assert_eq!(
            sig,
            "iNF4WpZgorOq7u1eNV+Z5oK/uVjJxaN6Y7S+9aiG7hdDD/Q4Cjzzzk63UMq/XL0OlX3qaiYEJeguyQtmcoVhjg=="
        );
    }

    #[test]
    fn bad_secret_is_an_error() {
        assert!(sign_request("not base64!!", "", "1", "/api/v3/accounts").is_err());
    }

    #[test]
    fn nonce_is_strictly_increasing() {
        let n = NonceSource::default();
        let a = n.next();
        let b = n.next();
        let c = n.next();
        assert!(a < b && b < c);
    }

    #[test]
    fn equity_prefers_flex_account() {
        let raw = r#"{"result":"success","accounts":{
            "cash":{"type":"cashAccount","balances":{"xbt":0.1}},
            "fi_xbtusd":{"marginEquity":5.0},
            "flex":{"marginEquity":10000.5}}}"#;
        let acc: AccountsResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(acc.margin_equity(), Some(dec!(10000.5)));

        let raw = r#"{"accounts":{"fi_xbtusd":{"marginEquity":5.0}}}"#;
        let acc: AccountsResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(acc.margin_equity(), Some(dec!(5)));
    }

    #[test]
    fn open_orders_map_to_live_orders() {
        let raw = r#"{"result":"success","openOrders":[
            {"order_id":"a1","symbol":"ff_xbtusd_260227","side":"buy","orderType":"lmt","limitPrice":60000.0,"unfilledSize":0.0133,"filledSize":0,"reduceOnly":false},
            {"order_id":"s1","symbol":"FF_XBTUSD_260227","side":"sell","orderType":"stop","stopPrice":59000,"unfilledSize":0.0645,"reduceOnly":true}
        ]}"#;
        let resp: OpenOrdersResponse = serde_json::from_str(raw).unwrap();
        let live: Vec<LiveOrder> = resp.open_orders.iter().map(|o| o.to_live().unwrap()).collect();
        assert_eq!(live[0].kind, OrderKind::Limit);
        assert_eq!(live[0].price, dec!(60000));
        assert_eq!(live[0].size, dec!(0.0133));
        assert_eq!(live[0].symbol, "FF_XBTUSD_260227");
        assert_eq!(live[1].kind, OrderKind::Stop);
        assert_eq!(live[1].price, dec!(59000));
        assert_eq!(live[1].side, Side::Sell);
    }

    #[test]
    fn foreign_order_types_are_kept_as_other() {
        let raw = r#"{"openOrders":[
            {"order_id":"tp1","symbol":"PF_ETHUSD","side":"sell","orderType":"take_profit","stopPrice":4000,"unfilledSize":1},
            {"order_id":"ts1","symbol":"FF_XBTUSD_260227","side":"sell","orderType":"trailing_stop","unfilledSize":0.01}
        ]}"#;
        let resp: OpenOrdersResponse = serde_json::from_str(raw).unwrap();
        let live: Vec<LiveOrder> = resp.open_orders.iter().map(|o| o.to_live().unwrap()).collect();
        assert_eq!(live[0].kind, OrderKind::Other);
        assert_eq!(live[0].price, dec!(4000));
        assert_eq!(live[1].kind, OrderKind::Other);
        assert_eq!(live[1].price, Decimal::ZERO);
        assert_eq!(live[1].size, dec!(0.01));
    }

    #[test]
    fn send_status_other_than_placed_is_rejection() {
        let ok: SendOrderResponse =
            serde_json::from_str(r#"{"result":"success","sendStatus":{"order_id":"abc","status":"placed"}}"#).unwrap();
        assert_eq!(ok.order_id().unwrap(), "abc");
        let rej: SendOrderResponse =
            serde_json::from_str(r#"{"result":"success","sendStatus":{"status":"insufficientAvailableFunds"}}"#).unwrap();
        assert!(matches!(rej.order_id(), Err(GatewayError::Rejected(s)) if s == "insufficientAvailableFunds"));
    }

    #[test]
    fn error_envelope_is_detected() {
        let env: Envelope = serde_json::from_str(r#"{"result":"error","error":"apiLimitExceeded"}"#).unwrap();
        assert!(env.check().is_err());
        let env: Envelope = serde_json::from_str(r#"{"result":"success"}"#).unwrap();
        assert!(env.check().is_ok());
    }

    #[test]
    fn positions_filter_by_symbol() {
        let raw = r#"{"openPositions":[{"side":"short","symbol":"PF_XBTUSD","price":67000,"size":0.02}]}"#;
        let resp: OpenPositionsResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.for_symbol("pf_xbtusd").unwrap(), Some(Position { side: Side::Sell, size: dec!(0.02) }));
        assert_eq!(resp.for_symbol("FF_XBTUSD_260227").unwrap(), None);
    }
}
