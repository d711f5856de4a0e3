// ===============================
// src/gateway_kraken.rs
// ===============================
use async_trait::async_trait;
use reqwest::Method;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Credentials;
use crate::domain::{LiveOrder, OrderKind, OrderRequest, Position};
use crate::gateway::{Gateway, GatewayError, GatewayResult};
use crate::instrument::InstrumentSpec;
use crate::kraken::{
    encode_params, sign_request, AccountsResponse, Envelope, InstrumentsResponse, NonceSource,
    OpenOrdersResponse, OpenPositionsResponse, SendOrderResponse,
};

const EP_ACCOUNTS: &str = "/derivatives/api/v3/accounts";
const EP_OPEN_ORDERS: &str = "/derivatives/api/v3/openorders";
const EP_OPEN_POSITIONS: &str = "/derivatives/api/v3/openpositions";
const EP_SEND_ORDER: &str = "/derivatives/api/v3/sendorder";
const EP_CANCEL_ORDER: &str = "/derivatives/api/v3/cancelorder";
const EP_CANCEL_ALL: &str = "/derivatives/api/v3/cancelallorders";
const EP_INSTRUMENTS: &str = "/derivatives/api/v3/instruments";

/// Kraken Futures REST, satu instance per akun (API key sendiri).
pub struct KrakenGateway {
    account: String,
    rest_base: String,
    creds: Credentials,
    http: reqwest::Client,
    nonce: NonceSource,
}

impl KrakenGateway {
    pub fn new(account: &str, rest_base: &str, creds: Credentials, timeout: Duration) -> GatewayResult<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            account: account.to_string(),
            rest_base: rest_base.trim_end_matches('/').to_string(),
            creds,
            http,
            nonce: NonceSource::default(),
        })
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        params: &[(&str, String)],
        private: bool,
    ) -> GatewayResult<T> {
        let post_data = encode_params(params);
        let mut url = format!("{}{}", self.rest_base, endpoint);
        let mut req = if method == Method::GET {
            if !post_data.is_empty() {
                url = format!("{url}?{post_data}");
            }
            self.http.get(&url)
        } else {
            self.http
                .request(method, &url)
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body(post_data.clone())
        };

        if private {
            let nonce = self.nonce.next().to_string();
            let authent = sign_request(&self.creds.api_secret, &post_data, &nonce, endpoint)?;
            req = req
                .header("APIKey", &self.creds.api_key)
                .header("Nonce", nonce)
                .header("Authent", authent);
        }

        let rsp = req.send().await?;
        let status = rsp.status();
        let body = rsp.text().await?;
        if !status.is_success() {
            return Err(GatewayError::Http { status: status.as_u16(), body });
        }
        debug!(account = %self.account, %endpoint, "kraken response ok");

        let envelope: Envelope = serde_json::from_str(&body).map_err(|e| GatewayError::Parse(e.to_string()))?;
        envelope.check()?;
        serde_json::from_str(&body).map_err(|e| GatewayError::Parse(format!("{endpoint}: {e}")))
    }
}

fn order_params(req: &OrderRequest) -> GatewayResult<Vec<(&'static str, String)>> {
    let order_type = match req.kind {
        OrderKind::Limit => "lmt",
        OrderKind::Stop => "stp",
        OrderKind::Market => "mkt",
        OrderKind::Other => return Err(GatewayError::Rejected("grid cannot submit this order type".into())),
    };
    let mut params = vec![
        ("orderType", order_type.to_string()),
        ("symbol", req.symbol.clone()),
        ("side", req.side.as_str().to_string()),
        ("size", req.size.normalize().to_string()),
    ];
    match (req.kind, req.price) {
        (OrderKind::Limit, Some(p)) => params.push(("limitPrice", p.normalize().to_string())),
        (OrderKind::Stop, Some(p)) => params.push(("stopPrice", p.normalize().to_string())),
        (OrderKind::Market | OrderKind::Other, _) => {}
        (_, None) => return Err(GatewayError::Rejected("limit/stop order without price".into())),
    }
    if req.reduce_only {
        params.push(("reduceOnly", "true".to_string()));
    }
    params.push(("cliOrdId", format!("grid-{}", rand::random::<u64>())));
    Ok(params)
}

/// One malformed entry must not hide the rest of the book; it is logged and dropped.
fn live_orders(account: &str, resp: &OpenOrdersResponse) -> Vec<LiveOrder> {
    resp.open_orders
        .iter()
        .filter_map(|o| match o.to_live() {
            Ok(lo) => Some(lo),
            Err(e) => {
                warn!(%account, id = %o.order_id, symbol = %o.symbol, error = %e, "open order skipped");
                None
            }
        })
        .collect()
}

#[async_trait]
impl Gateway for KrakenGateway {
    fn account(&self) -> &str { &self.account }

    async fn equity(&self) -> GatewayResult<Decimal> {
        let acc: AccountsResponse = self.send(Method::GET, EP_ACCOUNTS, &[], true).await?;
        acc.margin_equity()
            .ok_or_else(|| GatewayError::Parse("no account reports marginEquity".into()))
    }

    async fn open_orders(&self) -> GatewayResult<Vec<LiveOrder>> {
        let resp: OpenOrdersResponse = self.send(Method::GET, EP_OPEN_ORDERS, &[], true).await?;
        Ok(live_orders(&self.account, &resp))
    }

    async fn position(&self, symbol: &str) -> GatewayResult<Option<Position>> {
        let resp: OpenPositionsResponse = self.send(Method::GET, EP_OPEN_POSITIONS, &[], true).await?;
        resp.for_symbol(symbol)
    }

    async fn submit_order(&self, req: &OrderRequest) -> GatewayResult<String> {
        let params = order_params(req)?;
        let resp: SendOrderResponse = self.send(Method::POST, EP_SEND_ORDER, &params, true).await?;
        resp.order_id()
    }

    async fn cancel_all(&self, symbol: &str) -> GatewayResult<()> {
        let _: Envelope = self.send(Method::POST, EP_CANCEL_ALL, &[("symbol", symbol.to_string())], true).await?;
        Ok(())
    }

    async fn cancel_order(&self, order_id: &str) -> GatewayResult<()> {
        let _: Envelope = self.send(Method::POST, EP_CANCEL_ORDER, &[("order_id", order_id.to_string())], true).await?;
        Ok(())
    }

    async fn instrument_spec(&self, symbol: &str) -> GatewayResult<InstrumentSpec> {
        let resp: InstrumentsResponse = self.send(Method::GET, EP_INSTRUMENTS, &[], false).await?;
        let ins = resp
            .instruments
            .iter()
            .find(|i| i.symbol.eq_ignore_ascii_case(symbol))
            .ok_or_else(|| GatewayError::SymbolNotFound(symbol.to_string()))?;
        let tick = ins.tick_size.ok_or_else(|| GatewayError::Parse(format!("{symbol}: no tickSize")))?;
        let precision = ins
            .contract_value_precision
            .ok_or_else(|| GatewayError::Parse(format!("{symbol}: no contractValuePrecision")))?;
        InstrumentSpec::from_precision(tick, precision).map_err(|e| GatewayError::Parse(e.to_string()))
    }
}
