//! IBKR Client Portal REST client: contract search, snapshots, portfolio, orders.

use std::time::Duration;

use log::{debug, info};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use serde_json::Value;
use stratbook::Conid;

use crate::Gateway;
use crate::error::BrokerError;
use crate::types::*;

/// Everything a request needs to reach the gateway.
///
/// Built once from configuration and handed to [`ClientPortal::new`]; nothing
/// about the connection lives in process-wide state.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// e.g. `https://localhost:5000/v1/api`
    pub base_url: String,
    pub headers: Vec<(String, String)>,
    /// The local gateway ships a self-signed certificate.
    pub accept_invalid_certs: bool,
    pub timeout: Duration,
}

impl RequestContext {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            headers: vec![
                ("Content-Type".into(), "application/json".into()),
                ("User-Agent".into(), concat!("stratbook/", env!("CARGO_PKG_VERSION")).into()),
            ],
            accept_invalid_certs: true,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Blocking Client Portal client.
pub struct ClientPortal {
    client: Client,
    base_url: String,
}

impl ClientPortal {
    /// Build the HTTP client. Does not touch the network.
    pub fn new(ctx: &RequestContext) -> Result<Self, BrokerError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &ctx.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| BrokerError::Other(format!("invalid header name {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| BrokerError::Other(format!("invalid header value for {name}: {e}")))?;
            headers.insert(name, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .danger_accept_invalid_certs(ctx.accept_invalid_certs)
            .timeout(ctx.timeout)
            .build()
            .map_err(|e| BrokerError::Connection(format!("failed to build HTTP client: {e}")))?;

        info!("Client Portal gateway at {}", ctx.base_url);
        Ok(Self {
            client,
            base_url: ctx.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn send(&self, req: RequestBuilder, what: &'static str) -> Result<Response, BrokerError> {
        let resp = req
            .send()
            .map_err(|e| BrokerError::Connection(format!("{what} request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().unwrap_or_default();
            return Err(BrokerError::Http { status, body });
        }
        Ok(resp)
    }

    fn json<T: DeserializeOwned>(resp: Response, what: &'static str) -> Result<T, BrokerError> {
        let body = resp
            .text()
            .map_err(|e| BrokerError::Connection(format!("{what} body read failed: {e}")))?;
        serde_json::from_str(&body).map_err(|e| BrokerError::Parse {
            what,
            detail: format!("{e}: {}", truncate(&body, 200)),
        })
    }

    /// Order endpoints report rejections as `{"error": ...}`, sometimes with a
    /// non-2xx status. Either way the broker's text becomes the reply.
    fn order_reply(&self, req: RequestBuilder, what: &'static str) -> Result<OrderReply, BrokerError> {
        let resp = req
            .send()
            .map_err(|e| BrokerError::Connection(format!("{what} request failed: {e}")))?;
        let status = resp.status();
        let body = resp
            .text()
            .map_err(|e| BrokerError::Connection(format!("{what} body read failed: {e}")))?;
        debug!("{what} -> {status}: {}", truncate(&body, 200));

        match serde_json::from_str::<Value>(&body) {
            Ok(value) => {
                let reply = OrderReply::from_value(&value);
                if status.is_success() || matches!(reply, OrderReply::Rejected(_)) {
                    Ok(reply)
                } else {
                    Err(BrokerError::Http {
                        status: status.as_u16(),
                        body,
                    })
                }
            }
            Err(_) if !status.is_success() => Err(BrokerError::Http {
                status: status.as_u16(),
                body,
            }),
            Err(e) => Err(BrokerError::Parse {
                what,
                detail: format!("{e}: {}", truncate(&body, 200)),
            }),
        }
    }
}

impl Gateway for ClientPortal {
    fn search_stocks(&self, symbols: &[String]) -> Result<StockSearch, BrokerError> {
        let req = self
            .client
            .get(self.url("/trsrv/stocks"))
            .query(&[("symbols", symbols.join(","))]);
        let resp = self.send(req, "stock search")?;
        Self::json(resp, "stock search")
    }

    fn iserver_accounts(&self) -> Result<(), BrokerError> {
        let req = self.client.get(self.url("/iserver/accounts"));
        self.send(req, "iserver accounts")?;
        Ok(())
    }

    fn snapshot(&self, conids: &[Conid], fields: &[&str]) -> Result<Vec<SnapshotRow>, BrokerError> {
        let conids: Vec<String> = conids.iter().map(Conid::to_string).collect();
        let req = self.client.get(self.url("/iserver/marketdata/snapshot")).query(&[
            ("conids", conids.join(",")),
            ("fields", fields.join(",")),
        ]);
        let resp = self.send(req, "market snapshot")?;
        Self::json(resp, "market snapshot")
    }

    fn positions(&self, account: &str) -> Result<Vec<RawPosition>, BrokerError> {
        let req = self
            .client
            .get(self.url(&format!("/portfolio/{account}/positions")));
        let resp = self.send(req, "positions")?;
        Self::json(resp, "positions")
    }

    fn summary(&self, account: &str) -> Result<RawSummary, BrokerError> {
        let req = self.client.get(self.url(&format!("/portfolio/{account}/summary")));
        let resp = self.send(req, "account summary")?;
        Self::json(resp, "account summary")
    }

    fn subaccounts(&self) -> Result<Vec<Subaccount>, BrokerError> {
        let req = self.client.get(self.url("/portfolio/subaccounts"));
        let resp = self.send(req, "subaccounts")?;
        Self::json(resp, "subaccounts")
    }

    fn place_order(&self, account: &str, ticket: &OrderTicket) -> Result<OrderReply, BrokerError> {
        let body = OrderRequest {
            orders: std::slice::from_ref(ticket),
        };
        let req = self
            .client
            .post(self.url(&format!("/iserver/account/{account}/orders")))
            .json(&body);
        self.order_reply(req, "place order")
    }

    fn reply(&self, prompt_id: &str) -> Result<OrderReply, BrokerError> {
        let req = self
            .client
            .post(self.url(&format!("/iserver/reply/{prompt_id}")))
            .json(&serde_json::json!({ "confirmed": true }));
        self.order_reply(req, "order reply")
    }

    fn cancel_order(&self, account: &str, order_id: &str) -> Result<String, BrokerError> {
        let req = self
            .client
            .delete(self.url(&format!("/iserver/account/{account}/order/{order_id}")));
        let resp = self.send(req, "cancel order")?;
        let value: Value = Self::json(resp, "cancel order")?;

        if let Some(err) = value.get("error").filter(|e| !e.is_null()) {
            return Err(BrokerError::Order(format!(
                "cancel {order_id}: {}",
                err.as_str().map(str::to_string).unwrap_or_else(|| err.to_string())
            )));
        }
        Ok(value
            .get("msg")
            .and_then(Value::as_str)
            .unwrap_or("cancel submitted")
            .to_string())
    }

    fn live_orders(&self) -> Result<Vec<LiveOrder>, BrokerError> {
        let req = self.client.get(self.url("/iserver/account/orders"));
        let resp = self.send(req, "live orders")?;
        let parsed: LiveOrdersResponse = Self::json(resp, "live orders")?;
        Ok(parsed.orders)
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
