//! Client Portal wire types: contract search, snapshots, positions, orders.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use stratbook::{Conid, Side, ValidationError};

/// Snapshot field code: symbol.
pub const FIELD_SYMBOL: &str = "55";
/// Snapshot field code: last traded price.
pub const FIELD_LAST_PRICE: &str = "31";
/// Snapshot field code: market capitalisation.
pub const FIELD_MARKET_CAP: &str = "7289";
/// Snapshot field code: average daily volume.
pub const FIELD_AVG_VOLUME: &str = "7282";

/// One listing of a stock in a `/trsrv/stocks` response.
#[derive(Debug, Clone, Deserialize)]
pub struct ContractCandidate {
    pub conid: i64,
    #[serde(default)]
    pub exchange: String,
    /// Primary-market flag; only US listings are traded.
    #[serde(default, rename = "isUS")]
    pub is_us: bool,
}

/// One issuer match for a searched symbol.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub asset_class: String,
    #[serde(default)]
    pub contracts: Vec<ContractCandidate>,
}

/// Symbol → issuer matches, in gateway order.
pub type StockSearch = BTreeMap<String, Vec<StockEntry>>;

/// One row of a market data snapshot.
///
/// Field values arrive keyed by numeric field code and may be strings or
/// numbers, and rows for which the gateway has not warmed up yet simply lack
/// the field.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SnapshotRow {
    #[serde(default)]
    pub conid: Option<i64>,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

impl SnapshotRow {
    /// Field value rendered as text, if present and non-empty.
    pub fn field(&self, code: &str) -> Option<String> {
        let text = match self.fields.get(code)? {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        (!text.is_empty()).then_some(text)
    }
}

/// Raw `/portfolio/{account}/positions` record.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPosition {
    #[serde(default)]
    pub acct_id: Option<String>,
    #[serde(default)]
    pub conid: Option<i64>,
    #[serde(default)]
    pub contract_desc: Option<String>,
    #[serde(default)]
    pub ticker: Option<String>,
    #[serde(default)]
    pub position: Option<f64>,
    #[serde(default)]
    pub mkt_price: Option<f64>,
    #[serde(default)]
    pub mkt_value: Option<f64>,
    #[serde(default)]
    pub avg_cost: Option<f64>,
    #[serde(default)]
    pub unrealized_pnl: Option<f64>,
}

/// Raw `/portfolio/{account}/summary`: field name → `{amount, currency, ...}`.
pub type RawSummary = BTreeMap<String, Value>;

/// One entry of `/portfolio/subaccounts`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subaccount {
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub account_title: Option<String>,
}

/// A single order in a `POST /iserver/account/{account}/orders` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderTicket {
    pub acct_id: String,
    pub conid: i64,
    pub quantity: u64,
    pub side: String,
    pub order_type: String,
    pub tif: String,
}

impl OrderTicket {
    /// Day market order; side from the sign of `quantity`, size its magnitude.
    pub fn market(account: &str, conid: Conid, quantity: i64) -> Result<Self, ValidationError> {
        let side = Side::from_quantity(quantity)?;
        Ok(Self {
            acct_id: account.to_string(),
            conid: conid.0,
            quantity: quantity.unsigned_abs(),
            side: side.as_str().to_string(),
            order_type: "MKT".to_string(),
            tif: "DAY".to_string(),
        })
    }
}

/// Request envelope for order placement.
#[derive(Debug, Clone, Serialize)]
pub struct OrderRequest<'a> {
    pub orders: &'a [OrderTicket],
}

/// Parsed response to an order placement or a confirmation reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderReply {
    /// Terminal: the gateway accepted the order.
    Placed {
        order_id: String,
        status: Option<String>,
    },
    /// The gateway wants a warning acknowledged before accepting.
    Prompt { id: String, messages: Vec<String> },
    /// Explicit `error` field.
    Rejected(String),
    /// None of the above; carries the raw body.
    Unexpected(String),
}

impl OrderReply {
    /// Classify a gateway response.
    ///
    /// The gateway answers with either an object or a one-element array. An
    /// `error` field wins over everything else, then a terminal `order_id`,
    /// then a prompt `id`.
    pub fn from_value(value: &Value) -> OrderReply {
        let item = match value {
            Value::Array(items) => match items.first() {
                Some(first) => first,
                None => return OrderReply::Unexpected(value.to_string()),
            },
            other => other,
        };

        let Some(obj) = item.as_object() else {
            return OrderReply::Unexpected(value.to_string());
        };

        if let Some(err) = obj.get("error").filter(|e| !e.is_null()) {
            return OrderReply::Rejected(value_text(err));
        }
        if let Some(order_id) = obj.get("order_id").filter(|v| !v.is_null()) {
            return OrderReply::Placed {
                order_id: value_text(order_id),
                status: obj.get("order_status").map(value_text),
            };
        }
        if let Some(id) = obj.get("id").filter(|v| !v.is_null()) {
            let messages = match obj.get("message") {
                Some(Value::Array(msgs)) => msgs.iter().map(value_text).collect(),
                Some(Value::String(s)) => vec![s.clone()],
                _ => Vec::new(),
            };
            return OrderReply::Prompt {
                id: value_text(id),
                messages,
            };
        }

        OrderReply::Unexpected(value.to_string())
    }
}

/// One entry of `/iserver/account/orders`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveOrder {
    #[serde(default, alias = "acct")]
    pub account: Option<String>,
    pub order_id: i64,
    #[serde(default)]
    pub ticker: Option<String>,
    #[serde(default)]
    pub remaining_quantity: Option<f64>,
    #[serde(default)]
    pub total_size: Option<f64>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub orig_order_type: Option<String>,
    #[serde(default)]
    pub side: Option<String>,
    #[serde(default)]
    pub avg_price: Option<Value>,
}

/// Envelope of `/iserver/account/orders`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LiveOrdersResponse {
    #[serde(default)]
    pub orders: Vec<LiveOrder>,
}

/// Statuses that count as "live" when no filter is given.
pub const LIVE_STATUSES: [&str; 4] = ["Inactive", "PreSubmitted", "Submitted", "PendingCancel"];

/// Parse a numeric string the way the gateway formats them.
///
/// Plain and scientific notation (`1.2E+3`) parse directly once thousands
/// separators are removed. Otherwise only digits, the decimal point and the
/// minus sign are kept, so currency codes and price-type prefixes (`C150.25`
/// for a closing price) are tolerated. Returns `None` when nothing numeric is
/// left.
pub fn clean_numeric(raw: &str) -> Option<f64> {
    let plain = raw.trim().replace(',', "");
    if let Ok(v) = plain.parse::<f64>() {
        return v.is_finite().then_some(v);
    }
    let kept: String = plain
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    if kept.is_empty() {
        return None;
    }
    kept.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse an abbreviated magnitude such as the gateway's market cap
/// (`"2.87T"`, `"512.3M"`). Unknown trailing letters give `None`.
pub fn parse_magnitude(raw: &str) -> Option<f64> {
    let plain = raw.trim().replace(',', "");
    let last = plain.chars().last()?;
    let scale = match last.to_ascii_uppercase() {
        'K' => 1e3,
        'M' => 1e6,
        'B' => 1e9,
        'T' => 1e12,
        c if c.is_ascii_digit() || c == '.' => return clean_numeric(&plain),
        _ => return None,
    };
    let number = &plain[..plain.len() - last.len_utf8()];
    number.trim().parse::<f64>().ok().map(|v| v * scale).filter(|v| v.is_finite())
}

/// Numeric value of a JSON number or numeric string.
pub fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => clean_numeric(s),
        _ => None,
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
