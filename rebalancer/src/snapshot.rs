//! Market and position snapshot: contract resolution, quotes, positions and
//! the account summary.
//!
//! Everything here reads from the gateway once per run and normalizes the
//! gateway's loose JSON into typed rows with money in cents.

use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use rustc_hash::FxHashMap;
use stratbook::{Cents, Conid};
use stratbook_broker::{
    FIELD_AVG_VOLUME, FIELD_LAST_PRICE, FIELD_MARKET_CAP, FIELD_SYMBOL, Gateway, RawPosition,
    RawSummary, clean_numeric, numeric, parse_magnitude,
};

use crate::error::{Error, Result};

/// Snapshot fields requested for every quote.
pub const QUOTE_FIELDS: [&str; 4] = [FIELD_SYMBOL, FIELD_LAST_PRICE, FIELD_MARKET_CAP, FIELD_AVG_VOLUME];

/// Summary keys a rebalance cannot run without.
pub const TOTAL_CASH: &str = "totalcashvalue";
pub const NET_LIQUIDATION: &str = "netliquidation";

/// A held instrument. `quantity` is never zero and may be fractional.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub ticker: String,
    pub conid: Conid,
    pub quantity: f64,
    pub market_value: Cents,
    pub unrealized_pnl: Cents,
    pub avg_cost: Cents,
    pub market_price: Cents,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarketQuote {
    pub ticker: String,
    pub conid: Conid,
    pub last_price: Cents,
    pub market_cap: Option<f64>,
}

/// Named numeric summary fields plus the two required ones.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountSummary {
    pub fields: BTreeMap<String, f64>,
    pub total_cash: Cents,
    pub net_liquidation: Cents,
}

impl AccountSummary {
    /// Fields worth showing: no per-segment keys (`-s`), no zeros.
    pub fn display_fields(&self) -> impl Iterator<Item = (&str, f64)> {
        self.fields
            .iter()
            .filter(|(k, v)| !k.contains("-s") && **v != 0.0)
            .map(|(k, v)| (k.as_str(), *v))
    }
}

/// Result of a position fetch that may have exhausted its retries.
#[derive(Debug, Clone, PartialEq)]
pub enum PositionFetch {
    Available(Vec<Position>),
    Unavailable,
}

// === Contract resolution ===

/// Resolve tickers to contract ids, in input order.
///
/// Only the first candidate of the first issuer match is considered, and only
/// if it is a US listing. Tickers without one are dropped with a log line; a
/// failed request yields an empty list.
pub fn resolve_contracts<G: Gateway + ?Sized>(gateway: &G, tickers: &[String]) -> Vec<(String, Conid)> {
    if tickers.is_empty() {
        return Vec::new();
    }
    let found = match gateway.search_stocks(tickers) {
        Ok(f) => f,
        Err(e) => {
            warn!("Contract search failed: {e}");
            return Vec::new();
        }
    };

    let mut resolved = Vec::with_capacity(tickers.len());
    for ticker in tickers {
        let candidate = found
            .get(ticker)
            .and_then(|entries| entries.first())
            .and_then(|entry| entry.contracts.first());
        match candidate {
            Some(c) if c.is_us && c.conid > 0 => resolved.push((ticker.clone(), Conid(c.conid))),
            Some(_) => info!("No US listing for {ticker}, skipping"),
            None => info!("No contract found for {ticker}, skipping"),
        }
    }
    debug!("Resolved {}/{} tickers", resolved.len(), tickers.len());
    resolved
}

// === Quotes ===

/// Last prices for resolved contracts, in `contracts` order.
///
/// Primes the session with the accounts call, then requests the snapshot
/// twice with `settle` in between; only the second response is used. Rows
/// missing ticker, contract id or a positive price are dropped.
pub fn fetch_quotes<G: Gateway + ?Sized>(
    gateway: &G,
    contracts: &[(String, Conid)],
    settle: Duration,
) -> Vec<MarketQuote> {
    if contracts.is_empty() {
        return Vec::new();
    }
    if let Err(e) = gateway.iserver_accounts() {
        warn!("Accounts warm-up failed: {e}");
    }
    sleep(settle);

    let conids: Vec<Conid> = contracts.iter().map(|(_, c)| *c).collect();
    if let Err(e) = gateway.snapshot(&conids, &QUOTE_FIELDS) {
        warn!("Initial snapshot request failed: {e}");
    }
    sleep(settle);

    let rows = match gateway.snapshot(&conids, &QUOTE_FIELDS) {
        Ok(rows) => rows,
        Err(e) => {
            warn!("Snapshot request failed: {e}");
            return Vec::new();
        }
    };

    let mut by_conid: FxHashMap<Conid, MarketQuote> = FxHashMap::default();
    for row in rows {
        let ticker = row.field(FIELD_SYMBOL);
        let price = row
            .field(FIELD_LAST_PRICE)
            .and_then(|p| clean_numeric(&p))
            .filter(|p| *p > 0.0);
        let (Some(conid), Some(ticker), Some(price)) = (row.conid, ticker, price) else {
            debug!("Incomplete snapshot row dropped: {:?}", row.fields);
            continue;
        };
        let market_cap = row.field(FIELD_MARKET_CAP).and_then(|m| parse_magnitude(&m));
        by_conid.insert(
            Conid(conid),
            MarketQuote {
                ticker,
                conid: Conid(conid),
                last_price: Cents::from_dollars(price),
                market_cap,
            },
        );
    }

    let quotes: Vec<MarketQuote> = conids.iter().filter_map(|c| by_conid.remove(c)).collect();
    if quotes.len() < contracts.len() {
        info!(
            "{} of {} contracts had no usable quote",
            contracts.len() - quotes.len(),
            contracts.len()
        );
    }
    quotes
}

// === Positions ===

/// Whole shares in a signed quantity, truncated toward zero so an order
/// never exceeds the held size.
pub fn whole_shares(quantity: f64) -> i64 {
    quantity.trunc() as i64
}

/// Aggregated quantities below this are treated as flat.
const FLAT_EPSILON: f64 = 1e-9;

/// Convert raw records, dropping zero quantities and records without a
/// ticker or contract id.
pub fn normalize_positions(raw: Vec<RawPosition>) -> Vec<Position> {
    raw.into_iter()
        .filter_map(|p| {
            let quantity = p.position.unwrap_or(0.0);
            if quantity == 0.0 || !quantity.is_finite() {
                debug!("Skipping zero position: {:?}", p.contract_desc);
                return None;
            }
            let ticker = p.contract_desc.or(p.ticker).filter(|t| !t.is_empty())?;
            let conid = p.conid.filter(|c| *c > 0)?;
            Some(Position {
                ticker,
                conid: Conid(conid),
                quantity,
                market_value: Cents::from_dollars(p.mkt_value.unwrap_or(0.0)),
                unrealized_pnl: Cents::from_dollars(p.unrealized_pnl.unwrap_or(0.0)),
                avg_cost: Cents::from_dollars(p.avg_cost.unwrap_or(0.0)),
                market_price: Cents::from_dollars(p.mkt_price.unwrap_or(0.0)),
            })
        })
        .collect()
}

/// Fetch positions, retrying transient failures up to `attempts` times with
/// a fixed `sleep_between`. Gives up with `Unavailable` rather than an error.
pub fn fetch_positions<G: Gateway + ?Sized>(
    gateway: &G,
    account: &str,
    attempts: u32,
    sleep_between: Duration,
) -> PositionFetch {
    let attempts = attempts.max(1);
    for attempt in 1..=attempts {
        match gateway.positions(account) {
            Ok(raw) => return PositionFetch::Available(normalize_positions(raw)),
            Err(e) if e.is_transient() && attempt < attempts => {
                warn!("Positions attempt {attempt}/{attempts} for {account} failed: {e}; retrying");
                sleep(sleep_between);
            }
            Err(e) => {
                warn!("Positions for {account} unavailable after {attempt} attempt(s): {e}");
                return PositionFetch::Unavailable;
            }
        }
    }
    PositionFetch::Unavailable
}

/// Sum positions across accounts per ticker.
///
/// Quantity, market value and PnL add up; average cost is quantity-weighted;
/// market price is market value over quantity; the first contract id seen
/// wins. Tickers whose quantities net to zero are dropped.
pub fn aggregate_positions(positions: &[Position]) -> Vec<Position> {
    let mut order: Vec<&str> = Vec::new();
    let mut totals: FxHashMap<&str, (Position, f64)> = FxHashMap::default();

    for p in positions {
        let cost_weight = p.avg_cost.0 as f64 * p.quantity;
        match totals.get_mut(p.ticker.as_str()) {
            Some((agg, weighted)) => {
                agg.quantity += p.quantity;
                agg.market_value.0 += p.market_value.0;
                agg.unrealized_pnl.0 += p.unrealized_pnl.0;
                *weighted += cost_weight;
            }
            None => {
                order.push(p.ticker.as_str());
                totals.insert(p.ticker.as_str(), (p.clone(), cost_weight));
            }
        }
    }

    order
        .into_iter()
        .filter_map(|ticker| {
            let (mut agg, weighted) = totals.remove(ticker)?;
            if agg.quantity.abs() < FLAT_EPSILON {
                return None;
            }
            agg.avg_cost = Cents((weighted / agg.quantity).round() as i64);
            agg.market_price = Cents((agg.market_value.0 as f64 / agg.quantity).round() as i64);
            Some(agg)
        })
        .collect()
}

// === Account summary ===

/// Parse a raw summary. Missing or non-numeric required fields are a
/// validation failure.
pub fn parse_summary(raw: &RawSummary) -> Result<AccountSummary> {
    let fields: BTreeMap<String, f64> = raw
        .iter()
        .filter_map(|(key, value)| {
            let amount = value.get("amount").unwrap_or(value);
            numeric(amount).map(|v| (key.clone(), v))
        })
        .collect();

    let required = |key: &str| -> Result<Cents> {
        fields
            .get(key)
            .map(|v| Cents::from_dollars(*v))
            .ok_or_else(|| {
                Error::Validation(format!("account summary field '{key}' missing or not numeric"))
            })
    };

    Ok(AccountSummary {
        total_cash: required(TOTAL_CASH)?,
        net_liquidation: required(NET_LIQUIDATION)?,
        fields,
    })
}

/// Fetch and validate the account summary.
pub fn fetch_summary<G: Gateway + ?Sized>(gateway: &G, account: &str) -> Result<AccountSummary> {
    let raw = gateway.summary(account)?;
    parse_summary(&raw)
}

fn sleep(d: Duration) {
    if !d.is_zero() {
        thread::sleep(d);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stratbook_broker::mock::{GatewayCall, MOCK_ACCOUNT, MockGateway, PositionsFailure};

    fn raw(ticker: &str, conid: i64, qty: f64, price: f64) -> RawPosition {
        RawPosition {
            conid: Some(conid),
            contract_desc: Some(ticker.into()),
            position: Some(qty),
            mkt_price: Some(price),
            mkt_value: Some(qty * price),
            avg_cost: Some(price),
            unrealized_pnl: Some(0.0),
            ..RawPosition::default()
        }
    }

    #[test]
    fn resolve_keeps_us_listings_in_order() {
        let gw = MockGateway::builder()
            .with_contract("MSFT", 272093)
            .with_foreign_contract("VOD", 11111)
            .with_contract("AAPL", 265598)
            .build();
        let tickers = vec!["MSFT".into(), "VOD".into(), "ZZZZ".into(), "AAPL".into()];

        let out = resolve_contracts(&gw, &tickers);
        assert_eq!(
            out,
            vec![
                ("MSFT".to_string(), Conid(272093)),
                ("AAPL".to_string(), Conid(265598))
            ]
        );
    }

    #[test]
    fn quotes_use_second_snapshot() {
        let gw = MockGateway::builder()
            .with_quote("AAPL", 265598, "C231.50")
            .with_quote("MSFT", 272093, "410.25")
            .cold_first_snapshot()
            .build();
        let contracts = vec![
            ("MSFT".to_string(), Conid(272093)),
            ("AAPL".to_string(), Conid(265598)),
        ];

        let quotes = fetch_quotes(&gw, &contracts, Duration::ZERO);
        assert_eq!(quotes.len(), 2);
        assert_eq!(quotes[0].ticker, "MSFT");
        assert_eq!(quotes[1].last_price, Cents(231_50));

        let calls = gw.calls();
        assert_eq!(calls[0], GatewayCall::IserverAccounts);
        assert!(matches!(calls[1], GatewayCall::Snapshot(_)));
        assert!(matches!(calls[2], GatewayCall::Snapshot(_)));
    }

    #[test]
    fn incomplete_quote_rows_dropped() {
        let gw = MockGateway::builder()
            .with_quote("AAPL", 265598, "231.50")
            .with_quote("BAD", 1, "n/a")
            .with_quote("", 2, "10.00")
            .build();
        let contracts = vec![
            ("AAPL".to_string(), Conid(265598)),
            ("BAD".to_string(), Conid(1)),
            ("X".to_string(), Conid(2)),
            ("GONE".to_string(), Conid(3)),
        ];
        let quotes = fetch_quotes(&gw, &contracts, Duration::ZERO);
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].ticker, "AAPL");
    }

    #[test]
    fn market_cap_suffix_applied() {
        let gw = MockGateway::builder()
            .with_quote("AAPL", 265598, "231.50")
            .with_quote_field(265598, FIELD_MARKET_CAP, json!("2.87T"))
            .with_quote("MSFT", 272093, "410.25")
            .with_quote_field(272093, FIELD_MARKET_CAP, json!("n/a"))
            .build();
        let contracts = vec![
            ("AAPL".to_string(), Conid(265598)),
            ("MSFT".to_string(), Conid(272093)),
        ];
        let quotes = fetch_quotes(&gw, &contracts, Duration::ZERO);
        let cap = quotes[0].market_cap.unwrap();
        assert!((cap - 2.87e12).abs() < 1.0);
        assert_eq!(quotes[1].market_cap, None);
    }

    #[test]
    fn normalize_drops_zero_and_unidentified() {
        let mut no_conid = raw("X", 0, 5.0, 1.0);
        no_conid.conid = None;
        let out = normalize_positions(vec![
            raw("AAPL", 265598, 10.0, 150.0),
            raw("FLAT", 1, 0.0, 10.0),
            no_conid,
            raw("SHORT", 2, -3.0, 20.0),
        ]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].market_value, Cents(1500_00));
        assert_eq!(out[1].quantity, -3.0);
    }

    #[test]
    fn fractional_positions_kept() {
        let out = normalize_positions(vec![
            raw("HALF", 1, 2.5, 10.0),
            raw("TINY", 2, 0.4, 10.0),
        ]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].quantity, 2.5);
        assert_eq!(out[1].quantity, 0.4);
        assert_eq!(out[1].market_value, Cents(4_00));
        assert_eq!(whole_shares(out[0].quantity), 2);
        assert_eq!(whole_shares(out[1].quantity), 0);
        assert_eq!(whole_shares(-2.5), -2);
    }

    #[test]
    fn positions_retry_then_succeed() {
        let gw = MockGateway::builder()
            .with_position("AAPL", 265598, 10.0, 150.0, 0.0)
            .fail_positions(2, PositionsFailure::Transient)
            .build();
        match fetch_positions(&gw, MOCK_ACCOUNT, 3, Duration::ZERO) {
            PositionFetch::Available(p) => assert_eq!(p.len(), 1),
            PositionFetch::Unavailable => panic!("expected positions"),
        }
    }

    #[test]
    fn positions_unavailable_after_retries() {
        let gw = MockGateway::builder()
            .fail_positions(3, PositionsFailure::Transient)
            .build();
        assert_eq!(
            fetch_positions(&gw, MOCK_ACCOUNT, 3, Duration::ZERO),
            PositionFetch::Unavailable
        );
        assert_eq!(gw.calls().len(), 3);
    }

    #[test]
    fn malformed_positions_not_retried() {
        let gw = MockGateway::builder()
            .fail_positions(1, PositionsFailure::Malformed)
            .build();
        assert_eq!(
            fetch_positions(&gw, MOCK_ACCOUNT, 3, Duration::ZERO),
            PositionFetch::Unavailable
        );
        assert_eq!(gw.calls().len(), 1);
    }

    #[test]
    fn summary_requires_cash_and_netliq() {
        let mut raw = RawSummary::new();
        raw.insert("netliquidation".into(), json!({"amount": "100,000.00"}));
        raw.insert("totalcashvalue".into(), json!({"amount": 25000.5}));
        raw.insert("accountcode".into(), json!({"amount": null, "value": "U1"}));
        let summary = parse_summary(&raw).unwrap();
        assert_eq!(summary.net_liquidation, Cents(100_000_00));
        assert_eq!(summary.total_cash, Cents(25_000_50));

        raw.remove("totalcashvalue");
        assert!(matches!(parse_summary(&raw), Err(Error::Validation(_))));

        raw.insert("totalcashvalue".into(), json!({"amount": "n/a"}));
        assert!(matches!(parse_summary(&raw), Err(Error::Validation(_))));
    }

    #[test]
    fn summary_display_filters() {
        let mut raw = RawSummary::new();
        raw.insert("netliquidation".into(), json!({"amount": 100.0}));
        raw.insert("netliquidation-s".into(), json!({"amount": 100.0}));
        raw.insert("totalcashvalue".into(), json!({"amount": 0.0}));
        let summary = parse_summary(&raw).unwrap();
        let shown: Vec<_> = summary.display_fields().map(|(k, _)| k).collect();
        assert_eq!(shown, vec!["netliquidation"]);
    }

    #[test]
    fn aggregate_across_accounts() {
        let a = normalize_positions(vec![raw("AAPL", 265598, 10.0, 100.0)]);
        let mut b = normalize_positions(vec![raw("AAPL", 999, 30.0, 100.0)]);
        b[0].avg_cost = Cents(120_00);
        b[0].unrealized_pnl = Cents(-600_00);
        let all: Vec<Position> = a.into_iter().chain(b).collect();

        let agg = aggregate_positions(&all);
        assert_eq!(agg.len(), 1);
        let p = &agg[0];
        assert_eq!(p.quantity, 40.0);
        assert_eq!(p.conid, Conid(265598));
        assert_eq!(p.market_value, Cents(4000_00));
        assert_eq!(p.unrealized_pnl, Cents(-600_00));
        assert_eq!(p.avg_cost, Cents(115_00));
        assert_eq!(p.market_price, Cents(100_00));
    }
}
