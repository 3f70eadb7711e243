//! Rebalance planner: equal-weight targets vs current positions → trade list.
//!
//! The planner is pure apart from the wash-sale ledger it updates. All money
//! is in cents; trade quantities are whole shares, with fractional holdings
//! truncated toward zero.

use std::fmt;

use chrono::NaiveDate;
use log::{debug, info};
use rustc_hash::FxHashMap;
use stratbook::{Cents, Conid};

use crate::config::CASH_RESERVE;
use crate::error::{Error, Result};
use crate::ledger::{WashSaleLedger, WashSaleRecord};
use crate::snapshot::{MarketQuote, Position, whole_shares};

/// One row of the joined target/current table.
#[derive(Debug, Clone, PartialEq)]
pub struct TradePlanRow {
    pub ticker: String,
    pub conid: Conid,
    /// Zero for rows that only exist as a position.
    pub last_price: Cents,
    pub target_shares: i64,
    pub target_value: Cents,
    /// Held quantity; may be fractional.
    pub position: f64,
    pub market_value: Cents,
    pub unrealized_pnl: Cents,
    /// Signed: positive buys, negative sells.
    pub trade_quantity: i64,
    /// `target_value - market_value`.
    pub difference: Cents,
    /// `difference / target_value`; `None` when the target value is zero.
    pub difference_pct: Option<f64>,
}

impl TradePlanRow {
    fn target(quote: &MarketQuote, target_value: Cents) -> Self {
        Self {
            ticker: quote.ticker.clone(),
            conid: quote.conid,
            last_price: quote.last_price,
            target_shares: target_shares(target_value, quote.last_price),
            target_value,
            position: 0.0,
            market_value: Cents::ZERO,
            unrealized_pnl: Cents::ZERO,
            trade_quantity: 0,
            difference: Cents::ZERO,
            difference_pct: None,
        }
    }

    fn held(position: &Position) -> Self {
        Self {
            ticker: position.ticker.clone(),
            conid: position.conid,
            last_price: Cents::ZERO,
            target_shares: 0,
            target_value: Cents::ZERO,
            position: 0.0,
            market_value: Cents::ZERO,
            unrealized_pnl: Cents::ZERO,
            trade_quantity: 0,
            difference: Cents::ZERO,
            difference_pct: None,
        }
    }

    fn add_position(&mut self, p: &Position) {
        self.position += p.quantity;
        self.market_value.0 += p.market_value.0;
        self.unrealized_pnl.0 += p.unrealized_pnl.0;
    }

    fn finish(&mut self) {
        self.trade_quantity = if self.target_shares == 0 {
            -whole_shares(self.position)
        } else {
            whole_shares(self.target_shares as f64 - self.position)
        };
        self.difference = Cents(self.target_value.0 - self.market_value.0);
        self.difference_pct =
            (self.target_value.0 != 0).then(|| self.difference.0 as f64 / self.target_value.0 as f64);
    }

    /// Outside tolerance, or leaving the universe.
    fn needs_trade(&self, tolerance: f64) -> bool {
        self.target_shares == 0 || self.difference_pct.is_none_or(|pct| pct.abs() > tolerance)
    }

    fn is_loss_sale(&self) -> bool {
        self.unrealized_pnl.0 < 0 && self.trade_quantity < 0
    }
}

/// Output of one planning pass.
#[derive(Debug, Clone, Default)]
pub struct RebalancePlan {
    /// Per-ticker allocation: `(1 - CASH_RESERVE) * net_liquidation / N`.
    pub target_value: Cents,
    /// The full joined table, target rows first in quote order.
    pub rows: Vec<TradePlanRow>,
    /// Rows to execute, in `rows` order.
    pub trades: Vec<TradePlanRow>,
    /// Tickers flagged (inserted or refreshed) as loss sales this run.
    pub new_wash_sales: Vec<String>,
    /// Records purged from the ledger before planning.
    pub expired_wash_sales: Vec<WashSaleRecord>,
    /// Tickers dropped from the trade list by the ledger.
    pub suppressed: Vec<String>,
}

impl RebalancePlan {
    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }
}

/// Whole shares for a dollar target, rounding half away from zero.
pub fn target_shares(target_value: Cents, price: Cents) -> i64 {
    if price.0 <= 0 {
        return 0;
    }
    (target_value.0 as f64 / price.0 as f64).round() as i64
}

/// Compute the trade list.
///
/// Purges `ledger` as of `today`, flags loss sales in the trade list, and
/// removes every ticker the ledger still holds from the trades, including
/// ones flagged by this very call.
pub fn plan(
    quotes: &[MarketQuote],
    positions: &[Position],
    net_liquidation: Cents,
    tolerance: f64,
    ledger: &mut WashSaleLedger,
    today: NaiveDate,
) -> Result<RebalancePlan> {
    if quotes.is_empty() {
        return Err(Error::Validation(
            "no quoted tickers in the strategy universe".into(),
        ));
    }
    if net_liquidation.0 <= 0 {
        return Err(Error::Validation(format!(
            "net liquidation must be positive, got {net_liquidation}"
        )));
    }
    if let Some(q) = quotes.iter().find(|q| q.last_price.0 <= 0) {
        return Err(Error::Validation(format!(
            "non-positive last price for {}: {}",
            q.ticker, q.last_price
        )));
    }

    // Target rows, one per distinct (ticker, conid).
    let mut rows: Vec<TradePlanRow> = Vec::with_capacity(quotes.len() + positions.len());
    let mut index: FxHashMap<(String, Conid), usize> = FxHashMap::default();
    let mut unique_quotes: Vec<&MarketQuote> = Vec::with_capacity(quotes.len());
    for q in quotes {
        if index.contains_key(&(q.ticker.clone(), q.conid)) {
            debug!("Duplicate quote for {} ignored", q.ticker);
            continue;
        }
        index.insert((q.ticker.clone(), q.conid), unique_quotes.len());
        unique_quotes.push(q);
    }

    let n = unique_quotes.len() as f64;
    let target_value =
        Cents((net_liquidation.0 as f64 * (1.0 - CASH_RESERVE) / n).round() as i64);
    rows.extend(
        unique_quotes
            .iter()
            .map(|q| TradePlanRow::target(q, target_value)),
    );

    // Outer join with positions.
    for p in positions {
        let key = (p.ticker.clone(), p.conid);
        let i = match index.get(&key) {
            Some(&i) => i,
            None => {
                rows.push(TradePlanRow::held(p));
                index.insert(key, rows.len() - 1);
                rows.len() - 1
            }
        };
        rows[i].add_position(p);
    }

    for row in &mut rows {
        row.finish();
    }

    let mut trades: Vec<TradePlanRow> = rows
        .iter()
        .filter(|r| r.needs_trade(tolerance))
        .filter(|r| {
            if r.trade_quantity == 0 {
                debug!("{}: outside tolerance but already at target shares", r.ticker);
            }
            r.trade_quantity != 0
        })
        .cloned()
        .collect();

    // Wash sales: purge, flag, suppress.
    let expired_wash_sales = ledger.purge_expired(today);

    let mut new_wash_sales = Vec::new();
    for t in trades.iter().filter(|t| t.is_loss_sale()) {
        ledger.flag(&t.ticker, Some(t.conid), today);
        new_wash_sales.push(t.ticker.clone());
    }

    let mut suppressed = Vec::new();
    trades.retain(|t| {
        if ledger.contains(&t.ticker) {
            info!("{}: suppressed by wash-sale ledger", t.ticker);
            suppressed.push(t.ticker.clone());
            false
        } else {
            true
        }
    });

    info!(
        "Plan: {} rows, {} trades, {} suppressed, target {} per ticker",
        rows.len(),
        trades.len(),
        suppressed.len(),
        target_value
    );

    Ok(RebalancePlan {
        target_value,
        rows,
        trades,
        new_wash_sales,
        expired_wash_sales,
        suppressed,
    })
}

impl fmt::Display for TradePlanRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pct = match self.difference_pct {
            Some(p) => format!("{:>7.1}%", p * 100.0),
            None => format!("{:>8}", "n/a"),
        };
        write!(
            f,
            "{:8} {:>10} {:>8} {:>8} {:>+8} {:>14} {pct}",
            self.ticker,
            self.conid.to_string(),
            self.target_shares,
            self.position,
            self.trade_quantity,
            self.difference.to_string(),
        )
    }
}
