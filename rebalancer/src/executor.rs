//! Trade executor: drives each planned trade through the order state machine,
//! in plan order, one at a time.

use std::fmt;

use log::{error, info};
use stratbook::Conid;
use stratbook_broker::Gateway;
use stratbook_broker::ibkr::{ConfirmPolicy, OrderExecution, OrderStatus, place_and_confirm};

use crate::planner::TradePlanRow;
use crate::snapshot::{Position, whole_shares};

/// One order to place: signed quantity on one contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeOrder {
    pub ticker: String,
    pub conid: Conid,
    pub quantity: i64,
}

impl TradeOrder {
    /// Close out the whole shares of a held position. `None` when less than
    /// one share is held.
    pub fn liquidate(position: &Position) -> Option<Self> {
        let quantity = -whole_shares(position.quantity);
        (quantity != 0).then(|| Self {
            ticker: position.ticker.clone(),
            conid: position.conid,
            quantity,
        })
    }
}

impl From<&TradePlanRow> for TradeOrder {
    fn from(row: &TradePlanRow) -> Self {
        Self {
            ticker: row.ticker.clone(),
            conid: row.conid,
            quantity: row.trade_quantity,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TradeOutcome {
    pub order: TradeOrder,
    pub execution: OrderExecution,
}

impl TradeOutcome {
    pub fn is_confirmed(&self) -> bool {
        self.execution.status == OrderStatus::Confirmed
    }
}

impl fmt::Display for TradeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.execution.status {
            OrderStatus::Confirmed => write!(
                f,
                "CONFIRMED id={}",
                self.execution.order_id.as_deref().unwrap_or("?")
            ),
            _ => write!(
                f,
                "FAILED: {}",
                self.execution.last_message.as_deref().unwrap_or("no response")
            ),
        }
    }
}

/// Per-row results of one execution pass.
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    pub outcomes: Vec<TradeOutcome>,
}

impl ExecutionReport {
    pub fn submitted(&self) -> usize {
        self.outcomes.len()
    }

    pub fn confirmed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_confirmed()).count()
    }

    pub fn failed(&self) -> usize {
        self.submitted() - self.confirmed()
    }

    pub fn failures(&self) -> impl Iterator<Item = &TradeOutcome> {
        self.outcomes.iter().filter(|o| !o.is_confirmed())
    }
}

/// Place every order in sequence. A failed order is recorded and the next one
/// is attempted; nothing already placed is rolled back.
///
/// `progress` is called after each order with its 1-based index and the total.
pub fn execute_trades<G, F>(
    gateway: &G,
    account: &str,
    orders: &[TradeOrder],
    policy: &ConfirmPolicy,
    mut progress: F,
) -> ExecutionReport
where
    G: Gateway + ?Sized,
    F: FnMut(usize, usize, &TradeOutcome),
{
    let mut report = ExecutionReport {
        outcomes: Vec::with_capacity(orders.len()),
    };

    for (i, order) in orders.iter().enumerate() {
        let execution = place_and_confirm(gateway, account, order.conid, order.quantity, policy);
        let outcome = TradeOutcome {
            order: order.clone(),
            execution,
        };
        if outcome.is_confirmed() {
            info!("{} {:+}: {outcome}", order.ticker, order.quantity);
        } else {
            error!("{} {:+}: {outcome}", order.ticker, order.quantity);
        }
        progress(i + 1, orders.len(), &outcome);
        report.outcomes.push(outcome);
    }

    info!(
        "Execution finished: {} submitted, {} confirmed, {} failed",
        report.submitted(),
        report.confirmed(),
        report.failed()
    );
    report
}
