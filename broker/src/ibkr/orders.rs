//! Order submission, confirmation replies, rate limiting, and cancellation.

use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use stratbook::Conid;

use crate::Gateway;
use crate::types::{LIVE_STATUSES, LiveOrder, OrderReply, OrderTicket};

/// Where an order stands in the confirmation protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Submitted,
    AwaitingConfirmation,
    Confirmed,
    Failed,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Confirmed | OrderStatus::Failed)
    }
}

/// Bounds on the confirmation loop.
#[derive(Debug, Clone, Copy)]
pub struct ConfirmPolicy {
    /// Prompts answered before giving up.
    pub max_confirmations: u32,
    /// Pause after every gateway call.
    pub call_delay: Duration,
}

impl Default for ConfirmPolicy {
    fn default() -> Self {
        Self {
            max_confirmations: 3,
            call_delay: Duration::from_millis(500),
        }
    }
}

/// One order's lifecycle record.
#[derive(Debug, Clone)]
pub struct OrderExecution {
    pub conid: Conid,
    /// Signed: positive buys, negative sells.
    pub quantity: i64,
    pub status: OrderStatus,
    pub confirmations: u32,
    pub order_id: Option<String>,
    /// Last gateway response or error text.
    pub last_message: Option<String>,
    /// Every status entered, in order, starting with `Submitted`.
    pub history: Vec<OrderStatus>,
}

impl OrderExecution {
    fn new(conid: Conid, quantity: i64) -> Self {
        Self {
            conid,
            quantity,
            status: OrderStatus::Submitted,
            confirmations: 0,
            order_id: None,
            last_message: None,
            history: vec![OrderStatus::Submitted],
        }
    }

    fn transition(&mut self, status: OrderStatus, message: Option<String>) {
        debug!("order conid={} {:?} -> {:?}", self.conid, self.status, status);
        self.status = status;
        self.history.push(status);
        if message.is_some() {
            self.last_message = message;
        }
    }

    fn fail(&mut self, message: String) {
        warn!(
            "Order conid={} qty={} failed: {message}",
            self.conid, self.quantity
        );
        self.transition(OrderStatus::Failed, Some(message));
    }
}

/// Submit a day market order for `quantity` shares and drive it to a
/// terminal state, answering confirmation prompts along the way.
///
/// Never returns an error: transport failures and broker rejections end in
/// `Failed` with the broker's text kept in `last_message`. A zero quantity
/// fails without contacting the gateway.
pub fn place_and_confirm<G: Gateway + ?Sized>(
    gateway: &G,
    account: &str,
    conid: Conid,
    quantity: i64,
    policy: &ConfirmPolicy,
) -> OrderExecution {
    let mut exec = OrderExecution::new(conid, quantity);

    let ticket = match OrderTicket::market(account, conid, quantity) {
        Ok(t) => t,
        Err(e) => {
            exec.fail(e.to_string());
            return exec;
        }
    };

    info!(
        "Submitting: {} {} conid={} (account {account})",
        ticket.side, ticket.quantity, conid
    );

    let mut response = gateway.place_order(account, &ticket);
    rate_limit_delay(policy.call_delay);

    loop {
        let reply = match response {
            Ok(reply) => reply,
            Err(e) => {
                exec.fail(e.to_string());
                return exec;
            }
        };

        match reply {
            OrderReply::Placed { order_id, status } => {
                info!(
                    "Order conid={} confirmed: id={order_id} status={}",
                    conid,
                    status.as_deref().unwrap_or("-")
                );
                exec.order_id = Some(order_id);
                exec.transition(OrderStatus::Confirmed, status);
                return exec;
            }
            OrderReply::Rejected(msg) => {
                exec.fail(msg);
                return exec;
            }
            OrderReply::Unexpected(body) => {
                exec.fail(format!("unexpected response: {body}"));
                return exec;
            }
            OrderReply::Prompt { id, messages } => {
                if exec.confirmations >= policy.max_confirmations {
                    exec.fail(format!(
                        "maximum confirmations reached ({})",
                        policy.max_confirmations
                    ));
                    return exec;
                }
                let text = messages.join(" | ");
                debug!("Confirming prompt {id}: {text}");
                exec.transition(OrderStatus::AwaitingConfirmation, Some(text));
                exec.confirmations += 1;

                response = gateway.reply(&id);
                rate_limit_delay(policy.call_delay);
            }
        }
    }
}

/// Outcome of one cancellation request.
#[derive(Debug, Clone)]
pub struct CancelOutcome {
    pub order_id: i64,
    pub ticker: Option<String>,
    pub result: Result<String, String>,
}

/// Live orders whose status is in `statuses`, or in [`LIVE_STATUSES`] when
/// `statuses` is empty.
pub fn filter_live_orders(orders: Vec<LiveOrder>, statuses: &[&str]) -> Vec<LiveOrder> {
    let wanted: &[&str] = if statuses.is_empty() {
        &LIVE_STATUSES
    } else {
        statuses
    };
    orders
        .into_iter()
        .filter(|o| wanted.contains(&o.status.as_str()))
        .collect()
}

/// Cancel every live order on `account`. Failures are collected, not raised.
pub fn cancel_all_orders<G: Gateway + ?Sized>(
    gateway: &G,
    account: &str,
    orders: &[LiveOrder],
    delay: Duration,
) -> Vec<CancelOutcome> {
    let mut outcomes = Vec::with_capacity(orders.len());
    for order in orders {
        if order.account.as_deref().is_some_and(|a| a != account) {
            continue;
        }
        let id = order.order_id.to_string();
        info!("Cancelling order {id}");
        let result = gateway.cancel_order(account, &id).map_err(|e| {
            warn!("Failed to cancel order {id}: {e}");
            e.to_string()
        });
        outcomes.push(CancelOutcome {
            order_id: order.order_id,
            ticker: order.ticker.clone(),
            result,
        });
        rate_limit_delay(delay);
    }
    outcomes
}

/// Sleep for the pacing interval between gateway calls.
pub fn rate_limit_delay(interval: Duration) {
    if !interval.is_zero() {
        thread::sleep(interval);
    }
}
