//! Mock gateway for testing: implements `Gateway` with scriptable behavior.
//!
//! Use this in integration tests to simulate the Client Portal without
//! network calls.
//!
//! ```ignore
//! use stratbook_broker::mock::{MockGateway, FillMode};
//!
//! let gw = MockGateway::builder()
//!     .with_contract("AAPL", 265598)
//!     .with_quote("AAPL", 265598, "100.00")
//!     .with_summary(100_000.0, 100_000.0)
//!     .fill_mode(FillMode::Prompts(2))
//!     .build();
//! ```

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use serde_json::{Value, json};
use stratbook::Conid;

use crate::Gateway;
use crate::error::BrokerError;
use crate::types::*;

/// Default account id used by the builder.
pub const MOCK_ACCOUNT: &str = "U1234567";

/// How the mock answers order placement when no scripted reply is queued.
#[derive(Clone, Debug)]
pub enum FillMode {
    /// Every order is accepted on submission.
    Immediate,
    /// Every order raises this many confirmation prompts, then is accepted.
    Prompts(u32),
    /// Every order is rejected with this message.
    Reject(String),
}

/// How a scripted positions failure surfaces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PositionsFailure {
    Transient,
    Malformed,
}

/// A recorded gateway call for assertion in tests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GatewayCall {
    SearchStocks(Vec<String>),
    IserverAccounts,
    Snapshot(Vec<Conid>),
    Positions(String),
    Summary(String),
    Subaccounts,
    PlaceOrder {
        account: String,
        conid: i64,
        quantity: u64,
        side: String,
    },
    Reply(String),
    CancelOrder(String),
    LiveOrders,
}

#[derive(Default)]
struct MockState {
    calls: Vec<GatewayCall>,
    script: VecDeque<OrderReply>,
    prompts_left: u32,
    prompt_seq: u32,
    next_order_id: u64,
    positions_failures_left: u32,
    snapshot_calls: u32,
}

/// Builder for `MockGateway`.
pub struct MockGatewayBuilder {
    fill_mode: FillMode,
    contracts: BTreeMap<String, Vec<StockEntry>>,
    quotes: Vec<SnapshotRow>,
    positions: BTreeMap<String, Vec<RawPosition>>,
    summary: RawSummary,
    summary_fails: bool,
    subaccounts: Vec<String>,
    live_orders: Vec<LiveOrder>,
    rejected_conids: BTreeMap<i64, String>,
    script: Vec<OrderReply>,
    positions_failures: u32,
    positions_failure: PositionsFailure,
    cold_first_snapshot: bool,
}

impl MockGatewayBuilder {
    pub fn fill_mode(mut self, mode: FillMode) -> Self {
        self.fill_mode = mode;
        self
    }

    /// US-listed contract for `ticker`.
    pub fn with_contract(self, ticker: &str, conid: i64) -> Self {
        self.with_listing(ticker, conid, true)
    }

    /// Contract whose first listing is not US; it should be skipped.
    pub fn with_foreign_contract(self, ticker: &str, conid: i64) -> Self {
        self.with_listing(ticker, conid, false)
    }

    fn with_listing(mut self, ticker: &str, conid: i64, is_us: bool) -> Self {
        self.contracts
            .entry(ticker.to_string())
            .or_default()
            .push(StockEntry {
                name: ticker.to_string(),
                asset_class: "STK".to_string(),
                contracts: vec![ContractCandidate {
                    conid,
                    exchange: if is_us { "NASDAQ" } else { "LSE" }.to_string(),
                    is_us,
                }],
            });
        self
    }

    /// Snapshot row; `last` is the raw field text (e.g. `"C150.25"`).
    pub fn with_quote(mut self, ticker: &str, conid: i64, last: &str) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(FIELD_SYMBOL.to_string(), json!(ticker));
        fields.insert(FIELD_LAST_PRICE.to_string(), json!(last));
        self.quotes.push(SnapshotRow {
            conid: Some(conid),
            fields,
        });
        self
    }

    /// Extra snapshot field on an existing quote row.
    pub fn with_quote_field(mut self, conid: i64, code: &str, value: Value) -> Self {
        if let Some(row) = self.quotes.iter_mut().find(|r| r.conid == Some(conid)) {
            row.fields.insert(code.to_string(), value);
        }
        self
    }

    /// Position on the default account. Average cost is backed out of the
    /// unrealized PnL.
    pub fn with_position(
        self,
        ticker: &str,
        conid: i64,
        quantity: f64,
        mkt_price: f64,
        unrealized_pnl: f64,
    ) -> Self {
        let avg_cost = if quantity != 0.0 {
            mkt_price - unrealized_pnl / quantity
        } else {
            0.0
        };
        self.with_account_position(
            MOCK_ACCOUNT,
            RawPosition {
                acct_id: Some(MOCK_ACCOUNT.to_string()),
                conid: Some(conid),
                contract_desc: Some(ticker.to_string()),
                ticker: None,
                position: Some(quantity),
                mkt_price: Some(mkt_price),
                mkt_value: Some(quantity * mkt_price),
                avg_cost: Some(avg_cost),
                unrealized_pnl: Some(unrealized_pnl),
            },
        )
    }

    pub fn with_account_position(mut self, account: &str, position: RawPosition) -> Self {
        self.positions
            .entry(account.to_string())
            .or_default()
            .push(position);
        self
    }

    /// Net liquidation and total cash, in dollars.
    pub fn with_summary(self, net_liquidation: f64, total_cash: f64) -> Self {
        self.with_summary_field("netliquidation", json!(net_liquidation))
            .with_summary_field("totalcashvalue", json!(total_cash))
    }

    pub fn with_summary_field(mut self, key: &str, amount: Value) -> Self {
        self.summary.insert(
            key.to_string(),
            json!({ "amount": amount, "currency": "USD", "isNull": false }),
        );
        self
    }

    pub fn fail_summary(mut self) -> Self {
        self.summary_fails = true;
        self
    }

    pub fn with_subaccount(mut self, account: &str) -> Self {
        self.subaccounts.push(account.to_string());
        self
    }

    pub fn with_live_order(mut self, order_id: i64, ticker: &str, status: &str) -> Self {
        self.live_orders.push(LiveOrder {
            account: Some(MOCK_ACCOUNT.to_string()),
            order_id,
            ticker: Some(ticker.to_string()),
            remaining_quantity: Some(10.0),
            total_size: Some(10.0),
            status: status.to_string(),
            orig_order_type: Some("MARKET".to_string()),
            side: Some("BUY".to_string()),
            avg_price: None,
        });
        self
    }

    /// Orders for this contract are rejected regardless of fill mode.
    pub fn reject_conid(mut self, conid: i64, message: &str) -> Self {
        self.rejected_conids.insert(conid, message.to_string());
        self
    }

    /// Replies returned, in order, by `place_order`/`reply` before the fill
    /// mode takes over.
    pub fn script(mut self, replies: Vec<OrderReply>) -> Self {
        self.script = replies;
        self
    }

    /// The first `n` positions calls fail.
    pub fn fail_positions(mut self, n: u32, kind: PositionsFailure) -> Self {
        self.positions_failures = n;
        self.positions_failure = kind;
        self
    }

    /// The first snapshot call returns rows without prices, as a gateway that
    /// has not yet subscribed to the contracts would.
    pub fn cold_first_snapshot(mut self) -> Self {
        self.cold_first_snapshot = true;
        self
    }

    pub fn build(self) -> MockGateway {
        MockGateway {
            fill_mode: self.fill_mode,
            contracts: self.contracts,
            quotes: self.quotes,
            positions: self.positions,
            summary: self.summary,
            summary_fails: self.summary_fails,
            subaccounts: self.subaccounts,
            live_orders: self.live_orders,
            rejected_conids: self.rejected_conids,
            positions_failure: self.positions_failure,
            cold_first_snapshot: self.cold_first_snapshot,
            state: Mutex::new(MockState {
                script: self.script.into(),
                next_order_id: 1,
                positions_failures_left: self.positions_failures,
                ..MockState::default()
            }),
        }
    }
}

/// A mock gateway that records calls and returns configurable responses.
pub struct MockGateway {
    fill_mode: FillMode,
    contracts: BTreeMap<String, Vec<StockEntry>>,
    quotes: Vec<SnapshotRow>,
    positions: BTreeMap<String, Vec<RawPosition>>,
    summary: RawSummary,
    summary_fails: bool,
    subaccounts: Vec<String>,
    live_orders: Vec<LiveOrder>,
    rejected_conids: BTreeMap<i64, String>,
    positions_failure: PositionsFailure,
    cold_first_snapshot: bool,
    state: Mutex<MockState>,
}

impl MockGateway {
    pub fn builder() -> MockGatewayBuilder {
        MockGatewayBuilder {
            fill_mode: FillMode::Immediate,
            contracts: BTreeMap::new(),
            quotes: Vec::new(),
            positions: BTreeMap::new(),
            summary: RawSummary::new(),
            summary_fails: false,
            subaccounts: Vec::new(),
            live_orders: Vec::new(),
            rejected_conids: BTreeMap::new(),
            script: Vec::new(),
            positions_failures: 0,
            positions_failure: PositionsFailure::Transient,
            cold_first_snapshot: false,
        }
    }

    /// Every call made so far (for assertion in tests).
    pub fn calls(&self) -> Vec<GatewayCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Order placements made so far.
    pub fn placed_orders(&self) -> Vec<GatewayCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, GatewayCall::PlaceOrder { .. }))
            .collect()
    }

    fn record(&self, call: GatewayCall) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn next_reply(&self, state: &mut MockState, fresh_order: bool) -> OrderReply {
        if let Some(reply) = state.script.pop_front() {
            return reply;
        }
        if let (true, FillMode::Prompts(n)) = (fresh_order, &self.fill_mode) {
            state.prompts_left = *n;
        }
        match &self.fill_mode {
            FillMode::Reject(msg) => OrderReply::Rejected(msg.clone()),
            FillMode::Prompts(_) if state.prompts_left > 0 => {
                state.prompts_left -= 1;
                state.prompt_seq += 1;
                OrderReply::Prompt {
                    id: format!("prompt-{}", state.prompt_seq),
                    messages: vec!["You are about to submit a market order.".to_string()],
                }
            }
            _ => {
                let id = state.next_order_id;
                state.next_order_id += 1;
                OrderReply::Placed {
                    order_id: id.to_string(),
                    status: Some("PreSubmitted".to_string()),
                }
            }
        }
    }
}

impl Gateway for MockGateway {
    fn search_stocks(&self, symbols: &[String]) -> Result<StockSearch, BrokerError> {
        self.record(GatewayCall::SearchStocks(symbols.to_vec()));
        Ok(symbols
            .iter()
            .filter_map(|s| self.contracts.get(s).map(|c| (s.clone(), c.clone())))
            .collect())
    }

    fn iserver_accounts(&self) -> Result<(), BrokerError> {
        self.record(GatewayCall::IserverAccounts);
        Ok(())
    }

    fn snapshot(&self, conids: &[Conid], _fields: &[&str]) -> Result<Vec<SnapshotRow>, BrokerError> {
        let cold = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(GatewayCall::Snapshot(conids.to_vec()));
            state.snapshot_calls += 1;
            self.cold_first_snapshot && state.snapshot_calls == 1
        };

        Ok(self
            .quotes
            .iter()
            .filter(|row| row.conid.is_some_and(|c| conids.contains(&Conid(c))))
            .map(|row| {
                if cold {
                    SnapshotRow {
                        conid: row.conid,
                        fields: BTreeMap::new(),
                    }
                } else {
                    row.clone()
                }
            })
            .collect())
    }

    fn positions(&self, account: &str) -> Result<Vec<RawPosition>, BrokerError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(GatewayCall::Positions(account.to_string()));
        if state.positions_failures_left > 0 {
            state.positions_failures_left -= 1;
            return Err(match self.positions_failure {
                PositionsFailure::Transient => {
                    BrokerError::Connection("mock: connection reset".into())
                }
                PositionsFailure::Malformed => BrokerError::Parse {
                    what: "positions",
                    detail: "mock: malformed body".into(),
                },
            });
        }
        Ok(self.positions.get(account).cloned().unwrap_or_default())
    }

    fn summary(&self, account: &str) -> Result<RawSummary, BrokerError> {
        self.record(GatewayCall::Summary(account.to_string()));
        if self.summary_fails {
            return Err(BrokerError::Http {
                status: 503,
                body: "mock: summary unavailable".into(),
            });
        }
        Ok(self.summary.clone())
    }

    fn subaccounts(&self) -> Result<Vec<Subaccount>, BrokerError> {
        self.record(GatewayCall::Subaccounts);
        Ok(self
            .subaccounts
            .iter()
            .map(|id| Subaccount {
                account_id: Some(id.clone()),
                account_title: None,
            })
            .collect())
    }

    fn place_order(&self, account: &str, ticket: &OrderTicket) -> Result<OrderReply, BrokerError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(GatewayCall::PlaceOrder {
            account: account.to_string(),
            conid: ticket.conid,
            quantity: ticket.quantity,
            side: ticket.side.clone(),
        });
        if let Some(msg) = self.rejected_conids.get(&ticket.conid) {
            return Ok(OrderReply::Rejected(msg.clone()));
        }
        Ok(self.next_reply(&mut state, true))
    }

    fn reply(&self, prompt_id: &str) -> Result<OrderReply, BrokerError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(GatewayCall::Reply(prompt_id.to_string()));
        Ok(self.next_reply(&mut state, false))
    }

    fn cancel_order(&self, _account: &str, order_id: &str) -> Result<String, BrokerError> {
        self.record(GatewayCall::CancelOrder(order_id.to_string()));
        Ok("Request was submitted".to_string())
    }

    fn live_orders(&self) -> Result<Vec<LiveOrder>, BrokerError> {
        self.record(GatewayCall::LiveOrders);
        Ok(self.live_orders.clone())
    }
}
