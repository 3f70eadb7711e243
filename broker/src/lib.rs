//! Gateway trait and the IBKR Client Portal implementation for stratbook.
//!
//! Provides a `Gateway` trait that abstracts over the brokerage gateway's
//! REST surface. Implementations:
//!
//! - **IBKR Client Portal** ([`ibkr::client::ClientPortal`]): blocking REST
//!   client against a locally running gateway
//! - **Mock** ([`mock::MockGateway`]): scriptable in-memory gateway for tests
//!
//! Order submission and the confirmation-reply protocol live in
//! [`ibkr::orders`]; they only depend on the trait, so they run unchanged
//! against the mock.

pub mod error;
pub mod ibkr;
pub mod mock;
pub mod types;

pub use error::BrokerError;
pub use types::*;

use stratbook::Conid;

/// The brokerage gateway endpoints the rebalancer consumes.
///
/// Every method is a single blocking request. Retries, warm-up ordering and
/// settling delays are the caller's business.
pub trait Gateway {
    /// `GET /trsrv/stocks?symbols=...`: ticker → contract candidates.
    fn search_stocks(&self, symbols: &[String]) -> Result<StockSearch, BrokerError>;

    /// `GET /iserver/accounts`. The response is ignored; the call primes the
    /// brokerage session and must precede the first market data snapshot.
    fn iserver_accounts(&self) -> Result<(), BrokerError>;

    /// `GET /iserver/marketdata/snapshot?conids=...&fields=...`
    fn snapshot(&self, conids: &[Conid], fields: &[&str]) -> Result<Vec<SnapshotRow>, BrokerError>;

    /// `GET /portfolio/{account}/positions`
    fn positions(&self, account: &str) -> Result<Vec<RawPosition>, BrokerError>;

    /// `GET /portfolio/{account}/summary`
    fn summary(&self, account: &str) -> Result<RawSummary, BrokerError>;

    /// `GET /portfolio/subaccounts`
    fn subaccounts(&self) -> Result<Vec<Subaccount>, BrokerError>;

    /// `POST /iserver/account/{account}/orders`
    fn place_order(&self, account: &str, ticket: &OrderTicket) -> Result<OrderReply, BrokerError>;

    /// `POST /iserver/reply/{prompt_id}` with `{"confirmed": true}`
    fn reply(&self, prompt_id: &str) -> Result<OrderReply, BrokerError>;

    /// `DELETE /iserver/account/{account}/order/{order_id}`. Returns the
    /// gateway's acknowledgement message.
    fn cancel_order(&self, account: &str, order_id: &str) -> Result<String, BrokerError>;

    /// `GET /iserver/account/orders`
    fn live_orders(&self) -> Result<Vec<LiveOrder>, BrokerError>;
}
