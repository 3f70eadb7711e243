//! stratbook-rebalancer: equal-weight rebalancing of a brokerage account
//! toward a screened strategy universe through the Client Portal gateway.
//!
//! Reads the strategy universe from the SQLite store, snapshots positions,
//! quotes and the account summary, plans trades under a wash-sale rule, and
//! places market orders through the confirmation state machine with an
//! audit trail.

pub mod audit;
pub mod broker;
pub mod config;
pub mod error;
pub mod execution;
pub mod executor;
pub mod ledger;
pub mod planner;
pub mod snapshot;
pub mod store;
