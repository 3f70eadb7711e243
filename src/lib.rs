// Allow our dollar.cents digit grouping convention (e.g., 100_00 = $100.00)
#![allow(clippy::inconsistent_digit_grouping)]

//! # stratbook
//!
//! Core types and the strategy grouper for rebalancing a brokerage account
//! toward a screened ticker universe.
//!
//! Screeners publish one ticker list per filter, stamped with the date the
//! filter ran. A strategy is a named set of filters; its universe is the
//! deduplicated union of the constituent lists, and its freshness is the most
//! recent constituent date.
//!
//! ```
//! use stratbook::{group_and_combine, StrategyGroups, TickerUniverseEntry};
//!
//! let mut groups = StrategyGroups::default();
//! groups.insert("momentum".into(), vec!["top_rated".into(), "growth".into()]);
//!
//! let entries = vec![
//!     TickerUniverseEntry::new("top_rated", "2026-10-16", ["AAPL", "MSFT"]),
//!     TickerUniverseEntry::new("growth", "2026-10-17", ["MSFT", "NVDA"]),
//! ];
//!
//! let strategies = group_and_combine(&entries, &groups);
//! let momentum = &strategies["momentum"];
//! assert_eq!(momentum.tickers, vec!["AAPL", "MSFT", "NVDA"]);
//! assert_eq!(momentum.latest_date, "2026-10-17");
//! ```
//!
//! ## Money Representation
//!
//! Dollar amounts are carried as [`i64`] cents, the same way the broker and
//! rebalancer crates do:
//!
//! ```
//! use stratbook::Cents;
//!
//! assert_eq!(format!("{}", Cents(1_234_50)), "$1234.50");
//! assert_eq!(Cents::from_dollars(99.999), Cents(100_00));
//! ```

mod error;
pub mod strategy;
mod types;

pub use error::ValidationError;
pub use strategy::{Strategy, StrategyGroups, TickerUniverseEntry, group_and_combine};
pub use types::{Cents, Conid, Side};
