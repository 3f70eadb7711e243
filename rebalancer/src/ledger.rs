//! Wash-sale ledger: tickers recently sold at a loss, with a rolling
//! 31-day window.
//!
//! A run loads the ledger, purges expired records, lets the planner flag new
//! loss sales, and writes the whole set back.

use std::collections::BTreeMap;

use chrono::{Days, NaiveDate};
use log::{info, warn};
use stratbook::Conid;

use crate::error::Result;
use crate::store::{Store, WashSaleRow};

/// Days a loss sale suppresses re-purchase.
pub const WASH_SALE_DAYS: u64 = 31;

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WashSaleRecord {
    pub ticker: String,
    pub conid: Option<Conid>,
    pub sold_date: NaiveDate,
}

impl WashSaleRecord {
    /// Last day the record is in force.
    pub fn expires(&self) -> NaiveDate {
        self.sold_date + Days::new(WASH_SALE_DAYS)
    }

    /// Retained while `sold_date + 31 days >= today`.
    pub fn is_active(&self, today: NaiveDate) -> bool {
        self.expires() >= today
    }
}

/// In-memory ledger keyed by ticker.
#[derive(Debug, Clone, Default)]
pub struct WashSaleLedger {
    records: BTreeMap<String, WashSaleRecord>,
}

impl WashSaleLedger {
    pub fn new(records: impl IntoIterator<Item = WashSaleRecord>) -> Self {
        Self {
            records: records
                .into_iter()
                .map(|r| (r.ticker.clone(), r))
                .collect(),
        }
    }

    /// Load from the store. Rows whose date does not parse are dropped.
    pub fn load(store: &Store) -> Result<Self> {
        let rows = store.wash_sale_rows()?;
        let records = rows.into_iter().filter_map(|row| {
            match NaiveDate::parse_from_str(row.sold_date.trim(), DATE_FORMAT) {
                Ok(sold_date) => Some(WashSaleRecord {
                    ticker: row.ticker,
                    conid: row.conid.map(Conid),
                    sold_date,
                }),
                Err(e) => {
                    warn!(
                        "Dropping wash-sale record {} with bad date '{}': {e}",
                        row.ticker, row.sold_date
                    );
                    None
                }
            }
        });
        Ok(Self::new(records))
    }

    /// Remove expired records; returns what was removed.
    pub fn purge_expired(&mut self, today: NaiveDate) -> Vec<WashSaleRecord> {
        let (active, expired): (BTreeMap<_, _>, BTreeMap<_, _>) = std::mem::take(&mut self.records)
            .into_iter()
            .partition(|(_, r)| r.is_active(today));
        self.records = active;
        let expired: Vec<_> = expired.into_values().collect();
        for r in &expired {
            info!("Wash sale expired: {} (sold {})", r.ticker, r.sold_date);
        }
        expired
    }

    /// Insert a loss sale, or refresh an existing record's date to `today`.
    /// Returns true if the ticker was not already in the ledger.
    pub fn flag(&mut self, ticker: &str, conid: Option<Conid>, today: NaiveDate) -> bool {
        match self.records.get_mut(ticker) {
            Some(existing) => {
                existing.sold_date = today;
                if conid.is_some() {
                    existing.conid = conid;
                }
                info!("Wash sale refreshed: {ticker} ({today})");
                false
            }
            None => {
                self.records.insert(
                    ticker.to_string(),
                    WashSaleRecord {
                        ticker: ticker.to_string(),
                        conid,
                        sold_date: today,
                    },
                );
                info!("Wash sale recorded: {ticker} ({today})");
                true
            }
        }
    }

    pub fn contains(&self, ticker: &str) -> bool {
        self.records.contains_key(ticker)
    }

    pub fn records(&self) -> impl Iterator<Item = &WashSaleRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Replace the stored table with this ledger.
    pub fn persist(&self, store: &Store) -> Result<()> {
        let rows: Vec<WashSaleRow> = self
            .records
            .values()
            .map(|r| WashSaleRow {
                ticker: r.ticker.clone(),
                conid: r.conid.map(|c| c.0),
                sold_date: r.sold_date.format(DATE_FORMAT).to_string(),
            })
            .collect();
        store.replace_wash_sales(&rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    fn record(ticker: &str, sold: NaiveDate) -> WashSaleRecord {
        WashSaleRecord {
            ticker: ticker.into(),
            conid: None,
            sold_date: sold,
        }
    }

    #[test]
    fn expiration_boundary() {
        let today = date("2026-10-18");
        let mut ledger = WashSaleLedger::new([
            record("KEEP", today - Days::new(31)),
            record("DROP", today - Days::new(32)),
            record("NEW", today),
        ]);

        let expired = ledger.purge_expired(today);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].ticker, "DROP");
        assert!(ledger.contains("KEEP"));
        assert!(ledger.contains("NEW"));
        assert!(!ledger.contains("DROP"));
    }

    #[test]
    fn flag_inserts_then_refreshes() {
        let mut ledger = WashSaleLedger::default();
        assert!(ledger.flag("C", Some(Conid(3)), date("2026-10-01")));
        assert!(!ledger.flag("C", None, date("2026-10-18")));

        let r = ledger.records().next().unwrap();
        assert_eq!(r.sold_date, date("2026-10-18"));
        assert_eq!(r.conid, Some(Conid(3)));
        assert_eq!(r.expires(), date("2026-11-18"));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn persist_and_reload() {
        let store = Store::in_memory().unwrap();
        let mut ledger = WashSaleLedger::default();
        ledger.flag("AAPL", Some(Conid(265598)), date("2026-10-18"));
        ledger.flag("IBM", None, date("2026-10-02"));
        ledger.persist(&store).unwrap();

        let loaded = WashSaleLedger::load(&store).unwrap();
        let records: Vec<_> = loaded.records().cloned().collect();
        assert_eq!(
            records,
            vec![
                WashSaleRecord {
                    ticker: "AAPL".into(),
                    conid: Some(Conid(265598)),
                    sold_date: date("2026-10-18"),
                },
                record("IBM", date("2026-10-02")),
            ]
        );
    }

    #[test]
    fn unparseable_dates_dropped_on_load() {
        let store = Store::in_memory().unwrap();
        store
            .replace_wash_sales(&[
                WashSaleRow {
                    ticker: "OK".into(),
                    conid: None,
                    sold_date: "2026-10-10".into(),
                },
                WashSaleRow {
                    ticker: "BAD".into(),
                    conid: None,
                    sold_date: "10/10/2026".into(),
                },
            ])
            .unwrap();

        let ledger = WashSaleLedger::load(&store).unwrap();
        assert!(ledger.contains("OK"));
        assert!(!ledger.contains("BAD"));
    }
}
