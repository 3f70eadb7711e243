//! SQLite store: per-filter universe tables and the wash-sale table.
//!
//! Every screener filter owns a table named after it with rows of
//! `(date, ticker)`; imports only ever append. The `wash_sales` table is
//! replaced wholesale on every write.

use std::path::Path;

use log::{debug, info, warn};
use rusqlite::{Connection, params};
use stratbook::TickerUniverseEntry;

use crate::error::{Error, Result};

const WASH_SALE_TABLE: &str = "wash_sales";

/// A raw wash-sale row as stored; the date is still text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WashSaleRow {
    pub ticker: String,
    pub conid: Option<i64>,
    pub sold_date: String,
}

/// SQLite-backed store.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Config(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        info!("Store opened at {}", path.display());
        Ok(store)
    }

    /// Private in-memory database.
    pub fn in_memory() -> Result<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS wash_sales (
                ticker TEXT PRIMARY KEY,
                conid INTEGER,
                sold_date TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    // === Universe tables ===

    /// Append one filter's tickers as of `date`. Returns rows written.
    pub fn append_universe(&self, filter: &str, date: &str, tickers: &[String]) -> Result<usize> {
        let table = universe_table(filter)?;
        let tx = self.conn.unchecked_transaction()?;
        tx.execute_batch(&format!(
            r#"CREATE TABLE IF NOT EXISTS "{table}" (date TEXT NOT NULL, ticker TEXT NOT NULL);"#
        ))?;
        {
            let mut stmt = tx.prepare(&format!(
                r#"INSERT INTO "{table}" (date, ticker) VALUES (?1, ?2)"#
            ))?;
            for ticker in tickers {
                stmt.execute(params![date, ticker])?;
            }
        }
        tx.commit()?;
        debug!("Appended {} tickers to {table} for {date}", tickers.len());
        Ok(tickers.len())
    }

    /// Names of all universe tables.
    pub fn universe_tables(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' AND name != ?1
             ORDER BY name",
        )?;
        let names = stmt
            .query_map(params![WASH_SALE_TABLE], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(names)
    }

    /// Each universe table's rows at its most recent date.
    pub fn latest_entries(&self) -> Result<Vec<TickerUniverseEntry>> {
        let mut entries = Vec::new();
        for table in self.universe_tables()? {
            let mut stmt = self.conn.prepare(&format!(
                r#"SELECT date, ticker FROM "{table}"
                   WHERE date = (SELECT MAX(date) FROM "{table}")
                   ORDER BY rowid"#
            ))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let Some((date, _)) = rows.first() else {
                warn!("Universe table {table} is empty, skipping");
                continue;
            };
            let date = date.clone();
            entries.push(TickerUniverseEntry::new(
                &table,
                &date,
                rows.into_iter().map(|(_, t)| t),
            ));
        }
        Ok(entries)
    }

    // === Wash sales ===

    pub fn wash_sale_rows(&self) -> Result<Vec<WashSaleRow>> {
        let mut stmt = self
            .conn
            .prepare("SELECT ticker, conid, sold_date FROM wash_sales ORDER BY ticker")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(WashSaleRow {
                    ticker: row.get(0)?,
                    conid: row.get(1)?,
                    sold_date: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Replace the whole wash-sale table in one transaction.
    pub fn replace_wash_sales(&self, rows: &[WashSaleRow]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM wash_sales", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO wash_sales (ticker, conid, sold_date) VALUES (?1, ?2, ?3)",
            )?;
            for row in rows {
                stmt.execute(params![row.ticker, row.conid, row.sold_date])?;
            }
        }
        tx.commit()?;
        debug!("Wash-sale table replaced ({} rows)", rows.len());
        Ok(())
    }
}

/// Filter names become table names, so they are restricted to identifier
/// characters.
fn universe_table(filter: &str) -> Result<&str> {
    let valid = !filter.is_empty()
        && filter
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !filter.starts_with("sqlite_");
    if !valid || filter == WASH_SALE_TABLE {
        return Err(Error::Validation(format!("invalid filter name '{filter}'")));
    }
    Ok(filter)
}
