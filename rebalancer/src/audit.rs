//! JSONL audit trail logging.
//!
//! Each rebalancer run appends events to an audit.jsonl file,
//! one JSON object per line.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::executor::TradeOutcome;
use crate::ledger::WashSaleLedger;
use crate::planner::RebalancePlan;
use crate::snapshot::{AccountSummary, MarketQuote, Position};

/// An audit event written to the JSONL trail.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub event: &'static str,
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub data: serde_json::Value,
}

/// Append-only audit logger.
pub struct AuditLog {
    writer: Box<dyn Write>,
}

impl AuditLog {
    /// Open (or create) the audit log file for appending.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self::from_writer(BufWriter::new(file)))
    }

    /// Log to an arbitrary sink. Each event is flushed as it is written.
    pub fn from_writer(writer: impl Write + 'static) -> Self {
        Self {
            writer: Box::new(writer),
        }
    }

    /// Log an event with arbitrary JSON data.
    pub fn log(&mut self, event: &'static str, data: serde_json::Value) -> Result<()> {
        let entry = AuditEvent {
            event,
            ts: Utc::now(),
            data,
        };
        let json = serde_json::to_string(&entry)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        writeln!(self.writer, "{json}")?;
        self.writer.flush()?;
        Ok(())
    }

    /// Log a simple event with no additional data.
    pub fn log_simple(&mut self, event: &'static str) -> Result<()> {
        self.log(event, serde_json::json!({}))
    }
}

pub fn log_run_started(
    audit: &mut AuditLog,
    strategy: &str,
    account_id: &str,
    dry_run: bool,
) -> Result<()> {
    audit.log(
        "run_started",
        serde_json::json!({
            "strategy": strategy,
            "account": account_id,
            "dry_run": dry_run,
        }),
    )
}

pub fn log_snapshot(
    audit: &mut AuditLog,
    summary: &AccountSummary,
    positions: &[Position],
    quotes: &[MarketQuote],
) -> Result<()> {
    let pos_data: Vec<_> = positions
        .iter()
        .map(|p| {
            serde_json::json!({
                "ticker": p.ticker,
                "conid": p.conid.0,
                "qty": p.quantity,
                "market_value": p.market_value.as_dollars(),
                "pnl": p.unrealized_pnl.as_dollars(),
            })
        })
        .collect();
    let quote_data: Vec<_> = quotes
        .iter()
        .map(|q| {
            serde_json::json!({
                "ticker": q.ticker,
                "conid": q.conid.0,
                "last": q.last_price.as_dollars(),
            })
        })
        .collect();

    audit.log(
        "snapshot_taken",
        serde_json::json!({
            "net_liquidation": summary.net_liquidation.as_dollars(),
            "total_cash": summary.total_cash.as_dollars(),
            "positions": pos_data,
            "quotes": quote_data,
        }),
    )
}

pub fn log_plan(audit: &mut AuditLog, plan: &RebalancePlan, tolerance: f64) -> Result<()> {
    let trades: Vec<_> = plan
        .trades
        .iter()
        .map(|t| {
            serde_json::json!({
                "ticker": t.ticker,
                "conid": t.conid.0,
                "target_shares": t.target_shares,
                "position": t.position,
                "trade": t.trade_quantity,
                "difference": t.difference.as_dollars(),
                "difference_pct": t.difference_pct,
            })
        })
        .collect();

    audit.log(
        "plan_computed",
        serde_json::json!({
            "target_value": plan.target_value.as_dollars(),
            "tolerance": tolerance,
            "rows": plan.rows.len(),
            "trades": trades,
            "suppressed": plan.suppressed,
        }),
    )
}

pub fn log_wash_sales(
    audit: &mut AuditLog,
    plan: &RebalancePlan,
    ledger: &WashSaleLedger,
) -> Result<()> {
    let expired: Vec<_> = plan
        .expired_wash_sales
        .iter()
        .map(|r| r.ticker.as_str())
        .collect();
    let active: Vec<_> = ledger
        .records()
        .map(|r| {
            serde_json::json!({
                "ticker": r.ticker,
                "sold_date": r.sold_date.to_string(),
                "expires": r.expires().to_string(),
            })
        })
        .collect();

    audit.log(
        "wash_sales_updated",
        serde_json::json!({
            "flagged": plan.new_wash_sales,
            "expired": expired,
            "active": active,
        }),
    )
}

pub fn log_order_result(audit: &mut AuditLog, outcome: &TradeOutcome) -> Result<()> {
    audit.log(
        "order_result",
        serde_json::json!({
            "ticker": outcome.order.ticker,
            "conid": outcome.order.conid.0,
            "qty": outcome.order.quantity,
            "status": format!("{:?}", outcome.execution.status),
            "order_id": outcome.execution.order_id,
            "confirmations": outcome.execution.confirmations,
            "message": outcome.execution.last_message,
        }),
    )
}

pub fn log_run_completed(
    audit: &mut AuditLog,
    submitted: usize,
    confirmed: usize,
    failed: usize,
) -> Result<()> {
    audit.log(
        "run_completed",
        serde_json::json!({
            "submitted": submitted,
            "confirmed": confirmed,
            "failed": failed,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_log_writes_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test_audit.jsonl");

        {
            let mut log = AuditLog::open(&path).unwrap();
            log.log_simple("test_event").unwrap();
            log_run_started(&mut log, "momentum", "U1234567", true).unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        for line in &lines {
            let _: serde_json::Value = serde_json::from_str(line).unwrap();
        }
        assert!(lines[0].contains("\"event\":\"test_event\""));

        let started: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(started["strategy"], "momentum");
        assert_eq!(started["dry_run"], true);
        assert!(started["ts"].is_string());
    }

    #[test]
    fn audit_log_appends_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        for _ in 0..2 {
            let mut log = AuditLog::open(&path).unwrap();
            log_run_completed(&mut log, 3, 2, 1).unwrap();
        }
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("\"confirmed\":2"));
    }

    #[test]
    fn audit_log_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subdir").join("deep").join("audit.jsonl");

        let mut log = AuditLog::open(&path).unwrap();
        log.log_simple("test").unwrap();

        assert!(path.exists());
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("disk full"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failing_sink_surfaces_audit_error() {
        let mut log = AuditLog::from_writer(Broken);
        let err = log.log_simple("test").unwrap_err();
        assert!(matches!(err, crate::error::Error::Audit(_)));
    }
}
