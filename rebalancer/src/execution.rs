//! Execution orchestrator: group → snapshot → plan → confirm → execute →
//! persist, plus the read-only account commands.
//!
//! This is the main workflow that ties together all components. Every
//! function takes the gateway as a parameter so the whole pipeline runs
//! against `MockGateway` in tests.

use std::path::Path;
use std::time::Duration;

use chrono::NaiveDate;
use log::{info, warn};
use serde::Deserialize;
use stratbook::{Strategy, group_and_combine};
use stratbook_broker::Gateway;
use stratbook_broker::ibkr::{cancel_all_orders, filter_live_orders};

use crate::audit::{self, AuditLog};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::executor::{ExecutionReport, TradeOrder, TradeOutcome, execute_trades};
use crate::ledger::WashSaleLedger;
use crate::planner::{self, RebalancePlan};
use crate::snapshot::{
    self, AccountSummary, MarketQuote, Position, PositionFetch, aggregate_positions,
};
use crate::store::Store;

/// Options for a rebalance run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub dry_run: bool,
    pub force: bool,
    /// Overrides `[strategy].tolerance`.
    pub tolerance: Option<f64>,
    /// Account alias; the configured account when absent.
    pub account: Option<String>,
}

/// What a run did.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub account: String,
    pub strategy: Strategy,
    pub plan: RebalancePlan,
    /// `None` for dry runs, empty plans and declined confirmations.
    pub execution: Option<ExecutionReport>,
}

/// One screener result in an import file.
#[derive(Debug, Clone, Deserialize)]
pub struct ScreenerResult {
    pub name: String,
    pub tickers: Vec<String>,
}

/// Resolve the configured strategy's universe from the store.
pub fn resolve_strategy(config: &Config, store: &Store, name: &str) -> Result<Strategy> {
    config.strategy_filters(name)?;
    let entries = store.latest_entries()?;
    let mut strategies = group_and_combine(&entries, &config.strategies);
    strategies
        .remove(name)
        .ok_or_else(|| Error::Strategy(format!("no universe data for strategy '{name}'")))
}

fn resolve_tolerance(config: &Config, opts: &RunOptions) -> Result<f64> {
    let tolerance = opts.tolerance.unwrap_or(config.strategy.tolerance);
    if !(0.0..1.0).contains(&tolerance) {
        return Err(Error::Config(format!(
            "tolerance must be in [0.0, 1.0), got {tolerance}"
        )));
    }
    Ok(tolerance)
}

fn require_positions<G: Gateway + ?Sized>(
    config: &Config,
    gateway: &G,
    account: &str,
) -> Result<Vec<Position>> {
    match snapshot::fetch_positions(
        gateway,
        account,
        config.execution.position_retries,
        Duration::from_millis(config.execution.retry_sleep_ms),
    ) {
        PositionFetch::Available(positions) => Ok(positions),
        PositionFetch::Unavailable => Err(Error::Validation(format!(
            "positions unavailable for account {account}"
        ))),
    }
}

fn confirm(prompt: &str) -> Result<bool> {
    dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .map_err(|e| Error::Aborted(format!("confirmation prompt failed: {e}")))
}

/// Execute a full rebalance run, auditing to the configured JSONL file.
pub fn run<G: Gateway + ?Sized>(
    config: &Config,
    gateway: &G,
    store: &Store,
    opts: &RunOptions,
    today: NaiveDate,
) -> Result<RunReport> {
    let mut audit = AuditLog::open(&config.audit_path())?;
    run_with_audit(config, gateway, store, &mut audit, opts, today)
}

/// Execute a full rebalance run against an already open audit log.
pub fn run_with_audit<G: Gateway + ?Sized>(
    config: &Config,
    gateway: &G,
    store: &Store,
    audit: &mut AuditLog,
    opts: &RunOptions,
    today: NaiveDate,
) -> Result<RunReport> {
    // 1. Resolve everything local before touching the gateway
    let account = config.resolve_account(opts.account.as_deref())?;
    let tolerance = resolve_tolerance(config, opts)?;
    let strategy = resolve_strategy(config, store, &config.strategy.name)?;
    if strategy.is_stale(&today.to_string()) {
        warn!(
            "Strategy {} universe is from {}",
            strategy.name, strategy.latest_date
        );
    }
    println!(
        "Strategy {}: {} tickers as of {}",
        strategy.name,
        strategy.tickers.len(),
        strategy.latest_date
    );

    // 2. Audit
    audit::log_run_started(audit, &strategy.name, &account, opts.dry_run)?;

    // 3. Snapshot
    let summary = snapshot::fetch_summary(gateway, &account)?;
    println!(
        "Account {account}: {} net liquidation, {} cash",
        summary.net_liquidation, summary.total_cash
    );
    let positions = require_positions(config, gateway, &account)?;
    display_positions(&positions);

    let contracts = snapshot::resolve_contracts(gateway, &strategy.tickers);
    let quotes = snapshot::fetch_quotes(
        gateway,
        &contracts,
        Duration::from_millis(config.execution.snapshot_settle_ms),
    );
    let missing = unquoted(&strategy, &quotes);
    if !missing.is_empty() {
        warn!("No usable quote for: {}", missing.join(", "));
    }
    audit::log_snapshot(audit, &summary, &positions, &quotes)?;

    // 4. Plan
    let mut ledger = WashSaleLedger::load(store)?;
    let plan = planner::plan(
        &quotes,
        &positions,
        summary.net_liquidation,
        tolerance,
        &mut ledger,
        today,
    )?;
    audit::log_plan(audit, &plan, tolerance)?;
    display_plan(&plan, tolerance);

    let mut report = RunReport {
        account,
        strategy,
        plan,
        execution: None,
    };

    // 5. Dry run stops here
    if opts.dry_run {
        println!("\n[DRY RUN] No orders submitted, wash-sale ledger unchanged.");
        return Ok(report);
    }

    if report.plan.is_empty() {
        println!("\nNo rebalancing needed.");
        persist_ledger(store, &ledger)?;
        audit.log_simple("no_rebalance_needed")?;
        audit::log_wash_sales(audit, &report.plan, &ledger)?;
        return Ok(report);
    }

    // 6. Confirm execution
    if !opts.force {
        if !confirm("Execute?")? {
            println!("Aborted.");
            audit.log("user_confirmed", serde_json::json!({"approved": false}))?;
            return Ok(report);
        }
        audit.log("user_confirmed", serde_json::json!({"approved": true}))?;
    }

    // 7. Execute
    let orders: Vec<TradeOrder> = report.plan.trades.iter().map(TradeOrder::from).collect();
    let execution = execute_trades(
        gateway,
        &report.account,
        &orders,
        &config.confirm_policy(),
        print_progress,
    );

    // 8. Persist before any audit write can fail, then report
    persist_ledger(store, &ledger)?;
    for outcome in &execution.outcomes {
        audit::log_order_result(audit, outcome)?;
    }
    audit::log_wash_sales(audit, &report.plan, &ledger)?;
    audit::log_run_completed(
        audit,
        execution.submitted(),
        execution.confirmed(),
        execution.failed(),
    )?;
    println!(
        "\n{} submitted, {} confirmed, {} failed. Audit logged to {}",
        execution.submitted(),
        execution.confirmed(),
        execution.failed(),
        config.audit_path().display()
    );

    report.execution = Some(execution);
    Ok(report)
}

fn persist_ledger(store: &Store, ledger: &WashSaleLedger) -> Result<()> {
    ledger.persist(store)?;
    info!("Wash-sale ledger saved ({} active)", ledger.len());
    Ok(())
}

fn print_progress(i: usize, n: usize, outcome: &TradeOutcome) {
    println!(
        "[{i}/{n}] {} {} {} ... {outcome}",
        if outcome.order.quantity > 0 { "BUY" } else { "SELL" },
        outcome.order.quantity.abs(),
        outcome.order.ticker,
    );
}

/// Liquidate every position in the account, auditing to the configured
/// JSONL file.
pub fn cash_all<G: Gateway + ?Sized>(
    config: &Config,
    gateway: &G,
    store: &Store,
    account: &str,
    force: bool,
    today: NaiveDate,
) -> Result<Option<ExecutionReport>> {
    let mut audit = AuditLog::open(&config.audit_path())?;
    cash_all_with_audit(config, gateway, store, &mut audit, account, force, today)
}

/// Liquidate every position in the account.
///
/// Loss positions being sold are flagged in the wash-sale ledger, which is
/// saved before the first order goes out. Returns `None` when there is
/// nothing to sell or the user declines.
pub fn cash_all_with_audit<G: Gateway + ?Sized>(
    config: &Config,
    gateway: &G,
    store: &Store,
    audit: &mut AuditLog,
    account: &str,
    force: bool,
    today: NaiveDate,
) -> Result<Option<ExecutionReport>> {
    let positions = require_positions(config, gateway, account)?;
    if positions.is_empty() {
        println!("No positions to liquidate.");
        return Ok(None);
    }
    display_positions(&positions);

    if !force && !confirm(&format!("Liquidate {} positions?", positions.len()))? {
        println!("Aborted.");
        return Ok(None);
    }

    audit.log(
        "cash_all_started",
        serde_json::json!({"account": account, "positions": positions.len()}),
    )?;

    let mut ledger = WashSaleLedger::load(store)?;
    ledger.purge_expired(today);
    let mut orders: Vec<TradeOrder> = Vec::with_capacity(positions.len());
    for p in &positions {
        let Some(order) = TradeOrder::liquidate(p) else {
            info!("{}: less than one share held, not sold", p.ticker);
            continue;
        };
        if p.unrealized_pnl.0 < 0 {
            ledger.flag(&p.ticker, Some(p.conid), today);
        }
        orders.push(order);
    }
    persist_ledger(store, &ledger)?;

    let execution = execute_trades(
        gateway,
        account,
        &orders,
        &config.confirm_policy(),
        print_progress,
    );
    for outcome in &execution.outcomes {
        audit::log_order_result(audit, outcome)?;
    }
    audit::log_run_completed(
        audit,
        execution.submitted(),
        execution.confirmed(),
        execution.failed(),
    )?;
    println!(
        "\n{} submitted, {} confirmed, {} failed.",
        execution.submitted(),
        execution.confirmed(),
        execution.failed()
    );
    Ok(Some(execution))
}

// === Read-only commands ===

/// Print grouped strategies: one by name, or all.
pub fn show_tickers(config: &Config, store: &Store, name: Option<&str>) -> Result<()> {
    let entries = store.latest_entries()?;
    let strategies = group_and_combine(&entries, &config.strategies);

    let selected: Vec<&Strategy> = match name {
        Some(n) => vec![strategies
            .get(n)
            .ok_or_else(|| Error::Strategy(format!("no universe data for strategy '{n}'")))?],
        None => strategies.values().collect(),
    };
    if selected.is_empty() {
        println!("No strategy has universe data yet.");
    }
    for s in selected {
        println!(
            "{} ({} tickers, as of {}): {}",
            s.name,
            s.tickers.len(),
            s.latest_date,
            s.tickers.join(", ")
        );
    }
    Ok(())
}

/// Append screener results from a JSON file. Returns rows written.
pub fn import_file(store: &Store, path: &Path, date: NaiveDate) -> Result<usize> {
    let contents = std::fs::read_to_string(path).map_err(|e| Error::ImportRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    let results: Vec<ScreenerResult> = serde_json::from_str(&contents)?;
    let date = date.format("%Y-%m-%d").to_string();

    let mut written = 0;
    for r in &results {
        written += store.append_universe(&r.name, &date, &r.tickers)?;
        println!("{}: {} tickers as of {date}", r.name, r.tickers.len());
    }
    info!("Imported {written} rows from {}", path.display());
    Ok(written)
}

pub fn show_positions<G: Gateway + ?Sized>(
    config: &Config,
    gateway: &G,
    account: &str,
) -> Result<()> {
    let positions = require_positions(config, gateway, account)?;
    println!("Account {account}");
    display_positions(&positions);
    Ok(())
}

/// Positions summed across every sub-account.
pub fn portfolio_positions<G: Gateway + ?Sized>(
    config: &Config,
    gateway: &G,
) -> Result<Vec<Position>> {
    let subaccounts = gateway.subaccounts()?;
    let mut all = Vec::new();
    for id in subaccounts.iter().filter_map(|s| s.account_id.as_deref()) {
        match snapshot::fetch_positions(
            gateway,
            id,
            config.execution.position_retries,
            Duration::from_millis(config.execution.retry_sleep_ms),
        ) {
            PositionFetch::Available(p) => all.extend(p),
            PositionFetch::Unavailable => warn!("Skipping sub-account {id}: positions unavailable"),
        }
    }
    Ok(aggregate_positions(&all))
}

pub fn show_portfolios<G: Gateway + ?Sized>(config: &Config, gateway: &G) -> Result<()> {
    let positions = portfolio_positions(config, gateway)?;
    println!("All sub-accounts");
    display_positions(&positions);
    Ok(())
}

pub fn show_account<G: Gateway + ?Sized>(gateway: &G, account: &str) -> Result<()> {
    let summary = snapshot::fetch_summary(gateway, account)?;
    display_summary(account, &summary);
    Ok(())
}

pub fn show_orders<G: Gateway + ?Sized>(gateway: &G, statuses: &[String]) -> Result<()> {
    let statuses: Vec<&str> = statuses.iter().map(String::as_str).collect();
    let orders = filter_live_orders(gateway.live_orders()?, &statuses);
    if orders.is_empty() {
        println!("No live orders.");
        return Ok(());
    }
    println!(
        "  {:>12} {:8} {:5} {:>8} {:>10} {}",
        "Order", "Ticker", "Side", "Size", "Remaining", "Status"
    );
    for o in &orders {
        println!(
            "  {:>12} {:8} {:5} {:>8} {:>10} {}",
            o.order_id,
            o.ticker.as_deref().unwrap_or("-"),
            o.side.as_deref().unwrap_or("-"),
            o.total_size.unwrap_or(0.0),
            o.remaining_quantity.unwrap_or(0.0),
            o.status,
        );
    }
    Ok(())
}

/// Cancel every live order. Returns the number cancelled.
pub fn cancel_all<G: Gateway + ?Sized>(
    config: &Config,
    gateway: &G,
    account: &str,
) -> Result<usize> {
    let orders = filter_live_orders(gateway.live_orders()?, &[]);
    if orders.is_empty() {
        println!("No live orders.");
        return Ok(0);
    }
    let outcomes = cancel_all_orders(
        gateway,
        account,
        &orders,
        Duration::from_millis(config.execution.call_delay_ms),
    );
    let mut cancelled = 0;
    for o in &outcomes {
        let ticker = o.ticker.as_deref().unwrap_or("-");
        match &o.result {
            Ok(msg) => {
                cancelled += 1;
                println!("  {} {ticker}: {msg}", o.order_id);
            }
            Err(e) => println!("  {} {ticker}: FAILED {e}", o.order_id),
        }
    }
    println!("{cancelled}/{} orders cancelled.", outcomes.len());
    Ok(cancelled)
}

/// Print the active ledger. Expired records are hidden, not deleted.
pub fn show_wash_sales(store: &Store, today: NaiveDate) -> Result<()> {
    let mut ledger = WashSaleLedger::load(store)?;
    ledger.purge_expired(today);
    if ledger.is_empty() {
        println!("No active wash sales.");
        return Ok(());
    }
    println!("  {:8} {:>10} {:>12} {:>12}", "Ticker", "Conid", "Sold", "Expires");
    for r in ledger.records() {
        println!(
            "  {:8} {:>10} {:>12} {:>12}",
            r.ticker,
            r.conid.map(|c| c.to_string()).unwrap_or_else(|| "-".into()),
            r.sold_date.to_string(),
            r.expires().to_string(),
        );
    }
    Ok(())
}

// === Display helpers ===

fn display_positions(positions: &[Position]) {
    if positions.is_empty() {
        println!("No positions.");
        return;
    }

    println!("CURRENT PORTFOLIO:");
    for pos in positions {
        println!(
            "  {:8} {:>8} @ {:>10} = {:>14}  pnl {:>12}",
            pos.ticker,
            pos.quantity,
            pos.market_price.to_string(),
            pos.market_value.to_string(),
            pos.unrealized_pnl.to_string(),
        );
    }
}

fn display_summary(account: &str, summary: &AccountSummary) {
    println!("Account {account}");
    for (key, value) in summary.display_fields() {
        println!("  {key:32} {value:>16.2}");
    }
}

fn display_plan(plan: &RebalancePlan, tolerance: f64) {
    println!(
        "\nREBALANCE PLAN (target {} per ticker, tolerance {:.0}%):",
        plan.target_value,
        tolerance * 100.0
    );
    println!(
        "  {:8} {:>10} {:>8} {:>8} {:>8} {:>14} {:>8}",
        "Ticker", "Conid", "Target", "Held", "Trade", "Difference", "Diff%"
    );
    for row in &plan.trades {
        println!("  {row}");
    }
    if !plan.suppressed.is_empty() {
        println!("Wash-sale suppressed: {}", plan.suppressed.join(", "));
    }
    if !plan.new_wash_sales.is_empty() {
        println!("Flagged as loss sales: {}", plan.new_wash_sales.join(", "));
    }
}

/// Universe tickers that produced no usable quote.
pub fn unquoted<'a>(strategy: &'a Strategy, quotes: &[MarketQuote]) -> Vec<&'a str> {
    strategy
        .tickers
        .iter()
        .filter(|t| !quotes.iter().any(|q| &q.ticker == *t))
        .map(String::as_str)
        .collect()
}
