//! CLI entry point for the stratbook rebalancer.

use std::path::{Path, PathBuf};
use std::process;

use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};

use stratbook_rebalancer::broker::connect_gateway;
use stratbook_rebalancer::config::Config;
use stratbook_rebalancer::error::{Error, Result};
use stratbook_rebalancer::execution::{self, RunOptions};
use stratbook_rebalancer::store::Store;

#[derive(Parser)]
#[command(name = "rebalancer")]
#[command(about = "Strategy rebalancer for the IBKR Client Portal gateway")]
#[command(version)]
struct Cli {
    /// Path to config.toml
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Plan, confirm, and execute a rebalance toward the configured strategy
    Run {
        /// Show plan without executing or saving wash sales
        #[arg(long)]
        dry_run: bool,

        /// Skip confirmation prompt (for automation/cron)
        #[arg(long)]
        force: bool,

        /// Override the configured tolerance fraction
        #[arg(long)]
        tolerance: Option<f64>,

        /// Account alias from [aliases]
        #[arg(long)]
        account: Option<String>,
    },

    /// Show grouped strategy universes
    Tickers {
        /// Strategy name (all when omitted)
        strategy: Option<String>,
    },

    /// Append screener results from a JSON file
    Import {
        /// Path to a JSON array of {"name", "tickers"}
        file: PathBuf,

        /// As-of date, YYYY-MM-DD (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Show current positions
    Positions {
        #[arg(long)]
        account: Option<String>,
    },

    /// Show positions aggregated across all sub-accounts
    Portfolios,

    /// Show the account summary
    Account {
        #[arg(long)]
        account: Option<String>,
    },

    /// Show live orders
    Orders {
        /// Statuses to include (default: Inactive, PreSubmitted, Submitted, PendingCancel)
        #[arg(long = "status")]
        statuses: Vec<String>,
    },

    /// Cancel every live order
    CancelAll {
        #[arg(long)]
        account: Option<String>,
    },

    /// Liquidate every position
    CashAll {
        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,

        #[arg(long)]
        account: Option<String>,
    },

    /// Show active wash-sale records
    WashSales,
}

fn open_store(config: &Config) -> Result<Store> {
    Store::open(Path::new(&config.storage.db_path))
}

fn dispatch(config: &Config, command: Command, today: NaiveDate) -> Result<()> {
    match command {
        Command::Run {
            dry_run,
            force,
            tolerance,
            account,
        } => {
            let store = open_store(config)?;
            let opts = RunOptions {
                dry_run,
                force,
                tolerance,
                account,
            };
            let gateway = connect_gateway(config)?;
            execution::run(config, &gateway, &store, &opts, today).map(|_| ())
        }
        Command::Tickers { strategy } => {
            let store = open_store(config)?;
            execution::show_tickers(config, &store, strategy.as_deref())
        }
        Command::Import { file, date } => {
            let store = open_store(config)?;
            execution::import_file(&store, &file, date.unwrap_or(today)).map(|_| ())
        }
        Command::Positions { account } => {
            let account = config.resolve_account(account.as_deref())?;
            execution::show_positions(config, &connect_gateway(config)?, &account)
        }
        Command::Portfolios => execution::show_portfolios(config, &connect_gateway(config)?),
        Command::Account { account } => {
            let account = config.resolve_account(account.as_deref())?;
            execution::show_account(&connect_gateway(config)?, &account)
        }
        Command::Orders { statuses } => {
            execution::show_orders(&connect_gateway(config)?, &statuses)
        }
        Command::CancelAll { account } => {
            let account = config.resolve_account(account.as_deref())?;
            execution::cancel_all(config, &connect_gateway(config)?, &account).map(|_| ())
        }
        Command::CashAll { force, account } => {
            let account = config.resolve_account(account.as_deref())?;
            let store = open_store(config)?;
            let gateway = connect_gateway(config)?;
            execution::cash_all(config, &gateway, &store, &account, force, today).map(|_| ())
        }
        Command::WashSales => {
            let store = open_store(config)?;
            execution::show_wash_sales(&store, today)
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading config: {e}");
            process::exit(1);
        }
    };

    let today = Local::now().date_naive();

    if let Err(e) = dispatch(&config, cli.command, today) {
        match &e {
            Error::Aborted(msg) => {
                eprintln!("{msg}");
                process::exit(0);
            }
            _ => {
                eprintln!("Error: {e}");
                process::exit(1);
            }
        }
    }
}
