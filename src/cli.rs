//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use crate::adapters::csv_adapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::finnhub_adapter::QuoteClient;
use crate::adapters::sqlite_adapter::SqliteStore;
use crate::domain::error::BrokerError;
use crate::domain::ingestion::PriceIngestionJob;
use crate::domain::ledger::LedgerEngine;
use crate::domain::portfolio::PortfolioSummary;
use crate::domain::rate_limiter::RateLimiter;
use crate::domain::scheduler::Scheduler;
use crate::domain::settings::{
    build_ingestion_settings, build_ledger_settings, parse_amount, IngestionSettings,
};
use crate::domain::stock::NewStock;
use crate::domain::trade::{Side, Transaction};
use crate::ports::config_port::ConfigPort;

#[derive(Parser, Debug)]
#[command(name = "virtualbroker", about = "Simulated stock trading ledger")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the database schema
    InitDb {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Track a new stock
    AddStock {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        symbol: String,
        #[arg(long, default_value = "")]
        name: String,
    },
    /// Track every stock listed in a `symbol,name` CSV file
    ImportStocks {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Open an account
    AddUser {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        email: String,
        /// Starting cash; defaults to [ledger] starting_balance
        #[arg(long)]
        balance: Option<String>,
    },
    /// Run one price ingestion cycle now
    FetchPrices {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Run price ingestion on a fixed interval until the process exits
    Run {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Execute a market order at the latest stored price
    Trade {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        user: i64,
        #[arg(long)]
        symbol: String,
        #[arg(long)]
        side: Side,
        #[arg(long)]
        quantity: i64,
    },
    /// Show cash, holdings, and net worth
    Portfolio {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        user: i64,
    },
    /// List executed trades, newest first
    History {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        user: i64,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    let result = match cli.command {
        Command::InitDb { config } => run_init_db(&config),
        Command::AddStock {
            config,
            symbol,
            name,
        } => run_add_stock(&config, &symbol, &name),
        Command::ImportStocks { config, file } => run_import_stocks(&config, &file),
        Command::AddUser {
            config,
            email,
            balance,
        } => run_add_user(&config, &email, balance.as_deref()),
        Command::FetchPrices { config } => run_fetch_prices(&config),
        Command::Run { config } => run_scheduler(&config),
        Command::Trade {
            config,
            user,
            symbol,
            side,
            quantity,
        } => run_trade(&config, user, &symbol, side, quantity),
        Command::Portfolio { config, user } => run_portfolio(&config, user),
        Command::History { config, user } => run_history(&config, user),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

pub fn load_config(path: &PathBuf) -> Result<FileConfigAdapter, BrokerError> {
    FileConfigAdapter::from_file(path).map_err(|e| BrokerError::ConfigParse {
        file: path.display().to_string(),
        reason: e.to_string(),
    })
}

fn open_store(config: &dyn ConfigPort) -> Result<Arc<SqliteStore>, BrokerError> {
    SqliteStore::from_config(config).map(Arc::new)
}

fn run_init_db(config_path: &PathBuf) -> Result<(), BrokerError> {
    let config = load_config(config_path)?;
    let store = open_store(&config)?;
    store.initialize_schema()?;
    println!("Database schema ready.");
    Ok(())
}

fn run_add_stock(config_path: &PathBuf, symbol: &str, name: &str) -> Result<(), BrokerError> {
    let config = load_config(config_path)?;
    let store = open_store(&config)?;
    let stock = NewStock::new(symbol, name).ok_or_else(|| BrokerError::UnknownSymbol {
        symbol: symbol.to_string(),
    })?;
    let stock = store.create_stock(&stock)?;
    println!("Added {} ({}) as stock {}.", stock.symbol, stock.name, stock.id);
    Ok(())
}

fn run_import_stocks(config_path: &PathBuf, file: &PathBuf) -> Result<(), BrokerError> {
    let config = load_config(config_path)?;
    let store = open_store(&config)?;
    let stocks = csv_adapter::read_stocks(file)?;
    let added = store.import_stocks(&stocks)?;
    println!(
        "Imported {} new stocks ({} already tracked).",
        added,
        stocks.len() - added
    );
    Ok(())
}

fn run_add_user(
    config_path: &PathBuf,
    email: &str,
    balance: Option<&str>,
) -> Result<(), BrokerError> {
    let config = load_config(config_path)?;
    let ledger_settings = build_ledger_settings(&config)?;
    let starting_balance = match balance {
        None => ledger_settings.starting_balance,
        Some(raw) => parse_amount(raw)
            .filter(|b| !b.is_sign_negative())
            .ok_or_else(|| BrokerError::ConfigInvalid {
                section: "ledger".into(),
                key: "starting_balance".into(),
                reason: format!("'{raw}' is not a non-negative amount"),
            })?,
    };

    let store = open_store(&config)?;
    let account = store.create_user(email, starting_balance)?;
    println!(
        "Created user {} <{}> with balance {}.",
        account.id, account.email, account.balance
    );
    Ok(())
}

fn build_ingestion_job(
    config: &dyn ConfigPort,
) -> Result<(Arc<PriceIngestionJob>, IngestionSettings), BrokerError> {
    let settings = build_ingestion_settings(config)?;
    let store = open_store(config)?;
    let limiter = Arc::new(RateLimiter::new(settings.spacing));
    let quotes = QuoteClient::from_env(&settings, limiter)?;
    let job = PriceIngestionJob::new(store, Arc::new(quotes), settings.batch_size)
        .with_pacing(settings.spacing);
    Ok((Arc::new(job), settings))
}

fn run_fetch_prices(config_path: &PathBuf) -> Result<(), BrokerError> {
    let config = load_config(config_path)?;
    let (job, _) = build_ingestion_job(&config)?;
    let report = job.run()?;
    println!(
        "Fetched {} of {} symbols, stored {} ticks.",
        report.fetched, report.symbols, report.persisted
    );
    if !report.failed.is_empty() {
        println!("Failed: {}", report.failed.join(", "));
    }
    Ok(())
}

fn run_scheduler(config_path: &PathBuf) -> Result<(), BrokerError> {
    let config = load_config(config_path)?;
    let (job, settings) = build_ingestion_job(&config)?;
    let scheduler = Scheduler::new(job, settings.interval, settings.misfire_grace);
    scheduler.start()?;
    info!("Price ingestion running; stop with Ctrl-C");
    scheduler.join();
    Ok(())
}

fn build_engine(config: &dyn ConfigPort) -> Result<LedgerEngine, BrokerError> {
    let settings = build_ledger_settings(config)?;
    let store = open_store(config)?;
    Ok(LedgerEngine::new(store.clone(), store, settings.funds_policy))
}

fn run_trade(
    config_path: &PathBuf,
    user: i64,
    symbol: &str,
    side: Side,
    quantity: i64,
) -> Result<(), BrokerError> {
    let config = load_config(config_path)?;
    let engine = build_engine(&config)?;
    let receipt = engine.execute_trade(user, symbol, side, quantity)?;
    println!("{receipt}");
    println!("Balance: {}", receipt.resulting_balance);
    Ok(())
}

fn run_portfolio(config_path: &PathBuf, user: i64) -> Result<(), BrokerError> {
    let config = load_config(config_path)?;
    let engine = build_engine(&config)?;
    print!("{}", format_portfolio(&engine.portfolio(user)?));
    Ok(())
}

fn run_history(config_path: &PathBuf, user: i64) -> Result<(), BrokerError> {
    let config = load_config(config_path)?;
    let engine = build_engine(&config)?;
    print!("{}", format_history(&engine.history(user)?));
    Ok(())
}

pub fn format_portfolio(summary: &PortfolioSummary) -> String {
    let mut out = String::new();
    out.push_str(&format!("Cash:        {}\n", summary.balance));
    if summary.holdings.is_empty() {
        out.push_str("No holdings.\n");
    } else {
        out.push_str(&format!(
            "{:<8} {:>8} {:>12} {:>12} {:>14} {:>12}\n",
            "Symbol", "Qty", "Avg Cost", "Last", "Value", "P&L"
        ));
        for h in &summary.holdings {
            let last = h.last_price.map(|p| p.to_string()).unwrap_or_else(|| "-".into());
            let pnl = h
                .unrealized_pnl
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".into());
            out.push_str(&format!(
                "{:<8} {:>8} {:>12} {:>12} {:>14} {:>12}\n",
                h.symbol, h.quantity, h.average_cost, last, h.market_value, pnl
            ));
        }
    }
    out.push_str(&format!("Holdings:    {}\n", summary.holdings_value));
    out.push_str(&format!("Net worth:   {}\n", summary.total_worth));
    out
}

pub fn format_history(transactions: &[Transaction]) -> String {
    if transactions.is_empty() {
        return "No transactions.\n".to_string();
    }
    let mut out = String::new();
    for t in transactions {
        out.push_str(&format!(
            "{}  {:<4} {:>8} {:<8} @ {}\n",
            t.executed_at.format("%Y-%m-%d %H:%M:%S"),
            t.side,
            t.quantity,
            t.symbol,
            t.price
        ));
    }
    out
}
