//! Quant Arena - main entry point
//!
//! This binary provides two subcommands:
//! - tournament: Run every registered strategy over the same window and rank them
//! - backtest: Run a single strategy and print its result

use anyhow::{bail, Context, Result};
use chrono::{Duration, Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use quant_arena::config::Config;
use quant_arena::data::PriceSeriesProvider;
use quant_arena::simulator::Simulator;
use quant_arena::strategies::StrategyRegistry;
use quant_arena::stress::JumpModel;
use quant_arena::tournament::run_tournament;
use quant_arena::types::{StrategyResult, Symbol};

#[derive(Parser, Debug)]
#[command(name = "quant-arena")]
#[command(about = "Deterministic stock backtesting with strategy tournaments", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Args, Debug)]
struct RunOpts {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Start date (YYYY-MM-DD); defaults to 60 days before the end date
    #[arg(long)]
    start: Option<String>,

    /// End date (YYYY-MM-DD); defaults to today
    #[arg(long)]
    end: Option<String>,

    /// Initial cash (overrides config)
    #[arg(long)]
    cash: Option<Decimal>,

    /// Symbols to trade (comma-separated, overrides config)
    #[arg(long)]
    symbols: Option<String>,

    /// Enable stress-test price shocks
    #[arg(long)]
    stress: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run every registered strategy and print the ranking
    Tournament {
        #[command(flatten)]
        opts: RunOpts,
    },

    /// Run a single strategy backtest
    Backtest {
        /// Strategy name (see `tournament` output for the full list)
        strategy: String,

        #[command(flatten)]
        opts: RunOpts,
    },
}

fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .init();
}

struct RunSetup {
    simulator: Simulator,
    symbols: Vec<Symbol>,
    start: NaiveDate,
    end: NaiveDate,
}

fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("invalid date '{value}', expected YYYY-MM-DD"))
}

fn prepare(opts: &RunOpts) -> Result<RunSetup> {
    let config = match &opts.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    let end = match &opts.end {
        Some(value) => parse_date(value)?,
        None => Local::now().date_naive(),
    };
    let start = match &opts.start {
        Some(value) => parse_date(value)?,
        None => end - Duration::days(60),
    };
    if start >= end {
        bail!("start date {start} must be before end date {end}");
    }

    let mut provider = match &config.data.csv_dir {
        Some(dir) => PriceSeriesProvider::from_csv_dir(dir),
        None => PriceSeriesProvider::synthetic(),
    };
    if let Some(path) = &config.data.cache_file {
        provider = provider.with_cache_file(path);
    }
    if let Some(path) = &config.data.events_file {
        provider = provider.with_events_file(path);
    }
    if !config.data.symbols.is_empty() {
        let list: BTreeMap<Symbol, String> = config.data.stock_list().into_iter().collect();
        provider = provider.with_stock_list(list);
    }
    if opts.stress || config.stress.enabled {
        let mut stress = config.stress.clone();
        stress.enabled = true;
        provider = provider.with_stress(Box::new(JumpModel::new(stress)));
        info!("stress-test price shocks enabled");
    }

    let symbols: Vec<Symbol> = match &opts.symbols {
        Some(list) => list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Symbol::new)
            .collect(),
        None => {
            let configured = config.data.symbols();
            if configured.is_empty() {
                provider.stock_list().keys().cloned().collect()
            } else {
                configured
            }
        }
    };
    if symbols.is_empty() {
        bail!("no symbols to trade");
    }

    let simulator = Simulator::new(Arc::new(provider))
        .with_initial_cash(opts.cash.unwrap_or(config.account.initial_cash))
        .with_costs(config.cost_params()?)
        .with_risk(config.risk_params());

    Ok(RunSetup {
        simulator,
        symbols,
        start,
        end,
    })
}

fn print_ranking(results: &[StrategyResult]) {
    println!(
        "{:<5} {:<16} {:>10} {:>10} {:>8} {:>8} {:>9} {:>8} {:>7}",
        "Rank", "Strategy", "Return%", "CAGR%", "Sharpe", "MaxDD%", "WinRate%", "PF", "Trades"
    );
    for (rank, result) in results.iter().enumerate() {
        let p = &result.performance;
        println!(
            "{:<5} {:<16} {:>10.2} {:>10.2} {:>8.2} {:>8.2} {:>9.1} {:>8.2} {:>7}",
            rank + 1,
            result.strategy_name,
            p.total_return * 100.0,
            p.cagr * 100.0,
            p.sharpe,
            p.max_drawdown * 100.0,
            p.win_rate * 100.0,
            p.profit_factor,
            result.trades.len(),
        );
    }
}

fn cmd_tournament(opts: RunOpts) -> Result<()> {
    let setup = prepare(&opts)?;
    let registry = StrategyRegistry::builtin();
    if registry.is_empty() {
        bail!("no strategies registered");
    }
    let results = run_tournament(
        &setup.simulator,
        &registry,
        setup.start,
        setup.end,
        &setup.symbols,
    );
    print_ranking(&results);
    Ok(())
}

fn cmd_backtest(name: String, opts: RunOpts) -> Result<()> {
    let setup = prepare(&opts)?;
    let registry = StrategyRegistry::builtin();
    let Some(mut strategy) = registry.create(&name) else {
        bail!(
            "unknown strategy '{name}'; available: {}",
            registry.names().join(", ")
        );
    };

    let result = setup
        .simulator
        .run(strategy.as_mut(), setup.start, setup.end, &setup.symbols)?;
    print_ranking(std::slice::from_ref(&result));

    if let (Some(first), Some(last)) = (result.equity_curve.first(), result.equity_curve.last())
    {
        println!();
        println!("Start equity ({}): {:.2}", first.0, first.1);
        println!("Final equity ({}): {:.2}", last.0, last.1);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Tournament { opts } => cmd_tournament(opts),
        Commands::Backtest { strategy, opts } => cmd_backtest(strategy, opts),
    }
}
