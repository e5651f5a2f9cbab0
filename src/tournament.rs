//! Strategy tournament: run every registered strategy over the same
//! window and rank the results.
//!
//! Each strategy gets a fresh instance and a fresh ledger, so entrants
//! are fully isolated; only the price provider's cache is shared, behind
//! its lock. Runs are parallelized across strategies.

use chrono::NaiveDate;
use rayon::prelude::*;
use std::cmp::Ordering;
use tracing::{error, info};

use crate::simulator::Simulator;
use crate::strategies::StrategyRegistry;
use crate::types::{PerformanceStats, StrategyResult, Symbol};

/// Metric value assigned to strategies that fail outright, so they sort
/// behind every real result instead of disappearing from the table.
const SENTINEL_WORST: f64 = -999.0;

/// Run every strategy in the registry and return results ranked best
/// first: descending Sharpe, ties broken by total return. Always yields
/// exactly one row per registered strategy.
pub fn run_tournament(
    simulator: &Simulator,
    registry: &StrategyRegistry,
    start: NaiveDate,
    end: NaiveDate,
    symbols: &[Symbol],
) -> Vec<StrategyResult> {
    let names = registry.names();
    info!(entrants = names.len(), %start, %end, "tournament started");

    let mut results: Vec<StrategyResult> = names
        .par_iter()
        .map(|name| {
            let Some(mut strategy) = registry.create(name) else {
                error!(strategy = name, "strategy factory missing");
                return failed_result(name);
            };
            match simulator.run(strategy.as_mut(), start, end, symbols) {
                Ok(result) => result,
                Err(err) => {
                    error!(strategy = name, "strategy run failed: {err:#}");
                    failed_result(name)
                }
            }
        })
        .collect();

    results.sort_by(rank_ordering);
    info!(
        winner = results.first().map(|r| r.strategy_name.as_str()).unwrap_or("-"),
        "tournament finished"
    );
    results
}

fn failed_result(name: &str) -> StrategyResult {
    StrategyResult {
        strategy_name: name.to_string(),
        equity_curve: Vec::new(),
        trades: Vec::new(),
        performance: PerformanceStats {
            total_return: SENTINEL_WORST,
            cagr: SENTINEL_WORST,
            sharpe: SENTINEL_WORST,
            max_drawdown: 0.0,
            win_rate: 0.0,
            profit_factor: 0.0,
        },
    }
}

fn rank_ordering(a: &StrategyResult, b: &StrategyResult) -> Ordering {
    b.performance
        .sharpe
        .total_cmp(&a.performance.sharpe)
        .then_with(|| {
            b.performance
                .total_return
                .total_cmp(&a.performance.total_return)
        })
}
