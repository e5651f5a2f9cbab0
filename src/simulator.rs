//! Day-by-day backtest loop.
//!
//! A run constructs a fresh ledger, preloads price history for every
//! symbol in one batch, then replays weekday by weekday: pending orders
//! and auto rules first, strategy signals second, equity mark last. The
//! simulator owns execution discipline: buys the account cannot afford
//! are skipped and sells are clamped to the actual position, so a
//! misbehaving strategy can never corrupt the ledger.

use anyhow::{bail, Result};
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::data::PriceSeriesProvider;
use crate::ledger::{CostParams, Ledger, LedgerError, RiskParams};
use crate::orders;
use crate::performance;
use crate::strategies::{Action, MarketContext, Strategy};
use crate::types::{EquityPoint, PriceBar, StrategyResult, Symbol};

/// Calendar days of history preloaded before the start date
const LOOKBACK_DAYS: i64 = 60;
/// Cap on the preload window
const MAX_WINDOW_DAYS: i64 = 90;

/// Cooperative cancellation flag, checked once per simulated day.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// All weekdays in `[start, end]`, oldest first.
pub fn trading_days(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut days = Vec::new();
    let mut day = start;
    while day <= end {
        if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
            days.push(day);
        }
        day += Duration::days(1);
    }
    days
}

pub struct Simulator {
    provider: Arc<PriceSeriesProvider>,
    initial_cash: Decimal,
    costs: CostParams,
    risk: RiskParams,
    cancel: Option<CancelToken>,
}

impl Simulator {
    pub fn new(provider: Arc<PriceSeriesProvider>) -> Self {
        Simulator {
            provider,
            initial_cash: dec!(100000),
            costs: CostParams::default(),
            risk: RiskParams::default(),
            cancel: None,
        }
    }

    pub fn with_initial_cash(mut self, cash: Decimal) -> Self {
        self.initial_cash = cash;
        self
    }

    pub fn with_costs(mut self, costs: CostParams) -> Self {
        self.costs = costs;
        self
    }

    pub fn with_risk(mut self, risk: RiskParams) -> Self {
        self.risk = risk;
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Run one strategy over `[start, end]` and produce its result record.
    pub fn run(
        &self,
        strategy: &mut dyn Strategy,
        start: NaiveDate,
        end: NaiveDate,
        symbols: &[Symbol],
    ) -> Result<StrategyResult> {
        if start > end {
            bail!("start date {start} must not be after end date {end}");
        }

        let mut ledger = Ledger::new(self.initial_cash)?
            .with_costs(self.costs)
            .with_risk(self.risk);

        let days = trading_days(start, end);
        let span = (end - start).num_days();
        let window = (span + LOOKBACK_DAYS).min(MAX_WINDOW_DAYS) as u32;

        // Batch preload: one history fetch per symbol, never per day.
        let mut full: BTreeMap<Symbol, Vec<PriceBar>> = BTreeMap::new();
        for code in symbols {
            match self.provider.get_history(code, end, window) {
                Some(bars) => {
                    full.insert(code.clone(), bars);
                }
                None => warn!(code = %code, "no price history available, excluding symbol"),
            }
        }

        info!(
            strategy = strategy.name(),
            %start,
            %end,
            days = days.len(),
            symbols = full.len(),
            "backtest started"
        );

        let mut visible: BTreeMap<Symbol, Vec<PriceBar>> = full
            .keys()
            .map(|code| (code.clone(), Vec::new()))
            .collect();
        let mut cursors: BTreeMap<Symbol, usize> = full
            .keys()
            .map(|code| (code.clone(), 0usize))
            .collect();
        let mut equity_curve: Vec<EquityPoint> = Vec::with_capacity(days.len());

        for day in days {
            if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                info!(strategy = strategy.name(), %day, "backtest cancelled");
                break;
            }

            // Reveal every bar up to and including today.
            let mut prices: BTreeMap<Symbol, Decimal> = BTreeMap::new();
            for (code, bars) in &full {
                let cursor = cursors.get_mut(code).expect("cursor exists per symbol");
                let seen = visible.get_mut(code).expect("window exists per symbol");
                while *cursor < bars.len() && bars[*cursor].date <= day {
                    seen.push(bars[*cursor].clone());
                    *cursor += 1;
                }
                if let Some(last) = seen.last() {
                    if last.date == day {
                        prices.insert(code.clone(), last.close);
                    }
                }
            }

            orders::process_day(&mut ledger, day, &prices);

            let ctx = MarketContext {
                date: day,
                prices: &prices,
                history: &visible,
                available_symbols: symbols,
                cash: ledger.cash(),
            };
            let holdings = ledger.holdings();
            let signals = match strategy.next(&ctx, &holdings) {
                Ok(signals) => signals,
                Err(err) => {
                    warn!(strategy = strategy.name(), %day, "strategy error: {err:#}");
                    Vec::new()
                }
            };

            for signal in signals {
                self.execute(&mut ledger, day, &prices, &signal.code, signal.action, signal.shares);
            }

            equity_curve.push((day, ledger.mark_to_market(&prices)));
        }

        let performance = performance::compute(&equity_curve, ledger.trade_log());
        info!(
            strategy = strategy.name(),
            trades = ledger.trade_log().len(),
            total_return = performance.total_return,
            sharpe = performance.sharpe,
            "backtest finished"
        );

        Ok(StrategyResult {
            strategy_name: strategy.name().to_string(),
            equity_curve,
            trades: ledger.trade_log().to_vec(),
            performance,
        })
    }

    fn execute(
        &self,
        ledger: &mut Ledger,
        day: NaiveDate,
        prices: &BTreeMap<Symbol, Decimal>,
        code: &Symbol,
        action: Action,
        shares: i64,
    ) {
        let Some(&price) = prices.get(code) else {
            debug!(code = %code, "signal skipped: no price today");
            return;
        };
        if shares <= 0 {
            return;
        }
        let name = self.provider.stock_name(code);

        match action {
            Action::Buy => match ledger.buy(day, code, &name, shares, price) {
                Ok(_) => {}
                Err(LedgerError::InsufficientFunds { required, available }) => {
                    debug!(code = %code, %required, %available, "buy skipped: insufficient cash");
                }
                Err(err) => warn!(code = %code, "buy failed: {err}"),
            },
            Action::Sell => {
                // Clamp to the actual position instead of failing.
                let clamped = shares.min(ledger.shares_of(code));
                if clamped <= 0 {
                    debug!(code = %code, "sell skipped: nothing held");
                    return;
                }
                if let Err(err) = ledger.sell(day, code, &name, clamped, price) {
                    warn!(code = %code, "sell failed: {err}");
                }
            }
            Action::Hold => {}
        }
    }
}
