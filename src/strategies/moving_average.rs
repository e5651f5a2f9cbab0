//! Moving-average crossover strategy.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;

use super::{Action, MarketContext, Strategy, TradeSignal};
use crate::types::Symbol;

const MA_WINDOW: usize = 20;
/// Fraction of current cash committed per buy signal
const BUY_CASH_FRACTION: Decimal = dec!(0.10);

/// Buys when the close crosses above its 20-day average and liquidates
/// the position when it crosses back below. Crossings are detected
/// against the previous day's relation, so a symbol already above its
/// average produces no entry until it dips and recovers.
pub struct MovingAverageCross {
    /// Last observed close-vs-average relation per symbol
    above: BTreeMap<Symbol, bool>,
}

impl MovingAverageCross {
    pub fn new() -> Self {
        MovingAverageCross {
            above: BTreeMap::new(),
        }
    }

    fn moving_average(closes: &[Decimal]) -> Option<Decimal> {
        if closes.len() < MA_WINDOW {
            return None;
        }
        let window = &closes[closes.len() - MA_WINDOW..];
        let sum: Decimal = window.iter().copied().sum();
        Some(sum / Decimal::from(MA_WINDOW as u64))
    }
}

impl Default for MovingAverageCross {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for MovingAverageCross {
    fn name(&self) -> &str {
        "ma_cross"
    }

    fn next(
        &mut self,
        ctx: &MarketContext<'_>,
        holdings: &BTreeMap<Symbol, i64>,
    ) -> anyhow::Result<Vec<TradeSignal>> {
        let mut signals = Vec::new();

        for code in ctx.available_symbols {
            let Some(&price) = ctx.prices.get(code) else {
                continue;
            };
            let Some(bars) = ctx.history.get(code) else {
                continue;
            };
            let closes: Vec<Decimal> = bars.iter().map(|bar| bar.close).collect();
            let Some(average) = Self::moving_average(&closes) else {
                continue;
            };

            let is_above = price > average;
            let was_above = self.above.insert(code.clone(), is_above);
            let held = holdings.get(code).copied().unwrap_or(0);

            match (was_above, is_above) {
                (Some(false), true) if held == 0 => {
                    let budget = ctx.cash * BUY_CASH_FRACTION;
                    let shares = (budget / price).floor().to_i64().unwrap_or(0);
                    if shares > 0 {
                        signals.push(TradeSignal {
                            action: Action::Buy,
                            code: code.clone(),
                            shares,
                        });
                    }
                }
                (Some(true), false) if held > 0 => {
                    signals.push(TradeSignal {
                        action: Action::Sell,
                        code: code.clone(),
                        shares: held,
                    });
                }
                _ => {}
            }
        }

        Ok(signals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PriceBar;
    use chrono::{Duration, NaiveDate};

    fn flat_history(code: &Symbol, close: Decimal, days: usize) -> Vec<PriceBar> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        (0..days)
            .map(|i| PriceBar {
                date: start + Duration::days(i as i64),
                open: close,
                high: close,
                low: close,
                close,
                volume: 1_000_000,
            })
            .collect()
    }

    fn ctx<'a>(
        prices: &'a BTreeMap<Symbol, Decimal>,
        history: &'a BTreeMap<Symbol, Vec<PriceBar>>,
        symbols: &'a [Symbol],
        cash: Decimal,
    ) -> MarketContext<'a> {
        MarketContext {
            date: NaiveDate::from_ymd_opt(2024, 5, 6).unwrap(),
            prices,
            history,
            available_symbols: symbols,
            cash,
        }
    }

    #[test]
    fn cross_above_emits_buy_sized_by_cash_fraction() {
        let code = Symbol::new("AAPL");
        let symbols = vec![code.clone()];
        let history: BTreeMap<_, _> =
            [(code.clone(), flat_history(&code, dec!(100), 25))].into();
        let mut strategy = MovingAverageCross::new();

        // Day one: below the average, records the relation.
        let below: BTreeMap<_, _> = [(code.clone(), dec!(99))].into();
        let signals = strategy
            .next(&ctx(&below, &history, &symbols, dec!(10000)), &BTreeMap::new())
            .unwrap();
        assert!(signals.is_empty());

        // Day two: crosses above, buys with 10% of cash.
        let above: BTreeMap<_, _> = [(code.clone(), dec!(105))].into();
        let signals = strategy
            .next(&ctx(&above, &history, &symbols, dec!(10000)), &BTreeMap::new())
            .unwrap();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].action, Action::Buy);
        // 1000 / 105 floors to 9 shares
        assert_eq!(signals[0].shares, 9);
    }

    #[test]
    fn cross_below_liquidates_the_position() {
        let code = Symbol::new("AAPL");
        let symbols = vec![code.clone()];
        let history: BTreeMap<_, _> =
            [(code.clone(), flat_history(&code, dec!(100), 25))].into();
        let mut strategy = MovingAverageCross::new();

        let above: BTreeMap<_, _> = [(code.clone(), dec!(105))].into();
        strategy
            .next(&ctx(&above, &history, &symbols, dec!(10000)), &BTreeMap::new())
            .unwrap();

        let below: BTreeMap<_, _> = [(code.clone(), dec!(95))].into();
        let holdings: BTreeMap<_, _> = [(code.clone(), 9_i64)].into();
        let signals = strategy
            .next(&ctx(&below, &history, &symbols, dec!(9000)), &holdings)
            .unwrap();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].action, Action::Sell);
        assert_eq!(signals[0].shares, 9);
    }

    #[test]
    fn short_history_produces_no_signals() {
        let code = Symbol::new("AAPL");
        let symbols = vec![code.clone()];
        let history: BTreeMap<_, _> =
            [(code.clone(), flat_history(&code, dec!(100), 10))].into();
        let prices: BTreeMap<_, _> = [(code.clone(), dec!(105))].into();
        let mut strategy = MovingAverageCross::new();
        let signals = strategy
            .next(&ctx(&prices, &history, &symbols, dec!(10000)), &BTreeMap::new())
            .unwrap();
        assert!(signals.is_empty());
    }
}
