//! Price-momentum strategy.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;

use super::{Action, MarketContext, Strategy, TradeSignal};
use crate::types::Symbol;

const LOOKBACK_DAYS: usize = 10;
/// Momentum entry/exit threshold in percent
const THRESHOLD_PCT: Decimal = dec!(2.0);
/// Fraction of current cash committed per buy signal
const BUY_CASH_FRACTION: Decimal = dec!(0.15);

/// Buys symbols that gained more than 2% over the last ten trading days
/// and liquidates symbols that lost more than 2% over the same window.
pub struct Momentum;

impl Momentum {
    pub fn new() -> Self {
        Momentum
    }

    fn momentum_pct(closes: &[Decimal]) -> Option<Decimal> {
        if closes.len() <= LOOKBACK_DAYS {
            return None;
        }
        let past = closes[closes.len() - 1 - LOOKBACK_DAYS];
        let current = closes[closes.len() - 1];
        if past <= Decimal::ZERO {
            return None;
        }
        Some((current - past) / past * dec!(100))
    }
}

impl Default for Momentum {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for Momentum {
    fn name(&self) -> &str {
        "momentum"
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
            let Some(momentum) = Self::momentum_pct(&closes) else {
                continue;
            };
            let held = holdings.get(code).copied().unwrap_or(0);

            if momentum > THRESHOLD_PCT && held == 0 {
                let budget = ctx.cash * BUY_CASH_FRACTION;
                let shares = (budget / price).floor().to_i64().unwrap_or(0);
                if shares > 0 {
                    signals.push(TradeSignal {
                        action: Action::Buy,
                        code: code.clone(),
                        shares,
                    });
                }
            } else if momentum < -THRESHOLD_PCT && held > 0 {
                signals.push(TradeSignal {
                    action: Action::Sell,
                    code: code.clone(),
                    shares: held,
                });
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

    fn trending_history(start_close: Decimal, step: Decimal) -> Vec<PriceBar> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        (0..15)
            .map(|i| {
                let close = start_close + step * Decimal::from(i as u64);
                PriceBar {
                    date: start + Duration::days(i as i64),
                    open: close,
                    high: close,
                    low: close,
                    close,
                    volume: 1_000_000,
                }
            })
            .collect()
    }

    fn run(
        history: Vec<PriceBar>,
        cash: Decimal,
        held: i64,
    ) -> Vec<TradeSignal> {
        let code = Symbol::new("AAPL");
        let symbols = vec![code.clone()];
        let price = history.last().unwrap().close;
        let prices: BTreeMap<_, _> = [(code.clone(), price)].into();
        let history: BTreeMap<_, _> = [(code.clone(), history)].into();
        let holdings: BTreeMap<_, _> = if held > 0 {
            [(code.clone(), held)].into()
        } else {
            BTreeMap::new()
        };
        let ctx = MarketContext {
            date: NaiveDate::from_ymd_opt(2024, 5, 6).unwrap(),
            prices: &prices,
            history: &history,
            available_symbols: &symbols,
            cash,
        };
        Momentum::new().next(&ctx, &holdings).unwrap()
    }

    #[test]
    fn strong_uptrend_triggers_a_buy() {
        // +1 per day on a 100 base: ~10% over ten days
        let signals = run(trending_history(dec!(100), dec!(1)), dec!(10000), 0);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].action, Action::Buy);
        // 15% of 10000 = 1500; final close 114 floors to 13 shares
        assert_eq!(signals[0].shares, 13);
    }

    #[test]
    fn downtrend_liquidates_holdings() {
        let signals = run(trending_history(dec!(100), dec!(-1)), dec!(5000), 20);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].action, Action::Sell);
        assert_eq!(signals[0].shares, 20);
    }

    #[test]
    fn flat_market_stays_quiet() {
        let signals = run(trending_history(dec!(100), dec!(0)), dec!(10000), 10);
        assert!(signals.is_empty());
    }

    #[test]
    fn uptrend_without_cash_emits_nothing() {
        let signals = run(trending_history(dec!(100), dec!(1)), dec!(50), 0);
        assert!(signals.is_empty());
    }
}
