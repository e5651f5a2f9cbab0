//! Performance metrics over an equity curve and a trade log.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use statrs::statistics::Statistics;
use std::collections::{BTreeMap, VecDeque};

use crate::ledger::CostParams;
use crate::types::{EquityPoint, PerformanceStats, Side, Symbol, TradeRecord};

/// Fixed trading-days-per-year assumption for Sharpe annualization
const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Compute the full metrics record for one run.
///
/// The equity curve must be sorted by date; the trade log is replayed
/// with FIFO lot matching to derive win rate and profit factor.
pub fn compute(equity_curve: &[EquityPoint], trades: &[TradeRecord]) -> PerformanceStats {
    let (win_rate, profit_factor) = fifo_win_stats(trades);
    PerformanceStats {
        total_return: total_return(equity_curve),
        cagr: cagr(equity_curve),
        sharpe: sharpe(equity_curve),
        max_drawdown: max_drawdown(equity_curve),
        win_rate,
        profit_factor,
    }
}

/// Rebuild an equity curve by replaying the trade log in date order,
/// ties broken by insertion order.
///
/// Used for manual trading sessions, where no simulator recorded equity
/// day by day. The ledger accepts arbitrary trade dates, so the log is
/// sorted (stably) before the running balances are computed. Cash is
/// reconstructed with the same fee rule the ledger applies, so the final
/// cash value matches the ledger bit-for-bit; holdings are valued at
/// their last trade price. When `live_prices` is given, one extra point
/// marks the open positions to market.
pub fn equity_from_trades(
    initial_cash: Decimal,
    costs: &CostParams,
    trades: &[TradeRecord],
    live_prices: Option<&BTreeMap<Symbol, Decimal>>,
) -> Vec<EquityPoint> {
    let mut curve = Vec::new();
    let mut cash = initial_cash;
    let mut holdings: BTreeMap<Symbol, i64> = BTreeMap::new();
    let mut last_price: BTreeMap<Symbol, Decimal> = BTreeMap::new();

    fn value_holdings(
        holdings: &BTreeMap<Symbol, i64>,
        prices: &BTreeMap<Symbol, Decimal>,
        fallback: &BTreeMap<Symbol, Decimal>,
    ) -> Decimal {
        holdings
            .iter()
            .filter(|(_, shares)| **shares > 0)
            .map(|(code, shares)| {
                prices
                    .get(code)
                    .or_else(|| fallback.get(code))
                    .copied()
                    .unwrap_or(Decimal::ZERO)
                    * Decimal::from(*shares)
            })
            .sum::<Decimal>()
    }

    let mut ordered: Vec<&TradeRecord> = trades.iter().collect();
    ordered.sort_by_key(|trade| trade.date);

    let mut trades_iter = ordered.into_iter().peekable();
    while let Some(trade) = trades_iter.next() {
        let gross = trade.total_amount;
        let fee = if gross > Decimal::ZERO {
            costs.min_fee.max(gross.abs() * costs.fee_rate)
        } else {
            Decimal::ZERO
        };
        match trade.trade_type {
            Side::Buy => {
                cash -= gross + fee;
                *holdings.entry(trade.stock_code.clone()).or_insert(0) += trade.shares;
            }
            Side::Sell => {
                cash += gross - fee;
                *holdings.entry(trade.stock_code.clone()).or_insert(0) -= trade.shares;
            }
        }
        last_price.insert(trade.stock_code.clone(), trade.price);

        // One point per date, after the last trade of that date.
        let date_done = trades_iter
            .peek()
            .map_or(true, |next| next.date != trade.date);
        if date_done {
            let equity = cash + value_holdings(&holdings, &last_price, &last_price);
            curve.push((trade.date, equity));
        }
    }

    if let (Some(prices), Some(&(last_date, _))) = (live_prices, curve.last()) {
        curve.push((last_date, cash + value_holdings(&holdings, prices, &last_price)));
    }
    curve
}

fn total_return(curve: &[EquityPoint]) -> f64 {
    let (Some(first), Some(last)) = (curve.first(), curve.last()) else {
        return 0.0;
    };
    let initial = first.1.to_f64().unwrap_or(0.0);
    if initial <= 0.0 {
        return 0.0;
    }
    last.1.to_f64().unwrap_or(0.0) / initial - 1.0
}

fn cagr(curve: &[EquityPoint]) -> f64 {
    let (Some(first), Some(last)) = (curve.first(), curve.last()) else {
        return 0.0;
    };
    let initial = first.1.to_f64().unwrap_or(0.0);
    let final_equity = last.1.to_f64().unwrap_or(0.0);
    if initial <= 0.0 || final_equity <= 0.0 {
        return 0.0;
    }
    let span_days = (last.0 - first.0).num_days().max(1) as f64;
    (final_equity / initial).powf(365.25 / span_days) - 1.0
}

fn sharpe(curve: &[EquityPoint]) -> f64 {
    // Daily returns over strictly positive equity values only.
    let values: Vec<f64> = curve
        .iter()
        .filter_map(|(_, equity)| equity.to_f64())
        .filter(|v| *v > 0.0)
        .collect();
    if values.len() < 2 {
        return 0.0;
    }
    let returns: Vec<f64> = values.windows(2).map(|w| w[1] / w[0] - 1.0).collect();
    let mean = returns.iter().copied().mean();
    let std_dev = returns.iter().copied().std_dev();
    if !std_dev.is_finite() || std_dev <= 1e-9 {
        return 0.0;
    }
    mean / std_dev * TRADING_DAYS_PER_YEAR.sqrt()
}

/// Largest peak-to-trough decline, as a positive fraction of the peak
fn max_drawdown(curve: &[EquityPoint]) -> f64 {
    let mut peak = f64::MIN;
    let mut worst: f64 = 0.0;
    for (_, equity) in curve {
        let value = equity.to_f64().unwrap_or(0.0);
        peak = peak.max(value);
        if peak > 0.0 {
            worst = worst.max((peak - value) / peak);
        }
    }
    worst
}

/// FIFO lot matching over the trade log.
///
/// Each Buy opens a lot; each Sell consumes the oldest open lots of its
/// symbol. A matched quantity with P&L >= 0 is a win. Returns
/// `(win_rate, profit_factor)`.
fn fifo_win_stats(trades: &[TradeRecord]) -> (f64, f64) {
    struct Lot {
        shares: i64,
        price: Decimal,
    }

    let mut open_lots: BTreeMap<Symbol, VecDeque<Lot>> = BTreeMap::new();
    let mut wins: u64 = 0;
    let mut losses: u64 = 0;
    let mut profit_sum = Decimal::ZERO;
    let mut loss_sum = Decimal::ZERO;

    for trade in trades {
        match trade.trade_type {
            Side::Buy => {
                open_lots
                    .entry(trade.stock_code.clone())
                    .or_default()
                    .push_back(Lot {
                        shares: trade.shares,
                        price: trade.price,
                    });
            }
            Side::Sell => {
                let Some(lots) = open_lots.get_mut(&trade.stock_code) else {
                    continue;
                };
                let mut remaining = trade.shares;
                while remaining > 0 {
                    let Some(lot) = lots.front_mut() else {
                        break;
                    };
                    let matched = remaining.min(lot.shares);
                    let pnl = (trade.price - lot.price) * Decimal::from(matched);
                    if pnl >= Decimal::ZERO {
                        wins += 1;
                        profit_sum += pnl;
                    } else {
                        losses += 1;
                        loss_sum += -pnl;
                    }
                    lot.shares -= matched;
                    remaining -= matched;
                    if lot.shares == 0 {
                        lots.pop_front();
                    }
                }
            }
        }
    }

    let closed = wins + losses;
    let win_rate = if closed > 0 {
        wins as f64 / closed as f64
    } else {
        0.0
    };
    let profit = profit_sum.to_f64().unwrap_or(0.0);
    let loss = loss_sum.to_f64().unwrap_or(0.0);
    let profit_factor = if loss > 0.0 {
        profit / loss
    } else {
        // No losing matches: report the profit sum itself, 0 when flat.
        profit
    };
    (win_rate, profit_factor)
}
