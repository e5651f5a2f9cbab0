//! Order engine: pending-order triggering and auto-trading rules.
//!
//! Evaluated once per simulated day against that day's close. A triggered
//! order that cannot be afforded (or covered) stays open and is retried the
//! next day instead of failing permanently.

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::ledger::Ledger;
use crate::types::{Order, OrderStatus, OrderType, Side, Symbol};

/// Whether an open order fires against close price `close`.
///
/// | type        | side | fires when   |
/// |-------------|------|--------------|
/// | limit       | Buy  | close <= trigger |
/// | limit       | Sell | close >= trigger |
/// | stop_loss   | Sell | close <= trigger |
/// | take_profit | Sell | close >= trigger |
pub fn evaluate_trigger(order: &Order, close: Decimal) -> bool {
    if order.status != OrderStatus::Open {
        return false;
    }
    match (order.order_type, order.side) {
        (OrderType::Limit, Side::Buy) => close <= order.price,
        (OrderType::Limit, Side::Sell) => close >= order.price,
        (OrderType::StopLoss, Side::Sell) => close <= order.price,
        (OrderType::TakeProfit, Side::Sell) => close >= order.price,
        // Sell-only types on the buy side never exist via the public API
        _ => false,
    }
}

/// Evaluate all pending orders against the day's closes, filling those that
/// trigger and are affordable/covered. Returns the number of fills.
pub fn process_pending_orders(
    ledger: &mut Ledger,
    date: NaiveDate,
    prices: &BTreeMap<Symbol, Decimal>,
) -> usize {
    if ledger.pending_orders().is_empty() {
        return 0;
    }

    let orders = ledger.take_pending_orders();
    let mut remaining = Vec::with_capacity(orders.len());
    let mut executed = 0;

    for order in orders {
        let Some(&close) = prices.get(&order.code) else {
            remaining.push(order);
            continue;
        };
        if !evaluate_trigger(&order, close) {
            remaining.push(order);
            continue;
        }

        // Fill at the current close, not the trigger price.
        let quote = ledger.quote_execution(close, order.shares, order.side);
        match order.side {
            Side::Buy => {
                if quote.gross + quote.fee > ledger.cash() {
                    debug!(
                        order = %order.id,
                        code = %order.code,
                        "triggered buy order kept open: insufficient cash"
                    );
                    remaining.push(order);
                    continue;
                }
            }
            Side::Sell => {
                if ledger.shares_of(&order.code) < order.shares {
                    debug!(
                        order = %order.id,
                        code = %order.code,
                        "triggered sell order kept open: insufficient shares"
                    );
                    remaining.push(order);
                    continue;
                }
            }
        }

        ledger.apply_fill(date, &order.code, &order.name, order.side, order.shares, quote);
        info!(
            order = %order.id,
            code = %order.code,
            side = ?order.side,
            shares = order.shares,
            close = %close,
            "pending order filled"
        );
        executed += 1;
    }

    ledger.restore_pending_orders(remaining);
    executed
}

/// One auto-trading decision derived from portfolio P&L.
#[derive(Debug)]
struct AutoAction {
    side: Side,
    code: Symbol,
    shares: i64,
    price: Decimal,
    reason: &'static str,
}

/// Apply stop-loss and scale in/out rules to every held symbol.
///
/// Stop-loss (full liquidation) takes priority: once it triggers for a
/// symbol, no scale action is evaluated for that symbol that day. Returns
/// the number of fills.
pub fn apply_auto_rules(
    ledger: &mut Ledger,
    date: NaiveDate,
    prices: &BTreeMap<Symbol, Decimal>,
) -> usize {
    let risk = *ledger.risk();
    let stop_enabled = risk.stop_loss_pct > Decimal::ZERO;
    let scale_enabled =
        risk.scale_step_pct > Decimal::ZERO && risk.scale_fraction_pct > Decimal::ZERO;
    if !stop_enabled && !scale_enabled {
        return 0;
    }

    let mut actions = Vec::new();
    for (code, pos) in ledger.positions() {
        if pos.shares <= 0 || pos.total_cost <= Decimal::ZERO {
            continue;
        }
        let Some(&price) = prices.get(code) else {
            continue;
        };
        let value = price * Decimal::from(pos.shares);
        let pnl_pct = (value - pos.total_cost) / pos.total_cost * dec!(100);

        if stop_enabled && pnl_pct <= -risk.stop_loss_pct {
            actions.push(AutoAction {
                side: Side::Sell,
                code: code.clone(),
                shares: pos.shares,
                price,
                reason: "auto stop-loss",
            });
            continue;
        }

        if scale_enabled {
            let fraction = risk.scale_fraction_pct / dec!(100);
            let scale_shares = (Decimal::from(pos.shares) * fraction)
                .floor()
                .to_i64()
                .unwrap_or(0)
                .max(1);

            if pnl_pct >= risk.scale_step_pct && pos.shares - scale_shares > 0 {
                actions.push(AutoAction {
                    side: Side::Sell,
                    code: code.clone(),
                    shares: scale_shares,
                    price,
                    reason: "auto scale-out",
                });
            } else if pnl_pct <= -risk.scale_step_pct {
                actions.push(AutoAction {
                    side: Side::Buy,
                    code: code.clone(),
                    shares: scale_shares,
                    price,
                    reason: "auto scale-in",
                });
            }
        }
    }

    let mut executed = 0;
    for action in actions {
        let quote = ledger.quote_execution(action.price, action.shares, action.side);
        match action.side {
            Side::Buy => {
                if quote.gross + quote.fee > ledger.cash() {
                    debug!(code = %action.code, reason = action.reason, "skipped: insufficient cash");
                    continue;
                }
            }
            Side::Sell => {
                if ledger.shares_of(&action.code) < action.shares {
                    debug!(code = %action.code, reason = action.reason, "skipped: insufficient shares");
                    continue;
                }
            }
        }
        let name = action.code.as_str().to_string();
        ledger.apply_fill(date, &action.code, &name, action.side, action.shares, quote);
        info!(
            code = %action.code,
            side = ?action.side,
            shares = action.shares,
            reason = action.reason,
            "auto rule executed"
        );
        executed += 1;
    }
    executed
}

/// Run the full once-per-day evaluation: pending orders first, then auto
/// rules on the resulting portfolio.
pub fn process_day(
    ledger: &mut Ledger,
    date: NaiveDate,
    prices: &BTreeMap<Symbol, Decimal>,
) -> usize {
    process_pending_orders(ledger, date, prices) + apply_auto_rules(ledger, date, prices)
}
