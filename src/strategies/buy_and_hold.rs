//! Equal-weight buy-and-hold baseline.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

use super::{Action, MarketContext, Strategy, TradeSignal};
use crate::types::Symbol;

/// Splits starting cash equally across the universe on the first day it
/// sees prices, then never trades again.
pub struct BuyAndHold {
    invested: bool,
}

impl BuyAndHold {
    pub fn new() -> Self {
        BuyAndHold { invested: false }
    }
}

impl Default for BuyAndHold {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for BuyAndHold {
    fn name(&self) -> &str {
        "buy_and_hold"
    }

    fn next(
        &mut self,
        ctx: &MarketContext<'_>,
        _holdings: &BTreeMap<Symbol, i64>,
    ) -> anyhow::Result<Vec<TradeSignal>> {
        if self.invested {
            return Ok(Vec::new());
        }

        let priced: Vec<&Symbol> = ctx
            .available_symbols
            .iter()
            .filter(|code| ctx.prices.contains_key(*code))
            .collect();
        if priced.is_empty() {
            return Ok(Vec::new());
        }

        let per_symbol = ctx.cash / Decimal::from(priced.len() as u64);
        let mut signals = Vec::new();
        for code in priced {
            let price = ctx.prices[code];
            if price <= Decimal::ZERO {
                continue;
            }
            let shares = (per_symbol / price).floor();
            if shares >= Decimal::ONE {
                signals.push(TradeSignal {
                    action: Action::Buy,
                    code: code.clone(),
                    shares: shares.to_i64().unwrap_or(0),
                });
            }
        }

        self.invested = true;
        Ok(signals)
    }
}
