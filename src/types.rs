//! Core data types shared across the simulator

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Stock symbol using `Arc<str>` for cheap cloning.
///
/// Symbols are cloned on every trade record, order, and position entry,
/// so sharing the backing string keeps those clones allocation-free.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(Arc<str>);

impl Symbol {
    pub fn new(code: impl AsRef<str>) -> Self {
        Symbol(Arc::from(code.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(code: &str) -> Self {
        Symbol::new(code)
    }
}

impl Serialize for Symbol {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Symbol {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = String::deserialize(deserializer)?;
        Ok(Symbol::new(code))
    }
}

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

/// Validation errors for daily bars
#[derive(Debug, Error)]
pub enum BarValidationError {
    #[error("prices must be positive: open={open}, high={high}, low={low}, close={close}")]
    NonPositivePrice {
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
    },

    #[error("high ({high}) must be >= low ({low})")]
    HighBelowLow { high: Decimal, low: Decimal },

    #[error("open ({open}) must lie within [{low}, {high}]")]
    OpenOutOfRange {
        open: Decimal,
        low: Decimal,
        high: Decimal,
    },

    #[error("close ({close}) must lie within [{low}, {high}]")]
    CloseOutOfRange {
        close: Decimal,
        low: Decimal,
        high: Decimal,
    },
}

/// Daily OHLCV bar, synthetic or loaded from a real data file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: u64,
}

impl PriceBar {
    pub fn validate(&self) -> Result<(), BarValidationError> {
        if self.open <= Decimal::ZERO
            || self.high <= Decimal::ZERO
            || self.low <= Decimal::ZERO
            || self.close <= Decimal::ZERO
        {
            return Err(BarValidationError::NonPositivePrice {
                open: self.open,
                high: self.high,
                low: self.low,
                close: self.close,
            });
        }
        if self.high < self.low {
            return Err(BarValidationError::HighBelowLow {
                high: self.high,
                low: self.low,
            });
        }
        if self.open < self.low || self.open > self.high {
            return Err(BarValidationError::OpenOutOfRange {
                open: self.open,
                low: self.low,
                high: self.high,
            });
        }
        if self.close < self.low || self.close > self.high {
            return Err(BarValidationError::CloseOutOfRange {
                close: self.close,
                low: self.low,
                high: self.high,
            });
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

/// Immutable record of a single fill, created by the Ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub date: NaiveDate,
    pub stock_code: Symbol,
    pub stock_name: String,
    pub trade_type: Side,
    pub shares: i64,
    /// Execution price after slippage
    pub price: Decimal,
    /// Gross amount (price * shares), excludes fee
    pub total_amount: Decimal,
}

/// Pending order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Limit,
    StopLoss,
    TakeProfit,
}

/// Pending order lifecycle state.
///
/// `Open -> Filled` and `Open -> Cancelled` are the only transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Open,
    Filled,
    Cancelled,
}

/// Pending limit / stop-loss / take-profit order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub code: Symbol,
    pub name: String,
    pub side: Side,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    /// Trigger price
    pub price: Decimal,
    pub shares: i64,
    pub status: OrderStatus,
    pub created_at: NaiveDate,
}

/// Return and risk metrics derived from one backtest run
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub total_return: f64,
    pub cagr: f64,
    pub sharpe: f64,
    pub max_drawdown: f64,
    pub win_rate: f64,
    pub profit_factor: f64,
}

/// A point on the equity curve: (date, mark-to-market equity)
pub type EquityPoint = (NaiveDate, Decimal);

/// Outcome of a single backtest run; immutable once produced
#[derive(Debug, Clone, Serialize)]
pub struct StrategyResult {
    pub strategy_name: String,
    pub equity_curve: Vec<EquityPoint>,
    pub trades: Vec<TradeRecord>,
    pub performance: PerformanceStats,
}
