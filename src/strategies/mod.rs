//! Strategy trait and registry.
//!
//! Strategies receive a read-only view of the market for one trading day
//! and emit trade signals; the simulator owns execution, cash checks, and
//! position clamping. The registry maps strategy names to factories so
//! each tournament run gets a fresh instance with no carried-over state.

mod buy_and_hold;
mod momentum;
mod moving_average;

pub use buy_and_hold::BuyAndHold;
pub use momentum::Momentum;
pub use moving_average::MovingAverageCross;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

use crate::types::{PriceBar, Symbol};

/// What a signal asks the simulator to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

/// One instruction emitted by a strategy for a single day
#[derive(Debug, Clone)]
pub struct TradeSignal {
    pub action: Action,
    pub code: Symbol,
    pub shares: i64,
}

/// Read-only market view handed to a strategy each trading day
pub struct MarketContext<'a> {
    pub date: NaiveDate,
    /// Current close per symbol
    pub prices: &'a BTreeMap<Symbol, Decimal>,
    /// History window per symbol, oldest bar first, ending at `date`
    pub history: &'a BTreeMap<Symbol, Vec<PriceBar>>,
    pub available_symbols: &'a [Symbol],
    pub cash: Decimal,
}

/// A trading strategy driven one day at a time.
///
/// Implementations may keep internal state between days but must not
/// assume anything about execution: a Buy can be skipped for lack of
/// cash and a Sell clamped to the actual position.
pub trait Strategy: Send {
    fn name(&self) -> &str;

    fn next(
        &mut self,
        ctx: &MarketContext<'_>,
        holdings: &BTreeMap<Symbol, i64>,
    ) -> anyhow::Result<Vec<TradeSignal>>;
}

type StrategyFactory = Box<dyn Fn() -> Box<dyn Strategy> + Send + Sync>;

/// Named strategy factories; iteration order is registration order.
pub struct StrategyRegistry {
    entries: Vec<(String, StrategyFactory)>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        StrategyRegistry {
            entries: Vec::new(),
        }
    }

    /// Registry pre-loaded with the built-in strategies
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("buy_and_hold", || Box::new(BuyAndHold::new()));
        registry.register("ma_cross", || Box::new(MovingAverageCross::new()));
        registry.register("momentum", || Box::new(Momentum::new()));
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Strategy> + Send + Sync + 'static,
    {
        self.entries.push((name.into(), Box::new(factory)));
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    /// Fresh instance by name
    pub fn create(&self, name: &str) -> Option<Box<dyn Strategy>> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, factory)| factory())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
