//! Portfolio ledger: cash, open positions, trade log, and pending orders.
//!
//! The ledger is the single owner of account state. Every mutation appends
//! exactly one `TradeRecord` and, when a store path is configured, rewrites
//! the JSON snapshot. Each backtest run constructs a fresh in-memory ledger
//! so runs can never contaminate each other.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

use crate::types::{Order, OrderStatus, OrderType, Side, Symbol, TradeRecord};

/// Errors surfaced by the guarded ledger API.
///
/// Callers that want skip-and-continue semantics (the simulator does)
/// handle these explicitly, which keeps the failure observable in tests.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("insufficient cash: need {required}, have {available}")]
    InsufficientFunds {
        required: Decimal,
        available: Decimal,
    },

    #[error("insufficient shares of {code}: requested {requested}, held {held}")]
    InsufficientShares {
        code: Symbol,
        requested: i64,
        held: i64,
    },

    #[error("shares must be positive, got {0}")]
    NonPositiveShares(i64),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Trading cost settings
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CostParams {
    /// Proportional fee on gross trade value
    pub fee_rate: Decimal,
    /// Minimum fee per trade
    pub min_fee: Decimal,
    /// Price offset per share (up on buys, down on sells)
    pub slippage_per_share: Decimal,
}

impl Default for CostParams {
    fn default() -> Self {
        CostParams {
            fee_rate: dec!(0.0001),
            min_fee: dec!(1.0),
            slippage_per_share: Decimal::ZERO,
        }
    }
}

impl CostParams {
    pub fn new(
        fee_rate: Decimal,
        min_fee: Decimal,
        slippage_per_share: Decimal,
    ) -> Result<Self, LedgerError> {
        if fee_rate < Decimal::ZERO {
            return Err(LedgerError::InvalidParameter(format!(
                "fee_rate must be non-negative, got {fee_rate}"
            )));
        }
        if min_fee < Decimal::ZERO {
            return Err(LedgerError::InvalidParameter(format!(
                "min_fee must be non-negative, got {min_fee}"
            )));
        }
        if slippage_per_share < Decimal::ZERO {
            return Err(LedgerError::InvalidParameter(format!(
                "slippage_per_share must be non-negative, got {slippage_per_share}"
            )));
        }
        Ok(CostParams {
            fee_rate,
            min_fee,
            slippage_per_share,
        })
    }
}

/// Auto-trading risk settings; a value of zero disables the rule
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RiskParams {
    /// Per-stock stop-loss line as a loss percentage (10 means sell at -10%)
    pub stop_loss_pct: Decimal,
    /// Profit/loss percentage that triggers scaling in or out
    pub scale_step_pct: Decimal,
    /// Fraction of the current position traded on a scale trigger, in percent
    pub scale_fraction_pct: Decimal,
}

/// Open position in one symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub shares: i64,
    /// Cumulative signed cost basis: grows on buys, shrinks by
    /// `shares * exec_price` on sells. Deliberately not average-cost.
    pub total_cost: Decimal,
}

/// Result of pricing an order against the current cost settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionQuote {
    pub exec_price: Decimal,
    pub gross: Decimal,
    pub fee: Decimal,
}

/// Serialized form of the full ledger state
#[derive(Debug, Serialize, Deserialize)]
struct LedgerSnapshot {
    trade_records: Vec<TradeRecord>,
    cash: Decimal,
    initial_cash: Decimal,
    portfolio: BTreeMap<Symbol, Position>,
    pending_orders: Vec<Order>,
    fee_rate: Decimal,
    min_fee: Decimal,
    slippage_per_share: Decimal,
    stop_loss_pct: Decimal,
    scale_step_pct: Decimal,
    scale_fraction_pct: Decimal,
}

#[derive(Debug)]
pub struct Ledger {
    cash: Decimal,
    initial_cash: Decimal,
    positions: BTreeMap<Symbol, Position>,
    trade_log: Vec<TradeRecord>,
    pending_orders: Vec<Order>,
    costs: CostParams,
    risk: RiskParams,
    store: Option<PathBuf>,
    next_order_id: u64,
}

impl Ledger {
    /// Create a fresh in-memory ledger. Rejects negative starting cash.
    pub fn new(initial_cash: Decimal) -> Result<Self, LedgerError> {
        if initial_cash < Decimal::ZERO {
            return Err(LedgerError::InvalidParameter(format!(
                "initial cash must be non-negative, got {initial_cash}"
            )));
        }
        Ok(Ledger {
            cash: initial_cash,
            initial_cash,
            positions: BTreeMap::new(),
            trade_log: Vec::new(),
            pending_orders: Vec::new(),
            costs: CostParams::default(),
            risk: RiskParams::default(),
            store: None,
            next_order_id: 1,
        })
    }

    /// Open a persistent ledger: loads the snapshot at `path` if one exists,
    /// otherwise starts fresh with `initial_cash`. All later mutations
    /// rewrite the snapshot.
    pub fn open(path: impl AsRef<Path>, initial_cash: Decimal) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let mut ledger = if path.exists() {
            let contents = fs::read_to_string(path)?;
            let snapshot: LedgerSnapshot = serde_json::from_str(&contents)?;
            Self::from_snapshot(snapshot)?
        } else {
            Ledger::new(initial_cash)?
        };
        ledger.store = Some(path.to_path_buf());
        Ok(ledger)
    }

    pub fn with_costs(mut self, costs: CostParams) -> Self {
        self.costs = costs;
        self
    }

    pub fn with_risk(mut self, risk: RiskParams) -> Self {
        self.risk = risk;
        self
    }

    fn from_snapshot(snapshot: LedgerSnapshot) -> Result<Self, LedgerError> {
        let costs = CostParams::new(
            snapshot.fee_rate,
            snapshot.min_fee,
            snapshot.slippage_per_share,
        )?;
        // Continue order ids after the highest persisted one.
        let next_order_id = snapshot
            .pending_orders
            .iter()
            .filter_map(|o| o.id.strip_prefix("ord-").and_then(|n| n.parse().ok()))
            .max()
            .map_or(1, |n: u64| n + 1);
        Ok(Ledger {
            cash: snapshot.cash,
            initial_cash: snapshot.initial_cash,
            positions: snapshot.portfolio,
            trade_log: snapshot.trade_records,
            pending_orders: snapshot.pending_orders,
            costs,
            risk: RiskParams {
                stop_loss_pct: snapshot.stop_loss_pct,
                scale_step_pct: snapshot.scale_step_pct,
                scale_fraction_pct: snapshot.scale_fraction_pct,
            },
            store: None,
            next_order_id,
        })
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn cash(&self) -> Decimal {
        self.cash
    }

    pub fn initial_cash(&self) -> Decimal {
        self.initial_cash
    }

    pub fn costs(&self) -> &CostParams {
        &self.costs
    }

    pub fn risk(&self) -> &RiskParams {
        &self.risk
    }

    pub fn positions(&self) -> &BTreeMap<Symbol, Position> {
        &self.positions
    }

    pub fn shares_of(&self, code: &Symbol) -> i64 {
        self.positions.get(code).map_or(0, |p| p.shares)
    }

    /// Current holdings as `{code: shares}`, the view handed to strategies.
    pub fn holdings(&self) -> BTreeMap<Symbol, i64> {
        self.positions
            .iter()
            .map(|(code, pos)| (code.clone(), pos.shares))
            .collect()
    }

    pub fn trade_log(&self) -> &[TradeRecord] {
        &self.trade_log
    }

    pub fn pending_orders(&self) -> &[Order] {
        &self.pending_orders
    }

    /// Cash plus holdings valued at the given closes. Positions with no
    /// price fall back to cost basis so missing data cannot show up as a
    /// phantom loss.
    pub fn mark_to_market(&self, prices: &BTreeMap<Symbol, Decimal>) -> Decimal {
        let mut equity = self.cash;
        for (code, pos) in &self.positions {
            match prices.get(code) {
                Some(price) => equity += *price * Decimal::from(pos.shares),
                None => equity += pos.total_cost,
            }
        }
        equity
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Price an order against the current cost settings. Pure: no state is
    /// touched, identical inputs always produce identical quotes.
    pub fn quote_execution(&self, price: Decimal, shares: i64, side: Side) -> ExecutionQuote {
        let exec_price = match side {
            Side::Buy => price + self.costs.slippage_per_share,
            Side::Sell => (price - self.costs.slippage_per_share).max(dec!(0.01)),
        };
        let gross = exec_price * Decimal::from(shares);
        let fee = if gross > Decimal::ZERO {
            self.costs.min_fee.max(gross.abs() * self.costs.fee_rate)
        } else {
            Decimal::ZERO
        };
        ExecutionQuote {
            exec_price,
            gross,
            fee,
        }
    }

    /// Buy `shares` of `code` at `price` (pre-slippage). Fails without
    /// mutating state if the quoted cost exceeds available cash.
    pub fn buy(
        &mut self,
        date: NaiveDate,
        code: &Symbol,
        name: &str,
        shares: i64,
        price: Decimal,
    ) -> Result<TradeRecord, LedgerError> {
        if shares <= 0 {
            return Err(LedgerError::NonPositiveShares(shares));
        }
        let quote = self.quote_execution(price, shares, Side::Buy);
        let required = quote.gross + quote.fee;
        if required > self.cash {
            return Err(LedgerError::InsufficientFunds {
                required,
                available: self.cash,
            });
        }
        Ok(self.apply_fill(date, code, name, Side::Buy, shares, quote))
    }

    /// Sell `shares` of `code` at `price` (pre-slippage). Fails without
    /// mutating state if the position does not cover the request.
    pub fn sell(
        &mut self,
        date: NaiveDate,
        code: &Symbol,
        name: &str,
        shares: i64,
        price: Decimal,
    ) -> Result<TradeRecord, LedgerError> {
        if shares <= 0 {
            return Err(LedgerError::NonPositiveShares(shares));
        }
        let held = self.shares_of(code);
        if shares > held {
            return Err(LedgerError::InsufficientShares {
                code: code.clone(),
                requested: shares,
                held,
            });
        }
        let quote = self.quote_execution(price, shares, Side::Sell);
        Ok(self.apply_fill(date, code, name, Side::Sell, shares, quote))
    }

    /// Unchecked fill primitive: appends the trade record, updates the
    /// position and cash, and persists. Callers must have verified
    /// affordability (buys) or inventory (sells) first.
    pub fn apply_fill(
        &mut self,
        date: NaiveDate,
        code: &Symbol,
        name: &str,
        side: Side,
        shares: i64,
        quote: ExecutionQuote,
    ) -> TradeRecord {
        let record = TradeRecord {
            date,
            stock_code: code.clone(),
            stock_name: name.to_string(),
            trade_type: side,
            shares,
            price: quote.exec_price,
            total_amount: quote.gross,
        };
        self.trade_log.push(record.clone());

        match side {
            Side::Buy => {
                let pos = self.positions.entry(code.clone()).or_insert(Position {
                    shares: 0,
                    total_cost: Decimal::ZERO,
                });
                pos.shares += shares;
                pos.total_cost += Decimal::from(shares) * quote.exec_price;
                self.cash -= quote.gross + quote.fee;
            }
            Side::Sell => {
                if let Some(pos) = self.positions.get_mut(code) {
                    pos.shares -= shares;
                    pos.total_cost -= Decimal::from(shares) * quote.exec_price;
                    if pos.shares == 0 {
                        self.positions.remove(code);
                    }
                }
                self.cash += quote.gross - quote.fee;
            }
        }

        self.persist();
        record
    }

    // ------------------------------------------------------------------
    // Pending orders
    // ------------------------------------------------------------------

    /// Register a pending order. Stop-loss and take-profit orders must be
    /// sell-side; all prices and share counts must be positive.
    pub fn place_order(
        &mut self,
        code: &Symbol,
        name: &str,
        side: Side,
        order_type: OrderType,
        price: Decimal,
        shares: i64,
        created_at: NaiveDate,
    ) -> Result<String, LedgerError> {
        if price <= Decimal::ZERO {
            return Err(LedgerError::InvalidParameter(format!(
                "trigger price must be positive, got {price}"
            )));
        }
        if shares <= 0 {
            return Err(LedgerError::NonPositiveShares(shares));
        }
        if matches!(order_type, OrderType::StopLoss | OrderType::TakeProfit)
            && side != Side::Sell
        {
            return Err(LedgerError::InvalidParameter(
                "stop-loss and take-profit orders support sell side only".to_string(),
            ));
        }
        let id = format!("ord-{}", self.next_order_id);
        self.next_order_id += 1;
        self.pending_orders.push(Order {
            id: id.clone(),
            code: code.clone(),
            name: name.to_string(),
            side,
            order_type,
            price,
            shares,
            status: OrderStatus::Open,
            created_at,
        });
        self.persist();
        Ok(id)
    }

    /// Cancel an open order by id. Returns false if no such order exists.
    pub fn cancel_order(&mut self, id: &str) -> bool {
        let before = self.pending_orders.len();
        self.pending_orders.retain(|o| o.id != id);
        let removed = self.pending_orders.len() < before;
        if removed {
            self.persist();
        }
        removed
    }

    pub(crate) fn take_pending_orders(&mut self) -> Vec<Order> {
        std::mem::take(&mut self.pending_orders)
    }

    pub(crate) fn restore_pending_orders(&mut self, orders: Vec<Order>) {
        self.pending_orders = orders;
        self.persist();
    }

    // ------------------------------------------------------------------
    // Persistence and reset
    // ------------------------------------------------------------------

    /// Wipe all state and restart with `initial_cash`. Rejects negative cash.
    pub fn reset(&mut self, initial_cash: Decimal) -> Result<(), LedgerError> {
        if initial_cash < Decimal::ZERO {
            return Err(LedgerError::InvalidParameter(format!(
                "initial cash must be non-negative, got {initial_cash}"
            )));
        }
        self.cash = initial_cash;
        self.initial_cash = initial_cash;
        self.positions.clear();
        self.trade_log.clear();
        self.pending_orders.clear();
        self.next_order_id = 1;
        self.persist();
        Ok(())
    }

    fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            trade_records: self.trade_log.clone(),
            cash: self.cash,
            initial_cash: self.initial_cash,
            portfolio: self.positions.clone(),
            pending_orders: self.pending_orders.clone(),
            fee_rate: self.costs.fee_rate,
            min_fee: self.costs.min_fee,
            slippage_per_share: self.costs.slippage_per_share,
            stop_loss_pct: self.risk.stop_loss_pct,
            scale_step_pct: self.risk.scale_step_pct,
            scale_fraction_pct: self.risk.scale_fraction_pct,
        }
    }

    /// Full snapshot rewrite after every mutation. A write failure is logged
    /// and execution continues on in-memory state.
    fn persist(&self) {
        let Some(path) = &self.store else {
            return;
        };
        if let Err(err) = self.write_snapshot(path) {
            warn!("failed to persist ledger snapshot to {}: {err:#}", path.display());
        }
    }

    fn write_snapshot(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.snapshot())?;
        fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    fn ledger() -> Ledger {
        Ledger::new(dec!(100000)).unwrap()
    }

    #[test]
    fn buy_charges_gross_plus_fee() {
        let mut l = ledger();
        let rec = l
            .buy(day(3), &Symbol::new("AAPL"), "Apple", 10, dec!(100))
            .unwrap();
        // fee = max(1.0, 1000 * 0.0001) = 1.0
        assert_eq!(rec.price, dec!(100));
        assert_eq!(rec.total_amount, dec!(1000));
        assert_eq!(l.cash(), dec!(98999));
        assert_eq!(l.shares_of(&Symbol::new("AAPL")), 10);
    }

    #[test]
    fn sell_credits_gross_minus_fee() {
        let mut l = ledger();
        let aapl = Symbol::new("AAPL");
        l.buy(day(3), &aapl, "Apple", 10, dec!(100)).unwrap();
        l.sell(day(4), &aapl, "Apple", 10, dec!(120)).unwrap();
        // buy leaves 98999; sell gross 1200, fee max(1.0, 0.12) = 1.0
        assert_eq!(l.cash(), dec!(98999) + dec!(1200) - dec!(1.0));
        assert!(l.positions().is_empty());
    }

    #[test]
    fn quote_is_pure_and_idempotent() {
        let l = ledger();
        let a = l.quote_execution(dec!(52.31), 7, Side::Buy);
        let b = l.quote_execution(dec!(52.31), 7, Side::Buy);
        assert_eq!(a, b);
    }

    #[test]
    fn buy_slippage_raises_and_sell_slippage_floors() {
        let l = Ledger::new(dec!(1000))
            .unwrap()
            .with_costs(CostParams::new(dec!(0.0001), dec!(1.0), dec!(0.05)).unwrap());
        let buy = l.quote_execution(dec!(10.00), 1, Side::Buy);
        assert_eq!(buy.exec_price, dec!(10.05));
        let sell = l.quote_execution(dec!(0.03), 1, Side::Sell);
        assert_eq!(sell.exec_price, dec!(0.01));
    }

    #[test]
    fn insufficient_funds_rejected_without_mutation() {
        let mut l = Ledger::new(dec!(500)).unwrap();
        let err = l
            .buy(day(3), &Symbol::new("AAPL"), "Apple", 10, dec!(100))
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
        assert_eq!(l.cash(), dec!(500));
        assert!(l.trade_log().is_empty());
    }

    #[test]
    fn oversized_sell_rejected() {
        let mut l = ledger();
        let aapl = Symbol::new("AAPL");
        l.buy(day(3), &aapl, "Apple", 5, dec!(100)).unwrap();
        let err = l.sell(day(4), &aapl, "Apple", 8, dec!(110)).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientShares { held: 5, requested: 8, .. }
        ));
        assert_eq!(l.shares_of(&aapl), 5);
    }

    #[test]
    fn partial_sell_keeps_arithmetic_cost_basis() {
        let mut l = ledger();
        let aapl = Symbol::new("AAPL");
        l.buy(day(3), &aapl, "Apple", 10, dec!(100)).unwrap();
        l.sell(day(4), &aapl, "Apple", 4, dec!(110)).unwrap();
        let pos = &l.positions()[&aapl];
        assert_eq!(pos.shares, 6);
        // 1000 - 4 * 110: sells reduce the basis by exec price, not average cost
        assert_eq!(pos.total_cost, dec!(560));
    }

    #[test]
    fn replaying_trade_log_reproduces_cash_exactly() {
        let mut l = ledger();
        let aapl = Symbol::new("AAPL");
        let msft = Symbol::new("MSFT");
        l.buy(day(3), &aapl, "Apple", 10, dec!(187.33)).unwrap();
        l.buy(day(4), &msft, "Microsoft", 3, dec!(411.07)).unwrap();
        l.sell(day(5), &aapl, "Apple", 6, dec!(190.02)).unwrap();
        l.sell(day(6), &aapl, "Apple", 4, dec!(185.55)).unwrap();

        let mut cash = l.initial_cash();
        let replay = Ledger::new(l.initial_cash()).unwrap();
        for rec in l.trade_log() {
            let quote = replay.quote_execution(rec.price, rec.shares, rec.trade_type);
            // record price already includes slippage; with zero slippage
            // configured the quote matches the record bit-for-bit
            assert_eq!(quote.gross, rec.total_amount);
            match rec.trade_type {
                Side::Buy => cash -= quote.gross + quote.fee,
                Side::Sell => cash += quote.gross - quote.fee,
            }
        }
        assert_eq!(cash, l.cash());
    }

    #[test]
    fn stop_style_orders_are_sell_only() {
        let mut l = ledger();
        let err = l
            .place_order(
                &Symbol::new("AAPL"),
                "Apple",
                Side::Buy,
                OrderType::StopLoss,
                dec!(90),
                5,
                day(3),
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidParameter(_)));
    }

    #[test]
    fn cancel_removes_open_order() {
        let mut l = ledger();
        let id = l
            .place_order(
                &Symbol::new("AAPL"),
                "Apple",
                Side::Sell,
                OrderType::TakeProfit,
                dec!(150),
                5,
                day(3),
            )
            .unwrap();
        assert_eq!(l.pending_orders().len(), 1);
        assert!(l.cancel_order(&id));
        assert!(l.pending_orders().is_empty());
        assert!(!l.cancel_order(&id));
    }

    #[test]
    fn negative_initial_cash_rejected() {
        assert!(Ledger::new(dec!(-1)).is_err());
        let mut l = ledger();
        assert!(l.reset(dec!(-5)).is_err());
    }

    #[test]
    fn mark_to_market_falls_back_to_cost_basis() {
        let mut l = ledger();
        let aapl = Symbol::new("AAPL");
        l.buy(day(3), &aapl, "Apple", 10, dec!(100)).unwrap();
        let prices = BTreeMap::new();
        // no price for AAPL: valued at cost (1000), cash is 98999
        assert_eq!(l.mark_to_market(&prices), dec!(99999));
        let mut prices = BTreeMap::new();
        prices.insert(aapl, dec!(120));
        assert_eq!(l.mark_to_market(&prices), dec!(98999) + dec!(1200));
    }

    #[test]
    fn snapshot_roundtrips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trade_data.json");
        {
            let mut l = Ledger::open(&path, dec!(50000)).unwrap();
            l.buy(day(3), &Symbol::new("NVDA"), "NVIDIA", 2, dec!(800))
                .unwrap();
            l.place_order(
                &Symbol::new("NVDA"),
                "NVIDIA",
                Side::Sell,
                OrderType::StopLoss,
                dec!(700),
                2,
                day(3),
            )
            .unwrap();
        }
        let restored = Ledger::open(&path, dec!(99)).unwrap();
        assert_eq!(restored.initial_cash(), dec!(50000));
        assert_eq!(restored.shares_of(&Symbol::new("NVDA")), 2);
        assert_eq!(restored.trade_log().len(), 1);
        assert_eq!(restored.pending_orders().len(), 1);
        assert_eq!(restored.pending_orders()[0].order_type, OrderType::StopLoss);
    }
}
