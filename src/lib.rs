//! Quant Arena
//!
//! A deterministic stock backtesting and portfolio-accounting engine:
//! a cash/position ledger with fees and slippage, pending-order and
//! auto-trading rules, seeded synthetic price generation, a day-by-day
//! simulation loop, and a parallel strategy tournament with performance
//! ranking.

pub mod config;
pub mod data;
pub mod ledger;
pub mod orders;
pub mod performance;
pub mod simulator;
pub mod strategies;
pub mod stress;
pub mod tournament;
pub mod types;

pub use config::Config;
pub use types::*;
