//! Configuration management
//!
//! Handles loading and parsing of JSON configuration files. Every section
//! has sensible defaults, so a missing file or a partial file still yields
//! a runnable setup.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::ledger::{CostParams, RiskParams};
use crate::stress::StressConfig;
use crate::types::Symbol;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub account: AccountConfig,
    pub costs: CostConfig,
    pub risk: RiskConfig,
    pub data: DataConfig,
    pub stress: StressConfig,
}

impl Config {
    /// Load configuration from a JSON file. Missing sections fall back to
    /// their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).context("Failed to read config file")?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.account.initial_cash < Decimal::ZERO {
            anyhow::bail!(
                "initial_cash must be non-negative, got {}",
                self.account.initial_cash
            );
        }
        self.costs.to_params().context("invalid cost settings")?;
        Ok(())
    }

    pub fn cost_params(&self) -> Result<CostParams> {
        self.costs.to_params().context("invalid cost settings")
    }

    pub fn risk_params(&self) -> RiskParams {
        RiskParams {
            stop_loss_pct: self.risk.stop_loss_pct,
            scale_step_pct: self.risk.scale_step_pct,
            scale_fraction_pct: self.risk.scale_fraction_pct,
        }
    }
}

/// Account configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    pub initial_cash: Decimal,
}

impl Default for AccountConfig {
    fn default() -> Self {
        AccountConfig {
            initial_cash: dec!(100000),
        }
    }
}

/// Trading cost configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CostConfig {
    pub fee_rate: Decimal,
    pub min_fee: Decimal,
    pub slippage_per_share: Decimal,
}

impl Default for CostConfig {
    fn default() -> Self {
        CostConfig {
            fee_rate: dec!(0.0001),
            min_fee: dec!(1.0),
            slippage_per_share: Decimal::ZERO,
        }
    }
}

impl CostConfig {
    fn to_params(&self) -> Result<CostParams> {
        CostParams::new(self.fee_rate, self.min_fee, self.slippage_per_share)
            .map_err(anyhow::Error::from)
    }
}

/// Auto-trading risk configuration; zero disables a rule
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub stop_loss_pct: Decimal,
    pub scale_step_pct: Decimal,
    pub scale_fraction_pct: Decimal,
}

/// Price data configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Directory of per-symbol daily CSV files; synthetic mode when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub csv_dir: Option<String>,
    /// JSON cache for generated bars; in-memory only when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_file: Option<String>,
    /// JSON store for scripted price events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events_file: Option<String>,
    /// Tradable universe as `code` or `code:display name` entries
    pub symbols: Vec<String>,
}

impl Default for DataConfig {
    fn default() -> Self {
        DataConfig {
            csv_dir: None,
            cache_file: None,
            events_file: None,
            symbols: Vec::new(),
        }
    }
}

impl DataConfig {
    pub fn symbols(&self) -> Vec<Symbol> {
        self.symbols
            .iter()
            .map(|entry| Symbol::new(entry.split(':').next().unwrap_or(entry).trim()))
            .collect()
    }

    /// Symbol/name pairs from entries of the form `CODE:Display Name`;
    /// the code itself doubles as the name when no display name is given.
    pub fn stock_list(&self) -> Vec<(Symbol, String)> {
        self.symbols
            .iter()
            .map(|entry| {
                let mut parts = entry.splitn(2, ':');
                let code = parts.next().unwrap_or(entry).trim();
                let name = parts.next().map(str::trim).unwrap_or(code);
                (Symbol::new(code), name.to_string())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.account.initial_cash, dec!(100000));
        assert_eq!(config.costs.min_fee, dec!(1.0));
        assert!(!config.stress.enabled);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"{{"account": {{"initial_cash": "25000"}}, "risk": {{"stop_loss_pct": "10"}}}}"#
        )
        .unwrap();
        drop(file);

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.account.initial_cash, dec!(25000));
        assert_eq!(config.risk.stop_loss_pct, dec!(10));
        assert_eq!(config.costs.fee_rate, dec!(0.0001));
    }

    #[test]
    fn negative_cash_is_rejected() {
        let config = Config {
            account: AccountConfig {
                initial_cash: dec!(-1),
            },
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn symbol_entries_support_display_names() {
        let data = DataConfig {
            symbols: vec!["AAPL:Apple".to_string(), "MSFT".to_string()],
            ..DataConfig::default()
        };
        assert_eq!(
            data.symbols(),
            vec![Symbol::new("AAPL"), Symbol::new("MSFT")]
        );
        let list = data.stock_list();
        assert_eq!(list[0].1, "Apple");
        assert_eq!(list[1].1, "MSFT");
    }
}
