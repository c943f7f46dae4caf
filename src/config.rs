use crate::error::ConfigError;
use crate::types::Symbol;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

const SECONDS_PER_YEAR: f64 = 365.25 * 24.0 * 3600.0;

/// Risk limits applied to every consensus decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskLimits {
    /// Maximum tolerated drawdown from the running peak, as a fraction
    pub max_drawdown: f64,
    /// Largest fraction of capital a single decision may commit
    pub max_capital_fraction: f64,
    /// Largest realized loss tolerated per UTC day, in quote currency
    pub daily_loss_limit: Decimal,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_drawdown: 0.15,
            max_capital_fraction: 0.3,
            daily_loss_limit: Decimal::new(500, 0),
        }
    }
}

/// Control loop configuration passed to `start`.
///
/// Durations are milliseconds so the JSON form stays flat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Symbols traded by every cycle
    pub symbols: Vec<Symbol>,
    /// Order refresh interval
    pub cycle_interval_ms: u64,
    /// Minimum weighted agreement required to act
    pub consensus_threshold: f64,
    /// Upper bound on capital the loop will ever size against
    pub max_capital: Decimal,
    /// Balance the performance statistics start from
    pub initial_balance: Decimal,
    /// Asset the balance is denominated in
    pub quote_asset: String,
    /// Fraction of capital requested per decision before risk clamping
    pub order_fraction: f64,
    /// Feature toggles for optional providers; providers absent here are enabled
    pub provider_toggles: BTreeMap<String, bool>,
    /// Opaque parameters handed through to signal providers (base spread, targets, ...)
    pub strategy_params: BTreeMap<String, f64>,
    /// Ceiling for a single provider vote
    pub provider_timeout_ms: u64,
    /// Ceiling for a single gateway call
    pub gateway_timeout_ms: u64,
    /// Number of recent consensus decisions kept for audit
    pub decision_history: usize,
    /// Annualization override; derived from the cycle interval when absent
    pub periods_per_year: Option<f64>,
    /// Largest gateway/ledger balance difference accepted silently
    pub reconciliation_tolerance: Decimal,
    pub risk: RiskLimits,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            symbols: vec![Symbol::new("BTCUSDT")],
            cycle_interval_ms: 30_000,
            consensus_threshold: 0.75,
            max_capital: Decimal::new(10_000, 0),
            initial_balance: Decimal::new(10_000, 0),
            quote_asset: "USDT".to_string(),
            order_fraction: 0.1,
            provider_toggles: BTreeMap::new(),
            strategy_params: BTreeMap::new(),
            provider_timeout_ms: 5_000,
            gateway_timeout_ms: 10_000,
            decision_history: 10,
            periods_per_year: None,
            reconciliation_tolerance: Decimal::ONE,
            risk: RiskLimits::default(),
        }
    }
}

impl ControlConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: ControlConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.as_ref().display(), e)))?;
        Self::from_json_str(&raw)
    }

    /// Checks run by `start` before leaving `Stopped`
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symbols.is_empty() {
            return Err(ConfigError::EmptySymbols);
        }
        if let Some(idx) = self.symbols.iter().position(|s| s.is_empty()) {
            return Err(ConfigError::BlankSymbol(idx));
        }
        if !(self.consensus_threshold > 0.0 && self.consensus_threshold <= 1.0) {
            return Err(ConfigError::InvalidThreshold(self.consensus_threshold));
        }
        if self.cycle_interval_ms == 0 {
            return Err(ConfigError::NonPositiveInterval);
        }
        if self.max_capital <= Decimal::ZERO {
            return Err(ConfigError::NonPositive {
                field: "max_capital",
            });
        }
        if self.initial_balance <= Decimal::ZERO {
            return Err(ConfigError::NonPositive {
                field: "initial_balance",
            });
        }
        if self.provider_timeout_ms == 0 {
            return Err(ConfigError::NonPositive {
                field: "provider_timeout_ms",
            });
        }
        if self.gateway_timeout_ms == 0 {
            return Err(ConfigError::NonPositive {
                field: "gateway_timeout_ms",
            });
        }
        if self.decision_history == 0 {
            return Err(ConfigError::NonPositive {
                field: "decision_history",
            });
        }
        if let Some(ppy) = self.periods_per_year {
            if !(ppy.is_finite() && ppy > 0.0) {
                return Err(ConfigError::NonPositive {
                    field: "periods_per_year",
                });
            }
        }
        if self.risk.daily_loss_limit < Decimal::ZERO {
            return Err(ConfigError::NonPositive {
                field: "risk.daily_loss_limit",
            });
        }
        check_fraction("order_fraction", self.order_fraction)?;
        check_fraction("risk.max_drawdown", self.risk.max_drawdown)?;
        check_fraction("risk.max_capital_fraction", self.risk.max_capital_fraction)?;
        Ok(())
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_millis(self.cycle_interval_ms)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_millis(self.gateway_timeout_ms)
    }

    /// Number of cycles per year used to annualize Sharpe and APY
    pub fn periods_per_year(&self) -> f64 {
        match self.periods_per_year {
            Some(ppy) => ppy,
            None => {
                let secs = self.cycle_interval().as_secs_f64();
                if secs > 0.0 {
                    SECONDS_PER_YEAR / secs
                } else {
                    0.0
                }
            }
        }
    }

    pub fn provider_enabled(&self, provider_id: &str) -> bool {
        self.provider_toggles
            .get(provider_id)
            .copied()
            .unwrap_or(true)
    }
}

fn check_fraction(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::FractionOutOfRange { field, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ControlConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cycle_interval(), Duration::from_secs(30));
        assert_eq!(config.decision_history, 10);
    }

    #[test]
    fn test_validation_failures() {
        let mut config = ControlConfig::default();
        config.symbols.clear();
        assert_eq!(config.validate(), Err(ConfigError::EmptySymbols));

        let mut config = ControlConfig::default();
        config.consensus_threshold = 0.0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidThreshold(0.0)));

        let mut config = ControlConfig::default();
        config.consensus_threshold = 1.01;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidThreshold(_))
        ));

        let mut config = ControlConfig::default();
        config.cycle_interval_ms = 0;
        assert_eq!(config.validate(), Err(ConfigError::NonPositiveInterval));

        let mut config = ControlConfig::default();
        config.symbols = vec![Symbol::new("BTCUSDT"), Symbol::new("  ")];
        assert_eq!(config.validate(), Err(ConfigError::BlankSymbol(1)));

        let mut config = ControlConfig::default();
        config.risk.max_capital_fraction = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::FractionOutOfRange { .. })
        ));
    }

    #[test]
    fn test_threshold_of_one_is_valid() {
        let mut config = ControlConfig::default();
        config.consensus_threshold = 1.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_uses_defaults_for_missing_fields() {
        let json = r#"{
            "symbols": ["SOLUSDT", "ETHUSDT"],
            "consensus_threshold": 0.65,
            "initial_balance": "1000",
            "provider_toggles": {"sentiment": false},
            "strategy_params": {"base_spread_pct": 0.0015},
            "risk": {"max_drawdown": 0.2}
        }"#;
        let config = ControlConfig::from_json_str(json).unwrap();
        assert_eq!(config.symbols.len(), 2);
        assert_eq!(config.consensus_threshold, 0.65);
        assert_eq!(config.initial_balance, Decimal::new(1000, 0));
        assert_eq!(config.cycle_interval_ms, 30_000);
        assert_eq!(config.risk.max_drawdown, 0.2);
        assert_eq!(config.risk.max_capital_fraction, 0.3);
        assert!(!config.provider_enabled("sentiment"));
        assert!(config.provider_enabled("trend"));
        assert_eq!(config.strategy_params.get("base_spread_pct"), Some(&0.0015));
    }

    #[test]
    fn test_from_json_rejects_invalid() {
        let err = ControlConfig::from_json_str(r#"{"symbols": []}"#).unwrap_err();
        assert_eq!(err, ConfigError::EmptySymbols);
        let err = ControlConfig::from_json_str("not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_periods_per_year() {
        let mut config = ControlConfig::default();
        config.cycle_interval_ms = 86_400_000;
        assert!((config.periods_per_year() - 365.25).abs() < 1e-9);
        config.periods_per_year = Some(252.0);
        assert_eq!(config.periods_per_year(), 252.0);
    }
}
