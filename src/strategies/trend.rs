use crate::core::events::Action;
use crate::error::SignalError;
use crate::realtime::consensus::AgentVote;
use crate::strategies::sma;
use crate::traits::{MarketState, SignalProvider};
use async_trait::async_trait;
use log::debug;

/// Votes with the trend: fast SMA above the slow SMA by more than the band is a buy,
/// below by more than the band is a sell, anything in between is a hold.
///
/// Periods and band can be overridden through `trend_fast_period`, `trend_slow_period` and
/// `trend_band` strategy parameters.
#[derive(Debug, Clone)]
pub struct TrendProvider {
    id: String,
    fast_period: usize,
    slow_period: usize,
    band: f64,
    weight: Option<f64>,
}

impl TrendProvider {
    pub fn new() -> Self {
        Self {
            id: "trend".to_string(),
            fast_period: 20,
            slow_period: 50,
            band: 0.002,
            weight: None,
        }
    }

    pub fn with_periods(mut self, fast: usize, slow: usize) -> Self {
        self.fast_period = fast;
        self.slow_period = slow;
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    fn failed(&self, reason: impl Into<String>) -> SignalError {
        SignalError::Failed {
            provider: self.id.clone(),
            reason: reason.into(),
        }
    }
}

impl Default for TrendProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SignalProvider for TrendProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn vote(&self, market: &MarketState) -> Result<AgentVote, SignalError> {
        let fast = market.param("trend_fast_period", self.fast_period as f64) as usize;
        let slow = market.param("trend_slow_period", self.slow_period as f64) as usize;
        let band = market.param("trend_band", self.band);
        if fast == 0 || fast >= slow {
            return Err(self.failed(format!("fast period {} must be below slow {}", fast, slow)));
        }
        if !(band > 0.0) {
            return Err(self.failed("band must be positive"));
        }

        let deviations: Vec<f64> = market
            .symbols()
            .filter_map(|symbol| {
                let history = market.mid_history(symbol);
                let fast_ma = sma(&history, fast)?;
                let slow_ma = sma(&history, slow)?;
                (slow_ma > 0.0).then(|| fast_ma / slow_ma - 1.0)
            })
            .collect();
        if deviations.is_empty() {
            return Err(SignalError::InsufficientData(self.id.clone()));
        }

        let deviation = deviations.iter().sum::<f64>() / deviations.len() as f64;
        let (action, confidence) = if deviation > band {
            (Action::Buy, deviation / (2.0 * band))
        } else if deviation < -band {
            (Action::Sell, -deviation / (2.0 * band))
        } else {
            (Action::Hold, 1.0 - deviation.abs() / band)
        };
        debug!("{}: deviation {:.5} -> {}", self.id, deviation, action);

        let vote = AgentVote::new(self.id.clone(), action, confidence.clamp(0.0, 1.0))
            .map_err(|e| self.failed(e.to_string()))?;
        match self.weight {
            Some(w) => vote.with_weight(w).map_err(|e| self.failed(e.to_string())),
            None => Ok(vote),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::MarketTick;
    use crate::types::{Price, Symbol};
    use chrono::Utc;
    use rust_decimal::Decimal;
    use std::collections::BTreeMap;

    fn market(prices: &[i64]) -> MarketState {
        let mut market = MarketState::new(100, BTreeMap::new());
        for &p in prices {
            let tick = MarketTick {
                symbol: Symbol::new("BTCUSDT"),
                bid: Price::new(Decimal::new(p, 0)),
                ask: Price::new(Decimal::new(p, 0)),
                last: Price::new(Decimal::new(p, 0)),
                timestamp: Utc::now(),
            };
            market.update(vec![tick], Utc::now());
        }
        market
    }

    #[tokio::test]
    async fn test_uptrend_votes_buy() {
        let prices: Vec<i64> = (0..10).map(|i| 100 + i * 10).collect();
        let provider = TrendProvider::new().with_periods(3, 6);
        let vote = provider.vote(&market(&prices)).await.unwrap();
        assert_eq!(vote.action, Action::Buy);
        assert!(vote.confidence > 0.5);
    }

    #[tokio::test]
    async fn test_downtrend_votes_sell() {
        let prices: Vec<i64> = (0..10).map(|i| 1000 - i * 10).collect();
        let provider = TrendProvider::new().with_periods(3, 6).with_weight(0.4);
        let vote = provider.vote(&market(&prices)).await.unwrap();
        assert_eq!(vote.action, Action::Sell);
        assert_eq!(vote.weight, Some(0.4));
    }

    #[tokio::test]
    async fn test_flat_market_holds() {
        let provider = TrendProvider::new().with_periods(3, 6);
        let vote = provider.vote(&market(&[100; 10])).await.unwrap();
        assert_eq!(vote.action, Action::Hold);
        assert_eq!(vote.confidence, 1.0);
    }

    #[tokio::test]
    async fn test_short_history_is_insufficient() {
        let provider = TrendProvider::new();
        let err = provider.vote(&market(&[100; 10])).await.unwrap_err();
        assert_eq!(err, SignalError::InsufficientData("trend".to_string()));
    }
}
