use crate::core::events::Action;
use crate::error::SignalError;
use crate::realtime::consensus::AgentVote;
use crate::strategies::mean_std;
use crate::traits::{MarketState, SignalProvider};
use async_trait::async_trait;
use log::debug;

/// Bollinger-band reversion: a mid price below the lower band is a buy, above the upper band
/// a sell. Overridable through `mr_period` and `mr_std_devs`.
#[derive(Debug, Clone)]
pub struct MeanReversionProvider {
    id: String,
    period: usize,
    std_devs: f64,
    weight: Option<f64>,
}

impl MeanReversionProvider {
    pub fn new() -> Self {
        Self {
            id: "mean_reversion".to_string(),
            period: 20,
            std_devs: 2.0,
            weight: None,
        }
    }

    pub fn with_period(mut self, period: usize) -> Self {
        self.period = period;
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

impl Default for MeanReversionProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SignalProvider for MeanReversionProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn vote(&self, market: &MarketState) -> Result<AgentVote, SignalError> {
        let period = market.param("mr_period", self.period as f64) as usize;
        let k = market.param("mr_std_devs", self.std_devs);
        if period < 2 || !(k > 0.0) {
            return Err(self.failed("period must be at least 2 and band width positive"));
        }

        let scores: Vec<f64> = market
            .symbols()
            .filter_map(|symbol| {
                let history = market.mid_history(symbol);
                let (mean, std) = mean_std(&history, period)?;
                let last = *history.last()?;
                Some(if std > 0.0 { (last - mean) / std } else { 0.0 })
            })
            .collect();
        if scores.is_empty() {
            return Err(SignalError::InsufficientData(self.id.clone()));
        }

        let z = scores.iter().sum::<f64>() / scores.len() as f64;
        let (action, confidence) = if z <= -k {
            (Action::Buy, -z / (2.0 * k))
        } else if z >= k {
            (Action::Sell, z / (2.0 * k))
        } else {
            (Action::Hold, 1.0 - z.abs() / k)
        };
        debug!("{}: z-score {:.3} -> {}", self.id, z, action);

        let vote = AgentVote::new(self.id.clone(), action, confidence.clamp(0.0, 1.0))
            .map_err(|e| self.failed(e.to_string()))?;
        match self.weight {
            Some(w) => vote.with_weight(w).map_err(|e| self.failed(e.to_string())),
            None => Ok(vote),
        }
    }
}
