use crate::core::events::MarketTick;
use crate::types::{Price, Symbol};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use std::collections::{BTreeMap, VecDeque};

/// Default number of mid prices kept per symbol
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Market view handed to signal providers each cycle
#[derive(Debug, Clone)]
pub struct MarketState {
    ticks: BTreeMap<Symbol, MarketTick>,
    history: BTreeMap<Symbol, VecDeque<Price>>,
    capacity: usize,
    /// Opaque parameters from the start configuration
    pub strategy_params: BTreeMap<String, f64>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl MarketState {
    pub fn new(capacity: usize, strategy_params: BTreeMap<String, f64>) -> Self {
        Self {
            ticks: BTreeMap::new(),
            history: BTreeMap::new(),
            capacity: capacity.max(1),
            strategy_params,
            updated_at: None,
        }
    }

    /// Fold a batch of ticks in. Crossed or non-positive quotes are dropped; returns how
    /// many were accepted.
    pub fn update(&mut self, ticks: Vec<MarketTick>, at: DateTime<Utc>) -> usize {
        let mut accepted = 0;
        for tick in ticks {
            if !tick.is_sane() {
                continue;
            }
            let history = self.history.entry(tick.symbol.clone()).or_default();
            if history.len() >= self.capacity {
                history.pop_front();
            }
            history.push_back(tick.mid());
            self.ticks.insert(tick.symbol.clone(), tick);
            accepted += 1;
        }
        self.updated_at = Some(at);
        accepted
    }

    pub fn tick(&self, symbol: &Symbol) -> Option<&MarketTick> {
        self.ticks.get(symbol)
    }

    pub fn ticks(&self) -> impl Iterator<Item = &MarketTick> {
        self.ticks.values()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.ticks.keys()
    }

    /// Mid prices oldest first, as floats for indicator math
    pub fn mid_history(&self, symbol: &Symbol) -> Vec<f64> {
        self.history
            .get(symbol)
            .map(|h| h.iter().filter_map(|p| p.value().to_f64()).collect())
            .unwrap_or_default()
    }

    pub fn history_len(&self, symbol: &Symbol) -> usize {
        self.history.get(symbol).map_or(0, |h| h.len())
    }

    /// Strategy parameter with a fallback
    pub fn param(&self, name: &str, default: f64) -> f64 {
        self.strategy_params.get(name).copied().unwrap_or(default)
    }
}

impl Default for MarketState {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY, BTreeMap::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(bid: &str, ask: &str) -> MarketTick {
        MarketTick {
            symbol: Symbol::new("ETHUSDT"),
            bid: Price::from_str(bid).unwrap(),
            ask: Price::from_str(ask).unwrap(),
            last: Price::from_str(bid).unwrap(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_history_is_bounded() {
        let mut market = MarketState::new(3, BTreeMap::new());
        for i in 0..5 {
            let bid = format!("{}", 100 + i);
            let ask = format!("{}", 102 + i);
            market.update(vec![tick(&bid, &ask)], Utc::now());
        }
        let symbol = Symbol::new("ETHUSDT");
        assert_eq!(market.mid_history(&symbol), vec![103.0, 104.0, 105.0]);
        assert_eq!(market.tick(&symbol).unwrap().bid, Price::from_str("104").unwrap());
    }

    #[test]
    fn test_crossed_quotes_are_dropped() {
        let mut market = MarketState::default();
        assert_eq!(market.update(vec![tick("101", "100")], Utc::now()), 0);
        assert_eq!(market.history_len(&Symbol::new("ETHUSDT")), 0);
    }

    #[test]
    fn test_param_fallback() {
        let mut params = BTreeMap::new();
        params.insert("band".to_string(), 0.5);
        let market = MarketState::new(10, params);
        assert_eq!(market.param("band", 0.1), 0.5);
        assert_eq!(market.param("missing", 0.1), 0.1);
    }
}
