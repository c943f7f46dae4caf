#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use mockall::mock;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use swarm_control::core::events::{Action, Fill, MarketTick, NewOrder, OrderConfirmation};
use swarm_control::realtime::{ControlLoop, PerformanceSnapshot, RetryConfig, Session};
use swarm_control::{
    AgentVote, ControlConfig, ControlPhase, ControlState, GatewayError, MarketState,
    OrderGateway, Price, SignalError, SignalProvider, Symbol,
};
use tokio::sync::RwLock;

mock! {
    pub Gateway {}

    #[async_trait]
    impl OrderGateway for Gateway {
        async fn cancel_all(&self, symbols: &[Symbol]) -> Result<usize, GatewayError>;
        async fn place_orders(
            &self,
            orders: Vec<NewOrder>,
        ) -> Result<Vec<OrderConfirmation>, GatewayError>;
        async fn get_balances(&self) -> Result<HashMap<String, Decimal>, GatewayError>;
        async fn fetch_market(&self, symbols: &[Symbol]) -> Result<Vec<MarketTick>, GatewayError>;
        async fn drain_fills(&self) -> Result<Vec<Fill>, GatewayError>;
    }
}

/// Provider that always casts the same vote
pub struct StubProvider {
    pub id: String,
    pub action: Action,
    pub confidence: f64,
    pub weight: Option<f64>,
    pub optional: bool,
}

impl StubProvider {
    pub fn new(id: &str, action: Action, confidence: f64) -> Self {
        Self {
            id: id.to_string(),
            action,
            confidence,
            weight: None,
            optional: true,
        }
    }

    pub fn weighted(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn required(mut self) -> Self {
        self.optional = false;
        self
    }
}

#[async_trait]
impl SignalProvider for StubProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn optional(&self) -> bool {
        self.optional
    }

    async fn vote(&self, _market: &MarketState) -> Result<AgentVote, SignalError> {
        Ok(AgentVote {
            agent_id: self.id.clone(),
            action: self.action,
            confidence: self.confidence,
            weight: self.weight,
        })
    }
}

/// Provider that always errors
pub struct FailingProvider(pub String);

#[async_trait]
impl SignalProvider for FailingProvider {
    fn id(&self) -> &str {
        &self.0
    }

    async fn vote(&self, _market: &MarketState) -> Result<AgentVote, SignalError> {
        Err(SignalError::Failed {
            provider: self.0.clone(),
            reason: "model unavailable".to_string(),
        })
    }
}

/// Provider that answers only after `delay`
pub struct SlowProvider {
    pub id: String,
    pub delay: Duration,
    pub action: Action,
}

#[async_trait]
impl SignalProvider for SlowProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn vote(&self, _market: &MarketState) -> Result<AgentVote, SignalError> {
        tokio::time::sleep(self.delay).await;
        AgentVote::new(self.id.clone(), self.action, 1.0).map_err(|e| SignalError::Failed {
            provider: self.id.clone(),
            reason: e.to_string(),
        })
    }
}

pub fn price(s: &str) -> Price {
    Price::from_str(s).unwrap()
}

pub fn tick(symbol: &str, bid: &str, ask: &str) -> MarketTick {
    MarketTick {
        symbol: Symbol::new(symbol),
        bid: price(bid),
        ask: price(ask),
        last: Price::mid(price(bid), price(ask)),
        timestamp: Utc::now(),
    }
}

pub fn test_config() -> ControlConfig {
    ControlConfig {
        symbols: vec![Symbol::new("BTCUSDT")],
        cycle_interval_ms: 10,
        consensus_threshold: 0.65,
        max_capital: Decimal::new(1000, 0),
        initial_balance: Decimal::new(1000, 0),
        order_fraction: 0.1,
        provider_timeout_ms: 50,
        gateway_timeout_ms: 50,
        ..ControlConfig::default()
    }
}

pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 2,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
        multiplier: 2.0,
    }
}

pub struct Harness {
    pub control_loop: ControlLoop,
    pub state: Arc<RwLock<ControlState>>,
    pub performance: Arc<RwLock<PerformanceSnapshot>>,
}

/// A loop wired to shared state the way the controller wires it, already `Running`
pub fn harness(
    config: ControlConfig,
    gateway: Arc<dyn OrderGateway>,
    providers: Vec<Arc<dyn SignalProvider>>,
) -> Harness {
    let session = Session::new(&config);
    let mut initial = ControlState::new(config.clone());
    initial.phase = ControlPhase::Running;
    let state = Arc::new(RwLock::new(initial));
    let performance = Arc::new(RwLock::new(session.tracker.compute_snapshot()));
    let control_loop = ControlLoop::new(
        config,
        gateway,
        providers,
        session,
        state.clone(),
        performance.clone(),
    )
    .unwrap()
    .with_retry(fast_retry());
    Harness {
        control_loop,
        state,
        performance,
    }
}
