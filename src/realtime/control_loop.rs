use crate::config::ControlConfig;
use crate::core::events::{Fill, NewOrder, OrderSide};
use crate::error::{ControlError, ControlResult, GatewayError};
use crate::ledger::PositionBook;
use crate::realtime::consensus::{
    AgentVote, ConsensusEngine, ConsensusOutcome, DecisionHistory, DecisionRecord,
};
use crate::realtime::error_recovery::{retry_with_backoff, RetryConfig};
use crate::realtime::performance_tracker::{PerformanceSnapshot, PerformanceTracker};
use crate::realtime::risk_manager::{RiskManager, RiskVerdict};
use crate::state::{ControlPhase, ControlState};
use crate::traits::{MarketState, OrderGateway, SignalProvider};
use crate::types::{Price, Size};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use log::{debug, error, info, warn};
use rust_decimal::prelude::*;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::time::{interval, MissedTickBehavior};

/// Decimal places used when sizing order quantities
const QUANTITY_DP: u32 = 8;

/// Instruction from the control surface to the running loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopSignal {
    Run,
    /// Finish the current cycle, cancel open orders, exit
    Stop,
    /// Abandon the in-flight cycle and exit immediately
    Emergency,
}

/// Mutable trading context owned by whichever loop is running.
///
/// Handed to the loop on start and handed back when it exits, so ledger and positions survive
/// restarts and can be persisted.
#[derive(Debug, Clone)]
pub struct Session {
    pub tracker: PerformanceTracker,
    pub positions: PositionBook,
    pub decisions: DecisionHistory,
}

impl Session {
    pub fn new(config: &ControlConfig) -> Self {
        Self {
            tracker: PerformanceTracker::new(config.initial_balance, config.periods_per_year()),
            positions: PositionBook::new(),
            decisions: DecisionHistory::new(config.decision_history),
        }
    }

    /// Adapt a kept session to a new start configuration
    pub fn reconfigure(&mut self, config: &ControlConfig) {
        if self.tracker.is_pristine() {
            self.tracker =
                PerformanceTracker::new(config.initial_balance, config.periods_per_year());
        } else {
            self.tracker.set_periods_per_year(config.periods_per_year());
        }
        if self.decisions.capacity() != config.decision_history {
            let mut resized = DecisionHistory::new(config.decision_history);
            for record in self.decisions.iter() {
                resized.push(record.clone());
            }
            self.decisions = resized;
        }
    }
}

/// What one cycle did
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub iteration: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub cancelled: usize,
    pub votes: usize,
    pub outcome: Option<ConsensusOutcome>,
    pub verdict: Option<RiskVerdict>,
    pub orders_placed: usize,
    pub trades_recorded: usize,
    pub balance_drift: Option<Decimal>,
    pub error: Option<String>,
}

/// Drives trading cycles: cancel, drain fills, read the market, vote, decide, size, place,
/// record, mark open positions, reconcile. Every cycle that reads the market reconciles,
/// whether or not it traded.
pub struct ControlLoop {
    config: ControlConfig,
    gateway: Arc<dyn OrderGateway>,
    providers: Vec<Arc<dyn SignalProvider>>,
    engine: ConsensusEngine,
    risk: RiskManager,
    market: MarketState,
    session: Session,
    /// State shared with status readers
    shared: Arc<RwLock<ControlState>>,
    /// Latest snapshot shared with performance readers
    performance: Arc<RwLock<PerformanceSnapshot>>,
    iteration: u64,
    halted: bool,
    retry: RetryConfig,
}

impl ControlLoop {
    pub fn new(
        config: ControlConfig,
        gateway: Arc<dyn OrderGateway>,
        providers: Vec<Arc<dyn SignalProvider>>,
        session: Session,
        shared: Arc<RwLock<ControlState>>,
        performance: Arc<RwLock<PerformanceSnapshot>>,
    ) -> ControlResult<Self> {
        config.validate()?;
        let engine = ConsensusEngine::new(config.consensus_threshold)?;
        let risk = RiskManager::new(config.risk.clone());
        let market = MarketState::new(
            crate::traits::market_data::DEFAULT_HISTORY_CAPACITY,
            config.strategy_params.clone(),
        );

        Ok(Self {
            config,
            gateway,
            providers,
            engine,
            risk,
            market,
            session,
            shared,
            performance,
            iteration: 0,
            halted: false,
            retry: RetryConfig::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn into_session(self) -> Session {
        self.session
    }

    pub fn market(&self) -> &MarketState {
        &self.market
    }

    /// Whether a fatal error has latched the loop
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Run cycles on the configured interval until told to stop.
    ///
    /// `Stop` is honoured between cycles. `Emergency` drops the in-flight cycle at its next
    /// await point. Returns the loop so the caller can reclaim the session.
    pub async fn run(mut self, mut signal: watch::Receiver<LoopSignal>) -> Self {
        info!(
            "Control loop running for {:?} every {:?}",
            self.config.symbols,
            self.config.cycle_interval()
        );
        let mut ticker = interval(self.config.cycle_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *signal.borrow() != LoopSignal::Run {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {}
                changed = signal.changed() => {
                    if changed.is_err() {
                        warn!("Control surface dropped, stopping loop");
                        break;
                    }
                    continue;
                }
            }

            if *signal.borrow() != LoopSignal::Run {
                break;
            }

            tokio::select! {
                _ = wait_for_emergency(&mut signal) => {
                    warn!("Emergency stop: abandoning cycle {}", self.iteration + 1);
                    return self;
                }
                _ = self.run_cycle() => {}
            }

            if self.halted {
                return self;
            }
        }

        let current = *signal.borrow();
        if current == LoopSignal::Stop {
            self.shutdown().await;
        }
        info!("Control loop exited after {} cycles", self.iteration);
        self
    }

    /// Graceful shutdown: cancel what is still open and book late fills
    async fn shutdown(&mut self) {
        match self.cancel_open_orders().await {
            Ok(n) => {
                info!("Cancelled {} open orders on stop", n);
                self.shared.write().await.orders_cancelled += n as u64;
            }
            Err(e) => warn!("Failed to cancel open orders on stop: {}", e),
        }

        let drained = self.gateway_call(self.gateway.drain_fills()).await;
        match drained {
            Ok(fills) => {
                if let Err(e) = self.apply_fills(&fills) {
                    error!("Failed to record fills on stop: {}", e);
                    self.shared.write().await.record_error(&e, Utc::now());
                }
                self.mark_positions();
            }
            Err(e) => warn!("Failed to drain fills on stop: {}", e),
        }
        self.publish_performance().await;
    }

    /// Run exactly one cycle and publish its results.
    ///
    /// Errors never escape: they are stored as the last error. Fatal errors latch
    /// `EmergencyStopped` and cancel open orders.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let started = Utc::now();
        let mut report = CycleReport {
            iteration: self.iteration + 1,
            started_at: Some(started),
            ..CycleReport::default()
        };
        debug!("Cycle {} starting", report.iteration);

        let result = self.execute_cycle(&mut report, started).await;

        let finished = Utc::now();
        self.session.tracker.close_period(finished);
        self.iteration += 1;

        let fatal = matches!(&result, Err(e) if e.is_fatal());
        {
            let mut state = self.shared.write().await;
            state.iteration_count = self.iteration;
            state.orders_cancelled += report.cancelled as u64;
            state.orders_placed += report.orders_placed as u64;
            if let Some(outcome) = &report.outcome {
                state.last_outcome = Some(outcome.clone());
            }
            if report.balance_drift.is_some() {
                state.balance_drift = report.balance_drift;
            }
            match &result {
                Ok(()) => state.record_success(),
                Err(e) => {
                    state.record_error(e, finished);
                    if fatal {
                        state.phase = ControlPhase::EmergencyStopped;
                    }
                }
            }
        }
        self.publish_performance().await;

        if let Err(e) = result {
            if fatal {
                error!("Cycle {} hit a fatal error, halting: {}", report.iteration, e);
                self.halt().await;
            } else {
                warn!("Cycle {} failed: {}", report.iteration, e);
            }
            report.error = Some(e.to_string());
        } else {
            debug!("Cycle {} finished", report.iteration);
        }
        report
    }

    async fn execute_cycle(
        &mut self,
        report: &mut CycleReport,
        now: DateTime<Utc>,
    ) -> ControlResult<()> {
        self.session.tracker.mark_time(now);

        report.cancelled = self
            .gateway_call(self.gateway.cancel_all(&self.config.symbols))
            .await?;

        let late_fills = self.gateway_call(self.gateway.drain_fills()).await?;
        report.trades_recorded += self.apply_fills(&late_fills)?;

        let ticks = self
            .gateway_call(self.gateway.fetch_market(&self.config.symbols))
            .await?;
        self.market.update(ticks, now);
        self.mark_positions();

        let traded = self.trade_on_consensus(report, now).await;
        if matches!(&traded, Err(e) if e.is_fatal()) {
            return traded;
        }

        self.mark_positions();
        let reconciled = self.reconcile().await;
        if let Ok(drift) = &reconciled {
            report.balance_drift = *drift;
        }
        match (traded, reconciled) {
            (_, Err(e)) if e.is_fatal() => Err(e),
            (Err(e), _) => Err(e),
            (Ok(()), reconciled) => reconciled.map(|_| ()),
        }
    }

    /// Vote, decide, size and place. Returning early skips only the order path.
    async fn trade_on_consensus(
        &mut self,
        report: &mut CycleReport,
        now: DateTime<Utc>,
    ) -> ControlResult<()> {
        let votes = self.collect_votes().await;
        report.votes = votes.len();

        let outcome = self.engine.decide(&votes, now);
        self.session.decisions.push(DecisionRecord {
            cycle: report.iteration,
            timestamp: now,
            votes,
            outcome: outcome.clone(),
        });
        report.outcome = Some(outcome.clone());

        let decision = match &outcome {
            ConsensusOutcome::Reached(decision) => decision,
            ConsensusOutcome::NoConsensus(reason) => {
                info!("No consensus: {:?}", reason);
                return Ok(());
            }
        };
        info!(
            "Consensus {} at strength {:.3} from {} votes",
            decision.action, decision.strength, decision.votes_counted
        );

        let snapshot = self.session.tracker.snapshot();
        let state = self.shared.read().await.clone();
        let verdict = self.risk.evaluate(decision, &snapshot, &state);
        report.verdict = Some(verdict.clone());

        let sized = match verdict {
            RiskVerdict::Approved(sized) => sized,
            RiskVerdict::Rejected(_) => return Ok(()),
        };
        let Some(side) = sized.action.order_side() else {
            return Ok(());
        };

        let orders = self.build_orders(side, sized.notional)?;
        if orders.is_empty() {
            debug!("Approved {} sized to nothing, no orders", sized.action);
            return Ok(());
        }
        for order in &orders {
            info!(
                "Placing {:?} {} {} @ {:?}",
                order.side, order.size, order.symbol, order.price
            );
        }

        let confirmations = self
            .gateway_call(self.gateway.place_orders(orders))
            .await?;
        report.orders_placed = confirmations.len();

        let fills: Vec<Fill> = confirmations
            .into_iter()
            .flat_map(|c| c.fills)
            .collect();
        report.trades_recorded += self.apply_fills(&fills)?;
        Ok(())
    }

    /// Ask every enabled provider for a vote, concurrently and each under the provider timeout
    async fn collect_votes(&self) -> Vec<AgentVote> {
        let timeout = self.config.provider_timeout();
        let market = &self.market;

        let pending = self
            .providers
            .iter()
            .filter(|p| !p.optional() || self.config.provider_enabled(p.id()))
            .map(|provider| async move {
                match tokio::time::timeout(timeout, provider.vote(market)).await {
                    Ok(Ok(vote)) => match vote.validate() {
                        Ok(()) => Some(vote),
                        Err(e) => {
                            warn!("Discarding vote from {}: {}", provider.id(), e);
                            None
                        }
                    },
                    Ok(Err(e)) => {
                        warn!("Provider {} failed: {}", provider.id(), e);
                        None
                    }
                    Err(_) => {
                        warn!("Provider {} timed out after {:?}", provider.id(), timeout);
                        None
                    }
                }
            });

        join_all(pending).await.into_iter().flatten().collect()
    }

    /// One limit order per symbol, notional split evenly, priced at the touch
    fn build_orders(&self, side: OrderSide, notional: Decimal) -> ControlResult<Vec<NewOrder>> {
        if notional <= Decimal::ZERO {
            return Ok(Vec::new());
        }

        let per_symbol = notional / Decimal::from(self.config.symbols.len());
        let mut orders = Vec::new();
        let mut missing = Vec::new();

        for symbol in &self.config.symbols {
            let Some(tick) = self.market.tick(symbol) else {
                missing.push(symbol.to_string());
                continue;
            };
            let price: Price = match side {
                OrderSide::Buy => tick.ask,
                OrderSide::Sell => tick.bid,
            };
            if !price.is_positive() {
                missing.push(symbol.to_string());
                continue;
            }
            let quantity = (per_symbol / price.value())
                .round_dp_with_strategy(QUANTITY_DP, RoundingStrategy::ToZero);
            if quantity.is_zero() {
                debug!("Order for {} rounds to zero, skipping", symbol);
                continue;
            }
            orders.push(NewOrder::limit(symbol.clone(), side, price, Size::new(quantity)));
        }

        if orders.is_empty() && !missing.is_empty() {
            return Err(ControlError::MissingMarketData(missing.join(", ")));
        }
        if !missing.is_empty() {
            warn!("No usable quote for {}", missing.join(", "));
        }
        Ok(orders)
    }

    /// Fold fills into positions; closed round trips go to the ledger
    fn apply_fills(&mut self, fills: &[Fill]) -> ControlResult<usize> {
        let mut recorded = 0;
        for fill in fills {
            if !fill.price.is_positive() {
                warn!("Ignoring fill {} with price {}", fill.order_id, fill.price);
                continue;
            }
            if let Some(closed) = self.session.positions.apply_fill(fill) {
                let record = self.session.tracker.record_closed(closed)?;
                info!(
                    "Closed trade #{} {} {:?} net pnl {}",
                    record.id, record.symbol, record.side, record.net_pnl
                );
                recorded += 1;
            }
        }
        Ok(recorded)
    }

    /// Value open positions at the latest mid for drawdown and equity sampling
    fn mark_positions(&mut self) {
        let market = &self.market;
        let unrealized = self
            .session
            .positions
            .unrealized_pnl(|symbol| market.tick(symbol).map(|t| t.mid()));
        self.session.tracker.mark_to_market(unrealized);
    }

    /// Compare the gateway's quote balance with what the ledger and open positions imply
    async fn reconcile(&self) -> ControlResult<Option<Decimal>> {
        let balances = self.gateway_call(self.gateway.get_balances()).await?;
        let Some(&quote) = balances.get(&self.config.quote_asset) else {
            debug!("Gateway reported no {} balance", self.config.quote_asset);
            return Ok(None);
        };
        if quote < Decimal::ZERO {
            return Err(ControlError::ImpossibleBalance(format!(
                "{} balance {}",
                self.config.quote_asset, quote
            )));
        }

        let expected = self.session.tracker.current_balance() + self.session.positions.quote_flow();
        let drift = quote - expected;
        if drift.abs() > self.config.reconciliation_tolerance {
            warn!(
                "Balance drift {} {} (gateway {}, ledger {})",
                drift, self.config.quote_asset, quote, expected
            );
        }
        Ok(Some(drift))
    }

    /// Latch after a fatal error: cancel what is open, count it as forced
    async fn halt(&mut self) {
        self.halted = true;
        match self.cancel_open_orders().await {
            Ok(n) => {
                let mut state = self.shared.write().await;
                state.forced_cancellations += n as u64;
                state.orders_cancelled += n as u64;
            }
            Err(e) => error!("Failed to cancel orders while halting: {}", e),
        }
    }

    async fn cancel_open_orders(&self) -> ControlResult<usize> {
        let this = &*self;
        retry_with_backoff(&self.retry, move || {
            this.gateway_call(this.gateway.cancel_all(&this.config.symbols))
        })
        .await
    }

    async fn publish_performance(&mut self) {
        let snapshot = self.session.tracker.snapshot();
        *self.performance.write().await = snapshot;
    }

    /// Bound a gateway call by the configured timeout
    async fn gateway_call<T, F>(&self, call: F) -> ControlResult<T>
    where
        F: Future<Output = Result<T, GatewayError>>,
    {
        match tokio::time::timeout(self.config.gateway_timeout(), call).await {
            Ok(result) => result.map_err(ControlError::from),
            Err(_) => Err(GatewayError::Timeout(self.config.gateway_timeout_ms).into()),
        }
    }
}

async fn wait_for_emergency(signal: &mut watch::Receiver<LoopSignal>) {
    loop {
        if *signal.borrow() == LoopSignal::Emergency {
            return;
        }
        if signal.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
