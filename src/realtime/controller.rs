use crate::config::ControlConfig;
use crate::error::{ControlError, ControlResult, GatewayError};
use crate::realtime::control_loop::{ControlLoop, LoopSignal, Session};
use crate::realtime::error_recovery::{retry_with_backoff, RetryConfig};
use crate::realtime::performance_tracker::PerformanceSnapshot;
use crate::state::{ControlPhase, ControlState, PersistedState, StatusReport};
use crate::traits::{OrderGateway, SignalProvider};
use chrono::Utc;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;

/// Reply to start/stop/reset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub success: bool,
    pub message: String,
}

impl CommandResult {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Reply to an emergency stop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyStopResult {
    pub success: bool,
    pub message: String,
    pub cancelled_order_count: usize,
}

/// Loop task plus the session it hands back, guarded together
#[derive(Default)]
struct Runtime {
    session: Option<Session>,
    task: Option<JoinHandle<ControlLoop>>,
}

/// Control surface over one trading loop.
///
/// Status and performance reads only take read locks on published copies, so they never wait
/// on a running cycle. Emergency stop bypasses the loop entirely.
pub struct TradingController {
    gateway: Arc<dyn OrderGateway>,
    providers: Vec<Arc<dyn SignalProvider>>,
    state: Arc<RwLock<ControlState>>,
    performance: Arc<RwLock<PerformanceSnapshot>>,
    signal: watch::Sender<LoopSignal>,
    runtime: Mutex<Runtime>,
    retry: RetryConfig,
}

impl TradingController {
    pub fn new(gateway: Arc<dyn OrderGateway>, providers: Vec<Arc<dyn SignalProvider>>) -> Self {
        let config = ControlConfig::default();
        let session = Session::new(&config);
        let snapshot = session.tracker.compute_snapshot();
        Self::assemble(gateway, providers, ControlState::new(config), session, snapshot)
    }

    /// Controller resuming a saved session; always comes back `Stopped`
    pub fn restore(
        gateway: Arc<dyn OrderGateway>,
        providers: Vec<Arc<dyn SignalProvider>>,
        persisted: PersistedState,
    ) -> Self {
        let mut state = persisted.state;
        state.phase = ControlPhase::Stopped;
        let session = Session {
            tracker: persisted.tracker,
            positions: persisted.positions,
            decisions: persisted.decisions,
        };
        let snapshot = session.tracker.compute_snapshot();
        Self::assemble(gateway, providers, state, session, snapshot)
    }

    fn assemble(
        gateway: Arc<dyn OrderGateway>,
        providers: Vec<Arc<dyn SignalProvider>>,
        state: ControlState,
        session: Session,
        snapshot: PerformanceSnapshot,
    ) -> Self {
        let (signal, _) = watch::channel(LoopSignal::Stop);
        Self {
            gateway,
            providers,
            state: Arc::new(RwLock::new(state)),
            performance: Arc::new(RwLock::new(snapshot)),
            signal,
            runtime: Mutex::new(Runtime {
                session: Some(session),
                task: None,
            }),
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Validate the configuration and start the loop. A rejected configuration leaves the
    /// controller `Stopped`.
    pub async fn start(&self, config: ControlConfig) -> CommandResult {
        let mut runtime = self.runtime.lock().await;

        let phase = self.state.read().await.phase;
        if phase != ControlPhase::Stopped {
            return CommandResult::fail(format!("cannot start while {}", phase));
        }
        if let Err(e) = config.validate() {
            warn!("Rejected start configuration: {}", e);
            return CommandResult::fail(ControlError::from(e).to_string());
        }

        let mut session = match self.reclaim(&mut runtime).await {
            Some(session) => session,
            None => Session::new(&config),
        };
        session.reconfigure(&config);

        {
            let mut state = self.state.write().await;
            state.config = config.clone();
            state.phase = ControlPhase::Running;
            state.iteration_count = 0;
            state.start_time = Some(Utc::now());
            state.consecutive_errors = 0;
        }
        *self.performance.write().await = session.tracker.compute_snapshot();

        let control_loop = match ControlLoop::new(
            config.clone(),
            self.gateway.clone(),
            self.providers.clone(),
            session.clone(),
            self.state.clone(),
            self.performance.clone(),
        ) {
            Ok(control_loop) => control_loop.with_retry(self.retry.clone()),
            Err(e) => {
                runtime.session = Some(session);
                self.state.write().await.phase = ControlPhase::Stopped;
                return CommandResult::fail(e.to_string());
            }
        };

        self.signal.send_replace(LoopSignal::Run);
        let receiver = self.signal.subscribe();
        runtime.task = Some(tokio::spawn(control_loop.run(receiver)));

        info!(
            "Trading started on {:?} (threshold {}, interval {:?})",
            config.symbols,
            config.consensus_threshold,
            config.cycle_interval()
        );
        CommandResult::ok(format!("started trading {} symbols", config.symbols.len()))
    }

    /// Let the running cycle finish, cancel open orders and stop. No-op when already stopped.
    pub async fn stop(&self) -> CommandResult {
        {
            let mut state = self.state.write().await;
            match state.phase {
                ControlPhase::Stopped => return CommandResult::ok("already stopped"),
                ControlPhase::EmergencyStopped => {
                    return CommandResult::fail("emergency stopped; reset required")
                }
                ControlPhase::Stopping => return CommandResult::fail("stop already in progress"),
                ControlPhase::Running => state.phase = ControlPhase::Stopping,
            }
        }
        info!("Stopping after the current cycle");
        self.signal.send_replace(LoopSignal::Stop);

        let mut runtime = self.runtime.lock().await;
        let session = self.reclaim(&mut runtime).await;
        runtime.session = session;

        let mut state = self.state.write().await;
        if state.phase != ControlPhase::Stopping {
            warn!("Stop finished with the controller {}", state.phase);
            return CommandResult::fail(format!(
                "{} while stopping after {} cycles; reset required",
                state.phase, state.iteration_count
            ));
        }
        state.phase = ControlPhase::Stopped;
        CommandResult::ok(format!(
            "stopped after {} cycles",
            state.iteration_count
        ))
    }

    /// Cancel every open order now, without waiting for the loop, and latch
    /// `EmergencyStopped` if the loop was active.
    pub async fn emergency_stop(&self) -> EmergencyStopResult {
        let latched = {
            let mut state = self.state.write().await;
            match state.phase {
                ControlPhase::Running | ControlPhase::Stopping => {
                    state.phase = ControlPhase::EmergencyStopped;
                    true
                }
                ControlPhase::EmergencyStopped => true,
                ControlPhase::Stopped => false,
            }
        };
        if latched {
            error!("EMERGENCY STOP");
            self.signal.send_replace(LoopSignal::Emergency);
        }

        let symbols = self.state.read().await.config.symbols.clone();
        let timeout = self.state.read().await.config.gateway_timeout();
        let gateway = &self.gateway;
        let symbols_ref = &symbols;
        let cancelled = retry_with_backoff(&self.retry, move || async move {
            match tokio::time::timeout(timeout, gateway.cancel_all(symbols_ref)).await {
                Ok(result) => result,
                Err(_) => Err(GatewayError::Timeout(timeout.as_millis() as u64)),
            }
        })
        .await;

        match cancelled {
            Ok(count) => {
                {
                    let mut state = self.state.write().await;
                    state.forced_cancellations += count as u64;
                    state.orders_cancelled += count as u64;
                }
                let message = if latched {
                    format!("emergency stop engaged, cancelled {} orders", count)
                } else {
                    format!("not running, cancelled {} orders", count)
                };
                warn!("{}", message);
                EmergencyStopResult {
                    success: true,
                    message,
                    cancelled_order_count: count,
                }
            }
            Err(e) => {
                let e = ControlError::from(e);
                error!("Emergency cancel failed: {}", e);
                self.state.write().await.record_error(&e, Utc::now());
                EmergencyStopResult {
                    success: false,
                    message: format!("cancel failed: {}", e),
                    cancelled_order_count: 0,
                }
            }
        }
    }

    /// Clear an emergency stop back to `Stopped`
    pub async fn reset(&self) -> CommandResult {
        let phase = self.state.read().await.phase;
        match phase {
            ControlPhase::Stopped => return CommandResult::ok("already stopped"),
            ControlPhase::Running | ControlPhase::Stopping => {
                return CommandResult::fail(format!("cannot reset while {}", phase))
            }
            ControlPhase::EmergencyStopped => {}
        }

        let mut runtime = self.runtime.lock().await;
        let session = self.reclaim(&mut runtime).await;
        runtime.session = session;

        let mut state = self.state.write().await;
        state.phase = ControlPhase::Stopped;
        state.consecutive_errors = 0;
        info!("Emergency stop cleared");
        CommandResult::ok("reset to stopped")
    }

    pub async fn status(&self) -> StatusReport {
        let state = self.state.read().await.clone();
        let snapshot = self.performance.read().await.clone();
        StatusReport::new(&state, &snapshot)
    }

    /// Latest published snapshot; `PerformanceSnapshot::report` renders it
    pub async fn performance_report(&self) -> PerformanceSnapshot {
        self.performance.read().await.clone()
    }

    pub async fn state(&self) -> ControlState {
        self.state.read().await.clone()
    }

    /// Everything needed to resume later. Only available while no loop is active.
    pub async fn export_state(&self) -> ControlResult<PersistedState> {
        let phase = self.state.read().await.phase;
        if matches!(phase, ControlPhase::Running | ControlPhase::Stopping) {
            return Err(ControlError::InvalidTransition {
                action: "export state",
                phase: phase.to_string(),
            });
        }

        let mut runtime = self.runtime.lock().await;
        let session = self.reclaim(&mut runtime).await;
        runtime.session = session.clone();
        let session = session.ok_or_else(|| ControlError::InvalidTransition {
            action: "export state",
            phase: phase.to_string(),
        })?;

        Ok(PersistedState {
            state: self.state.read().await.clone(),
            decisions: session.decisions,
            tracker: session.tracker,
            positions: session.positions,
            saved_at: Utc::now(),
        })
    }

    /// Take the session back, waiting for a finished or finishing loop task if there is one
    async fn reclaim(&self, runtime: &mut Runtime) -> Option<Session> {
        if let Some(task) = runtime.task.take() {
            match task.await {
                Ok(control_loop) => {
                    let session = control_loop.into_session();
                    *self.performance.write().await = session.tracker.compute_snapshot();
                    return Some(session);
                }
                Err(e) => {
                    error!(
                        "Control loop task failed, its ledger, positions and decisions are lost: {}",
                        e
                    );
                    let err = ControlError::LoopTaskFailed(e.to_string());
                    let mut state = self.state.write().await;
                    state.record_error(&err, Utc::now());
                    state.phase = ControlPhase::EmergencyStopped;
                }
            }
        }
        runtime.session.take()
    }
}

impl Drop for TradingController {
    fn drop(&mut self) {
        self.signal.send_replace(LoopSignal::Emergency);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::PaperGateway;
    use rust_decimal::Decimal;

    fn controller() -> TradingController {
        let gateway = Arc::new(PaperGateway::new("USDT", Decimal::new(1000, 0)));
        TradingController::new(gateway, Vec::new())
    }

    #[tokio::test]
    async fn test_fresh_controller_is_stopped() {
        let ctl = controller();
        let status = ctl.status().await;
        assert_eq!(status.phase, ControlPhase::Stopped);
        assert_eq!(status.iteration_count, 0);
        assert!(ctl.stop().await.success);
    }

    #[tokio::test]
    async fn test_reset_refused_while_running() {
        let ctl = controller();
        let mut config = ControlConfig::default();
        config.cycle_interval_ms = 60_000;
        assert!(ctl.start(config).await.success);
        assert!(!ctl.reset().await.success);
        assert!(ctl.export_state().await.is_err());
        assert!(ctl.stop().await.success);
        assert_eq!(ctl.status().await.phase, ControlPhase::Stopped);
    }

    #[tokio::test]
    async fn test_emergency_stop_from_stopped_does_not_latch() {
        let ctl = controller();
        let result = ctl.emergency_stop().await;
        assert!(result.success);
        assert_eq!(result.cancelled_order_count, 0);
        assert_eq!(ctl.status().await.phase, ControlPhase::Stopped);
    }
}
