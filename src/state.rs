//! Control-loop state shared with status readers, plus its on-disk form.

use crate::config::ControlConfig;
use crate::error::{ControlError, PersistenceError};
use crate::ledger::PositionBook;
use crate::realtime::consensus::{ConsensusOutcome, DecisionHistory};
use crate::realtime::performance_tracker::{
    PerformanceSnapshot, PerformanceSummary, PerformanceTracker,
};
use chrono::{DateTime, Utc};
use log::info;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Lifecycle phase of the control loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlPhase {
    Stopped,
    Running,
    Stopping,
    EmergencyStopped,
}

impl fmt::Display for ControlPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ControlPhase::Stopped => "stopped",
            ControlPhase::Running => "running",
            ControlPhase::Stopping => "stopping",
            ControlPhase::EmergencyStopped => "emergency-stopped",
        };
        f.write_str(s)
    }
}

/// The single authoritative control state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlState {
    pub phase: ControlPhase,
    /// Completed cycles since the last start
    pub iteration_count: u64,
    pub start_time: Option<DateTime<Utc>>,
    /// Most recent cycle error; kept until replaced by a newer one
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    /// Cycles in a row that ended with an error
    pub consecutive_errors: u32,
    /// Orders cancelled by emergency stops
    pub forced_cancellations: u64,
    pub orders_placed: u64,
    pub orders_cancelled: u64,
    /// Gateway quote balance minus ledger-implied balance at the last reconciliation
    pub balance_drift: Option<Decimal>,
    pub last_outcome: Option<ConsensusOutcome>,
    pub config: ControlConfig,
}

impl ControlState {
    pub fn new(config: ControlConfig) -> Self {
        Self {
            phase: ControlPhase::Stopped,
            iteration_count: 0,
            start_time: None,
            last_error: None,
            last_error_at: None,
            consecutive_errors: 0,
            forced_cancellations: 0,
            orders_placed: 0,
            orders_cancelled: 0,
            balance_drift: None,
            last_outcome: None,
            config,
        }
    }

    pub fn is_running(&self) -> bool {
        self.phase == ControlPhase::Running
    }

    pub fn record_error(&mut self, error: &ControlError, at: DateTime<Utc>) {
        self.last_error = Some(error.to_string());
        self.last_error_at = Some(at);
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
    }

    /// A clean cycle resets the streak but keeps `last_error` for inspection
    pub fn record_success(&mut self) {
        self.consecutive_errors = 0;
    }
}

impl Default for ControlState {
    fn default() -> Self {
        Self::new(ControlConfig::default())
    }
}

/// Response to `status()`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub phase: ControlPhase,
    pub iteration_count: u64,
    pub start_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub forced_cancellations: u64,
    pub balance_drift: Option<Decimal>,
    pub performance_summary: PerformanceSummary,
}

impl StatusReport {
    pub fn new(state: &ControlState, snapshot: &PerformanceSnapshot) -> Self {
        Self {
            phase: state.phase,
            iteration_count: state.iteration_count,
            start_time: state.start_time,
            last_error: state.last_error.clone(),
            last_error_at: state.last_error_at,
            forced_cancellations: state.forced_cancellations,
            balance_drift: state.balance_drift,
            performance_summary: PerformanceSummary::from(snapshot),
        }
    }
}

/// Everything needed to resume a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedState {
    pub state: ControlState,
    pub decisions: DecisionHistory,
    pub tracker: PerformanceTracker,
    pub positions: PositionBook,
    pub saved_at: DateTime<Utc>,
}

impl PersistedState {
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), PersistenceError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        info!("Saved control state to {}", path.display());
        Ok(())
    }

    /// Load a saved session. The ledger is re-validated and the phase always comes back
    /// as `Stopped`.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let mut persisted: PersistedState = serde_json::from_str(&raw)?;
        persisted.tracker.revalidate()?;
        persisted.state.phase = ControlPhase::Stopped;
        info!(
            "Restored control state from {} ({} trades)",
            path.as_ref().display(),
            persisted.tracker.ledger().len()
        );
        Ok(persisted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;

    #[test]
    fn test_new_state_is_stopped() {
        let state = ControlState::default();
        assert_eq!(state.phase, ControlPhase::Stopped);
        assert_eq!(state.iteration_count, 0);
        assert!(state.last_error.is_none());
    }

    #[test]
    fn test_error_bookkeeping() {
        let mut state = ControlState::default();
        let now = Utc::now();
        state.record_error(&ControlError::Gateway(GatewayError::Timeout(10)), now);
        state.record_error(&ControlError::Gateway(GatewayError::Timeout(20)), now);
        assert_eq!(state.consecutive_errors, 2);
        assert_eq!(
            state.last_error.as_deref(),
            Some("gateway call timed out after 20 ms")
        );

        state.record_success();
        assert_eq!(state.consecutive_errors, 0);
        assert!(state.last_error.is_some());
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(ControlPhase::EmergencyStopped.to_string(), "emergency-stopped");
    }
}
