use crate::config::RiskLimits;
use crate::core::events::Action;
use crate::realtime::consensus::ConsensusDecision;
use crate::realtime::performance_tracker::PerformanceSnapshot;
use crate::state::ControlState;
use log::{debug, warn};
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Action sized for execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizedAction {
    pub action: Action,
    /// Fraction of capital the loop asked for
    pub requested_fraction: f64,
    /// Fraction approved, never above the request
    pub fraction: f64,
    /// Quote-currency amount to commit across all symbols
    pub notional: Decimal,
    /// Whether the capital fraction limit reduced the request
    pub clamped: bool,
}

/// Reason code for a rejected decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum RejectReason {
    DrawdownExceeded { current: f64, limit: f64 },
    DailyLossLimitExceeded { loss: Decimal, limit: Decimal },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::DrawdownExceeded { current, limit } => write!(
                f,
                "drawdown {:.2}% exceeds limit {:.2}%",
                current * 100.0,
                limit * 100.0
            ),
            RejectReason::DailyLossLimitExceeded { loss, limit } => {
                write!(f, "daily loss {} exceeds limit {}", loss, limit)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum RiskVerdict {
    Approved(SizedAction),
    Rejected(RejectReason),
}

impl RiskVerdict {
    pub fn is_approved(&self) -> bool {
        matches!(self, RiskVerdict::Approved(_))
    }
}

/// Stateless gate between consensus and execution.
///
/// Checks run in order and stop at the first failure: drawdown, capital fraction (clamps),
/// daily realized loss.
#[derive(Debug, Clone)]
pub struct RiskManager {
    limits: RiskLimits,
}

impl RiskManager {
    pub fn new(limits: RiskLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    pub fn evaluate(
        &self,
        decision: &ConsensusDecision,
        snapshot: &PerformanceSnapshot,
        state: &ControlState,
    ) -> RiskVerdict {
        let config = &state.config;

        if !decision.action.is_directional() {
            return RiskVerdict::Approved(SizedAction {
                action: decision.action,
                requested_fraction: 0.0,
                fraction: 0.0,
                notional: Decimal::ZERO,
                clamped: false,
            });
        }

        if snapshot.current_drawdown > self.limits.max_drawdown {
            let reason = RejectReason::DrawdownExceeded {
                current: snapshot.current_drawdown,
                limit: self.limits.max_drawdown,
            };
            warn!("Risk rejected {}: {}", decision.action, reason);
            return RiskVerdict::Rejected(reason);
        }

        let requested = config.order_fraction;
        let (fraction, clamped) = if requested > self.limits.max_capital_fraction {
            debug!(
                "Clamping order fraction {} to {}",
                requested, self.limits.max_capital_fraction
            );
            (self.limits.max_capital_fraction, true)
        } else {
            (requested, false)
        };

        let daily_loss = (-snapshot.daily_realized_pnl).max(Decimal::ZERO);
        if daily_loss > self.limits.daily_loss_limit {
            let reason = RejectReason::DailyLossLimitExceeded {
                loss: daily_loss,
                limit: self.limits.daily_loss_limit,
            };
            warn!("Risk rejected {}: {}", decision.action, reason);
            return RiskVerdict::Rejected(reason);
        }

        let capital = config
            .max_capital
            .min(snapshot.current_balance)
            .max(Decimal::ZERO);
        let notional = capital * Decimal::from_f64(fraction).unwrap_or(Decimal::ZERO);

        RiskVerdict::Approved(SizedAction {
            action: decision.action,
            requested_fraction: requested,
            fraction,
            notional,
            clamped,
        })
    }
}
