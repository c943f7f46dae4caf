pub mod consensus;
pub mod control_loop;
pub mod controller;
pub mod error_recovery;
pub mod performance_tracker;
pub mod risk_manager;

pub use consensus::{
    AgentVote, ConsensusDecision, ConsensusEngine, ConsensusOutcome, DecisionHistory,
    DecisionRecord, NoConsensusReason,
};
pub use control_loop::{ControlLoop, CycleReport, LoopSignal, Session};
pub use controller::{CommandResult, EmergencyStopResult, TradingController};
pub use error_recovery::{retry_with_backoff, RetryConfig};
pub use performance_tracker::{PerformanceSnapshot, PerformanceSummary, PerformanceTracker};
pub use risk_manager::{RejectReason, RiskManager, RiskVerdict, SizedAction};
