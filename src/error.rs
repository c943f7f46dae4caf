//! Error taxonomy for the control core.
//!
//! Configuration errors are rejected synchronously by `start`. Gateway and signal errors are
//! transient and never unwind past a single cycle. Ledger corruption and impossible balances
//! are fatal and latch the controller into `EmergencyStopped`.

use crate::realtime::consensus::VoteError;
use thiserror::Error;

/// Invalid start parameters
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("symbol set must not be empty")]
    EmptySymbols,

    #[error("symbol at position {0} is blank")]
    BlankSymbol(usize),

    #[error("consensus threshold must be in (0, 1], got {0}")]
    InvalidThreshold(f64),

    #[error("cycle interval must be positive")]
    NonPositiveInterval,

    #[error("{field} must be positive")]
    NonPositive { field: &'static str },

    #[error("{field} must be in [0, 1], got {value}")]
    FractionOutOfRange { field: &'static str, value: f64 },

    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),

    #[error("failed to read config: {0}")]
    Io(String),

    #[error("failed to parse config: {0}")]
    Parse(String),
}

/// Order gateway failures, all retryable on the next cycle
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("gateway call timed out after {0} ms")]
    Timeout(u64),

    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    #[error("gateway error: {0}")]
    Other(String),
}

/// Signal provider failures; the provider is excluded from the cycle's vote set
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalError {
    #[error("provider {0} timed out")]
    Timeout(String),

    #[error("provider {provider} failed: {reason}")]
    Failed { provider: String, reason: String },

    #[error("not enough market data for {0}")]
    InsufficientData(String),
}

/// Ledger invariant violations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("trade id {got} is not greater than last id {last}")]
    NonMonotonicId { last: u64, got: u64 },

    #[error("trade {0} exits before it enters")]
    ExitBeforeEntry(u64),

    #[error("trade {0} net pnl does not equal realized pnl minus fees")]
    NetPnlMismatch(u64),

    #[error("trade {0} has non-positive quantity")]
    NonPositiveQuantity(u64),
}

/// Failures while saving or restoring control state
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("state file i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("state file is not valid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("restored ledger is inconsistent: {0}")]
    Ledger(#[from] LedgerError),
}

/// Top-level error for one control cycle or control-surface call
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControlError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Signal(#[from] SignalError),

    #[error("invalid vote: {0}")]
    Vote(#[from] VoteError),

    #[error("ledger corrupted: {0}")]
    Ledger(#[from] LedgerError),

    #[error("impossible balance: {0}")]
    ImpossibleBalance(String),

    #[error("no market data for {0}")]
    MissingMarketData(String),

    #[error("control loop task failed: {0}")]
    LoopTaskFailed(String),

    #[error("cannot {action} while {phase}")]
    InvalidTransition { action: &'static str, phase: String },
}

impl ControlError {
    /// Fatal errors halt the loop instead of being retried next cycle
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ControlError::Ledger(_)
                | ControlError::ImpossibleBalance(_)
                | ControlError::LoopTaskFailed(_)
        )
    }
}

pub type ControlResult<T> = Result<T, ControlError>;
