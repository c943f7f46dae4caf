//! Control core for a swarm of trading agents: consensus over agent votes, risk sizing,
//! performance accounting and a stop/start/emergency control surface around the trading loop.

pub mod config;
pub mod connectors;
pub mod core;
pub mod error;
pub mod ledger;
pub mod realtime;
pub mod state;
pub mod strategies;
pub mod traits;
pub mod types;

pub use config::{ControlConfig, RiskLimits};
pub use connectors::PaperGateway;
pub use crate::core::events::{Action, Fill, MarketTick, NewOrder, OrderConfirmation, OrderSide};
pub use error::{ConfigError, ControlError, ControlResult, GatewayError, LedgerError, SignalError};
pub use ledger::{PositionBook, TradeLedger, TradeRecord};
pub use realtime::{
    AgentVote, ConsensusEngine, ConsensusOutcome, PerformanceSnapshot, PerformanceTracker,
    RiskManager, RiskVerdict, TradingController,
};
pub use state::{ControlPhase, ControlState, PersistedState, StatusReport};
pub use traits::{MarketState, OrderGateway, SignalProvider};
pub use types::{Price, Size, Symbol};

use std::path::Path;
use std::str::FromStr;

/// Install the global logger: `[timestamp LEVEL target] message` to stdout and, when given,
/// appended to `log_file`.
pub fn init_logging(level: &str, log_file: Option<&Path>) -> Result<(), ConfigError> {
    let level = log::LevelFilter::from_str(level)
        .map_err(|_| ConfigError::InvalidLogLevel(level.to_string()))?;

    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stdout());

    if let Some(path) = log_file {
        let file = fern::log_file(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        dispatch = dispatch.chain(file);
    }

    dispatch
        .apply()
        .map_err(|e| ConfigError::Io(format!("logger already installed: {}", e)))
}
