pub mod execution;
pub mod market_data;
pub mod strategy;

pub use execution::OrderGateway;
pub use market_data::MarketState;
pub use strategy::SignalProvider;
