use crate::error::SignalError;
use crate::realtime::consensus::AgentVote;
use crate::traits::market_data::MarketState;
use async_trait::async_trait;

/// Agent producing one directional vote per cycle
#[async_trait]
pub trait SignalProvider: Send + Sync {
    /// Stable identifier, also the key for feature toggles
    fn id(&self) -> &str;

    /// Optional providers can be switched off through `provider_toggles`
    fn optional(&self) -> bool {
        true
    }

    /// Vote on the current market. Called once per cycle under a timeout.
    async fn vote(&self, market: &MarketState) -> Result<AgentVote, SignalError>;
}
