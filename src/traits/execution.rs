use crate::core::events::{Fill, MarketTick, NewOrder, OrderConfirmation};
use crate::error::GatewayError;
use crate::types::Symbol;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Venue the control loop trades against.
///
/// Every call may fail or hang; the loop bounds each one with the configured gateway timeout
/// and treats failures as retryable on the next cycle.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    /// Cancel every open order for the given symbols. Idempotent; returns how many were open.
    async fn cancel_all(&self, symbols: &[Symbol]) -> Result<usize, GatewayError>;

    /// Submit a batch of orders
    async fn place_orders(
        &self,
        orders: Vec<NewOrder>,
    ) -> Result<Vec<OrderConfirmation>, GatewayError>;

    /// Free balance per asset
    async fn get_balances(&self) -> Result<HashMap<String, Decimal>, GatewayError>;

    /// Latest top-of-book quote per symbol
    async fn fetch_market(&self, symbols: &[Symbol]) -> Result<Vec<MarketTick>, GatewayError>;

    /// Fills that happened outside a `place_orders` response since the previous call,
    /// such as resting orders filled between cancellation and replacement
    async fn drain_fills(&self) -> Result<Vec<Fill>, GatewayError>;
}
