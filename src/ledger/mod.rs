pub mod positions;
pub mod trade;

pub use positions::{OpenPosition, PositionBook};
pub use trade::{ClosedTrade, TradeLedger, TradeRecord};
