use crate::core::events::OrderSide;
use crate::error::LedgerError;
use crate::types::{Price, Size, Symbol};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A round trip that has been closed but not yet assigned a ledger id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedTrade {
    pub symbol: Symbol,
    /// Side of the opening leg; `Buy` is a long round trip
    pub side: OrderSide,
    pub entry_price: Price,
    pub exit_price: Price,
    pub quantity: Size,
    /// Entry and exit fees attributable to the closed quantity
    pub fees: Decimal,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
}

impl ClosedTrade {
    pub fn into_record(self, id: u64) -> TradeRecord {
        let gross = match self.side {
            OrderSide::Buy => (self.exit_price - self.entry_price) * self.quantity.value(),
            OrderSide::Sell => (self.entry_price - self.exit_price) * self.quantity.value(),
        };
        TradeRecord {
            id,
            symbol: self.symbol,
            side: self.side,
            entry_price: self.entry_price,
            exit_price: self.exit_price,
            quantity: self.quantity,
            fees: self.fees,
            realized_pnl: gross,
            net_pnl: gross - self.fees,
            entry_time: self.entry_time,
            exit_time: self.exit_time,
        }
    }
}

/// Completed trade. Immutable once appended to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Monotonic ledger id
    pub id: u64,
    pub symbol: Symbol,
    pub side: OrderSide,
    pub entry_price: Price,
    pub exit_price: Price,
    pub quantity: Size,
    /// Fees paid in quote currency
    pub fees: Decimal,
    /// Gross realized P&L
    pub realized_pnl: Decimal,
    /// Realized P&L after fees
    pub net_pnl: Decimal,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
}

impl TradeRecord {
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.exit_time < self.entry_time {
            return Err(LedgerError::ExitBeforeEntry(self.id));
        }
        if self.net_pnl != self.realized_pnl - self.fees {
            return Err(LedgerError::NetPnlMismatch(self.id));
        }
        if !self.quantity.is_positive() {
            return Err(LedgerError::NonPositiveQuantity(self.id));
        }
        Ok(())
    }

    pub fn is_win(&self) -> bool {
        self.net_pnl > Decimal::ZERO
    }

    pub fn is_loss(&self) -> bool {
        self.net_pnl < Decimal::ZERO
    }

    pub fn holding_time(&self) -> chrono::Duration {
        self.exit_time - self.entry_time
    }
}

/// Append-only record of completed trades, ordered by id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeLedger {
    trades: Vec<TradeRecord>,
}

impl TradeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a ledger from persisted records, re-checking every invariant
    pub fn from_trades(trades: Vec<TradeRecord>) -> Result<Self, LedgerError> {
        let mut ledger = Self::new();
        for trade in trades {
            ledger.append(trade)?;
        }
        Ok(ledger)
    }

    pub fn last_id(&self) -> u64 {
        self.trades.last().map(|t| t.id).unwrap_or(0)
    }

    pub fn next_id(&self) -> u64 {
        self.last_id() + 1
    }

    pub fn append(&mut self, trade: TradeRecord) -> Result<(), LedgerError> {
        let last = self.last_id();
        if trade.id <= last {
            return Err(LedgerError::NonMonotonicId {
                last,
                got: trade.id,
            });
        }
        trade.validate()?;
        self.trades.push(trade);
        Ok(())
    }

    /// Assign the next id to a closed round trip and append it
    pub fn record_closed(&mut self, closed: ClosedTrade) -> Result<TradeRecord, LedgerError> {
        let record = closed.into_record(self.next_id());
        self.append(record.clone())?;
        Ok(record)
    }

    pub fn get(&self, id: u64) -> Option<&TradeRecord> {
        self.trades
            .binary_search_by_key(&id, |t| t.id)
            .ok()
            .map(|idx| &self.trades[idx])
    }

    pub fn trades(&self) -> &[TradeRecord] {
        &self.trades
    }

    pub fn len(&self) -> usize {
        self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }

    /// Net P&L of trades whose exit falls in `[from, to)`
    pub fn net_pnl_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Decimal {
        self.trades
            .iter()
            .filter(|t| t.exit_time >= from && t.exit_time < to)
            .map(|t| t.net_pnl)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn closed(side: OrderSide, entry: &str, exit: &str, qty: &str, fees: &str) -> ClosedTrade {
        let now = Utc::now();
        ClosedTrade {
            symbol: Symbol::new("BTCUSDT"),
            side,
            entry_price: Price::from_str(entry).unwrap(),
            exit_price: Price::from_str(exit).unwrap(),
            quantity: Size::from_str(qty).unwrap(),
            fees: fees.parse().unwrap(),
            entry_time: now - Duration::minutes(5),
            exit_time: now,
        }
    }

    #[test]
    fn test_long_round_trip_pnl() {
        let record = closed(OrderSide::Buy, "100", "110", "2", "0.5").into_record(1);
        assert_eq!(record.realized_pnl, Decimal::new(20, 0));
        assert_eq!(record.net_pnl, Decimal::new(195, 1));
        assert!(record.is_win());
        assert!(record.validate().is_ok());
    }

    #[test]
    fn test_short_round_trip_pnl() {
        let record = closed(OrderSide::Sell, "100", "110", "1", "0").into_record(1);
        assert_eq!(record.realized_pnl, Decimal::new(-10, 0));
        assert!(record.is_loss());
    }

    #[test]
    fn test_ledger_assigns_monotonic_ids() {
        let mut ledger = TradeLedger::new();
        let a = ledger
            .record_closed(closed(OrderSide::Buy, "100", "101", "1", "0"))
            .unwrap();
        let b = ledger
            .record_closed(closed(OrderSide::Buy, "101", "100", "1", "0"))
            .unwrap();
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(ledger.get(2).map(|t| t.id), Some(2));
        assert!(ledger.get(3).is_none());
    }

    #[test]
    fn test_ledger_rejects_duplicate_id() {
        let mut ledger = TradeLedger::new();
        let record = closed(OrderSide::Buy, "100", "101", "1", "0").into_record(5);
        ledger.append(record.clone()).unwrap();
        let err = ledger.append(record).unwrap_err();
        assert_eq!(err, LedgerError::NonMonotonicId { last: 5, got: 5 });
    }

    #[test]
    fn test_ledger_rejects_corrupted_records() {
        let mut ledger = TradeLedger::new();
        let mut record = closed(OrderSide::Buy, "100", "101", "1", "0.1").into_record(1);
        record.net_pnl = record.realized_pnl;
        assert_eq!(
            ledger.append(record).unwrap_err(),
            LedgerError::NetPnlMismatch(1)
        );

        let mut record = closed(OrderSide::Buy, "100", "101", "1", "0").into_record(1);
        record.exit_time = record.entry_time - Duration::seconds(1);
        assert_eq!(
            ledger.append(record).unwrap_err(),
            LedgerError::ExitBeforeEntry(1)
        );
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_net_pnl_between() {
        let mut ledger = TradeLedger::new();
        let record = ledger
            .record_closed(closed(OrderSide::Buy, "100", "90", "1", "1"))
            .unwrap();
        let from = record.exit_time - Duration::hours(1);
        let to = record.exit_time + Duration::hours(1);
        assert_eq!(ledger.net_pnl_between(from, to), Decimal::new(-11, 0));
        assert_eq!(
            ledger.net_pnl_between(to, to + Duration::hours(1)),
            Decimal::ZERO
        );
    }
}
