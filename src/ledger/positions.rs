use crate::core::events::{Fill, OrderSide};
use crate::ledger::trade::ClosedTrade;
use crate::types::{Price, Size, Symbol};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Open inventory for one symbol, tracked at average cost
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenPosition {
    pub side: OrderSide,
    pub quantity: Size,
    pub average_price: Price,
    /// Entry fees not yet attributed to a closed trade
    pub entry_fees: Decimal,
    pub opened_at: DateTime<Utc>,
}

impl OpenPosition {
    fn open(fill: &Fill) -> Self {
        Self {
            side: fill.side,
            quantity: fill.size,
            average_price: fill.price,
            entry_fees: fill.fee,
            opened_at: fill.timestamp,
        }
    }

    /// Notional at the average entry price
    pub fn cost_basis(&self) -> Decimal {
        self.average_price.value() * self.quantity.value()
    }
}

/// Turns individual fills into closed round trips.
///
/// A fill on the same side as the open position adds to it at a new average price. An opposing
/// fill closes up to the open quantity; any remainder opens a position on the other side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionBook {
    positions: BTreeMap<Symbol, OpenPosition>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self, symbol: &Symbol) -> Option<&OpenPosition> {
        self.positions.get(symbol)
    }

    pub fn open_positions(&self) -> impl Iterator<Item = (&Symbol, &OpenPosition)> {
        self.positions.iter()
    }

    pub fn is_flat(&self) -> bool {
        self.positions.is_empty()
    }

    /// Signed quote currency tied up in open positions: negative for what longs spent,
    /// positive for what shorts received, entry fees included
    pub fn quote_flow(&self) -> Decimal {
        self.positions
            .values()
            .map(|p| match p.side {
                OrderSide::Buy => -(p.cost_basis() + p.entry_fees),
                OrderSide::Sell => p.cost_basis() - p.entry_fees,
            })
            .sum()
    }

    /// Mark-to-market P&L of open positions, entry fees included. Symbols without a mark are
    /// valued at their average entry price.
    pub fn unrealized_pnl<F>(&self, mark: F) -> Decimal
    where
        F: Fn(&Symbol) -> Option<Price>,
    {
        self.positions
            .iter()
            .map(|(symbol, p)| {
                let mark = mark(symbol).unwrap_or(p.average_price);
                let move_per_unit = match p.side {
                    OrderSide::Buy => mark - p.average_price,
                    OrderSide::Sell => p.average_price - mark,
                };
                move_per_unit * p.quantity.value() - p.entry_fees
            })
            .sum()
    }

    /// Apply one execution. Returns the round trip it closed, if any.
    pub fn apply_fill(&mut self, fill: &Fill) -> Option<ClosedTrade> {
        if !fill.size.is_positive() {
            return None;
        }

        if !self.positions.contains_key(&fill.symbol) {
            self.positions
                .insert(fill.symbol.clone(), OpenPosition::open(fill));
            return None;
        }
        let existing = self.positions.get_mut(&fill.symbol)?;

        if existing.side == fill.side {
            let total = existing.quantity + fill.size;
            let weighted = existing.cost_basis() + fill.price.value() * fill.size.value();
            existing.average_price = Price::new(weighted / total.value());
            existing.quantity = total;
            existing.entry_fees += fill.fee;
            return None;
        }

        let close_qty = existing.quantity.min(fill.size);
        let entry_fee_share = existing.entry_fees * close_qty.value() / existing.quantity.value();
        let exit_fee_share = fill.fee * close_qty.value() / fill.size.value();

        let closed = ClosedTrade {
            symbol: fill.symbol.clone(),
            side: existing.side,
            entry_price: existing.average_price,
            exit_price: fill.price,
            quantity: close_qty,
            fees: entry_fee_share + exit_fee_share,
            entry_time: existing.opened_at,
            exit_time: fill.timestamp,
        };

        existing.quantity = existing.quantity - close_qty;
        existing.entry_fees -= entry_fee_share;

        if existing.quantity.is_zero() {
            self.positions.remove(&fill.symbol);
        }

        let remainder = fill.size - close_qty;
        if remainder.is_positive() {
            // the fill flipped the position
            self.positions.insert(
                fill.symbol.clone(),
                OpenPosition {
                    side: fill.side,
                    quantity: remainder,
                    average_price: fill.price,
                    entry_fees: fill.fee - exit_fee_share,
                    opened_at: fill.timestamp,
                },
            );
        }

        Some(closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn fill(side: OrderSide, price: &str, size: &str, fee: &str, offset_secs: i64) -> Fill {
        Fill {
            order_id: "o1".to_string(),
            symbol: Symbol::new("BTCUSDT"),
            side,
            price: Price::from_str(price).unwrap(),
            size: Size::from_str(size).unwrap(),
            fee: fee.parse().unwrap(),
            timestamp: DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(offset_secs),
        }
    }

    #[test]
    fn test_same_side_fills_average_in() {
        let mut book = PositionBook::new();
        assert!(book.apply_fill(&fill(OrderSide::Buy, "100", "1", "0", 0)).is_none());
        assert!(book.apply_fill(&fill(OrderSide::Buy, "110", "1", "0", 1)).is_none());
        let pos = book.position(&Symbol::new("BTCUSDT")).unwrap();
        assert_eq!(pos.quantity, Size::from_str("2").unwrap());
        assert_eq!(pos.average_price, Price::from_str("105").unwrap());
    }

    #[test]
    fn test_quote_flow() {
        let mut book = PositionBook::new();
        book.apply_fill(&fill(OrderSide::Buy, "100", "2", "0.1", 0));
        assert_eq!(book.quote_flow(), Decimal::new(-2001, 1));

        let mut book = PositionBook::new();
        book.apply_fill(&fill(OrderSide::Sell, "100", "1", "0.05", 0));
        assert_eq!(book.quote_flow(), Decimal::new(9995, 2));
    }

    #[test]
    fn test_unrealized_pnl_marks_both_sides() {
        let mut book = PositionBook::new();
        book.apply_fill(&fill(OrderSide::Buy, "100", "3", "0.3", 0));
        let eth = Fill {
            symbol: Symbol::new("ETHUSDT"),
            ..fill(OrderSide::Sell, "50", "2", "0", 0)
        };
        book.apply_fill(&eth);

        let marks = |s: &Symbol| match s.as_str() {
            "BTCUSDT" => Some(Price::from_str("40").unwrap()),
            _ => None,
        };
        // long 3 from 100 to 40, less fees; the short has no mark and counts flat
        assert_eq!(book.unrealized_pnl(marks), Decimal::new(-1803, 1));

        let marks = |s: &Symbol| match s.as_str() {
            "ETHUSDT" => Some(Price::from_str("45").unwrap()),
            _ => Some(Price::from_str("100").unwrap()),
        };
        assert_eq!(book.unrealized_pnl(marks), Decimal::new(97, 1));
    }

    #[test]
    fn test_opposing_fill_closes_round_trip() {
        let mut book = PositionBook::new();
        book.apply_fill(&fill(OrderSide::Buy, "100", "2", "0.2", 0));
        let closed = book
            .apply_fill(&fill(OrderSide::Sell, "110", "1", "0.1", 60))
            .unwrap();

        assert_eq!(closed.side, OrderSide::Buy);
        assert_eq!(closed.quantity, Size::from_str("1").unwrap());
        // half the entry fee plus the whole exit fee
        assert_eq!(closed.fees, Decimal::new(2, 1));
        assert_eq!(closed.exit_time - closed.entry_time, Duration::seconds(60));

        let pos = book.position(&Symbol::new("BTCUSDT")).unwrap();
        assert_eq!(pos.quantity, Size::from_str("1").unwrap());
        assert_eq!(pos.entry_fees, Decimal::new(1, 1));
    }

    #[test]
    fn test_full_close_leaves_book_flat() {
        let mut book = PositionBook::new();
        book.apply_fill(&fill(OrderSide::Sell, "100", "1", "0", 0));
        let closed = book
            .apply_fill(&fill(OrderSide::Buy, "90", "1", "0", 1))
            .unwrap();
        assert_eq!(closed.side, OrderSide::Sell);
        assert!(book.is_flat());

        let record = closed.into_record(1);
        assert_eq!(record.net_pnl, Decimal::new(10, 0));
    }

    #[test]
    fn test_oversized_fill_flips_position() {
        let mut book = PositionBook::new();
        book.apply_fill(&fill(OrderSide::Buy, "100", "1", "0", 0));
        let closed = book
            .apply_fill(&fill(OrderSide::Sell, "105", "3", "0.3", 5))
            .unwrap();
        assert_eq!(closed.quantity, Size::from_str("1").unwrap());
        assert_eq!(closed.fees, Decimal::new(1, 1));

        let pos = book.position(&Symbol::new("BTCUSDT")).unwrap();
        assert_eq!(pos.side, OrderSide::Sell);
        assert_eq!(pos.quantity, Size::from_str("2").unwrap());
        assert_eq!(pos.entry_fees, Decimal::new(2, 1));
    }
}
