use crate::core::events::{
    Fill, MarketTick, NewOrder, OrderConfirmation, OrderId, OrderSide, OrderStatus,
};
use crate::error::GatewayError;
use crate::traits::OrderGateway;
use crate::types::{Price, Size, Symbol};
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Default commission, 0.05% of notional
pub const DEFAULT_COMMISSION_RATE: Decimal = Decimal::from_parts(5, 0, 0, false, 4);

#[derive(Debug, Clone)]
struct RestingOrder {
    id: OrderId,
    order: NewOrder,
    price: Price,
}

#[derive(Debug, Default)]
struct PaperBook {
    quotes: HashMap<Symbol, MarketTick>,
    balances: HashMap<String, Decimal>,
    resting: Vec<RestingOrder>,
    pending_fills: Vec<Fill>,
    next_order_id: u64,
}

/// Simulated venue for paper trading.
///
/// Marketable limit orders fill immediately at their limit price; the rest rest until
/// cancelled or crossed by a later `set_quote`. Fills from resting orders are reported
/// through `drain_fills`.
#[derive(Debug, Clone)]
pub struct PaperGateway {
    quote_asset: String,
    commission_rate: Decimal,
    book: Arc<Mutex<PaperBook>>,
}

impl PaperGateway {
    pub fn new(quote_asset: impl Into<String>, quote_balance: Decimal) -> Self {
        let quote_asset = quote_asset.into();
        let mut book = PaperBook {
            next_order_id: 1,
            ..PaperBook::default()
        };
        book.balances.insert(quote_asset.clone(), quote_balance);
        Self {
            quote_asset,
            commission_rate: DEFAULT_COMMISSION_RATE,
            book: Arc::new(Mutex::new(book)),
        }
    }

    pub fn with_commission_rate(mut self, rate: Decimal) -> Self {
        self.commission_rate = rate;
        self
    }

    /// Publish a new top of book. Resting orders the quote crosses fill at their limit price.
    pub async fn set_quote(&self, symbol: Symbol, bid: Price, ask: Price) {
        let mut book = self.book.lock().await;
        let tick = MarketTick {
            symbol: symbol.clone(),
            bid,
            ask,
            last: Price::mid(bid, ask),
            timestamp: Utc::now(),
        };
        book.quotes.insert(symbol.clone(), tick);

        let resting = std::mem::take(&mut book.resting);
        for entry in resting {
            if entry.order.symbol == symbol && crosses(entry.order.side, entry.price, bid, ask) {
                let fill = self.execute(&mut book, &entry.id, &entry.order, entry.price);
                debug!("Paper resting order {} filled at {}", entry.id, entry.price);
                book.pending_fills.push(fill);
            } else {
                book.resting.push(entry);
            }
        }
    }

    pub async fn open_order_count(&self) -> usize {
        self.book.lock().await.resting.len()
    }

    fn base_asset(&self, symbol: &Symbol) -> String {
        symbol
            .as_str()
            .strip_suffix(self.quote_asset.as_str())
            .filter(|base| !base.is_empty())
            .unwrap_or(symbol.as_str())
            .to_string()
    }

    fn execute(&self, book: &mut PaperBook, id: &OrderId, order: &NewOrder, price: Price) -> Fill {
        let notional = price.value() * order.size.value();
        let fee = notional * self.commission_rate;
        let base = self.base_asset(&order.symbol);

        let (quote_delta, base_delta) = match order.side {
            OrderSide::Buy => (-(notional + fee), order.size.value()),
            OrderSide::Sell => (notional - fee, -order.size.value()),
        };
        *book.balances.entry(self.quote_asset.clone()).or_default() += quote_delta;
        *book.balances.entry(base).or_default() += base_delta;

        Fill {
            order_id: id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            price,
            size: order.size,
            fee,
            timestamp: Utc::now(),
        }
    }

    fn confirmation(
        id: OrderId,
        order: &NewOrder,
        status: OrderStatus,
        fills: Vec<Fill>,
    ) -> OrderConfirmation {
        let filled = if status == OrderStatus::Filled {
            order.size
        } else {
            Size::zero()
        };
        OrderConfirmation {
            order_id: id,
            client_order_id: order.client_order_id.clone(),
            symbol: order.symbol.clone(),
            status,
            filled_size: filled,
            remaining_size: order.size - filled,
            fills,
        }
    }
}

fn crosses(side: OrderSide, limit: Price, bid: Price, ask: Price) -> bool {
    match side {
        OrderSide::Buy => limit >= ask,
        OrderSide::Sell => limit <= bid,
    }
}

#[async_trait]
impl OrderGateway for PaperGateway {
    async fn cancel_all(&self, symbols: &[Symbol]) -> Result<usize, GatewayError> {
        let mut book = self.book.lock().await;
        let before = book.resting.len();
        book.resting.retain(|r| !symbols.contains(&r.order.symbol));
        let cancelled = before - book.resting.len();
        if cancelled > 0 {
            debug!("Paper gateway cancelled {} orders", cancelled);
        }
        Ok(cancelled)
    }

    async fn place_orders(
        &self,
        orders: Vec<NewOrder>,
    ) -> Result<Vec<OrderConfirmation>, GatewayError> {
        let mut book = self.book.lock().await;
        let mut confirmations = Vec::with_capacity(orders.len());

        for order in orders {
            let id: OrderId = format!("paper_{}", book.next_order_id);
            book.next_order_id += 1;

            let (Some(price), true) = (order.price, order.size.is_positive()) else {
                confirmations.push(Self::confirmation(id, &order, OrderStatus::Rejected, vec![]));
                continue;
            };
            let Some(quote) = book.quotes.get(&order.symbol).cloned() else {
                confirmations.push(Self::confirmation(id, &order, OrderStatus::Rejected, vec![]));
                continue;
            };

            if order.side == OrderSide::Buy {
                let cost = price.value() * order.size.value() * (Decimal::ONE + self.commission_rate);
                let available = book
                    .balances
                    .get(&self.quote_asset)
                    .copied()
                    .unwrap_or_default();
                if cost > available {
                    info!(
                        "Paper gateway rejected {} buy: cost {} exceeds {} {}",
                        order.symbol, cost, available, self.quote_asset
                    );
                    confirmations.push(Self::confirmation(id, &order, OrderStatus::Rejected, vec![]));
                    continue;
                }
            }

            if crosses(order.side, price, quote.bid, quote.ask) {
                let fill = self.execute(&mut book, &id, &order, price);
                confirmations.push(Self::confirmation(id, &order, OrderStatus::Filled, vec![fill]));
            } else {
                book.resting.push(RestingOrder {
                    id: id.clone(),
                    order: order.clone(),
                    price,
                });
                confirmations.push(Self::confirmation(id, &order, OrderStatus::New, vec![]));
            }
        }

        Ok(confirmations)
    }

    async fn get_balances(&self) -> Result<HashMap<String, Decimal>, GatewayError> {
        Ok(self.book.lock().await.balances.clone())
    }

    async fn fetch_market(&self, symbols: &[Symbol]) -> Result<Vec<MarketTick>, GatewayError> {
        let book = self.book.lock().await;
        Ok(symbols
            .iter()
            .filter_map(|s| book.quotes.get(s).cloned())
            .collect())
    }

    async fn drain_fills(&self) -> Result<Vec<Fill>, GatewayError> {
        Ok(std::mem::take(&mut self.book.lock().await.pending_fills))
    }
}
