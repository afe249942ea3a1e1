use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::errors::ExchangeError;
use crate::domain::market::{Candle, Interval, OrderBook, Ticker};
use crate::domain::ports::{ExchangeGateway, OrderResult, OrderStatus};
use crate::domain::symbol::Symbol;
use crate::domain::trading::direction::Direction;

/// In-memory `ExchangeGateway` fixture. Not a mocking-framework double;
/// ordinary state seeded by the test and read back by the code under test,
/// matching the teacher's `MockScannerService`/`MockExecService` convention.
#[derive(Default)]
pub struct MockExchangeGateway {
    tickers: Mutex<HashMap<Symbol, Ticker>>,
    candles: Mutex<HashMap<(Symbol, &'static str), Vec<Candle>>>,
    open_positions: Mutex<HashMap<Symbol, OrderResult>>,
    order_book: Mutex<HashMap<Symbol, OrderBook>>,
    reject_orders: Mutex<bool>,
    reject_closes: Mutex<bool>,
}

impl MockExchangeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_ticker(&self, ticker: Ticker) {
        self.tickers.lock().expect("mock mutex poisoned").insert(ticker.symbol.clone(), ticker);
    }

    pub fn seed_candles(&self, symbol: &Symbol, interval: Interval, candles: Vec<Candle>) {
        self.candles
            .lock()
            .expect("mock mutex poisoned")
            .insert((symbol.clone(), interval.as_venue_str()), candles);
    }

    pub fn seed_order_book(&self, symbol: &Symbol, book: OrderBook) {
        self.order_book.lock().expect("mock mutex poisoned").insert(symbol.clone(), book);
    }

    pub fn seed_open_position(&self, symbol: &Symbol, avg_price: Decimal, filled_qty: Decimal) {
        self.open_positions.lock().expect("mock mutex poisoned").insert(
            symbol.clone(),
            OrderResult { order_id: Uuid::new_v4().to_string(), filled_qty, avg_price, status: OrderStatus::Filled },
        );
    }

    pub fn set_reject_orders(&self, reject: bool) {
        *self.reject_orders.lock().expect("mock mutex poisoned") = reject;
    }

    /// Makes every `close_position` call fail with a transient error, to
    /// exercise retry-exhaustion / STUCK-position paths.
    pub fn set_reject_closes(&self, reject: bool) {
        *self.reject_closes.lock().expect("mock mutex poisoned") = reject;
    }
}

#[async_trait]
impl ExchangeGateway for MockExchangeGateway {
    async fn fetch_tickers(&self) -> Result<Vec<Ticker>, ExchangeError> {
        Ok(self.tickers.lock().expect("mock mutex poisoned").values().cloned().collect())
    }

    async fn fetch_candles(&self, symbol: &Symbol, interval: Interval, limit: usize) -> Result<Vec<Candle>, ExchangeError> {
        let candles = self.candles.lock().expect("mock mutex poisoned");
        match candles.get(&(symbol.clone(), interval.as_venue_str())) {
            Some(series) => {
                let start = series.len().saturating_sub(limit);
                Ok(series[start..].to_vec())
            }
            None => Err(ExchangeError::InvalidSymbol),
        }
    }

    async fn fetch_order_book(&self, symbol: &Symbol, depth: usize) -> Result<OrderBook, ExchangeError> {
        let books = self.order_book.lock().expect("mock mutex poisoned");
        let book = books.get(symbol).cloned().ok_or(ExchangeError::InvalidSymbol)?;
        Ok(OrderBook { bids: book.bids.into_iter().take(depth).collect(), asks: book.asks.into_iter().take(depth).collect() })
    }

    async fn place_market_order(
        &self,
        symbol: &Symbol,
        _direction: Direction,
        quantity: Decimal,
        _leverage: u8,
    ) -> Result<OrderResult, ExchangeError> {
        if *self.reject_orders.lock().expect("mock mutex poisoned") {
            return Err(ExchangeError::InsufficientMargin);
        }
        let avg_price = self
            .tickers
            .lock()
            .expect("mock mutex poisoned")
            .get(symbol)
            .map(|t| t.last_price)
            .unwrap_or(Decimal::ZERO);
        let result = OrderResult { order_id: Uuid::new_v4().to_string(), filled_qty: quantity, avg_price, status: OrderStatus::Filled };
        self.open_positions.lock().expect("mock mutex poisoned").insert(symbol.clone(), result.clone());
        Ok(result)
    }

    async fn has_open_position(&self, symbol: &Symbol) -> Result<Option<OrderResult>, ExchangeError> {
        Ok(self.open_positions.lock().expect("mock mutex poisoned").get(symbol).cloned())
    }

    async fn close_position(&self, symbol: &Symbol, _direction: Direction, quantity: Decimal) -> Result<OrderResult, ExchangeError> {
        if *self.reject_closes.lock().expect("mock mutex poisoned") {
            return Err(ExchangeError::Transient("mock: simulated close failure".to_string()));
        }
        let avg_price = self
            .tickers
            .lock()
            .expect("mock mutex poisoned")
            .get(symbol)
            .map(|t| t.last_price)
            .unwrap_or(Decimal::ZERO);
        self.open_positions.lock().expect("mock mutex poisoned").remove(symbol);
        Ok(OrderResult { order_id: Uuid::new_v4().to_string(), filled_qty: quantity, avg_price, status: OrderStatus::Filled })
    }
}
