use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::domain::errors::{ExchangeError, GatewayError};
use crate::domain::market::{Candle, Interval, OrderBook, Ticker};
use crate::domain::ports::ExchangeGateway;
use crate::domain::symbol::Symbol;
use crate::infrastructure::core::backoff::{retry_with_backoff, BackoffSchedule};
use crate::infrastructure::core::token_bucket::TokenBucket;

const TICKER_TTL: Duration = Duration::from_secs(30);
const ORDER_BOOK_TTL: Duration = Duration::from_secs(5);
const RATE_LIMIT_WAIT: Duration = Duration::from_secs(2);

fn gateway_retry_schedule() -> BackoffSchedule {
    BackoffSchedule::fixed([Duration::from_millis(200), Duration::from_millis(500), Duration::from_millis(1200)])
}

fn is_transient(err: &ExchangeError) -> bool {
    matches!(err, ExchangeError::Transient(_) | ExchangeError::RateLimited)
}

struct TickerCache {
    fetched_at: Instant,
    tickers: HashMap<Symbol, Ticker>,
}

struct CandleCacheEntry {
    candles: Vec<Candle>,
}

struct OrderBookCacheEntry {
    fetched_at: Instant,
    book: OrderBook,
}

/// Caching, rate-limited, retrying facade over the raw `ExchangeGateway`
/// RPCs (spec.md §4.2). One instance lives for the lifetime of a worker
/// process; caches amortize cost across consecutive ticks of the same
/// warm worker, never shared across processes (spec.md §5).
pub struct MarketDataGateway {
    exchange: Arc<dyn ExchangeGateway>,
    rate_limiter: TokenBucket,
    ticker_cache: Mutex<Option<TickerCache>>,
    candle_cache: Mutex<HashMap<(Symbol, &'static str), CandleCacheEntry>>,
    order_book_cache: Mutex<HashMap<Symbol, OrderBookCacheEntry>>,
}

impl MarketDataGateway {
    pub fn new(exchange: Arc<dyn ExchangeGateway>, venue_rate_limit_per_sec: u32) -> Self {
        Self {
            exchange,
            rate_limiter: TokenBucket::at_ninety_percent_of(venue_rate_limit_per_sec),
            ticker_cache: Mutex::new(None),
            candle_cache: Mutex::new(HashMap::new()),
            order_book_cache: Mutex::new(HashMap::new()),
        }
    }

    async fn guarded_call<T, Op, Fut>(&self, op: Op) -> Result<T, ExchangeError>
    where
        Op: FnMut(usize) -> Fut,
        Fut: std::future::Future<Output = Result<T, ExchangeError>>,
    {
        if !self.rate_limiter.acquire(RATE_LIMIT_WAIT).await {
            return Err(ExchangeError::Transient("token bucket exhausted".to_string()));
        }
        retry_with_backoff(&gateway_retry_schedule(), op, is_transient).await
    }

    /// Single batch fetch of all perpetuals, TTL 30s.
    pub async fn tickers(&self) -> Result<HashMap<Symbol, Ticker>, GatewayError> {
        {
            let cache = self.ticker_cache.lock().expect("ticker cache mutex poisoned");
            if let Some(entry) = cache.as_ref() {
                if entry.fetched_at.elapsed() < TICKER_TTL {
                    return Ok(entry.tickers.clone());
                }
            }
        }

        let exchange = &self.exchange;
        let fetched = self
            .guarded_call(|_attempt| exchange.fetch_tickers())
            .await
            .map_err(|_| GatewayError::Unavailable("*".to_string()))?;

        let map: HashMap<Symbol, Ticker> = fetched.into_iter().map(|t| (t.symbol.clone(), t)).collect();
        *self.ticker_cache.lock().expect("ticker cache mutex poisoned") =
            Some(TickerCache { fetched_at: Instant::now(), tickers: map.clone() });
        Ok(map)
    }

    /// Candle series for (symbol, interval), incrementally merged with
    /// whatever is already cached for this worker (spec.md §4.2).
    pub async fn candles(&self, symbol: &Symbol, interval: Interval) -> Result<Vec<Candle>, GatewayError> {
        let depth = interval.cache_depth();
        let key = (symbol.clone(), interval.as_venue_str());

        let cached_head = {
            let cache = self.candle_cache.lock().expect("candle cache mutex poisoned");
            cache.get(&key).map(|e| e.candles.clone())
        };

        // Without cached history we need a full window; with it, a small
        // tail fetch is enough to pick up newly-closed candles.
        let fetch_limit = if cached_head.is_some() { 5usize } else { depth };

        let exchange = &self.exchange;
        let fetched = self
            .guarded_call(|_attempt| exchange.fetch_candles(symbol, interval, fetch_limit))
            .await
            .map_err(|_| GatewayError::Unavailable(symbol.to_string()))?;

        let merged = match cached_head {
            Some(mut existing) => {
                for candle in fetched {
                    match existing.iter().position(|c| c.open_time == candle.open_time) {
                        Some(idx) => existing[idx] = candle,
                        None => existing.push(candle),
                    }
                }
                existing.sort_by_key(|c| c.open_time);
                if existing.len() > depth {
                    let start = existing.len() - depth;
                    existing.drain(..start);
                }
                existing
            }
            None => fetched,
        };

        self.candle_cache
            .lock()
            .expect("candle cache mutex poisoned")
            .insert(key, CandleCacheEntry { candles: merged.clone() });
        Ok(merged)
    }

    /// Order book snapshot, TTL 5s, depth capped at 20.
    pub async fn order_book(&self, symbol: &Symbol, depth: usize) -> Result<OrderBook, GatewayError> {
        {
            let cache = self.order_book_cache.lock().expect("order book cache mutex poisoned");
            if let Some(entry) = cache.get(symbol) {
                if entry.fetched_at.elapsed() < ORDER_BOOK_TTL {
                    return Ok(entry.book.clone());
                }
            }
        }

        let capped = depth.min(20);
        let exchange = &self.exchange;
        let book = self
            .guarded_call(|_attempt| exchange.fetch_order_book(symbol, capped))
            .await
            .map_err(|_| GatewayError::Unavailable(symbol.to_string()))?;

        self.order_book_cache
            .lock()
            .expect("order book cache mutex poisoned")
            .insert(symbol.clone(), OrderBookCacheEntry { fetched_at: Instant::now(), book: book.clone() });
        Ok(book)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::exchange::mock::MockExchangeGateway;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn ticker(symbol: &str, price: rust_decimal::Decimal) -> Ticker {
        Ticker { symbol: Symbol::new(symbol), last_price: price, quote_volume_24h: dec!(10_000_000), timestamp: Utc::now() }
    }

    #[tokio::test]
    async fn tickers_are_cached_within_ttl() {
        let mock = Arc::new(MockExchangeGateway::new());
        mock.seed_ticker(ticker("BTCUSDT", dec!(100)));
        let gw = MarketDataGateway::new(mock.clone(), 1200);

        let first = gw.tickers().await.unwrap();
        assert_eq!(first.len(), 1);

        // Mutate the underlying venue state; cached read should not see it.
        mock.seed_ticker(ticker("ETHUSDT", dec!(50)));
        let second = gw.tickers().await.unwrap();
        assert_eq!(second.len(), 1, "second call within TTL should be served from cache");
    }

    #[tokio::test]
    async fn candles_merge_incrementally() {
        let mock = Arc::new(MockExchangeGateway::new());
        let symbol = Symbol::new("BTCUSDT");
        let base_time = Utc::now();
        let candle = |i: i64| Candle {
            open_time: base_time + chrono::Duration::minutes(i),
            open: dec!(100),
            high: dec!(101),
            low: dec!(99),
            close: dec!(100),
            volume: dec!(10),
        };
        mock.seed_candles(&symbol, Interval::OneMinute, (0..60).map(candle).collect());
        let gw = MarketDataGateway::new(mock, 1200);

        let result = gw.candles(&symbol, Interval::OneMinute).await.unwrap();
        assert_eq!(result.len(), 60);
    }

    #[tokio::test]
    async fn unseeded_symbol_is_unavailable() {
        let mock = Arc::new(MockExchangeGateway::new());
        let gw = MarketDataGateway::new(mock, 1200);
        let result = gw.candles(&Symbol::new("NOPE"), Interval::OneMinute).await;
        assert!(matches!(result, Err(GatewayError::Unavailable(_))));
    }
}
