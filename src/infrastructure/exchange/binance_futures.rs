use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use crate::domain::errors::ExchangeError;
use crate::domain::market::{Candle, Interval, OrderBook};
use crate::domain::market::order_book::Level;
use crate::domain::market::ticker::Ticker;
use crate::domain::ports::{ExchangeGateway, OrderResult, OrderStatus};
use crate::domain::symbol::Symbol;
use crate::domain::trading::direction::Direction;
use async_trait::async_trait;

type HmacSha256 = Hmac<Sha256>;

/// Signed REST client for Binance-style USDT-M perpetual futures. Raw venue
/// RPCs only; caching and the gateway-logical retry/backoff live one layer
/// up in `application::market_data`, matching the teacher's split between a
/// thin venue client and the service that wraps it.
pub struct BinanceFuturesGateway {
    client: ClientWithMiddleware,
    base_url: Url,
    api_key: String,
    api_secret: String,
    live_mode: bool,
}

impl BinanceFuturesGateway {
    pub fn new(client: ClientWithMiddleware, base_url: &str, api_key: String, api_secret: String, live_mode: bool) -> anyhow::Result<Self> {
        Ok(Self { client, base_url: Url::parse(base_url)?, api_key, api_secret, live_mode })
    }

    fn sign(&self, query: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes()).expect("hmac accepts any key length");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn signed_query(&self, mut params: Vec<(String, String)>) -> String {
        params.push(("timestamp".to_string(), Utc::now().timestamp_millis().to_string()));
        let query = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        let signature = self.sign(&query);
        format!("{query}&signature={signature}")
    }

    fn classify_status(&self, status: reqwest::StatusCode) -> Option<ExchangeError> {
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Some(ExchangeError::RateLimited)
        } else if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            Some(ExchangeError::Unauthorized)
        } else if status.is_server_error() {
            Some(ExchangeError::Transient(format!("venue returned {status}")))
        } else {
            None
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawTicker24h {
    symbol: String,
    #[serde(rename = "lastPrice")]
    last_price: Decimal,
    #[serde(rename = "quoteVolume")]
    quote_volume: Decimal,
}

/// Binance's kline wire format is a 12-element heterogeneous array; only
/// the first six fields matter here, so this deserializes the whole row as
/// raw JSON values and indexes into it rather than modeling all 12 fields.
#[derive(Debug, Deserialize)]
struct RawKline(Vec<serde_json::Value>);

impl RawKline {
    fn open_time_ms(&self) -> i64 {
        self.0[0].as_i64().unwrap_or(0)
    }

    fn decimal_at(&self, index: usize) -> Decimal {
        self.0[index].as_str().and_then(|s| s.parse().ok()).unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct RawDepth {
    bids: Vec<[String; 2]>,
    asks: Vec<[String; 2]>,
}

#[async_trait]
impl ExchangeGateway for BinanceFuturesGateway {
    async fn fetch_tickers(&self) -> Result<Vec<Ticker>, ExchangeError> {
        let url = self.base_url.join("/fapi/v1/ticker/24hr").expect("static path is valid");
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ExchangeError::Transient(e.to_string()))?;

        if let Some(err) = self.classify_status(resp.status()) {
            return Err(err);
        }

        let raw: Vec<RawTicker24h> = resp.json().await.map_err(|e| ExchangeError::Unknown(e.to_string()))?;
        let now = Utc::now();
        Ok(raw
            .into_iter()
            .map(|r| Ticker { symbol: Symbol::new(r.symbol), last_price: r.last_price, quote_volume_24h: r.quote_volume, timestamp: now })
            .collect())
    }

    async fn fetch_candles(&self, symbol: &Symbol, interval: Interval, limit: usize) -> Result<Vec<Candle>, ExchangeError> {
        let url = self.base_url.join("/fapi/v1/klines").expect("static path is valid");
        let resp = self
            .client
            .get(url)
            .query(&[
                ("symbol", symbol.as_str()),
                ("interval", interval.as_venue_str()),
                ("limit", &limit.to_string()),
            ])
            .send()
            .await
            .map_err(|e| ExchangeError::Transient(e.to_string()))?;

        if let Some(err) = self.classify_status(resp.status()) {
            return Err(err);
        }

        let raw: Vec<RawKline> = resp.json().await.map_err(|e| ExchangeError::Unknown(e.to_string()))?;
        Ok(raw
            .into_iter()
            .map(|k| Candle {
                open_time: chrono::DateTime::from_timestamp_millis(k.open_time_ms()).unwrap_or_else(Utc::now),
                open: k.decimal_at(1),
                high: k.decimal_at(2),
                low: k.decimal_at(3),
                close: k.decimal_at(4),
                volume: k.decimal_at(5),
            })
            .collect())
    }

    async fn fetch_order_book(&self, symbol: &Symbol, depth: usize) -> Result<OrderBook, ExchangeError> {
        let url = self.base_url.join("/fapi/v1/depth").expect("static path is valid");
        let resp = self
            .client
            .get(url)
            .query(&[("symbol", symbol.as_str()), ("limit", &depth.min(20).to_string())])
            .send()
            .await
            .map_err(|e| ExchangeError::Transient(e.to_string()))?;

        if let Some(err) = self.classify_status(resp.status()) {
            return Err(err);
        }

        let raw: RawDepth = resp.json().await.map_err(|e| ExchangeError::Unknown(e.to_string()))?;
        let parse_level = |pair: &[String; 2]| Level {
            price: pair[0].parse().unwrap_or_default(),
            quantity: pair[1].parse().unwrap_or_default(),
        };
        Ok(OrderBook {
            bids: raw.bids.iter().map(parse_level).collect(),
            asks: raw.asks.iter().map(parse_level).collect(),
        })
    }

    async fn place_market_order(
        &self,
        symbol: &Symbol,
        direction: Direction,
        quantity: Decimal,
        leverage: u8,
    ) -> Result<OrderResult, ExchangeError> {
        if !self.live_mode {
            info!(symbol = %symbol, %quantity, leverage, direction = %direction, "paper order acknowledged without reaching the venue (LIVE_MODE=false)");
            return Ok(OrderResult { order_id: Uuid::new_v4().to_string(), filled_qty: quantity, avg_price: Decimal::ZERO, status: OrderStatus::Filled });
        }

        let side = match direction {
            Direction::Long => "BUY",
            Direction::Short => "SELL",
        };
        let query = self.signed_query(vec![
            ("symbol".to_string(), symbol.as_str().to_string()),
            ("side".to_string(), side.to_string()),
            ("type".to_string(), "MARKET".to_string()),
            ("quantity".to_string(), quantity.to_string()),
            ("leverage".to_string(), leverage.to_string()),
        ]);
        let url = self.base_url.join(&format!("/fapi/v1/order?{query}")).expect("signed query is valid url encoding");

        let resp = self
            .client
            .post(url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| ExchangeError::Transient(e.to_string()))?;

        if let Some(err) = self.classify_status(resp.status()) {
            return Err(err);
        }
        if resp.status() == reqwest::StatusCode::BAD_REQUEST {
            warn!(symbol = %symbol, "venue rejected order");
            return Err(ExchangeError::InsufficientMargin);
        }

        #[derive(Deserialize)]
        struct RawOrderAck {
            #[serde(rename = "orderId")]
            order_id: i64,
            #[serde(rename = "executedQty")]
            executed_qty: Decimal,
            #[serde(rename = "avgPrice")]
            avg_price: Decimal,
        }
        let ack: RawOrderAck = resp.json().await.map_err(|e| ExchangeError::Unknown(e.to_string()))?;
        Ok(OrderResult { order_id: ack.order_id.to_string(), filled_qty: ack.executed_qty, avg_price: ack.avg_price, status: OrderStatus::Filled })
    }

    async fn has_open_position(&self, symbol: &Symbol) -> Result<Option<OrderResult>, ExchangeError> {
        if !self.live_mode {
            return Ok(None);
        }
        let query = self.signed_query(vec![("symbol".to_string(), symbol.as_str().to_string())]);
        let url = self.base_url.join(&format!("/fapi/v2/positionRisk?{query}")).expect("signed query is valid url encoding");

        let resp = self
            .client
            .get(url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| ExchangeError::Transient(e.to_string()))?;
        if let Some(err) = self.classify_status(resp.status()) {
            return Err(err);
        }

        #[derive(Deserialize)]
        struct RawPositionRisk {
            #[serde(rename = "positionAmt")]
            position_amt: Decimal,
            #[serde(rename = "entryPrice")]
            entry_price: Decimal,
        }
        let raw: Vec<RawPositionRisk> = resp.json().await.map_err(|e| ExchangeError::Unknown(e.to_string()))?;
        Ok(raw
            .into_iter()
            .find(|p| !p.position_amt.is_zero())
            .map(|p| OrderResult { order_id: String::new(), filled_qty: p.position_amt.abs(), avg_price: p.entry_price, status: OrderStatus::Filled }))
    }

    async fn close_position(&self, symbol: &Symbol, direction: Direction, quantity: Decimal) -> Result<OrderResult, ExchangeError> {
        if !self.live_mode {
            info!(symbol = %symbol, %quantity, "paper close acknowledged without reaching the venue (LIVE_MODE=false)");
            return Ok(OrderResult { order_id: Uuid::new_v4().to_string(), filled_qty: quantity, avg_price: Decimal::ZERO, status: OrderStatus::Filled });
        }

        // Closing reverses the original side.
        let side = match direction {
            Direction::Long => "SELL",
            Direction::Short => "BUY",
        };
        let query = self.signed_query(vec![
            ("symbol".to_string(), symbol.as_str().to_string()),
            ("side".to_string(), side.to_string()),
            ("type".to_string(), "MARKET".to_string()),
            ("quantity".to_string(), quantity.to_string()),
            ("reduceOnly".to_string(), "true".to_string()),
        ]);
        let url = self.base_url.join(&format!("/fapi/v1/order?{query}")).expect("signed query is valid url encoding");

        let resp = self
            .client
            .post(url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| ExchangeError::Transient(e.to_string()))?;
        if let Some(err) = self.classify_status(resp.status()) {
            return Err(err);
        }

        #[derive(Deserialize)]
        struct RawOrderAck {
            #[serde(rename = "orderId")]
            order_id: i64,
            #[serde(rename = "executedQty")]
            executed_qty: Decimal,
            #[serde(rename = "avgPrice")]
            avg_price: Decimal,
        }
        let ack: RawOrderAck = resp.json().await.map_err(|e| ExchangeError::Unknown(e.to_string()))?;
        Ok(OrderResult { order_id: ack.order_id.to_string(), filled_qty: ack.executed_qty, avg_price: ack.avg_price, status: OrderStatus::Filled })
    }
}
