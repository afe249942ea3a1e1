use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, info, warn};

use crate::application::market_data::MarketDataGateway;
use crate::domain::errors::CloserError;
use crate::domain::ports::{ExchangeGateway, RiskLedger};
use crate::domain::risk::RiskLimits;
use crate::domain::symbol::Symbol;
use crate::domain::trading::direction::Direction;
use crate::domain::trading::position::Position;
use crate::infrastructure::core::backoff::{retry_with_backoff, BackoffSchedule};
use crate::infrastructure::persistence::HistoryRepository;

use super::exit_rules::{evaluate_exit, ExitTrigger};

/// Source of externally-flagged news blackout windows (spec.md §4.5 trigger
/// 3). No concrete feed is specified; this is the seam a future integration
/// plugs into. `NoBlackoutFeed` is the default no-op.
#[async_trait]
pub trait NewsBlackoutFeed: Send + Sync {
    async fn starts_within(&self, symbol: &Symbol, window_minutes: i64) -> bool;
}

pub struct NoBlackoutFeed;

#[async_trait]
impl NewsBlackoutFeed for NoBlackoutFeed {
    async fn starts_within(&self, _symbol: &Symbol, _window_minutes: i64) -> bool {
        false
    }
}

fn close_retry_schedule() -> BackoffSchedule {
    BackoffSchedule::fixed([Duration::from_millis(300), Duration::from_millis(800), Duration::from_millis(1500)])
}

/// C5: evaluates the exit state machine for every OPEN position and drives
/// it through `begin_close` / exchange close / `finalize_close` (spec.md
/// §4.5). Stateless across invocations; safe to run as several concurrent
/// staggered workers (spec.md §5).
pub struct PositionCloser {
    ledger: Arc<dyn RiskLedger>,
    exchange: Arc<dyn ExchangeGateway>,
    market_data: Arc<MarketDataGateway>,
    history: Arc<HistoryRepository>,
    news_feed: Arc<dyn NewsBlackoutFeed>,
    limits: RiskLimits,
}

impl PositionCloser {
    pub fn new(
        ledger: Arc<dyn RiskLedger>,
        exchange: Arc<dyn ExchangeGateway>,
        market_data: Arc<MarketDataGateway>,
        history: Arc<HistoryRepository>,
        news_feed: Arc<dyn NewsBlackoutFeed>,
        limits: RiskLimits,
    ) -> Self {
        Self { ledger, exchange, market_data, history, news_feed, limits }
    }

    pub async fn closer_tick(&self) -> Result<usize, CloserError> {
        let open = self.ledger.list_open().await?;
        let mut closed = 0;
        for position in open {
            if self.evaluate_and_close(&position).await? {
                closed += 1;
            }
        }
        Ok(closed)
    }

    async fn evaluate_and_close(&self, position: &Position) -> Result<bool, CloserError> {
        let tickers = match self.market_data.tickers().await {
            Ok(t) => t,
            Err(_) => {
                warn!(symbol = %position.symbol, "could not refresh mark price this cycle");
                return Ok(false);
            }
        };
        let Some(ticker) = tickers.get(&position.symbol) else {
            return Ok(false);
        };

        let blackout = self.news_feed.starts_within(&position.symbol, self.limits.news_blackout_window_min).await;
        let Some(trigger) = evaluate_exit(position, ticker.last_price, Utc::now(), &self.limits, blackout) else {
            return Ok(false);
        };

        self.close_position(position, trigger).await
    }

    async fn close_position(&self, position: &Position, trigger: ExitTrigger) -> Result<bool, CloserError> {
        let token = match self.ledger.begin_close(&position.symbol, trigger.reason_code()).await {
            Ok(token) => token,
            Err(crate::domain::errors::LedgerError::AlreadyClosing) => {
                info!(symbol = %position.symbol, "another worker already owns this close");
                return Ok(false);
            }
            Err(crate::domain::errors::LedgerError::NotOpen) => {
                warn!(symbol = %position.symbol, "position no longer OPEN; deferring to reconciliation");
                return Ok(false);
            }
            Err(other) => return Err(other.into()),
        };

        let Some(quantity) = position.quantity else {
            error!(symbol = %position.symbol, "CLOSING position missing quantity; cannot submit close order");
            return Ok(false);
        };

        let exchange = &self.exchange;
        let symbol = &position.symbol;
        let direction = position.direction;
        let order = retry_with_backoff(
            &close_retry_schedule(),
            |_attempt| exchange.close_position(symbol, direction, quantity),
            |e| matches!(e, crate::domain::errors::ExchangeError::Transient(_) | crate::domain::errors::ExchangeError::RateLimited),
        )
        .await;

        match order {
            Ok(order) => {
                let entry = position.entry_price.unwrap_or(order.avg_price);
                let pnl = Self::realized_pnl(direction, entry, order.avg_price, order.filled_qty, position.leverage);
                self.ledger.finalize_close(token, order.avg_price, pnl).await?;
                self.ledger.clear_close_failure(position.reservation_id).await.ok();
                let mut record = position.clone();
                record.exit_price = Some(order.avg_price);
                record.realized_pnl = Some(pnl);
                record.closed_at = Some(Utc::now());
                record.exit_reason = Some(trigger.reason_code().to_string());
                self.history.record_trade(&record).await.ok();
                info!(symbol = %position.symbol, reason = trigger.reason_code(), pnl = %pnl, "position closed");
                Ok(true)
            }
            Err(_) => {
                error!(symbol = %position.symbol, "exchange close exhausted retries; position left CLOSING for next cycle");
                match self.ledger.record_close_failure(position.reservation_id, Utc::now()).await {
                    Ok(updated) if updated.consecutive_close_failures >= 3 => {
                        error!(
                            symbol = %position.symbol,
                            consecutive_failures = updated.consecutive_close_failures,
                            stuck_since = ?updated.stuck_since,
                            "position STUCK: unable to close after 3 consecutive cycles, operator intervention required"
                        );
                    }
                    Ok(_) => {}
                    Err(err) => warn!(symbol = %position.symbol, error = %err, "failed to record close-failure streak"),
                }
                Ok(false)
            }
        }
    }

    fn realized_pnl(direction: Direction, entry: rust_decimal::Decimal, exit: rust_decimal::Decimal, quantity: rust_decimal::Decimal, _leverage: u8) -> rust_decimal::Decimal {
        match direction {
            Direction::Long => (exit - entry) * quantity,
            Direction::Short => (entry - exit) * quantity,
        }
    }
}
