//! Trait boundaries between the domain/application layers and the outside
//! world (exchange, storage). Infrastructure implements these; application
//! code only ever depends on the trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::errors::{ExchangeError, LedgerError};
use crate::domain::market::{Candle, Interval, OrderBook, Ticker};
use crate::domain::symbol::Symbol;
use crate::domain::trading::{Direction, Position};

/// Outcome of a successful `reserve_slot` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub reservation_id: Uuid,
    pub leverage_granted: u8,
    pub margin_granted: Decimal,
}

/// Opaque token proving exclusive rights to finalize a position's close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseToken(pub Uuid);

/// Narrow, strongly-consistent risk-accounting API (C1). Every mutation is a
/// single conditional write against the risk accumulator and/or a position
/// row; conflicts surface as `LedgerError::Contended` for the caller to retry.
#[async_trait]
pub trait RiskLedger: Send + Sync {
    async fn reserve_slot(
        &self,
        symbol: &Symbol,
        requested_margin: Decimal,
        direction: Direction,
        score: u8,
        leverage: u8,
    ) -> Result<Reservation, LedgerError>;

    async fn commit_position(
        &self,
        reservation_id: Uuid,
        entry_price: Decimal,
        quantity: Decimal,
        tp_price: Decimal,
        sl_price: Decimal,
        atr: Decimal,
    ) -> Result<(), LedgerError>;

    async fn rollback_reservation(&self, reservation_id: Uuid) -> Result<(), LedgerError>;

    async fn list_open(&self) -> Result<Vec<Position>, LedgerError>;

    async fn begin_close(&self, symbol: &Symbol, exit_reason: &str) -> Result<CloseToken, LedgerError>;

    async fn finalize_close(
        &self,
        token: CloseToken,
        exit_price: Decimal,
        realized_pnl: Decimal,
    ) -> Result<(), LedgerError>;

    async fn daily_rollover(&self, now: DateTime<Utc>) -> Result<(), LedgerError>;

    /// Reservations still in `RESERVED` state older than `older_than`; feeds
    /// the startup reconciliation sweep (SPEC_FULL.md §4.1).
    async fn list_stale_reservations(&self, older_than: DateTime<Utc>) -> Result<Vec<Position>, LedgerError>;

    /// Records one failed exchange-close cycle for a CLOSING position: bumps
    /// `consecutive_close_failures` and, once the count reaches 3, stamps
    /// `stuck_since`. Returns the updated position so the caller can decide
    /// whether the STUCK alert threshold (spec.md §7) has been reached
    /// without a separate read.
    async fn record_close_failure(&self, reservation_id: Uuid, now: DateTime<Utc>) -> Result<Position, LedgerError>;

    /// Clears a position's close-failure streak after a cycle finally
    /// succeeds. A no-op if the position was never marked as failing.
    async fn clear_close_failure(&self, reservation_id: Uuid) -> Result<(), LedgerError>;
}

/// Result of placing or closing an order on the venue.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderResult {
    pub order_id: String,
    pub filled_qty: Decimal,
    pub avg_price: Decimal,
    pub status: OrderStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Filled,
    PartiallyFilled,
    Rejected,
}

/// Typed exchange RPC boundary (spec.md §6).
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    async fn fetch_tickers(&self) -> Result<Vec<Ticker>, ExchangeError>;

    async fn fetch_candles(
        &self,
        symbol: &Symbol,
        interval: Interval,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError>;

    async fn fetch_order_book(&self, symbol: &Symbol, depth: usize) -> Result<OrderBook, ExchangeError>;

    async fn place_market_order(
        &self,
        symbol: &Symbol,
        direction: Direction,
        quantity: Decimal,
        leverage: u8,
    ) -> Result<OrderResult, ExchangeError>;

    /// Whether the venue currently shows an open position for `symbol`.
    /// Used only by the startup reconciliation sweep (SPEC_FULL.md §4.1) to
    /// decide whether a stale `RESERVED` row should be promoted or rolled
    /// back; not part of the per-tick trading path.
    async fn has_open_position(&self, symbol: &Symbol) -> Result<Option<OrderResult>, ExchangeError>;

    async fn close_position(
        &self,
        symbol: &Symbol,
        direction: Direction,
        quantity: Decimal,
    ) -> Result<OrderResult, ExchangeError>;
}
