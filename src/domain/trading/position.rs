use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::symbol::Symbol;
use crate::domain::trading::direction::Direction;

/// Lifecycle state of a persisted `Position`. Transitions are owned
/// exclusively by the risk ledger; nothing outside `application::risk_ledger`
/// writes this field directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    /// Tentative claim on risk capacity; no exchange order placed yet.
    Reserved,
    Open,
    /// `begin_close` has been called; a Closer worker owns the exit.
    Closing,
    Closed,
}

/// The central persisted entity. One row per (symbol, lifecycle), with at
/// most one row in `{Reserved, Open, Closing}` per symbol (invariant I1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub reservation_id: Uuid,
    pub symbol: Symbol,
    pub direction: Direction,
    pub status: PositionStatus,

    pub margin_committed: Decimal,
    pub leverage: u8,
    pub score_at_entry: u8,

    // Present once RESERVED -> OPEN (`commit_position`).
    pub entry_price: Option<Decimal>,
    pub quantity: Option<Decimal>,
    pub tp_price: Option<Decimal>,
    pub sl_price: Option<Decimal>,
    pub atr_at_entry: Option<Decimal>,

    // Present once CLOSING -> CLOSED (`finalize_close`).
    pub exit_price: Option<Decimal>,
    pub exit_reason: Option<String>,
    pub closed_at: Option<DateTime<Utc>>,
    pub realized_pnl: Option<Decimal>,

    pub opened_at: Option<DateTime<Utc>>,
    pub reserved_at: DateTime<Utc>,

    /// Set once `consecutive_close_failures` reaches 3: the position is
    /// flagged STUCK and an operator alert is raised (spec.md §7). `None`
    /// while failures are still below that threshold.
    pub stuck_since: Option<DateTime<Utc>>,
    pub consecutive_close_failures: u8,

    /// Optimistic-concurrency token; incremented by the store on every
    /// accepted conditional write.
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    pub fn is_stuck(&self) -> bool {
        self.stuck_since.is_some()
    }

    /// Unrealized P&L percentage against the given mark price, signed so
    /// that a profitable move is positive regardless of direction.
    pub fn unrealized_pnl_pct(&self, mark_price: Decimal) -> Option<Decimal> {
        let entry = self.entry_price?;
        if entry.is_zero() {
            return None;
        }
        let raw = (mark_price - entry) / entry * Decimal::ONE_HUNDRED;
        Some(match self.direction {
            Direction::Long => raw,
            Direction::Short => -raw,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn base_position() -> Position {
        Position {
            reservation_id: Uuid::new_v4(),
            symbol: Symbol::new("BTCUSDT"),
            direction: Direction::Long,
            status: PositionStatus::Open,
            margin_committed: dec!(100),
            leverage: 5,
            score_at_entry: 80,
            entry_price: Some(dec!(100)),
            quantity: Some(dec!(1)),
            tp_price: Some(dec!(104)),
            sl_price: Some(dec!(98)),
            atr_at_entry: Some(dec!(1)),
            exit_price: None,
            exit_reason: None,
            closed_at: None,
            realized_pnl: None,
            opened_at: Some(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()),
            reserved_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            stuck_since: None,
            consecutive_close_failures: 0,
            version: 1,
            updated_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn unrealized_pnl_pct_long_is_positive_on_price_rise() {
        let pos = base_position();
        assert_eq!(pos.unrealized_pnl_pct(dec!(101)), Some(dec!(1.00)));
    }

    #[test]
    fn unrealized_pnl_pct_short_is_positive_on_price_drop() {
        let mut pos = base_position();
        pos.direction = Direction::Short;
        assert_eq!(pos.unrealized_pnl_pct(dec!(99)), Some(dec!(1.00)));
    }

    #[test]
    fn is_stuck_reflects_marker() {
        let mut pos = base_position();
        assert!(!pos.is_stuck());
        pos.stuck_since = Some(Utc.with_ymd_and_hms(2026, 1, 1, 1, 0, 0).unwrap());
        assert!(pos.is_stuck());
    }
}
