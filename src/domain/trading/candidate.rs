use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::symbol::Symbol;
use crate::domain::trading::direction::Direction;

/// A scored trading opportunity emitted by the scanner for consideration by
/// the trading engine. In-memory only: never persisted, lives only within
/// the tick that created it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub symbol: Symbol,
    pub direction: Direction,
    /// 0..=100, see `ScoreBreakdown`.
    pub score: u8,
    pub price: Decimal,
    pub atr: Decimal,
    pub suggested_tp: Decimal,
    pub suggested_sl: Decimal,
    pub snapshot_time: DateTime<Utc>,
    /// Mobility rank carried from the pre-filter phase, used as the tiebreaker
    /// in candidate ordering (score desc, mobility_rank desc).
    pub mobility_rank: Decimal,
}

/// Exhaustive set of reasons a candidate never reaches an OPEN position.
///
/// Replaces the ad-hoc string-keyed skip signaling of the source system;
/// every branch in the trading engine that drops a candidate must name one
/// of these, so the skipped-trades log is exhaustive by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// No crossover detected in phase 3 scoring.
    NoCrossover,
    /// `atr_pct` fell below the hard floor during deep analysis.
    AtrTooLow,
    /// Final score fell below `MIN_MOMENTUM_SCORE`.
    BelowMinScore,
    /// Per-trade loss cap could not be satisfied even at leverage = 1.
    RiskExceeded,
    /// `reserve_slot` returned `DUPLICATE_SYMBOL`.
    DuplicateSymbol,
    /// `reserve_slot` returned `NO_CAPACITY`; no further candidates attempted.
    NoCapacity,
    /// Exchange rejected the order (insufficient margin, invalid symbol, etc).
    ExchangeRejected,
    /// Reservation was rolled back after an exchange failure.
    OrderFailed,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SkipReason::NoCrossover => "NO_CROSSOVER",
            SkipReason::AtrTooLow => "ATR_TOO_LOW",
            SkipReason::BelowMinScore => "BELOW_MIN_SCORE",
            SkipReason::RiskExceeded => "RISK_EXCEEDED",
            SkipReason::DuplicateSymbol => "DUPLICATE_SYMBOL",
            SkipReason::NoCapacity => "NO_CAPACITY",
            SkipReason::ExchangeRejected => "EXCHANGE_REJECTED",
            SkipReason::OrderFailed => "ORDER_FAILED",
        };
        write!(f, "{s}")
    }
}
