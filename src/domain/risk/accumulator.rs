use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::domain::symbol::Symbol;

/// A reference to a reservation held against a symbol, enough for the
/// accumulator to answer "is this symbol already spoken for" without a join.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionRef {
    pub reservation_id: Uuid,
    pub margin_committed: Decimal,
}

/// The single shared mutable resource in the system (spec.md §5). Every
/// mutation goes through the ledger's conditional-write API; nothing else
/// constructs or mutates this directly outside tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAccumulator {
    pub total_reserved_risk: Decimal,
    pub active_positions: BTreeMap<Symbol, PositionRef>,
    pub daily_pnl: Decimal,
    pub daily_pnl_date: NaiveDate,
    pub daily_loss_breach_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl RiskAccumulator {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            total_reserved_risk: Decimal::ZERO,
            active_positions: BTreeMap::new(),
            daily_pnl: Decimal::ZERO,
            daily_pnl_date: now.date_naive(),
            daily_loss_breach_at: None,
            updated_at: now,
            version: 0,
        }
    }

    /// I4: circuit breaker is active once daily_pnl breaches the threshold
    /// and has not yet been cleared by a rollover.
    pub fn circuit_breaker_active(&self, breach_threshold: Decimal) -> bool {
        self.daily_loss_breach_at.is_some() || self.daily_pnl <= breach_threshold
    }

    /// I4 clock discipline: resets at UTC date boundary only.
    pub fn needs_daily_rollover(&self, now: DateTime<Utc>) -> bool {
        now.date_naive() > self.daily_pnl_date
    }
}
