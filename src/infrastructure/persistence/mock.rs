//! Deterministic in-memory `RiskLedger` used by unit/integration tests and by
//! `LIVE_MODE=false` dry runs. Mirrors the invariant checks the sqlx-backed
//! implementation enforces via conditional writes, but serializes everything
//! behind a single mutex instead of a `version`-column compare-and-swap —
//! correct for a single process, which is all tests need.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::errors::LedgerError;
use crate::domain::ports::{CloseToken, Reservation, RiskLedger};
use crate::domain::risk::{limits::RiskLimits, RiskAccumulator};
use crate::domain::symbol::Symbol;
use crate::domain::trading::direction::Direction;
use crate::domain::trading::position::{Position, PositionStatus};

struct LedgerState {
    accumulator: RiskAccumulator,
    positions: HashMap<Uuid, Position>,
}

pub struct InMemoryRiskLedger {
    state: Mutex<LedgerState>,
    limits: RiskLimits,
}

fn permissive_limits() -> RiskLimits {
    RiskLimits {
        capital: Decimal::from(1_000_000),
        max_open_trades: 1000,
        max_portfolio_risk: Decimal::ONE,
        daily_loss_limit: Decimal::ONE,
        max_loss_per_trade: Decimal::ONE,
        max_hold_minutes: 10,
        fast_exit_minutes: 3,
        fast_exit_threshold: Decimal::new(3, 3),
        news_blackout_window_min: 10,
    }
}

impl InMemoryRiskLedger {
    /// Convenience constructor for tests that don't care about exercising
    /// I2-I4 themselves; capacity is effectively unlimited.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self::with_limits(now, permissive_limits())
    }

    pub fn with_limits(now: DateTime<Utc>, limits: RiskLimits) -> Self {
        Self {
            state: Mutex::new(LedgerState { accumulator: RiskAccumulator::new(now), positions: HashMap::new() }),
            limits,
        }
    }

    fn active_count(positions: &HashMap<Uuid, Position>) -> usize {
        positions
            .values()
            .filter(|p| matches!(p.status, PositionStatus::Reserved | PositionStatus::Open | PositionStatus::Closing))
            .count()
    }

    fn find_duplicate(positions: &HashMap<Uuid, Position>, symbol: &Symbol) -> bool {
        positions
            .values()
            .any(|p| &p.symbol == symbol && matches!(p.status, PositionStatus::Reserved | PositionStatus::Open | PositionStatus::Closing))
    }

    /// Snapshot of one position regardless of lifecycle state, for assertions
    /// that need to see CLOSING/RESERVED rows `list_open` doesn't surface.
    pub async fn get(&self, reservation_id: Uuid) -> Option<Position> {
        self.state.lock().expect("ledger mutex poisoned").positions.get(&reservation_id).cloned()
    }
}

#[async_trait]
impl RiskLedger for InMemoryRiskLedger {
    async fn reserve_slot(
        &self,
        symbol: &Symbol,
        requested_margin: Decimal,
        direction: Direction,
        score: u8,
        leverage: u8,
    ) -> Result<Reservation, LedgerError> {
        let now = Utc::now();
        let mut state = self.state.lock().expect("ledger mutex poisoned");

        if state.accumulator.circuit_breaker_active(self.limits.daily_loss_breach_threshold()) {
            return Err(LedgerError::CircuitBreaker);
        }
        if Self::find_duplicate(&state.positions, symbol) {
            return Err(LedgerError::DuplicateSymbol);
        }
        if Self::active_count(&state.positions) as u32 >= self.limits.max_open_trades {
            return Err(LedgerError::NoCapacity);
        }
        if state.accumulator.total_reserved_risk + requested_margin > self.limits.max_portfolio_margin() {
            return Err(LedgerError::NoCapacity);
        }

        let reservation_id = Uuid::new_v4();
        let position = Position {
            reservation_id,
            symbol: symbol.clone(),
            direction,
            status: PositionStatus::Reserved,
            margin_committed: requested_margin,
            leverage,
            score_at_entry: score,
            entry_price: None,
            quantity: None,
            tp_price: None,
            sl_price: None,
            atr_at_entry: None,
            exit_price: None,
            exit_reason: None,
            closed_at: None,
            realized_pnl: None,
            opened_at: None,
            reserved_at: now,
            stuck_since: None,
            consecutive_close_failures: 0,
            version: 1,
            updated_at: now,
        };

        state.accumulator.total_reserved_risk += requested_margin;
        state.accumulator.active_positions.insert(
            symbol.clone(),
            crate::domain::risk::accumulator::PositionRef { reservation_id, margin_committed: requested_margin },
        );
        state.accumulator.version += 1;
        state.positions.insert(reservation_id, position);

        Ok(Reservation { reservation_id, leverage_granted: leverage, margin_granted: requested_margin })
    }

    async fn commit_position(
        &self,
        reservation_id: Uuid,
        entry_price: Decimal,
        quantity: Decimal,
        tp_price: Decimal,
        sl_price: Decimal,
        atr: Decimal,
    ) -> Result<(), LedgerError> {
        let now = Utc::now();
        let mut state = self.state.lock().expect("ledger mutex poisoned");
        let position = state.positions.get_mut(&reservation_id).ok_or(LedgerError::UnknownReservation)?;

        match position.status {
            PositionStatus::Reserved => {
                position.status = PositionStatus::Open;
                position.entry_price = Some(entry_price);
                position.quantity = Some(quantity);
                position.tp_price = Some(tp_price);
                position.sl_price = Some(sl_price);
                position.atr_at_entry = Some(atr);
                position.opened_at = Some(now);
                position.version += 1;
                position.updated_at = now;
                Ok(())
            }
            PositionStatus::Open => Ok(()), // idempotent retry (P5)
            PositionStatus::Closing | PositionStatus::Closed => Err(LedgerError::AlreadyCommitted),
        }
    }

    async fn rollback_reservation(&self, reservation_id: Uuid) -> Result<(), LedgerError> {
        let mut state = self.state.lock().expect("ledger mutex poisoned");
        let Some(position) = state.positions.get(&reservation_id).cloned() else {
            return Ok(()); // idempotent: already gone
        };
        if !matches!(position.status, PositionStatus::Reserved) {
            return Ok(()); // idempotent: nothing to roll back anymore
        }
        state.positions.remove(&reservation_id);
        state.accumulator.active_positions.remove(&position.symbol);
        state.accumulator.total_reserved_risk -= position.margin_committed;
        state.accumulator.version += 1;
        Ok(())
    }

    async fn list_open(&self) -> Result<Vec<Position>, LedgerError> {
        let state = self.state.lock().expect("ledger mutex poisoned");
        Ok(state
            .positions
            .values()
            .filter(|p| matches!(p.status, PositionStatus::Open))
            .cloned()
            .collect())
    }

    async fn begin_close(&self, symbol: &Symbol, exit_reason: &str) -> Result<CloseToken, LedgerError> {
        let now = Utc::now();
        let mut state = self.state.lock().expect("ledger mutex poisoned");
        let position = state
            .positions
            .values_mut()
            .find(|p| &p.symbol == symbol && matches!(p.status, PositionStatus::Open | PositionStatus::Closing))
            .ok_or(LedgerError::NotOpen)?;

        match position.status {
            PositionStatus::Open => {
                position.status = PositionStatus::Closing;
                position.exit_reason = Some(exit_reason.to_string());
                position.version += 1;
                position.updated_at = now;
                Ok(CloseToken(position.reservation_id))
            }
            PositionStatus::Closing => Err(LedgerError::AlreadyClosing),
            _ => Err(LedgerError::NotOpen),
        }
    }

    async fn finalize_close(
        &self,
        token: CloseToken,
        exit_price: Decimal,
        realized_pnl: Decimal,
    ) -> Result<(), LedgerError> {
        let now = Utc::now();
        let mut state = self.state.lock().expect("ledger mutex poisoned");
        let position = state.positions.get_mut(&token.0).ok_or(LedgerError::UnknownReservation)?;
        if !matches!(position.status, PositionStatus::Closing) {
            return Err(LedgerError::NotOpen);
        }

        position.status = PositionStatus::Closed;
        position.exit_price = Some(exit_price);
        position.realized_pnl = Some(realized_pnl);
        position.closed_at = Some(now);
        position.version += 1;
        position.updated_at = now;

        let margin = position.margin_committed;
        let symbol = position.symbol.clone();

        state.accumulator.total_reserved_risk -= margin;
        state.accumulator.active_positions.remove(&symbol);
        state.accumulator.daily_pnl += realized_pnl;
        if state.accumulator.daily_loss_breach_at.is_none()
            && state.accumulator.daily_pnl <= self.limits.daily_loss_breach_threshold()
        {
            state.accumulator.daily_loss_breach_at = Some(now);
        }
        state.accumulator.version += 1;
        state.accumulator.updated_at = now;

        Ok(())
    }

    async fn daily_rollover(&self, now: DateTime<Utc>) -> Result<(), LedgerError> {
        let mut state = self.state.lock().expect("ledger mutex poisoned");
        if state.accumulator.needs_daily_rollover(now) {
            state.accumulator.daily_pnl = Decimal::ZERO;
            state.accumulator.daily_pnl_date = now.date_naive();
            state.accumulator.daily_loss_breach_at = None;
            state.accumulator.version += 1;
            state.accumulator.updated_at = now;
        }
        Ok(())
    }

    async fn list_stale_reservations(&self, older_than: DateTime<Utc>) -> Result<Vec<Position>, LedgerError> {
        let state = self.state.lock().expect("ledger mutex poisoned");
        Ok(state
            .positions
            .values()
            .filter(|p| matches!(p.status, PositionStatus::Reserved) && p.reserved_at < older_than)
            .cloned()
            .collect())
    }

    async fn record_close_failure(&self, reservation_id: Uuid, now: DateTime<Utc>) -> Result<Position, LedgerError> {
        let mut state = self.state.lock().expect("ledger mutex poisoned");
        let position = state.positions.get_mut(&reservation_id).ok_or(LedgerError::UnknownReservation)?;
        position.consecutive_close_failures = position.consecutive_close_failures.saturating_add(1);
        // stuck_since is stamped only once the 3rd consecutive failure hits
        // (spec.md §7); earlier failures just bump the counter.
        if position.stuck_since.is_none() && position.consecutive_close_failures >= 3 {
            position.stuck_since = Some(now);
        }
        position.version += 1;
        position.updated_at = now;
        Ok(position.clone())
    }

    async fn clear_close_failure(&self, reservation_id: Uuid) -> Result<(), LedgerError> {
        let mut state = self.state.lock().expect("ledger mutex poisoned");
        let Some(position) = state.positions.get_mut(&reservation_id) else { return Ok(()) };
        if position.consecutive_close_failures == 0 && position.stuck_since.is_none() {
            return Ok(());
        }
        position.consecutive_close_failures = 0;
        position.stuck_since = None;
        position.version += 1;
        position.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn ledger() -> InMemoryRiskLedger {
        InMemoryRiskLedger::with_limits(
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            RiskLimits {
                capital: dec!(10000),
                max_open_trades: 3,
                max_portfolio_risk: dec!(0.20),
                daily_loss_limit: dec!(0.05),
                max_loss_per_trade: dec!(0.02),
                max_hold_minutes: 10,
                fast_exit_minutes: 3,
                fast_exit_threshold: dec!(0.003),
                news_blackout_window_min: 10,
            },
        )
    }

    #[tokio::test]
    async fn s2_risk_cap_rejects_when_margin_exceeds_portfolio_cap() {
        let ledger = ledger();
        ledger.reserve_slot(&Symbol::new("AAA"), dec!(600), Direction::Long, 70, 3).await.unwrap();
        ledger.reserve_slot(&Symbol::new("BBB"), dec!(700), Direction::Long, 70, 3).await.unwrap();
        let result = ledger.reserve_slot(&Symbol::new("CCC"), dec!(800), Direction::Long, 70, 3).await;
        assert_eq!(result, Err(LedgerError::NoCapacity));
    }

    #[tokio::test]
    async fn s3_duplicate_symbol_rejected_while_open() {
        let ledger = ledger();
        let reservation = ledger.reserve_slot(&Symbol::new("X"), dec!(100), Direction::Long, 70, 3).await.unwrap();
        ledger.commit_position(reservation.reservation_id, dec!(100), dec!(1), dec!(104), dec!(98), dec!(1)).await.unwrap();
        let result = ledger.reserve_slot(&Symbol::new("X"), dec!(100), Direction::Long, 70, 3).await;
        assert_eq!(result, Err(LedgerError::DuplicateSymbol));
    }

    #[tokio::test]
    async fn s5_circuit_breaker_trips_and_clears_after_rollover() {
        let ledger = ledger();
        let reservation = ledger.reserve_slot(&Symbol::new("X"), dec!(100), Direction::Long, 70, 3).await.unwrap();
        ledger.commit_position(reservation.reservation_id, dec!(100), dec!(1), dec!(104), dec!(98), dec!(1)).await.unwrap();
        let token = ledger.begin_close(&Symbol::new("X"), "SL_HIT").await.unwrap();
        ledger.finalize_close(token, dec!(45), dec!(-550)).await.unwrap();

        let result = ledger.reserve_slot(&Symbol::new("Y"), dec!(100), Direction::Long, 70, 3).await;
        assert_eq!(result, Err(LedgerError::CircuitBreaker));

        ledger.daily_rollover(Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 1).unwrap()).await.unwrap();
        let result = ledger.reserve_slot(&Symbol::new("Y"), dec!(100), Direction::Long, 70, 3).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn p5_idempotent_commit() {
        let ledger = ledger();
        let reservation = ledger.reserve_slot(&Symbol::new("X"), dec!(100), Direction::Long, 70, 3).await.unwrap();
        ledger.commit_position(reservation.reservation_id, dec!(100), dec!(1), dec!(104), dec!(98), dec!(1)).await.unwrap();
        ledger.commit_position(reservation.reservation_id, dec!(100), dec!(1), dec!(104), dec!(98), dec!(1)).await.unwrap();
        let open = ledger.list_open().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].entry_price, Some(dec!(100)));
    }

    #[tokio::test]
    async fn s4_concurrent_begin_close_only_one_wins() {
        let ledger = std::sync::Arc::new(ledger());
        let reservation = ledger.reserve_slot(&Symbol::new("X"), dec!(100), Direction::Long, 70, 3).await.unwrap();
        ledger.commit_position(reservation.reservation_id, dec!(100), dec!(1), dec!(104), dec!(98), dec!(1)).await.unwrap();

        let l1 = ledger.clone();
        let l2 = ledger.clone();
        let (r1, r2) = tokio::join!(
            async move { l1.begin_close(&Symbol::new("X"), "TP_HIT").await },
            async move { l2.begin_close(&Symbol::new("X"), "TP_HIT").await },
        );
        let results = [r1, r2];
        let ok_count = results.iter().filter(|r| r.is_ok()).count();
        let already_closing_count =
            results.iter().filter(|r| matches!(r, Err(LedgerError::AlreadyClosing))).count();
        assert_eq!(ok_count, 1);
        assert_eq!(already_closing_count, 1);
    }

    #[tokio::test]
    async fn close_failure_only_flags_stuck_on_the_third_consecutive_failure() {
        let ledger = ledger();
        let reservation = ledger.reserve_slot(&Symbol::new("X"), dec!(100), Direction::Long, 70, 3).await.unwrap();
        ledger.commit_position(reservation.reservation_id, dec!(100), dec!(1), dec!(104), dec!(98), dec!(1)).await.unwrap();
        ledger.begin_close(&Symbol::new("X"), "SL_HIT").await.unwrap();

        let now = Utc.with_ymd_and_hms(2026, 1, 1, 1, 0, 0).unwrap();
        for _ in 0..2 {
            let position = ledger.record_close_failure(reservation.reservation_id, now).await.unwrap();
            assert!(position.stuck_since.is_none());
        }
        let position = ledger.record_close_failure(reservation.reservation_id, now).await.unwrap();
        assert_eq!(position.consecutive_close_failures, 3);
        assert_eq!(position.stuck_since, Some(now));

        ledger.clear_close_failure(reservation.reservation_id).await.unwrap();
        let position = ledger.get(reservation.reservation_id).await.unwrap();
        assert_eq!(position.consecutive_close_failures, 0);
        assert!(position.stuck_since.is_none());
    }

    #[tokio::test]
    async fn rollback_is_idempotent() {
        let ledger = ledger();
        let reservation = ledger.reserve_slot(&Symbol::new("X"), dec!(100), Direction::Long, 70, 3).await.unwrap();
        ledger.rollback_reservation(reservation.reservation_id).await.unwrap();
        ledger.rollback_reservation(reservation.reservation_id).await.unwrap();
        assert!(ledger.list_open().await.unwrap().is_empty());
    }
}
