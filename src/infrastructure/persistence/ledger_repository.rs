use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::Row;
use uuid::Uuid;

use crate::domain::errors::LedgerError;
use crate::domain::ports::{CloseToken, Reservation, RiskLedger};
use crate::domain::risk::limits::RiskLimits;
use crate::domain::symbol::Symbol;
use crate::domain::trading::direction::Direction;
use crate::domain::trading::position::{Position, PositionStatus};

use super::database::Database;

/// `RiskLedger` backed by SQLite through `sqlx`. Every mutation is a single
/// conditional write keyed on the position's `version` column (spec.md §6:
/// "conditional atomic update... with a condition expression over its
/// current content"); a zero-row-affected update means another worker won
/// the race, surfaced to the caller as `LedgerError::Contended` for the
/// bounded retry in `application::risk_ledger::retry`.
pub struct SqliteRiskLedger {
    db: Database,
    limits: RiskLimits,
}

fn status_str(status: PositionStatus) -> &'static str {
    match status {
        PositionStatus::Reserved => "RESERVED",
        PositionStatus::Open => "OPEN",
        PositionStatus::Closing => "CLOSING",
        PositionStatus::Closed => "CLOSED",
    }
}

fn parse_status(s: &str) -> PositionStatus {
    match s {
        "RESERVED" => PositionStatus::Reserved,
        "OPEN" => PositionStatus::Open,
        "CLOSING" => PositionStatus::Closing,
        _ => PositionStatus::Closed,
    }
}

fn direction_str(d: Direction) -> &'static str {
    match d {
        Direction::Long => "LONG",
        Direction::Short => "SHORT",
    }
}

fn parse_direction(s: &str) -> Direction {
    if s == "SHORT" { Direction::Short } else { Direction::Long }
}

fn opt_decimal(s: Option<String>) -> Option<Decimal> {
    s.and_then(|v| Decimal::from_str(&v).ok())
}

fn opt_timestamp(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|v| DateTime::parse_from_rfc3339(&v).ok()).map(|dt| dt.with_timezone(&Utc))
}

fn row_to_position(row: &sqlx::sqlite::SqliteRow) -> Position {
    Position {
        reservation_id: Uuid::parse_str(row.get::<String, _>("reservation_id").as_str()).expect("stored uuid is valid"),
        symbol: Symbol::new(row.get::<String, _>("symbol")),
        direction: parse_direction(&row.get::<String, _>("direction")),
        status: parse_status(&row.get::<String, _>("status")),
        margin_committed: Decimal::from_str(&row.get::<String, _>("margin_committed")).unwrap_or_default(),
        leverage: row.get::<i64, _>("leverage") as u8,
        score_at_entry: row.get::<i64, _>("score_at_entry") as u8,
        entry_price: opt_decimal(row.get("entry_price")),
        quantity: opt_decimal(row.get("quantity")),
        tp_price: opt_decimal(row.get("tp_price")),
        sl_price: opt_decimal(row.get("sl_price")),
        atr_at_entry: opt_decimal(row.get("atr_at_entry")),
        exit_price: opt_decimal(row.get("exit_price")),
        exit_reason: row.get("exit_reason"),
        closed_at: opt_timestamp(row.get("closed_at")),
        realized_pnl: opt_decimal(row.get("realized_pnl")),
        opened_at: opt_timestamp(row.get("opened_at")),
        reserved_at: DateTime::parse_from_rfc3339(&row.get::<String, _>("reserved_at"))
            .expect("stored timestamp is valid")
            .with_timezone(&Utc),
        stuck_since: opt_timestamp(row.get("stuck_since")),
        consecutive_close_failures: row.get::<i64, _>("consecutive_close_failures") as u8,
        version: row.get::<i64, _>("version"),
        updated_at: DateTime::parse_from_rfc3339(&row.get::<String, _>("updated_at"))
            .expect("stored timestamp is valid")
            .with_timezone(&Utc),
    }
}

impl SqliteRiskLedger {
    pub fn new(db: Database, limits: RiskLimits) -> Self {
        Self { db, limits }
    }

    async fn fetch_accumulator_state(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    ) -> Result<(Decimal, Decimal, chrono::NaiveDate, Option<DateTime<Utc>>), LedgerError> {
        let row = sqlx::query(
            "SELECT total_reserved_risk, daily_pnl, daily_pnl_date, daily_loss_breach_at FROM risk_accumulator WHERE id = 1",
        )
        .fetch_optional(&mut **tx)
        .await
        .map_err(|_| LedgerError::Contended)?;

        match row {
            Some(r) => {
                let total = Decimal::from_str(&r.get::<String, _>("total_reserved_risk")).unwrap_or_default();
                let daily_pnl = Decimal::from_str(&r.get::<String, _>("daily_pnl")).unwrap_or_default();
                let date = chrono::NaiveDate::parse_from_str(&r.get::<String, _>("daily_pnl_date"), "%Y-%m-%d")
                    .unwrap_or_else(|_| Utc::now().date_naive());
                let breach = opt_timestamp(r.get("daily_loss_breach_at"));
                Ok((total, daily_pnl, date, breach))
            }
            None => {
                let now = Utc::now();
                sqlx::query(
                    "INSERT INTO risk_accumulator (id, total_reserved_risk, daily_pnl, daily_pnl_date, daily_loss_breach_at, version, updated_at) VALUES (1, '0', '0', ?, NULL, 0, ?)",
                )
                .bind(now.date_naive().to_string())
                .bind(now.to_rfc3339())
                .execute(&mut **tx)
                .await
                .map_err(|_| LedgerError::Contended)?;
                Ok((Decimal::ZERO, Decimal::ZERO, now.date_naive(), None))
            }
        }
    }
}

#[async_trait]
impl RiskLedger for SqliteRiskLedger {
    async fn reserve_slot(
        &self,
        symbol: &Symbol,
        requested_margin: Decimal,
        direction: Direction,
        score: u8,
        leverage: u8,
    ) -> Result<Reservation, LedgerError> {
        let now = Utc::now();
        let mut tx = self.db.pool.begin().await.map_err(|_| LedgerError::Contended)?;

        let (total_reserved, daily_pnl, _date, breach_at) = Self::fetch_accumulator_state(&mut tx).await?;
        if breach_at.is_some() || daily_pnl <= self.limits.daily_loss_breach_threshold() {
            return Err(LedgerError::CircuitBreaker);
        }

        let active_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM positions WHERE status IN ('RESERVED','OPEN','CLOSING')")
            .fetch_one(&mut *tx)
            .await
            .map_err(|_| LedgerError::Contended)?;
        if active_count as u32 >= self.limits.max_open_trades {
            return Err(LedgerError::NoCapacity);
        }

        let duplicate: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM positions WHERE symbol = ? AND status IN ('RESERVED','OPEN','CLOSING')",
        )
        .bind(symbol.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(|_| LedgerError::Contended)?;
        if duplicate > 0 {
            return Err(LedgerError::DuplicateSymbol);
        }

        if total_reserved + requested_margin > self.limits.max_portfolio_margin() {
            return Err(LedgerError::NoCapacity);
        }

        let reservation_id = Uuid::new_v4();
        let insert_result = sqlx::query(
            r#"INSERT INTO positions
               (reservation_id, symbol, direction, status, margin_committed, leverage, score_at_entry,
                reserved_at, consecutive_close_failures, version, updated_at)
               VALUES (?, ?, ?, 'RESERVED', ?, ?, ?, ?, 0, 1, ?)"#,
        )
        .bind(reservation_id.to_string())
        .bind(symbol.as_str())
        .bind(direction_str(direction))
        .bind(requested_margin.to_string())
        .bind(leverage as i64)
        .bind(score as i64)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await;

        // The unique partial index on (symbol) for active statuses catches a
        // duplicate-symbol race that slipped past the read above.
        if insert_result.is_err() {
            return Err(LedgerError::DuplicateSymbol);
        }

        sqlx::query("UPDATE risk_accumulator SET total_reserved_risk = ?, version = version + 1, updated_at = ? WHERE id = 1")
            .bind((total_reserved + requested_margin).to_string())
            .bind(now.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(|_| LedgerError::Contended)?;

        tx.commit().await.map_err(|_| LedgerError::Contended)?;

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
        let row = sqlx::query("SELECT status, version FROM positions WHERE reservation_id = ?")
            .bind(reservation_id.to_string())
            .fetch_optional(&self.db.pool)
            .await
            .map_err(|_| LedgerError::Contended)?
            .ok_or(LedgerError::UnknownReservation)?;

        let status = parse_status(&row.get::<String, _>("status"));
        let version: i64 = row.get("version");

        match status {
            PositionStatus::Open => return Ok(()), // idempotent retry, P5
            PositionStatus::Closing | PositionStatus::Closed => return Err(LedgerError::AlreadyCommitted),
            PositionStatus::Reserved => {}
        }

        let result = sqlx::query(
            r#"UPDATE positions SET status = 'OPEN', entry_price = ?, quantity = ?, tp_price = ?, sl_price = ?,
               atr_at_entry = ?, opened_at = ?, version = version + 1, updated_at = ?
               WHERE reservation_id = ? AND version = ?"#,
        )
        .bind(entry_price.to_string())
        .bind(quantity.to_string())
        .bind(tp_price.to_string())
        .bind(sl_price.to_string())
        .bind(atr.to_string())
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(reservation_id.to_string())
        .bind(version)
        .execute(&self.db.pool)
        .await
        .map_err(|_| LedgerError::Contended)?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::Contended);
        }
        Ok(())
    }

    async fn rollback_reservation(&self, reservation_id: Uuid) -> Result<(), LedgerError> {
        let mut tx = self.db.pool.begin().await.map_err(|_| LedgerError::Contended)?;
        let row = sqlx::query("SELECT status, margin_committed FROM positions WHERE reservation_id = ?")
            .bind(reservation_id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|_| LedgerError::Contended)?;

        let Some(row) = row else { return Ok(()) };
        if parse_status(&row.get::<String, _>("status")) != PositionStatus::Reserved {
            return Ok(());
        }
        let margin = Decimal::from_str(&row.get::<String, _>("margin_committed")).unwrap_or_default();

        sqlx::query("DELETE FROM positions WHERE reservation_id = ? AND status = 'RESERVED'")
            .bind(reservation_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|_| LedgerError::Contended)?;

        let now = Utc::now();
        let (total_reserved, _, _, _) = Self::fetch_accumulator_state(&mut tx).await?;
        sqlx::query("UPDATE risk_accumulator SET total_reserved_risk = ?, version = version + 1, updated_at = ? WHERE id = 1")
            .bind((total_reserved - margin).to_string())
            .bind(now.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(|_| LedgerError::Contended)?;

        tx.commit().await.map_err(|_| LedgerError::Contended)?;
        Ok(())
    }

    async fn list_open(&self) -> Result<Vec<Position>, LedgerError> {
        let rows = sqlx::query("SELECT * FROM positions WHERE status = 'OPEN'")
            .fetch_all(&self.db.pool)
            .await
            .map_err(|_| LedgerError::Contended)?;
        Ok(rows.iter().map(row_to_position).collect())
    }

    async fn begin_close(&self, symbol: &Symbol, exit_reason: &str) -> Result<CloseToken, LedgerError> {
        let now = Utc::now();
        let row = sqlx::query("SELECT reservation_id, status, version FROM positions WHERE symbol = ? AND status IN ('OPEN','CLOSING')")
            .bind(symbol.as_str())
            .fetch_optional(&self.db.pool)
            .await
            .map_err(|_| LedgerError::Contended)?
            .ok_or(LedgerError::NotOpen)?;

        let status = parse_status(&row.get::<String, _>("status"));
        if status == PositionStatus::Closing {
            return Err(LedgerError::AlreadyClosing);
        }

        let reservation_id = Uuid::parse_str(&row.get::<String, _>("reservation_id")).expect("stored uuid is valid");
        let version: i64 = row.get("version");

        let result = sqlx::query(
            "UPDATE positions SET status = 'CLOSING', exit_reason = ?, version = version + 1, updated_at = ? WHERE reservation_id = ? AND version = ? AND status = 'OPEN'",
        )
        .bind(exit_reason)
        .bind(now.to_rfc3339())
        .bind(reservation_id.to_string())
        .bind(version)
        .execute(&self.db.pool)
        .await
        .map_err(|_| LedgerError::Contended)?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::AlreadyClosing);
        }
        Ok(CloseToken(reservation_id))
    }

    async fn finalize_close(
        &self,
        token: CloseToken,
        exit_price: Decimal,
        realized_pnl: Decimal,
    ) -> Result<(), LedgerError> {
        let now = Utc::now();
        let mut tx = self.db.pool.begin().await.map_err(|_| LedgerError::Contended)?;

        let row = sqlx::query("SELECT status, version, margin_committed FROM positions WHERE reservation_id = ?")
            .bind(token.0.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|_| LedgerError::Contended)?
            .ok_or(LedgerError::UnknownReservation)?;

        if parse_status(&row.get::<String, _>("status")) != PositionStatus::Closing {
            return Err(LedgerError::NotOpen);
        }
        let version: i64 = row.get("version");
        let margin = Decimal::from_str(&row.get::<String, _>("margin_committed")).unwrap_or_default();

        let result = sqlx::query(
            "UPDATE positions SET status = 'CLOSED', exit_price = ?, realized_pnl = ?, closed_at = ?, version = version + 1, updated_at = ? WHERE reservation_id = ? AND version = ?",
        )
        .bind(exit_price.to_string())
        .bind(realized_pnl.to_string())
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(token.0.to_string())
        .bind(version)
        .execute(&mut *tx)
        .await
        .map_err(|_| LedgerError::Contended)?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::Contended);
        }

        let (total_reserved, daily_pnl, _date, breach_at) = Self::fetch_accumulator_state(&mut tx).await?;
        let new_daily_pnl = daily_pnl + realized_pnl;
        let new_breach_at = if breach_at.is_none() && new_daily_pnl <= self.limits.daily_loss_breach_threshold() {
            Some(now)
        } else {
            breach_at
        };

        sqlx::query(
            "UPDATE risk_accumulator SET total_reserved_risk = ?, daily_pnl = ?, daily_loss_breach_at = ?, version = version + 1, updated_at = ? WHERE id = 1",
        )
        .bind((total_reserved - margin).to_string())
        .bind(new_daily_pnl.to_string())
        .bind(new_breach_at.map(|t| t.to_rfc3339()))
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(|_| LedgerError::Contended)?;

        tx.commit().await.map_err(|_| LedgerError::Contended)?;
        Ok(())
    }

    async fn daily_rollover(&self, now: DateTime<Utc>) -> Result<(), LedgerError> {
        let mut tx = self.db.pool.begin().await.map_err(|_| LedgerError::Contended)?;
        let (_, _, date, _) = Self::fetch_accumulator_state(&mut tx).await?;
        if now.date_naive() > date {
            sqlx::query(
                "UPDATE risk_accumulator SET daily_pnl = '0', daily_pnl_date = ?, daily_loss_breach_at = NULL, version = version + 1, updated_at = ? WHERE id = 1",
            )
            .bind(now.date_naive().to_string())
            .bind(now.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(|_| LedgerError::Contended)?;
        }
        tx.commit().await.map_err(|_| LedgerError::Contended)?;
        Ok(())
    }

    async fn list_stale_reservations(&self, older_than: DateTime<Utc>) -> Result<Vec<Position>, LedgerError> {
        let rows = sqlx::query("SELECT * FROM positions WHERE status = 'RESERVED' AND reserved_at < ?")
            .bind(older_than.to_rfc3339())
            .fetch_all(&self.db.pool)
            .await
            .map_err(|_| LedgerError::Contended)?;
        Ok(rows.iter().map(row_to_position).collect())
    }

    async fn record_close_failure(&self, reservation_id: Uuid, now: DateTime<Utc>) -> Result<Position, LedgerError> {
        // stuck_since is stamped only once consecutive_close_failures reaches
        // 3 (spec.md §7); earlier failures bump the counter without marking
        // the position STUCK yet.
        sqlx::query(
            "UPDATE positions SET consecutive_close_failures = consecutive_close_failures + 1, \
             stuck_since = CASE \
               WHEN stuck_since IS NOT NULL THEN stuck_since \
               WHEN consecutive_close_failures + 1 >= 3 THEN ? \
               ELSE NULL \
             END, \
             version = version + 1, updated_at = ? \
             WHERE reservation_id = ?",
        )
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(reservation_id.to_string())
        .execute(&self.db.pool)
        .await
        .map_err(|_| LedgerError::Contended)?;

        let row = sqlx::query("SELECT * FROM positions WHERE reservation_id = ?")
            .bind(reservation_id.to_string())
            .fetch_optional(&self.db.pool)
            .await
            .map_err(|_| LedgerError::Contended)?
            .ok_or(LedgerError::UnknownReservation)?;
        Ok(row_to_position(&row))
    }

    async fn clear_close_failure(&self, reservation_id: Uuid) -> Result<(), LedgerError> {
        sqlx::query(
            "UPDATE positions SET consecutive_close_failures = 0, stuck_since = NULL, version = version + 1, updated_at = ? \
             WHERE reservation_id = ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(reservation_id.to_string())
        .execute(&self.db.pool)
        .await
        .map_err(|_| LedgerError::Contended)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::risk::limits::RiskLimits;
    use rust_decimal_macros::dec;

    fn limits() -> RiskLimits {
        RiskLimits {
            capital: dec!(10000),
            max_open_trades: 3,
            max_portfolio_risk: dec!(1.0),
            daily_loss_limit: dec!(0.05),
            max_loss_per_trade: dec!(0.02),
            max_hold_minutes: 10,
            fast_exit_minutes: 3,
            fast_exit_threshold: dec!(0.003),
            news_blackout_window_min: 10,
        }
    }

    #[tokio::test]
    async fn close_failure_streak_persists_and_clears_across_reads() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let ledger = SqliteRiskLedger::new(db, limits());

        let reservation = ledger.reserve_slot(&Symbol::new("XUSDT"), dec!(100), Direction::Long, 80, 5).await.unwrap();
        ledger.commit_position(reservation.reservation_id, dec!(100), dec!(1), dec!(104), dec!(98), dec!(1)).await.unwrap();
        ledger.begin_close(&Symbol::new("XUSDT"), "SL_HIT").await.unwrap();

        for _ in 0..2 {
            let position = ledger.record_close_failure(reservation.reservation_id, Utc::now()).await.unwrap();
            assert!(position.stuck_since.is_none());
        }
        let position = ledger.record_close_failure(reservation.reservation_id, Utc::now()).await.unwrap();
        assert_eq!(position.consecutive_close_failures, 3);
        assert!(position.stuck_since.is_some());

        ledger.clear_close_failure(reservation.reservation_id).await.unwrap();
        let row = sqlx::query("SELECT * FROM positions WHERE reservation_id = ?")
            .bind(reservation.reservation_id.to_string())
            .fetch_one(&ledger.db.pool)
            .await
            .unwrap();
        let cleared = row_to_position(&row);
        assert_eq!(cleared.consecutive_close_failures, 0);
        assert!(cleared.stuck_since.is_none());
    }
}
