use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;

use crate::domain::trading::candidate::SkipReason;
use crate::domain::trading::position::Position;

use super::database::Database;

/// Append-only audit trail: every committed/closed trade and every skipped
/// candidate. This is the primary diagnostic surface when trade counts
/// deviate from expectations (spec.md §4.4's "skipped-trades log").
pub struct HistoryRepository {
    db: Database,
}

impl HistoryRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn record_trade(&self, position: &Position) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO trade_history
               (reservation_id, symbol, direction, score_at_entry, entry_price, exit_price,
                exit_reason, realized_pnl, opened_at, closed_at, recorded_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(position.reservation_id.to_string())
        .bind(position.symbol.as_str())
        .bind(format!("{}", position.direction))
        .bind(position.score_at_entry as i64)
        .bind(position.entry_price.map(|d| d.to_string()))
        .bind(position.exit_price.map(|d| d.to_string()))
        .bind(position.exit_reason.clone())
        .bind(position.realized_pnl.map(|d| d.to_string()))
        .bind(position.opened_at.map(|t| t.to_rfc3339()))
        .bind(position.closed_at.map(|t| t.to_rfc3339()))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.db.pool)
        .await
        .context("recording trade history")?;
        Ok(())
    }

    pub async fn record_skip(&self, symbol: &str, reason: SkipReason, score: Option<u8>, detail: Option<&str>) -> Result<()> {
        sqlx::query(
            "INSERT INTO skipped_trades (symbol, reason, score, detail, recorded_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(symbol)
        .bind(reason.to_string())
        .bind(score.map(|s| s as i64))
        .bind(detail)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.db.pool)
        .await
        .context("recording skipped trade")?;
        Ok(())
    }

    /// Sum of realized P&L for trades closed on the current UTC day, used to
    /// cross-check the ledger's `daily_pnl` accumulator (P6).
    pub async fn realized_pnl_today(&self) -> Result<Decimal> {
        let today = Utc::now().date_naive().to_string();
        let rows: Vec<(Option<String>, String)> =
            sqlx::query_as("SELECT realized_pnl, closed_at FROM trade_history WHERE realized_pnl IS NOT NULL")
                .fetch_all(&self.db.pool)
                .await
                .context("summing realized pnl")?;

        let sum = rows
            .into_iter()
            .filter(|(_, closed_at)| closed_at.starts_with(&today))
            .filter_map(|(pnl, _)| pnl.and_then(|p| p.parse::<Decimal>().ok()))
            .sum();
        Ok(sum)
    }
}
