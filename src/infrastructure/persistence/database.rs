use std::str::FromStr;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

/// Thin wrapper around the sqlx connection pool plus schema initialization,
/// grounded in the teacher's `infrastructure/persistence/database.rs`
/// (WAL journal mode, idempotent `CREATE TABLE IF NOT EXISTS` migrations run
/// at startup rather than a separate migration tool).
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("invalid DATABASE_URL: {database_url}"))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .context("failed to open sqlite connection pool")?;

        let db = Self { pool };
        db.init_schema().await?;
        Ok(db)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                reservation_id          TEXT PRIMARY KEY,
                symbol                  TEXT NOT NULL,
                direction               TEXT NOT NULL,
                status                  TEXT NOT NULL,
                margin_committed        TEXT NOT NULL,
                leverage                INTEGER NOT NULL,
                score_at_entry          INTEGER NOT NULL,
                entry_price             TEXT,
                quantity                TEXT,
                tp_price                TEXT,
                sl_price                TEXT,
                atr_at_entry            TEXT,
                exit_price              TEXT,
                exit_reason             TEXT,
                closed_at               TEXT,
                realized_pnl            TEXT,
                opened_at               TEXT,
                reserved_at             TEXT NOT NULL,
                stuck_since             TEXT,
                consecutive_close_failures INTEGER NOT NULL DEFAULT 0,
                version                 INTEGER NOT NULL,
                updated_at              TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("creating positions table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_positions_status_updated ON positions(status, updated_at);")
            .execute(&self.pool)
            .await
            .context("creating positions status index")?;

        sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS idx_positions_symbol_active ON positions(symbol) WHERE status IN ('RESERVED','OPEN','CLOSING');")
            .execute(&self.pool)
            .await
            .context("creating positions active-symbol unique index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS risk_accumulator (
                id                      INTEGER PRIMARY KEY CHECK (id = 1),
                total_reserved_risk     TEXT NOT NULL,
                daily_pnl               TEXT NOT NULL,
                daily_pnl_date          TEXT NOT NULL,
                daily_loss_breach_at    TEXT,
                version                 INTEGER NOT NULL,
                updated_at              TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("creating risk_accumulator table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trade_history (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                reservation_id  TEXT NOT NULL,
                symbol          TEXT NOT NULL,
                direction       TEXT NOT NULL,
                score_at_entry  INTEGER NOT NULL,
                entry_price     TEXT,
                exit_price      TEXT,
                exit_reason     TEXT,
                realized_pnl    TEXT,
                opened_at       TEXT,
                closed_at       TEXT,
                recorded_at     TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("creating trade_history table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS skipped_trades (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol          TEXT NOT NULL,
                reason          TEXT NOT NULL,
                score           INTEGER,
                detail          TEXT,
                recorded_at     TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("creating skipped_trades table")?;

        info!("database schema ready");
        Ok(())
    }
}
