//! Static service wiring, grounded in the teacher's
//! `application/bootstrap/services.rs` (`ServicesHandle` +
//! `ServicesBootstrap::init`): one place that turns an `EngineConfig` into
//! every concrete adapter the application layer depends on only through
//! ports. `src/bin/engine.rs` calls `EngineServices::init` once at startup
//! and then just calls methods on the handle.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Duration as ChronoDuration;

use crate::application::market_data::MarketDataGateway;
use crate::application::position_closer::{NoBlackoutFeed, PositionCloser};
use crate::application::risk_ledger::Reconciler;
use crate::application::scanner::momentum_scanner::ScannerThresholds;
use crate::application::scanner::MomentumScanner;
use crate::application::trading_engine::TradingEngine;
use crate::config::{EngineConfig, SessionAffinityTable};
use crate::domain::ports::{ExchangeGateway, RiskLedger};
use crate::infrastructure::core::build_http_client;
use crate::infrastructure::exchange::BinanceFuturesGateway;
use crate::infrastructure::persistence::{Database, HistoryRepository, SqliteRiskLedger};

/// Grace period before a `RESERVED` row is considered stale enough for the
/// startup reconciliation sweep to act on it (spec.md §4.1).
const RECONCILIATION_GRACE_PERIOD_SEC: i64 = 30;

/// Every long-lived service the binary entrypoint drives, wired from a
/// single `EngineConfig`. Cheaply cloneable: every field is already an
/// `Arc` or a small value type.
#[derive(Clone)]
pub struct EngineServices {
    pub ledger: Arc<dyn RiskLedger>,
    pub exchange: Arc<dyn ExchangeGateway>,
    pub history: Arc<HistoryRepository>,
    pub market_data: Arc<MarketDataGateway>,
    pub scanner: Arc<MomentumScanner>,
    pub engine: Arc<TradingEngine>,
    pub closer: Arc<PositionCloser>,
    pub reconciler: Arc<Reconciler>,
}

impl EngineServices {
    pub async fn init(config: &EngineConfig) -> Result<Self> {
        let db = Database::connect(&config.database_url)
            .await
            .context("connecting to the position database")?;

        let limits = config.risk_limits();
        let ledger: Arc<dyn RiskLedger> = Arc::new(SqliteRiskLedger::new(db.clone(), limits.clone()));
        let history = Arc::new(HistoryRepository::new(db));

        let http_client = build_http_client(Duration::from_secs(10));
        let exchange: Arc<dyn ExchangeGateway> = Arc::new(
            BinanceFuturesGateway::new(
                http_client,
                &config.binance_base_url,
                config.binance_api_key.clone(),
                config.binance_api_secret.clone(),
                config.live_mode,
            )
            .context("constructing the exchange gateway")?,
        );

        let market_data = Arc::new(MarketDataGateway::new(exchange.clone(), 20));

        let scanner_thresholds = ScannerThresholds {
            min_atr_pct_1min: config.min_atr_pct_1min,
            vol_ratio_min: config.vol_ratio_min,
            thrust_min_pct: config.thrust_min_pct,
            prefilter_top_k: config.prefilter_top_k,
            min_momentum_score: config.min_momentum_score,
            tp_mult: config.tp_mult,
            sl_mult: config.sl_mult,
        };
        let scanner = Arc::new(MomentumScanner::new(
            market_data.clone(),
            config.universe.clone(),
            SessionAffinityTable::default(),
            scanner_thresholds,
        ));

        let engine = Arc::new(TradingEngine::new(ledger.clone(), exchange.clone(), history.clone(), limits.clone()));

        let closer = Arc::new(PositionCloser::new(
            ledger.clone(),
            exchange.clone(),
            market_data.clone(),
            history.clone(),
            Arc::new(NoBlackoutFeed),
            limits,
        ));

        let reconciler = Arc::new(Reconciler::new(
            ledger.clone(),
            exchange.clone(),
            ChronoDuration::seconds(RECONCILIATION_GRACE_PERIOD_SEC),
        ));

        Ok(Self { ledger, exchange, history, market_data, scanner, engine, closer, reconciler })
    }
}
