//! Headless scheduler entrypoint, grounded in the teacher's
//! `src/bin/server.rs` (dotenv + tracing setup + a config-driven service
//! build) and `application/system.rs` (per-component `tokio::spawn` loops on
//! their own sleep interval rather than a single shared scheduler task).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use momentum_engine::application::bootstrap::EngineServices;
use momentum_engine::config::EngineConfig;
use momentum_engine::infrastructure::observability::{logging, Metrics};

/// How often the scanner runs a cycle and feeds the trading engine.
const SCAN_INTERVAL_SECS: u64 = 60;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = EngineConfig::from_env().context("loading configuration")?;
    logging::init(&config.log_format);
    config.validate().context("validating configuration")?;

    info!(live_mode = config.live_mode, "momentum engine starting");

    let services = EngineServices::init(&config).await.context("wiring engine services")?;
    let metrics = Arc::new(Metrics::new().context("registering metrics")?);

    info!("running startup reconciliation sweep");
    match services.reconciler.reconcile_on_startup(chrono::Utc::now()).await {
        Ok(outcomes) => info!(count = outcomes.len(), "reconciliation sweep complete"),
        Err(err) => error!(error = %err, "reconciliation sweep failed; continuing with scheduler"),
    }

    let scanner_handle = {
        let services = services.clone();
        let metrics = metrics.clone();
        let max_open_trades = config.max_open_trades as usize;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(SCAN_INTERVAL_SECS));
            loop {
                interval.tick().await;
                if let Err(err) = run_scan_and_trade_cycle(&services, &metrics, max_open_trades).await {
                    error!(error = %err, "scan/trade cycle failed");
                }
            }
        })
    };

    let closer_handles: Vec<_> = config
        .closer_worker_offsets_sec
        .iter()
        .copied()
        .map(|offset| {
            let services = services.clone();
            let metrics = metrics.clone();
            tokio::spawn(async move {
                if offset > 0 {
                    tokio::time::sleep(Duration::from_secs(offset as u64)).await;
                }
                let mut interval = tokio::time::interval(Duration::from_secs(SCAN_INTERVAL_SECS));
                loop {
                    interval.tick().await;
                    match services.closer.closer_tick().await {
                        Ok(closed) => {
                            if closed > 0 {
                                info!(closed, "position closer cycle closed positions");
                            }
                        }
                        Err(err) => {
                            error!(error = %err, "position closer cycle failed");
                            metrics.inc_closed("CYCLE_ERROR");
                        }
                    }
                }
            })
        })
        .collect();

    info!("scheduler running; press Ctrl+C to shut down");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    scanner_handle.abort();
    for handle in closer_handles {
        handle.abort();
    }

    Ok(())
}

async fn run_scan_and_trade_cycle(services: &EngineServices, metrics: &Metrics, max_open_trades: usize) -> Result<()> {
    let open = services.ledger.list_open().await.context("listing open positions")?;
    let available_slots = max_open_trades.saturating_sub(open.len());
    metrics.open_positions.set(open.len() as f64);

    if available_slots == 0 {
        warn!("no available slots; skipping scan cycle");
        return Ok(());
    }

    let candidates = services.scanner.scan(available_slots).await.context("scanning for candidates")?;
    if candidates.is_empty() {
        return Ok(());
    }

    let tickers = services.market_data.tickers().await.context("fetching tickers for sizing")?;
    let outcomes = services.engine.process_tick(candidates, &tickers).await.context("processing candidates")?;

    for outcome in &outcomes {
        match outcome {
            momentum_engine::application::trading_engine::CandidateOutcome::Committed { symbol, .. } => {
                info!(symbol = %symbol, "candidate committed");
            }
            momentum_engine::application::trading_engine::CandidateOutcome::Skipped { symbol, reason } => {
                metrics.inc_skipped(&format!("{reason:?}"));
                info!(symbol = %symbol, reason = ?reason, "candidate skipped");
            }
            momentum_engine::application::trading_engine::CandidateOutcome::TickAborted => {
                warn!("tick aborted early: portfolio at capacity");
            }
        }
    }

    Ok(())
}
