use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{info, warn};

use crate::application::risk_ledger::retry_contended;
use crate::domain::errors::{EngineError, LedgerError};
use crate::domain::market::ticker::Ticker;
use crate::domain::ports::{ExchangeGateway, RiskLedger};
use crate::domain::risk::RiskLimits;
use crate::domain::symbol::Symbol;
use crate::domain::trading::candidate::{Candidate, SkipReason};
use crate::domain::trading::position::{Position, PositionStatus};
use crate::infrastructure::persistence::HistoryRepository;

use super::sizing::size_candidate;

const COMMIT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(10);

/// What happened to one candidate during a tick.
#[derive(Debug)]
pub enum CandidateOutcome {
    Committed { symbol: Symbol, reservation_id: uuid::Uuid },
    Skipped { symbol: Symbol, reason: SkipReason },
    TickAborted,
}

/// C4: consumes the scanner's ranked candidate list and, for each, runs
/// sizing → reservation → entry order → commit → audit log (spec.md §4.4).
pub struct TradingEngine {
    ledger: Arc<dyn RiskLedger>,
    exchange: Arc<dyn ExchangeGateway>,
    history: Arc<HistoryRepository>,
    limits: RiskLimits,
}

impl TradingEngine {
    pub fn new(ledger: Arc<dyn RiskLedger>, exchange: Arc<dyn ExchangeGateway>, history: Arc<HistoryRepository>, limits: RiskLimits) -> Self {
        Self { ledger, exchange, history, limits }
    }

    /// Processes candidates in the order the scanner ranked them
    /// (score-descending; spec.md §5 ordering guarantee). Candidates must
    /// already be sorted by the caller.
    pub async fn process_tick(&self, candidates: Vec<Candidate>, tickers: &HashMap<Symbol, Ticker>) -> Result<Vec<CandidateOutcome>, EngineError> {
        let mut outcomes = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            match self.process_one(&candidate, tickers).await {
                Ok(outcome) => {
                    let abort = matches!(outcome, CandidateOutcome::TickAborted);
                    outcomes.push(outcome);
                    if abort {
                        break;
                    }
                }
                Err(EngineError::AbortTick) => {
                    outcomes.push(CandidateOutcome::TickAborted);
                    break;
                }
                Err(other) => return Err(other),
            }
        }

        Ok(outcomes)
    }

    async fn process_one(&self, candidate: &Candidate, tickers: &HashMap<Symbol, Ticker>) -> Result<CandidateOutcome, EngineError> {
        let Some(ticker) = tickers.get(&candidate.symbol) else {
            return Ok(self.skip(candidate, SkipReason::ExchangeRejected).await);
        };

        if candidate.price.is_zero() {
            return Ok(self.skip(candidate, SkipReason::RiskExceeded).await);
        }
        let sl_distance_pct = (candidate.price - candidate.suggested_sl).abs() / candidate.price;

        let Some(plan) = size_candidate(&self.limits, candidate.score, ticker.quote_volume_24h, sl_distance_pct) else {
            return Ok(self.skip(candidate, SkipReason::RiskExceeded).await);
        };

        let symbol = candidate.symbol.clone();
        let direction = candidate.direction;
        let score = candidate.score;
        let leverage = plan.leverage;
        let margin = plan.margin;
        let ledger = &self.ledger;

        let reservation = retry_contended(|_attempt| ledger.reserve_slot(&symbol, margin, direction, score, leverage)).await;

        let reservation = match reservation {
            Ok(r) => r,
            Err(LedgerError::NoCapacity) => {
                warn!(symbol = %candidate.symbol, "no remaining risk capacity; stopping tick");
                self.history.record_skip(candidate.symbol.as_str(), SkipReason::NoCapacity, Some(candidate.score), None).await.ok();
                return Ok(CandidateOutcome::TickAborted);
            }
            Err(LedgerError::DuplicateSymbol) => {
                return Ok(self.skip(candidate, SkipReason::DuplicateSymbol).await);
            }
            Err(LedgerError::CircuitBreaker) => {
                warn!("circuit breaker active; aborting tick");
                return Err(EngineError::AbortTick);
            }
            Err(other) => return Err(EngineError::Ledger(other)),
        };

        let order = match self.exchange.place_market_order(&candidate.symbol, direction, plan.notional / candidate.price, leverage).await {
            Ok(order) => order,
            Err(_) => {
                self.ledger.rollback_reservation(reservation.reservation_id).await.ok();
                return Ok(self.skip(candidate, SkipReason::ExchangeRejected).await);
            }
        };

        let commit = timeout(
            COMMIT_CONFIRMATION_TIMEOUT,
            self.ledger.commit_position(reservation.reservation_id, order.avg_price, order.filled_qty, candidate.suggested_tp, candidate.suggested_sl, candidate.atr),
        )
        .await;

        match commit {
            Ok(Ok(())) => {
                let position = self.synthesize_committed_position(candidate, &reservation, &order);
                self.history.record_trade(&position).await.ok();
                info!(symbol = %candidate.symbol, reservation_id = %reservation.reservation_id, "position committed");
                Ok(CandidateOutcome::Committed { symbol: candidate.symbol.clone(), reservation_id: reservation.reservation_id })
            }
            Ok(Err(err)) => {
                warn!(symbol = %candidate.symbol, error = %err, "commit_position failed after order fill; leaving RESERVED for reconciliation");
                Ok(self.skip(candidate, SkipReason::OrderFailed).await)
            }
            Err(_elapsed) => {
                warn!(symbol = %candidate.symbol, "commit_position confirmation timed out; leaving RESERVED for reconciliation");
                Ok(CandidateOutcome::Committed { symbol: candidate.symbol.clone(), reservation_id: reservation.reservation_id })
            }
        }
    }

    async fn skip(&self, candidate: &Candidate, reason: SkipReason) -> CandidateOutcome {
        self.history.record_skip(candidate.symbol.as_str(), reason, Some(candidate.score), None).await.ok();
        CandidateOutcome::Skipped { symbol: candidate.symbol.clone(), reason }
    }

    /// Builds a local record of the just-committed position purely for the
    /// audit log; the ledger's own row is the source of truth.
    fn synthesize_committed_position(
        &self,
        candidate: &Candidate,
        reservation: &crate::domain::ports::Reservation,
        order: &crate::domain::ports::OrderResult,
    ) -> Position {
        let now = chrono::Utc::now();
        Position {
            reservation_id: reservation.reservation_id,
            symbol: candidate.symbol.clone(),
            direction: candidate.direction,
            status: PositionStatus::Open,
            margin_committed: reservation.margin_granted,
            leverage: reservation.leverage_granted,
            score_at_entry: candidate.score,
            entry_price: Some(order.avg_price),
            quantity: Some(order.filled_qty),
            tp_price: Some(candidate.suggested_tp),
            sl_price: Some(candidate.suggested_sl),
            atr_at_entry: Some(candidate.atr),
            exit_price: None,
            exit_reason: None,
            closed_at: None,
            realized_pnl: None,
            opened_at: Some(now),
            reserved_at: now,
            stuck_since: None,
            consecutive_close_failures: 0,
            version: 0,
            updated_at: now,
        }
    }
}
