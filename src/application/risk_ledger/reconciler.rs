use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{info, warn};

use crate::domain::errors::{ExchangeError, LedgerError};
use crate::domain::ports::{ExchangeGateway, RiskLedger};

/// Outcome of reconciling a single stale reservation, for logging/metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconciliationOutcome {
    Promoted,
    RolledBack,
}

/// Runs once at Scanner-worker startup (spec.md §4.1's "why this shape"
/// paragraph, made a first-class operation per SPEC_FULL.md §4.1): finds
/// `RESERVED` rows older than a grace period and either promotes them to
/// `OPEN` (the exchange order went through but the engine crashed before
/// `commit_position`) or rolls them back (the order never reached the
/// venue). Never runs mid-tick.
pub struct Reconciler {
    ledger: Arc<dyn RiskLedger>,
    exchange: Arc<dyn ExchangeGateway>,
    grace_period: ChronoDuration,
}

impl Reconciler {
    pub fn new(ledger: Arc<dyn RiskLedger>, exchange: Arc<dyn ExchangeGateway>, grace_period: ChronoDuration) -> Self {
        Self { ledger, exchange, grace_period }
    }

    pub async fn reconcile_on_startup(&self, now: DateTime<Utc>) -> Result<Vec<ReconciliationOutcome>, LedgerError> {
        let cutoff = now - self.grace_period;
        let stale = self.ledger.list_stale_reservations(cutoff).await?;
        let mut outcomes = Vec::with_capacity(stale.len());

        for position in stale {
            match self.exchange.has_open_position(&position.symbol).await {
                Ok(Some(order)) => {
                    self.ledger
                        .commit_position(
                            position.reservation_id,
                            order.avg_price,
                            order.filled_qty,
                            position.tp_price.unwrap_or(order.avg_price),
                            position.sl_price.unwrap_or(order.avg_price),
                            position.atr_at_entry.unwrap_or_default(),
                        )
                        .await?;
                    info!(symbol = %position.symbol, reservation_id = %position.reservation_id, "reconciliation promoted stale reservation to OPEN");
                    outcomes.push(ReconciliationOutcome::Promoted);
                }
                Ok(None) => {
                    self.ledger.rollback_reservation(position.reservation_id).await?;
                    warn!(symbol = %position.symbol, reservation_id = %position.reservation_id, "reconciliation rolled back stale reservation: no matching exchange order");
                    outcomes.push(ReconciliationOutcome::RolledBack);
                }
                Err(ExchangeError::Transient(_)) | Err(ExchangeError::RateLimited) => {
                    // Leave the reservation for the next reconciliation pass
                    // rather than guessing; this symbol is simply skipped.
                    warn!(symbol = %position.symbol, "reconciliation deferred: exchange unreachable");
                }
                Err(err) => {
                    warn!(symbol = %position.symbol, error = %err, "reconciliation rolled back stale reservation after exchange error");
                    self.ledger.rollback_reservation(position.reservation_id).await?;
                    outcomes.push(ReconciliationOutcome::RolledBack);
                }
            }
        }

        Ok(outcomes)
    }
}
