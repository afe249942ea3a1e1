use std::future::Future;
use std::time::Duration;

use crate::domain::errors::LedgerError;
use crate::infrastructure::core::backoff::{retry_with_backoff, BackoffSchedule};

/// The ledger's single retry policy (spec.md §4.1: "bounded: 3 attempts,
/// exponential backoff 50-400 ms"). This is the *only* retry point at the
/// control-plane layer (spec.md §9); everything else either succeeds,
/// fails permanently, or is retried inside the gateway.
fn ledger_retry_schedule() -> BackoffSchedule {
    BackoffSchedule::fixed([Duration::from_millis(50), Duration::from_millis(200)])
}

/// Retries `op` while it returns `LedgerError::Contended`, up to the ledger's
/// bounded attempt budget. Any other error is returned immediately.
pub async fn retry_contended<T, Op, Fut>(op: Op) -> Result<T, LedgerError>
where
    Op: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, LedgerError>>,
{
    retry_with_backoff(&ledger_retry_schedule(), op, |e| matches!(e, LedgerError::Contended)).await
}
