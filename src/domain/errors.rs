use thiserror::Error;

/// Failure modes surfaced by the risk ledger's conditional-write API.
///
/// Every variant here corresponds to a documented outcome of an operation in
/// [`crate::domain::ports::RiskLedger`]; none of them are retried by the
/// ledger itself except `Contended`, which the caller retries with backoff.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("no remaining portfolio risk capacity for this reservation")]
    NoCapacity,
    #[error("a position for this symbol is already OPEN or CLOSING")]
    DuplicateSymbol,
    #[error("circuit breaker is active: daily loss limit has been breached")]
    CircuitBreaker,
    #[error("conditional write lost a race; retry with fresh state")]
    Contended,
    #[error("reservation id is not known to the ledger")]
    UnknownReservation,
    #[error("reservation has already been committed")]
    AlreadyCommitted,
    #[error("position for this symbol is not OPEN")]
    NotOpen,
    #[error("position for this symbol is already CLOSING")]
    AlreadyClosing,
}

/// Failure modes surfaced by the market data gateway.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("symbol {0} unavailable after exhausting retries")]
    Unavailable(String),
    #[error("token bucket exhausted and wait budget exceeded")]
    RateLimitWaitExceeded,
}

/// Error taxonomy exposed by the exchange gateway (spec.md §6).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    #[error("rate limited by venue")]
    RateLimited,
    #[error("unauthorized: credentials rejected")]
    Unauthorized,
    #[error("insufficient margin for requested order")]
    InsufficientMargin,
    #[error("symbol is not tradable on this venue")]
    InvalidSymbol,
    #[error("transient venue error: {0}")]
    Transient(String),
    #[error("unknown venue error: {0}")]
    Unknown(String),
}

/// Errors raised while running the four-phase scanner pipeline.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScannerError {
    #[error("phase 1+2 deadline exceeded; tick skipped")]
    DeadlineExceeded,
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Errors raised by the trading engine while processing a candidate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("candidate rejected before reservation: {0:?}")]
    Skipped(crate::domain::trading::candidate::SkipReason),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
    #[error("circuit breaker tripped; aborting remainder of tick")]
    AbortTick,
}

/// Errors raised by the position closer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CloserError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
    #[error("position left in CLOSING after exhausting exchange retries")]
    StuckOnExchange,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_error_messages_are_stable() {
        assert_eq!(
            LedgerError::NoCapacity.to_string(),
            "no remaining portfolio risk capacity for this reservation"
        );
        assert_eq!(LedgerError::Contended.to_string(), "conditional write lost a race; retry with fresh state");
    }

    #[test]
    fn gateway_error_carries_symbol_context() {
        let err = GatewayError::Unavailable("BTCUSDT".to_string());
        assert!(err.to_string().contains("BTCUSDT"));
    }
}
